// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! MJPEG stream adaptors: multipart/x-mixed-replace generators for the raw
//! camera passthrough and the annotated detector feed.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures_util::Stream;
use tracing::info;

use crate::camera::CaptureWorker;
use crate::config::ConfigStore;
use crate::detector_manager::DetectorManager;
use crate::render;
use crate::stream_manager::CameraStreamManager;

const EMPTY_FRAME_TIMEOUT: u32 = 150;
const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const RAW_RECHECK_EVERY_N_FRAMES: u32 = 30;
const ANNOTATED_RECHECK_INTERVAL: Duration = Duration::from_secs(1);

fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(jpeg.len() + 64);
    out.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\r\n");
    Bytes::from(out)
}

/// Raw camera passthrough generator, per `§4.5.1`: every 30 frames
/// re-checks the camera's enabled status; exits after 150 consecutive
/// empty reads; releases the consumer on exit for any reason. The worker
/// is resolved once by the caller (`get_stream`, with `cleanup_dead`/
/// `force_restart` fallback) before this generator starts — the hot loop
/// only ever calls `get_frame()` on the borrowed handle.
pub fn raw_cctv_stream(
    camera_id: u64,
    consumer_id: String,
    url: String,
    worker: Arc<CaptureWorker>,
    stream_manager: Arc<CameraStreamManager>,
    config: Arc<ConfigStore>,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
    stream! {
        let mut frame_count: u32 = 0;
        let mut empty_frames: u32 = 0;

        loop {
            if frame_count % RAW_RECHECK_EVERY_N_FRAMES == 0 {
                let still_enabled = config.get_camera(camera_id).map(|c| c.enabled).unwrap_or(false);
                if !still_enabled {
                    info!(camera_id, "camera became inactive during CCTV streaming");
                    break;
                }
            }

            let frame = worker.get_frame();
            match frame {
                Some(frame) => {
                    empty_frames = 0;
                    match frame.encode_jpeg(80) {
                        Ok(jpeg) => yield Ok(multipart_part(&jpeg)),
                        Err(_) => {}
                    }
                }
                None => {
                    empty_frames += 1;
                    if empty_frames >= EMPTY_FRAME_TIMEOUT {
                        info!(camera_id, "too many empty frames, stopping CCTV stream");
                        break;
                    }
                }
            }

            frame_count += 1;
            tokio::time::sleep(FRAME_INTERVAL).await;
        }

        stream_manager.release_stream(&url, &consumer_id);
    }
}

/// Annotated detector feed generator, per `§4.5.2`: sources the
/// annotated-frame slot (not a Capture Worker), overlays a client-side
/// timestamp, and re-checks detector + camera status every second rather
/// than every 30 frames.
pub fn annotated_detector_stream(
    detector_id: u64,
    camera_id: u64,
    manager: Arc<DetectorManager>,
    config: Arc<ConfigStore>,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
    stream! {
        let mut empty_frames: u32 = 0;
        let mut last_check = tokio::time::Instant::now();

        loop {
            if last_check.elapsed() >= ANNOTATED_RECHECK_INTERVAL {
                last_check = tokio::time::Instant::now();
                let detector_active = config.get_detector(detector_id).map(|d| d.running).unwrap_or(false);
                let camera_active = config.get_camera(camera_id).map(|c| c.enabled).unwrap_or(false);
                if !detector_active || !camera_active {
                    info!(detector_id, "detector or camera became inactive during annotated streaming");
                    break;
                }
            }

            let frame = manager.global().get_frame(detector_id);
            match frame {
                Some(frame) => {
                    empty_frames = 0;
                    let overlaid = render::overlay_client_timestamp(&frame);
                    if let Ok(jpeg) = overlaid.encode_jpeg(85) {
                        yield Ok(multipart_part(&jpeg));
                    }
                }
                None => {
                    empty_frames += 1;
                    if empty_frames >= EMPTY_FRAME_TIMEOUT {
                        info!(detector_id, "too many empty frames, stopping annotated stream");
                        break;
                    }
                }
            }

            tokio::time::sleep(FRAME_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_part_has_correct_framing() {
        let part = multipart_part(b"JPEGDATA");
        let s = String::from_utf8_lossy(&part);
        assert!(s.starts_with("--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(s.ends_with("\r\n"));
        assert!(s.contains("JPEGDATA"));
    }
}
