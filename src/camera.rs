// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The Capture Worker: one GStreamer pipeline per unique camera URL,
//! publishing the most recently decoded frame and self-healing on read
//! failures. Generalises the teacher's `CameraStream`/`supervised_connect`
//! pair (which muxed to MPEG-TS for disk storage) to decode raw RGB frames
//! for live fan-out instead.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{NvrError, Result};
use crate::frame::{Frame, FrameSlot};

/// Sentinel URL meaning "use the local default capture device". Never
/// participates in name-based deduplication beyond string equality.
pub const LOCAL_DEVICE_SENTINEL: &str = "http://1.1.1.1";

const FRESHNESS_WINDOW: Duration = Duration::from_secs(5);
const MAX_RECONNECT_FAILURES: u32 = 10;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const READ_FAILURE_THRESHOLD: u32 = 3;
const CONSUMERLESS_EXIT_THRESHOLD: u32 = 3;
const TARGET_WIDTH: u32 = 640;
const TARGET_HEIGHT: u32 = 480;

struct Shared {
    consumers: HashSet<String>,
    last_frame_at: Option<Instant>,
    alive: bool,
}

/// One live connection to one video source. `Arc`-shared between the
/// owning Camera Stream Manager and the background task driving the
/// pipeline; the task is the sole writer of the frame slot (I4).
pub struct CaptureWorker {
    pub url: String,
    frame_slot: FrameSlot,
    shared: parking_lot::Mutex<Shared>,
    stop_flag: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CaptureWorker {
    /// Construct and start the background capture loop for `url`.
    pub fn spawn(url: String) -> Arc<CaptureWorker> {
        let worker = Arc::new(CaptureWorker {
            url: url.clone(),
            frame_slot: FrameSlot::new(),
            shared: parking_lot::Mutex::new(Shared {
                consumers: HashSet::new(),
                last_frame_at: None,
                alive: true,
            }),
            stop_flag: Arc::new(AtomicBool::new(false)),
            task: tokio::sync::Mutex::new(None),
        });

        let task_worker = worker.clone();
        let handle = tokio::spawn(async move {
            task_worker.run().await;
            task_worker.shared.lock().alive = false;
        });
        *worker.task.try_lock().expect("no contention at spawn time") = Some(handle);
        worker
    }

    pub fn add_consumer(&self, id: impl Into<String>) {
        self.shared.lock().consumers.insert(id.into());
    }

    pub fn remove_consumer(&self, id: &str) {
        self.shared.lock().consumers.remove(id);
    }

    pub fn consumer_count(&self) -> usize {
        self.shared.lock().consumers.len()
    }

    pub fn consumer_ids(&self) -> Vec<String> {
        self.shared.lock().consumers.iter().cloned().collect()
    }

    pub fn get_frame(&self) -> Option<Frame> {
        self.frame_slot.get()
    }

    /// True iff the worker is running, its pipeline is alive, and a frame
    /// was written within the freshness window.
    pub fn is_healthy(&self) -> bool {
        let shared = self.shared.lock();
        if !shared.alive {
            return false;
        }
        match shared.last_frame_at {
            Some(t) => t.elapsed() < FRESHNESS_WINDOW,
            None => false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.shared.lock().alive
    }

    /// Request graceful termination. Cooperative: the loop checks the flag
    /// every iteration and every wake from sleep.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Await the background task up to `timeout`, logging a warning (not
    /// erroring) if it doesn't finish in time — an orphaned task is safe to
    /// leave behind because all shared state is lock-protected.
    pub async fn join(&self, timeout: Duration) {
        let handle = self.task.lock().await.take();
        let Some(handle) = handle else { return };
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(url = %self.url, error = %e, "capture task panicked"),
            Err(_) => warn!(url = %self.url, ?timeout, "capture task did not exit within timeout"),
        }
    }

    async fn run(&self) {
        let mut consecutive_read_failures = 0u32;
        let mut consecutive_reconnect_failures = 0u32;
        let mut pipeline = match self.open_pipeline() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(url = %self.url, error = %e, "initial connect failed");
                None
            }
        };

        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }

            let no_consumers = self.shared.lock().consumers.is_empty();
            if no_consumers && consecutive_read_failures > CONSUMERLESS_EXIT_THRESHOLD {
                debug!(url = %self.url, "no consumers and repeated failures, exiting");
                break;
            }

            if pipeline.is_none() {
                if consecutive_reconnect_failures >= MAX_RECONNECT_FAILURES {
                    warn!(url = %self.url, "reconnect budget exhausted, giving up");
                    break;
                }
                sleep(RECONNECT_BACKOFF).await;
                match self.open_pipeline() {
                    Ok(p) => {
                        pipeline = Some(p);
                        consecutive_reconnect_failures = 0;
                        consecutive_read_failures = 0;
                    }
                    Err(e) => {
                        consecutive_reconnect_failures += 1;
                        warn!(url = %self.url, attempt = consecutive_reconnect_failures, error = %e, "reconnect failed");
                    }
                }
                continue;
            }

            let pipe = pipeline.as_mut().unwrap();
            match tokio::time::timeout(Duration::from_millis(500), pipe.rx.recv()).await {
                Ok(Some(frame)) => {
                    self.frame_slot.set(frame);
                    let mut shared = self.shared.lock();
                    shared.last_frame_at = Some(Instant::now());
                    drop(shared);
                    consecutive_read_failures = 0;
                }
                Ok(None) => {
                    // Channel closed: pipeline died.
                    pipe.stop();
                    pipeline = None;
                }
                Err(_) => {
                    consecutive_read_failures += 1;
                    if consecutive_read_failures >= READ_FAILURE_THRESHOLD {
                        if let Some(p) = pipeline.take() {
                            p.stop();
                        }
                    }
                }
            }
        }

        if let Some(p) = pipeline {
            p.stop();
        }
        info!(url = %self.url, "capture worker exited");
    }

    fn open_pipeline(&self) -> Result<GstPipeline> {
        GstPipeline::connect(&self.url)
    }
}

/// A running GStreamer pipeline decoding to raw RGB8 frames, forwarded
/// through an async channel from the appsink callback to the capture loop.
struct GstPipeline {
    pipeline: gst::Pipeline,
    rx: mpsc::Receiver<Frame>,
}

impl GstPipeline {
    fn connect(url: &str) -> Result<Self> {
        gst::init().map_err(|e| NvrError::GStreamer(format!("gst::init: {e}")))?;

        let (tx, rx) = mpsc::channel::<Frame>(4);

        let pipeline_str = build_pipeline_string(url);
        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| NvrError::GStreamer(format!("parse_launch: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| NvrError::GStreamer("not a pipeline".into()))?;

        let appsink: gst_app::AppSink = pipeline
            .by_name("sink")
            .ok_or_else(|| NvrError::GStreamer("appsink not found".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| NvrError::GStreamer("cast to AppSink failed".into()))?;

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Error)?;
                    let buf = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let caps = sample.caps().ok_or(gst::FlowError::Error)?;
                    let video_info = gstreamer_video::VideoInfo::from_caps(caps)
                        .map_err(|_| gst::FlowError::Error)?;
                    let map = buf.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let frame = Frame::new(video_info.width(), video_info.height(), map.as_slice().to_vec());
                    let _ = tx.try_send(frame);
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| NvrError::GStreamer(format!("set_state Playing: {e}")))?;

        Ok(GstPipeline { pipeline, rx })
    }

    fn stop(&self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Choose the source element by URL scheme: RTSP, HTTP(S), or the local
/// device sentinel, then decode and scale to the target resolution.
fn build_pipeline_string(url: &str) -> String {
    let source = if url == LOCAL_DEVICE_SENTINEL {
        "v4l2src device=/dev/video0".to_string()
    } else if url.starts_with("rtsp://") {
        format!("rtspsrc location={url} latency=200 protocols=tcp")
    } else {
        format!("souphttpsrc location={url}")
    };

    format!(
        "{source} ! decodebin ! videoconvert ! videoscale ! \
         video/x-raw,format=RGB,width={w},height={h} ! \
         appsink name=sink emit-signals=true max-buffers=1 drop=true sync=false",
        w = TARGET_WIDTH,
        h = TARGET_HEIGHT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_string_uses_local_device_for_sentinel() {
        let s = build_pipeline_string(LOCAL_DEVICE_SENTINEL);
        assert!(s.contains("v4l2src"));
    }

    #[test]
    fn pipeline_string_uses_rtspsrc_for_rtsp_urls() {
        let s = build_pipeline_string("rtsp://10.0.0.2/s1");
        assert!(s.contains("rtspsrc"));
        assert!(s.contains("10.0.0.2"));
    }

    #[test]
    fn pipeline_string_uses_httpsrc_for_http_urls() {
        let s = build_pipeline_string("http://10.0.0.3/video");
        assert!(s.contains("souphttpsrc"));
    }
}
