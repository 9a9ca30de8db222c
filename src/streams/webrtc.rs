// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The WebRTC track adaptor (`§4.5.3`): a per-detector peer connection
//! carrying one video track whose samples are the detector's published
//! annotated frames. Adaptation decision (see `DESIGN.md`): the spec's
//! aiortc-style "decoded frame, PTS = elapsed*90000" contract is realised
//! here as one JPEG-encoded image per `Sample`, since the `webrtc` crate's
//! `TrackLocalStaticSample` is RTP-sample oriented rather than raw-frame
//! oriented.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{NvrError, Result};
use crate::frame::Frame;
use crate::telemetry::GlobalState;

const MAX_TRACK_WIDTH: u32 = 640;
const MAX_TRACK_HEIGHT: u32 = 480;
const PLACEHOLDER_WIDTH: u32 = 320;
const PLACEHOLDER_HEIGHT: u32 = 240;
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1000 / 30);
const RTP_TIME_BASE: u32 = 90_000;
const JPEG_QUALITY: u8 = 80;

/// One peer connection + its single video track, per connected detector.
struct DetectorPeer {
    peer_connection: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
}

/// Owns every live WebRTC peer connection, one per detector id. Frames are
/// pushed on demand by `push_latest_frame`, called from a per-peer polling
/// task spawned alongside the peer connection.
pub struct WebRtcManager {
    global: Arc<GlobalState>,
    peers: AsyncMutex<HashMap<u64, Arc<DetectorPeer>>>,
}

impl WebRtcManager {
    pub fn new(global: Arc<GlobalState>) -> Self {
        Self {
            global,
            peers: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Handle an SDP offer for `detector_id`: build (or reuse) the peer
    /// connection, add the video track, set remote/local descriptions, and
    /// return the rewritten answer.
    pub async fn handle_offer(&self, detector_id: u64, offer_sdp: String) -> Result<String> {
        let peer = self.get_or_create_peer(detector_id).await?;

        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| NvrError::Signalling(format!("invalid offer SDP: {e}")))?;
        peer.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| NvrError::WebRtc(format!("set_remote_description failed: {e}")))?;

        let answer = peer
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| NvrError::WebRtc(format!("create_answer failed: {e}")))?;

        let mut gather_complete = peer.peer_connection.gathering_complete_promise().await;
        peer.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| NvrError::WebRtc(format!("set_local_description failed: {e}")))?;
        let _ = gather_complete.recv().await;

        let local_desc = peer
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| NvrError::WebRtc("no local description after gathering".into()))?;

        Ok(rewrite_sdp_for_low_latency(&local_desc.sdp))
    }

    async fn get_or_create_peer(&self, detector_id: u64) -> Result<Arc<DetectorPeer>> {
        if let Some(peer) = self.peers.lock().await.get(&detector_id) {
            return Ok(peer.clone());
        }

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| NvrError::WebRtc(format!("register_default_codecs failed: {e}")))?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| NvrError::WebRtc(format!("register_default_interceptors failed: {e}")))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_owned()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let peer_connection = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| NvrError::WebRtc(format!("new_peer_connection failed: {e}")))?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "image/jpeg".to_owned(),
                ..Default::default()
            },
            format!("detector_{detector_id}_video"),
            format!("detector_{detector_id}_stream"),
        ));

        peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| NvrError::WebRtc(format!("add_track failed: {e}")))?;

        let peer = Arc::new(DetectorPeer {
            peer_connection,
            track,
        });
        self.peers.lock().await.insert(detector_id, peer.clone());
        self.spawn_frame_pump(detector_id, peer.clone());
        Ok(peer)
    }

    /// Spawn the background task that pushes the detector's latest published
    /// frame into the track at the enforced cadence, per `§4.5.3`.
    fn spawn_frame_pump(&self, detector_id: u64, peer: Arc<DetectorPeer>) {
        let global = self.global.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            loop {
                let loop_start = Instant::now();
                if let Err(e) = push_latest_frame(detector_id, &global, &peer.track, start).await {
                    warn!(detector_id, error = %e, "webrtc frame push failed");
                    break;
                }
                let elapsed = loop_start.elapsed();
                if elapsed < MIN_FRAME_INTERVAL {
                    tokio::time::sleep(MIN_FRAME_INTERVAL - elapsed).await;
                }
            }
        });
    }

    /// Drop the peer connection for a detector, e.g. on detector stop.
    pub async fn remove_peer(&self, detector_id: u64) {
        if let Some(peer) = self.peers.lock().await.remove(&detector_id) {
            if let Err(e) = peer.peer_connection.close().await {
                warn!(detector_id, error = %e, "error closing peer connection");
            }
            info!(detector_id, "webrtc peer connection removed");
        }
    }
}

/// Resize-to-fit or substitute a placeholder, encode as JPEG, and write one
/// `Sample` with PTS derived from `elapsed * 90000 / 90000` (i.e. elapsed
/// time itself, expressed against the `1/90000` time-base named by the
/// spec).
async fn push_latest_frame(
    detector_id: u64,
    global: &GlobalState,
    track: &TrackLocalStaticSample,
    start: Instant,
) -> Result<()> {
    let frame = global
        .get_frame(detector_id)
        .map(|f| f.resize_to_fit(MAX_TRACK_WIDTH, MAX_TRACK_HEIGHT))
        .unwrap_or_else(|| Frame::black(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT));

    let jpeg = frame.encode_jpeg(JPEG_QUALITY)?;
    let elapsed = start.elapsed();
    let pts = (elapsed.as_secs_f64() * RTP_TIME_BASE as f64) as u64;
    let sample = Sample {
        data: jpeg.into(),
        duration: MIN_FRAME_INTERVAL,
        timestamp: std::time::SystemTime::now(),
        packet_timestamp: pts as u32,
        ..Default::default()
    };
    track
        .write_sample(&sample)
        .await
        .map_err(|e| NvrError::WebRtc(format!("write_sample failed: {e}")))
}

/// Rewrite the answer SDP to request low-latency RTCP feedback, per
/// `§4.5.3`: `nack`, `pli`, `goog-remb`, `transport-cc` on the video m-line.
fn rewrite_sdp_for_low_latency(sdp: &str) -> String {
    let mut out = String::with_capacity(sdp.len() + 256);
    let mut in_video_section = false;
    for line in sdp.lines() {
        if line.starts_with("m=video") {
            in_video_section = true;
        } else if line.starts_with("m=") {
            in_video_section = false;
        }
        out.push_str(line);
        out.push_str("\r\n");
        if in_video_section && line.starts_with("a=rtpmap:") {
            if let Some(payload_type) = line.strip_prefix("a=rtpmap:").and_then(|s| s.split_whitespace().next()) {
                for feedback in ["nack", "nack pli", "goog-remb", "transport-cc"] {
                    out.push_str(&format!("a=rtcp-fb:{payload_type} {feedback}\r\n"));
                }
            }
        }
    }
    out
}

/// Extracts the `a=detector_id:<n>` line the spec uses to route an
/// incoming offer to a peer connection, per `§4.5.3`/`§4.5.4`.
pub fn extract_detector_id(offer_sdp: &str) -> Option<u64> {
    offer_sdp
        .lines()
        .find_map(|line| line.strip_prefix("a=detector_id:"))
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_detector_id_parses_attribute_line() {
        let sdp = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\na=detector_id:42\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";
        assert_eq!(extract_detector_id(sdp), Some(42));
    }

    #[test]
    fn extract_detector_id_absent_returns_none() {
        let sdp = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";
        assert_eq!(extract_detector_id(sdp), None);
    }

    #[test]
    fn rewrite_sdp_adds_feedback_lines_only_in_video_section() {
        let sdp = "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\n";
        let rewritten = rewrite_sdp_for_low_latency(sdp);
        assert!(!rewritten.contains("a=rtcp-fb:111"));
        assert!(rewritten.contains("a=rtcp-fb:96 nack"));
        assert!(rewritten.contains("a=rtcp-fb:96 goog-remb"));
        assert!(rewritten.contains("a=rtcp-fb:96 transport-cc"));
    }
}
