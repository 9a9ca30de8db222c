// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The loopback WebRTC signalling transport (`§4.5.4`, `§9`): a TCP listener
//! on `127.0.0.1:9999` carrying length-prefixed SDP offer/answer JSON.
//! Business logic lives in `WebRtcManager`; this module is a thin framing
//! shim so the `POST /detector/webrtc_offer/<id>` HTTP handler can reach the
//! same manager in-process without going through the socket at all.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::streams::webrtc::{extract_detector_id, WebRtcManager};

pub const SIGNALING_ADDR: &str = "127.0.0.1:9999";
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct OfferMessage {
    sdp: String,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    sdp_type: String,
}

#[derive(Debug, Serialize)]
struct AnswerMessage {
    sdp: String,
    #[serde(rename = "type")]
    sdp_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorMessage {
    error: String,
}

/// Bind and serve the signalling listener until the process exits. Each
/// connection carries exactly one offer/answer exchange.
pub async fn serve(manager: Arc<WebRtcManager>) -> std::io::Result<()> {
    let listener = TcpListener::bind(SIGNALING_ADDR).await?;
    info!(addr = SIGNALING_ADDR, "webrtc signalling listener started");
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, manager).await {
                warn!(%peer_addr, error = %e, "signalling connection error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, manager: Arc<WebRtcManager>) -> std::io::Result<()> {
    let payload = read_frame(&mut stream).await?;
    let offer: OfferMessage = match serde_json::from_slice(&payload) {
        Ok(o) => o,
        Err(e) => {
            return write_error(&mut stream, format!("invalid offer JSON: {e}")).await;
        }
    };

    let Some(detector_id) = extract_detector_id(&offer.sdp) else {
        return write_error(&mut stream, "offer missing a=detector_id attribute".to_owned()).await;
    };

    match manager.handle_offer(detector_id, offer.sdp).await {
        Ok(answer_sdp) => {
            let answer = AnswerMessage {
                sdp: answer_sdp,
                sdp_type: "answer",
            };
            write_frame(&mut stream, &serde_json::to_vec(&answer)?).await
        }
        Err(e) => write_error(&mut stream, e.to_string()).await,
    }
}

async fn write_error(stream: &mut TcpStream, message: String) -> std::io::Result<()> {
    let body = serde_json::to_vec(&ErrorMessage { error: message })?;
    write_frame(stream, &body).await
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = BigEndian::read_u32(&len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "signalling frame too large"));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

async fn write_frame(stream: &mut TcpStream, body: &[u8]) -> std::io::Result<()> {
    let mut len_buf = [0u8; 4];
    BigEndian::write_u32(&mut len_buf, body.len() as u32);
    stream.write_all(&len_buf).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_message_deserializes_type_field() {
        let json = r#"{"sdp":"v=0\r\n","type":"offer"}"#;
        let msg: OfferMessage = serde_json::from_str(json).expect("parses");
        assert_eq!(msg.sdp_type, "offer");
    }

    #[test]
    fn answer_message_serializes_expected_shape() {
        let answer = AnswerMessage {
            sdp: "v=0\r\n".to_owned(),
            sdp_type: "answer",
        };
        let json = serde_json::to_string(&answer).expect("serializes");
        assert!(json.contains("\"type\":\"answer\""));
    }
}
