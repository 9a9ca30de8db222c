// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NvrError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("GStreamer error: {0}")]
    GStreamer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture '{url}' connection failed: {reason}")]
    CaptureConnection { url: String, reason: String },

    #[error("camera '{id}' not found or disabled")]
    CameraUnavailable { id: String },

    #[error("configuration inconsistency: {0}")]
    ConfigInconsistency(String),

    #[error("predictor error: {0}")]
    Predictor(String),

    #[error("signalling error: {0}")]
    Signalling(String),

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NvrError>;
