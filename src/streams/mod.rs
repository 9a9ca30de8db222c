// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Stream adaptors: read-only consumers of the core's published frames.
//! Neither module owns worker lifecycle — they borrow a Capture Worker
//! (raw CCTV passthrough) or read from a Detector Worker's published slot
//! (annotated feed / WebRTC).

pub mod mjpeg;
pub mod webrtc;
