// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The frame type shared by capture, detection, and streaming. A `Frame`
//! always carries packed RGB8 pixels plus the wall-clock instant it was
//! captured or produced, so downstream consumers can compute freshness
//! without re-deriving it from a slot's write time.

use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageBuffer, Rgb, RgbImage};

use crate::error::{NvrError, Result};

/// A single decoded RGB8 frame.
#[derive(Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8, row-major, no padding: `3 * width * height` bytes.
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Self {
            width,
            height,
            data,
            captured_at: Instant::now(),
        }
    }

    /// A solid black placeholder frame, used by the WebRTC track and MJPEG
    /// generators when no real frame has been published yet.
    pub fn black(width: u32, height: u32) -> Self {
        Self::new(width, height, vec![0u8; (width * height * 3) as usize])
    }

    pub fn to_image(&self) -> Option<RgbImage> {
        ImageBuffer::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn from_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self::new(width, height, img.into_raw())
    }

    /// Resize in place to at most `max_w x max_h`, preserving aspect ratio.
    /// No-op if the frame already fits.
    pub fn resize_to_fit(&self, max_w: u32, max_h: u32) -> Frame {
        if self.width <= max_w && self.height <= max_h {
            return self.clone();
        }
        let img = match self.to_image() {
            Some(img) => img,
            None => return self.clone(),
        };
        let resized = image::imageops::resize(&img, max_w.min(self.width), max_h.min(self.height), FilterType::Lanczos3);
        Frame::from_image(resized)
    }

    /// Encode as a JPEG byte buffer at the given quality (1-100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder
            .encode(&self.data, self.width, self.height, image::ExtendedColorType::Rgb8)
            .map_err(|e| NvrError::Predictor(format!("jpeg encode failed: {e}")))?;
        Ok(buf)
    }
}

/// A single-cell store holding only the most recently written frame,
/// satisfying I5 (most-recent-wins, no queue accumulation). Cheap to clone
/// the handle; the lock guards only the `Option<Frame>` payload.
#[derive(Clone, Default)]
pub struct FrameSlot(std::sync::Arc<parking_lot::Mutex<Option<Frame>>>);

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, frame: Frame) {
        *self.0.lock() = Some(frame);
    }

    pub fn get(&self) -> Option<Frame> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_slot_most_recent_wins() {
        let slot = FrameSlot::new();
        assert!(slot.get().is_none());
        slot.set(Frame::black(4, 4));
        let f = slot.get().expect("frame present");
        assert_eq!((f.width, f.height), (4, 4));
        slot.set(Frame::new(2, 2, vec![255u8; 12]));
        let f2 = slot.get().expect("frame present");
        assert_eq!((f2.width, f2.height), (2, 2));
    }

    #[test]
    fn encode_jpeg_roundtrip_decodes() {
        let frame = Frame::black(8, 8);
        let bytes = frame.encode_jpeg(80).expect("encode");
        let decoded = image::load_from_memory(&bytes).expect("decode").to_rgb8();
        assert_eq!(decoded.dimensions(), (8, 8));
    }
}
