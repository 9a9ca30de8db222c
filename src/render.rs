// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Annotation rendering: bounding boxes, confidence labels, and timestamp
//! overlays, grounded in `rknn-inference`'s `draw_detections` example
//! helper (imageproc + ab_glyph).

use ab_glyph::{FontArc, PxScale};
use chrono::Utc;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::sync::OnceLock;

use crate::frame::Frame;
use crate::predictor::Detection;

const LINE_WIDTH: u32 = 2;
const FONT_SIZE: f32 = 12.0;

/// Well-known DejaVu Sans install locations on the platforms this service
/// targets; label rendering degrades to boxes-only if none are present.
const FONT_SEARCH_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

fn font() -> Option<&'static FontArc> {
    static FONT: OnceLock<Option<FontArc>> = OnceLock::new();
    FONT.get_or_init(|| {
        for path in FONT_SEARCH_PATHS {
            if let Ok(bytes) = std::fs::read(path) {
                if let Ok(font) = FontArc::try_from_vec(bytes) {
                    return Some(font);
                }
            }
        }
        None
    })
    .as_ref()
}

/// Class-indexed colour palette, cycling through a small fixed set so
/// distinct classes are visually distinguishable.
fn class_color(class_id: i32) -> image::Rgb<u8> {
    const PALETTE: [[u8; 3]; 8] = [
        [255, 56, 56],
        [255, 157, 151],
        [255, 112, 31],
        [255, 178, 29],
        [207, 210, 49],
        [72, 249, 10],
        [46, 204, 113],
        [26, 147, 255],
    ];
    let idx = (class_id.rem_euclid(PALETTE.len() as i32)) as usize;
    image::Rgb(PALETTE[idx])
}

/// Render bounding boxes, confidence labels, and the wall-clock timestamp
/// onto a copy of `frame`, per the inference loop's rendering step.
pub fn render_annotated(frame: &Frame, detections: &[Detection]) -> Frame {
    let Some(mut img) = frame.to_image() else {
        return frame.clone();
    };
    let font = font();
    let scale = PxScale::from(FONT_SIZE);

    for det in detections {
        let color = class_color(det.class_id);
        let x = det.x1.max(0.0) as i32;
        let y = det.y1.max(0.0) as i32;
        let w = det.width().max(1.0) as u32;
        let h = det.height().max(1.0) as u32;
        for offset in 0..LINE_WIDTH {
            let grown = Rect::at(x - offset as i32, y - offset as i32)
                .of_size(w + offset * 2, h + offset * 2);
            draw_hollow_rect_mut(&mut img, grown, color);
        }

        if let Some(font) = font {
            let label = match det.track_id {
                Some(id) => format!("#{} {}: {:.0}%", id, det.class_id, det.confidence * 100.0),
                None => format!("{}: {:.0}%", det.class_id, det.confidence * 100.0),
            };
            draw_text_mut(&mut img, color, x, (y - FONT_SIZE as i32).max(0), scale, font, &label);
        }
    }

    if let Some(font) = font {
        let timestamp = Utc::now().format("%H:%M:%S%.3f").to_string();
        let h = img.dimensions().1;
        draw_text_mut(
            &mut img,
            image::Rgb([255, 255, 255]),
            4,
            (h as i32 - FONT_SIZE as i32 - 4).max(0),
            scale,
            font,
            &timestamp,
        );
    }

    Frame::from_image(img)
}

/// Overlay a client-side `C:` timestamp for latency diagnostics on the
/// annotated detector feed, per the MJPEG annotated-feed contract.
pub fn overlay_client_timestamp(frame: &Frame) -> Frame {
    let Some(mut img) = frame.to_image() else {
        return frame.clone();
    };
    if let Some(font) = font() {
        let scale = PxScale::from(FONT_SIZE);
        let timestamp = format!("C:{}", Utc::now().format("%H:%M:%S%.3f"));
        draw_text_mut(&mut img, image::Rgb([0, 255, 255]), 4, 4, scale, font, &timestamp);
    }
    Frame::from_image(img)
}
