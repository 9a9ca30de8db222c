// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! A minimal IoU-based multi-object tracker, assigning persistent track ids
//! across frames when tracking mode is enabled. This is in-scope core
//! logic (the inference loop's tracking/mode-toggle behaviour is part of
//! the spec), unlike the predictor's detection math, which is a black box.

use crate::predictor::Detection;

const MAX_MISSES: u32 = 5;
const IOU_MATCH_THRESHOLD: f32 = 0.3;

struct Track {
    id: u64,
    last_box: (f32, f32, f32, f32),
    misses: u32,
}

/// Greedy IoU-association tracker, ByteTrack-style in spirit: match each new
/// detection to the closest unmatched previous track by IoU, confirm a
/// fresh id for anything unmatched, and age out tracks unseen too long.
pub struct ByteTrackLite {
    tracks: Vec<Track>,
    next_id: u64,
}

impl Default for ByteTrackLite {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteTrackLite {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Assign track ids in place and age out stale tracks.
    pub fn update(&mut self, detections: &mut [Detection]) {
        let mut used = vec![false; self.tracks.len()];

        for det in detections.iter_mut() {
            let det_box = (det.x1, det.y1, det.x2, det.y2);
            let mut best: Option<(usize, f32)> = None;
            for (i, track) in self.tracks.iter().enumerate() {
                if used[i] {
                    continue;
                }
                let iou = iou(det_box, track.last_box);
                if iou >= IOU_MATCH_THRESHOLD && best.map(|(_, b)| iou > b).unwrap_or(true) {
                    best = Some((i, iou));
                }
            }

            match best {
                Some((i, _)) => {
                    used[i] = true;
                    self.tracks[i].last_box = det_box;
                    self.tracks[i].misses = 0;
                    det.track_id = Some(self.tracks[i].id);
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        last_box: det_box,
                        misses: 0,
                    });
                    used.push(true);
                    det.track_id = Some(id);
                }
            }
        }

        for (i, track) in self.tracks.iter_mut().enumerate() {
            if !used.get(i).copied().unwrap_or(false) {
                track.misses += 1;
            }
        }
        self.tracks.retain(|t| t.misses <= MAX_MISSES);
    }
}

fn iou(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> f32 {
    let (ax1, ay1, ax2, ay2) = a;
    let (bx1, by1, bx2, by2) = b;
    let ix1 = ax1.max(bx1);
    let iy1 = ay1.max(by1);
    let ix2 = ax2.min(bx2);
    let iy2 = ay2.min(by2);
    let iw = (ix2 - ix1).max(0.0);
    let ih = (iy2 - iy1).max(0.0);
    let inter = iw * ih;
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (ax2 - ax1).max(0.0) * (ay2 - ay1).max(0.0);
    let area_b = (bx2 - bx1).max(0.0) * (by2 - by1).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
            class_id: 0,
            track_id: None,
        }
    }

    #[test]
    fn same_box_across_frames_keeps_same_id() {
        let mut tracker = ByteTrackLite::new();
        let mut frame1 = vec![det(0.0, 0.0, 10.0, 10.0)];
        tracker.update(&mut frame1);
        let id1 = frame1[0].track_id.expect("assigned");

        let mut frame2 = vec![det(1.0, 1.0, 11.0, 11.0)];
        tracker.update(&mut frame2);
        assert_eq!(frame2[0].track_id, Some(id1));
    }

    #[test]
    fn disjoint_boxes_get_distinct_ids() {
        let mut tracker = ByteTrackLite::new();
        let mut frame = vec![det(0.0, 0.0, 10.0, 10.0), det(100.0, 100.0, 110.0, 110.0)];
        tracker.update(&mut frame);
        assert_ne!(frame[0].track_id, frame[1].track_id);
    }

    #[test]
    fn track_expires_after_max_misses() {
        let mut tracker = ByteTrackLite::new();
        let mut frame1 = vec![det(0.0, 0.0, 10.0, 10.0)];
        tracker.update(&mut frame1);
        let id1 = frame1[0].track_id.unwrap();

        for _ in 0..MAX_MISSES + 1 {
            tracker.update(&mut []);
        }
        let mut frame_again = vec![det(0.0, 0.0, 10.0, 10.0)];
        tracker.update(&mut frame_again);
        assert_ne!(frame_again[0].track_id, Some(id1));
    }
}
