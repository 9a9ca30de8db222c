// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The process-wide annotated-frame and telemetry maps. Re-architected per
//! the design notes from the original's module-level dictionaries into a
//! state object owned by the Detector Manager: concurrent, single-writer
//! per key (the owning Detector Worker), many readers, with a per-key lock
//! rather than a single global one so readers of detector A never contend
//! with writes for detector B.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::frame::{Frame, FrameSlot};

/// A 30-sample sliding window FPS calculator.
#[derive(Default)]
pub struct FpsCalculator {
    timestamps: std::collections::VecDeque<Instant>,
}

const FPS_WINDOW: usize = 30;

impl FpsCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, at: Instant) {
        self.timestamps.push_back(at);
        while self.timestamps.len() > FPS_WINDOW {
            self.timestamps.pop_front();
        }
    }

    /// `(samples - 1) / (latest - oldest)` when at least 2 samples exist,
    /// else 0.
    pub fn fps(&self) -> f64 {
        if self.timestamps.len() < 2 {
            return 0.0;
        }
        let oldest = *self.timestamps.front().unwrap();
        let latest = *self.timestamps.back().unwrap();
        let elapsed = latest.duration_since(oldest).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.timestamps.len() - 1) as f64 / elapsed
    }
}

/// Moving average of the last 30 inference durations.
#[derive(Default)]
pub struct InferenceTimer {
    samples: std::collections::VecDeque<Duration>,
}

impl InferenceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, d: Duration) {
        self.samples.push_back(d);
        while self.samples.len() > FPS_WINDOW {
            self.samples.pop_front();
        }
    }

    pub fn mean_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: Duration = self.samples.iter().sum();
        total.as_secs_f64() * 1000.0 / self.samples.len() as f64
    }
}

/// A snapshot of one detector's telemetry, as exposed over HTTP. `last_seen`
/// is the monotonic clock used for the staleness check (`§6`'s 5s window)
/// and is never serialized; `last_update` is the wall-clock timestamp
/// published in the JSON response.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Telemetry {
    pub fps: f64,
    #[serde(rename = "inference_time")]
    pub inference_time_ms: f64,
    pub detections: usize,
    #[serde(skip)]
    pub last_seen: Instant,
    pub last_update: DateTime<Utc>,
}

impl Telemetry {
    fn zero_now() -> Self {
        Self {
            fps: 0.0,
            inference_time_ms: 0.0,
            detections: 0,
            last_seen: Instant::now(),
            last_update: Utc::now(),
        }
    }
}

/// Staleness window past which `fps_info` reports zeros instead of the last
/// known value.
const STALE_AFTER: Duration = Duration::from_secs(5);

/// Process-wide published state: the annotated-frame slot and telemetry
/// slot per detector id. Writers are always the owning Detector Worker, so
/// per-key writes are naturally serialised (I4); the outer map only needs a
/// lock for insertion/removal of a detector's entry, not for the slot
/// contents themselves.
#[derive(Default)]
pub struct GlobalState {
    annotated: RwLock<HashMap<u64, FrameSlot>>,
    telemetry: RwLock<HashMap<u64, RwLock<Telemetry>>>,
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once by a Detector Worker on startup; creates its slots.
    pub fn register(&self, detector_id: u64) {
        self.annotated.write().insert(detector_id, FrameSlot::new());
        self.telemetry
            .write()
            .insert(detector_id, RwLock::new(Telemetry::zero_now()));
    }

    /// Called by the Detector Worker's cleanup step; satisfies P5 (no
    /// entry remains once the worker is gone).
    pub fn unregister(&self, detector_id: u64) {
        self.annotated.write().remove(&detector_id);
        self.telemetry.write().remove(&detector_id);
    }

    pub fn publish_frame(&self, detector_id: u64, frame: Frame) {
        if let Some(slot) = self.annotated.read().get(&detector_id) {
            slot.set(frame);
        }
    }

    pub fn get_frame(&self, detector_id: u64) -> Option<Frame> {
        self.annotated.read().get(&detector_id)?.get()
    }

    pub fn publish_telemetry(&self, detector_id: u64, telemetry: Telemetry) {
        if let Some(slot) = self.telemetry.read().get(&detector_id) {
            *slot.write() = telemetry;
        }
    }

    /// Returns the detector's telemetry, replaced with zeros + now if the
    /// last update is older than the staleness window.
    pub fn get_telemetry(&self, detector_id: u64) -> Telemetry {
        match self.telemetry.read().get(&detector_id) {
            Some(slot) => {
                let t = *slot.read();
                if t.last_seen.elapsed() > STALE_AFTER {
                    Telemetry::zero_now()
                } else {
                    t
                }
            }
            None => Telemetry::zero_now(),
        }
    }

    /// Clears every published frame and telemetry entry, used by
    /// `DetectorManager::stop_all`.
    pub fn clear_all(&self) {
        self.annotated.write().clear();
        self.telemetry.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_zero_with_fewer_than_two_samples() {
        let mut calc = FpsCalculator::new();
        assert_eq!(calc.fps(), 0.0);
        calc.record(Instant::now());
        assert_eq!(calc.fps(), 0.0);
    }

    #[test]
    fn fps_window_caps_at_30_samples() {
        let mut calc = FpsCalculator::new();
        let base = Instant::now();
        for i in 0..40u64 {
            calc.record(base + Duration::from_millis(i * 33));
        }
        assert!(calc.timestamps.len() <= FPS_WINDOW);
    }

    #[test]
    fn global_state_register_unregister_clears_entry() {
        let state = GlobalState::new();
        state.register(1);
        state.publish_frame(1, Frame::black(4, 4));
        assert!(state.get_frame(1).is_some());
        state.unregister(1);
        assert!(state.get_frame(1).is_none());
    }

    #[test]
    fn telemetry_reports_zero_when_stale() {
        let state = GlobalState::new();
        state.register(1);
        let mut stale = Telemetry::zero_now();
        stale.last_seen = Instant::now() - Duration::from_secs(10);
        stale.fps = 30.0;
        state.publish_telemetry(1, stale);
        let read = state.get_telemetry(1);
        assert_eq!(read.fps, 0.0);
    }
}
