// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The Detector Worker: one predictor bound to one consumer subscription
//! to a Capture Worker, running the inference loop described in the
//! component design and publishing annotated frames + telemetry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigStore;
use crate::error::Result;
use crate::predictor::{apply_pretrained_filter, strip_track_ids, PredictorLoader};
use crate::stream_manager::CameraStreamManager;
use crate::telemetry::{FpsCalculator, GlobalState, InferenceTimer, Telemetry};
use crate::tracker::ByteTrackLite;
use crate::{render, NvrError};

const RECHECK_EVERY_N_ITERATIONS: u64 = 30;
const NO_CAPTURE_RETRY: Duration = Duration::from_secs(1);
const NO_FRAME_RETRY: Duration = Duration::from_millis(100);
const LOOP_CADENCE: Duration = Duration::from_millis(33);
const FRAME_TIME_BUDGET: Duration = Duration::from_millis(1000 / 15);

fn consumer_id_for(detector_id: u64) -> String {
    format!("detector_{detector_id}")
}

/// A handle to a running Detector Worker task, owned by the Detector
/// Manager's worker map.
pub struct DetectorWorker {
    pub detector_id: u64,
    pub tracking: bool,
    stop_flag: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DetectorWorker {
    /// Load the model blob, bind to the Capture Worker for `camera_url`,
    /// and spawn the inference loop. Returns `Err` (the worker never enters
    /// the main loop) if the model fails to load.
    pub async fn spawn(
        detector_id: u64,
        camera_url: String,
        model_name: String,
        model_blob: bytes::Bytes,
        tracking: bool,
        stream_manager: Arc<CameraStreamManager>,
        config: Arc<ConfigStore>,
        global: Arc<GlobalState>,
        loader: Arc<dyn PredictorLoader>,
    ) -> Result<Arc<DetectorWorker>> {
        let consumer_id = consumer_id_for(detector_id);

        // Init: register as a consumer before anything else so cleanup can
        // always find and release it.
        let capture = stream_manager
            .get_stream(&camera_url, &consumer_id)
            .await
            .ok_or_else(|| NvrError::ConfigInconsistency(format!("no capture worker for {camera_url}")))?;

        // Model load: write the blob to a temp file with a
        // predictor-appropriate suffix, hand the path to the loader.
        let suffix = loader.blob_suffix();
        let temp_file = match tempfile::Builder::new().suffix(suffix).tempfile() {
            Ok(f) => f,
            Err(e) => {
                stream_manager.release_stream(&camera_url, &consumer_id);
                return Err(e.into());
            }
        };
        if let Err(e) = std::fs::write(temp_file.path(), &model_blob) {
            stream_manager.release_stream(&camera_url, &consumer_id);
            return Err(e.into());
        }
        let predictor = match loader.load_from_path(temp_file.path()) {
            Ok(p) => p,
            Err(e) => {
                stream_manager.release_stream(&camera_url, &consumer_id);
                warn!(detector_id, error = %e, "model load failed, worker not started");
                return Err(e);
            }
        };

        global.register(detector_id);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let worker = Arc::new(DetectorWorker {
            detector_id,
            tracking,
            stop_flag: stop_flag.clone(),
            task: tokio::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(run_loop(RunContext {
            detector_id,
            camera_url,
            consumer_id,
            tracking,
            model_name,
            predictor,
            _temp_file: temp_file,
            stream_manager,
            config,
            global,
            stop_flag,
        }));
        *worker.task.lock().await = Some(handle);
        Ok(worker)
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub async fn join(&self, timeout: Duration) {
        let handle = self.task.lock().await.take();
        let Some(handle) = handle else { return };
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(detector_id = self.detector_id, error = %e, "detector task panicked"),
            Err(_) => warn!(detector_id = self.detector_id, ?timeout, "detector task did not exit within timeout"),
        }
    }
}

struct RunContext {
    detector_id: u64,
    camera_url: String,
    consumer_id: String,
    tracking: bool,
    model_name: String,
    predictor: Box<dyn crate::predictor::Predictor>,
    // Held only to keep the temp file alive until cleanup; never read.
    _temp_file: tempfile::NamedTempFile,
    stream_manager: Arc<CameraStreamManager>,
    config: Arc<ConfigStore>,
    global: Arc<GlobalState>,
    stop_flag: Arc<AtomicBool>,
}

async fn run_loop(mut ctx: RunContext) {
    let mut fps_calc = FpsCalculator::new();
    let mut inference_timer = InferenceTimer::new();
    let mut tracker = ByteTrackLite::new();
    let mut skip_next = false;
    let mut iteration: u64 = 0;

    'outer: loop {
        if ctx.stop_flag.load(Ordering::SeqCst) {
            break;
        }

        if iteration % RECHECK_EVERY_N_ITERATIONS == 0 {
            let detector_cfg = ctx.config.get_detector(ctx.detector_id);
            let active = match &detector_cfg {
                Some(d) if d.running => ctx
                    .config
                    .get_camera(d.camera_id)
                    .map(|c| c.enabled)
                    .unwrap_or(false),
                _ => false,
            };
            if !active {
                debug!(detector_id = ctx.detector_id, "detector or camera inactive, stopping");
                break;
            }
        }

        let capture = ctx.stream_manager.get_stream(&ctx.camera_url, &ctx.consumer_id).await;
        let capture = match capture {
            Some(c) if c.is_healthy() => c,
            _ => {
                tokio::time::sleep(NO_CAPTURE_RETRY).await;
                iteration += 1;
                continue 'outer;
            }
        };

        let frame = match capture.get_frame() {
            Some(f) => f,
            None => {
                tokio::time::sleep(NO_FRAME_RETRY).await;
                iteration += 1;
                continue 'outer;
            }
        };

        if skip_next {
            skip_next = false;
            tokio::time::sleep(LOOP_CADENCE).await;
            iteration += 1;
            continue 'outer;
        }

        let inference_start = Instant::now();
        let detections = ctx.predictor.predict(&frame, ctx.tracking);
        let elapsed = inference_start.elapsed();

        match detections {
            Ok(mut dets) => {
                if ctx.tracking {
                    tracker.update(&mut dets);
                } else {
                    strip_track_ids(&mut dets);
                }
                let dets = apply_pretrained_filter(&ctx.model_name, dets);

                let annotated = render::render_annotated(&frame, &dets);

                fps_calc.record(Instant::now());
                inference_timer.record(elapsed);

                ctx.global.publish_frame(ctx.detector_id, annotated);
                ctx.global.publish_telemetry(
                    ctx.detector_id,
                    Telemetry {
                        fps: fps_calc.fps(),
                        inference_time_ms: inference_timer.mean_ms(),
                        detections: dets.len(),
                        last_seen: Instant::now(),
                        last_update: chrono::Utc::now(),
                    },
                );
            }
            Err(e) => {
                warn!(detector_id = ctx.detector_id, error = %e, "inference error, skipping frame");
            }
        }

        if elapsed > FRAME_TIME_BUDGET {
            skip_next = true;
        }

        tokio::time::sleep(LOOP_CADENCE).await;
        iteration += 1;
    }

    // Cleanup: release the consumer, drop the temp blob (happens
    // automatically when `_temp_file` is dropped), clear this worker's
    // global-state entries.
    ctx.stream_manager.release_stream(&ctx.camera_url, &ctx.consumer_id);
    ctx.global.unregister(ctx.detector_id);
    info!(detector_id = ctx.detector_id, "detector worker exited");
}
