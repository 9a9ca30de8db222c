// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The Detector Manager: reconciler that converges the set of running
//! Detector Workers to the desired set declared by the config store.
//! Owns the Camera Stream Manager. Prefer this idempotent
//! converge-to-desired-state function over imperative start/stop
//! endpoints — every mutation that matters ends by calling `reconcile`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ConfigStore;
use crate::detector::DetectorWorker;
use crate::predictor::PredictorLoader;
use crate::stream_manager::CameraStreamManager;
use crate::telemetry::GlobalState;

const DETECTOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-worker snapshot returned by `get_status`, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorStatus {
    pub detector_id: u64,
    pub running: bool,
    pub tracking: bool,
    pub fps: f64,
    pub inference_time_ms: f64,
    pub detections: usize,
}

pub struct DetectorManager {
    config: Arc<ConfigStore>,
    stream_manager: Arc<CameraStreamManager>,
    global: Arc<GlobalState>,
    loader: Arc<dyn PredictorLoader>,
    // Manager lock guards this map; ordering rule: manager-lock ->
    // registry-lock, never the reverse.
    workers: Mutex<HashMap<u64, Arc<DetectorWorker>>>,
}

impl DetectorManager {
    pub fn new(
        config: Arc<ConfigStore>,
        stream_manager: Arc<CameraStreamManager>,
        global: Arc<GlobalState>,
        loader: Arc<dyn PredictorLoader>,
    ) -> Self {
        Self {
            config,
            stream_manager,
            global,
            loader,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn stream_manager(&self) -> &Arc<CameraStreamManager> {
        &self.stream_manager
    }

    pub fn global(&self) -> &Arc<GlobalState> {
        &self.global
    }

    /// Converge running workers to the desired set, applying a short-lived
    /// tracking override map supplied by the HTTP layer (or tests). This
    /// method is idempotent: calling it twice with the same desired state
    /// and the same overrides produces the same running set with no
    /// restarts (L2).
    pub async fn reconcile(&self, tracking_overrides: HashMap<u64, bool>) {
        let desired = self.config.list_detectors(true);
        let desired_ids: HashSet<u64> = desired.iter().map(|d| d.id).collect();

        let running_ids: Vec<u64> = self.workers.lock().keys().cloned().collect();

        // Stop every worker in R - D.
        for id in running_ids.iter().filter(|id| !desired_ids.contains(id)) {
            self.stop_worker(*id).await;
        }

        for detector_cfg in desired {
            let id = detector_cfg.id;
            let current_tracking = self.workers.lock().get(&id).map(|w| w.tracking);
            let want_tracking = tracking_overrides
                .get(&id)
                .copied()
                .unwrap_or_else(|| current_tracking.unwrap_or(false));

            match current_tracking {
                Some(current) if current == want_tracking => {
                    // Already running with the right mode: leave it.
                }
                Some(_) => {
                    // Tracking mode changed: restart.
                    self.stop_worker(id).await;
                    self.start_worker(id, want_tracking).await;
                }
                None => {
                    self.start_worker(id, want_tracking).await;
                }
            }
        }
    }

    async fn start_worker(&self, detector_id: u64, tracking: bool) {
        let Some(detector_cfg) = self.config.get_detector(detector_id) else {
            return;
        };
        let Some(camera) = self.config.get_camera(detector_cfg.camera_id) else {
            warn!(detector_id, "rejected: camera missing");
            return;
        };
        if !camera.enabled {
            warn!(detector_id, "rejected: camera disabled");
            return;
        }
        let Some(model) = self.config.get_model(detector_cfg.model_id) else {
            warn!(detector_id, "rejected: model missing");
            return;
        };
        if model.blob.is_empty() {
            warn!(detector_id, "rejected: model blob empty");
            return;
        }

        match DetectorWorker::spawn(
            detector_id,
            camera.url,
            model.name,
            model.blob,
            tracking,
            self.stream_manager.clone(),
            self.config.clone(),
            self.global.clone(),
            self.loader.clone(),
        )
        .await
        {
            Ok(worker) => {
                self.workers.lock().insert(detector_id, worker);
                info!(detector_id, tracking, "detector worker started");
            }
            Err(e) => {
                warn!(detector_id, error = %e, "rejected: no capture worker obtainable or model load failed");
            }
        }
    }

    /// Remove the worker from the map first, then stop + join — the
    /// worker is considered gone the moment it's removed, so subsequent
    /// reconciles treat it as absent even if the join times out.
    async fn stop_worker(&self, detector_id: u64) {
        let worker = self.workers.lock().remove(&detector_id);
        if let Some(worker) = worker {
            worker.stop();
            worker.join(DETECTOR_JOIN_TIMEOUT).await;
        }
    }

    /// Stop every worker, then the Camera Stream Manager, then clear the
    /// global annotated-frame and telemetry state.
    pub async fn stop_all(&self) {
        let ids: Vec<u64> = self.workers.lock().keys().cloned().collect();
        for id in ids {
            self.stop_worker(id).await;
        }
        self.stream_manager.stop_all().await;
        self.global.clear_all();
    }

    pub fn get_status(&self) -> Vec<DetectorStatus> {
        let workers = self.workers.lock();
        workers
            .values()
            .map(|w| {
                let telemetry = self.global.get_telemetry(w.detector_id);
                DetectorStatus {
                    detector_id: w.detector_id,
                    running: true,
                    tracking: w.tracking,
                    fps: telemetry.fps,
                    inference_time_ms: telemetry.inference_time_ms,
                    detections: telemetry.detections,
                }
            })
            .collect()
    }

    pub fn is_running(&self, detector_id: u64) -> bool {
        self.workers.lock().contains_key(&detector_id)
    }

    pub fn running_count(&self) -> usize {
        self.workers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraRecord, DetectorRecord, ModelRecord};
    use crate::predictor::TestPredictorLoader;

    fn manager_with_empty_config() -> DetectorManager {
        let config = Arc::new(ConfigStore::empty());
        let stream_manager = Arc::new(CameraStreamManager::new(config.clone()));
        let global = Arc::new(GlobalState::new());
        let loader: Arc<dyn PredictorLoader> = Arc::new(TestPredictorLoader {
            fixed_detections: vec![],
        });
        DetectorManager::new(config, stream_manager, global, loader)
    }

    #[tokio::test]
    async fn reconcile_on_empty_config_is_a_noop() {
        let manager = manager_with_empty_config();
        manager.reconcile(HashMap::new()).await;
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn reconcile_rejects_detector_with_disabled_camera() {
        let manager = manager_with_empty_config();
        manager.config.upsert_camera(CameraRecord {
            id: 1,
            location: "front".into(),
            url: "rtsp://10.0.0.2/s1".into(),
            enabled: false,
            kind: "rtsp".into(),
        });
        manager.config.upsert_model(ModelRecord {
            id: 1,
            name: "people".into(),
            blob: bytes::Bytes::from_static(b"weights"),
            original_filename: "m.bin".into(),
        });
        manager.config.upsert_detector(DetectorRecord {
            id: 1,
            camera_id: 1,
            model_id: 1,
            running: true,
            tracking: false,
        });
        manager.reconcile(HashMap::new()).await;
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn reconcile_rejects_detector_with_empty_model_blob() {
        let manager = manager_with_empty_config();
        manager.config.upsert_camera(CameraRecord {
            id: 1,
            location: "front".into(),
            url: "rtsp://10.0.0.2/s1".into(),
            enabled: true,
            kind: "rtsp".into(),
        });
        manager.config.upsert_model(ModelRecord {
            id: 1,
            name: "people".into(),
            blob: bytes::Bytes::new(),
            original_filename: "m.bin".into(),
        });
        manager.config.upsert_detector(DetectorRecord {
            id: 1,
            camera_id: 1,
            model_id: 1,
            running: true,
            tracking: false,
        });
        manager.reconcile(HashMap::new()).await;
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn stop_all_on_empty_manager_yields_empty_registries() {
        let manager = manager_with_empty_config();
        manager.stop_all().await;
        assert_eq!(manager.running_count(), 0);
        assert_eq!(manager.stream_manager.worker_count(), 0);
    }
}
