// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The Camera Stream Manager: registry of Capture Workers keyed by stream
//! URL, with consumer reference counting and health-driven recycling.
//! Generalises the teacher's `RecordingManager` (`src/manager.rs`) registry
//! pattern — add the create-on-demand and recycle-on-unhealthy behaviour
//! grounded in `original_source/app/utils/cctv.py`'s `CameraStreamManager`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::camera::CaptureWorker;
use crate::config::ConfigStore;

const CAPTURE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const CAPTURE_JOIN_TIMEOUT_BULK: Duration = Duration::from_secs(10);

/// Registry of Capture Workers keyed by stream URL. Registry mutations take
/// the registry-wide lock; a worker's own state (frame slot, consumer set)
/// is guarded by the worker's lock, never the registry's — the registry
/// lock must never be held while reading a frame.
pub struct CameraStreamManager {
    config: Arc<ConfigStore>,
    workers: RwLock<HashMap<String, Arc<CaptureWorker>>>,
}

impl CameraStreamManager {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the camera in the config store; return none if missing or
    /// disabled. Create-on-demand, recycle-on-unhealthy.
    pub async fn get_stream(&self, url: &str, consumer_id: &str) -> Option<Arc<CaptureWorker>> {
        let camera = self.config.get_camera_by_url(url)?;
        if !camera.enabled {
            return None;
        }

        let existing = self.workers.read().get(url).cloned();
        match existing {
            Some(worker) if worker.is_alive() && worker.is_healthy() => {
                worker.add_consumer(consumer_id);
                Some(worker)
            }
            Some(stale) => {
                // Recycle: tear down, replace, carry existing consumer ids
                // across so they remain registered against the fresh
                // worker.
                let consumer_ids: Vec<String> = {
                    let guard = stale.consumer_ids();
                    guard
                };
                stale.stop();
                stale.join(CAPTURE_JOIN_TIMEOUT).await;

                let fresh = CaptureWorker::spawn(url.to_string());
                for id in consumer_ids {
                    fresh.add_consumer(id);
                }
                fresh.add_consumer(consumer_id);
                self.workers.write().insert(url.to_string(), fresh.clone());
                Some(fresh)
            }
            None => {
                let fresh = CaptureWorker::spawn(url.to_string());
                fresh.add_consumer(consumer_id);
                self.workers.write().insert(url.to_string(), fresh.clone());
                Some(fresh)
            }
        }
    }

    /// Remove the consumer; if the worker has exited on its own and has no
    /// consumers, drop it from the registry (I2: no orphan captures).
    pub fn release_stream(&self, url: &str, consumer_id: &str) {
        let worker = self.workers.read().get(url).cloned();
        if let Some(worker) = worker {
            worker.remove_consumer(consumer_id);
            if !worker.is_alive() && worker.consumer_count() == 0 {
                self.workers.write().remove(url);
            }
        }
    }

    /// Tear down any existing worker, sleep for OS-level handle release,
    /// then `get_stream`.
    pub async fn force_restart(&self, url: &str, consumer_id: &str) -> Option<Arc<CaptureWorker>> {
        if let Some(worker) = self.workers.write().remove(url) {
            worker.stop();
            worker.join(CAPTURE_JOIN_TIMEOUT).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.get_stream(url, consumer_id).await
    }

    /// Stop and remove every worker whose camera is disabled or deleted.
    pub async fn stop_inactive(&self) {
        let urls: Vec<String> = self.workers.read().keys().cloned().collect();
        for url in urls {
            let camera = self.config.get_camera_by_url(&url);
            let should_stop = match camera {
                Some(c) => !c.enabled,
                None => true,
            };
            if should_stop {
                if let Some(worker) = self.workers.write().remove(&url) {
                    worker.stop();
                    worker.join(CAPTURE_JOIN_TIMEOUT_BULK).await;
                    info!(url, "stopped inactive capture worker");
                }
            }
        }
    }

    /// Remove workers that are no longer alive or healthy.
    pub fn cleanup_dead(&self) {
        let dead: Vec<String> = self
            .workers
            .read()
            .iter()
            .filter(|(_, w)| !w.is_alive() || !w.is_healthy())
            .map(|(url, _)| url.clone())
            .collect();
        if !dead.is_empty() {
            let mut guard = self.workers.write();
            for url in dead {
                guard.remove(&url);
            }
        }
    }

    /// Stop every worker and clear the registry.
    pub async fn stop_all(&self) {
        let workers: Vec<(String, Arc<CaptureWorker>)> =
            self.workers.write().drain().collect();
        for (url, worker) in workers {
            worker.stop();
            worker.join(CAPTURE_JOIN_TIMEOUT_BULK).await;
            info!(url, "stopped capture worker");
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.read().len()
    }

    pub fn has_worker(&self, url: &str) -> bool {
        self.workers.read().contains_key(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraRecord;

    fn store_with_camera(url: &str, enabled: bool) -> Arc<ConfigStore> {
        let store = Arc::new(ConfigStore::empty());
        store.upsert_camera(CameraRecord {
            id: 1,
            location: "front".into(),
            url: url.to_string(),
            enabled,
            kind: "rtsp".into(),
        });
        store
    }

    #[tokio::test]
    async fn get_stream_returns_none_for_unknown_camera() {
        let store = Arc::new(ConfigStore::empty());
        let manager = CameraStreamManager::new(store);
        assert!(manager.get_stream("rtsp://nowhere", "c1").await.is_none());
    }

    #[tokio::test]
    async fn get_stream_returns_none_for_disabled_camera() {
        let store = store_with_camera("rtsp://10.0.0.2/s1", false);
        let manager = CameraStreamManager::new(store);
        assert!(manager.get_stream("rtsp://10.0.0.2/s1", "c1").await.is_none());
    }
}
