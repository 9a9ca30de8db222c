// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The in-memory configuration store. The real document/CRUD surface (forms,
//! templates, authentication) is out of scope; this module only gives the
//! core something real to read through the query surface described in the
//! design notes, seeded from a TOML file at startup and otherwise mutable
//! via the bare setters below.

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{NvrError, Result};

/// A camera record. `url` is the stream URL the Capture Worker connects to;
/// `enabled` gates whether any detector or CCTV viewer may use it.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraRecord {
    pub id: u64,
    pub location: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub kind: String,
}

/// A model record. `blob` is the opaque predictor weight file. `name`,
/// compared case-insensitively and trimmed, enables the pretrained
/// person-only filter when it equals `"pretrained"`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRecord {
    pub id: u64,
    pub name: String,
    #[serde(default, with = "blob_as_vec")]
    pub blob: Bytes,
    #[serde(default)]
    pub original_filename: String,
}

mod blob_as_vec {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v: Vec<u8> = Vec::deserialize(deserializer)?;
        Ok(Bytes::from(v))
    }
}

impl ModelRecord {
    /// True when this model's name, trimmed and lower-cased, is `"pretrained"`.
    pub fn is_pretrained(&self) -> bool {
        self.name.trim().eq_ignore_ascii_case("pretrained")
    }
}

/// A detector record pairing one camera with one model.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorRecord {
    pub id: u64,
    pub camera_id: u64,
    pub model_id: u64,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub tracking: bool,
}

fn default_true() -> bool {
    true
}

/// Top-level TOML document used to seed the store.
#[derive(Debug, Deserialize)]
struct SeedDocument {
    #[serde(default)]
    api: ApiConfig,
    #[serde(default)]
    cameras: Vec<CameraRecord>,
    #[serde(default)]
    models: Vec<ModelRecord>,
    #[serde(default)]
    detectors: Vec<DetectorRecord>,
}

/// HTTP bind configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Reconciliation interval, in milliseconds, for the background tick
    /// that converges the Detector Manager to the config store's desired set.
    #[serde(default = "default_reconcile_ms")]
    pub reconcile_interval_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            reconcile_interval_ms: default_reconcile_ms(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_reconcile_ms() -> u64 {
    2000
}

struct StoreInner {
    cameras: HashMap<u64, CameraRecord>,
    models: HashMap<u64, ModelRecord>,
    detectors: HashMap<u64, DetectorRecord>,
}

/// In-memory stand-in for the persisted configuration database. The core
/// only ever reads through the query-surface methods below; the setters
/// exist for the CRUD layer (out of scope) and for tests to seed state.
pub struct ConfigStore {
    api: ApiConfig,
    inner: RwLock<StoreInner>,
}

impl ConfigStore {
    pub fn empty() -> Self {
        Self {
            api: ApiConfig::default(),
            inner: RwLock::new(StoreInner {
                cameras: HashMap::new(),
                models: HashMap::new(),
                detectors: HashMap::new(),
            }),
        }
    }

    /// Load a seed document from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NvrError::Config(format!("cannot read config file: {e}")))?;
        let doc: SeedDocument = toml::from_str(&content)
            .map_err(|e| NvrError::Config(format!("invalid TOML: {e}")))?;

        let mut cameras = HashMap::new();
        for c in doc.cameras {
            cameras.insert(c.id, c);
        }
        let mut models = HashMap::new();
        for m in doc.models {
            models.insert(m.id, m);
        }
        let mut detectors = HashMap::new();
        for d in doc.detectors {
            detectors.insert(d.id, d);
        }

        Ok(Self {
            api: doc.api,
            inner: RwLock::new(StoreInner {
                cameras,
                models,
                detectors,
            }),
        })
    }

    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    // --- Query surface (§6) ---

    pub fn list_detectors(&self, running_only: bool) -> Vec<DetectorRecord> {
        self.inner
            .read()
            .detectors
            .values()
            .filter(|d| !running_only || d.running)
            .cloned()
            .collect()
    }

    pub fn get_detector(&self, id: u64) -> Option<DetectorRecord> {
        self.inner.read().detectors.get(&id).cloned()
    }

    pub fn get_camera(&self, id: u64) -> Option<CameraRecord> {
        self.inner.read().cameras.get(&id).cloned()
    }

    pub fn get_camera_by_url(&self, url: &str) -> Option<CameraRecord> {
        self.inner
            .read()
            .cameras
            .values()
            .find(|c| c.url == url)
            .cloned()
    }

    pub fn get_model(&self, id: u64) -> Option<ModelRecord> {
        self.inner.read().models.get(&id).cloned()
    }

    pub fn list_cameras(&self) -> Vec<CameraRecord> {
        self.inner.read().cameras.values().cloned().collect()
    }

    pub fn list_models(&self) -> Vec<ModelRecord> {
        self.inner.read().models.values().cloned().collect()
    }

    // --- Bare mutators (the real CRUD surface is out of scope) ---

    pub fn upsert_camera(&self, camera: CameraRecord) {
        self.inner.write().cameras.insert(camera.id, camera);
    }

    pub fn upsert_model(&self, model: ModelRecord) {
        self.inner.write().models.insert(model.id, model);
    }

    pub fn upsert_detector(&self, detector: DetectorRecord) {
        self.inner.write().detectors.insert(detector.id, detector);
    }

    pub fn remove_camera(&self, id: u64) {
        self.inner.write().cameras.remove(&id);
    }

    pub fn remove_model(&self, id: u64) {
        self.inner.write().models.remove(&id);
    }

    pub fn remove_detector(&self, id: u64) {
        self.inner.write().detectors.remove(&id);
    }

    pub fn set_detector_running(&self, id: u64, running: bool) {
        if let Some(d) = self.inner.write().detectors.get_mut(&id) {
            d.running = running;
        }
    }

    pub fn set_camera_enabled(&self, id: u64, enabled: bool) {
        if let Some(c) = self.inner.write().cameras.get_mut(&id) {
            c.enabled = enabled;
        }
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::empty()
    }
}
