use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::config::DetectorSettings;
use crate::detect::result::DetectionResult;

use super::backend::DetectorBackend;
use super::backends::{CpuBackend, StubBackend};

/// A detector shared by every request handler.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub type SharedDetector = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
pub struct BackendRegistry {
    backends: HashMap<String, SharedDetector>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Build the registry described by `settings` and select its backend as default.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(CpuBackend::new());
        registry.register(StubBackend::new());

        #[cfg(feature = "backend-tract")]
        if let Some(model_path) = &settings.model_path {
            let backend = super::backends::TractBackend::new(model_path, settings.input_size)?
                .with_thresholds(settings.confidence_threshold, settings.iou_threshold);
            registry.register(backend);
        }

        registry.set_default(&settings.backend)?;
        Ok(registry)
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedDetector> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedDetector> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Default backend, warmed up and ready to hand to the server.
    pub fn prepare_default(&self) -> Result<SharedDetector> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            guard.warm_up()?;
            log::info!("detector backend '{}' ready", guard.name());
        }
        Ok(backend)
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `detector` on one frame, holding its lock only for the call.
pub fn run_detection(detector: &SharedDetector, frame: &RgbImage) -> Result<DetectionResult> {
    let mut guard = detector
        .lock()
        .map_err(|_| anyhow!("backend lock poisoned"))?;
    guard.detect(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        registry.register(CpuBackend::new());

        let backend = registry.default_backend().expect("default backend");
        assert_eq!(backend.lock().unwrap().name(), "stub");
        assert_eq!(registry.list(), vec!["cpu", "stub"]);
    }

    #[test]
    fn set_default_rejects_unknown_backend() {
        let mut registry = BackendRegistry::new();
        registry.register(CpuBackend::new());
        assert!(registry.set_default("tract").is_err());
    }

    #[test]
    fn from_settings_selects_configured_backend() -> Result<()> {
        let settings = DetectorSettings {
            backend: "stub".to_string(),
            ..DetectorSettings::default()
        };
        let registry = BackendRegistry::from_settings(&settings)?;
        let detector = registry.prepare_default()?;

        let result = run_detection(&detector, &RgbImage::new(40, 40))?;
        assert_eq!(result.len(), 1);
        Ok(())
    }
}
