// Loaded model snapshot and reload handle

use super::artifact::{ArtifactLoader, ModelArtifact};
use super::registry::ModelRegistry;
use crate::error::{ChurnError, Result};
use crate::observability;
use crate::types::{ModelStatus, ModelVersion};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A registered version together with its loaded artifact.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub version: ModelVersion,
    pub artifact: Arc<ModelArtifact>,
}

impl LoadedModel {
    pub fn version(&self) -> &str {
        &self.version.version
    }

    pub fn traffic_percent(&self) -> u8 {
        self.version.traffic_percent
    }

    /// Scores an encoded feature vector with this model's classifier.
    pub fn predict(&self, feature_vector: &[f64]) -> Result<(u8, f64)> {
        self.artifact.predict_vector(feature_vector)
    }
}

/// Summary of what is currently being served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub active_version: Option<String>,
    pub canary_version: Option<String>,
    pub has_active: bool,
    pub has_canary: bool,
    pub canary_traffic_percent: u8,
}

/// Immutable snapshot of the active and canary models.
///
/// A manager never changes after construction. Reloading builds a new
/// manager and swaps it into the [`ModelHandle`].
#[derive(Debug, Default)]
pub struct ModelManager {
    active: Option<LoadedModel>,
    canary: Option<LoadedModel>,
}

impl ModelManager {
    /// Loads the registry's active and canary versions.
    ///
    /// A version whose artifact cannot be loaded from either store leaves its
    /// slot empty. Construction succeeds even with no models loaded.
    pub async fn load(registry: &ModelRegistry, loader: &ArtifactLoader) -> Self {
        let active = match registry.get_active().await {
            Some(version) => Self::load_slot(version, loader).await,
            None => {
                warn!("No active model version registered");
                None
            }
        };

        let canary = match registry.get_canary().await {
            Some(version) => Self::load_slot(version, loader).await,
            None => None,
        };

        let manager = Self { active, canary };
        let info = manager.get_info();
        observability::update_model_gauges(
            info.has_active,
            info.has_canary,
            info.canary_traffic_percent,
        );

        if manager.is_degraded() {
            warn!("Serving in degraded mode: no model loaded");
        } else {
            info!(
                active = ?info.active_version,
                canary = ?info.canary_version,
                canary_traffic_percent = info.canary_traffic_percent,
                "Model manager loaded"
            );
        }

        manager
    }

    async fn load_slot(version: ModelVersion, loader: &ArtifactLoader) -> Option<LoadedModel> {
        match loader.load(&version).await {
            Ok(artifact) => Some(LoadedModel {
                version,
                artifact: Arc::new(artifact),
            }),
            Err(e) => {
                warn!(version = %version.version, error = %e, "Failed to load model artifact");
                None
            }
        }
    }

    /// Builds a manager from already loaded artifacts.
    pub fn from_parts(active: Option<LoadedModel>, canary: Option<LoadedModel>) -> Result<Self> {
        if let Some(model) = &active {
            if model.version.status != ModelStatus::Active {
                return Err(ChurnError::InvalidArgument(format!(
                    "{} is {}, not active",
                    model.version(),
                    model.version.status
                )));
            }
        }
        if let Some(model) = &canary {
            if model.version.status != ModelStatus::Canary {
                return Err(ChurnError::InvalidArgument(format!(
                    "{} is {}, not canary",
                    model.version(),
                    model.version.status
                )));
            }
        }
        Ok(Self { active, canary })
    }

    /// An empty manager.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&LoadedModel> {
        self.active.as_ref()
    }

    pub fn canary(&self) -> Option<&LoadedModel> {
        self.canary.as_ref()
    }

    /// True when nothing can serve.
    pub fn is_degraded(&self) -> bool {
        self.active.is_none() && self.canary.is_none()
    }

    /// The canary when requested and loaded, otherwise the active model.
    pub fn select(&self, use_canary: bool) -> Result<&LoadedModel> {
        if use_canary {
            if let Some(canary) = &self.canary {
                return Ok(canary);
            }
        }
        self.active.as_ref().ok_or(ChurnError::NoModelLoaded)
    }

    /// Scores a feature vector on the selected slot. Probability at or above
    /// 0.5 yields 1.
    pub fn predict(&self, feature_vector: &[f64], use_canary: bool) -> Result<(u8, f64)> {
        self.select(use_canary)?.predict(feature_vector)
    }

    pub fn get_info(&self) -> ModelInfo {
        ModelInfo {
            active_version: self.active.as_ref().map(|m| m.version().to_string()),
            canary_version: self.canary.as_ref().map(|m| m.version().to_string()),
            has_active: self.active.is_some(),
            has_canary: self.canary.is_some(),
            canary_traffic_percent: self.canary.as_ref().map_or(0, |m| m.traffic_percent()),
        }
    }
}

/// Shared, atomically swappable reference to the current [`ModelManager`].
///
/// Readers clone the inner `Arc` and keep using it for the whole request;
/// a concurrent reload never changes a snapshot that is already in use.
pub struct ModelHandle {
    current: RwLock<Arc<ModelManager>>,
    registry: ModelRegistry,
    loader: ArtifactLoader,
}

impl ModelHandle {
    /// Loads the initial snapshot.
    pub async fn load(registry: ModelRegistry, loader: ArtifactLoader) -> Self {
        let manager = ModelManager::load(&registry, &loader).await;
        Self {
            current: RwLock::new(Arc::new(manager)),
            registry,
            loader,
        }
    }

    /// The snapshot to use for one request.
    pub fn current(&self) -> Arc<ModelManager> {
        self.current.read().clone()
    }

    /// Rebuilds the snapshot from the registry and swaps it in.
    pub async fn reload(&self) -> ModelInfo {
        let manager = Arc::new(ModelManager::load(&self.registry, &self.loader).await);
        let info = manager.get_info();
        *self.current.write() = manager;
        observability::record_reload();
        info
    }

    /// Replaces the snapshot directly.
    pub fn swap(&self, manager: ModelManager) -> Arc<ModelManager> {
        std::mem::replace(&mut *self.current.write(), Arc::new(manager))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &ArtifactLoader {
        &self.loader
    }
}
