//! churnserve - churn prediction serving with versioned models and canary routing.
//!
//! Trained models are registered as versions with an `active`, `canary` or
//! `deprecated` status. The serving process loads the active and canary
//! artifacts, splits single-request traffic between them, and stores every
//! prediction.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Access Layer: HTTP API (axum) | CLI (clap)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Services: Prediction | Metrics | Health                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serving Core: Model Handle | Canary Router | Transformer    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Lifecycle: Registry | Training Pipeline | Artifact Stores   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Persistence: versions | metrics | predictions               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use churnserve::config::ChurnConfig;
//!
//! #[tokio::main]
//! async fn main() -> churnserve::Result<()> {
//!     let config = ChurnConfig::development();
//!     churnserve::run(config).await
//! }
//! ```

pub mod api;
pub mod cli;
pub mod compute;
pub mod config;
pub mod error;
pub mod health;
pub mod observability;
pub mod service;
pub mod store;
pub mod types;

// Re-exports
pub use error::{ChurnError, Result};
pub use types::*;

use compute::{
    tracking_store_from_uri, ArtifactLoader, ArtifactStore, CanaryRouter, LocalModelStore,
    ModelHandle, ModelRegistry, TrainingPipeline,
};
use config::ChurnConfig;
use health::HealthChecker;
use service::{MetricsService, PredictionService};
use std::sync::Arc;
use store::Database;
use tracing::info;

/// Wired components shared by the server and the CLI commands.
#[derive(Clone)]
pub struct App {
    pub config: ChurnConfig,
    pub db: Database,
    pub registry: ModelRegistry,
    pub tracking: Arc<dyn ArtifactStore>,
    pub local: LocalModelStore,
    pub models: Arc<ModelHandle>,
}

impl App {
    /// Opens storage and loads the current models. Missing artifacts leave
    /// the app in degraded mode rather than failing.
    pub async fn open(config: ChurnConfig) -> Result<Self> {
        config.validate()?;

        let db = Database::connect(config.storage.database_dir.as_deref()).await?;
        let registry = ModelRegistry::new(db.clone());
        let tracking = tracking_store_from_uri(&config.tracking.uri, &config.tracking.experiment_name)?;
        let local = LocalModelStore::new(&config.storage.model_registry_path);

        let loader = ArtifactLoader::new(tracking.clone(), local.clone());
        let models = Arc::new(ModelHandle::load(registry.clone(), loader).await);

        info!(
            tracking = %tracking.location(),
            models = %local.dir().display(),
            "Application initialized"
        );

        Ok(Self {
            config,
            db,
            registry,
            tracking,
            local,
            models,
        })
    }

    pub fn training_pipeline(&self) -> TrainingPipeline {
        TrainingPipeline::new(
            self.registry.clone(),
            self.tracking.clone(),
            self.local.clone(),
            self.config.training.clone(),
        )
    }

    pub fn prediction_service(&self) -> PredictionService {
        let router = match self.config.serving.router_seed {
            Some(seed) => CanaryRouter::seeded(seed),
            None => CanaryRouter::from_entropy(),
        };
        PredictionService::new(self.models.clone(), Arc::new(router), self.db.clone())
            .with_persistence(self.config.serving.persist_predictions)
    }

    pub fn metrics_service(&self) -> MetricsService {
        MetricsService::new(self.registry.clone())
    }

    pub fn health_checker(&self) -> HealthChecker {
        HealthChecker::new(self.db.clone(), self.tracking.clone(), self.models.clone())
    }
}

/// Run the HTTP server with the given configuration.
pub async fn run(config: ChurnConfig) -> Result<()> {
    info!(addr = %config.server.bind_addr, "Starting churnserve");

    let metrics = if config.observability.metrics_enabled {
        Some(observability::install_metrics_recorder()?)
    } else {
        None
    };

    let app = App::open(config).await?;
    api::serve(app, metrics).await
}
