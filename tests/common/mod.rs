//! Common test utilities for integration tests.

use churnserve::compute::{ArtifactLoader, FileTrackingStore, LocalModelStore, SyntheticGenerator};
use churnserve::config::ChurnConfig;
use churnserve::types::{LabeledRecord, ModelType};
use churnserve::App;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Test environment rooted in a temporary directory.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config: ChurnConfig,
}

impl TestEnv {
    /// In-memory database; artifacts and tracking runs under the temp dir.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = ChurnConfig::ephemeral(temp_dir.path());
        config.training.n_estimators = Some(10);
        config.observability.metrics_enabled = false;
        config.serving.router_seed = Some(7);
        Self { temp_dir, config }
    }

    /// Same as [`TestEnv::new`] with a file-backed database.
    pub fn persistent() -> Self {
        let mut env = Self::new();
        env.config.storage.database_dir = Some(env.temp_dir.path().join("db"));
        env
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub async fn app(&self) -> App {
        App::open(self.config.clone()).await.expect("Failed to open app")
    }

    /// Loader over this environment's stores.
    pub fn loader(&self) -> ArtifactLoader {
        ArtifactLoader::new(
            Arc::new(FileTrackingStore::new(
                self.path("mlruns"),
                &self.config.tracking.experiment_name,
            )),
            LocalModelStore::new(&self.config.storage.model_registry_path),
        )
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn training_rows(n: usize, seed: u64) -> Vec<LabeledRecord> {
    SyntheticGenerator::new(seed).generate(n)
}

/// Trains and registers a version, returning its id.
pub async fn train_version(app: &App, model_type: ModelType) -> String {
    app.training_pipeline()
        .train(training_rows(200, 42), model_type)
        .await
        .expect("training failed")
        .version
        .version
}
