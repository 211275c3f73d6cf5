// Model artifacts and the stores that hold them

use super::features::FeatureTransformer;
use super::model::{Classifier, ClassifierParams};
use crate::error::{ChurnError, Result};
use crate::types::{LabeledRecord, ModelType, ModelVersion};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default connection timeout for tracking store requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for tracking store requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Artifact metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// When the classifier was fitted
    pub created_at: DateTime<Utc>,
    /// Rows used for fitting
    pub training_rows: usize,
    /// Hyperparameters used for fitting
    pub params: ClassifierParams,
    /// Held-out metrics, filled in after evaluation
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

/// A trained classifier bundled with the transformer it was fitted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub model_type: ModelType,
    pub transformer: FeatureTransformer,
    pub classifier: Classifier,
    pub metadata: ArtifactMetadata,
}

impl ModelArtifact {
    /// Fits a transformer and classifier on labelled rows.
    pub fn fit(
        version: impl Into<String>,
        model_type: ModelType,
        rows: &[LabeledRecord],
        params: &ClassifierParams,
    ) -> Result<Self> {
        let mut transformer = FeatureTransformer::new();
        transformer.fit_labeled(rows)?;

        let frame: Vec<_> = rows.iter().map(|r| r.features.clone()).collect();
        let x = transformer.transform_batch(&frame)?;
        let y: Vec<bool> = rows.iter().map(|r| r.churn).collect();
        let classifier = Classifier::fit(model_type, &x, &y, params)?;

        Ok(Self {
            version: version.into(),
            model_type,
            transformer,
            classifier,
            metadata: ArtifactMetadata {
                created_at: Utc::now(),
                training_rows: rows.len(),
                params: params.clone(),
                metrics: HashMap::new(),
            },
        })
    }

    /// Scores an already encoded feature vector.
    pub fn predict_vector(&self, vector: &[f64]) -> Result<(u8, f64)> {
        self.classifier.predict(vector)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Experiment-tracking artifact store addressed by run id.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persists an artifact under a fresh run id and returns it.
    async fn save(&self, artifact: &ModelArtifact) -> Result<String>;

    /// Loads the artifact stored under `artifact_ref`.
    async fn load(&self, artifact_ref: &str) -> Result<ModelArtifact>;

    /// Human-readable location for logs and health output.
    fn location(&self) -> String;

    /// Checks whether the store is reachable.
    async fn ping(&self) -> bool;
}

fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Run summary written next to each artifact by [`FileTrackingStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub version: String,
    pub model_type: ModelType,
    pub created_at: DateTime<Utc>,
    pub metrics: HashMap<String, f64>,
}

/// Tracking store served over HTTP.
///
/// Artifacts live at `{base_url}/api/artifacts/{experiment}/{run_id}`.
#[derive(Clone)]
pub struct HttpTrackingStore {
    base_url: String,
    experiment: String,
    client: Client,
}

impl HttpTrackingStore {
    pub fn new(base_url: &str, experiment: &str) -> Self {
        Self::with_timeouts(
            base_url,
            experiment,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    pub fn with_timeouts(
        base_url: &str,
        experiment: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            experiment: experiment.to_string(),
            client,
        }
    }

    fn url(&self, run_id: &str) -> String {
        format!("{}/api/artifacts/{}/{}", self.base_url, self.experiment, run_id)
    }
}

#[async_trait]
impl ArtifactStore for HttpTrackingStore {
    async fn save(&self, artifact: &ModelArtifact) -> Result<String> {
        let run_id = new_run_id();
        let response = self
            .client
            .put(self.url(&run_id))
            .json(artifact)
            .send()
            .await
            .map_err(|e| ChurnError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChurnError::Network(format!(
                "tracking store rejected artifact {}: {}",
                artifact.version,
                response.status()
            )));
        }

        debug!(run_id = %run_id, version = %artifact.version, "Uploaded artifact");
        Ok(run_id)
    }

    async fn load(&self, artifact_ref: &str) -> Result<ModelArtifact> {
        let response = self
            .client
            .get(self.url(artifact_ref))
            .send()
            .await
            .map_err(|e| ChurnError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json::<ModelArtifact>()
                .await
                .map_err(|e| ChurnError::Serialization(e.to_string())),
            StatusCode::NOT_FOUND => Err(ChurnError::ArtifactLoad(format!(
                "run {} not found in tracking store",
                artifact_ref
            ))),
            status => Err(ChurnError::Network(format!(
                "tracking store returned {} for run {}",
                status, artifact_ref
            ))),
        }
    }

    fn location(&self) -> String {
        format!("{}/api/artifacts/{}", self.base_url, self.experiment)
    }

    async fn ping(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Directory-backed tracking store: `{root}/{experiment}/{run_id}/model.json`
/// plus a `meta.json` run summary.
#[derive(Debug, Clone)]
pub struct FileTrackingStore {
    root: PathBuf,
    experiment: String,
}

impl FileTrackingStore {
    pub fn new(root: impl Into<PathBuf>, experiment: &str) -> Self {
        Self {
            root: root.into(),
            experiment: experiment.to_string(),
        }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(&self.experiment).join(run_id)
    }

    /// Lists run summaries, newest first.
    pub async fn list_runs(&self) -> Result<Vec<RunMeta>> {
        let dir = self.root.join(&self.experiment);
        let mut runs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(runs),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let meta_path = entry.path().join("meta.json");
            if let Ok(bytes) = tokio::fs::read(&meta_path).await {
                runs.push(serde_json::from_slice::<RunMeta>(&bytes)?);
            }
        }

        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}

#[async_trait]
impl ArtifactStore for FileTrackingStore {
    async fn save(&self, artifact: &ModelArtifact) -> Result<String> {
        let run_id = new_run_id();
        let dir = self.run_dir(&run_id);
        tokio::fs::create_dir_all(&dir).await?;

        write_atomic(&dir.join("model.json"), &artifact.to_json()?).await?;

        let meta = RunMeta {
            run_id: run_id.clone(),
            version: artifact.version.clone(),
            model_type: artifact.model_type,
            created_at: artifact.metadata.created_at,
            metrics: artifact.metadata.metrics.clone(),
        };
        write_atomic(&dir.join("meta.json"), &serde_json::to_vec_pretty(&meta)?).await?;

        debug!(run_id = %run_id, dir = %dir.display(), "Stored artifact run");
        Ok(run_id)
    }

    async fn load(&self, artifact_ref: &str) -> Result<ModelArtifact> {
        if artifact_ref.is_empty() || artifact_ref.contains(['/', '\\']) || artifact_ref == ".." {
            return Err(ChurnError::ArtifactLoad(format!(
                "invalid run id {:?}",
                artifact_ref
            )));
        }

        let path = self.run_dir(artifact_ref).join("model.json");
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            ChurnError::ArtifactLoad(format!("{}: {}", path.display(), e))
        })?;
        ModelArtifact::from_json(&bytes)
    }

    fn location(&self) -> String {
        self.root.join(&self.experiment).display().to_string()
    }

    async fn ping(&self) -> bool {
        tokio::fs::create_dir_all(self.root.join(&self.experiment))
            .await
            .is_ok()
    }
}

/// Builds the tracking store for a URI: `http(s)://` selects the HTTP store,
/// `file://` or a bare path selects the directory store.
pub fn tracking_store_from_uri(uri: &str, experiment: &str) -> Result<Arc<dyn ArtifactStore>> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(ChurnError::Config("tracking URI is empty".into()));
    }

    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Arc::new(HttpTrackingStore::new(uri, experiment)));
    }

    let path = uri.strip_prefix("file://").unwrap_or(uri);
    if path.is_empty() {
        return Err(ChurnError::Config(format!("invalid tracking URI {:?}", uri)));
    }
    Ok(Arc::new(FileTrackingStore::new(path, experiment)))
}

/// Local fallback store keyed by version:
/// `{dir}/model_{version}.json`.
#[derive(Debug, Clone)]
pub struct LocalModelStore {
    dir: PathBuf,
}

impl LocalModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, version: &str) -> PathBuf {
        self.dir.join(format!("model_{}.json", version))
    }

    pub async fn save(&self, version: &str, artifact: &ModelArtifact) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(version);
        write_atomic(&path, &artifact.to_json()?).await?;
        debug!(version = %version, path = %path.display(), "Saved local artifact");
        Ok(path)
    }

    /// Loads a version's artifact; `None` when no file exists.
    pub async fn load(&self, version: &str) -> Result<Option<ModelArtifact>> {
        let path = self.path_for(version);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(ModelArtifact::from_json(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Loads artifacts from the tracking store, falling back to the local store.
#[derive(Clone)]
pub struct ArtifactLoader {
    tracking: Arc<dyn ArtifactStore>,
    local: LocalModelStore,
}

impl ArtifactLoader {
    pub fn new(tracking: Arc<dyn ArtifactStore>, local: LocalModelStore) -> Self {
        Self { tracking, local }
    }

    pub fn tracking(&self) -> &Arc<dyn ArtifactStore> {
        &self.tracking
    }

    pub fn local(&self) -> &LocalModelStore {
        &self.local
    }

    /// Loads the artifact of a registered version.
    pub async fn load(&self, version: &ModelVersion) -> Result<ModelArtifact> {
        let tracking_err = match self.tracking.load(&version.artifact_ref).await {
            Ok(artifact) => {
                info!(
                    version = %version.version,
                    run_id = %version.artifact_ref,
                    "Loaded model from tracking store"
                );
                return Ok(artifact);
            }
            Err(e) => e,
        };

        warn!(
            version = %version.version,
            error = %tracking_err,
            "Tracking store load failed, trying local fallback"
        );

        match self.local.load(&version.version).await {
            Ok(Some(artifact)) => {
                info!(version = %version.version, "Loaded model from local store");
                Ok(artifact)
            }
            Ok(None) => Err(ChurnError::ArtifactLoad(format!(
                "{}: tracking store: {}; local store: no file at {}",
                version.version,
                tracking_err,
                self.local.path_for(&version.version).display()
            ))),
            Err(local_err) => Err(ChurnError::ArtifactLoad(format!(
                "{}: tracking store: {}; local store: {}",
                version.version, tracking_err, local_err
            ))),
        }
    }
}
