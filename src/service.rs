//! Prediction and metrics services.
//!
//! [`PredictionService`] is the serving path: it takes one manager snapshot
//! per call, routes single requests between active and canary, encodes with
//! the chosen artifact's transformer and stores every prediction.
//! [`MetricsService`] answers model metric and version queries.

use crate::compute::dataset;
use crate::compute::{CanaryRouter, ModelHandle, ModelRegistry, Route};
use crate::error::{ChurnError, Result};
use crate::observability;
use crate::store::Database;
use crate::types::{CustomerFeatures, ModelVersion, Prediction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Single prediction request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub customer: CustomerFeatures,
}

/// Batch prediction request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictionRequest {
    pub customers: Vec<CustomerFeatures>,
}

/// Result for one customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub customer_id: String,
    pub prediction: u8,
    pub probability: f64,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
}

/// Results for a batch, all from the active model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPredictionResponse {
    pub predictions: Vec<PredictionResponse>,
    pub total: usize,
    pub model_version: String,
}

/// One row of the batch inference output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutputRow {
    pub customer_id: String,
    pub prediction: u8,
    pub probability: f64,
    pub model_version: String,
}

impl BatchOutputRow {
    pub const HEADER: [&'static str; 4] = ["customer_id", "prediction", "probability", "model_version"];
}

/// Service statistics
#[derive(Default)]
pub struct ServiceStats {
    /// Single predictions served
    pub single_requests: AtomicU64,
    /// Single predictions answered by the canary
    pub canary_requests: AtomicU64,
    /// Batch requests served
    pub batch_requests: AtomicU64,
    /// Rows scored in batches
    pub batch_rows: AtomicU64,
    /// Failed requests
    pub failed_requests: AtomicU64,
}

/// Statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatsSnapshot {
    pub single_requests: u64,
    pub canary_requests: u64,
    pub batch_requests: u64,
    pub batch_rows: u64,
    pub failed_requests: u64,
}

/// Online inference over the current model snapshot.
#[derive(Clone)]
pub struct PredictionService {
    models: Arc<ModelHandle>,
    router: Arc<CanaryRouter>,
    db: Database,
    persist: bool,
    stats: Arc<ServiceStats>,
}

impl PredictionService {
    pub fn new(models: Arc<ModelHandle>, router: Arc<CanaryRouter>, db: Database) -> Self {
        Self {
            models,
            router,
            db,
            persist: true,
            stats: Arc::new(ServiceStats::default()),
        }
    }

    /// Enables or disables prediction storage.
    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn models(&self) -> &Arc<ModelHandle> {
        &self.models
    }

    /// Scores one customer on the active or canary model.
    pub async fn predict_single(&self, customer: &CustomerFeatures) -> Result<PredictionResponse> {
        let result = self.predict_single_inner(customer).await;
        if let Err(e) = &result {
            self.record_failure(e);
        }
        result
    }

    async fn predict_single_inner(&self, customer: &CustomerFeatures) -> Result<PredictionResponse> {
        let start = Instant::now();
        customer.validate()?;

        let manager = self.models.current();
        let info = manager.get_info();
        let route = self.router.route(info.canary_traffic_percent, info.has_canary);
        let model = manager.select(route.is_canary())?;

        let vector = model.artifact.transformer.transform(&customer.to_record())?;
        let (prediction, probability) = model.predict(&vector)?;

        let response = PredictionResponse {
            customer_id: customer.customer_id.clone(),
            prediction,
            probability,
            model_version: model.version().to_string(),
            timestamp: Utc::now(),
        };

        if self.persist {
            let mut tx = self.db.begin().await?;
            tx.insert_prediction(to_row(customer, &response)?);
            tx.commit().await?;
        }

        self.stats.single_requests.fetch_add(1, Ordering::Relaxed);
        if route == Route::Canary {
            self.stats.canary_requests.fetch_add(1, Ordering::Relaxed);
        }
        observability::record_prediction(route.as_str(), start.elapsed());
        debug!(
            customer_id = %response.customer_id,
            model_version = %response.model_version,
            route = route.as_str(),
            probability,
            "Prediction served"
        );

        Ok(response)
    }

    /// Scores many customers on the active model. The canary is never used.
    pub async fn predict_batch(&self, customers: &[CustomerFeatures]) -> Result<BatchPredictionResponse> {
        let result = self.predict_batch_inner(customers).await;
        if let Err(e) = &result {
            self.record_failure(e);
        }
        result
    }

    async fn predict_batch_inner(&self, customers: &[CustomerFeatures]) -> Result<BatchPredictionResponse> {
        if customers.is_empty() {
            return Ok(BatchPredictionResponse {
                predictions: Vec::new(),
                total: 0,
                model_version: "unknown".to_string(),
            });
        }

        let start = Instant::now();
        for customer in customers {
            customer.validate()?;
        }

        let manager = self.models.current();
        let model = manager.select(false)?;

        let frame: Vec<_> = customers.iter().map(CustomerFeatures::to_record).collect();
        let vectors = model.artifact.transformer.transform_batch(&frame)?;

        let model_version = model.version().to_string();
        let timestamp = Utc::now();
        let mut predictions = Vec::with_capacity(customers.len());
        for (customer, vector) in customers.iter().zip(&vectors) {
            let (prediction, probability) = model.predict(vector)?;
            predictions.push(PredictionResponse {
                customer_id: customer.customer_id.clone(),
                prediction,
                probability,
                model_version: model_version.clone(),
                timestamp,
            });
        }

        if self.persist {
            let mut tx = self.db.begin().await?;
            for (customer, response) in customers.iter().zip(&predictions) {
                tx.insert_prediction(to_row(customer, response)?);
            }
            tx.commit().await?;
        }

        self.stats.batch_requests.fetch_add(1, Ordering::Relaxed);
        self.stats
            .batch_rows
            .fetch_add(predictions.len() as u64, Ordering::Relaxed);
        observability::record_prediction("batch", start.elapsed());

        Ok(BatchPredictionResponse {
            total: predictions.len(),
            predictions,
            model_version,
        })
    }

    /// Scores every customer in a CSV file with the active model and writes
    /// `customer_id,prediction,probability,model_version` rows to `output`.
    pub async fn predict_file(&self, input: &Path, output: &Path) -> Result<BatchPredictionResponse> {
        let path = input.to_path_buf();
        let customers = tokio::task::spawn_blocking(move || dataset::read_customers(&path))
            .await
            .map_err(|e| ChurnError::Internal(format!("read task failed: {}", e)))??;
        let response = self.predict_batch(&customers).await?;

        let rows: Vec<BatchOutputRow> = response
            .predictions
            .iter()
            .map(|p| BatchOutputRow {
                customer_id: p.customer_id.clone(),
                prediction: p.prediction,
                probability: p.probability,
                model_version: p.model_version.clone(),
            })
            .collect();
        let written = rows.len();
        let path = output.to_path_buf();
        tokio::task::spawn_blocking(move || dataset::write_rows(&path, &BatchOutputRow::HEADER, &rows))
            .await
            .map_err(|e| ChurnError::Internal(format!("write task failed: {}", e)))??;

        info!(
            input = %input.display(),
            output = %output.display(),
            rows = written,
            model_version = %response.model_version,
            "Batch inference written"
        );
        Ok(response)
    }

    fn record_failure(&self, error: &ChurnError) {
        self.stats.failed_requests.fetch_add(1, Ordering::Relaxed);
        let kind = match error {
            ChurnError::NoModelLoaded => "no_model",
            ChurnError::Validation(_)
            | ChurnError::MissingFeature(_)
            | ChurnError::InvalidFeature { .. } => "validation",
            _ => "internal",
        };
        observability::record_prediction_error(kind);
    }

    pub fn stats(&self) -> ServiceStatsSnapshot {
        ServiceStatsSnapshot {
            single_requests: self.stats.single_requests.load(Ordering::Relaxed),
            canary_requests: self.stats.canary_requests.load(Ordering::Relaxed),
            batch_requests: self.stats.batch_requests.load(Ordering::Relaxed),
            batch_rows: self.stats.batch_rows.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
        }
    }
}

fn to_row(customer: &CustomerFeatures, response: &PredictionResponse) -> Result<Prediction> {
    Ok(Prediction {
        id: 0,
        customer_id: response.customer_id.clone(),
        prediction: response.prediction,
        probability: response.probability,
        model_version: response.model_version.clone(),
        features: serde_json::to_value(customer)?,
        timestamp: response.timestamp,
        is_churn: None,
    })
}

/// Stored metrics for one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub model_version: String,
    pub metrics: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

/// Read-only queries over registered versions and their metrics.
#[derive(Clone)]
pub struct MetricsService {
    registry: ModelRegistry,
}

impl MetricsService {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    /// Metrics of `model_version`, or of the active version when `None`.
    pub async fn get_latest_metrics(&self, model_version: Option<&str>) -> Result<MetricsResponse> {
        let version = match model_version {
            Some(v) => v.to_string(),
            None => self
                .registry
                .get_active()
                .await
                .map(|v| v.version)
                .ok_or_else(|| ChurnError::VersionNotFound("no active model version".into()))?,
        };

        let metrics = self
            .registry
            .metrics_for(&version)
            .await?
            .into_iter()
            .map(|m| (m.metric_name, m.metric_value))
            .collect();

        Ok(MetricsResponse {
            model_version: version,
            metrics,
            timestamp: Utc::now(),
        })
    }

    /// Every version, newest first.
    pub async fn get_all_model_versions(&self) -> Vec<ModelVersion> {
        self.registry.list_all().await
    }

    pub async fn get_model_version(&self, version: &str) -> Result<ModelVersion> {
        self.registry.get(version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::artifact::{ArtifactLoader, FileTrackingStore, LocalModelStore, ModelArtifact};
    use crate::compute::model::ClassifierParams;
    use crate::compute::synthetic::SyntheticGenerator;
    use crate::types::ModelType;
    use std::collections::HashMap;

    struct Fixture {
        dir: tempfile::TempDir,
        registry: ModelRegistry,
        db: Database,
        handle: Arc<ModelHandle>,
    }

    async fn fixture(versions: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory();
        let registry = ModelRegistry::new(db.clone());
        let local = LocalModelStore::new(dir.path().join("models"));
        let rows = SyntheticGenerator::new(8).generate(120);
        let params = ClassifierParams {
            n_estimators: 5,
            ..ClassifierParams::for_model_type(ModelType::RandomForest)
        };

        for v in versions {
            let artifact = ModelArtifact::fit(*v, ModelType::RandomForest, &rows, &params).unwrap();
            local.save(v, &artifact).await.unwrap();
            registry
                .register(v, ModelType::RandomForest, "unused", &HashMap::from([("accuracy".to_string(), 0.7)]))
                .await
                .unwrap();
        }

        let loader = ArtifactLoader::new(
            Arc::new(FileTrackingStore::new(dir.path().join("mlruns"), "exp")),
            local,
        );
        let handle = Arc::new(ModelHandle::load(registry.clone(), loader).await);
        Fixture {
            dir,
            registry,
            db,
            handle,
        }
    }

    fn service(f: &Fixture, seed: u64) -> PredictionService {
        PredictionService::new(f.handle.clone(), Arc::new(CanaryRouter::seeded(seed)), f.db.clone())
    }

    #[tokio::test]
    async fn test_predict_single_persists() {
        let f = fixture(&["v1"]).await;
        let service = service(&f, 1);

        let response = service
            .predict_single(&CustomerFeatures::example("CUST_00001"))
            .await
            .unwrap();
        assert_eq!(response.model_version, "v1");
        assert!((0.0..=1.0).contains(&response.probability));
        assert_eq!(response.prediction, u8::from(response.probability >= 0.5));

        let stored = f.db.recent_predictions(10).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].customer_id, "CUST_00001");
        assert_eq!(stored[0].features["contract_type"], "Month-to-month");
        assert!(stored[0].is_churn.is_none());
    }

    #[tokio::test]
    async fn test_full_canary_traffic_routes_every_single_request() {
        let f = fixture(&["v1", "v2"]).await;
        f.registry.promote_to_canary("v1", 100).await.unwrap();
        f.handle.reload().await;

        let service = service(&f, 3);
        for i in 0..20 {
            let customer = CustomerFeatures::example(&format!("CUST_{}", i));
            let response = service.predict_single(&customer).await.unwrap();
            assert_eq!(response.model_version, "v1");
        }
        assert_eq!(service.stats().canary_requests, 20);
    }

    #[tokio::test]
    async fn test_batch_uses_active_only() {
        let f = fixture(&["v1", "v2"]).await;
        f.registry.promote_to_canary("v1", 100).await.unwrap();
        f.handle.reload().await;

        let service = service(&f, 3);
        let customers: Vec<_> = (0..10)
            .map(|i| CustomerFeatures::example(&format!("CUST_{}", i)))
            .collect();
        let response = service.predict_batch(&customers).await.unwrap();
        assert_eq!(response.total, 10);
        assert_eq!(response.model_version, "v2");
        assert!(response.predictions.iter().all(|p| p.model_version == "v2"));
        assert_eq!(f.db.prediction_count().await, 10);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let f = fixture(&[]).await;
        let response = service(&f, 1).predict_batch(&[]).await.unwrap();
        assert_eq!(response.total, 0);
        assert_eq!(response.model_version, "unknown");
    }

    #[tokio::test]
    async fn test_no_model_loaded() {
        let f = fixture(&[]).await;
        let service = service(&f, 1);
        let err = service
            .predict_single(&CustomerFeatures::example("CUST_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChurnError::NoModelLoaded));
        assert_eq!(service.stats().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_invalid_customer_rejected_before_scoring() {
        let f = fixture(&["v1"]).await;
        let mut customer = CustomerFeatures::example("CUST_1");
        customer.gender = "Unknown".into();
        let err = service(&f, 1).predict_single(&customer).await.unwrap_err();
        assert!(matches!(err, ChurnError::Validation(_)));
        assert_eq!(f.db.prediction_count().await, 0);
    }

    #[tokio::test]
    async fn test_predict_file() {
        let f = fixture(&["v1"]).await;
        let input = f.dir.path().join("customers.csv");
        let output = f.dir.path().join("out/predictions.csv");
        let rows = SyntheticGenerator::new(2).generate(15);
        dataset::write_labeled(&input, &rows).unwrap();

        let response = service(&f, 1).predict_file(&input, &output).await.unwrap();
        assert_eq!(response.total, 15);

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(headers, ["customer_id", "prediction", "probability", "model_version"]);
        let written: Vec<BatchOutputRow> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(written.len(), 15);
        assert_eq!(written[0].customer_id, rows[0].customer_id);
        assert!(written.iter().all(|r| r.model_version == "v1"));
    }

    #[tokio::test]
    async fn test_predict_file_without_customers_writes_header() {
        let f = fixture(&["v1"]).await;
        let input = f.dir.path().join("empty.csv");
        let output = f.dir.path().join("empty_predictions.csv");
        dataset::write_labeled(&input, &[]).unwrap();

        let response = service(&f, 1).predict_file(&input, &output).await.unwrap();
        assert_eq!(response.total, 0);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "customer_id,prediction,probability,model_version\n"
        );
    }

    #[tokio::test]
    async fn test_metrics_service() {
        let f = fixture(&["v1", "v2"]).await;
        let metrics = MetricsService::new(f.registry.clone());

        let latest = metrics.get_latest_metrics(None).await.unwrap();
        assert_eq!(latest.model_version, "v2");
        assert_eq!(latest.metrics["accuracy"], 0.7);

        let v1 = metrics.get_latest_metrics(Some("v1")).await.unwrap();
        assert_eq!(v1.model_version, "v1");

        assert!(matches!(
            metrics.get_latest_metrics(Some("v9")).await,
            Err(ChurnError::VersionNotFound(_))
        ));
        assert_eq!(metrics.get_all_model_versions().await[0].version, "v2");
    }
}
