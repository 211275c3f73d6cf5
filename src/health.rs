//! Health checks for the churn serving process.
//!
//! The service is `healthy` when the database and tracking store respond and
//! a model is loaded. A failed dependency or a missing model makes it
//! `degraded`; it keeps serving whatever it can.

use crate::compute::{ArtifactStore, ModelHandle};
use crate::store::Database;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Operational but missing a dependency or a model.
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code.
    pub fn to_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Combine two statuses (worst wins).
    pub fn combine(&self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Result of checking one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            latency_ms: None,
            details: HashMap::new(),
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            latency_ms: None,
            details: HashMap::new(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Body of `GET /api/v1/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Database reachable
    pub database: bool,
    /// Tracking store reachable
    pub tracking: bool,
    /// Active or canary model loaded
    pub model_loaded: bool,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(version: impl Into<String>, start_time: Instant) -> Self {
        Self {
            status: HealthStatus::Healthy,
            database: false,
            tracking: false,
            model_loaded: false,
            version: version.into(),
            uptime_seconds: start_time.elapsed().as_secs(),
            components: Vec::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Add a component check.
    pub fn add_component(&mut self, component: ComponentHealth) {
        self.status = self.status.combine(&component.status);
        self.components.push(component);
    }

    pub fn with_components(mut self, components: Vec<ComponentHealth>) -> Self {
        for component in components {
            self.add_component(component);
        }
        self
    }
}

/// Probes the database, the tracking store and the loaded models.
#[derive(Clone)]
pub struct HealthChecker {
    db: Database,
    tracking: Arc<dyn ArtifactStore>,
    models: Arc<ModelHandle>,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(db: Database, tracking: Arc<dyn ArtifactStore>, models: Arc<ModelHandle>) -> Self {
        Self {
            db,
            tracking,
            models,
            start_time: Instant::now(),
        }
    }

    pub async fn check_health(&self) -> HealthResponse {
        let mut database = self.check_database().await;
        let tracking = self.check_tracking().await;
        let models = self.check_models();

        // Nothing can be served or recorded.
        if !database.is_healthy() && !models.is_healthy() {
            database.status = HealthStatus::Unhealthy;
        }

        let mut response = HealthResponse::new(env!("CARGO_PKG_VERSION"), self.start_time);
        response.database = database.is_healthy();
        response.tracking = tracking.is_healthy();
        response.model_loaded = models.is_healthy();
        response.with_components(vec![database, tracking, models])
    }

    async fn check_database(&self) -> ComponentHealth {
        let start = Instant::now();
        let ok = self.db.ping().await;
        let component = if ok {
            let (commits, rollbacks) = self.db.stats();
            ComponentHealth::healthy("database")
                .with_detail("commits", commits.to_string())
                .with_detail("rollbacks", rollbacks.to_string())
        } else {
            ComponentHealth::degraded("database", "database directory is not accessible")
        };
        component.with_latency(start.elapsed())
    }

    async fn check_tracking(&self) -> ComponentHealth {
        let start = Instant::now();
        let location = self.tracking.location();
        let component = if self.tracking.ping().await {
            ComponentHealth::healthy("tracking")
        } else {
            ComponentHealth::degraded("tracking", "tracking store unreachable")
        };
        component
            .with_detail("location", location)
            .with_latency(start.elapsed())
    }

    fn check_models(&self) -> ComponentHealth {
        let info = self.models.current().get_info();
        let mut component = if info.has_active || info.has_canary {
            ComponentHealth::healthy("model")
        } else {
            ComponentHealth::degraded("model", "no model loaded")
        };
        if let Some(active) = info.active_version {
            component = component.with_detail("active", active);
        }
        if let Some(canary) = info.canary_version {
            component = component
                .with_detail("canary", canary)
                .with_detail("canary_traffic_percent", info.canary_traffic_percent.to_string());
        }
        component
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ArtifactLoader, FileTrackingStore, LocalModelStore, ModelRegistry};

    #[test]
    fn test_health_status_combine() {
        assert_eq!(
            HealthStatus::Healthy.combine(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.combine(&HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Degraded.to_status_code(), 200);
        assert_eq!(HealthStatus::Unhealthy.to_status_code(), 503);
    }

    #[test]
    fn test_response_takes_worst_status() {
        let response = HealthResponse::new("0.1.0", Instant::now()).with_components(vec![
            ComponentHealth::healthy("database"),
            ComponentHealth::degraded("model", "no model loaded"),
        ]);
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.components.len(), 2);
    }

    #[tokio::test]
    async fn test_no_model_is_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory();
        let tracking: Arc<dyn ArtifactStore> =
            Arc::new(FileTrackingStore::new(dir.path().join("mlruns"), "exp"));
        let loader = ArtifactLoader::new(tracking.clone(), LocalModelStore::new(dir.path().join("models")));
        let models = Arc::new(ModelHandle::load(ModelRegistry::new(db.clone()), loader).await);

        let health = HealthChecker::new(db, tracking, models).check_health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.database);
        assert!(health.tracking);
        assert!(!health.model_loaded);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "degraded");
    }

    #[tokio::test]
    async fn test_lost_database_without_model_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("db")).await.unwrap();
        let tracking: Arc<dyn ArtifactStore> =
            Arc::new(FileTrackingStore::new(dir.path().join("mlruns"), "exp"));
        let loader = ArtifactLoader::new(tracking.clone(), LocalModelStore::new(dir.path().join("models")));
        let models = Arc::new(ModelHandle::load(ModelRegistry::new(db.clone()), loader).await);

        std::fs::remove_dir_all(dir.path().join("db")).unwrap();
        let health = HealthChecker::new(db, tracking, models).check_health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.status.to_status_code(), 503);
        assert!(!health.database);
        assert!(!health.model_loaded);
    }
}
