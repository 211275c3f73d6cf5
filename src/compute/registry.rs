// Model Registry and version lifecycle

use crate::error::{ChurnError, Result};
use crate::observability;
use crate::store::Database;
use crate::types::{Metric, ModelStatus, ModelType, ModelVersion};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Registry of model versions.
///
/// At most one version is `active` and at most one is `canary` at any time.
/// Every transition is a single database transaction, so concurrent callers
/// observe either the state before or after a transition, never a mix.
#[derive(Clone)]
pub struct ModelRegistry {
    db: Database,
    stats: Arc<RegistryStats>,
}

/// Registry statistics
#[derive(Default)]
pub struct RegistryStats {
    /// Versions registered
    pub registered: AtomicU64,
    /// Canary promotions
    pub canary_promotions: AtomicU64,
    /// Canary to active promotions
    pub activations: AtomicU64,
    /// Canary rollbacks
    pub rollbacks: AtomicU64,
}

impl ModelRegistry {
    /// Creates a registry over a database
    pub fn new(db: Database) -> Self {
        Self {
            db,
            stats: Arc::new(RegistryStats::default()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Registers a new version as `active` with 100% traffic, deprecating the
    /// previous active version and recording one metric row per metric.
    pub async fn register(
        &self,
        version: &str,
        model_type: ModelType,
        artifact_ref: &str,
        metrics: &HashMap<String, f64>,
    ) -> Result<ModelVersion> {
        if version.trim().is_empty() {
            return Err(ChurnError::InvalidArgument("version must not be empty".into()));
        }

        let mut tx = self.db.begin().await?;

        // created_at is strictly increasing across versions.
        let now = Utc::now();
        let created_at = match tx.latest_created_at() {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };

        let entry = ModelVersion {
            version: version.to_string(),
            model_type,
            status: ModelStatus::Active,
            traffic_percent: 100,
            artifact_ref: artifact_ref.to_string(),
            created_at,
            performance_metrics: metrics.clone(),
        };

        let deprecated = tx.update_status_where(ModelStatus::Active, ModelStatus::Deprecated, None);
        tx.insert_version(entry.clone())?;

        let mut metadata = serde_json::Map::new();
        metadata.insert("model_type".into(), model_type.as_str().into());
        metadata.insert("artifact_ref".into(), artifact_ref.into());

        let mut names: Vec<&String> = metrics.keys().collect();
        names.sort();
        for name in names {
            tx.insert_metric(version, name, metrics[name], Some(metadata.clone()));
        }

        tx.commit().await?;

        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        observability::record_transition("register");
        info!(
            version = %version,
            model_type = %model_type,
            deprecated = ?deprecated,
            "Registered model version"
        );

        Ok(entry)
    }

    /// Moves `version` to `canary` with the given traffic share, deprecating
    /// any other canary.
    ///
    /// Promoting the current active version leaves the registry without an
    /// active version.
    pub async fn promote_to_canary(&self, version: &str, traffic_percent: u8) -> Result<ModelVersion> {
        if traffic_percent > 100 {
            return Err(ChurnError::InvalidArgument(format!(
                "traffic_percent must be between 0 and 100, got {}",
                traffic_percent
            )));
        }

        let mut tx = self.db.begin().await?;
        let previous_status = tx
            .find_version(version)
            .map(|v| v.status)
            .ok_or_else(|| ChurnError::VersionNotFound(version.to_string()))?;

        let deprecated =
            tx.update_status_where(ModelStatus::Canary, ModelStatus::Deprecated, Some(version));
        tx.update_status(version, ModelStatus::Canary, traffic_percent)?;
        let updated = tx
            .find_version(version)
            .cloned()
            .ok_or_else(|| ChurnError::VersionNotFound(version.to_string()))?;
        tx.commit().await?;

        self.stats.canary_promotions.fetch_add(1, Ordering::Relaxed);
        observability::record_transition("promote_to_canary");
        info!(
            version = %version,
            from = %previous_status,
            traffic_percent,
            deprecated = ?deprecated,
            "Promoted version to canary"
        );

        Ok(updated)
    }

    /// Makes the canary `version` active with 100% traffic. The previous
    /// active version is deprecated.
    pub async fn promote_canary_to_active(&self, version: &str) -> Result<ModelVersion> {
        let mut tx = self.db.begin().await?;
        let status = tx
            .find_version(version)
            .map(|v| v.status)
            .ok_or_else(|| ChurnError::VersionNotFound(version.to_string()))?;

        if status != ModelStatus::Canary {
            return Err(ChurnError::InvalidTransition {
                version: version.to_string(),
                from: status.to_string(),
                to: ModelStatus::Active.to_string(),
            });
        }

        let previous = tx.update_status_where(ModelStatus::Active, ModelStatus::Deprecated, None);
        tx.update_status(version, ModelStatus::Active, 100)?;
        tx.update_status_where(ModelStatus::Canary, ModelStatus::Deprecated, None);
        let updated = tx
            .find_version(version)
            .cloned()
            .ok_or_else(|| ChurnError::VersionNotFound(version.to_string()))?;
        tx.commit().await?;

        self.stats.activations.fetch_add(1, Ordering::Relaxed);
        observability::record_transition("promote_canary_to_active");
        info!(version = %version, previous = ?previous, "Promoted canary to active");

        Ok(updated)
    }

    /// Deprecates the current canary, if any, and returns it.
    pub async fn rollback_canary(&self) -> Result<Option<ModelVersion>> {
        let mut tx = self.db.begin().await?;
        let Some(canary) = tx.find_by_status(ModelStatus::Canary).map(|v| v.version.clone()) else {
            return Ok(None);
        };

        tx.update_status(&canary, ModelStatus::Deprecated, 0)?;
        let updated = tx.find_version(&canary).cloned();
        tx.commit().await?;

        self.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
        observability::record_transition("rollback_canary");
        info!(version = %canary, "Rolled back canary");

        Ok(updated)
    }

    /// Gets the active version
    pub async fn get_active(&self) -> Option<ModelVersion> {
        self.db.find_by_status(ModelStatus::Active).await
    }

    /// Gets the canary version
    pub async fn get_canary(&self) -> Option<ModelVersion> {
        self.db.find_by_status(ModelStatus::Canary).await
    }

    /// Gets a version by name
    pub async fn get(&self, version: &str) -> Result<ModelVersion> {
        self.db
            .find_version(version)
            .await
            .ok_or_else(|| ChurnError::VersionNotFound(version.to_string()))
    }

    /// Lists every version, newest first
    pub async fn list_all(&self) -> Vec<ModelVersion> {
        self.db.list_versions().await
    }

    /// Metrics recorded when `version` was registered
    pub async fn metrics_for(&self, version: &str) -> Result<Vec<Metric>> {
        self.get(version).await?;
        Ok(self.db.metrics_for(version).await)
    }

    /// Gets statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            registered: self.stats.registered.load(Ordering::Relaxed),
            canary_promotions: self.stats.canary_promotions.load(Ordering::Relaxed),
            activations: self.stats.activations.load(Ordering::Relaxed),
            rollbacks: self.stats.rollbacks.load(Ordering::Relaxed),
        }
    }
}

/// Statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatsSnapshot {
    pub registered: u64,
    pub canary_promotions: u64,
    pub activations: u64,
    pub rollbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> HashMap<String, f64> {
        HashMap::from([
            ("accuracy".to_string(), 0.8),
            ("roc_auc".to_string(), 0.75),
        ])
    }

    async fn registry_with(versions: &[&str]) -> ModelRegistry {
        let registry = ModelRegistry::new(Database::in_memory());
        for v in versions {
            registry
                .register(v, ModelType::RandomForest, &format!("run-{}", v), &metrics())
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_register_deprecates_previous_active() {
        let registry = registry_with(&["v1", "v2"]).await;

        let active = registry.get_active().await.unwrap();
        assert_eq!(active.version, "v2");
        assert_eq!(active.traffic_percent, 100);
        assert_eq!(registry.get("v1").await.unwrap().status, ModelStatus::Deprecated);

        let all = registry.list_all().await;
        assert_eq!(all[0].version, "v2");
        assert!(all[0].created_at > all[1].created_at);
    }

    #[tokio::test]
    async fn test_register_records_metrics() {
        let registry = registry_with(&["v1"]).await;
        let rows = registry.metrics_for("v1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].metric_name, "accuracy");
        assert!(rows[0].metadata.as_ref().unwrap().contains_key("model_type"));
    }

    #[tokio::test]
    async fn test_duplicate_register_leaves_state_unchanged() {
        let registry = registry_with(&["v1", "v2"]).await;
        let err = registry
            .register("v1", ModelType::GradientBoosting, "run-x", &metrics())
            .await
            .unwrap_err();
        assert!(matches!(err, ChurnError::AlreadyExists(_)));
        assert_eq!(registry.get_active().await.unwrap().version, "v2");
    }

    #[tokio::test]
    async fn test_canary_lifecycle() {
        let registry = registry_with(&["v1", "v2"]).await;

        let canary = registry.promote_to_canary("v1", 20).await.unwrap();
        assert_eq!(canary.status, ModelStatus::Canary);
        assert_eq!(canary.traffic_percent, 20);
        assert_eq!(registry.get_active().await.unwrap().version, "v2");

        let active = registry.promote_canary_to_active("v1").await.unwrap();
        assert_eq!(active.traffic_percent, 100);
        assert_eq!(registry.get_active().await.unwrap().version, "v1");
        assert!(registry.get_canary().await.is_none());
        assert_eq!(registry.get("v2").await.unwrap().status, ModelStatus::Deprecated);
    }

    #[tokio::test]
    async fn test_second_canary_replaces_first() {
        let registry = registry_with(&["v1", "v2", "v3"]).await;
        registry.promote_to_canary("v1", 10).await.unwrap();
        registry.promote_to_canary("v2", 30).await.unwrap();

        assert_eq!(registry.get_canary().await.unwrap().version, "v2");
        assert_eq!(registry.get("v1").await.unwrap().status, ModelStatus::Deprecated);
    }

    #[tokio::test]
    async fn test_promote_non_canary_is_rejected() {
        let registry = registry_with(&["v1", "v2"]).await;
        let err = registry.promote_canary_to_active("v1").await.unwrap_err();
        assert!(matches!(err, ChurnError::InvalidTransition { .. }));
        assert_eq!(registry.get("v1").await.unwrap().status, ModelStatus::Deprecated);
        assert_eq!(registry.get_active().await.unwrap().version, "v2");
    }

    #[tokio::test]
    async fn test_unknown_version_and_bad_traffic() {
        let registry = registry_with(&["v1"]).await;
        assert!(matches!(
            registry.promote_to_canary("v9", 10).await,
            Err(ChurnError::VersionNotFound(_))
        ));
        assert!(matches!(
            registry.promote_canary_to_active("v9").await,
            Err(ChurnError::VersionNotFound(_))
        ));
        assert!(matches!(
            registry.promote_to_canary("v1", 101).await,
            Err(ChurnError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_promoting_active_to_canary_clears_active() {
        let registry = registry_with(&["v1"]).await;
        registry.promote_to_canary("v1", 50).await.unwrap();
        assert!(registry.get_active().await.is_none());
        assert_eq!(registry.get_canary().await.unwrap().version, "v1");
    }

    #[tokio::test]
    async fn test_rollback_canary() {
        let registry = registry_with(&["v1", "v2"]).await;
        assert!(registry.rollback_canary().await.unwrap().is_none());

        registry.promote_to_canary("v1", 10).await.unwrap();
        let rolled = registry.rollback_canary().await.unwrap().unwrap();
        assert_eq!(rolled.version, "v1");
        assert_eq!(rolled.status, ModelStatus::Deprecated);
        assert!(registry.get_canary().await.is_none());
        assert_eq!(registry.stats().rollbacks, 1);
    }
}
