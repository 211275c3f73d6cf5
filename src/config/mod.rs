//! Configuration module for churnserve.

use crate::error::{ChurnError, Result};
use crate::types::ModelType;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a churnserve process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnConfig {
    /// HTTP API configuration.
    pub server: ServerConfig,
    /// Database and local model storage.
    pub storage: StorageConfig,
    /// Experiment tracking store.
    pub tracking: TrackingConfig,
    /// Online serving configuration.
    pub serving: ServingConfig,
    /// Training configuration.
    pub training: TrainingConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl ChurnConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChurnError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ChurnError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.serving.canary_traffic_percent > 100 {
            return Err(ChurnError::InvalidConfig {
                field: "serving.canary_traffic_percent".to_string(),
                reason: "Traffic percent must be between 0 and 100".to_string(),
            });
        }

        if !(self.training.test_size > 0.0 && self.training.test_size < 1.0) {
            return Err(ChurnError::InvalidConfig {
                field: "training.test_size".to_string(),
                reason: "Held-out fraction must be strictly between 0 and 1".to_string(),
            });
        }

        if self.tracking.uri.trim().is_empty() {
            return Err(ChurnError::InvalidConfig {
                field: "tracking.uri".to_string(),
                reason: "Tracking URI must not be empty".to_string(),
            });
        }

        if self.tracking.experiment_name.trim().is_empty()
            || self.tracking.experiment_name.contains(['/', '\\'])
        {
            return Err(ChurnError::InvalidConfig {
                field: "tracking.experiment_name".to_string(),
                reason: "Experiment name must be a non-empty path segment".to_string(),
            });
        }

        if self.server.max_batch_size == 0 {
            return Err(ChurnError::InvalidConfig {
                field: "server.max_batch_size".to_string(),
                reason: "Batch size limit must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Create a self-contained development configuration under `/tmp`.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "127.0.0.1:8000".parse().expect("valid socket address"),
                ..ServerConfig::default()
            },
            storage: StorageConfig {
                database_dir: Some(PathBuf::from("/tmp/churnserve/db")),
                model_registry_path: PathBuf::from("/tmp/churnserve/models"),
                data_dir: PathBuf::from("/tmp/churnserve/data"),
            },
            tracking: TrackingConfig {
                uri: "file:///tmp/churnserve/mlruns".to_string(),
                ..TrackingConfig::default()
            },
            serving: ServingConfig::default(),
            training: TrainingConfig::default(),
            observability: ObservabilityConfig {
                log_level: "debug".to_string(),
                ..ObservabilityConfig::default()
            },
        }
    }

    /// Create a configuration rooted at `dir`, with an in-memory database.
    pub fn ephemeral(dir: &Path) -> Self {
        Self {
            storage: StorageConfig {
                database_dir: None,
                model_registry_path: dir.join("models"),
                data_dir: dir.join("data"),
            },
            tracking: TrackingConfig {
                uri: dir.join("mlruns").display().to_string(),
                ..TrackingConfig::default()
            },
            ..Self::default()
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// API bind address.
    pub bind_addr: SocketAddr,
    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum customers per batch request.
    pub max_batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".parse().expect("valid socket address"),
            request_timeout: Duration::from_secs(30),
            max_batch_size: 10_000,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database directory; `None` keeps everything in memory.
    pub database_dir: Option<PathBuf>,
    /// Local fallback artifact directory.
    pub model_registry_path: PathBuf,
    /// Datasets and batch outputs.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_dir: Some(PathBuf::from("./data/db")),
            model_registry_path: PathBuf::from("./models"),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StorageConfig {
    /// Default training dataset location.
    pub fn raw_data_path(&self) -> PathBuf {
        self.data_dir.join("raw").join("customer_data.csv")
    }

    /// Default batch inference output location.
    pub fn batch_output_path(&self) -> PathBuf {
        self.data_dir.join("predictions").join("batch_predictions.csv")
    }
}

/// Experiment tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// `http(s)://` tracking server, `file://` URI or bare directory.
    pub uri: String,
    /// Experiment under which runs are stored.
    pub experiment_name: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:5000".to_string(),
            experiment_name: "churn_prediction".to_string(),
        }
    }
}

/// Online serving configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Traffic share applied by `canary setup` when none is given.
    pub canary_traffic_percent: u8,
    /// Store every prediction.
    pub persist_predictions: bool,
    /// Seed for the canary router; entropy when unset.
    pub router_seed: Option<u64>,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            canary_traffic_percent: 10,
            persist_predictions: true,
            router_seed: None,
        }
    }
}

/// Training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Held-out fraction.
    pub test_size: f64,
    /// Split and fitting seed.
    pub seed: u64,
    /// Classifier used when none is requested.
    pub model_type: ModelType,
    /// Override for the number of trees or boosting rounds.
    pub n_estimators: Option<usize>,
    /// Override for the maximum tree depth.
    pub max_depth: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 42,
            model_type: ModelType::RandomForest,
            n_estimators: None,
            max_depth: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Install the Prometheus recorder and expose `/metrics`.
    pub metrics_enabled: bool,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
