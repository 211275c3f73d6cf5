//! Core type definitions for churnserve.
//!
//! # Key Types
//!
//! - [`CustomerFeatures`]: statically typed inference request record
//! - [`FeatureRecord`]: raw field → value map consumed by the feature transformer
//! - [`ModelVersion`]: a registered model and its lifecycle [`ModelStatus`]
//! - [`Prediction`] and [`Metric`]: append-only observability records
//!
//! # Examples
//!
//! ```rust
//! use churnserve::types::{CustomerFeatures, FeatureValue};
//!
//! let customer = CustomerFeatures::example("CUST_00001");
//! customer.validate().unwrap();
//!
//! let record = customer.to_record();
//! assert_eq!(record.get("tenure"), Some(&FeatureValue::Number(12.0)));
//! assert!(!record.contains_key("customer_id"));
//! ```

use crate::error::{ChurnError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Accepted contract types.
pub const CONTRACT_TYPES: [&str; 3] = ["Month-to-month", "One year", "Two year"];

/// Accepted genders.
pub const GENDERS: [&str; 2] = ["Male", "Female"];

/// A single raw feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FeatureValue {
    /// Numeric view; booleans are not coerced.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FeatureValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FeatureValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Bool(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

/// Raw customer record keyed by field name.
pub type FeatureRecord = BTreeMap<String, FeatureValue>;

/// A training row: raw features plus the churn label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub customer_id: String,
    pub features: FeatureRecord,
    pub churn: bool,
}

/// Customer attributes accepted by the inference API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFeatures {
    pub customer_id: String,
    pub age: u32,
    pub tenure: u32,
    pub monthly_charges: f64,
    pub total_charges: f64,
    pub contract_type: String,
    pub payment_method: String,
    pub paperless_billing: bool,
    pub gender: String,
    pub partner: bool,
    pub dependents: bool,
    pub phone_service: bool,
    pub multiple_lines: bool,
    pub internet_service: String,
    pub online_security: bool,
    pub online_backup: bool,
    pub device_protection: bool,
    pub tech_support: bool,
    pub streaming_tv: bool,
    pub streaming_movies: bool,
}

impl CustomerFeatures {
    /// Boundary validation, applied before a record reaches the transformer.
    pub fn validate(&self) -> Result<()> {
        if self.customer_id.trim().is_empty() {
            return Err(ChurnError::Validation("customer_id must not be empty".into()));
        }
        if self.age > 120 {
            return Err(ChurnError::Validation(format!(
                "age must be between 0 and 120, got {}",
                self.age
            )));
        }
        for (name, value) in [
            ("monthly_charges", self.monthly_charges),
            ("total_charges", self.total_charges),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ChurnError::Validation(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if !CONTRACT_TYPES.contains(&self.contract_type.as_str()) {
            return Err(ChurnError::Validation(format!(
                "contract_type must be one of {:?}, got {:?}",
                CONTRACT_TYPES, self.contract_type
            )));
        }
        if !GENDERS.contains(&self.gender.as_str()) {
            return Err(ChurnError::Validation(format!(
                "gender must be one of {:?}, got {:?}",
                GENDERS, self.gender
            )));
        }
        Ok(())
    }

    /// Converts to the raw record form (without `customer_id`).
    pub fn to_record(&self) -> FeatureRecord {
        let mut record = FeatureRecord::new();
        let mut put = |name: &str, value: FeatureValue| {
            record.insert(name.to_string(), value);
        };

        put("age", FeatureValue::Number(self.age as f64));
        put("tenure", FeatureValue::Number(self.tenure as f64));
        put("monthly_charges", FeatureValue::Number(self.monthly_charges));
        put("total_charges", FeatureValue::Number(self.total_charges));
        put("contract_type", FeatureValue::Text(self.contract_type.clone()));
        put("payment_method", FeatureValue::Text(self.payment_method.clone()));
        put("internet_service", FeatureValue::Text(self.internet_service.clone()));
        put("gender", FeatureValue::Text(self.gender.clone()));
        put("paperless_billing", FeatureValue::Bool(self.paperless_billing));
        put("partner", FeatureValue::Bool(self.partner));
        put("dependents", FeatureValue::Bool(self.dependents));
        put("phone_service", FeatureValue::Bool(self.phone_service));
        put("multiple_lines", FeatureValue::Bool(self.multiple_lines));
        put("online_security", FeatureValue::Bool(self.online_security));
        put("online_backup", FeatureValue::Bool(self.online_backup));
        put("device_protection", FeatureValue::Bool(self.device_protection));
        put("tech_support", FeatureValue::Bool(self.tech_support));
        put("streaming_tv", FeatureValue::Bool(self.streaming_tv));
        put("streaming_movies", FeatureValue::Bool(self.streaming_movies));

        record
    }

    /// Builds a typed record from a raw one, failing on the first missing or
    /// mistyped field.
    pub fn from_record(customer_id: &str, record: &FeatureRecord) -> Result<Self> {
        let number = |name: &str| -> Result<f64> {
            record
                .get(name)
                .ok_or_else(|| ChurnError::MissingFeature(name.to_string()))?
                .as_number()
                .ok_or_else(|| ChurnError::InvalidFeature {
                    field: name.to_string(),
                    expected: "number",
                })
        };
        let flag = |name: &str| -> Result<bool> {
            record
                .get(name)
                .ok_or_else(|| ChurnError::MissingFeature(name.to_string()))?
                .as_bool()
                .ok_or_else(|| ChurnError::InvalidFeature {
                    field: name.to_string(),
                    expected: "boolean",
                })
        };
        let text = |name: &str| -> Result<String> {
            record
                .get(name)
                .ok_or_else(|| ChurnError::MissingFeature(name.to_string()))?
                .as_text()
                .map(str::to_string)
                .ok_or_else(|| ChurnError::InvalidFeature {
                    field: name.to_string(),
                    expected: "string",
                })
        };
        let count = |name: &str| -> Result<u32> {
            let value = number(name)?;
            if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
                return Err(ChurnError::InvalidFeature {
                    field: name.to_string(),
                    expected: "non-negative integer",
                });
            }
            Ok(value as u32)
        };

        Ok(Self {
            customer_id: customer_id.to_string(),
            age: count("age")?,
            tenure: count("tenure")?,
            monthly_charges: number("monthly_charges")?,
            total_charges: number("total_charges")?,
            contract_type: text("contract_type")?,
            payment_method: text("payment_method")?,
            paperless_billing: flag("paperless_billing")?,
            gender: text("gender")?,
            partner: flag("partner")?,
            dependents: flag("dependents")?,
            phone_service: flag("phone_service")?,
            multiple_lines: flag("multiple_lines")?,
            internet_service: text("internet_service")?,
            online_security: flag("online_security")?,
            online_backup: flag("online_backup")?,
            device_protection: flag("device_protection")?,
            tech_support: flag("tech_support")?,
            streaming_tv: flag("streaming_tv")?,
            streaming_movies: flag("streaming_movies")?,
        })
    }

    /// A fixed, valid customer used in docs and tests.
    pub fn example(customer_id: &str) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            age: 45,
            tenure: 12,
            monthly_charges: 70.5,
            total_charges: 846.0,
            contract_type: "Month-to-month".to_string(),
            payment_method: "Electronic check".to_string(),
            paperless_billing: true,
            gender: "Male".to_string(),
            partner: false,
            dependents: false,
            phone_service: true,
            multiple_lines: false,
            internet_service: "Fiber optic".to_string(),
            online_security: false,
            online_backup: false,
            device_protection: false,
            tech_support: false,
            streaming_tv: true,
            streaming_movies: true,
        }
    }
}

/// Lifecycle state of a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    /// Serving all non-canary traffic
    Active,
    /// Serving a configured share of traffic
    Canary,
    /// Retired
    Deprecated,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Active => "active",
            ModelStatus::Canary => "canary",
            ModelStatus::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    RandomForest,
    GradientBoosting,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::RandomForest => "random_forest",
            ModelType::GradientBoosting => "gradient_boosting",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "random_forest" => Ok(ModelType::RandomForest),
            "gradient_boosting" => Ok(ModelType::GradientBoosting),
            _ => Err(ChurnError::UnknownModelType(s.to_string())),
        }
    }
}

/// Model version in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Unique version string
    pub version: String,
    pub model_type: ModelType,
    pub status: ModelStatus,
    /// 0–100, meaningful when the status is canary
    pub traffic_percent: u8,
    /// Tracking store run id
    pub artifact_ref: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub performance_metrics: HashMap<String, f64>,
}

/// Stored inference result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: u64,
    pub customer_id: String,
    pub prediction: u8,
    pub probability: f64,
    pub model_version: String,
    /// Raw input snapshot for audit and retraining
    pub features: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Ground truth, filled in by downstream labelling jobs
    #[serde(default)]
    pub is_churn: Option<bool>,
}

/// Stored evaluation metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: u64,
    pub model_version: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}
