// Feature Transformer

use crate::error::{ChurnError, Result};
use crate::types::{FeatureRecord, FeatureValue, LabeledRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Width of every encoded feature vector.
pub const FEATURE_WIDTH: usize = 19;

/// Fixed-width numeric encoding of one customer record.
pub type FeatureVector = Vec<f64>;

/// How a column is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Passed through verbatim
    Numeric,
    /// Position in the fitted category order, 0 when unseen
    Categorical,
    /// 0 or 1
    Boolean,
}

/// Column layout, in output order.
pub const COLUMNS: [(&str, ColumnKind); FEATURE_WIDTH] = [
    ("age", ColumnKind::Numeric),
    ("tenure", ColumnKind::Numeric),
    ("monthly_charges", ColumnKind::Numeric),
    ("total_charges", ColumnKind::Numeric),
    ("contract_type", ColumnKind::Categorical),
    ("payment_method", ColumnKind::Categorical),
    ("internet_service", ColumnKind::Categorical),
    ("gender", ColumnKind::Categorical),
    ("paperless_billing", ColumnKind::Boolean),
    ("partner", ColumnKind::Boolean),
    ("dependents", ColumnKind::Boolean),
    ("phone_service", ColumnKind::Boolean),
    ("multiple_lines", ColumnKind::Boolean),
    ("online_security", ColumnKind::Boolean),
    ("online_backup", ColumnKind::Boolean),
    ("device_protection", ColumnKind::Boolean),
    ("tech_support", ColumnKind::Boolean),
    ("streaming_tv", ColumnKind::Boolean),
    ("streaming_movies", ColumnKind::Boolean),
];

/// Looks up the encoding of a column by name.
pub fn column_kind(name: &str) -> Option<ColumnKind> {
    COLUMNS.iter().find(|(n, _)| *n == name).map(|(_, kind)| *kind)
}

/// State recorded by `fit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedState {
    /// Sorted category universe per categorical column
    categories: BTreeMap<String, Vec<String>>,
    /// Rows seen during fit
    rows: usize,
}

/// Deterministic, fit-once encoder from raw customer records to
/// [`FeatureVector`]s.
///
/// The fitted transformer is stored inside every model artifact, so serving
/// always encodes with the exact state that was fitted at training time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTransformer {
    state: Option<FittedState>,
}

impl FeatureTransformer {
    /// Creates an unfitted transformer
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the category universe of every categorical column.
    pub fn fit(&mut self, frame: &[FeatureRecord]) -> Result<()> {
        if frame.is_empty() {
            return Err(ChurnError::InsufficientData(
                "cannot fit feature transformer on an empty frame".into(),
            ));
        }

        let mut seen: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for record in frame {
            for (name, kind) in COLUMNS.iter() {
                if *kind != ColumnKind::Categorical {
                    continue;
                }
                let value = categorical(record, name)?;
                seen.entry(name.to_string())
                    .or_default()
                    .insert(value.to_string());
            }
        }

        let categories = seen
            .into_iter()
            .map(|(name, values)| (name, values.into_iter().collect()))
            .collect();

        self.state = Some(FittedState {
            categories,
            rows: frame.len(),
        });

        Ok(())
    }

    /// Fits on the feature columns of labelled rows.
    pub fn fit_labeled(&mut self, rows: &[LabeledRecord]) -> Result<()> {
        let frame: Vec<FeatureRecord> = rows.iter().map(|r| r.features.clone()).collect();
        self.fit(&frame)
    }

    /// Discards fitted state.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Checks whether `fit` has been called since the last reset
    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Fitted categories for a column, in encoding order.
    pub fn categories(&self, column: &str) -> Option<&[String]> {
        self.state
            .as_ref()?
            .categories
            .get(column)
            .map(Vec::as_slice)
    }

    /// Encodes a single record.
    pub fn transform(&self, record: &FeatureRecord) -> Result<FeatureVector> {
        let state = self.state.as_ref().ok_or(ChurnError::NotFitted)?;
        encode_row(state, record)
    }

    /// Encodes every record of a frame. Row `i` of the output is identical to
    /// `transform(&frame[i])`.
    pub fn transform_batch(&self, frame: &[FeatureRecord]) -> Result<Vec<FeatureVector>> {
        let state = self.state.as_ref().ok_or(ChurnError::NotFitted)?;
        frame.iter().map(|record| encode_row(state, record)).collect()
    }
}

fn encode_row(state: &FittedState, record: &FeatureRecord) -> Result<FeatureVector> {
    let mut vector = Vec::with_capacity(FEATURE_WIDTH);

    for (name, kind) in COLUMNS.iter() {
        let value = match kind {
            ColumnKind::Numeric => numeric(record, name)?,
            ColumnKind::Boolean => {
                if boolean(record, name)? {
                    1.0
                } else {
                    0.0
                }
            }
            ColumnKind::Categorical => {
                let value = categorical(record, name)?;
                // Unseen categories leave the block at zero.
                state
                    .categories
                    .get(*name)
                    .and_then(|known| known.binary_search_by(|c| c.as_str().cmp(value)).ok())
                    .map_or(0.0, |pos| (pos + 1) as f64)
            }
        };
        vector.push(value);
    }

    Ok(vector)
}

fn lookup<'a>(record: &'a FeatureRecord, name: &str) -> Result<&'a FeatureValue> {
    record
        .get(name)
        .ok_or_else(|| ChurnError::MissingFeature(name.to_string()))
}

fn numeric(record: &FeatureRecord, name: &str) -> Result<f64> {
    match lookup(record, name)? {
        FeatureValue::Number(n) if n.is_finite() => Ok(*n),
        _ => Err(ChurnError::InvalidFeature {
            field: name.to_string(),
            expected: "finite number",
        }),
    }
}

fn boolean(record: &FeatureRecord, name: &str) -> Result<bool> {
    match lookup(record, name)? {
        FeatureValue::Bool(b) => Ok(*b),
        FeatureValue::Number(n) if *n == 0.0 || *n == 1.0 => Ok(*n == 1.0),
        _ => Err(ChurnError::InvalidFeature {
            field: name.to_string(),
            expected: "boolean",
        }),
    }
}

fn categorical<'a>(record: &'a FeatureRecord, name: &str) -> Result<&'a str> {
    lookup(record, name)?
        .as_text()
        .ok_or_else(|| ChurnError::InvalidFeature {
            field: name.to_string(),
            expected: "string",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CustomerFeatures;

    fn frame() -> Vec<FeatureRecord> {
        let mut a = CustomerFeatures::example("A");
        a.internet_service = "DSL".into();
        a.payment_method = "Bank transfer".into();
        a.contract_type = "One year".into();

        let mut b = CustomerFeatures::example("B");
        b.internet_service = "No".into();
        b.payment_method = "Credit card".into();
        b.contract_type = "Two year".into();
        b.gender = "Female".into();

        vec![
            CustomerFeatures::example("C").to_record(),
            a.to_record(),
            b.to_record(),
        ]
    }

    #[test]
    fn test_transform_width_and_layout() {
        let mut transformer = FeatureTransformer::new();
        transformer.fit(&frame()).unwrap();

        let record = CustomerFeatures::example("X").to_record();
        let vector = transformer.transform(&record).unwrap();

        assert_eq!(vector.len(), FEATURE_WIDTH);
        assert_eq!(vector[0], 45.0);
        assert_eq!(vector[1], 12.0);
        assert_eq!(vector[2], 70.5);
        assert_eq!(vector[3], 846.0);
        // "Month-to-month" sorts first among the three contract types.
        assert_eq!(vector[4], 1.0);
        // paperless_billing = true, partner = false
        assert_eq!(vector[8], 1.0);
        assert_eq!(vector[9], 0.0);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let mut transformer = FeatureTransformer::new();
        transformer.fit(&frame()).unwrap();

        let record = CustomerFeatures::example("X").to_record();
        let first = transformer.transform(&record).unwrap();
        let second = transformer.transform(&record).unwrap();
        let first_bits: Vec<u64> = first.iter().map(|v| v.to_bits()).collect();
        let second_bits: Vec<u64> = second.iter().map(|v| v.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn test_batch_matches_rows() {
        let mut transformer = FeatureTransformer::new();
        let frame = frame();
        transformer.fit(&frame).unwrap();

        let batch = transformer.transform_batch(&frame).unwrap();
        assert_eq!(batch.len(), frame.len());
        for (i, record) in frame.iter().enumerate() {
            assert_eq!(batch[i], transformer.transform(record).unwrap());
        }
    }

    #[test]
    fn test_unseen_category_maps_to_zero() {
        let mut transformer = FeatureTransformer::new();
        transformer.fit(&frame()).unwrap();

        let mut customer = CustomerFeatures::example("X");
        customer.internet_service = "Satellite".into();
        let vector = transformer.transform(&customer.to_record()).unwrap();

        let idx = COLUMNS
            .iter()
            .position(|(n, _)| *n == "internet_service")
            .unwrap();
        assert_eq!(vector[idx], 0.0);
        assert_eq!(vector.len(), FEATURE_WIDTH);
    }

    #[test]
    fn test_missing_field_is_named() {
        let mut transformer = FeatureTransformer::new();
        transformer.fit(&frame()).unwrap();

        let mut record = CustomerFeatures::example("X").to_record();
        record.remove("tenure");
        match transformer.transform(&record) {
            Err(ChurnError::MissingFeature(field)) => assert_eq!(field, "tenure"),
            other => panic!("expected MissingFeature, got {:?}", other),
        }
    }

    #[test]
    fn test_not_fitted_after_reset() {
        let mut transformer = FeatureTransformer::new();
        let record = CustomerFeatures::example("X").to_record();
        assert!(matches!(transformer.transform(&record), Err(ChurnError::NotFitted)));

        transformer.fit(&frame()).unwrap();
        assert!(transformer.transform(&record).is_ok());

        transformer.reset();
        assert!(!transformer.is_fitted());
        assert!(matches!(transformer.transform(&record), Err(ChurnError::NotFitted)));
        assert!(matches!(
            transformer.transform_batch(&[record]),
            Err(ChurnError::NotFitted)
        ));
    }

    #[test]
    fn test_fit_records_sorted_categories() {
        let mut transformer = FeatureTransformer::new();
        transformer.fit(&frame()).unwrap();
        assert_eq!(
            transformer.categories("internet_service").unwrap(),
            &["DSL".to_string(), "Fiber optic".to_string(), "No".to_string()]
        );
        assert!(transformer.categories("age").is_none());
    }

    #[test]
    fn test_fit_rejects_empty_frame() {
        let mut transformer = FeatureTransformer::new();
        assert!(matches!(
            transformer.fit(&[]),
            Err(ChurnError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_serialized_state_encodes_identically() {
        let mut transformer = FeatureTransformer::new();
        transformer.fit(&frame()).unwrap();

        let json = serde_json::to_string(&transformer).unwrap();
        let restored: FeatureTransformer = serde_json::from_str(&json).unwrap();

        let record = CustomerFeatures::example("X").to_record();
        assert_eq!(
            transformer.transform(&record).unwrap(),
            restored.transform(&record).unwrap()
        );
    }
}
