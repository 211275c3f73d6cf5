// CSV dataset reading and writing

use super::features::{column_kind, ColumnKind, COLUMNS};
use crate::error::{ChurnError, Result};
use crate::types::{CustomerFeatures, FeatureRecord, FeatureValue, LabeledRecord};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

const ID_COLUMN: &str = "customer_id";
const LABEL_COLUMN: &str = "churn";

/// Reads a labelled training CSV. Columns outside the feature layout are
/// ignored; `churn` accepts `0`/`1` and `true`/`false`.
pub fn read_labeled(path: &Path) -> Result<Vec<LabeledRecord>> {
    let (headers, rows) = read_rows(path)?;
    let label_idx = position(&headers, LABEL_COLUMN).ok_or_else(|| {
        ChurnError::Validation(format!("{} has no {} column", path.display(), LABEL_COLUMN))
    })?;
    let id_idx = position(&headers, ID_COLUMN);

    let mut records = Vec::with_capacity(rows.len());
    for (line, row) in rows.iter().enumerate() {
        let raw_label = row.get(label_idx).unwrap_or_default();
        let churn = parse_bool(raw_label).ok_or_else(|| {
            ChurnError::Validation(format!(
                "line {}: invalid {} value {:?}",
                line + 2,
                LABEL_COLUMN,
                raw_label
            ))
        })?;

        records.push(LabeledRecord {
            customer_id: customer_id(row, id_idx, line),
            features: parse_record(&headers, row, line)?,
            churn,
        });
    }

    debug!(path = %path.display(), rows = records.len(), "Read labelled dataset");
    Ok(records)
}

/// Reads customers for batch scoring. A `churn` column, if present, is
/// ignored.
pub fn read_customers(path: &Path) -> Result<Vec<CustomerFeatures>> {
    let (headers, rows) = read_rows(path)?;
    let id_idx = position(&headers, ID_COLUMN);

    rows.iter()
        .enumerate()
        .map(|(line, row)| {
            let record = parse_record(&headers, row, line)?;
            CustomerFeatures::from_record(&customer_id(row, id_idx, line), &record)
        })
        .collect()
}

/// Writes labelled rows with the `customer_id` column first and `churn`
/// (0/1) last.
pub fn write_labeled(path: &Path, rows: &[LabeledRecord]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new().from_writer(BufWriter::new(File::create(path)?));

    let mut header = vec![ID_COLUMN];
    header.extend(COLUMNS.iter().map(|(name, _)| *name));
    header.push(LABEL_COLUMN);
    writer.write_record(&header)?;

    for row in rows {
        let mut fields = Vec::with_capacity(header.len());
        fields.push(row.customer_id.clone());
        for (name, _) in COLUMNS.iter() {
            fields.push(match row.features.get(*name) {
                Some(FeatureValue::Number(n)) => n.to_string(),
                Some(FeatureValue::Bool(b)) => b.to_string(),
                Some(FeatureValue::Text(s)) => s.clone(),
                None => String::new(),
            });
        }
        fields.push(if row.churn { "1" } else { "0" }.to_string());
        writer.write_record(&fields)?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes `header` and then any serializable rows, one CSV line each. The
/// header is written even when there are no rows.
pub fn write_rows<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(File::create(path)?));
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_rows(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((headers, rows))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn position(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn customer_id(row: &StringRecord, id_idx: Option<usize>, line: usize) -> String {
    id_idx
        .and_then(|i| row.get(i))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("ROW_{:05}", line + 1))
}

fn parse_record(headers: &StringRecord, row: &StringRecord, line: usize) -> Result<FeatureRecord> {
    let mut record = FeatureRecord::new();

    for (header, raw) in headers.iter().zip(row.iter()) {
        let Some(kind) = column_kind(header) else {
            continue;
        };
        let invalid = |expected: &'static str| {
            ChurnError::Validation(format!(
                "line {}: {} must be a {}, got {:?}",
                line + 2,
                header,
                expected,
                raw
            ))
        };
        let value = match kind {
            ColumnKind::Numeric => FeatureValue::Number(
                raw.parse::<f64>().map_err(|_| invalid("number"))?,
            ),
            ColumnKind::Boolean => {
                FeatureValue::Bool(parse_bool(raw).ok_or_else(|| invalid("boolean"))?)
            }
            ColumnKind::Categorical => FeatureValue::Text(raw.to_string()),
        };
        record.insert(header.to_string(), value);
    }

    Ok(record)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
