//! CSV ingestion: rows, schema inference, numeric profiling.
//!
//! Turns an uploaded CSV into the in-memory dataset the planning and
//! execution core works on. Cell typing is dynamic (numbers become JSON
//! numbers, empty cells become null); column types are inferred from the
//! data: a column is a number if every non-empty value parses as a float,
//! a date if its first non-empty value carries an ISO-like date, otherwise
//! a string. Numeric columns additionally get summary statistics for the
//! preview panel.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, TabletalkError};
use crate::schema::{Column, ColumnType, Row, Schema};

lazy_static! {
    static ref ISO_DATE: Regex = Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap();
}

/// Per-column summary statistics for numeric columns.
#[derive(Debug, Clone, Serialize)]
pub struct NumericProfile {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub variance: f64,
    pub std_dev: f64,
}

/// An uploaded dataset: schema, typed rows, numeric profiles.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    pub headers: Vec<String>,
    pub schema: Schema,
    pub numeric_columns: Vec<String>,
    pub numeric_analysis: HashMap<String, NumericProfile>,
    pub rows: Vec<Row>,
}

/// Upload response: what the presentation layer needs to render a preview
/// and start asking questions.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
    pub schema: Schema,
    #[serde(rename = "numericColumns")]
    pub numeric_columns: Vec<String>,
    /// First rows only; the full row set stays server-side.
    pub rows: Vec<Row>,
    pub headers: Vec<String>,
    pub numeric_analysis: HashMap<String, NumericProfile>,
    #[serde(rename = "rowCount")]
    pub row_count: usize,
}

const PREVIEW_ROWS: usize = 10;

impl Dataset {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers: Vec<String> =
            csv_reader.headers()?.iter().map(|h| h.to_string()).collect();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(TabletalkError::Ingest("CSV has no header row".to_string()));
        }

        let mut raw_columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        let mut rows: Vec<Row> = Vec::new();

        for record in csv_reader.records() {
            let record = record?;
            let mut row = Row::new();
            for (i, header) in headers.iter().enumerate() {
                let raw = record.get(i).unwrap_or("");
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    raw_columns[i].push(trimmed.to_string());
                }
                row.insert(header.clone(), cell_value(raw));
            }
            rows.push(row);
        }

        let mut columns = Vec::with_capacity(headers.len());
        let mut numeric_columns = Vec::new();
        let mut numeric_analysis = HashMap::new();

        for (header, values) in headers.iter().zip(&raw_columns) {
            let ty = infer_column_type(values);
            if ty == ColumnType::Number {
                numeric_columns.push(header.clone());
                let parsed: Vec<f64> =
                    values.iter().filter_map(|v| v.parse::<f64>().ok()).collect();
                numeric_analysis.insert(header.clone(), profile(&parsed));
            }
            columns.push(Column { name: header.clone(), ty });
        }

        let dataset = Self {
            id: Uuid::new_v4().to_string(),
            headers,
            schema: Schema::new(columns),
            numeric_columns,
            numeric_analysis,
            rows,
        };
        info!(
            dataset = %dataset.id,
            rows = dataset.rows.len(),
            columns = dataset.schema.columns.len(),
            "ingested dataset"
        );
        Ok(dataset)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn summary(&self) -> UploadSummary {
        UploadSummary {
            dataset_id: self.id.clone(),
            schema: self.schema.clone(),
            numeric_columns: self.numeric_columns.clone(),
            rows: self.rows.iter().take(PREVIEW_ROWS).cloned().collect(),
            headers: self.headers.clone(),
            numeric_analysis: self.numeric_analysis.clone(),
            row_count: self.rows.len(),
        }
    }
}

/// Dynamic cell typing: empty -> null, numeric -> JSON number, else the
/// original text.
fn cell_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(raw.to_string())
}

fn infer_column_type(non_empty_values: &[String]) -> ColumnType {
    if !non_empty_values.is_empty()
        && non_empty_values
            .iter()
            .all(|v| v.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false))
    {
        return ColumnType::Number;
    }
    if let Some(first) = non_empty_values.first() {
        if let Some(m) = ISO_DATE.find(first) {
            if NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").is_ok() {
                return ColumnType::Date;
            }
        }
    }
    ColumnType::String
}

fn profile(values: &[f64]) -> NumericProfile {
    let count = values.len();
    let sum: f64 = values.iter().sum();
    let mean = sum / count as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    NumericProfile {
        count,
        mean,
        min,
        max,
        variance,
        std_dev: variance.sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = "\
Region,Revenue,Signup,Notes
APAC,10,2021-03-01,first
EMEA,20.5,2021-04-02,second
APAC,,2021-05-03,
";

    #[test]
    fn test_schema_inference() {
        let dataset = Dataset::from_reader(SAMPLE.as_bytes()).unwrap();
        let types: Vec<ColumnType> =
            dataset.schema.columns.iter().map(|c| c.ty).collect();
        assert_eq!(
            types,
            vec![
                ColumnType::String,
                ColumnType::Number,
                ColumnType::Date,
                ColumnType::String,
            ]
        );
        assert_eq!(dataset.numeric_columns, vec!["Revenue".to_string()]);
    }

    #[test]
    fn test_cell_typing() {
        let dataset = Dataset::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(dataset.rows[0]["Revenue"], json!(10));
        assert_eq!(dataset.rows[1]["Revenue"], json!(20.5));
        assert_eq!(dataset.rows[2]["Revenue"], Value::Null);
        assert_eq!(dataset.rows[2]["Notes"], Value::Null);
        assert_eq!(dataset.rows[0]["Region"], json!("APAC"));
    }

    #[test]
    fn test_numeric_profile() {
        let dataset = Dataset::from_reader(SAMPLE.as_bytes()).unwrap();
        let stats = &dataset.numeric_analysis["Revenue"];
        assert_eq!(stats.count, 2);
        assert!((stats.mean - 15.25).abs() < 1e-9);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 20.5);
        assert!((stats.variance - 27.5625).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_iso_date_stays_string() {
        let csv = "When\n2021-99-99\n2021-88-88\n";
        let dataset = Dataset::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(dataset.schema.columns[0].ty, ColumnType::String);
    }

    #[test]
    fn test_summary_previews_ten_rows() {
        let mut csv = String::from("N\n");
        for i in 0..25 {
            csv.push_str(&format!("{}\n", i));
        }
        let dataset = Dataset::from_reader(csv.as_bytes()).unwrap();
        let summary = dataset.summary();
        assert_eq!(summary.rows.len(), 10);
        assert_eq!(summary.row_count, 25);
        assert_eq!(summary.numeric_columns, vec!["N".to_string()]);
    }
}
