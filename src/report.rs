//! Permissive reporting over stored datasets: summaries, previews,
//! descriptive statistics and import health. Nothing here validates
//! against the schema registry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data::{Dataset, Record};
use crate::ingest::JobStore;
use crate::schema::DatasetKind;
use crate::stats;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub kind: DatasetKind,
    pub rows: usize,
    pub columns: Vec<String>,
    pub missing_values: BTreeMap<String, usize>,
}

/// Descriptive statistics of one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    pub std: Option<f64>,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

/// State of the most recent import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataHealth {
    pub last_imported_at: Option<DateTime<Utc>>,
    pub rows_processed: usize,
    pub rows_errored: usize,
    pub missing_columns: Vec<String>,
    /// Job status, or `no_data` before the first import
    pub status: String,
}

pub fn summarize(dataset: &Dataset) -> DatasetSummary {
    let missing_values = dataset
        .columns
        .iter()
        .map(|column| {
            let missing = dataset
                .records
                .iter()
                .filter(|r| r.get(column).is_missing())
                .count();
            (column.clone(), missing)
        })
        .collect();

    DatasetSummary {
        name: dataset.name.clone(),
        kind: dataset.kind,
        rows: dataset.len(),
        columns: dataset.columns.clone(),
        missing_values,
    }
}

pub fn preview(dataset: &Dataset, rows: usize) -> Vec<Record> {
    dataset.records.iter().take(rows).cloned().collect()
}

/// Statistics for every column holding at least one numeric value.
pub fn describe(dataset: &Dataset) -> Vec<ColumnStats> {
    dataset
        .columns
        .iter()
        .filter_map(|column| {
            let values: Vec<f64> = dataset.records.iter().filter_map(|r| r.numeric(column)).collect();
            Some(ColumnStats {
                column: column.clone(),
                count: values.len(),
                mean: stats::mean(&values)?,
                std: stats::sample_std(&values),
                min: stats::quantile(&values, 0.0)?,
                q25: stats::quantile(&values, 0.25)?,
                median: stats::quantile(&values, 0.5)?,
                q75: stats::quantile(&values, 0.75)?,
                max: stats::quantile(&values, 1.0)?,
            })
        })
        .collect()
}

pub fn data_health(jobs: &dyn JobStore) -> DataHealth {
    match jobs.latest_job() {
        Some(job) => DataHealth {
            last_imported_at: Some(job.created_at),
            rows_processed: job.rows_processed,
            rows_errored: job.rows_errored,
            missing_columns: job.missing_columns,
            status: job.status.as_str().to_string(),
        },
        None => DataHealth {
            last_imported_at: None,
            rows_processed: 0,
            rows_errored: 0,
            missing_columns: Vec::new(),
            status: "no_data".to_string(),
        },
    }
}
