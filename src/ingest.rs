//! Schema-strict ingestion and import job history.
//!
//! `Ingestor::ingest` never returns an error: every outcome, including a
//! panic inside the parser, ends up in the returned [`ImportJob`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::data::{self, Dataset};
use crate::error::{Error, Result};
use crate::schema::{ColumnKind, DatasetKind, SchemaRegistry};
use crate::store::DatasetStore;

/// Lifecycle of an import. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// One upload attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub filename: String,
    pub kind: DatasetKind,
    pub dataset: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub rows_processed: usize,
    pub rows_errored: usize,
    /// Cells of numeric or timestamp columns that did not parse and were
    /// stored as missing
    pub invalid_cells: usize,
    pub errors: Vec<String>,
    pub missing_columns: Vec<String>,
}

impl ImportJob {
    fn new(filename: &str, kind: DatasetKind, dataset: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            kind,
            dataset: dataset.to_string(),
            status: JobStatus::Processing,
            created_at: Utc::now(),
            rows_processed: 0,
            rows_errored: 0,
            invalid_cells: 0,
            errors: Vec::new(),
            missing_columns: Vec::new(),
        }
    }

    fn complete(&mut self, rows: usize, invalid_cells: usize) {
        self.status = JobStatus::Completed;
        self.rows_processed = rows;
        self.rows_errored = 0;
        self.invalid_cells = invalid_cells;
    }

    fn reject(&mut self, rows: usize, missing: Vec<String>) {
        self.status = JobStatus::Failed;
        self.rows_processed = rows;
        self.rows_errored = rows;
        self.errors
            .push(Error::SchemaValidation { missing: missing.clone() }.to_string());
        self.missing_columns = missing;
    }

    fn fail(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.rows_processed = 0;
        self.rows_errored = 0;
        self.errors.push(error);
    }
}

/// Persistence collaborator for import history.
pub trait JobStore: Send + Sync {
    /// Append a job, or overwrite the entry with the same id.
    fn record_job(&self, job: &ImportJob);

    /// Most recently created job.
    fn latest_job(&self) -> Option<ImportJob>;

    /// All jobs in creation order.
    fn jobs(&self) -> Vec<ImportJob>;
}

/// Job history kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<Vec<ImportJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn record_job(&self, job: &ImportJob) {
        let mut jobs = self.jobs.write();
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
    }

    fn latest_job(&self) -> Option<ImportJob> {
        self.jobs.read().last().cloned()
    }

    fn jobs(&self) -> Vec<ImportJob> {
        self.jobs.read().clone()
    }
}

enum Outcome {
    Stored { rows: usize, invalid_cells: usize },
    Rejected { rows: usize, missing: Vec<String> },
}

/// Parses uploads, validates them against the registry and stores them.
#[derive(Clone)]
pub struct Ingestor {
    registry: SchemaRegistry,
    store: Arc<DatasetStore>,
    jobs: Arc<dyn JobStore>,
}

impl Ingestor {
    pub fn new(registry: SchemaRegistry, store: Arc<DatasetStore>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            registry,
            store,
            jobs,
        }
    }

    /// Ingest `raw` as dataset `name`; the job's filename is the dataset name.
    pub fn ingest(&self, kind: DatasetKind, name: &str, raw: &[u8]) -> ImportJob {
        self.ingest_file(kind, name, name, raw)
    }

    /// Ingest an uploaded file. On success the dataset `name` is replaced
    /// wholesale; on any failure the store is left untouched.
    pub fn ingest_file(&self, kind: DatasetKind, name: &str, filename: &str, raw: &[u8]) -> ImportJob {
        self.run_job(kind, name, filename, || self.load(kind, name, raw))
    }

    /// Record a processing job, run `load` with panics contained, then record
    /// the terminal job.
    fn run_job<F>(&self, kind: DatasetKind, name: &str, filename: &str, load: F) -> ImportJob
    where
        F: FnOnce() -> Result<Outcome>,
    {
        let mut job = ImportJob::new(filename, kind, name);
        self.jobs.record_job(&job);

        let outcome = panic::catch_unwind(AssertUnwindSafe(load));
        match outcome {
            Ok(Ok(Outcome::Stored { rows, invalid_cells })) => {
                job.complete(rows, invalid_cells);
                info!(job = %job.id, dataset = %name, %kind, rows, invalid_cells, "Import completed");
            }
            Ok(Ok(Outcome::Rejected { rows, missing })) => {
                warn!(job = %job.id, dataset = %name, %kind, missing = ?missing, "Import rejected");
                job.reject(rows, missing);
            }
            Ok(Err(e)) => {
                warn!(job = %job.id, dataset = %name, error = %e, "Import failed");
                job.fail(e.to_string());
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(job = %job.id, dataset = %name, error = %message, "Import aborted");
                job.fail(format!("Unexpected ingestion failure: {message}"));
            }
        }

        self.jobs.record_job(&job);
        job
    }

    fn load(&self, kind: DatasetKind, name: &str, raw: &[u8]) -> Result<Outcome> {
        let mut table = data::load_csv(raw)?;

        let missing = self.registry.missing_columns(kind, table.columns());
        if !missing.is_empty() {
            return Ok(Outcome::Rejected {
                rows: table.len(),
                missing,
            });
        }

        let time_column = self.registry.schema(kind).time_column;
        let mut invalid_cells = table.coerce_timestamps(time_column);
        if invalid_cells > 0 {
            warn!(dataset = %name, column = time_column, unparsed = invalid_cells, "Unparseable timestamps treated as missing");
        }

        for spec in self.registry.required_columns(kind) {
            if spec.kind != ColumnKind::Numeric {
                continue;
            }
            let invalid = table.coerce_numeric(spec.name);
            if invalid > 0 {
                warn!(dataset = %name, column = spec.name, invalid, "Non-numeric values treated as missing");
                invalid_cells += invalid;
            }
        }

        let rows = table.len();
        self.store.replace(Dataset::new(name, kind, table));
        Ok(Outcome::Stored { rows, invalid_cells })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
