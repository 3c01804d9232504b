//! Engine facade tying the registry, store, job history and engines together.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::data::Record;
use crate::error::{Error, Result};
use crate::ingest::{ImportJob, InMemoryJobStore, Ingestor, JobStore};
use crate::insight::{self, Insight};
use crate::kpi::{self, KpiResult};
use crate::report::{self, ColumnStats, DataHealth, DatasetSummary};
use crate::schema::{DatasetKind, SchemaRegistry};
use crate::segment::{self, Cluster};
use crate::store::DatasetStore;

/// Tunables for segmentation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Iteration cap for K-Means
    pub max_iters: usize,
    /// Convergence tolerance for K-Means
    pub tolerance: f64,
    /// Seed for the clustering random source
    pub seed: u64,
    /// Maximum member coordinates reported per cluster
    pub sample_points: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iters: 300,
            tolerance: 1e-4,
            seed: 42,
            sample_points: 25,
        }
    }
}

/// Entry point for callers (CLI, HTTP layer, tests).
///
/// All read operations work on a snapshot of the store and may run
/// concurrently with each other and with ingestion.
#[derive(Clone)]
pub struct Engine {
    registry: SchemaRegistry,
    store: Arc<DatasetStore>,
    jobs: Arc<dyn JobStore>,
    ingestor: Ingestor,
    config: EngineConfig,
}

impl Engine {
    /// Engine with an in-memory job history.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_job_store(config, Arc::new(InMemoryJobStore::new()))
    }

    pub fn with_job_store(config: EngineConfig, jobs: Arc<dyn JobStore>) -> Self {
        let registry = SchemaRegistry::new();
        let store = Arc::new(DatasetStore::new());
        let ingestor = Ingestor::new(registry, store.clone(), jobs.clone());
        Self {
            registry,
            store,
            jobs,
            ingestor,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn ingest(&self, kind: DatasetKind, name: &str, raw: &[u8]) -> ImportJob {
        self.ingestor.ingest(kind, name, raw)
    }

    pub fn ingest_file(&self, kind: DatasetKind, name: &str, filename: &str, raw: &[u8]) -> ImportJob {
        self.ingestor.ingest_file(kind, name, filename, raw)
    }

    /// KPIs for all loaded kinds, windows ending at the current time.
    pub fn compute_kpis(&self, period_days: u32) -> Result<Vec<KpiResult>> {
        self.compute_kpis_at(period_days, Utc::now())
    }

    pub fn compute_kpis_at(&self, period_days: u32, now: DateTime<Utc>) -> Result<Vec<KpiResult>> {
        kpi::compute_kpis(&self.store, &self.registry, period_days, now)
    }

    pub fn compute_kpis_for(&self, kind: DatasetKind, period_days: u32) -> Result<Vec<KpiResult>> {
        self.compute_kpis_for_at(kind, period_days, Utc::now())
    }

    pub fn compute_kpis_for_at(
        &self,
        kind: DatasetKind,
        period_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<KpiResult>> {
        kpi::compute_kpis_for(&self.store, &self.registry, kind, period_days, now)
    }

    pub fn segment(&self, kind: DatasetKind, k: usize) -> Result<Vec<Cluster>> {
        segment::segment(&self.store, &self.registry, kind, k, &self.config)
    }

    pub fn insights(&self, kind: DatasetKind) -> Result<Vec<Insight>> {
        insight::generate_insights(&self.store, &self.registry, kind)
    }

    pub fn latest_job(&self) -> Option<ImportJob> {
        self.jobs.latest_job()
    }

    pub fn jobs(&self) -> Vec<ImportJob> {
        self.jobs.jobs()
    }

    pub fn data_health(&self) -> DataHealth {
        report::data_health(self.jobs.as_ref())
    }

    pub fn summary(&self, name: &str) -> Result<DatasetSummary> {
        let dataset = self.dataset(name)?;
        Ok(report::summarize(&dataset))
    }

    pub fn preview(&self, name: &str, rows: usize) -> Result<Vec<Record>> {
        let dataset = self.dataset(name)?;
        Ok(report::preview(&dataset, rows))
    }

    pub fn describe(&self, name: &str) -> Result<Vec<ColumnStats>> {
        let dataset = self.dataset(name)?;
        Ok(report::describe(&dataset))
    }

    fn dataset(&self, name: &str) -> Result<Arc<crate::data::Dataset>> {
        self.store
            .get(name)
            .ok_or_else(|| Error::DatasetNotFound(name.to_string()))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
