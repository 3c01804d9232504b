//! InsightForge: analytics over uploaded business datasets
//!
//! Tabular CSV uploads are validated against per-kind schemas, stored as
//! immutable snapshots, and turned into windowed KPIs, K-Means customer
//! or content segments, and rule-based natural-language insights.

pub mod cli;
pub mod data;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod insight;
pub mod kpi;
pub mod report;
pub mod schema;
pub mod segment;
pub mod stats;
pub mod store;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{load_csv, Dataset, Record, Table, Value};
pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use ingest::{ImportJob, InMemoryJobStore, JobStatus, JobStore};
pub use insight::Insight;
pub use kpi::{KpiResult, KpiValue};
pub use report::{ColumnStats, DataHealth, DatasetSummary};
pub use schema::{DatasetKind, SchemaRegistry};
pub use segment::{Cluster, ClusterPoint, FeatureMean};
pub use store::DatasetStore;
