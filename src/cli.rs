//! Command-line interface definitions and argument parsing

use std::path::Path;

use clap::Parser;

use crate::engine::EngineConfig;
use crate::schema::DatasetKind;

/// Business dataset analytics: validated ingestion, KPIs, segmentation and insights
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long)]
    pub input: String,

    /// Dataset kind: transactions, content, advertising or banking
    #[arg(long, default_value = "transactions")]
    pub kind: String,

    /// Dataset name (defaults to the input file stem)
    #[arg(short, long)]
    pub name: Option<String>,

    /// KPI comparison period in days
    #[arg(long, default_value = "30")]
    pub period_days: u32,

    /// Number of clusters for segmentation
    #[arg(short = 'k', long, default_value = "3")]
    pub clusters: usize,

    /// Maximum iterations for K-Means
    #[arg(long, default_value = "300")]
    pub max_iters: usize,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Seed for the clustering random source
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Maximum sample coordinates reported per cluster
    #[arg(long, default_value = "25")]
    pub sample_points: usize,

    /// Write a cluster scatter plot to this PNG path
    #[arg(short, long)]
    pub plot: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn dataset_kind(&self) -> crate::Result<DatasetKind> {
        self.kind.parse()
    }

    /// Explicit `--name`, otherwise the input file stem.
    pub fn dataset_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        Path::new(&self.input)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input.clone())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_iters: self.max_iters,
            tolerance: self.tolerance,
            seed: self.seed,
            sample_points: self.sample_points,
        }
    }

    /// Reject values the engines cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.period_days == 0 {
            anyhow::bail!("--period-days must be positive");
        }
        if self.clusters == 0 {
            anyhow::bail!("--clusters must be at least 1");
        }
        if self.max_iters == 0 {
            anyhow::bail!("--max-iters must be at least 1");
        }
        if !(self.tolerance > 0.0) {
            anyhow::bail!("--tolerance must be positive");
        }
        self.dataset_kind()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["insightforge", "--input", "data/banking_data.csv"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = args(&[]);
        assert_eq!(args.kind, "transactions");
        assert_eq!(args.period_days, 30);
        assert_eq!(args.clusters, 3);
        assert_eq!(args.engine_config(), EngineConfig::default());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_dataset_name() {
        assert_eq!(args(&[]).dataset_name(), "banking_data");
        assert_eq!(args(&["--name", "bank"]).dataset_name(), "bank");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(args(&["-k", "0"]).validate().is_err());
        assert!(args(&["--period-days", "0"]).validate().is_err());
        assert!(args(&["--tolerance", "0"]).validate().is_err());
        assert!(args(&["--kind", "weather"]).validate().is_err());

        let args = args(&["--kind", "ads", "-k", "4"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.dataset_kind().unwrap(), DatasetKind::Advertising);
    }
}
