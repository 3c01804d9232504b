//! InsightForge: analytics CLI for business datasets
//!
//! Ingests one CSV file, then prints KPIs, segments and insights for its
//! dataset kind. Optionally renders the segments as a scatter plot.

use anyhow::{Context, Result};
use clap::Parser;
use insightforge::{viz, Args, Cluster, Engine, Error, Insight, JobStatus, KpiResult};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Serialize)]
struct Report<'a> {
    job: &'a insightforge::ImportJob,
    kpis: &'a [KpiResult],
    segments: &'a [Cluster],
    insights: &'a [Insight],
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    args.validate()?;

    let kind = args.dataset_kind()?;
    let name = args.dataset_name();
    let engine = Engine::new(args.engine_config());
    let start_time = Instant::now();

    // Step 1: Ingest
    let raw = std::fs::read(&args.input).with_context(|| format!("Failed to read {}", args.input))?;
    let job = engine.ingest_file(kind, &name, &args.input, &raw);
    if job.status != JobStatus::Completed {
        anyhow::bail!("Import of {} failed: {}", args.input, job.errors.join("; "));
    }
    info!(dataset = %name, %kind, rows = job.rows_processed, "Dataset imported");

    // Step 2: KPIs
    let kpis = engine.compute_kpis_for(kind, args.period_days)?;

    // Step 3: Segmentation, skipped for kinds without clustering features
    if args.verbose && !args.json {
        let config = engine.config();
        println!("Fitting K-Means with {} clusters", args.clusters);
        println!("  Max iterations: {}", config.max_iters);
        println!("  Tolerance: {}", config.tolerance);
        println!("  Seed: {}", config.seed);
    }
    let segment_start = Instant::now();
    let segments = match engine.segment(kind, args.clusters) {
        Ok(clusters) => clusters,
        Err(Error::UnsupportedKind(reason)) => {
            info!(%kind, %reason, "Segmentation skipped");
            Vec::new()
        }
        Err(Error::InsufficientData(reason)) => {
            warn!(%kind, %reason, "Segmentation skipped");
            Vec::new()
        }
        Err(err) => return Err(err.into()),
    };
    let segment_time = segment_start.elapsed();

    if let (Some(path), false) = (&args.plot, segments.is_empty()) {
        let features = engine.registry().features(kind)?;
        viz::render_clusters(&segments, features, path)?;
    }

    // Step 4: Insights
    let insights = engine.insights(kind)?;

    if args.json {
        let report = Report {
            job: &job,
            kpis: &kpis,
            segments: &segments,
            insights: &insights,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("=== Import ===");
    println!(
        "✓ {} ({}): {} rows, status {}",
        name,
        kind,
        job.rows_processed,
        job.status.as_str()
    );
    if job.invalid_cells > 0 {
        println!("  {} unparseable cells stored as missing", job.invalid_cells);
    }

    println!("\n=== KPIs (last {} days) ===", args.period_days);
    for kpi in &kpis {
        println!(
            "{}: {}{} ({:+.1}%, {})",
            kpi.label,
            kpi.value,
            kpi.unit.as_deref().unwrap_or(""),
            kpi.change_pct,
            kpi.trend_label
        );
        if args.verbose {
            println!("  Next step: {}", kpi.next_step);
        }
    }

    if !segments.is_empty() {
        println!("\n=== Segments (k = {}) ===", args.clusters);
        for cluster in &segments {
            println!("Cluster {}: {} - {}", cluster.cluster_id, cluster.label, cluster.description);
            if args.verbose {
                for feature in &cluster.features {
                    println!("  {}: {:.2}", feature.feature, feature.mean);
                }
            }
        }
        if args.verbose {
            println!("  Segmentation time: {:.2}s", segment_time.as_secs_f64());
        }
        if let Some(path) = &args.plot {
            println!("Plot saved to: {}", path);
        }
    }

    println!("\n=== Insights ===");
    if insights.is_empty() {
        println!("No insights for this dataset");
    }
    for insight in &insights {
        println!("[{}] {}", insight.category, insight.insight);
    }

    println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// `RUST_LOG` wins; otherwise `--verbose` selects debug. Logs go to stderr.
fn init_logging(verbose: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
