//! Cluster scatter plots using Plotters

use plotters::prelude::*;
use tracing::info;

use crate::error::{Error, Result};
use crate::segment::Cluster;

/// Color palette for different clusters
const CLUSTER_COLORS: [RGBColor; 6] = [RED, BLUE, GREEN, MAGENTA, CYAN, YELLOW];

fn render_err<E: std::fmt::Display>(err: E) -> Error {
    Error::Render(err.to_string())
}

fn cluster_color(cluster_id: usize) -> RGBColor {
    CLUSTER_COLORS
        .get(cluster_id)
        .copied()
        .unwrap_or(BLACK)
}

/// Axis ranges covering every sample point and cluster mean, padded by 5%.
pub fn plot_bounds(clusters: &[Cluster], x_feature: &str, y_feature: &str) -> ((f64, f64), (f64, f64)) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for cluster in clusters {
        for point in &cluster.sample_coordinates {
            xs.push(point.x);
            ys.push(point.y);
        }
        if let Some(x) = cluster.feature_mean(x_feature) {
            xs.push(x);
        }
        ys.push(cluster.feature_mean(y_feature).unwrap_or(0.0));
    }
    (padded_range(&xs), padded_range(&ys))
}

fn padded_range(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((max - min) * 0.05).max(0.5);
    (min - pad, max + pad)
}

/// Render sample coordinates of each cluster and the cluster means of the
/// first two features as a PNG scatter plot.
pub fn render_clusters(clusters: &[Cluster], features: &[&str], output_path: &str) -> Result<()> {
    let x_feature = features
        .first()
        .ok_or_else(|| Error::Render("no features to plot".to_string()))?;
    let y_feature = features.get(1).copied().unwrap_or("");

    let ((x_min, x_max), (y_min, y_max)) = plot_bounds(clusters, x_feature, y_feature);

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;

    let title = format!("Segments: {x_feature} vs {y_feature}");
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(render_err)?;

    chart
        .configure_mesh()
        .x_desc(*x_feature)
        .y_desc(y_feature)
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(render_err)?;

    for cluster in clusters {
        let color = cluster_color(cluster.cluster_id);
        chart
            .draw_series(
                cluster
                    .sample_coordinates
                    .iter()
                    .map(|p| Circle::new((p.x, p.y), 4, color.filled())),
            )
            .map_err(render_err)?;

        let cx = cluster.feature_mean(x_feature).unwrap_or(0.0);
        let cy = cluster.feature_mean(y_feature).unwrap_or(0.0);
        let dx = (x_max - x_min) * 0.01;
        let dy = (y_max - y_min) * 0.01;
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(cx - dx, cy - dy), (cx + dx, cy + dy)],
                color.filled(),
            )))
            .map_err(render_err)?
            .label(format!("Cluster {}: {}", cluster.cluster_id, cluster.label))
            .legend(move |(x, y)| Rectangle::new([(x, y), (x + 10, y + 10)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(render_err)?;

    root.present().map_err(render_err)?;
    info!(path = output_path, clusters = clusters.len(), "Cluster plot written");

    Ok(())
}
