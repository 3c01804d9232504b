//! Feature standardization and K-Means segmentation

use std::collections::HashSet;

use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_stats::DeviationExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::data::Record;
use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::schema::{DatasetKind, SchemaRegistry};
use crate::stats;
use crate::store::DatasetStore;

/// Standardized centroid coordinates below this magnitude are labelled typical.
const LABEL_THRESHOLD: f64 = 0.25;

/// Per-feature standardization fitted on a feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub means: Array1<f64>,
    /// Sample standard deviations; 0 marks a feature without spread.
    pub stds: Array1<f64>,
}

impl StandardScaler {
    /// Fit means and sample standard deviations column by column.
    pub fn fit(features: &Array2<f64>) -> Self {
        let n = features.nrows();
        let means = features
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(features.ncols()));
        let stds = if n < 2 {
            Array1::zeros(features.ncols())
        } else {
            features.std_axis(Axis(0), 1.0)
        };
        Self { means, stds }
    }

    /// Standardize rows. Features with zero deviation map to 0 for every row.
    pub fn transform(&self, features: &Array2<f64>) -> Array2<f64> {
        let spread = |std: f64| std > 0.0 && std.is_finite();
        let divisors = self.stds.mapv(|std| if spread(std) { std } else { 1.0 });
        let mut out = (features - &self.means) / &divisors;
        for (j, &std) in self.stds.iter().enumerate() {
            if !spread(std) {
                out.column_mut(j).fill(0.0);
            }
        }
        out
    }
}

/// Feature matrix extracted from complete records.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub features: Vec<String>,
    /// Raw (un-standardized) values, one row per complete record
    pub raw: Array2<f64>,
    /// Identifier of each row, if present
    pub ids: Vec<Option<String>>,
}

impl FeatureMatrix {
    /// Collect rows that have a finite numeric value for every feature.
    pub fn from_records(records: &[&Record], features: &[&str], identifier: &str) -> Result<Self> {
        let mut data = Vec::with_capacity(records.len() * features.len());
        let mut ids = Vec::new();

        for record in records {
            let row: Option<Vec<f64>> = features
                .iter()
                .map(|f| record.numeric(f).filter(|v| v.is_finite()))
                .collect();
            if let Some(row) = row {
                data.extend(row);
                ids.push(record.get(identifier).key());
            }
        }

        let raw = Array2::from_shape_vec((ids.len(), features.len()), data)
            .map_err(|e| Error::InsufficientData(e.to_string()))?;
        Ok(Self {
            features: features.iter().map(|f| f.to_string()).collect(),
            raw,
            ids,
        })
    }

    pub fn len(&self) -> usize {
        self.raw.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.nrows() == 0
    }

    /// Number of distinct feature vectors.
    pub fn distinct_rows(&self) -> usize {
        self.raw
            .outer_iter()
            .map(|row| row.iter().map(|v| (v + 0.0).to_bits()).collect::<Vec<u64>>())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Fitted K-Means model over standardized features.
#[derive(Debug)]
pub struct KMeansModel {
    pub n_clusters: usize,
    /// Cluster assignment per row
    pub labels: Array1<usize>,
    /// Centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl KMeansModel {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Fit K-Means on standardized features with the supplied random source.
pub fn fit_kmeans<R: Rng + Clone>(
    features: &Array2<f64>,
    n_clusters: usize,
    max_iters: usize,
    tolerance: f64,
    rng: R,
) -> Result<KMeansModel> {
    if n_clusters == 0 {
        return Err(Error::InvalidArgument("k must be at least 1".to_string()));
    }
    if features.nrows() < n_clusters {
        return Err(Error::InsufficientData(format!(
            "{} rows cannot form {} clusters",
            features.nrows(),
            n_clusters
        )));
    }

    let observations = DatasetBase::from(features.clone());
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .max_n_iterations(max_iters as u64)
        .tolerance(tolerance)
        .fit(&observations)
        .map_err(|e| Error::Clustering(e.to_string()))?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Mean of one original feature within a cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureMean {
    pub feature: String,
    pub mean: f64,
}

/// Un-standardized sample coordinates of a member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterPoint {
    pub id: Option<String>,
    pub x: f64,
    pub y: f64,
}

/// Descriptive summary of one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub cluster_id: usize,
    pub label: String,
    pub description: String,
    pub size: usize,
    pub features: Vec<FeatureMean>,
    pub sample_coordinates: Vec<ClusterPoint>,
}

impl Cluster {
    pub fn feature_mean(&self, feature: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|f| f.feature == feature)
            .map(|f| f.mean)
    }
}

/// Segment every stored record of `kind` into `k` clusters.
pub fn segment(
    store: &DatasetStore,
    registry: &SchemaRegistry,
    kind: DatasetKind,
    k: usize,
    config: &EngineConfig,
) -> Result<Vec<Cluster>> {
    let features = registry.features(kind)?;
    if k == 0 {
        return Err(Error::InvalidArgument("k must be at least 1".to_string()));
    }

    let datasets = store.of_kind(kind);
    let records: Vec<&Record> = datasets.iter().flat_map(|d| d.records.iter()).collect();
    let matrix = FeatureMatrix::from_records(&records, features, registry.schema(kind).identifier)?;

    if matrix.is_empty() {
        return Err(Error::InsufficientData(format!(
            "no {kind} records with complete features ({})",
            features.join(", ")
        )));
    }
    let distinct = matrix.distinct_rows();
    if k > distinct {
        return Err(Error::InsufficientData(format!(
            "k = {k} exceeds the {distinct} distinct feature vectors"
        )));
    }

    let scaler = StandardScaler::fit(&matrix.raw);
    let standardized = scaler.transform(&matrix.raw);
    let rng = StdRng::seed_from_u64(config.seed);
    let model = fit_kmeans(&standardized, k, config.max_iters, config.tolerance, rng)?;
    debug!(%kind, k, rows = matrix.len(), inertia = model.inertia, "K-Means fitted");

    summarize(&matrix, &model, config.sample_points)
}

/// Build per-cluster summaries in original feature units. A cluster left
/// without members has no defined means and fails the whole call.
fn summarize(matrix: &FeatureMatrix, model: &KMeansModel, sample_points: usize) -> Result<Vec<Cluster>> {
    let total = matrix.len();
    let sizes = model.cluster_sizes();

    (0..model.n_clusters)
        .map(|cluster_id| {
            let members: Vec<usize> = model
                .labels
                .iter()
                .enumerate()
                .filter(|(_, &label)| label == cluster_id)
                .map(|(i, _)| i)
                .collect();
            if members.is_empty() {
                return Err(Error::InsufficientData(format!(
                    "cluster {cluster_id} has no members; the {total} usable rows do not separate into {} clusters",
                    model.n_clusters
                )));
            }

            let features = matrix
                .features
                .iter()
                .enumerate()
                .map(|(j, name)| -> Result<FeatureMean> {
                    let values: Vec<f64> = members.iter().map(|&i| matrix.raw[[i, j]]).collect();
                    let mean = stats::mean(&values).ok_or_else(|| {
                        Error::InsufficientData(format!("no values for {name} in cluster {cluster_id}"))
                    })?;
                    Ok(FeatureMean {
                        feature: name.clone(),
                        mean,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let sample_coordinates = members
                .iter()
                .take(sample_points)
                .map(|&i| ClusterPoint {
                    id: matrix.ids[i].clone(),
                    x: matrix.raw[[i, 0]],
                    y: if matrix.raw.ncols() > 1 {
                        matrix.raw[[i, 1]]
                    } else {
                        0.0
                    },
                })
                .collect();

            let size = sizes[cluster_id];
            let pct = size as f64 / total as f64 * 100.0;

            Ok(Cluster {
                cluster_id,
                label: cluster_label(&model.centroids.row(cluster_id), &matrix.features),
                description: format!("{size} records ({pct:.1}% of total)"),
                size,
                features,
                sample_coordinates,
            })
        })
        .collect()
}

/// Name a cluster after the feature its centroid deviates from most.
fn cluster_label(centroid: &ArrayView1<f64>, features: &[String]) -> String {
    let strongest = centroid
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()));

    match strongest {
        Some((j, &z)) if z.abs() >= LABEL_THRESHOLD => {
            let level = if z > 0.0 { "High" } else { "Low" };
            format!("{level} {}", features[j])
        }
        _ => "Typical".to_string(),
    }
}

/// Within-cluster sum of squared distances to the assigned centroid.
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .filter_map(|(i, &cluster)| features.row(i).sq_l2_dist(&centroids.row(cluster)).ok())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{load_csv, Dataset};

    const BANKING: &str = "customer_id,age,account_balance,transaction_count,products_used,churn_flag\n\
        C01,25,500,2,1,1\n\
        C02,31,650,3,1,1\n\
        C03,45,700,4,1,0\n\
        C04,52,20000,40,3,0\n\
        C05,38,21000,42,3,0\n\
        C06,61,19500,39,4,0\n\
        C07,29,8000,15,2,0\n\
        C08,33,8200,16,2,1\n\
        C09,47,7900,14,2,0\n";

    fn store_with(kind: DatasetKind, csv: &str) -> DatasetStore {
        let store = DatasetStore::new();
        store.replace(Dataset::new(kind.as_str(), kind, load_csv(csv.as_bytes()).unwrap()));
        store
    }

    #[test]
    fn test_scaler_zero_variance() {
        let raw = Array2::from_shape_vec((2, 2), vec![5.0, 1.0, 5.0, 3.0]).unwrap();
        let scaler = StandardScaler::fit(&raw);
        let scaled = scaler.transform(&raw);

        assert_eq!(scaled[[0, 0]], 0.0);
        assert_eq!(scaled[[1, 0]], 0.0);
        // Sample std of [1, 3] is sqrt(2).
        assert!((scaled[[0, 1]] + 1.0 / 2f64.sqrt()).abs() < 1e-12);
        assert!((scaled[[1, 1]] - 1.0 / 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_single_row() {
        let raw = Array2::from_shape_vec((1, 3), vec![1.0, 2.0, 3.0]).unwrap();
        let scaled = StandardScaler::fit(&raw).transform(&raw);
        assert!(scaled.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_segment_banking() {
        let store = store_with(DatasetKind::Banking, BANKING);
        let registry = SchemaRegistry::new();
        let clusters =
            segment(&store, &registry, DatasetKind::Banking, 3, &EngineConfig::default()).unwrap();

        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters.iter().map(|c| c.size).sum::<usize>(), 9);

        let mut sizes: Vec<usize> = clusters.iter().map(|c| c.size).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![3, 3, 3]);

        // Means are reported in original units.
        let mut balances: Vec<f64> = clusters
            .iter()
            .map(|c| c.feature_mean("account_balance").unwrap())
            .collect();
        balances.sort_by(f64::total_cmp);
        assert!((balances[0] - 616.666_666).abs() < 1e-3);
        assert!((balances[2] - 20166.666_666).abs() < 1e-3);

        for cluster in &clusters {
            assert_eq!(cluster.sample_coordinates.len(), cluster.size);
            assert_eq!(cluster.features.len(), 3);
        }
    }

    #[test]
    fn test_segment_is_deterministic() {
        let store = store_with(DatasetKind::Banking, BANKING);
        let registry = SchemaRegistry::new();
        let config = EngineConfig::default();

        let first = segment(&store, &registry, DatasetKind::Banking, 2, &config).unwrap();
        let second = segment(&store, &registry, DatasetKind::Banking, 2, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_segment_drops_incomplete_rows() {
        let csv = "customer_id,age,account_balance,transaction_count,products_used,churn_flag\n\
            C1,25,500,2,1,1\n\
            C2,31,,3,1,1\n\
            C3,45,700,NA,1,0\n\
            C4,52,20000,40,3,0\n";
        let store = store_with(DatasetKind::Banking, csv);
        let clusters = segment(
            &store,
            &SchemaRegistry::new(),
            DatasetKind::Banking,
            2,
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(clusters.iter().map(|c| c.size).sum::<usize>(), 2);
    }

    #[test]
    fn test_segment_errors() {
        let registry = SchemaRegistry::new();
        let config = EngineConfig::default();

        // No usable rows at all.
        let store = DatasetStore::new();
        assert!(matches!(
            segment(&store, &registry, DatasetKind::Content, 3, &config),
            Err(Error::InsufficientData(_))
        ));

        // Kind without a feature set.
        assert!(matches!(
            segment(&store, &registry, DatasetKind::Transactions, 2, &config),
            Err(Error::UnsupportedKind(_))
        ));

        // More clusters than distinct vectors.
        let csv = "customer_id,age,account_balance,transaction_count,products_used,churn_flag\n\
            C1,25,500,2,1,1\n\
            C2,31,500,2,1,1\n\
            C3,45,900,5,2,0\n";
        let store = store_with(DatasetKind::Banking, csv);
        assert!(matches!(
            segment(&store, &registry, DatasetKind::Banking, 3, &config),
            Err(Error::InsufficientData(_))
        ));
        assert!(matches!(
            segment(&store, &registry, DatasetKind::Banking, 0, &config),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cluster_sizes_and_inertia() {
        let features = Array2::from_shape_vec((3, 2), vec![-1.0, -1.0, 1.0, 1.0, 1.0, 3.0]).unwrap();
        let labels = Array1::from(vec![0, 1, 1]);
        let centroids = Array2::from_shape_vec((2, 2), vec![-1.0, -1.0, 1.0, 2.0]).unwrap();
        let model = KMeansModel {
            n_clusters: 2,
            inertia: compute_inertia(&features, &labels, &centroids),
            labels,
            centroids,
        };
        assert_eq!(model.cluster_sizes(), vec![1, 2]);
        assert!((model.inertia - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_infinite_features_are_incomplete() {
        let csv = "customer_id,age,account_balance,transaction_count,products_used,churn_flag\n\
            C1,25,inf,2,1,1\n\
            C2,31,inf,3,1,1\n\
            C3,45,inf,4,2,0\n\
            C4,52,20000,40,3,0\n";
        let store = store_with(DatasetKind::Banking, csv);
        let result = segment(
            &store,
            &SchemaRegistry::new(),
            DatasetKind::Banking,
            3,
            &EngineConfig::default(),
        );
        assert!(matches!(result, Err(Error::InsufficientData(_))));
    }

    #[test]
    fn test_empty_cluster_is_an_error() {
        let raw = Array2::from_shape_vec((2, 1), vec![1.0, 2.0]).unwrap();
        let matrix = FeatureMatrix {
            features: vec!["views".to_string()],
            raw,
            ids: vec![None, None],
        };
        let model = KMeansModel {
            n_clusters: 2,
            labels: Array1::from(vec![0, 0]),
            centroids: Array2::zeros((2, 1)),
            inertia: 0.0,
        };
        assert!(matches!(summarize(&matrix, &model, 5), Err(Error::InsufficientData(_))));
    }

    #[test]
    fn test_cluster_label() {
        let features = vec!["views".to_string(), "likes".to_string()];
        let centroid = Array1::from(vec![0.1, -1.4]);
        assert_eq!(cluster_label(&centroid.view(), &features), "Low likes");
        let centroid = Array1::from(vec![0.1, 0.05]);
        assert_eq!(cluster_label(&centroid.view(), &features), "Typical");
    }
}
