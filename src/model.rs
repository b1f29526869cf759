//! Classifiers used to assign points to clusters
//!
//! The plotter only needs something that can `predict`. Two implementations are
//! provided: a k-nearest-neighbour vote over labelled points, and a k-means
//! model that labels unlabelled point sets by nearest centroid.

use std::collections::{BTreeMap, BTreeSet};

use linfa::traits::Fit;
use linfa::Dataset;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use linfa_nn::{KdTree, NearestNeighbour};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::PlotError;

/// Anything that can assign a cluster label to each row of a point set
pub trait Classifier {
    /// Predict one label per row of `points`
    fn predict(&self, points: &Array2<f64>) -> crate::Result<Array1<usize>>;
}

/// Majority vote over the `k` nearest labelled training points
#[derive(Debug, Clone)]
pub struct KnnClassifier {
    points: Array2<f64>,
    labels: Array1<usize>,
    k: usize,
}

impl KnnClassifier {
    /// Store the training set for later neighbour queries
    pub fn fit(points: &Array2<f64>, labels: &Array1<usize>, k: usize) -> crate::Result<Self> {
        if points.nrows() == 0 {
            anyhow::bail!("Cannot fit a k-NN classifier on an empty training set");
        }
        if points.nrows() != labels.len() {
            anyhow::bail!(
                "Training set has {} rows but {} labels",
                points.nrows(),
                labels.len()
            );
        }
        if k == 0 || k > points.nrows() {
            anyhow::bail!(
                "Number of neighbours must be between 1 and {} (got {})",
                points.nrows(),
                k
            );
        }

        Ok(Self {
            points: points.to_owned(),
            labels: labels.to_owned(),
            k,
        })
    }
}

impl Classifier for KnnClassifier {
    fn predict(&self, points: &Array2<f64>) -> crate::Result<Array1<usize>> {
        if points.ncols() != self.points.ncols() {
            anyhow::bail!(
                "Query points have {} features but the classifier was fitted on {}",
                points.ncols(),
                self.points.ncols()
            );
        }

        let index = KdTree.from_batch(&self.points, L2Dist)?;

        let mut predictions = Vec::with_capacity(points.nrows());
        for row in points.outer_iter() {
            let neighbours = index.k_nearest(row, self.k)?;
            let votes = neighbours
                .iter()
                .map(|(_, idx)| self.labels[*idx])
                .fold(BTreeMap::new(), |mut counts, label| {
                    *counts.entry(label).or_insert(0usize) += 1;
                    counts
                });
            predictions.push(majority_label(&votes));
        }

        Ok(Array1::from_vec(predictions))
    }
}

/// Most frequent label; ties go to the smallest label
fn majority_label(votes: &BTreeMap<usize, usize>) -> usize {
    let mut best = (0, 0);
    for (&label, &count) in votes {
        if count > best.1 {
            best = (label, count);
        }
    }
    best.0
}

/// K-Means model wrapper with fitted parameters
#[derive(Debug)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments for training data
    pub labels: Array1<usize>,
    /// Cluster centroids, one row per cluster
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
}

impl KMeansModel {
    /// Index of the centroid closest to `point`
    pub fn nearest_centroid(&self, point: &ArrayView1<f64>) -> usize {
        let mut min_distance = f64::INFINITY;
        let mut closest_cluster = 0;

        for (cluster_idx, centroid) in self.centroids.outer_iter().enumerate() {
            let distance = euclidean_distance(point, &centroid);
            if distance < min_distance {
                min_distance = distance;
                closest_cluster = cluster_idx;
            }
        }

        closest_cluster
    }

    /// Get cluster sizes
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

impl Classifier for KMeansModel {
    fn predict(&self, points: &Array2<f64>) -> crate::Result<Array1<usize>> {
        if points.ncols() != self.centroids.ncols() {
            anyhow::bail!(
                "Points have {} dimensions but centroids have {}",
                points.ncols(),
                self.centroids.ncols()
            );
        }
        Ok(points
            .outer_iter()
            .map(|row| self.nearest_centroid(&row))
            .collect())
    }
}

/// Fit K-Means on a point set with a seeded RNG
///
/// # Arguments
/// * `points` - One row per sample
/// * `n_clusters` - Number of clusters, at most the number of points
/// * `max_iters` - Maximum iterations for convergence
/// * `tolerance` - Convergence tolerance
/// * `seed` - Seed for centroid initialisation
pub fn fit_kmeans(
    points: &Array2<f64>,
    n_clusters: usize,
    max_iters: usize,
    tolerance: f64,
    seed: u64,
) -> crate::Result<KMeansModel> {
    if n_clusters == 0 {
        anyhow::bail!("Number of clusters must be at least 1");
    }

    if points.nrows() < n_clusters {
        anyhow::bail!(
            "Number of data points ({}) must be at least equal to number of clusters ({})",
            points.nrows(),
            n_clusters
        );
    }

    let n_samples = points.nrows();
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(points.to_owned(), targets);

    let model = KMeans::params_with(n_clusters, StdRng::seed_from_u64(seed), L2Dist)
        .max_n_iterations(max_iters as u64)
        .tolerance(tolerance)
        .fit(&dataset)?;

    let labels: Array1<usize> = linfa::traits::Predict::predict(&model, points);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(points, &labels, &centroids);

    log::debug!(
        "k-means fitted: {} clusters, inertia {:.3}",
        n_clusters,
        inertia
    );

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Mean position of the points predicted into one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    pub label: usize,
    pub position: Array1<f64>,
}

/// Compute a centroid for every label in `cls` from the points predicted into it.
///
/// Fails with [`PlotError::EmptyCluster`] when a label received no predictions.
pub fn cluster_centroids(
    points: &Array2<f64>,
    predictions: &Array1<usize>,
    cls: &[usize],
) -> crate::Result<Vec<Centroid>> {
    cls.iter()
        .map(|&label| {
            let members: Vec<usize> = predictions
                .iter()
                .enumerate()
                .filter(|(_, &p)| p == label)
                .map(|(i, _)| i)
                .collect();

            let position = points
                .select(Axis(0), &members)
                .mean_axis(Axis(0))
                .ok_or(PlotError::EmptyCluster(label))?;

            Ok(Centroid { label, position })
        })
        .collect()
}

/// Sorted distinct labels
pub fn unique_labels(labels: &Array1<usize>) -> Vec<usize> {
    labels
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Fraction of positions where `predicted` matches `actual`
pub fn accuracy(predicted: &Array1<usize>, actual: &Array1<usize>) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let hits = predicted
        .iter()
        .zip(actual.iter())
        .filter(|(p, a)| p == a)
        .count();
    hits as f64 / actual.len() as f64
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(points: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;

    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            let distance = euclidean_distance(&points.row(i), &centroids.row(cluster));
            inertia += distance.powi(2);
        }
    }

    inertia
}

fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
