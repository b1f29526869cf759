//! clusterlens: helpers for a counterfactual-explanation demo
//!
//! This library renders 2-D clustering results with optional query and
//! counterfactual overlays, and prepares a class-balanced loan-default dataset
//! for training a classifier.

pub mod cli;
pub mod data;
pub mod error;
pub mod model;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{load_loan_data, load_points, LoanDataConfig, LoanSplit};
pub use error::PlotError;
pub use model::{fit_kmeans, Classifier, KMeansModel, KnnClassifier};
pub use viz::{build_figure, plot_clusters, ClusterFigure, PlotStyle, QueryMode};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
