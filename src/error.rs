//! Typed errors for cluster plot input validation

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PlotError {
    #[error("Point set is empty")]
    EmptyPoints,

    #[error("Cluster plots need 2-D points, got {0} columns")]
    NotTwoDimensional(usize),

    #[error("Point set has {points} rows but label vector has {labels}")]
    LengthMismatch { points: usize, labels: usize },

    #[error("Classifier returned {got} predictions for {expected} points")]
    PredictionCount { expected: usize, got: usize },

    #[error("No points were predicted into cluster {0}")]
    EmptyCluster(usize),
}
