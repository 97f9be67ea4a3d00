//! Retrainable anomaly model capability.
//!
//! The scorer only depends on two traits:
//!
//! - [`ModelTrainer::fit`] turns a set of feature vectors into a new model
//!   (or a [`ModelError`], leaving whatever model was serving untouched).
//! - [`AnomalyModel::predict`] labels a batch of vectors anomalous / normal.
//!
//! [`IsolationForestTrainer`] is the production implementation; tests plug in
//! their own trainers to inject fit failures.

pub mod isolation_forest;

pub use isolation_forest::{IsolationForest, IsolationForestTrainer};

use thiserror::Error;

use crate::types::FeatureVector;

/// Errors from fitting or applying a model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Insufficient training data: have {have} vectors, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("Dimension mismatch at row {row}: expected {expected} features, found {found}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Non-finite value at row {row}, feature {feature}")]
    NonFinite { row: usize, feature: usize },

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Fit failed: {0}")]
    Fit(String),
}

/// A fitted scoring function.
pub trait AnomalyModel: Send + Sync {
    /// Label each vector: `true` = anomalous.
    ///
    /// Every vector must have [`dimensions`](Self::dimensions) finite values.
    fn predict(&self, vectors: &[FeatureVector]) -> Result<Vec<bool>, ModelError>;

    /// Feature arity the model was fit on.
    fn dimensions(&self) -> usize;

    /// Short algorithm name for logging.
    fn name(&self) -> &str;
}

/// Builds fresh models from training data.
pub trait ModelTrainer: Send + Sync {
    type Model: AnomalyModel;

    fn fit(&self, vectors: &[FeatureVector]) -> Result<Self::Model, ModelError>;
}

/// Check a training/scoring matrix for shape and finiteness.
///
/// With `expected = None` the arity is taken from the first row.
/// Returns the arity.
pub fn validate_matrix(
    vectors: &[FeatureVector],
    expected: Option<usize>,
) -> Result<usize, ModelError> {
    let dims = match (expected, vectors.first()) {
        (Some(d), _) => d,
        (None, Some(first)) => first.len(),
        (None, None) => return Ok(0),
    };
    if dims == 0 {
        return Err(ModelError::DimensionMismatch {
            row: 0,
            expected: 1,
            found: 0,
        });
    }
    for (row, v) in vectors.iter().enumerate() {
        if v.len() != dims {
            return Err(ModelError::DimensionMismatch {
                row,
                expected: dims,
                found: v.len(),
            });
        }
        if let Some(feature) = v.iter().position(|x| !x.is_finite()) {
            return Err(ModelError::NonFinite { row, feature });
        }
    }
    Ok(dims)
}
