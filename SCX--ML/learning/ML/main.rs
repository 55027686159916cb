//! Random-forest regression: fitting, persistence and scoring.

/// Feature matrices built from preprocessed frames.
pub mod features;
/// Sharded random-forest regressor.
pub mod forest;
/// Persisted model files.
pub mod artifact;
/// MAE / R² scoring.
pub mod evaluator;
/// Single and per-scheduler training runs.
pub mod trainer;
