use serde::{Deserialize, Serialize};

use super::features::FeatureMatrix;
use crate::{
    error::{PipelineError, Result},
    frame::Frame,
};

/// Anything that maps named feature vectors to predictions.
pub trait Regressor {
    /// Feature columns, in the order `predict` expects them.
    fn feature_names(&self) -> &[String];

    /// One prediction per row.
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>>;
}

/// Scores for one model on one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Human label, e.g. `PRIORITY validation`.
    pub label: String,
    /// Rows scored.
    pub samples: usize,
    /// Mean absolute error.
    pub mae: f64,
    /// Coefficient of determination.
    pub r2: f64,
}

impl EvaluationReport {
    /// Console block.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "── {} ──\n  MAE : {:.4}\n  R²  : {:.4}",
            self.label, self.mae, self.r2
        )
    }
}

/// Mean of `|truth - prediction|`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_absolute_error(truth: &[f64], predictions: &[f64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    truth
        .iter()
        .zip(predictions)
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / truth.len() as f64
}

/// `1 - SS_res / SS_tot`. A constant truth scores 1.0 when predicted
/// exactly and 0.0 otherwise.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::float_cmp)]
pub fn r2_score(truth: &[f64], predictions: &[f64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let mean = truth.iter().sum::<f64>() / truth.len() as f64;
    let ss_res: f64 = truth
        .iter()
        .zip(predictions)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = truth.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Scores `model` on a feature matrix against the true targets.
pub fn evaluate<R: Regressor + ?Sized>(
    model: &R,
    features: &[Vec<f64>],
    targets: &[f64],
    label: &str,
) -> Result<EvaluationReport> {
    if features.is_empty() {
        return Err(PipelineError::EmptyPartition(label.to_string()));
    }
    let predictions = model.predict(features)?;
    if predictions.len() != targets.len() || features.len() != targets.len() {
        return Err(PipelineError::Model(format!(
            "{} predictions for {} rows and {} targets",
            predictions.len(),
            features.len(),
            targets.len()
        )));
    }
    Ok(EvaluationReport {
        label: label.to_string(),
        samples: targets.len(),
        mae: mean_absolute_error(targets, &predictions),
        r2: r2_score(targets, &predictions),
    })
}

/// Scores `model` on the selected rows of `frame` (all rows when `rows` is
/// `None`), looking features up by the model's own column names.
pub fn evaluate_frame<R: Regressor + ?Sized>(
    model: &R,
    frame: &Frame,
    target: &str,
    rows: Option<&[usize]>,
    label: &str,
) -> Result<EvaluationReport> {
    let matrix = FeatureMatrix::from_frame(frame, model.feature_names(), target, rows, label)?;
    evaluate(model, &matrix.rows, &matrix.targets, label)
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::frame::Column;

    struct Offset {
        names: Vec<String>,
        offset: f64,
    }

    impl Regressor for Offset {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
            Ok(features.iter().map(|row| row[0] + self.offset).collect())
        }
    }

    fn frame() -> Frame {
        Frame::from_columns([
            ("cpu", Column::Numeric(vec![Some(1.0), Some(2.0), Some(3.0)])),
            ("extra", Column::Numeric(vec![Some(9.0), Some(9.0), Some(9.0)])),
            ("load_avg_1", Column::Numeric(vec![Some(1.0), Some(2.0), Some(3.0)])),
        ])
        .unwrap()
    }

    #[test]
    fn perfect_model_scores_zero_error_and_unit_r2() {
        let model = Offset {
            names: vec!["cpu".into()],
            offset: 0.0,
        };
        let report = evaluate_frame(&model, &frame(), "load_avg_1", None, "Test").unwrap();
        assert_eq!(report.samples, 3);
        assert_eq!(report.mae, 0.0);
        assert_eq!(report.r2, 1.0);
        assert!(report.summary().contains("MAE : 0.0000"));
    }

    #[test]
    fn shifted_predictions_lower_the_score() {
        let model = Offset {
            names: vec!["cpu".into()],
            offset: 1.0,
        };
        let report =
            evaluate_frame(&model, &frame(), "load_avg_1", Some(&[0, 2]), "Val").unwrap();
        assert_eq!(report.samples, 2);
        assert!((report.mae - 1.0).abs() < 1e-12);
        assert!(report.r2 < 1.0);
    }

    #[test]
    fn constant_truth_convention() {
        assert_eq!(r2_score(&[2.0, 2.0], &[2.0, 2.0]), 1.0);
        assert_eq!(r2_score(&[2.0, 2.0], &[1.0, 3.0]), 0.0);
        assert_eq!(mean_absolute_error(&[2.0, 2.0], &[1.0, 3.0]), 1.0);
    }

    #[test]
    fn empty_input_is_an_error() {
        let model = Offset {
            names: vec!["cpu".into()],
            offset: 0.0,
        };
        let err = evaluate(&model, &[], &[], "PRIORITY Test").unwrap_err();
        assert!(matches!(err, PipelineError::EmptyPartition(_)));
    }

    #[test]
    fn missing_feature_column_is_an_error() {
        let model = Offset {
            names: vec!["memory".into()],
            offset: 0.0,
        };
        let err = evaluate_frame(&model, &frame(), "load_avg_1", None, "Test").unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { column, .. } if column == "memory"));
    }
}
