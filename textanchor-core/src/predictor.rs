//! Predictor adapter.
//!
//! A black-box classifier may return one class index per input or one score
//! row per input. [`PredictorAdapter`] probes the classifier once and, when it
//! returns score rows, wraps it so that every call yields class indices.

use crate::error::{AnchorError, BoxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Raw output of a text classifier for a batch of inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PredictorOutput {
    /// One class index per input.
    Labels(Vec<i64>),
    /// One row of class scores (probabilities, logits) per input.
    Scores(Vec<Vec<f64>>),
    /// Untyped output, e.g. decoded from a model server response. Must be a
    /// rectangular numeric array of one or two dimensions.
    Json(serde_json::Value),
}

/// A black-box text classifier.
pub trait TextClassifier: Send + Sync {
    fn predict(&self, texts: &[String]) -> std::result::Result<PredictorOutput, BoxError>;
}

impl<F> TextClassifier for F
where
    F: Fn(&[String]) -> std::result::Result<PredictorOutput, BoxError> + Send + Sync,
{
    fn predict(&self, texts: &[String]) -> std::result::Result<PredictorOutput, BoxError> {
        self(texts)
    }
}

/// Rectangular numeric view of a predictor output.
#[derive(Debug, Clone, PartialEq)]
enum OutputArray {
    Vector(Vec<f64>),
    Matrix {
        rows: usize,
        cols: usize,
        values: Vec<f64>,
    },
}

impl OutputArray {
    fn from_output(output: PredictorOutput) -> Result<Self> {
        match output {
            PredictorOutput::Labels(labels) => {
                Ok(Self::Vector(labels.into_iter().map(|l| l as f64).collect()))
            }
            PredictorOutput::Scores(rows) => Self::from_rows(rows),
            PredictorOutput::Json(value) => Self::from_json(&value),
        }
    }

    fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_rows = rows.len();
        let cols = rows.first().map_or(0, Vec::len);
        let mut values = Vec::with_capacity(n_rows * cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(AnchorError::return_type(format!(
                    "score rows must have equal length, row {i} has {} values instead of {cols}",
                    row.len()
                )));
            }
            values.extend(row);
        }
        Ok(Self::Matrix {
            rows: n_rows,
            cols,
            values,
        })
    }

    fn from_json(value: &serde_json::Value) -> Result<Self> {
        let items = value.as_array().ok_or_else(|| {
            AnchorError::return_type(format!(
                "expected a numeric array, got {}",
                json_kind(value)
            ))
        })?;

        if items.iter().all(serde_json::Value::is_number) {
            let values = items.iter().filter_map(serde_json::Value::as_f64).collect();
            return Ok(Self::Vector(values));
        }

        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let row = item.as_array().ok_or_else(|| {
                AnchorError::return_type(format!(
                    "expected numbers or numeric rows, found {}",
                    json_kind(item)
                ))
            })?;
            let mut parsed = Vec::with_capacity(row.len());
            for cell in row {
                let number = cell.as_f64().ok_or_else(|| {
                    AnchorError::return_type(format!(
                        "expected a numeric value, found {}",
                        json_kind(cell)
                    ))
                })?;
                parsed.push(number);
            }
            rows.push(parsed);
        }
        Self::from_rows(rows)
    }

    fn batch_len(&self) -> usize {
        match self {
            Self::Vector(values) => values.len(),
            Self::Matrix { rows, .. } => *rows,
        }
    }

    fn shape(&self) -> Vec<usize> {
        match self {
            Self::Vector(values) => vec![values.len()],
            Self::Matrix { rows, cols, .. } => vec![*rows, *cols],
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn to_class_index(value: f64) -> Result<i64> {
    if value.is_finite() && value.fract() == 0.0 {
        Ok(value as i64)
    } else {
        Err(AnchorError::return_type(format!(
            "class indices must be integral, got {value}"
        )))
    }
}

/// Index of the first maximum, matching `numpy.argmax`.
pub fn argmax(row: &[f64]) -> usize {
    let mut best = 0;
    for (i, value) in row.iter().enumerate().skip(1) {
        if *value > row[best] {
            best = i;
        }
    }
    best
}

/// How raw classifier outputs are turned into class indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The classifier already returns one class index per input.
    ClassIndex,
    /// The classifier returns score rows; take the argmax of each row.
    Argmax,
}

/// Classifier wrapper that always yields one class index per input.
#[derive(Clone)]
pub struct PredictorAdapter {
    inner: Arc<dyn TextClassifier>,
    mode: OutputMode,
}

impl fmt::Debug for PredictorAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictorAdapter")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl PredictorAdapter {
    /// Input used to probe the classifier's output shape.
    pub const PROBE: &'static str = "Hello world";

    /// Probe `classifier` and pick the output mode from the returned shape.
    pub fn new(classifier: Arc<dyn TextClassifier>) -> Result<Self> {
        let probe = vec![Self::PROBE.to_string()];
        let output = classifier.predict(&probe).map_err(|e| {
            AnchorError::predictor_call(
                format!(
                    "predictor failed to be called on x={probe:?}; check that it accepts a batch of strings"
                ),
                e,
            )
        })?;
        let array = OutputArray::from_output(output)?;
        let shape = array.shape();

        // The batch axis is the largest one (first on ties).
        let mode = match array {
            OutputArray::Vector(_) => OutputMode::ClassIndex,
            OutputArray::Matrix { rows, cols, .. } if rows >= cols => OutputMode::ClassIndex,
            OutputArray::Matrix { .. } => OutputMode::Argmax,
        };
        debug!(?shape, ?mode, "Probed predictor output");

        Ok(Self {
            inner: classifier,
            mode,
        })
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Predict class indices for a batch of texts in a single classifier call.
    pub fn predict(&self, texts: &[String]) -> Result<Vec<i64>> {
        let output = self.inner.predict(texts).map_err(|e| {
            AnchorError::predictor_call(
                format!("predictor failed on a batch of {} texts", texts.len()),
                e,
            )
        })?;
        let array = OutputArray::from_output(output)?;
        if array.batch_len() != texts.len() {
            return Err(AnchorError::return_type(format!(
                "expected {} predictions, got {}",
                texts.len(),
                array.batch_len()
            )));
        }

        match (self.mode, array) {
            (OutputMode::ClassIndex, OutputArray::Vector(values)) => {
                values.into_iter().map(to_class_index).collect()
            }
            (OutputMode::ClassIndex, OutputArray::Matrix { cols: 1, values, .. }) => {
                values.into_iter().map(to_class_index).collect()
            }
            (OutputMode::Argmax, OutputArray::Matrix { cols, values, .. }) if cols > 0 => Ok(
                values
                    .chunks(cols)
                    .map(|row| argmax(row) as i64)
                    .collect(),
            ),
            (mode, array) => Err(AnchorError::return_type(format!(
                "output of shape {:?} does not match the probed {mode:?} mode",
                array.shape()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classifier<F>(f: F) -> Arc<dyn TextClassifier>
    where
        F: Fn(&[String]) -> std::result::Result<PredictorOutput, BoxError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_label_predictor_is_used_unmodified() {
        let adapter = PredictorAdapter::new(classifier(|batch| {
            Ok(PredictorOutput::Labels(
                batch.iter().map(|t| t.len() as i64 % 3).collect(),
            ))
        }))
        .unwrap();
        assert_eq!(adapter.mode(), OutputMode::ClassIndex);
        assert_eq!(adapter.predict(&texts(&["a", "bb", "ccc"])).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_score_predictor_is_wrapped_with_argmax() {
        let adapter = PredictorAdapter::new(classifier(|batch| {
            Ok(PredictorOutput::Scores(
                batch
                    .iter()
                    .map(|t| {
                        if t.contains("good") {
                            vec![0.1, 0.9]
                        } else {
                            vec![0.8, 0.2]
                        }
                    })
                    .collect(),
            ))
        }))
        .unwrap();
        assert_eq!(adapter.mode(), OutputMode::Argmax);
        assert_eq!(
            adapter.predict(&texts(&["good film", "bad film"])).unwrap(),
            vec![1, 0]
        );
    }

    #[test]
    fn test_single_column_scores_are_class_indices() {
        let adapter = PredictorAdapter::new(classifier(|batch| {
            Ok(PredictorOutput::Scores(vec![vec![2.0]; batch.len()]))
        }))
        .unwrap();
        assert_eq!(adapter.mode(), OutputMode::ClassIndex);
        assert_eq!(adapter.predict(&texts(&["x", "y"])).unwrap(), vec![2, 2]);
    }

    #[test]
    fn test_json_output_is_accepted() {
        let adapter = PredictorAdapter::new(classifier(|batch| {
            Ok(PredictorOutput::Json(json!(vec![[0.3, 0.7]; batch.len()])))
        }))
        .unwrap();
        assert_eq!(adapter.mode(), OutputMode::Argmax);
        assert_eq!(adapter.predict(&texts(&["x"])).unwrap(), vec![1]);
    }

    #[test]
    fn test_failing_predictor_reports_call_error() {
        let err = PredictorAdapter::new(classifier(|_| Err("model offline".into()))).unwrap_err();
        match err {
            AnchorError::PredictorCall { source, .. } => {
                assert_eq!(source.to_string(), "model offline")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_output_is_rejected() {
        let err = PredictorAdapter::new(classifier(|_| {
            Ok(PredictorOutput::Json(json!(["positive"])))
        }))
        .unwrap_err();
        assert!(matches!(err, AnchorError::PredictorReturnType { .. }));

        let err = PredictorAdapter::new(classifier(|_| {
            Ok(PredictorOutput::Json(json!({"label": 1})))
        }))
        .unwrap_err();
        assert!(matches!(err, AnchorError::PredictorReturnType { .. }));
    }

    #[test]
    fn test_ragged_scores_are_rejected() {
        let err = PredictorAdapter::new(classifier(|_| {
            Ok(PredictorOutput::Scores(vec![vec![0.1, 0.9], vec![0.5]]))
        }))
        .unwrap_err();
        assert!(matches!(err, AnchorError::PredictorReturnType { .. }));
    }

    #[test]
    fn test_wrong_batch_length_is_rejected() {
        let adapter = PredictorAdapter::new(classifier(|_| Ok(PredictorOutput::Labels(vec![1]))))
            .unwrap();
        let err = adapter.predict(&texts(&["a", "b"])).unwrap_err();
        assert!(matches!(err, AnchorError::PredictorReturnType { .. }));
    }

    #[test]
    fn test_argmax_takes_first_maximum() {
        assert_eq!(argmax(&[0.2, 0.5, 0.5]), 1);
        assert_eq!(argmax(&[1.0]), 0);
    }
}
