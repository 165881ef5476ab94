//! Sampler bridge between the beam search and a perturbation engine.
//!
//! For every candidate anchor the search asks for, the bridge generates
//! perturbed texts, labels them against the instance's predicted class in a
//! single predictor call and keeps a bounded number of examples of each
//! label.

use crate::error::{AnchorError, Result};
use crate::perturb::{BinaryMatrix, Perturbation};
use crate::predictor::PredictorAdapter;
use crate::search::{AnchorSampler, SampleBatch};
use rand::rngs::StdRng;
use tracing::trace;

/// Values that only live for one `explain` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Predicted class of the instance being explained.
    pub instance_label: i64,
    /// Covered examples kept per label.
    pub n_covered_ex: usize,
}

/// Coverage reported by the bridge; the search computes its own.
pub const COVERAGE_SENTINEL: f64 = -1.0;

pub struct SamplerBridge<'a> {
    perturbation: &'a mut Perturbation,
    predictor: &'a PredictorAdapter,
    rng: &'a mut StdRng,
    ctx: RequestContext,
}

impl<'a> SamplerBridge<'a> {
    pub fn new(
        perturbation: &'a mut Perturbation,
        predictor: &'a PredictorAdapter,
        rng: &'a mut StdRng,
        ctx: RequestContext,
    ) -> Self {
        Self {
            perturbation,
            predictor,
            rng,
            ctx,
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }
}

/// Both the raw samples and the mask must hold exactly `num_samples` rows.
fn check_batch(raw: &[String], mask: &BinaryMatrix, num_samples: usize) -> Result<()> {
    if mask.rows() != num_samples {
        return Err(AnchorError::SamplerContract {
            what: "mask rows",
            expected: num_samples,
            got: mask.rows(),
        });
    }
    if raw.len() != num_samples {
        return Err(AnchorError::SamplerContract {
            what: "raw samples",
            expected: num_samples,
            got: raw.len(),
        });
    }
    Ok(())
}

impl AnchorSampler for SamplerBridge<'_> {
    fn sample(
        &mut self,
        anchor_idx: usize,
        anchor: &[usize],
        num_samples: usize,
        compute_labels: bool,
    ) -> Result<SampleBatch> {
        let (raw, mask) = self.perturbation.generate(anchor, num_samples, self.rng)?;
        check_batch(&raw, &mask, num_samples)?;
        if !compute_labels {
            return Ok(SampleBatch::Mask(mask));
        }

        let predictions = self.predictor.predict(&raw)?;
        let labels: Vec<bool> = predictions
            .iter()
            .map(|&p| p == self.ctx.instance_label)
            .collect();

        let limit = self.ctx.n_covered_ex;
        let mut covered_true = Vec::with_capacity(limit.min(num_samples));
        let mut covered_false = Vec::with_capacity(limit.min(num_samples));
        for (text, &label) in raw.into_iter().zip(&labels) {
            let bucket = if label {
                &mut covered_true
            } else {
                &mut covered_false
            };
            if bucket.len() < limit {
                bucket.push(text);
            }
        }
        trace!(
            anchor_idx,
            anchor = ?anchor,
            num_samples,
            positives = labels.iter().filter(|l| **l).count(),
            "Labeled samples"
        );

        Ok(SampleBatch::Labeled {
            covered_true,
            covered_false,
            labels,
            mask,
            coverage: COVERAGE_SENTINEL,
            anchor_idx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::predictor::PredictorOutput;
    use crate::strategy::{PerturbOptions, UnknownOptions};
    use rand::SeedableRng;
    use std::sync::Arc;

    fn keyword_predictor() -> PredictorAdapter {
        let classifier = |texts: &[String]| -> std::result::Result<PredictorOutput, BoxError> {
            Ok(PredictorOutput::Labels(
                texts.iter().map(|t| i64::from(t.contains("good"))).collect(),
            ))
        };
        PredictorAdapter::new(Arc::new(classifier)).unwrap()
    }

    fn engine() -> Perturbation {
        let mut engine =
            Perturbation::new(PerturbOptions::Unknown(UnknownOptions::default()), None, None)
                .unwrap();
        engine.bind("this movie is good");
        engine
    }

    #[test]
    fn test_mask_only_without_labels() {
        let mut engine = engine();
        let predictor = keyword_predictor();
        let mut rng = StdRng::seed_from_u64(0);
        let ctx = RequestContext {
            instance_label: 1,
            n_covered_ex: 5,
        };
        let mut bridge = SamplerBridge::new(&mut engine, &predictor, &mut rng, ctx);
        let batch = bridge.sample(0, &[], 40, false).unwrap();
        assert!(matches!(batch, SampleBatch::Mask(ref m) if m.rows() == 40));
    }

    #[test]
    fn test_labels_and_bounded_examples() {
        let mut engine = engine();
        let predictor = keyword_predictor();
        let mut rng = StdRng::seed_from_u64(1);
        let ctx = RequestContext {
            instance_label: 1,
            n_covered_ex: 3,
        };
        let mut bridge = SamplerBridge::new(&mut engine, &predictor, &mut rng, ctx);
        let SampleBatch::Labeled {
            covered_true,
            covered_false,
            labels,
            mask,
            coverage,
            anchor_idx,
        } = bridge.sample(4, &[], 50, true).unwrap()
        else {
            panic!("expected a labeled batch");
        };
        assert_eq!(anchor_idx, 4);
        assert_eq!(coverage, COVERAGE_SENTINEL);
        assert_eq!(labels.len(), 50);
        for (row, label) in labels.iter().enumerate() {
            assert_eq!(*label, mask.get(row, 3));
        }
        assert_eq!(covered_true.len(), 3);
        assert_eq!(covered_false.len(), 3);
        assert!(covered_true.iter().all(|t| t.ends_with("good")));
        assert!(covered_false.iter().all(|t| t.ends_with("UNK")));
    }

    #[test]
    fn test_batch_row_counts_are_checked() {
        let raw: Vec<String> = vec!["a".into(), "b".into()];
        assert!(check_batch(&raw, &BinaryMatrix::ones(2, 4), 2).is_ok());
        assert!(matches!(
            check_batch(&raw, &BinaryMatrix::ones(3, 4), 2),
            Err(AnchorError::SamplerContract { what: "mask rows", expected: 2, got: 3 })
        ));
        assert!(matches!(
            check_batch(&raw, &BinaryMatrix::ones(3, 4), 3),
            Err(AnchorError::SamplerContract { what: "raw samples", expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_predictor_failure_propagates() {
        let mut engine = engine();
        // Answers the probe, then fails.
        let flaky = |texts: &[String]| -> std::result::Result<PredictorOutput, BoxError> {
            if texts.len() == 1 && texts[0] == PredictorAdapter::PROBE {
                Ok(PredictorOutput::Labels(vec![0]))
            } else {
                Err("model offline".into())
            }
        };
        let predictor = PredictorAdapter::new(Arc::new(flaky)).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let ctx = RequestContext {
            instance_label: 0,
            n_covered_ex: 1,
        };
        let mut bridge = SamplerBridge::new(&mut engine, &predictor, &mut rng, ctx);
        let err = bridge.sample(0, &[3], 5, true).unwrap_err();
        assert!(matches!(err, AnchorError::PredictorCall { .. }));
    }
}
