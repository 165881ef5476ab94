//! Property-based tests for the predictor adapter, the perturbation engines
//! and the sampler bridge.

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;

use textanchor_core::bridge::{RequestContext, SamplerBridge};
use textanchor_core::predictor::argmax;
use textanchor_core::strategy::{SimilarityOptions, UnknownOptions};
use textanchor_core::{
    AnchorSampler, BoxError, EmbeddingLexicon, Perturbation, PerturbOptions, PredictorAdapter,
    PredictorOutput, SampleBatch,
};

fn score_table() -> impl Strategy<Value = Vec<Vec<f64>>> {
    (2usize..6).prop_flat_map(|cols| {
        prop::collection::vec(prop::collection::vec(-10.0f64..10.0, cols), 1..24)
    })
}

/// Texts are row indices into `table`; the probe gets the first row.
fn table_predictor(table: Vec<Vec<f64>>) -> PredictorAdapter {
    let classifier = move |texts: &[String]| -> Result<PredictorOutput, BoxError> {
        Ok(PredictorOutput::Scores(
            texts
                .iter()
                .map(|t| table[t.parse::<usize>().unwrap_or(0)].clone())
                .collect(),
        ))
    };
    PredictorAdapter::new(Arc::new(classifier)).unwrap()
}

fn unknown_engine(sample_proba: f64, text: &str) -> Perturbation {
    let mut engine = Perturbation::new(
        PerturbOptions::Unknown(UnknownOptions { sample_proba }),
        None,
        None,
    )
    .unwrap();
    engine.bind(text);
    engine
}

fn similarity_engine(sample_proba: f64, text: &str) -> Perturbation {
    let lexicon = EmbeddingLexicon::parse(
        "good -5 1.0 0.0\ngreat -6 0.9 0.1\nmovie -5 0.0 1.0\nfilm -6 0.1 0.9\n",
    )
    .unwrap();
    let mut engine = Perturbation::new(
        PerturbOptions::Similarity(SimilarityOptions {
            sample_proba,
            ..Default::default()
        }),
        Some(Arc::new(lexicon)),
        None,
    )
    .unwrap();
    engine.bind(text);
    engine
}

const TEXT: &str = "the good movie was a great film";

// --- Predictor adapter properties ---

proptest! {
    #[test]
    fn adapter_matches_argmax_of_scores(table in score_table()) {
        let rows = table.len();
        let adapter = table_predictor(table.clone());
        let texts: Vec<String> = (0..rows).map(|i| i.to_string()).collect();
        let predicted = adapter.predict(&texts).unwrap();
        prop_assert_eq!(predicted.len(), rows);
        for (row, label) in table.iter().zip(predicted) {
            prop_assert_eq!(label, argmax(row) as i64);
        }
    }
}

// --- Perturbation properties ---

proptest! {
    #[test]
    fn unknown_masks_have_one_row_per_sample(
        num_samples in 0usize..60,
        sample_proba in 0.0f64..=1.0,
        anchor in prop::collection::btree_set(0usize..7, 0..4),
        seed in any::<u64>(),
    ) {
        let mut engine = unknown_engine(sample_proba, TEXT);
        let anchor: Vec<usize> = anchor.into_iter().collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let (raw, mask) = engine.generate(&anchor, num_samples, &mut rng).unwrap();
        prop_assert_eq!(raw.len(), num_samples);
        prop_assert_eq!(mask.rows(), num_samples);
        prop_assert_eq!(mask.cols(), 7);
        for row in 0..num_samples {
            prop_assert!(mask.row_contains_all(row, &anchor));
        }
    }

    #[test]
    fn similarity_masks_have_one_row_per_sample(
        num_samples in 0usize..60,
        sample_proba in 0.0f64..=1.0,
        anchor in prop::collection::btree_set(0usize..7, 0..4),
        seed in any::<u64>(),
    ) {
        let mut engine = similarity_engine(sample_proba, TEXT);
        let anchor: Vec<usize> = anchor.into_iter().collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let (raw, mask) = engine.generate(&anchor, num_samples, &mut rng).unwrap();
        prop_assert_eq!(raw.len(), num_samples);
        prop_assert_eq!(mask.rows(), num_samples);
        for row in 0..num_samples {
            prop_assert!(mask.row_contains_all(row, &anchor));
        }
    }
}

// --- Sampler bridge properties ---

proptest! {
    #[test]
    fn covered_examples_are_bounded(
        num_samples in 1usize..80,
        n_covered_ex in 0usize..20,
        seed in any::<u64>(),
    ) {
        let mut engine = unknown_engine(0.5, TEXT);
        let keyword = |texts: &[String]| -> Result<PredictorOutput, BoxError> {
            Ok(PredictorOutput::Labels(
                texts.iter().map(|t| i64::from(t.contains("good"))).collect(),
            ))
        };
        let predictor = PredictorAdapter::new(Arc::new(keyword)).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let ctx = RequestContext { instance_label: 1, n_covered_ex };
        let mut bridge = SamplerBridge::new(&mut engine, &predictor, &mut rng, ctx);

        match bridge.sample(0, &[], num_samples, true).unwrap() {
            SampleBatch::Labeled { covered_true, covered_false, labels, coverage, .. } => {
                prop_assert!(covered_true.len() <= n_covered_ex);
                prop_assert!(covered_false.len() <= n_covered_ex);
                prop_assert!(covered_true.len() + covered_false.len() <= num_samples);
                prop_assert_eq!(labels.len(), num_samples);
                prop_assert_eq!(coverage, -1.0);
            }
            SampleBatch::Mask(_) => prop_assert!(false, "labels were requested"),
        }

        let unlabeled = bridge.sample(1, &[1], num_samples, false).unwrap();
        prop_assert!(matches!(unlabeled, SampleBatch::Mask(_)));
        prop_assert_eq!(unlabeled.mask().rows(), num_samples);
    }
}
