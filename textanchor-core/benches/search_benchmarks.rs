use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use textanchor_core::search::bounds::{compute_beta, dlow_bernoulli, dup_bernoulli, kl_bernoulli};
use textanchor_core::strategy::UnknownOptions;
use textanchor_core::{
    AnchorText, BoxError, ExplainParams, Perturbation, PerturbOptions, PredictorOutput,
};

const REVIEW: &str = "a slow start but the cast is wonderful and the ending is good";

fn bench_bounds(c: &mut Criterion) {
    c.bench_function("kl_bernoulli", |b| {
        b.iter(|| kl_bernoulli(black_box(0.83), black_box(0.91)))
    });

    c.bench_function("dup_dlow_bernoulli", |b| {
        b.iter(|| {
            let level = compute_beta(black_box(12), black_box(40), 0.1) / 500.0;
            (
                dup_bernoulli(black_box(0.9), level),
                dlow_bernoulli(black_box(0.9), level),
            )
        })
    });
}

fn bench_unknown_sampling(c: &mut Criterion) {
    let mut engine = Perturbation::new(
        PerturbOptions::Unknown(UnknownOptions::default()),
        None,
        None,
    )
    .unwrap();
    engine.bind(REVIEW);
    let mut rng = StdRng::seed_from_u64(0);

    c.bench_function("unknown_generate_100", |b| {
        b.iter(|| engine.generate(black_box(&[12]), 100, &mut rng).unwrap())
    });
}

fn bench_explain(c: &mut Criterion) {
    let classifier = |texts: &[String]| -> Result<PredictorOutput, BoxError> {
        Ok(PredictorOutput::Labels(
            texts
                .iter()
                .map(|t| i64::from(t.contains("good") && t.contains("wonderful")))
                .collect(),
        ))
    };
    let params = ExplainParams {
        coverage_samples: 1_000,
        binary_cache_size: 100,
        cache_margin: 100,
        ..Default::default()
    };

    c.bench_function("explain_unknown_two_word_anchor", |b| {
        b.iter(|| {
            let mut explainer = AnchorText::builder(Arc::new(classifier))
                .seed(0)
                .build()
                .unwrap();
            explainer.explain(black_box(REVIEW), &params).unwrap()
        })
    });
}

criterion_group!(benches, bench_bounds, bench_unknown_sampling, bench_explain);
criterion_main!(benches);
