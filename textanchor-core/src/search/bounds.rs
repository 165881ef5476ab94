//! Bernoulli KL confidence bounds used by the KL-LUCB arm selection.

const EPS: f64 = 1e-7;
const ONE_MINUS: f64 = 1.0 - 1e-16;
const BISECTION_STEPS: usize = 17;

/// KL divergence between Bernoulli(p) and Bernoulli(q).
pub fn kl_bernoulli(p: f64, q: f64) -> f64 {
    let p = p.clamp(EPS, ONE_MINUS);
    let q = q.clamp(EPS, ONE_MINUS);
    p * (p / q).ln() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln()
}

/// Largest q >= p with `kl(p, q) <= level`.
pub fn dup_bernoulli(p: f64, level: f64) -> f64 {
    let mut lm = p;
    let mut um = (p + (level / 2.0).sqrt()).min(1.0);
    for _ in 1..BISECTION_STEPS {
        let qm = (um + lm) / 2.0;
        if kl_bernoulli(p, qm) > level {
            um = qm;
        } else {
            lm = qm;
        }
    }
    um
}

/// Smallest q <= p with `kl(p, q) <= level`.
pub fn dlow_bernoulli(p: f64, level: f64) -> f64 {
    let mut um = p;
    let mut lm = (p - (level / 2.0).sqrt()).clamp(0.0, 1.0);
    for _ in 1..BISECTION_STEPS {
        let qm = (um + lm) / 2.0;
        if kl_bernoulli(p, qm) > level {
            lm = qm;
        } else {
            um = qm;
        }
    }
    lm
}

/// Exploration rate of KL-LUCB for `n_arms` arms at round `t`.
pub fn compute_beta(n_arms: usize, t: usize, delta: f64) -> f64 {
    let alpha = 1.1;
    let k = 405.5;
    let temp = (k * n_arms as f64 * (t as f64).powf(alpha) / delta).ln();
    temp + temp.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kl_is_zero_on_equal_arguments() {
        assert!(kl_bernoulli(0.3, 0.3).abs() < 1e-12);
        assert!(kl_bernoulli(0.3, 0.6) > 0.0);
        assert!(kl_bernoulli(0.0, 1.0).is_finite());
    }

    #[test]
    fn test_bounds_bracket_the_mean() {
        for &p in &[0.0, 0.1, 0.5, 0.9, 1.0] {
            let up = dup_bernoulli(p, 0.05);
            let low = dlow_bernoulli(p, 0.05);
            assert!(low <= p + 1e-12, "{low} > {p}");
            assert!(up >= p - 1e-12, "{up} < {p}");
            assert!((0.0..=1.0).contains(&up));
            assert!((0.0..=1.0).contains(&low));
        }
    }

    #[test]
    fn test_bounds_tighten_with_smaller_level() {
        let wide = dup_bernoulli(0.5, 0.5) - dlow_bernoulli(0.5, 0.5);
        let narrow = dup_bernoulli(0.5, 0.01) - dlow_bernoulli(0.5, 0.01);
        assert!(narrow < wide);
    }

    #[test]
    fn test_beta_grows_with_rounds() {
        assert!(compute_beta(4, 10, 0.1) > compute_beta(4, 1, 0.1));
        assert!(compute_beta(4, 1, 0.01) > compute_beta(4, 1, 0.1));
    }
}
