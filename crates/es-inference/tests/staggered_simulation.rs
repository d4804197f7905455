//! Monte Carlo checks of the saturated event study on simulated staggered
//! panels with homogeneous effects.
//!
//! - pooled ATT recovery and heterogeneity-test size (two cohorts, 50 units
//!   each, plus 50 never-treated units)
//! - calibration of heterogeneity-test p-values under the null

use es_core::{Cohort, Observation};
use es_inference::econometrics::{
    Aggregation, AggregationKey, HeterogeneityConfig, SaturatedEventStudy, Weighting,
};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal as RandNormal};

const TRUE_ATT: f64 = 2.0;
const N_REPS: usize = 200;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `y_it = α_i + 0.1·t + ATT·D_it + ε_it` on periods 1..=12, cohorts adopting
/// at 5 and 10 (50 units each) and 50 never-treated units.
fn simulate_panel(seed: u64) -> Vec<Observation> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let eps = RandNormal::new(0.0, 1.0).unwrap();
    let mut rows = Vec::with_capacity(150 * 12);
    for unit in 0..150_i64 {
        let cohort = match unit / 50 {
            0 => Cohort::Adopts(5),
            1 => Cohort::Adopts(10),
            _ => Cohort::Never,
        };
        let alpha = eps.sample(&mut rng);
        for t in 1..=12_i64 {
            let effect = if cohort.is_treated_at(t) { TRUE_ATT } else { 0.0 };
            let y = alpha + 0.1 * t as f64 + effect + eps.sample(&mut rng);
            rows.push(Observation::new(unit, t, y, cohort));
        }
    }
    rows
}

struct Replication {
    att: f64,
    het_p: f64,
}

fn run_replication(seed: u64) -> Replication {
    let fit = SaturatedEventStudy::default().fit(simulate_panel(seed)).unwrap();
    let pooled = fit.aggregate(Aggregation::Pooled, Weighting::Shares).unwrap();
    let att = pooled.get(AggregationKey::Pooled).unwrap().estimate;
    let het = fit.test_treatment_heterogeneity(&HeterogeneityConfig::default()).unwrap();
    assert!(!het.approximate);
    Replication { att, het_p: het.p_value }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn pooled_att_recovered_and_homogeneity_not_rejected() {
    let reps: Vec<Replication> = (0..N_REPS as u64).map(|s| run_replication(1_000 + s)).collect();

    let covered = reps.iter().filter(|r| (r.att - TRUE_ATT).abs() <= 0.5).count();
    let not_rejected = reps.iter().filter(|r| r.het_p > 0.05).count();

    assert!(
        covered as f64 >= 0.95 * N_REPS as f64,
        "ATT within ±0.5 in only {covered}/{N_REPS} replications"
    );
    assert!(
        not_rejected as f64 >= 0.90 * N_REPS as f64,
        "homogeneity not rejected in only {not_rejected}/{N_REPS} replications"
    );

    let mean_att = reps.iter().map(|r| r.att).sum::<f64>() / N_REPS as f64;
    assert!((mean_att - TRUE_ATT).abs() < 0.05, "mean ATT = {mean_att}");
}

#[test]
fn heterogeneity_p_values_are_roughly_uniform_under_null() {
    let mut ps: Vec<f64> =
        (0..N_REPS as u64).map(|s| run_replication(50_000 + s).het_p).collect();
    ps.sort_by(f64::total_cmp);

    let mean = ps.iter().sum::<f64>() / ps.len() as f64;
    assert!((mean - 0.5).abs() < 0.08, "mean p-value = {mean}");

    // Kolmogorov–Smirnov distance to U(0,1); 5% critical value at n=200 is ~0.096.
    let n = ps.len() as f64;
    let ks = ps
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let lo = p - i as f64 / n;
            let hi = (i + 1) as f64 / n - p;
            lo.max(hi)
        })
        .fold(0.0_f64, f64::max);
    assert!(ks < 0.14, "KS distance to uniform = {ks}");
}

#[test]
fn dynamic_profile_is_flat_before_adoption() {
    let fit = SaturatedEventStudy::default().fit(simulate_panel(7)).unwrap();
    let by_rel = fit.aggregate(Aggregation::RelativeTime, Weighting::Shares).unwrap();
    for est in &by_rel.estimates {
        let AggregationKey::RelativeTime(r) = est.key else {
            panic!("unexpected key {}", est.key);
        };
        let truth = if r >= 0 { TRUE_ATT } else { 0.0 };
        assert!(
            (est.estimate - truth).abs() < 5.0 * est.std_error + 1e-9,
            "r={r}: {} ± {}",
            est.estimate,
            est.std_error
        );
        assert!(!est.variance_clamped);
        let total: f64 = est.weights.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
    assert!(by_rel.skipped_columns.is_empty());
}
