use serde::{Deserialize, Serialize};

use super::error::{DecayError, Result};
use super::types::{PathIdentity, SimulationResult, StateId};

pub const TABULATED_LIMIT: usize = 100;

const ASYMPTOTIC_CENTER: f64 = 1.28;
const ASYMPTOTIC_WIDTH: f64 = 2.15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TabulatedBound {
    pub n: usize,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<TabulatedBound>", into = "Vec<TabulatedBound>")]
pub struct ConfidenceTable {
    entries: Vec<TabulatedBound>,
}

impl From<Vec<TabulatedBound>> for ConfidenceTable {
    fn from(mut entries: Vec<TabulatedBound>) -> Self {
        entries.sort_by_key(|b| b.n);
        Self { entries }
    }
}

impl From<ConfidenceTable> for Vec<TabulatedBound> {
    fn from(table: ConfidenceTable) -> Self {
        table.entries
    }
}

impl ConfidenceTable {
    pub fn new(entries: Vec<TabulatedBound>) -> Self {
        entries.into()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DecayError::InvalidConfig(format!("invalid bounds table: {e}")))
    }

    /// Bounds of the first entry whose `n` is at least the requested one.
    pub fn lookup(&self, n: usize) -> Option<(f64, f64)> {
        let i = self.entries.partition_point(|b| b.n < n);
        self.entries.get(i).map(|b| (b.lower, b.upper))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn confidence_interval(n: usize, table: Option<&ConfidenceTable>) -> Result<(f64, f64)> {
    if n <= TABULATED_LIMIT {
        return table
            .and_then(|t| t.lookup(n))
            .ok_or(DecayError::NoTabulatedBounds { n });
    }
    let half_width = ASYMPTOTIC_WIDTH / (n as f64).sqrt();
    Ok((ASYMPTOTIC_CENTER - half_width, ASYMPTOTIC_CENTER + half_width))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchmidtOutcome {
    pub sigma_theta_exp: f64,
    pub interval: (f64, f64),
    pub sample_count: usize,
}

impl SchmidtOutcome {
    pub fn is_consistent(&self) -> bool {
        self.interval.0 <= self.sigma_theta_exp && self.sigma_theta_exp <= self.interval.1
    }
}

fn log_time(t: f64) -> Option<f64> {
    (t.is_finite() && t > 0.0).then(|| t.ln())
}

/// Classical Schmidt test on single-state decay times. Non-positive and
/// non-finite samples are treated as missing.
pub fn schmidt_test(samples: &[f64], table: Option<&ConfidenceTable>) -> Result<SchmidtOutcome> {
    let theta: Vec<f64> = samples.iter().copied().filter_map(log_time).collect();
    if theta.is_empty() {
        return Err(DecayError::EmptySample);
    }

    let n = theta.len();
    let mean = theta.iter().sum::<f64>() / n as f64;
    let variance = theta.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

    Ok(SchmidtOutcome {
        sigma_theta_exp: variance.sqrt(),
        interval: confidence_interval(n, table)?,
        sample_count: n,
    })
}

/// Generalized Schmidt test over multi-step chains. A missing or invalid
/// entry ends a row; each row's squared log deviations are combined by a
/// geometric mean over its completed columns.
///
/// Rows with no completed column are left out of the row average, but
/// `sample_count` and the bounds still use every row. The bounds are the
/// single-step interval and are known to be inaccurate for multi-step chains.
pub fn generalized_schmidt_test(
    rows: &[Vec<f64>],
    table: Option<&ConfidenceTable>,
) -> Result<SchmidtOutcome> {
    if rows.is_empty() {
        return Err(DecayError::EmptySample);
    }

    let theta: Vec<Vec<Option<f64>>> = rows
        .iter()
        .map(|row| row.iter().map(|t| log_time(*t)).collect())
        .collect();
    let width = theta.iter().map(Vec::len).max().unwrap_or(0);

    let column_means: Vec<Option<f64>> = (0..width)
        .map(|j| {
            let (sum, count) = theta
                .iter()
                .filter_map(|row| row.get(j).copied().flatten())
                .fold((0.0, 0_usize), |(s, c), x| (s + x, c + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect();

    let row_scalars: Vec<f64> = theta
        .iter()
        .filter_map(|row| {
            let (product, terms) = row
                .iter()
                .zip(&column_means)
                .map_while(|(x, mean)| Some((x.as_ref()? - mean.as_ref()?).powi(2)))
                .fold((1.0_f64, 0_u32), |(p, k), dev| (p * dev, k + 1));
            (terms > 0).then(|| product.powf(1.0 / f64::from(terms)))
        })
        .collect();

    if row_scalars.is_empty() {
        return Err(DecayError::EmptySample);
    }
    let mean_scalar = row_scalars.iter().sum::<f64>() / row_scalars.len() as f64;

    Ok(SchmidtOutcome {
        sigma_theta_exp: mean_scalar.sqrt(),
        interval: confidence_interval(rows.len(), table)?,
        sample_count: rows.len(),
    })
}

pub fn schmidt_by_state(
    result: &SimulationResult,
    table: Option<&ConfidenceTable>,
) -> Vec<(StateId, Result<SchmidtOutcome>)> {
    result
        .visited_states()
        .into_iter()
        .map(|state| (state, schmidt_test(&result.state_samples(state), table)))
        .collect()
}

pub fn generalized_by_path<'a>(
    result: &'a SimulationResult,
    table: Option<&ConfidenceTable>,
) -> Vec<(&'a PathIdentity, Result<SchmidtOutcome>)> {
    result
        .groups
        .iter()
        .filter(|(_, t)| !t.columns.is_empty())
        .map(|(path, t)| (path, generalized_schmidt_test(&t.rows, table)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::E;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-12,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_table() -> ConfidenceTable {
        ConfidenceTable::new(vec![
            TabulatedBound { n: 10, lower: 0.65, upper: 1.76 },
            TabulatedBound { n: 2, lower: 0.04, upper: 1.83 },
            TabulatedBound { n: 5, lower: 0.41, upper: 1.89 },
        ])
    }

    fn exponential_samples(seed: u64, n: usize, tau: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| -tau * (1.0 - rng.gen_range(0.0..1.0_f64)).ln())
            .collect()
    }

    #[test]
    fn table_lookup_uses_left_bisect() {
        let table = sample_table();
        assert_eq!(table.lookup(1), Some((0.04, 1.83)));
        assert_eq!(table.lookup(2), Some((0.04, 1.83)));
        assert_eq!(table.lookup(3), Some((0.41, 1.89)));
        assert_eq!(table.lookup(10), Some((0.65, 1.76)));
        assert_eq!(table.lookup(11), None);
    }

    #[test]
    fn table_deserializes_from_records() {
        let table = ConfidenceTable::from_json_str(
            r#"[{"n": 3, "lower": 0.19, "upper": 1.91}, {"n": 2, "lower": 0.04, "upper": 1.83}]"#,
        )
        .expect("valid table");
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(2), Some((0.04, 1.83)));
    }

    #[test]
    fn small_samples_need_tabulated_bounds() {
        assert_eq!(
            confidence_interval(50, None),
            Err(DecayError::NoTabulatedBounds { n: 50 })
        );
        assert_eq!(
            confidence_interval(50, Some(&sample_table())),
            Err(DecayError::NoTabulatedBounds { n: 50 })
        );
        assert_eq!(confidence_interval(4, Some(&sample_table())), Ok((0.41, 1.89)));
    }

    #[test]
    fn large_samples_use_asymptotic_bounds() {
        let (lo, hi) = confidence_interval(400, None).expect("analytic");
        assert_approx(lo, 1.28 - 2.15 / 20.0);
        assert_approx(hi, 1.28 + 2.15 / 20.0);
    }

    #[test]
    fn schmidt_is_population_std_of_log_times() {
        let outcome = schmidt_test(&[1.0, E, E * E], Some(&sample_table())).expect("valid");
        assert_approx(outcome.sigma_theta_exp, (2.0_f64 / 3.0).sqrt());
        assert_eq!(outcome.sample_count, 3);
        assert_eq!(outcome.interval, (0.41, 1.89));
        assert!(outcome.is_consistent());
    }

    #[test]
    fn schmidt_ignores_missing_and_non_positive_times() {
        let clean = schmidt_test(&[1.0, E, E * E], Some(&sample_table())).expect("valid");
        let dirty = schmidt_test(
            &[1.0, f64::NAN, E, 0.0, -3.0, f64::INFINITY, E * E],
            Some(&sample_table()),
        )
        .expect("valid");
        assert_eq!(clean, dirty);
    }

    #[test]
    fn schmidt_without_valid_samples_is_an_error() {
        assert_eq!(schmidt_test(&[], None), Err(DecayError::EmptySample));
        assert_eq!(schmidt_test(&[0.0, f64::NAN], None), Err(DecayError::EmptySample));
    }

    #[test]
    fn exponential_samples_are_usually_consistent() {
        let consistent = (0..20)
            .filter(|seed| {
                let samples = exponential_samples(*seed, 2_000, 1.7);
                schmidt_test(&samples, None).expect("valid").is_consistent()
            })
            .count();
        assert!(consistent >= 14, "only {consistent} of 20 runs consistent");
    }

    #[test]
    fn mixed_half_lives_widen_the_statistic() {
        let mut samples = exponential_samples(1, 1_000, 0.01);
        samples.extend(exponential_samples(2, 1_000, 100.0));
        let outcome = schmidt_test(&samples, None).expect("valid");
        assert!(outcome.sigma_theta_exp > outcome.interval.1);
        assert!(!outcome.is_consistent());
    }

    #[test]
    fn generalized_combines_columns_geometrically() {
        let rows = vec![vec![1.0, 1.0], vec![E * E, E * E]];
        let outcome = generalized_schmidt_test(&rows, Some(&sample_table())).expect("valid");
        assert_approx(outcome.sigma_theta_exp, 1.0);
        assert_eq!(outcome.sample_count, 2);
    }

    #[test]
    fn generalized_stops_rows_at_first_missing_entry() {
        // Column 0 logs are {0, 2}, mean 1. Column 1 only has row 0 (log 0).
        let rows = vec![vec![1.0, 1.0], vec![E * E]];
        let outcome = generalized_schmidt_test(&rows, Some(&sample_table())).expect("valid");
        // Row 0: sqrt(1 * 0) = 0, row 1: 1.
        assert_approx(outcome.sigma_theta_exp, 0.5_f64.sqrt());

        let with_gap = vec![vec![1.0, 1.0, 1.0], vec![E * E, f64::NAN, E]];
        let outcome = generalized_schmidt_test(&with_gap, Some(&sample_table())).expect("valid");
        assert_approx(outcome.sigma_theta_exp, 0.5_f64.sqrt());
    }

    #[test]
    fn generalized_rows_without_completed_columns_skip_the_average_only() {
        // Column 0 logs are {0, 2}, mean 1; both complete rows contribute 1.
        let rows = vec![vec![1.0], vec![E * E], vec![], vec![-1.0]];
        let outcome = generalized_schmidt_test(&rows, Some(&sample_table())).expect("valid");
        assert_approx(outcome.sigma_theta_exp, 1.0);
        assert_eq!(outcome.sample_count, 4);
        assert_eq!(outcome.interval, (0.41, 1.89));
    }

    #[test]
    fn generalized_on_one_column_matches_classical() {
        let samples = exponential_samples(5, 500, 2.0);
        let rows: Vec<Vec<f64>> = samples.iter().map(|t| vec![*t]).collect();
        let classical = schmidt_test(&samples, None).expect("valid");
        let generalized = generalized_schmidt_test(&rows, None).expect("valid");
        assert!((classical.sigma_theta_exp - generalized.sigma_theta_exp).abs() < 1e-12);
        assert_eq!(classical.interval, generalized.interval);
    }

    #[test]
    fn generalized_bounds_are_keyed_on_chain_count() {
        let rows: Vec<Vec<f64>> = (0..150).map(|i| vec![1.0 + i as f64, 2.0, 3.0]).collect();
        let outcome = generalized_schmidt_test(&rows, None).expect("valid");
        assert_eq!(outcome.interval, confidence_interval(150, None).expect("analytic"));
    }

    #[test]
    fn generalized_rejects_empty_tables() {
        assert_eq!(generalized_schmidt_test(&[], None), Err(DecayError::EmptySample));
        assert_eq!(
            generalized_schmidt_test(&[vec![], vec![f64::NAN]], None),
            Err(DecayError::EmptySample)
        );
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_asymptotic_interval_is_centered_and_shrinks(n in 101_usize..1_000_000) {
            let (lo, hi) = confidence_interval(n, None).expect("analytic");
            let (lo_next, hi_next) = confidence_interval(n + 1, None).expect("analytic");
            prop_assert!((0.5 * (lo + hi) - 1.28).abs() < 1e-12);
            prop_assert!(lo < lo_next && hi_next < hi);
        }
    }
}
