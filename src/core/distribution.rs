use std::collections::HashMap;
use std::f64::consts::LN_2;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::error::{DecayError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridOptions {
    pub time_start: f64,
    pub amplitude: f64,
    /// Grid step is `time_range / steps`.
    pub steps: usize,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            time_start: 0.0,
            amplitude: 1.0,
            steps: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecayDistribution {
    half_life: f64,
    dt: f64,
    time: Vec<f64>,
    exponential: Vec<f64>,
    pdf: Vec<f64>,
    cdf: Vec<f64>,
}

impl DecayDistribution {
    pub fn build(half_life: f64, time_range: f64) -> Result<Self> {
        Self::build_with(half_life, time_range, GridOptions::default())
    }

    pub fn build_with(half_life: f64, time_range: f64, options: GridOptions) -> Result<Self> {
        if !(half_life.is_finite() && half_life > 0.0) {
            return Err(DecayError::InvalidConfig(format!(
                "half-life must be positive, got {half_life}"
            )));
        }
        if !(options.amplitude.is_finite() && options.amplitude > 0.0) {
            return Err(DecayError::InvalidConfig(format!(
                "amplitude must be positive, got {}",
                options.amplitude
            )));
        }
        if options.steps < 2 {
            return Err(DecayError::InvalidConfig("grid needs at least 2 steps".to_string()));
        }
        if !(options.time_start >= 0.0 && time_range.is_finite() && time_range > options.time_start)
        {
            return Err(DecayError::InvalidConfig(format!(
                "time window [{}, {time_range}) is empty",
                options.time_start
            )));
        }

        let dt = time_range / options.steps as f64;
        let points = (((time_range - options.time_start) / dt) - 1e-9).ceil().max(2.0) as usize;
        let time: Vec<f64> = (0..points)
            .map(|i| options.time_start + i as f64 * dt)
            .collect();
        let exponential: Vec<f64> = time
            .iter()
            .map(|t| options.amplitude * (-LN_2 * t / half_life).exp())
            .collect();

        let area = trapezoid(&exponential, dt);
        let pdf: Vec<f64> = exponential.iter().map(|y| y / area).collect();

        let total: f64 = pdf.iter().sum();
        let mut running = 0.0;
        let cdf = pdf
            .iter()
            .map(|p| {
                running += p;
                running / total
            })
            .collect();

        Ok(Self {
            half_life,
            dt,
            time,
            exponential,
            pdf,
            cdf,
        })
    }

    pub fn half_life(&self) -> f64 {
        self.half_life
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn exponential(&self) -> &[f64] {
        &self.exponential
    }

    pub fn pdf(&self) -> &[f64] {
        &self.pdf
    }

    pub fn cdf(&self) -> &[f64] {
        &self.cdf
    }
}

fn trapezoid(values: &[f64], dt: f64) -> f64 {
    values.windows(2).map(|w| 0.5 * (w[0] + w[1]) * dt).sum()
}

#[derive(Debug)]
pub struct DistributionCache {
    range_factor: f64,
    options: GridOptions,
    built: RwLock<HashMap<u64, Arc<DecayDistribution>>>,
}

impl DistributionCache {
    pub fn new(range_factor: f64, options: GridOptions) -> Self {
        Self {
            range_factor,
            options,
            built: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_build(&self, half_life: f64) -> Result<Arc<DecayDistribution>> {
        let key = half_life.to_bits();
        if let Some(dist) = self.built.read().get(&key) {
            return Ok(Arc::clone(dist));
        }

        let mut built = self.built.write();
        if let Some(dist) = built.get(&key) {
            return Ok(Arc::clone(dist));
        }
        debug!(half_life, range_factor = self.range_factor, "building decay distribution");
        let dist = Arc::new(DecayDistribution::build_with(
            half_life,
            self.range_factor * half_life,
            self.options,
        )?);
        built.insert(key, Arc::clone(&dist));
        Ok(dist)
    }

    pub fn len(&self) -> usize {
        self.built.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.built.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    #[test]
    fn default_grid_spans_five_half_lives_in_ten_thousand_steps() {
        let dist = DecayDistribution::build(2.0, 10.0).expect("valid distribution");
        assert_eq!(dist.len(), 10_000);
        assert_approx_tol(dist.dt(), 1e-3, 1e-15);
        assert_eq!(dist.time()[0], 0.0);
        assert!(*dist.time().last().expect("non-empty") < 10.0);
    }

    #[test]
    fn pdf_integrates_to_one() {
        let dist = DecayDistribution::build(0.37, 5.0 * 0.37).expect("valid distribution");
        assert_approx_tol(trapezoid(dist.pdf(), dist.dt()), 1.0, 1e-12);
    }

    #[test]
    fn exponential_halves_after_one_half_life() {
        let options = GridOptions {
            amplitude: 3.0,
            ..GridOptions::default()
        };
        let dist = DecayDistribution::build_with(1.0, 5.0, options).expect("valid distribution");
        assert_approx_tol(dist.exponential()[0], 3.0, 1e-12);
        // t = 1.0 sits at index 2000 with dt = 5e-4
        assert_approx_tol(dist.exponential()[2000], 1.5, 1e-9);
    }

    #[test]
    fn time_start_shortens_the_window() {
        let options = GridOptions {
            time_start: 2.5,
            ..GridOptions::default()
        };
        let dist = DecayDistribution::build_with(1.0, 5.0, options).expect("valid distribution");
        assert_eq!(dist.len(), 5_000);
        assert_approx_tol(dist.time()[0], 2.5, 1e-12);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(DecayDistribution::build(0.0, 1.0).is_err());
        assert!(DecayDistribution::build(f64::NAN, 1.0).is_err());
        assert!(DecayDistribution::build(1.0, 0.0).is_err());
        let options = GridOptions {
            steps: 1,
            ..GridOptions::default()
        };
        assert!(DecayDistribution::build_with(1.0, 5.0, options).is_err());
    }

    #[test]
    fn cache_reuses_distributions_per_half_life() {
        let cache = DistributionCache::new(5.0, GridOptions::default());
        let a = cache.get_or_build(1.5).expect("valid");
        let b = cache.get_or_build(1.5).expect("valid");
        let c = cache.get_or_build(3.0).expect("valid");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
        assert_approx_tol(c.dt(), 15.0 / 10_000.0, 1e-15);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_cdf_is_monotone_and_ends_at_one(
            half_life in 1e-6_f64..1e6,
            range_factor in 1.0_f64..20.0,
        ) {
            let dist = DecayDistribution::build(half_life, range_factor * half_life)
                .expect("valid distribution");
            let cdf = dist.cdf();
            prop_assert!(cdf[0] >= 0.0);
            prop_assert!(cdf.windows(2).all(|w| w[1] >= w[0]));
            prop_assert!((cdf[cdf.len() - 1] - 1.0).abs() <= 1e-9);
            prop_assert!(dist.pdf().iter().all(|p| p.is_finite() && *p > 0.0));
        }
    }
}
