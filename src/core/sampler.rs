use rand::Rng;

use super::distribution::DecayDistribution;

/// Inverse-CDF draw, de-quantized within the chosen bin. Never returns 0.
pub fn sample_event_time<R: Rng + ?Sized>(dist: &DecayDistribution, rng: &mut R) -> f64 {
    let cdf = dist.cdf();
    let time = dist.time();
    let r: f64 = rng.gen_range(0.0..1.0);
    let i = cdf.partition_point(|&c| c < r).min(cdf.len() - 1);

    loop {
        let u: f64 = rng.gen_range(0.0..1.0);
        let t = time[i] + u * dist.dt();
        if t > 0.0 {
            return t;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub half_life: f64,
    pub time: f64,
}

impl Event {
    pub fn sample<R: Rng + ?Sized>(dist: &DecayDistribution, rng: &mut R) -> Self {
        Self {
            half_life: dist.half_life(),
            time: sample_event_time(dist, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{any, prop_assert, proptest};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::rngs::mock::StepRng;
    use std::f64::consts::LN_2;

    #[test]
    fn zero_draws_never_yield_zero_time() {
        let dist = DecayDistribution::build(1.0, 5.0).expect("valid distribution");
        // First draw is exactly zero, which selects the first bin.
        let mut rng = StepRng::new(0, 1 << 40);
        let t = sample_event_time(&dist, &mut rng);
        assert!(t > 0.0, "got {t}");
        assert!(t < dist.dt() * 2.0);
    }

    #[test]
    fn top_of_unit_interval_clamps_to_last_bin() {
        let dist = DecayDistribution::build(1.0, 5.0).expect("valid distribution");
        let mut rng = StepRng::new(u64::MAX, 0);
        let t = sample_event_time(&dist, &mut rng);
        let last = *dist.time().last().expect("non-empty");
        assert!(t >= last && t < last + dist.dt(), "got {t}");
    }

    #[test]
    fn sampled_mean_recovers_exponential_law() {
        let half_life = 0.8;
        // Wide window so truncation does not bias the mean.
        let dist = DecayDistribution::build(half_life, 20.0 * half_life).expect("valid distribution");
        let mut rng = StdRng::seed_from_u64(7);
        let n = 200_000;
        let mean = (0..n).map(|_| sample_event_time(&dist, &mut rng)).sum::<f64>() / n as f64;
        let expected = half_life / LN_2;
        assert!(
            (mean - expected).abs() <= 0.01 * expected,
            "mean {mean}, expected {expected}"
        );
    }

    #[test]
    fn sampled_median_matches_half_life() {
        let dist = DecayDistribution::build(3.0, 60.0).expect("valid distribution");
        let mut rng = StdRng::seed_from_u64(11);
        let mut samples: Vec<f64> = (0..50_000).map(|_| sample_event_time(&dist, &mut rng)).collect();
        samples.sort_by(|a, b| a.total_cmp(b));
        let median = samples[samples.len() / 2];
        assert!((median - 3.0).abs() < 0.1, "median {median}");
    }

    #[test]
    fn event_records_parent_half_life() {
        let dist = DecayDistribution::build(2.5, 12.5).expect("valid distribution");
        let mut rng = StdRng::seed_from_u64(1);
        let event = Event::sample(&dist, &mut rng);
        assert_eq!(event.half_life, 2.5);
        assert!(event.time > 0.0 && event.time < 12.5);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_samples_stay_in_window_and_positive(seed in any::<u64>(), half_life in 1e-3_f64..1e3) {
            let range = 5.0 * half_life;
            let dist = DecayDistribution::build(half_life, range).expect("valid distribution");
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..64 {
                let t = sample_event_time(&dist, &mut rng);
                prop_assert!(t > 0.0);
                prop_assert!(t < range + dist.dt());
            }
        }
    }
}
