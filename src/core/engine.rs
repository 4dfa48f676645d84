use std::f64::consts::LN_2;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::info;

use super::chain::generate_chain;
use super::distribution::{DistributionCache, GridOptions};
use super::error::{DecayError, Result};
use super::nuclide::NuclideDatabase;
use super::sampler::Event;
use super::types::{
    ChainTerminal, MeanLifetime, MeanLifetimeTable, PathIdentity, SimulationConfig,
    SimulationResult, StateId,
};

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub initial_state: StateId,
    pub config: SimulationConfig,
    pub result: SimulationResult,
    pub mean_lifetimes: MeanLifetimeTable,
    pub distributions_built: usize,
}

impl SimulationReport {
    pub fn mean_lifetime(&self, a: u32, z: u32, e: u32) -> Result<f64> {
        self.mean_lifetimes.mean_lifetime(a, z, e)
    }
}

#[derive(Debug)]
struct TrialOutcome {
    path: PathIdentity,
    terminal: ChainTerminal,
    times: Vec<f64>,
}

/// Trial `i` draws from its own generator seeded by `(config.seed, i)`, so the
/// outcome is identical whether trials run sequentially or in parallel.
pub fn run_simulation(
    db: &NuclideDatabase,
    initial: StateId,
    config: &SimulationConfig,
) -> Result<SimulationReport> {
    config.validate()?;
    db.state(initial)?;

    let started = Instant::now();
    info!(
        initial = %initial,
        trials = config.trials,
        range_factor = config.range_factor,
        parallel = config.parallel,
        "starting decay chain simulation"
    );

    let cache = DistributionCache::new(
        config.range_factor,
        GridOptions {
            steps: config.grid_steps,
            ..GridOptions::default()
        },
    );

    let result = if config.parallel {
        (0..config.trials)
            .into_par_iter()
            .map(|trial| run_trial(db, initial, &cache, config.seed, trial))
            .try_fold(SimulationResult::default, |mut acc, outcome| {
                let outcome = outcome?;
                acc.record(outcome.path, outcome.terminal, outcome.times);
                Ok::<_, DecayError>(acc)
            })
            .try_reduce(SimulationResult::default, |left, right| Ok(left.merge(right)))?
    } else {
        let mut acc = SimulationResult::default();
        for trial in 0..config.trials {
            let outcome = run_trial(db, initial, &cache, config.seed, trial)?;
            acc.record(outcome.path, outcome.terminal, outcome.times);
        }
        acc
    };

    let mean_lifetimes = mean_lifetimes(db, &result)?;
    info!(
        paths = result.path_count(),
        visited_states = mean_lifetimes.len(),
        distributions = cache.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "decay chain simulation finished"
    );

    Ok(SimulationReport {
        initial_state: initial,
        config: *config,
        result,
        mean_lifetimes,
        distributions_built: cache.len(),
    })
}

fn run_trial(
    db: &NuclideDatabase,
    initial: StateId,
    cache: &DistributionCache,
    base_seed: u64,
    trial: u32,
) -> Result<TrialOutcome> {
    let mut rng = StdRng::seed_from_u64(derive_seed(base_seed, trial));
    let chain = generate_chain(db, initial, &mut rng)?;

    let mut times = Vec::with_capacity(chain.len());
    for (_, half_life) in chain.transitions() {
        let dist = cache.get_or_build(half_life)?;
        times.push(Event::sample(&dist, &mut rng).time);
    }

    Ok(TrialOutcome {
        path: chain.path(),
        terminal: chain.terminal(),
        times,
    })
}

pub fn mean_lifetimes(db: &NuclideDatabase, result: &SimulationResult) -> Result<MeanLifetimeTable> {
    let mut table = MeanLifetimeTable::default();
    for state in result.visited_states() {
        let samples = result.state_samples(state);
        if samples.is_empty() {
            continue;
        }
        let half_life = db.state(state)?.half_life;
        table.rows.insert(
            state,
            MeanLifetime {
                state,
                mean_lifetime: samples.iter().sum::<f64>() / samples.len() as f64,
                half_life,
                expected_mean: half_life.map(|t| t / LN_2),
                samples: samples.len(),
            },
        );
    }
    Ok(table)
}

fn derive_seed(base_seed: u64, trial: u32) -> u64 {
    // Mix the base first so neighbouring seeds do not share trial streams.
    splitmix64(splitmix64(base_seed) ^ trial as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
