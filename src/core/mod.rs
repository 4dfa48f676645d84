mod chain;
mod distribution;
mod engine;
mod error;
mod nuclide;
mod sampler;
mod stats;
mod types;

pub use chain::{Chain, ChainStep, TakenBranch, generate_chain};
pub use distribution::{DecayDistribution, DistributionCache, GridOptions};
pub use engine::{SimulationReport, mean_lifetimes, run_simulation};
pub use error::{DecayError, Result};
pub use nuclide::{BranchRecord, NuclideDatabase, NuclideRecord};
pub use sampler::{Event, sample_event_time};
pub use stats::{
    ConfidenceTable, SchmidtOutcome, TABULATED_LIMIT, TabulatedBound, confidence_interval,
    generalized_by_path, generalized_schmidt_test, schmidt_by_state, schmidt_test,
};
pub use types::{
    ChainTable, ChainTerminal, DecayBranch, DecayMode, MeanLifetime, MeanLifetimeTable,
    NuclideState, PathIdentity, PathStep, SimulationConfig, SimulationResult, StateId,
};
