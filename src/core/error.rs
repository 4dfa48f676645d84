use thiserror::Error;

use super::types::StateId;

pub type Result<T> = std::result::Result<T, DecayError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecayError {
    #[error("nuclide state {state} not found in database")]
    NotFound { state: StateId },
    #[error("inconsistent data for state {state}: {reason}")]
    DataIntegrity { state: StateId, reason: String },
    #[error("branch '{label}' of state {state} is not an alpha, gamma or sf decay")]
    UnknownDecayMode { state: StateId, label: String },
    #[error("invalid nuclide database: {0}")]
    InvalidDatabase(String),
    #[error("invalid state key '{key}', expected A.Z.E")]
    InvalidStateKey { key: String },
    #[error("branch '{label}' of state {state} has no valid daughter nuclide")]
    ImpossibleDecay { state: StateId, label: String },
    #[error("state {state} was never visited by a simulated chain")]
    NotVisited { state: StateId },
    #[error("no valid decay times to test")]
    EmptySample,
    #[error("no tabulated confidence bounds available for n = {n}")]
    NoTabulatedBounds { n: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
