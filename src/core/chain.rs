use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use super::error::{DecayError, Result};
use super::nuclide::NuclideDatabase;
use super::types::{ChainTerminal, DecayMode, NuclideState, PathIdentity, PathStep, StateId};

#[derive(Debug, Clone, PartialEq)]
pub struct TakenBranch {
    pub label: String,
    pub mode: DecayMode,
    /// Released energy in keV, `None` for fission.
    pub energy: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainStep {
    pub state: StateId,
    pub half_life: Option<f64>,
    /// Branch taken out of this state; `None` only for a stable last step.
    pub branch: Option<TakenBranch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    steps: Vec<ChainStep>,
}

impl Chain {
    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn terminal(&self) -> ChainTerminal {
        match self.steps.last().and_then(|s| s.branch.as_ref()) {
            Some(branch) if branch.mode.is_terminal() => ChainTerminal::Fission,
            _ => ChainTerminal::Stable,
        }
    }

    pub fn path(&self) -> PathIdentity {
        PathIdentity {
            steps: self
                .steps
                .iter()
                .filter_map(|step| {
                    step.branch.as_ref().map(|b| PathStep {
                        state: step.state,
                        label: b.label.clone(),
                    })
                })
                .collect(),
        }
    }

    pub fn decay_energies(&self) -> Vec<Option<u32>> {
        self.steps
            .iter()
            .filter_map(|s| s.branch.as_ref().map(|b| b.energy))
            .collect()
    }

    /// Parent state and half-life of every step that gets a sampled decay
    /// time. A fissioning last state has none.
    pub fn transitions(&self) -> impl Iterator<Item = (StateId, f64)> + '_ {
        self.steps.iter().filter_map(|step| match (&step.branch, step.half_life) {
            (Some(branch), Some(half_life)) if !branch.mode.is_terminal() => {
                Some((step.state, half_life))
            }
            _ => None,
        })
    }
}

pub fn generate_chain<R: Rng + ?Sized>(
    db: &NuclideDatabase,
    initial: StateId,
    rng: &mut R,
) -> Result<Chain> {
    let mut steps = Vec::new();
    let mut state = db.state(initial)?;

    loop {
        if state.is_stable() {
            steps.push(ChainStep {
                state: state.id,
                half_life: None,
                branch: None,
            });
            break;
        }

        let branch = &state.branches[choose_branch(state, rng)?];
        steps.push(ChainStep {
            state: state.id,
            half_life: state.half_life,
            branch: Some(TakenBranch {
                label: branch.label.clone(),
                mode: branch.mode,
                energy: branch.energy,
            }),
        });

        if branch.mode.is_terminal() {
            break;
        }

        let daughter = branch
            .product_excitation
            .and_then(|e| branch.mode.daughter(state.id, e))
            .ok_or_else(|| DecayError::ImpossibleDecay {
                state: state.id,
                label: branch.label.clone(),
            })?;
        state = db.state(daughter)?;
    }

    Ok(Chain { steps })
}

fn choose_branch<R: Rng + ?Sized>(state: &NuclideState, rng: &mut R) -> Result<usize> {
    let weights = WeightedIndex::new(state.branches.iter().map(|b| b.probability)).map_err(|e| {
        DecayError::DataIntegrity {
            state: state.id,
            reason: format!("branch probabilities cannot be sampled: {e}"),
        }
    })?;
    Ok(weights.sample(rng))
}
