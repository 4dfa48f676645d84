use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use super::error::{DecayError, Result};
use super::types::{DecayBranch, DecayMode, NuclideState, StateId};

const PROBABILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NuclideRecord {
    #[serde(default)]
    pub half_life: Option<f64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub branches: Option<BTreeMap<String, BranchRecord>>,
}

/// `[probability, energy_keV, excitation_energy_keV]`; the energies are null
/// for spontaneous fission.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BranchRecord(pub f64, pub Option<f64>, pub Option<f64>);

#[derive(Debug, Clone, Default)]
pub struct NuclideDatabase {
    states: HashMap<StateId, NuclideState>,
}

impl NuclideDatabase {
    pub fn from_records<I, K>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, NuclideRecord)>,
        K: AsRef<str>,
    {
        let mut states = HashMap::new();
        for (key, record) in records {
            let id: StateId = key.as_ref().parse()?;
            let state = realize_record(id, record)?;
            if states.insert(id, state).is_some() {
                return Err(DecayError::InvalidDatabase(format!(
                    "duplicate entry for state {id}"
                )));
            }
        }
        Ok(Self { states })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let records: BTreeMap<String, NuclideRecord> = serde_json::from_str(json)
            .map_err(|e| DecayError::InvalidDatabase(e.to_string()))?;
        Self::from_records(records)
    }

    pub fn lookup(&self, a: u32, z: u32, e: u32) -> Result<&NuclideState> {
        self.state(StateId::new(a, z, e))
    }

    pub fn state(&self, id: StateId) -> Result<&NuclideState> {
        let state = self
            .states
            .get(&id)
            .ok_or(DecayError::NotFound { state: id })?;
        check_branch_sum(state)?;
        Ok(state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn all_state_ids(&self) -> Vec<StateId> {
        let mut ids: Vec<StateId> = self.states.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn all_half_lives(&self) -> Vec<Option<f64>> {
        self.true_half_lives().into_iter().map(|(_, hl)| hl).collect()
    }

    pub fn true_half_lives(&self) -> Vec<(StateId, Option<f64>)> {
        self.all_state_ids()
            .into_iter()
            .map(|id| (id, self.states[&id].half_life))
            .collect()
    }
}

fn realize_record(id: StateId, record: NuclideRecord) -> Result<NuclideState> {
    let integrity = |reason: String| DecayError::DataIntegrity { state: id, reason };

    if let Some(half_life) = record.half_life {
        if !(half_life.is_finite() && half_life > 0.0) {
            return Err(integrity(format!(
                "half-life must be a positive number of seconds, got {half_life}"
            )));
        }
    }

    let raw_branches = record.branches.unwrap_or_default();
    if record.half_life.is_none() && !raw_branches.is_empty() {
        return Err(integrity("stable state declares decay branches".to_string()));
    }
    if record.half_life.is_some() && raw_branches.is_empty() {
        return Err(integrity("unstable state has no decay branches".to_string()));
    }

    let mut branches = Vec::with_capacity(raw_branches.len());
    for (label, BranchRecord(probability, energy, excitation)) in raw_branches {
        let mode = DecayMode::from_label(&label).ok_or_else(|| DecayError::UnknownDecayMode {
            state: id,
            label: label.clone(),
        })?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(integrity(format!(
                "branch '{label}' probability {probability} is outside [0, 1]"
            )));
        }

        let (energy, product_excitation) = if mode.is_terminal() {
            (None, None)
        } else {
            let excitation = excitation.ok_or_else(|| {
                integrity(format!("branch '{label}' has no product excitation energy"))
            })?;
            (
                energy.map(|v| kev(id, &label, v)).transpose()?,
                Some(kev(id, &label, excitation)?),
            )
        };

        branches.push(DecayBranch {
            label,
            mode,
            probability,
            energy,
            product_excitation,
        });
    }

    Ok(NuclideState {
        id,
        name: if record.name.is_empty() {
            id.to_string()
        } else {
            record.name
        },
        half_life: record.half_life,
        branches,
    })
}

fn kev(state: StateId, label: &str, value: f64) -> Result<u32> {
    if !(value.is_finite() && value >= 0.0 && value <= u32::MAX as f64) {
        return Err(DecayError::DataIntegrity {
            state,
            reason: format!("branch '{label}' energy {value} keV is not a valid energy"),
        });
    }
    Ok(value.round() as u32)
}

fn check_branch_sum(state: &NuclideState) -> Result<()> {
    if state.is_stable() {
        return Ok(());
    }
    let total: f64 = state.branches.iter().map(|b| b.probability).sum();
    if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(DecayError::DataIntegrity {
            state: state.id,
            reason: format!("branch probabilities sum to {total}, expected 1"),
        });
    }
    Ok(())
}
