use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::{DecayError, Result};

/// Identity of a nuclear state: nucleon count, proton count and excitation
/// energy in keV. Formats as `A.Z.E`, the key used by the nuclide database.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId {
    pub a: u32,
    pub z: u32,
    pub e: u32,
}

impl StateId {
    pub const fn new(a: u32, z: u32, e: u32) -> Self {
        Self { a, z, e }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.a, self.z, self.e)
    }
}

impl FromStr for StateId {
    type Err = DecayError;

    fn from_str(key: &str) -> Result<Self> {
        let invalid = || DecayError::InvalidStateKey {
            key: key.to_string(),
        };
        let mut parts = key.trim().split('.');
        let mut next = || -> Result<u32> {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(invalid)
        };
        let id = StateId::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(id)
    }
}

impl Serialize for StateId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StateId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayMode {
    Alpha,
    Gamma,
    #[serde(rename = "sf")]
    SpontaneousFission,
}

impl DecayMode {
    /// Classifies a database branch label such as `alpha1`, `gamma_2` or `sf`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_ascii_lowercase();
        if label.contains("alpha") {
            Some(Self::Alpha)
        } else if label.contains("gamma") {
            Some(Self::Gamma)
        } else if label.contains("sf") {
            Some(Self::SpontaneousFission)
        } else {
            None
        }
    }

    /// Daughter state reached by this mode, `None` for fission. Alpha decay
    /// of a nucleus too light to emit one also yields `None`.
    pub fn daughter(self, parent: StateId, excitation: u32) -> Option<StateId> {
        match self {
            Self::Alpha => Some(StateId::new(
                parent.a.checked_sub(4)?,
                parent.z.checked_sub(2)?,
                excitation,
            )),
            Self::Gamma => Some(StateId::new(parent.a, parent.z, excitation)),
            Self::SpontaneousFission => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SpontaneousFission)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayBranch {
    pub label: String,
    pub mode: DecayMode,
    pub probability: f64,
    pub energy: Option<u32>,
    pub product_excitation: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NuclideState {
    pub id: StateId,
    pub name: String,
    /// Half-life in seconds, `None` for a stable state.
    pub half_life: Option<f64>,
    pub branches: Vec<DecayBranch>,
}

impl NuclideState {
    pub fn is_stable(&self) -> bool {
        self.half_life.is_none()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainTerminal {
    Stable,
    Fission,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathStep {
    pub state: StateId,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathIdentity {
    pub steps: Vec<PathStep>,
}

impl PathIdentity {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for PathIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{} ==({})==>", step.state, step.label)?;
        }
        Ok(())
    }
}

impl Serialize for PathIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Decay times of every trial that realized one path. Column `j` holds the
/// lifetime of `columns[j]`; fission terminals are a flag, not a column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTable {
    pub columns: Vec<StateId>,
    pub rows: Vec<Vec<f64>>,
    pub terminal: ChainTerminal,
}

impl ChainTable {
    pub fn new(columns: Vec<StateId>, terminal: ChainTerminal) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            terminal,
        }
    }

    pub fn column(&self, state: StateId) -> Option<impl Iterator<Item = f64> + '_> {
        let idx = self.columns.iter().position(|c| *c == state)?;
        Some(self.rows.iter().filter_map(move |row| row.get(idx).copied()))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationResult {
    pub trials: usize,
    pub groups: BTreeMap<PathIdentity, ChainTable>,
}

impl SimulationResult {
    pub fn record(
        &mut self,
        path: PathIdentity,
        terminal: ChainTerminal,
        times: Vec<f64>,
    ) {
        self.trials += 1;
        let width = times.len();
        let table = self.groups.entry(path).or_insert_with_key(|path| {
            let columns = path.steps.iter().take(width).map(|s| s.state).collect();
            ChainTable::new(columns, terminal)
        });
        table.rows.push(times);
    }

    /// Union of groups, `other`'s rows appended after `self`'s.
    pub fn merge(mut self, other: SimulationResult) -> SimulationResult {
        self.trials += other.trials;
        for (path, table) in other.groups {
            match self.groups.get_mut(&path) {
                Some(existing) => existing.rows.extend(table.rows),
                None => {
                    self.groups.insert(path, table);
                }
            }
        }
        self
    }

    pub fn path_count(&self) -> usize {
        self.groups.len()
    }

    pub fn state_samples(&self, state: StateId) -> Vec<f64> {
        self.groups
            .values()
            .filter_map(|table| table.column(state))
            .flatten()
            .collect()
    }

    pub fn visited_states(&self) -> Vec<StateId> {
        let mut states: Vec<StateId> = self
            .groups
            .values()
            .flat_map(|t| t.columns.iter().copied())
            .collect();
        states.sort();
        states.dedup();
        states
    }

    pub fn path_fractions(&self) -> Vec<(&PathIdentity, f64)> {
        if self.trials == 0 {
            return Vec::new();
        }
        self.groups
            .iter()
            .map(|(path, table)| (path, table.rows.len() as f64 / self.trials as f64))
            .collect()
    }

    pub fn terminal_fraction(&self, terminal: ChainTerminal) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        let hits: usize = self
            .groups
            .values()
            .filter(|t| t.terminal == terminal)
            .map(|t| t.rows.len())
            .sum();
        hits as f64 / self.trials as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeanLifetime {
    pub state: StateId,
    pub mean_lifetime: f64,
    pub half_life: Option<f64>,
    /// `half_life / ln 2`, the mean of an untruncated exponential law.
    pub expected_mean: Option<f64>,
    pub samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeanLifetimeTable {
    pub rows: BTreeMap<StateId, MeanLifetime>,
}

impl MeanLifetimeTable {
    pub fn get(&self, state: StateId) -> Result<&MeanLifetime> {
        self.rows
            .get(&state)
            .ok_or(DecayError::NotVisited { state })
    }

    pub fn mean_lifetime(&self, a: u32, z: u32, e: u32) -> Result<f64> {
        self.get(StateId::new(a, z, e)).map(|row| row.mean_lifetime)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    pub trials: u32,
    /// Distribution window length in half-lives.
    pub range_factor: f64,
    /// Number of grid points per distribution window.
    pub grid_steps: usize,
    pub seed: u64,
    pub parallel: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: 10_000,
            range_factor: 5.0,
            grid_steps: 10_000,
            seed: 42,
            parallel: true,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trials == 0 {
            return Err(DecayError::InvalidConfig("trials must be > 0".to_string()));
        }
        if !(self.range_factor.is_finite() && self.range_factor > 0.0) {
            return Err(DecayError::InvalidConfig(
                "range factor must be a positive number of half-lives".to_string(),
            ));
        }
        if self.grid_steps < 2 {
            return Err(DecayError::InvalidConfig(
                "grid steps must be >= 2".to_string(),
            ));
        }
        Ok(())
    }
}
