//! Simulation trace recording
//!
//! The planner records one entry per simulation step: physical state,
//! opinion state, applied controls, opinion Jacobian, and the price of
//! indecision. Named scalar diagnostic channels can be attached on top.
//! Traces serialize to JSON for offline analysis.

use std::io::Write;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One simulation step's record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    /// Joint physical state
    pub state: Vec<f64>,
    /// Joint opinion state `[z1, z2, att1, att2]`
    pub opinion: Vec<f64>,
    /// Applied control per player
    pub controls: [Vec<f64>; 2],
    /// Opinion Jacobian, row-major over the opinion block
    pub opinion_jacobian: Vec<Vec<f64>>,
    /// Price of indecision per player
    pub poi: [f64; 2],
}

/// Full simulation trace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationTrace {
    pub steps: Vec<StepRecord>,
    /// Physical state after the last step
    #[serde(default)]
    pub terminal_state: Vec<f64>,
    /// Opinion state after the last step
    #[serde(default)]
    pub terminal_opinion: Vec<f64>,
    /// Named scalar diagnostic channels, one value per recorded step
    pub diagnostics: IndexMap<String, Vec<f64>>,
}

impl SimulationTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append one value to a named diagnostic channel
    pub fn record_diagnostic(&mut self, name: &str, value: f64) {
        self.diagnostics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    pub fn diagnostic(&self, name: &str) -> Option<&[f64]> {
        self.diagnostics.get(name).map(Vec::as_slice)
    }

    /// Record the state reached after the last step
    pub fn set_terminal(&mut self, state: Vec<f64>, opinion: Vec<f64>) {
        self.terminal_state = state;
        self.terminal_opinion = opinion;
    }

    /// Final physical state: the terminal state when recorded, otherwise
    /// the last step's pre-step state
    pub fn final_state(&self) -> Option<&[f64]> {
        if !self.terminal_state.is_empty() {
            return Some(&self.terminal_state);
        }
        self.steps.last().map(|r| r.state.as_slice())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(self.to_json()?.as_bytes())?;
        Ok(())
    }
}
