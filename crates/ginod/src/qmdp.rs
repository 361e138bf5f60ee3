//! Belief-hedged control selection over the subgame grid
//!
//! Given the current physical state and the opinion state, each player
//! commits to their most-believed intent and hedges over the opponent's
//! intent belief. Level 0 blends the subgame feedback policies directly.
//! Level 1 performs a one-step lookahead against the subgame value
//! approximations and blends the result with the level-0 control by the
//! player's attention.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::dynamics::Discretized;
use crate::error::{Error, Result};
use crate::opinion::OpinionState;
use crate::subgame::SubgameGrid;
use crate::types::PlayerId;

/// Regularization for the level-1 lookahead solve
const LOOKAHEAD_REG: f64 = 1e-6;

/// Per-axis control bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlBounds {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl ControlBounds {
    pub fn clamp(&self, u: &DVector<f64>) -> Result<DVector<f64>> {
        if u.len() != self.min.len() || u.len() != self.max.len() {
            return Err(Error::DimensionMismatch {
                context: "control bounds",
                expected: self.min.len(),
                actual: u.len(),
            });
        }
        for i in 0..u.len() {
            if self.min[i] > self.max[i] {
                return Err(Error::Scenario(format!(
                    "control bound {i} has min {} above max {}",
                    self.min[i], self.max[i]
                )));
            }
        }
        Ok(DVector::from_fn(u.len(), |i, _| {
            u[i].clamp(self.min[i], self.max[i])
        }))
    }
}

/// QMDP-style control planner for one player
#[derive(Debug, Clone)]
pub struct QmdpPlanner {
    player: PlayerId,
    bounds: ControlBounds,
}

impl QmdpPlanner {
    pub fn new(player: PlayerId, bounds: ControlBounds) -> Self {
        Self { player, bounds }
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    /// Index of the most-believed own intent
    pub fn committed_intent(&self, z: &OpinionState) -> usize {
        let belief = z.belief(self.player);
        let mut best = 0;
        for i in 1..belief.len() {
            if belief[i] > belief[best] {
                best = i;
            }
        }
        best
    }

    /// Opponent intent belief
    fn opponent_belief(&self, z: &OpinionState) -> DVector<f64> {
        z.belief(self.player.opponent())
    }

    /// Subgame intent pair `(l1, l2)` for own intent `own` and
    /// opponent intent `other`
    fn intent_pair(&self, own: usize, other: usize) -> (usize, usize) {
        match self.player {
            PlayerId::P1 => (own, other),
            PlayerId::P2 => (other, own),
        }
    }

    /// Level-0 control: belief-weighted blend of the subgame feedback
    /// policies at the first stage, own intent fixed to the committed one.
    pub fn plan_level_0(
        &self,
        x: &DVector<f64>,
        z: &OpinionState,
        grid: &SubgameGrid,
    ) -> Result<DVector<f64>> {
        let own = self.committed_intent(z);
        let belief = self.opponent_belief(z);
        let idx = self.player.index();

        let mut u: Option<DVector<f64>> = None;
        for (other, weight) in belief.iter().enumerate() {
            let (l1, l2) = self.intent_pair(own, other);
            let solution = grid.solution(l1, l2)?;
            let strategy = &solution.strategies[0];
            let dx = x - &solution.states[0];
            let u_sub = &solution.controls[idx][0]
                - &strategy.gains[idx] * &dx
                - &strategy.feedforwards[idx];
            u = Some(match u {
                Some(acc) => acc + u_sub * *weight,
                None => u_sub * *weight,
            });
        }
        let u = u.ok_or(Error::Scenario("empty opponent belief".to_string()))?;
        trace!(player = %self.player, own_intent = own, "level-0 control");
        self.bounds.clamp(&u)
    }

    /// Level-1 control: one-step lookahead minimizing the belief-weighted
    /// quadratic subgame value at the linearized successor state, blended
    /// with the level-0 control by the player's attention.
    ///
    /// The value data lives in deviation coordinates around the subgame
    /// nominal trajectory, so the successor is measured against the
    /// nominal successor state.
    pub fn plan_level_1(
        &self,
        x: &DVector<f64>,
        z: &OpinionState,
        attention: f64,
        grid: &SubgameGrid,
        dynamics: &Discretized,
    ) -> Result<DVector<f64>> {
        let own = self.committed_intent(z);
        let belief = self.opponent_belief(z);
        let idx = self.player.index();
        let m = dynamics.control_dims()[idx];

        // Opponent plays their nominal first-stage control; their intent
        // is hedged by our belief over their options.
        let mut hessian = DMatrix::<f64>::zeros(m, m);
        let mut gradient = DVector::<f64>::zeros(m);
        let mut u_nom_mix = DVector::<f64>::zeros(m);
        let mut matched = false;

        for (other, weight) in belief.iter().enumerate() {
            if *weight <= 0.0 {
                continue;
            }
            matched = true;
            let (l1, l2) = self.intent_pair(own, other);
            let solution = grid.solution(l1, l2)?;

            let u_nom = [&solution.controls[0][0], &solution.controls[1][0]];
            let (_a, b) = dynamics.linearize(x, [u_nom[0], u_nom[1]]);
            let b_own = &b[idx];

            // Successor deviation when both players apply their nominal
            // first-stage controls, measured against the nominal successor
            let drift = dynamics.step(x, [u_nom[0], u_nom[1]]) - &solution.states[1];

            let z_val = &solution.value_hessians[idx];
            let zeta = &solution.value_gradients[idx];

            // d/du [ 1/2 (drift + B du)' Z (drift + B du) + zeta'(drift + B du) ]
            hessian += (b_own.transpose() * z_val * b_own) * *weight;
            gradient += (b_own.transpose() * (z_val * &drift + zeta)) * *weight;
            u_nom_mix += &solution.controls[idx][0] * *weight;
        }
        if !matched {
            return Err(Error::Scenario("empty opponent belief".to_string()));
        }

        for i in 0..m {
            hessian[(i, i)] += LOOKAHEAD_REG;
        }
        let du = hessian
            .lu()
            .solve(&(-gradient))
            .ok_or(Error::SingularMatrix {
                context: "level-1 lookahead",
            })?;

        let u1 = self.bounds.clamp(&(u_nom_mix + du))?;
        let u0 = self.plan_level_0(x, z, grid)?;

        let blend = attention.clamp(0.0, 1.0);
        trace!(player = %self.player, own_intent = own, blend, "level-1 control");
        self.bounds.clamp(&(&u1 * blend + &u0 * (1.0 - blend)))
    }
}
