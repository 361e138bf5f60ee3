//! Scenario configuration and construction
//!
//! Scenarios are described in TOML and built into a ready-to-run
//! receding-horizon planner. The canonical scenario is a two-car merge:
//! both cars are unicycles, each player's discrete intents are target
//! lanes, and every intent pair conditions one subgame.

use std::path::Path;
use std::sync::Arc;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cost::{
    BoxConstraintCost, PairwiseProximityCost, PlayerCost, QuadraticCost, ReferenceDeviationCost,
};
use crate::dynamics::{Discretized, ProductSystem, UnicycleCar};
use crate::error::{Error, Result};
use crate::opinion::{GameInducedDynamics, OpinionParams, OpinionState};
use crate::planner::RecedingHorizonPlanner;
use crate::qmdp::{ControlBounds, QmdpPlanner};
use crate::solver::{IlqOptions, IlqSolver};
use crate::types::{Dt, IntegrationMethod, PlayerId, QmdpMethod};

/// Top-level simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of closed-loop steps
    pub steps: usize,
    /// Subgame planning horizon (steps)
    pub horizon: usize,
    /// Physical time step (seconds)
    pub dt: f64,
    /// Opinion integration time step (seconds)
    pub opinion_dt: f64,
    #[serde(default)]
    pub integration: IntegrationMethod,
    #[serde(default)]
    pub method: QmdpMethod,
    /// Nominal-state index along each subgame trajectory
    #[serde(default)]
    pub look_ahead: usize,
}

/// Per-player scenario settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// `[px, py, theta, v]`
    pub initial_state: Vec<f64>,
    /// Target lateral position per intent; the length fixes the
    /// player's intent count
    pub lane_targets: Vec<f64>,
    pub speed_reference: f64,
    pub control_min: Vec<f64>,
    pub control_max: Vec<f64>,
}

/// Cost weights shared by all subgames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConfig {
    pub lane: f64,
    pub speed: f64,
    pub control: f64,
    pub proximity: f64,
    /// Distance below which the proximity penalty activates (meters)
    pub proximity_distance: f64,
}

/// Opinion dynamics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpinionConfig {
    #[serde(flatten)]
    pub params: OpinionParams,
    /// Initial attention for both players
    pub attention_init: f64,
}

/// A complete two-car merge scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub simulation: SimulationConfig,
    pub player_1: PlayerConfig,
    pub player_2: PlayerConfig,
    pub weights: WeightConfig,
    pub opinion: OpinionConfig,
    /// Subgame solver settings
    #[serde(default)]
    pub solver: SolverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub control_reg: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let defaults = IlqOptions::default();
        Self {
            max_iterations: defaults.max_iterations,
            tolerance: defaults.tolerance,
            control_reg: defaults.control_reg,
        }
    }
}

impl ScenarioConfig {
    /// Load a scenario from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ScenarioConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// A highway merge: P2 on the main lane, P1 merging from the ramp
    pub fn default_merge() -> Self {
        Self {
            simulation: SimulationConfig {
                steps: 40,
                horizon: 15,
                dt: 0.1,
                opinion_dt: 0.1,
                integration: IntegrationMethod::Rk4,
                method: QmdpMethod::Level1VsLevel0,
                look_ahead: 3,
            },
            player_1: PlayerConfig {
                initial_state: vec![0.0, 3.6, 0.0, 8.0],
                // Intents: yield on the ramp lane or merge onto the main lane
                lane_targets: vec![3.6, 0.0],
                speed_reference: 8.0,
                control_min: vec![-4.0, -0.4],
                control_max: vec![3.0, 0.4],
            },
            player_2: PlayerConfig {
                initial_state: vec![-6.0, 0.0, 0.0, 9.0],
                // Intents: keep speed or yield to the merging car
                lane_targets: vec![0.0, 0.0],
                speed_reference: 9.0,
                control_min: vec![-4.0, -0.4],
                control_max: vec![3.0, 0.4],
            },
            weights: WeightConfig {
                lane: 4.0,
                speed: 1.0,
                control: 1.0,
                proximity: 30.0,
                proximity_distance: 4.0,
            },
            opinion: OpinionConfig {
                params: OpinionParams::default(),
                attention_init: 0.4,
            },
            solver: SolverConfig::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, player) in [("player_1", &self.player_1), ("player_2", &self.player_2)] {
            if player.initial_state.len() != 4 {
                return Err(Error::Scenario(format!(
                    "{name}: initial_state must be [px, py, theta, v]"
                )));
            }
            if player.lane_targets.is_empty() {
                return Err(Error::Scenario(format!(
                    "{name}: at least one lane target is required"
                )));
            }
            if player.control_min.len() != 2 || player.control_max.len() != 2 {
                return Err(Error::Scenario(format!(
                    "{name}: control bounds must cover [accel, yaw_rate]"
                )));
            }
            for (lo, hi) in player.control_min.iter().zip(&player.control_max) {
                if !lo.is_finite() || !hi.is_finite() || lo > hi {
                    return Err(Error::Scenario(format!(
                        "{name}: control bounds must be finite with min <= max"
                    )));
                }
            }
        }
        if self.simulation.look_ahead > self.simulation.horizon {
            return Err(Error::Scenario(format!(
                "look_ahead {} exceeds horizon {}",
                self.simulation.look_ahead, self.simulation.horizon
            )));
        }
        if self.simulation.dt <= 0.0 || self.simulation.opinion_dt <= 0.0 {
            return Err(Error::Scenario("time steps must be positive".to_string()));
        }
        Ok(())
    }

    /// Intent counts `(n1, n2)`
    pub fn intent_dims(&self) -> (usize, usize) {
        (
            self.player_1.lane_targets.len(),
            self.player_2.lane_targets.len(),
        )
    }

    /// Build the planner and the initial physical and opinion states
    pub fn build(&self) -> Result<(RecedingHorizonPlanner, DVector<f64>, OpinionState)> {
        self.validate()?;
        let (n1, n2) = self.intent_dims();
        info!(n1, n2, steps = self.simulation.steps, "building scenario");

        let physical = Arc::new(Discretized::new(
            Box::new(ProductSystem::new(
                Box::new(UnicycleCar),
                Box::new(UnicycleCar),
            )),
            Dt(self.simulation.dt),
            self.simulation.integration,
        ));

        let options = IlqOptions {
            max_iterations: self.solver.max_iterations,
            tolerance: self.solver.tolerance,
            control_reg: self.solver.control_reg,
        };

        let subgames: Vec<Vec<IlqSolver>> = (0..n1)
            .map(|l1| {
                (0..n2)
                    .map(|l2| {
                        IlqSolver::new(
                            physical.clone(),
                            [
                                self.player_cost(PlayerId::P1, l1),
                                self.player_cost(PlayerId::P2, l2),
                            ],
                            self.simulation.horizon,
                            options.clone(),
                        )
                    })
                    .collect()
            })
            .collect();

        let opinion = GameInducedDynamics::new(n1, n2, self.opinion.params.clone());
        let planners = [
            QmdpPlanner::new(
                PlayerId::P1,
                ControlBounds {
                    min: self.player_1.control_min.clone(),
                    max: self.player_1.control_max.clone(),
                },
            ),
            QmdpPlanner::new(
                PlayerId::P2,
                ControlBounds {
                    min: self.player_2.control_min.clone(),
                    max: self.player_2.control_max.clone(),
                },
            ),
        ];

        let planner = RecedingHorizonPlanner::new(
            subgames,
            physical,
            opinion,
            planners,
            self.simulation.method,
            self.simulation.look_ahead,
            Dt(self.simulation.opinion_dt),
            self.simulation.steps,
        )?;

        let mut x0 = DVector::zeros(8);
        x0.rows_mut(0, 4)
            .copy_from_slice(&self.player_1.initial_state);
        x0.rows_mut(4, 4)
            .copy_from_slice(&self.player_2.initial_state);
        let z0 = OpinionState::neutral(n1, n2, self.opinion.attention_init);

        Ok((planner, x0, z0))
    }

    /// Cost for one player conditioned on one of their intents
    ///
    /// State layout is `[px1, py1, theta1, v1, px2, py2, theta2, v2]`.
    fn player_cost(&self, player: PlayerId, intent: usize) -> PlayerCost {
        let (config, offset) = match player {
            PlayerId::P1 => (&self.player_1, 0),
            PlayerId::P2 => (&self.player_2, 4),
        };
        let weights = &self.weights;

        let mut cost = PlayerCost::new();
        cost.add_cost(
            Box::new(ReferenceDeviationCost {
                reference: config.lane_targets[intent],
                dimension: offset + 1,
                on_state: true,
            }),
            weights.lane,
        );
        cost.add_cost(
            Box::new(ReferenceDeviationCost {
                reference: config.speed_reference,
                dimension: offset + 3,
                on_state: true,
            }),
            weights.speed,
        );
        // Keep the heading aligned with the road
        cost.add_cost(
            Box::new(QuadraticCost {
                dimension: offset + 2,
                origin: 0.0,
                on_state: true,
            }),
            weights.lane,
        );
        for dim in 0..2 {
            cost.add_cost(
                Box::new(QuadraticCost {
                    dimension: dim,
                    origin: 0.0,
                    on_state: false,
                }),
                weights.control,
            );
            cost.add_cost(
                Box::new(BoxConstraintCost {
                    u_index: dim,
                    control_min: config.control_min[dim],
                    control_max: config.control_max[dim],
                    q1: 1.0,
                    q2: 5.0,
                }),
                weights.control,
            );
        }
        cost.add_cost(
            Box::new(PairwiseProximityCost {
                positions: [(0, 1), (4, 5)],
                max_distance: weights.proximity_distance,
            }),
            weights.proximity,
        );
        cost
    }
}
