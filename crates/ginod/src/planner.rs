//! Receding-horizon planning loop
//!
//! Each simulation step re-solves the full intent-conditioned subgame
//! grid from the current physical state, selects both players' controls
//! with the configured QMDP method, advances the physical system by one
//! step, and Euler-steps the opinion dynamics driven by the fresh
//! subgame values.

use nalgebra::DVector;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::dynamics::Discretized;
use crate::error::{Error, Result};
use crate::opinion::{GameInducedDynamics, OpinionState};
use crate::qmdp::QmdpPlanner;
use crate::solver::IlqSolver;
use crate::subgame::SubgameGrid;
use crate::trace::{SimulationTrace, StepRecord};
use crate::types::{Dt, PlayerId, QmdpMethod};

/// Receding-horizon planner for the two-player game
pub struct RecedingHorizonPlanner {
    subgames: Vec<Vec<IlqSolver>>,
    physical: Arc<Discretized>,
    opinion: GameInducedDynamics,
    planners: [QmdpPlanner; 2],
    method: QmdpMethod,
    look_ahead: usize,
    opinion_dt: Dt,
    n_steps: usize,
}

impl RecedingHorizonPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subgames: Vec<Vec<IlqSolver>>,
        physical: Arc<Discretized>,
        opinion: GameInducedDynamics,
        planners: [QmdpPlanner; 2],
        method: QmdpMethod,
        look_ahead: usize,
        opinion_dt: Dt,
        n_steps: usize,
    ) -> Result<Self> {
        let (n1, n2) = opinion.dims();
        if subgames.len() != n1 || subgames.iter().any(|row| row.len() != n2) {
            return Err(Error::Scenario(format!(
                "subgame grid must be {n1} x {n2} to match the intent sets"
            )));
        }
        if planners[0].player() != PlayerId::P1 || planners[1].player() != PlayerId::P2 {
            return Err(Error::Scenario(
                "control planners must be ordered [P1, P2]".to_string(),
            ));
        }
        Ok(Self {
            subgames,
            physical,
            opinion,
            planners,
            method,
            look_ahead,
            opinion_dt,
            n_steps,
        })
    }

    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Run the closed loop from `(x0, z0)` and record every step
    #[instrument(skip_all, fields(n_steps = self.n_steps, method = ?self.method))]
    pub fn plan(&self, x0: &DVector<f64>, z0: &OpinionState) -> Result<SimulationTrace> {
        let (n1, n2) = self.opinion.dims();
        let mut x = x0.clone();
        let mut z = z0.clone();
        let mut trace = SimulationTrace::new();

        for step in 0..self.n_steps {
            let grid = SubgameGrid::solve(&self.subgames, &x, self.look_ahead)?;
            let derivative = self.opinion.cont_time_dyn(&z, &grid)?;
            let controls = self.select_controls(&x, &z, &grid)?;

            debug!(
                step,
                poi_p1 = derivative.poi[0],
                poi_p2 = derivative.poi[1],
                "planned step"
            );

            trace.push(StepRecord {
                step,
                state: x.iter().copied().collect(),
                opinion: z.to_vector().iter().copied().collect(),
                controls: [
                    controls[0].iter().copied().collect(),
                    controls[1].iter().copied().collect(),
                ],
                opinion_jacobian: derivative
                    .jacobian
                    .row_iter()
                    .map(|row| row.iter().copied().collect())
                    .collect(),
                poi: derivative.poi,
            });
            trace.record_diagnostic("attention_p1", z.attention[0]);
            trace.record_diagnostic("attention_p2", z.attention[1]);
            trace.record_diagnostic(
                "subgame_total_cost",
                grid.nominal_cost_matrix(PlayerId::P1).sum()
                    + grid.nominal_cost_matrix(PlayerId::P2).sum(),
            );

            x = self.physical.step(&x, [&controls[0], &controls[1]]);
            let z_next = z.to_vector() + &derivative.z_dot * self.opinion_dt.seconds();
            z = OpinionState::from_vector(&z_next, n1, n2)?;
        }
        trace.set_terminal(
            x.iter().copied().collect(),
            z.to_vector().iter().copied().collect(),
        );

        info!(steps = trace.len(), "simulation finished");
        Ok(trace)
    }

    /// Both players' controls under the configured QMDP method
    fn select_controls(
        &self,
        x: &DVector<f64>,
        z: &OpinionState,
        grid: &SubgameGrid,
    ) -> Result<[DVector<f64>; 2]> {
        let level_0 = |i: usize| self.planners[i].plan_level_0(x, z, grid);
        let level_1 = |i: usize| {
            self.planners[i].plan_level_1(x, z, z.attention[i], grid, &self.physical)
        };

        Ok(match self.method {
            QmdpMethod::Level0 => [level_0(0)?, level_0(1)?],
            QmdpMethod::Level1 => [level_1(0)?, level_1(1)?],
            QmdpMethod::Level1VsLevel0 => [level_1(0)?, level_0(1)?],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{PlayerCost, QuadraticCost};
    use crate::dynamics::{DoubleIntegrator, ProductSystem};
    use crate::opinion::OpinionParams;
    use crate::qmdp::ControlBounds;
    use crate::solver::IlqOptions;
    use crate::types::IntegrationMethod;

    fn regulator_costs(weight: f64) -> [PlayerCost; 2] {
        let mut p1 = PlayerCost::new();
        for dim in 0..2 {
            p1.add_cost(
                Box::new(QuadraticCost { dimension: dim, origin: 0.0, on_state: true }),
                weight,
            );
        }
        p1.add_cost(
            Box::new(QuadraticCost { dimension: 0, origin: 0.0, on_state: false }),
            1.0,
        );
        let mut p2 = PlayerCost::new();
        for dim in 2..4 {
            p2.add_cost(
                Box::new(QuadraticCost { dimension: dim, origin: 0.0, on_state: true }),
                weight,
            );
        }
        p2.add_cost(
            Box::new(QuadraticCost { dimension: 0, origin: 0.0, on_state: false }),
            1.0,
        );
        [p1, p2]
    }

    fn make_planner(method: QmdpMethod, n_steps: usize) -> RecedingHorizonPlanner {
        let physical = Arc::new(Discretized::new(
            Box::new(ProductSystem::new(
                Box::new(DoubleIntegrator),
                Box::new(DoubleIntegrator),
            )),
            Dt(0.1),
            IntegrationMethod::Euler,
        ));
        let subgames: Vec<Vec<IlqSolver>> = (0..2)
            .map(|l1| {
                (0..2)
                    .map(|l2| {
                        let w = 1.0 + 0.5 * (l1 + l2) as f64;
                        IlqSolver::new(
                            physical.clone(),
                            regulator_costs(w),
                            8,
                            IlqOptions::default(),
                        )
                    })
                    .collect()
            })
            .collect();
        let bounds = ControlBounds {
            min: vec![-5.0],
            max: vec![5.0],
        };
        RecedingHorizonPlanner::new(
            subgames,
            physical,
            GameInducedDynamics::new(2, 2, OpinionParams::default()),
            [
                QmdpPlanner::new(PlayerId::P1, bounds.clone()),
                QmdpPlanner::new(PlayerId::P2, bounds),
            ],
            method,
            4,
            Dt(0.1),
            n_steps,
        )
        .unwrap()
    }

    #[test]
    fn test_level_0_loop_regulates() {
        let planner = make_planner(QmdpMethod::Level0, 10);
        let x0 = DVector::from_vec(vec![1.0, 0.0, -1.0, 0.0]);
        let z0 = OpinionState::neutral(2, 2, 0.5);

        let trace = planner.plan(&x0, &z0).unwrap();
        assert_eq!(trace.len(), 10);

        let last = trace.final_state().unwrap();
        assert!(last[0].abs() < 1.0, "P1 should approach origin: {last:?}");
        assert!(last[2].abs() < 1.0, "P2 should approach origin: {last:?}");
        assert!(last.iter().all(|v| v.is_finite()));

        // The terminal record is one step past the last recorded step
        assert_eq!(trace.terminal_state.len(), 4);
        assert_eq!(trace.terminal_opinion.len(), 6);
        let last_pre_step = &trace.steps.last().unwrap().state;
        assert_ne!(&trace.terminal_state, last_pre_step);
    }

    #[test]
    fn test_level_1_loop_runs_and_records() {
        let planner = make_planner(QmdpMethod::Level1, 3);
        let x0 = DVector::from_vec(vec![0.5, 0.0, -0.5, 0.0]);
        let z0 = OpinionState::neutral(2, 2, 0.5);

        let trace = planner.plan(&x0, &z0).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.diagnostic("attention_p1").unwrap().len(), 3);
        assert_eq!(trace.diagnostic("subgame_total_cost").unwrap().len(), 3);

        for record in &trace.steps {
            assert_eq!(record.opinion.len(), 6);
            assert_eq!(record.opinion_jacobian.len(), 4);
            assert!(record.poi[0] >= 1.0);
            assert!(record.poi[1] >= 1.0);
        }
    }

    #[test]
    fn test_grid_shape_mismatch_rejected() {
        let planner = make_planner(QmdpMethod::Level0, 1);
        // Opinion model expects a 3x2 grid that the subgames don't provide
        let result = RecedingHorizonPlanner::new(
            planner.subgames,
            planner.physical,
            GameInducedDynamics::new(3, 2, OpinionParams::default()),
            planner.planners,
            QmdpMethod::Level0,
            4,
            Dt(0.1),
            1,
        );
        assert!(matches!(result, Err(Error::Scenario(_))));
    }
}
