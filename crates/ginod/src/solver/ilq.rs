//! Iterative LQ subgame solver
//!
//! Solves a nonlinear two-player trajectory game conditioned on one
//! intent pair. Per iteration the dynamics are linearized and both
//! players' costs quadraticized along the current operating point, the
//! resulting LQ game is solved in feedback, and the new policy is
//! rolled out with a line-searched feedforward step. The best operating
//! point (lowest combined cost) is kept, and the quadratic value
//! approximation at its initial time is exposed to the opinion layer.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, instrument, trace};

use crate::cost::PlayerCost;
use crate::dynamics::Discretized;
use crate::error::{Error, Result};
use crate::solver::lq::{solve_lq_game, LinearStep, LqStrategy, QuadraticStageCost};

/// Line search step scales, largest first
const LINE_SEARCH_SCALES: [f64; 6] = [1.0, 0.5, 0.25, 0.1, 0.05, 0.01];

/// Solver tuning knobs
#[derive(Debug, Clone)]
pub struct IlqOptions {
    pub max_iterations: usize,
    /// Convergence threshold on the max state change between iterations
    pub tolerance: f64,
    /// Levenberg-style regularization added to each control Hessian
    pub control_reg: f64,
}

impl Default for IlqOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-3,
            control_reg: 1e-3,
        }
    }
}

/// Converged subgame solution for one intent pair
///
/// `value_hessians` / `value_gradients` are each player's `Z_i` and
/// `zeta_i` at the initial time, in deviation coordinates around
/// `states[0]`.
#[derive(Debug, Clone)]
pub struct SubgameSolution {
    pub states: Vec<DVector<f64>>,
    pub controls: [Vec<DVector<f64>>; 2],
    pub strategies: Vec<LqStrategy>,
    pub value_hessians: [DMatrix<f64>; 2],
    pub value_gradients: [DVector<f64>; 2],
    pub costs: [f64; 2],
}

impl SubgameSolution {
    /// Combined cost of both players
    pub fn total_cost(&self) -> f64 {
        self.costs[0] + self.costs[1]
    }
}

/// Iterative LQ solver for one intent-conditioned subgame
pub struct IlqSolver {
    dynamics: Arc<Discretized>,
    costs: [PlayerCost; 2],
    horizon: usize,
    options: IlqOptions,
}

struct OperatingPoint {
    states: Vec<DVector<f64>>,
    controls: [Vec<DVector<f64>>; 2],
    costs: [f64; 2],
}

impl IlqSolver {
    pub fn new(
        dynamics: Arc<Discretized>,
        costs: [PlayerCost; 2],
        horizon: usize,
        options: IlqOptions,
    ) -> Self {
        Self {
            dynamics,
            costs,
            horizon,
            options,
        }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Solve the subgame from `x0`
    #[instrument(skip_all, name = "ilq")]
    pub fn run(&self, x0: &DVector<f64>) -> Result<SubgameSolution> {
        let dims = self.dynamics.control_dims();

        // Initial operating point: zero-control rollout
        let zero_controls = [
            vec![DVector::zeros(dims[0]); self.horizon],
            vec![DVector::zeros(dims[1]); self.horizon],
        ];
        let states = self.rollout_open_loop(x0, &zero_controls)?;
        let costs = self.trajectory_costs(&states, &zero_controls);
        let mut current = OperatingPoint {
            states,
            controls: zero_controls,
            costs,
        };
        self.check_finite(&current, 0)?;

        let mut best_total = current.costs[0] + current.costs[1];

        for iteration in 0..self.options.max_iterations {
            let (steps, stage_costs) = self.linearize_and_quadraticize(&current);
            let lq = solve_lq_game(&steps, &stage_costs)?;

            // Line search on the feedforward step
            let mut accepted: Option<OperatingPoint> = None;
            for scale in LINE_SEARCH_SCALES {
                let candidate = self.rollout_policy(x0, &current, &lq.strategies, scale)?;
                let total = candidate.costs[0] + candidate.costs[1];
                if total.is_finite() && total < best_total {
                    trace!(iteration, scale, total, "line search accepted");
                    best_total = total;
                    accepted = Some(candidate);
                    break;
                }
            }

            let Some(next) = accepted else {
                // No improving step: the current operating point is our
                // best; stop iterating.
                debug!(iteration, best_total, "no improving step, stopping");
                break;
            };

            let delta = max_state_change(&current.states, &next.states);
            current = next;
            self.check_finite(&current, iteration + 1)?;

            debug!(
                iteration,
                cost_p1 = current.costs[0],
                cost_p2 = current.costs[1],
                delta,
                "ilq iteration"
            );

            if delta < self.options.tolerance {
                break;
            }
        }

        if !best_total.is_finite() {
            return Err(Error::SolverDiverged {
                iterations: self.options.max_iterations,
                message: "non-finite trajectory cost".to_string(),
            });
        }

        // Final value approximation at the accepted operating point
        let (steps, stage_costs) = self.linearize_and_quadraticize(&current);
        let lq = solve_lq_game(&steps, &stage_costs)?;

        Ok(SubgameSolution {
            states: current.states,
            controls: current.controls,
            strategies: lq.strategies,
            value_hessians: [
                lq.value_hessians[0][0].clone(),
                lq.value_hessians[0][1].clone(),
            ],
            value_gradients: [
                lq.value_gradients[0][0].clone(),
                lq.value_gradients[0][1].clone(),
            ],
            costs: current.costs,
        })
    }

    fn rollout_open_loop(
        &self,
        x0: &DVector<f64>,
        controls: &[Vec<DVector<f64>>; 2],
    ) -> Result<Vec<DVector<f64>>> {
        let mut states = Vec::with_capacity(self.horizon + 1);
        let mut x = x0.clone();
        for k in 0..self.horizon {
            let next = self.dynamics.step(&x, [&controls[0][k], &controls[1][k]]);
            states.push(x);
            x = next;
        }
        states.push(x);
        Ok(states)
    }

    /// Roll out `u_i = u_ref - P (x - x_ref) - scale * alpha`
    fn rollout_policy(
        &self,
        x0: &DVector<f64>,
        reference: &OperatingPoint,
        strategies: &[LqStrategy],
        scale: f64,
    ) -> Result<OperatingPoint> {
        let dims = self.dynamics.control_dims();
        let mut states = Vec::with_capacity(self.horizon + 1);
        let mut controls = [
            Vec::with_capacity(self.horizon),
            Vec::with_capacity(self.horizon),
        ];
        let mut x = x0.clone();

        for k in 0..self.horizon {
            let dx = &x - &reference.states[k];
            let mut us: [DVector<f64>; 2] =
                [DVector::zeros(dims[0]), DVector::zeros(dims[1])];
            for i in 0..2 {
                us[i] = &reference.controls[i][k]
                    - &strategies[k].gains[i] * &dx
                    - &strategies[k].feedforwards[i] * scale;
            }
            let next = self.dynamics.step(&x, [&us[0], &us[1]]);
            controls[0].push(us[0].clone());
            controls[1].push(us[1].clone());
            states.push(x);
            x = next;
        }
        states.push(x);

        let costs = self.trajectory_costs(&states, &controls);
        Ok(OperatingPoint {
            states,
            controls,
            costs,
        })
    }

    fn trajectory_costs(
        &self,
        states: &[DVector<f64>],
        controls: &[Vec<DVector<f64>>; 2],
    ) -> [f64; 2] {
        let dims = self.dynamics.control_dims();
        [
            self.costs[0].trajectory_cost(states, &controls[0], dims[0]),
            self.costs[1].trajectory_cost(states, &controls[1], dims[1]),
        ]
    }

    fn linearize_and_quadraticize(
        &self,
        point: &OperatingPoint,
    ) -> (Vec<LinearStep>, Vec<[QuadraticStageCost; 2]>) {
        let dims = self.dynamics.control_dims();
        let zero = [DVector::zeros(dims[0]), DVector::zeros(dims[1])];

        let steps: Vec<LinearStep> = (0..self.horizon)
            .map(|k| {
                let (a, b) = self.dynamics.linearize(
                    &point.states[k],
                    [&point.controls[0][k], &point.controls[1][k]],
                );
                LinearStep { a, b }
            })
            .collect();

        let stage_costs: Vec<[QuadraticStageCost; 2]> = (0..=self.horizon)
            .map(|k| {
                let x = &point.states[k];
                [0usize, 1].map(|i| {
                    let u = point.controls[i].get(k).unwrap_or(&zero[i]);
                    let quad = self.costs[i].quadraticize(x, u, k);
                    let reg = DMatrix::identity(dims[i], dims[i]) * self.options.control_reg;
                    QuadraticStageCost {
                        hess_x: quad.hess_x,
                        grad_x: quad.grad_x,
                        hess_u: quad.hess_u + reg,
                        grad_u: quad.grad_u,
                    }
                })
            })
            .collect();

        (steps, stage_costs)
    }

    fn check_finite(&self, point: &OperatingPoint, iteration: usize) -> Result<()> {
        let finite_states = point.states.iter().all(|x| x.iter().all(|v| v.is_finite()));
        if !finite_states || !point.costs.iter().all(|c| c.is_finite()) {
            return Err(Error::SolverDiverged {
                iterations: iteration,
                message: "non-finite operating point".to_string(),
            });
        }
        Ok(())
    }
}

fn max_state_change(a: &[DVector<f64>], b: &[DVector<f64>]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).amax())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::QuadraticCost;
    use crate::dynamics::{DoubleIntegrator, ProductSystem};
    use crate::types::{Dt, IntegrationMethod};

    fn double_integrator_game(horizon: usize) -> IlqSolver {
        let dynamics = Arc::new(Discretized::new(
            Box::new(ProductSystem::new(
                Box::new(DoubleIntegrator),
                Box::new(DoubleIntegrator),
            )),
            Dt(0.1),
            IntegrationMethod::Euler,
        ));

        // Each player regulates their own position and velocity to zero
        let mut cost1 = PlayerCost::new();
        cost1.add_cost(
            Box::new(QuadraticCost { dimension: 0, origin: 0.0, on_state: true }),
            1.0,
        );
        cost1.add_cost(
            Box::new(QuadraticCost { dimension: 1, origin: 0.0, on_state: true }),
            0.1,
        );
        cost1.add_cost(
            Box::new(QuadraticCost { dimension: 0, origin: 0.0, on_state: false }),
            0.1,
        );
        let mut cost2 = PlayerCost::new();
        cost2.add_cost(
            Box::new(QuadraticCost { dimension: 2, origin: 0.0, on_state: true }),
            1.0,
        );
        cost2.add_cost(
            Box::new(QuadraticCost { dimension: 3, origin: 0.0, on_state: true }),
            0.1,
        );
        cost2.add_cost(
            Box::new(QuadraticCost { dimension: 0, origin: 0.0, on_state: false }),
            0.1,
        );

        IlqSolver::new(dynamics, [cost1, cost2], horizon, IlqOptions::default())
    }

    #[test]
    fn test_regulator_game_converges() {
        let solver = double_integrator_game(30);
        let x0 = DVector::from_vec(vec![2.0, 0.0, -1.5, 0.0]);
        let solution = solver.run(&x0).unwrap();

        assert_eq!(solution.states.len(), 31);
        assert_eq!(solution.controls[0].len(), 30);

        // Both players should have driven their positions toward zero
        let terminal = solution.states.last().unwrap();
        assert!(terminal[0].abs() < 0.5);
        assert!(terminal[2].abs() < 0.5);

        // Regulation must beat doing nothing
        let open_loop_cost: f64 = {
            let mut x = x0.clone();
            let mut total = 0.0;
            for _ in 0..30 {
                total += x[0] * x[0] + 0.1 * x[1] * x[1] + x[2] * x[2] + 0.1 * x[3] * x[3];
                // zero-control double integrator keeps velocity
                x[0] += 0.1 * x[1];
                x[2] += 0.1 * x[3];
            }
            total
        };
        assert!(solution.total_cost() < open_loop_cost + 1e-9);
    }

    #[test]
    fn test_value_approximation_shapes() {
        let solver = double_integrator_game(10);
        let x0 = DVector::from_vec(vec![1.0, 0.0, -1.0, 0.0]);
        let solution = solver.run(&x0).unwrap();

        for i in 0..2 {
            assert_eq!(solution.value_hessians[i].nrows(), 4);
            assert_eq!(solution.value_hessians[i].ncols(), 4);
            assert_eq!(solution.value_gradients[i].len(), 4);
            // Value Hessian of a convex regulator game is PSD on the diagonal
            for d in 0..4 {
                assert!(solution.value_hessians[i][(d, d)] >= -1e-9);
            }
        }
        assert_eq!(solution.strategies.len(), 10);
    }

    #[test]
    fn test_zero_initial_state_is_fixed_point() {
        let solver = double_integrator_game(10);
        let x0 = DVector::zeros(4);
        let solution = solver.run(&x0).unwrap();

        // Already at the regulation target: costs stay near zero
        assert!(solution.total_cost() < 1e-6);
        for x in &solution.states {
            assert!(x.amax() < 1e-6);
        }
    }
}
