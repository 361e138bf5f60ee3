//! Intent-conditioned subgame grid
//!
//! One planning step solves an `n1 x n2` grid of subgames, one per
//! intent pair, all from the same initial state. The grid exposes the
//! quadratic value data the opinion dynamics and QMDP planners consume.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{instrument, trace};

use crate::error::{Error, Result};
use crate::solver::{IlqSolver, SubgameSolution};
use crate::types::PlayerId;

/// Solved subgames for one planning step
pub struct SubgameGrid {
    n1: usize,
    n2: usize,
    look_ahead: usize,
    /// Row-major by `(l1, l2)`
    solutions: Vec<SubgameSolution>,
}

impl SubgameGrid {
    /// Solve every intent pair's subgame from `x0`
    ///
    /// Subgames are independent; the grid is solved in parallel. The
    /// row-major result ordering is deterministic regardless of
    /// scheduling.
    #[instrument(skip_all, fields(n1 = solvers.len()))]
    pub fn solve(
        solvers: &[Vec<IlqSolver>],
        x0: &DVector<f64>,
        look_ahead: usize,
    ) -> Result<Self> {
        let n1 = solvers.len();
        if n1 == 0 {
            return Err(Error::Scenario("empty subgame grid".to_string()));
        }
        let n2 = solvers[0].len();
        if n2 == 0 || solvers.iter().any(|row| row.len() != n2) {
            return Err(Error::Scenario(
                "subgame grid rows must be non-empty and equal length".to_string(),
            ));
        }
        if look_ahead > solvers[0][0].horizon() {
            return Err(Error::Scenario(format!(
                "look-ahead {} exceeds subgame horizon {}",
                look_ahead,
                solvers[0][0].horizon()
            )));
        }

        let solutions: Vec<SubgameSolution> = (0..n1 * n2)
            .into_par_iter()
            .map(|idx| {
                let (l1, l2) = (idx / n2, idx % n2);
                trace!(l1, l2, "solving subgame");
                solvers[l1][l2].run(x0)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            n1,
            n2,
            look_ahead,
            solutions,
        })
    }

    /// Grid dimensions `(n1, n2)`
    pub fn dims(&self) -> (usize, usize) {
        (self.n1, self.n2)
    }

    pub fn look_ahead(&self) -> usize {
        self.look_ahead
    }

    /// Subgame solution for one intent pair
    pub fn solution(&self, l1: usize, l2: usize) -> Result<&SubgameSolution> {
        if l1 >= self.n1 || l2 >= self.n2 {
            return Err(Error::IntentOutOfRange {
                l1,
                l2,
                n1: self.n1,
                n2: self.n2,
            });
        }
        Ok(&self.solutions[l1 * self.n2 + l2])
    }

    /// Nominal look-ahead state on the `(l1, l2)` trajectory
    pub fn x_nom(&self, l1: usize, l2: usize) -> Result<&DVector<f64>> {
        Ok(&self.solution(l1, l2)?.states[self.look_ahead])
    }

    pub fn value_hessian(&self, player: PlayerId, l1: usize, l2: usize) -> Result<&DMatrix<f64>> {
        Ok(&self.solution(l1, l2)?.value_hessians[player.index()])
    }

    pub fn value_gradient(&self, player: PlayerId, l1: usize, l2: usize) -> Result<&DVector<f64>> {
        Ok(&self.solution(l1, l2)?.value_gradients[player.index()])
    }

    /// Nominal cost of each intent pair for one player, `n1 x n2`
    pub fn nominal_cost_matrix(&self, player: PlayerId) -> DMatrix<f64> {
        DMatrix::from_fn(self.n1, self.n2, |l1, l2| {
            self.solutions[l1 * self.n2 + l2].costs[player.index()]
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cost::{PlayerCost, QuadraticCost};
    use crate::dynamics::{Discretized, DoubleIntegrator, ProductSystem};
    use crate::solver::IlqOptions;
    use crate::types::{Dt, IntegrationMethod};

    fn regulator_cost(own_position: usize) -> PlayerCost {
        let mut cost = PlayerCost::new();
        cost.add_cost(
            Box::new(QuadraticCost {
                dimension: own_position,
                origin: 0.0,
                on_state: true,
            }),
            1.0,
        );
        cost.add_cost(
            Box::new(QuadraticCost {
                dimension: 0,
                origin: 0.0,
                on_state: false,
            }),
            0.1,
        );
        cost
    }

    fn make_grid_solvers(n1: usize, n2: usize, horizon: usize) -> Vec<Vec<IlqSolver>> {
        (0..n1)
            .map(|_| {
                (0..n2)
                    .map(|_| {
                        let dynamics = Arc::new(Discretized::new(
                            Box::new(ProductSystem::new(
                                Box::new(DoubleIntegrator),
                                Box::new(DoubleIntegrator),
                            )),
                            Dt(0.1),
                            IntegrationMethod::Euler,
                        ));
                        IlqSolver::new(
                            dynamics,
                            [regulator_cost(0), regulator_cost(2)],
                            horizon,
                            IlqOptions::default(),
                        )
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_grid_solve_and_accessors() {
        let solvers = make_grid_solvers(2, 2, 10);
        let x0 = DVector::from_vec(vec![1.0, 0.0, -1.0, 0.0]);
        let grid = SubgameGrid::solve(&solvers, &x0, 3).unwrap();

        assert_eq!(grid.dims(), (2, 2));
        assert_eq!(grid.solution(0, 0).unwrap().states.len(), 11);
        assert_eq!(grid.x_nom(1, 1).unwrap().len(), 4);

        let costs = grid.nominal_cost_matrix(PlayerId::P1);
        assert_eq!(costs.nrows(), 2);
        assert_eq!(costs.ncols(), 2);
        assert!(costs.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_intent_out_of_range() {
        let solvers = make_grid_solvers(2, 2, 5);
        let x0 = DVector::zeros(4);
        let grid = SubgameGrid::solve(&solvers, &x0, 0).unwrap();

        assert!(matches!(
            grid.solution(2, 0),
            Err(Error::IntentOutOfRange { .. })
        ));
    }

    #[test]
    fn test_look_ahead_beyond_horizon_rejected() {
        let solvers = make_grid_solvers(1, 1, 5);
        let x0 = DVector::zeros(4);
        assert!(matches!(
            SubgameGrid::solve(&solvers, &x0, 6),
            Err(Error::Scenario(_))
        ));
    }
}
