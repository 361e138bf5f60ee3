//! Two-player linear-quadratic game solver
//!
//! Solves for the feedback Nash equilibrium of a discrete-time
//! two-player LQ game by coupled backward recursion. Each player's
//! first-order condition couples the two feedback laws; per step both
//! gains are obtained from one stacked linear solve.
//!
//! Quadratic terms follow the `c ~ g'dx + 1/2 dx' H dx` convention of
//! [`crate::cost::Quadraticized`], in deviation coordinates around the
//! nominal trajectory.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

/// Linearized dynamics for one step: `x+ = A dx + B1 u1 + B2 u2`
#[derive(Debug, Clone)]
pub struct LinearStep {
    pub a: DMatrix<f64>,
    pub b: [DMatrix<f64>; 2],
}

/// One player's quadratic stage cost
#[derive(Debug, Clone)]
pub struct QuadraticStageCost {
    pub hess_x: DMatrix<f64>,
    pub grad_x: DVector<f64>,
    pub hess_u: DMatrix<f64>,
    pub grad_u: DVector<f64>,
}

/// Affine feedback strategy for one step: `u_i = -P_i dx - alpha_i`
#[derive(Debug, Clone)]
pub struct LqStrategy {
    pub gains: [DMatrix<f64>; 2],
    pub feedforwards: [DVector<f64>; 2],
}

/// Feedback Nash solution of the LQ game
///
/// `value_hessians[k]` / `value_gradients[k]` are each player's
/// quadratic value approximation `V_i ~ 1/2 dx' Z_i dx + zeta_i' dx`
/// at step `k` (index 0 is the initial time, index N the terminal).
#[derive(Debug, Clone)]
pub struct LqSolution {
    pub strategies: Vec<LqStrategy>,
    pub value_hessians: Vec<[DMatrix<f64>; 2]>,
    pub value_gradients: Vec<[DVector<f64>; 2]>,
}

/// Solve the two-player LQ game over a horizon
///
/// `steps` has length N; `costs` has length N + 1 with the terminal
/// entry's control terms ignored.
pub fn solve_lq_game(
    steps: &[LinearStep],
    costs: &[[QuadraticStageCost; 2]],
) -> Result<LqSolution> {
    let n_steps = steps.len();
    if costs.len() != n_steps + 1 {
        return Err(Error::DimensionMismatch {
            context: "lq game costs",
            expected: n_steps + 1,
            actual: costs.len(),
        });
    }

    let terminal = &costs[n_steps];
    let mut z = [terminal[0].hess_x.clone(), terminal[1].hess_x.clone()];
    let mut zeta = [terminal[0].grad_x.clone(), terminal[1].grad_x.clone()];

    let mut strategies: Vec<LqStrategy> = Vec::with_capacity(n_steps);
    let mut value_hessians = vec![[z[0].clone(), z[1].clone()]];
    let mut value_gradients = vec![[zeta[0].clone(), zeta[1].clone()]];

    for k in (0..n_steps).rev() {
        let step = &steps[k];
        let nx = step.a.nrows();
        let m1 = step.b[0].ncols();
        let m2 = step.b[1].ncols();
        let stage = &costs[k];

        let b1t_z1 = step.b[0].transpose() * &z[0];
        let b2t_z2 = step.b[1].transpose() * &z[1];

        // Stacked first-order conditions of both players
        let mut lhs = DMatrix::zeros(m1 + m2, m1 + m2);
        lhs.view_mut((0, 0), (m1, m1))
            .copy_from(&(&stage[0].hess_u + &b1t_z1 * &step.b[0]));
        lhs.view_mut((0, m1), (m1, m2))
            .copy_from(&(&b1t_z1 * &step.b[1]));
        lhs.view_mut((m1, 0), (m2, m1))
            .copy_from(&(&b2t_z2 * &step.b[0]));
        lhs.view_mut((m1, m1), (m2, m2))
            .copy_from(&(&stage[1].hess_u + &b2t_z2 * &step.b[1]));

        // Gain and feedforward right-hand sides share the factorization
        let mut rhs = DMatrix::zeros(m1 + m2, nx + 1);
        rhs.view_mut((0, 0), (m1, nx)).copy_from(&(&b1t_z1 * &step.a));
        rhs.view_mut((m1, 0), (m2, nx)).copy_from(&(&b2t_z2 * &step.a));
        rhs.view_mut((0, nx), (m1, 1))
            .copy_from(&(step.b[0].transpose() * &zeta[0] + &stage[0].grad_u));
        rhs.view_mut((m1, nx), (m2, 1))
            .copy_from(&(step.b[1].transpose() * &zeta[1] + &stage[1].grad_u));

        let solution = lhs
            .lu()
            .solve(&rhs)
            .ok_or(Error::SingularMatrix {
                context: "solving coupled feedback equations",
            })?;

        let p = [
            solution.view((0, 0), (m1, nx)).clone_owned(),
            solution.view((m1, 0), (m2, nx)).clone_owned(),
        ];
        let ff_column = solution.column(nx);
        let alpha = [
            ff_column.rows(0, m1).into_owned(),
            ff_column.rows(m1, m2).into_owned(),
        ];

        // Closed loop under both feedback laws
        let f = &step.a - &step.b[0] * &p[0] - &step.b[1] * &p[1];
        let beta = -(&step.b[0] * &alpha[0] + &step.b[1] * &alpha[1]);

        for i in 0..2 {
            let r_alpha = &stage[i].hess_u * &alpha[i];
            let zeta_next =
                &stage[i].grad_x + p[i].transpose() * (&r_alpha - &stage[i].grad_u)
                    + f.transpose() * (&z[i] * &beta + &zeta[i]);
            let z_next = &stage[i].hess_x
                + p[i].transpose() * &stage[i].hess_u * &p[i]
                + f.transpose() * &z[i] * &f;
            // Symmetrize against drift from repeated products
            z[i] = (&z_next + z_next.transpose()) * 0.5;
            zeta[i] = zeta_next;
        }

        strategies.push(LqStrategy {
            gains: p,
            feedforwards: alpha,
        });
        value_hessians.push([z[0].clone(), z[1].clone()]);
        value_gradients.push([zeta[0].clone(), zeta[1].clone()]);
    }

    strategies.reverse();
    value_hessians.reverse();
    value_gradients.reverse();

    Ok(LqSolution {
        strategies,
        value_hessians,
        value_gradients,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_step(a: f64, b1: f64, b2: f64) -> LinearStep {
        LinearStep {
            a: DMatrix::identity(2, 2) * a,
            b: [
                DMatrix::from_row_slice(2, 1, &[b1, 0.0]),
                DMatrix::from_row_slice(2, 1, &[0.0, b2]),
            ],
        }
    }

    fn decoupled_cost(q1: f64, q2: f64, r1: f64, r2: f64) -> [QuadraticStageCost; 2] {
        let mut q1_mat = DMatrix::zeros(2, 2);
        q1_mat[(0, 0)] = q1;
        let mut q2_mat = DMatrix::zeros(2, 2);
        q2_mat[(1, 1)] = q2;
        [
            QuadraticStageCost {
                hess_x: q1_mat,
                grad_x: DVector::zeros(2),
                hess_u: DMatrix::from_element(1, 1, r1),
                grad_u: DVector::zeros(1),
            },
            QuadraticStageCost {
                hess_x: q2_mat,
                grad_x: DVector::zeros(2),
                hess_u: DMatrix::from_element(1, 1, r2),
                grad_u: DVector::zeros(1),
            },
        ]
    }

    #[test]
    fn test_decoupled_game_matches_lqr() {
        // Each player controls their own scalar state; fully decoupled,
        // so the Nash gains must equal the single-player LQR gains.
        let n_steps = 20;
        let (a, b, q, r) = (1.0, 0.5, 1.0, 0.1);

        let steps: Vec<LinearStep> = (0..n_steps).map(|_| scalar_step(a, b, b)).collect();
        let costs: Vec<[QuadraticStageCost; 2]> = (0..=n_steps)
            .map(|_| decoupled_cost(q, q, r, r))
            .collect();

        let solution = solve_lq_game(&steps, &costs).unwrap();

        // Scalar LQR backward recursion for reference
        let mut s = q;
        let mut lqr_gain = 0.0;
        for _ in 0..n_steps {
            lqr_gain = (b * s * a) / (r + b * s * b);
            s = q + lqr_gain * r * lqr_gain + (a - b * lqr_gain) * s * (a - b * lqr_gain);
        }

        let p1 = &solution.strategies[0].gains[0];
        assert!((p1[(0, 0)] - lqr_gain).abs() < 1e-9);
        // No cross-coupling in a decoupled game
        assert!(p1[(0, 1)].abs() < 1e-9);

        // Value Hessian at the initial time matches the LQR cost-to-go
        let z1 = &solution.value_hessians[0][0];
        assert!((z1[(0, 0)] - s).abs() < 1e-9);
    }

    #[test]
    fn test_feedback_stabilizes_closed_loop() {
        let n_steps = 50;
        let steps: Vec<LinearStep> = (0..n_steps).map(|_| scalar_step(1.0, 0.4, 0.4)).collect();
        let costs: Vec<[QuadraticStageCost; 2]> = (0..=n_steps)
            .map(|_| decoupled_cost(1.0, 1.0, 0.1, 0.1))
            .collect();

        let solution = solve_lq_game(&steps, &costs).unwrap();

        let mut x = DVector::from_vec(vec![5.0, -3.0]);
        for strategy in &solution.strategies {
            let u1 = -&strategy.gains[0] * &x - &strategy.feedforwards[0];
            let u2 = -&strategy.gains[1] * &x - &strategy.feedforwards[1];
            x = &steps[0].a * &x + &steps[0].b[0] * u1 + &steps[0].b[1] * u2;
        }
        assert!(x.amax() < 0.1);
    }

    #[test]
    fn test_zero_control_cost_is_singular() {
        let steps = vec![scalar_step(1.0, 0.0, 0.0)];
        let costs = vec![decoupled_cost(1.0, 1.0, 0.0, 0.0), decoupled_cost(1.0, 1.0, 0.0, 0.0)];

        let result = solve_lq_game(&steps, &costs);
        assert!(matches!(result, Err(Error::SingularMatrix { .. })));
    }

    #[test]
    fn test_cost_length_mismatch() {
        let steps = vec![scalar_step(1.0, 0.5, 0.5)];
        let costs = vec![decoupled_cost(1.0, 1.0, 0.1, 0.1)];
        let result = solve_lq_game(&steps, &costs);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }
}
