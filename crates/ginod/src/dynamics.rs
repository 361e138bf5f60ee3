//! Physical system dynamics
//!
//! Continuous-time vector fields for single agents and their two-player
//! product system, plus discretization and finite-difference
//! linearization used by the subgame solvers.

use nalgebra::{DMatrix, DVector};

use crate::types::{Dt, IntegrationMethod};

/// Step size scale for finite-difference linearization
const FD_LIN_EPS: f64 = 1e-6;

/// Continuous-time dynamics of a single agent
pub trait AgentDynamics: Send + Sync {
    fn state_dim(&self) -> usize;
    fn control_dim(&self) -> usize;
    /// Continuous vector field on this agent's own state
    fn x_dot(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64>;
}

/// Continuous-time dynamics of the two-player joint system
pub trait JointDynamics: Send + Sync {
    fn state_dim(&self) -> usize;
    fn control_dims(&self) -> [usize; 2];
    /// Continuous vector field on the joint state
    fn x_dot(&self, x: &DVector<f64>, controls: [&DVector<f64>; 2]) -> DVector<f64>;
}

/// Kinematic unicycle car
///
/// State `[px, py, theta, v]`, control `[accel, yaw_rate]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicycleCar;

impl AgentDynamics for UnicycleCar {
    fn state_dim(&self) -> usize {
        4
    }

    fn control_dim(&self) -> usize {
        2
    }

    fn x_dot(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let theta = x[2];
        let v = x[3];
        DVector::from_vec(vec![v * theta.cos(), v * theta.sin(), u[1], u[0]])
    }
}

/// One-dimensional double integrator
///
/// State `[p, v]`, control `[a]`. Linear, used as a solver reference
/// system.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleIntegrator;

impl AgentDynamics for DoubleIntegrator {
    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn x_dot(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![x[1], u[0]])
    }
}

/// Product of two agents' dynamics on the stacked joint state
pub struct ProductSystem {
    agents: [Box<dyn AgentDynamics>; 2],
}

impl ProductSystem {
    pub fn new(first: Box<dyn AgentDynamics>, second: Box<dyn AgentDynamics>) -> Self {
        Self {
            agents: [first, second],
        }
    }

    /// State offset of each agent within the joint state
    pub fn state_offsets(&self) -> [usize; 2] {
        [0, self.agents[0].state_dim()]
    }
}

impl JointDynamics for ProductSystem {
    fn state_dim(&self) -> usize {
        self.agents[0].state_dim() + self.agents[1].state_dim()
    }

    fn control_dims(&self) -> [usize; 2] {
        [self.agents[0].control_dim(), self.agents[1].control_dim()]
    }

    fn x_dot(&self, x: &DVector<f64>, controls: [&DVector<f64>; 2]) -> DVector<f64> {
        let n1 = self.agents[0].state_dim();
        let n2 = self.agents[1].state_dim();
        let x1 = x.rows(0, n1).clone_owned();
        let x2 = x.rows(n1, n2).clone_owned();
        let d1 = self.agents[0].x_dot(&x1, controls[0]);
        let d2 = self.agents[1].x_dot(&x2, controls[1]);

        let mut out = DVector::zeros(n1 + n2);
        out.rows_mut(0, n1).copy_from(&d1);
        out.rows_mut(n1, n2).copy_from(&d2);
        out
    }
}

/// Discrete-time wrapper around continuous joint dynamics
///
/// Controls are held constant over the step (zero-order hold).
pub struct Discretized {
    system: Box<dyn JointDynamics>,
    dt: Dt,
    method: IntegrationMethod,
}

impl Discretized {
    pub fn new(system: Box<dyn JointDynamics>, dt: Dt, method: IntegrationMethod) -> Self {
        Self { system, dt, method }
    }

    pub fn dt(&self) -> Dt {
        self.dt
    }

    pub fn state_dim(&self) -> usize {
        self.system.state_dim()
    }

    pub fn control_dims(&self) -> [usize; 2] {
        self.system.control_dims()
    }

    /// Advance the joint state by one step
    pub fn step(&self, x: &DVector<f64>, controls: [&DVector<f64>; 2]) -> DVector<f64> {
        let dt = self.dt.seconds();
        let rate = |x: &DVector<f64>| self.system.x_dot(x, controls);

        match self.method {
            IntegrationMethod::Euler => x + rate(x) * dt,
            IntegrationMethod::Midpoint => {
                let k1 = rate(x);
                let mid = x + k1 * (dt * 0.5);
                x + rate(&mid) * dt
            }
            IntegrationMethod::Rk4 => {
                let k1 = rate(x);
                let k2 = rate(&(x + &k1 * (dt * 0.5)));
                let k3 = rate(&(x + &k2 * (dt * 0.5)));
                let k4 = rate(&(x + &k3 * dt));
                x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
            }
        }
    }

    /// Discrete-time Jacobians `(A, [B1, B2])` at `(x, controls)`
    ///
    /// Central finite differences of `step`.
    pub fn linearize(
        &self,
        x: &DVector<f64>,
        controls: [&DVector<f64>; 2],
    ) -> (DMatrix<f64>, [DMatrix<f64>; 2]) {
        let nx = x.len();
        let mut a = DMatrix::zeros(nx, nx);
        let mut xp = x.clone();
        for i in 0..nx {
            let h = FD_LIN_EPS * x[i].abs().max(1.0);
            xp[i] = x[i] + h;
            let up = self.step(&xp, controls);
            xp[i] = x[i] - h;
            let dn = self.step(&xp, controls);
            xp[i] = x[i];
            a.set_column(i, &((up - dn) / (2.0 * h)));
        }

        let dims = self.control_dims();
        let mut bs = [
            DMatrix::zeros(nx, dims[0]),
            DMatrix::zeros(nx, dims[1]),
        ];
        for player in 0..2 {
            let mut uq = controls[player].clone();
            for i in 0..dims[player] {
                let u0 = controls[player][i];
                let h = FD_LIN_EPS * u0.abs().max(1.0);
                uq[i] = u0 + h;
                let up = if player == 0 {
                    self.step(x, [&uq, controls[1]])
                } else {
                    self.step(x, [controls[0], &uq])
                };
                uq[i] = u0 - h;
                let dn = if player == 0 {
                    self.step(x, [&uq, controls[1]])
                } else {
                    self.step(x, [controls[0], &uq])
                };
                uq[i] = u0;
                bs[player].set_column(i, &((up - dn) / (2.0 * h)));
            }
        }

        (a, bs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_car_system(dt: f64, method: IntegrationMethod) -> Discretized {
        Discretized::new(
            Box::new(ProductSystem::new(
                Box::new(UnicycleCar),
                Box::new(UnicycleCar),
            )),
            Dt(dt),
            method,
        )
    }

    #[test]
    fn test_unicycle_straight_line() {
        let system = two_car_system(0.1, IntegrationMethod::Euler);
        // Both cars heading +x at 10 m/s, no control
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 10.0, 0.0, 5.0, 0.0, 10.0]);
        let u = DVector::zeros(2);
        let next = system.step(&x, [&u, &u]);

        assert!((next[0] - 1.0).abs() < 1e-10);
        assert!((next[1]).abs() < 1e-10);
        assert!((next[4] - 1.0).abs() < 1e-10);
        assert!((next[5] - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_rk4_more_accurate_than_euler_on_turn() {
        // Constant yaw rate traces a circle; compare against the exact arc
        let dt = 0.1;
        let omega = 1.0;
        let v = 10.0;
        let euler = two_car_system(dt, IntegrationMethod::Euler);
        let rk4 = two_car_system(dt, IntegrationMethod::Rk4);

        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, v, 0.0, 0.0, 0.0, 0.0]);
        let u1 = DVector::from_vec(vec![0.0, omega]);
        let u2 = DVector::zeros(2);

        let exact_px = v / omega * (omega * dt).sin();
        let exact_py = v / omega * (1.0 - (omega * dt).cos());

        let xe = euler.step(&x, [&u1, &u2]);
        let xr = rk4.step(&x, [&u1, &u2]);

        let err_euler = (xe[0] - exact_px).hypot(xe[1] - exact_py);
        let err_rk4 = (xr[0] - exact_px).hypot(xr[1] - exact_py);
        assert!(err_rk4 < err_euler);
        assert!(err_rk4 < 1e-6);
    }

    #[test]
    fn test_double_integrator_linearization_is_exact() {
        let dt = 0.2;
        let system = Discretized::new(
            Box::new(ProductSystem::new(
                Box::new(DoubleIntegrator),
                Box::new(DoubleIntegrator),
            )),
            Dt(dt),
            IntegrationMethod::Euler,
        );

        let x = DVector::from_vec(vec![1.0, 2.0, -1.0, 0.5]);
        let u = DVector::from_vec(vec![0.3]);
        let (a, bs) = system.linearize(&x, [&u, &u]);

        // Euler on a linear system: A = I + dt * A_c exactly
        let mut expected_a = DMatrix::identity(4, 4);
        expected_a[(0, 1)] = dt;
        expected_a[(2, 3)] = dt;
        assert!((a - expected_a).amax() < 1e-8);

        assert!((bs[0][(1, 0)] - dt).abs() < 1e-8);
        assert!((bs[1][(3, 0)] - dt).abs() < 1e-8);
        assert!(bs[0][(3, 0)].abs() < 1e-8);
    }
}
