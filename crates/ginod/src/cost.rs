//! Cost functions for two-player trajectory games
//!
//! Each cost evaluates on the joint state of both subsystems and one
//! player's control. Gradients and Hessians default to central finite
//! differences; cheap closed forms override them where available.

use nalgebra::{DMatrix, DVector};

/// Step size scale for finite-difference gradients
const FD_GRAD_EPS: f64 = 1e-6;
/// Step size scale for finite-difference Hessians
const FD_HESS_EPS: f64 = 1e-4;
/// Clamp for exponential penalties shared by proximity-style costs
const MAX_EXP_BOUND: f64 = 1e5;

/// A single cost term
///
/// `evaluate` is the only required method. The provided `gradient` and
/// `hessian` perturb the state and control with central differences,
/// with step sizes scaled by the magnitude of the perturbed entry.
pub trait Cost: Send + Sync {
    /// Evaluates this cost at the given joint state and control.
    ///
    /// `x` is the concatenated state of all subsystems, `u` the control of
    /// one subsystem, `k` the time step.
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, k: usize) -> f64;

    /// Gradients `(dc/dx, dc/du)` at `(x, u, k)`.
    fn gradient(&self, x: &DVector<f64>, u: &DVector<f64>, k: usize) -> (DVector<f64>, DVector<f64>) {
        let mut grad_x = DVector::zeros(x.len());
        let mut xp = x.clone();
        for i in 0..x.len() {
            let h = FD_GRAD_EPS * x[i].abs().max(1.0);
            xp[i] = x[i] + h;
            let up = self.evaluate(&xp, u, k);
            xp[i] = x[i] - h;
            let dn = self.evaluate(&xp, u, k);
            xp[i] = x[i];
            grad_x[i] = (up - dn) / (2.0 * h);
        }

        let mut grad_u = DVector::zeros(u.len());
        let mut uq = u.clone();
        for i in 0..u.len() {
            let h = FD_GRAD_EPS * u[i].abs().max(1.0);
            uq[i] = u[i] + h;
            let up = self.evaluate(x, &uq, k);
            uq[i] = u[i] - h;
            let dn = self.evaluate(x, &uq, k);
            uq[i] = u[i];
            grad_u[i] = (up - dn) / (2.0 * h);
        }

        (grad_x, grad_u)
    }

    /// Hessians `(d2c/dx2, d2c/du2)` at `(x, u, k)`.
    fn hessian(&self, x: &DVector<f64>, u: &DVector<f64>, k: usize) -> (DMatrix<f64>, DMatrix<f64>) {
        let hess_x = fd_hessian(x, |xv| self.evaluate(xv, u, k));
        let hess_u = fd_hessian(u, |uv| self.evaluate(x, uv, k));
        (hess_x, hess_u)
    }
}

/// Central-difference Hessian of `f` at `v`
fn fd_hessian<F: Fn(&DVector<f64>) -> f64>(v: &DVector<f64>, f: F) -> DMatrix<f64> {
    let n = v.len();
    let mut hess = DMatrix::zeros(n, n);
    let mut w = v.clone();
    let base = f(v);

    for i in 0..n {
        let hi = FD_HESS_EPS * v[i].abs().max(1.0);

        // Diagonal: (f(+i) - 2 f + f(-i)) / hi^2
        w[i] = v[i] + hi;
        let fp = f(&w);
        w[i] = v[i] - hi;
        let fm = f(&w);
        w[i] = v[i];
        hess[(i, i)] = (fp - 2.0 * base + fm) / (hi * hi);

        // Off-diagonal: four-point stencil, symmetric fill
        for j in (i + 1)..n {
            let hj = FD_HESS_EPS * v[j].abs().max(1.0);
            w[i] = v[i] + hi;
            w[j] = v[j] + hj;
            let fpp = f(&w);
            w[j] = v[j] - hj;
            let fpm = f(&w);
            w[i] = v[i] - hi;
            let fmm = f(&w);
            w[j] = v[j] + hj;
            let fmp = f(&w);
            w[i] = v[i];
            w[j] = v[j];
            let value = (fpp - fpm - fmp + fmm) / (4.0 * hi * hj);
            hess[(i, j)] = value;
            hess[(j, i)] = value;
        }
    }
    hess
}

/// Local quadratic approximation of a player's cost at one step
#[derive(Debug, Clone)]
pub struct Quadraticized {
    pub cost: f64,
    pub grad_x: DVector<f64>,
    pub grad_u: DVector<f64>,
    pub hess_x: DMatrix<f64>,
    pub hess_u: DMatrix<f64>,
}

/// Weighted combination of cost terms for a single player
#[derive(Default)]
pub struct PlayerCost {
    costs: Vec<(Box<dyn Cost>, f64)>,
}

impl PlayerCost {
    pub fn new() -> Self {
        Self { costs: Vec::new() }
    }

    /// Add a cost term with a multiplicative weight
    pub fn add_cost(&mut self, cost: Box<dyn Cost>, weight: f64) {
        self.costs.push((cost, weight));
    }

    /// Total weighted cost at `(x, u, k)`
    pub fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, k: usize) -> f64 {
        self.costs
            .iter()
            .map(|(cost, weight)| weight * cost.evaluate(x, u, k))
            .sum()
    }

    /// Total weighted cost along a trajectory
    ///
    /// `us` may be one shorter than `xs`; the terminal state is then
    /// evaluated with a zero control.
    pub fn trajectory_cost(&self, xs: &[DVector<f64>], us: &[DVector<f64>], control_dim: usize) -> f64 {
        let zero = DVector::zeros(control_dim);
        xs.iter()
            .enumerate()
            .map(|(k, x)| self.evaluate(x, us.get(k).unwrap_or(&zero), k))
            .sum()
    }

    /// Quadraticize the combined cost at `(x, u, k)`
    pub fn quadraticize(&self, x: &DVector<f64>, u: &DVector<f64>, k: usize) -> Quadraticized {
        let mut total = Quadraticized {
            cost: 0.0,
            grad_x: DVector::zeros(x.len()),
            grad_u: DVector::zeros(u.len()),
            hess_x: DMatrix::zeros(x.len(), x.len()),
            hess_u: DMatrix::zeros(u.len(), u.len()),
        };

        for (cost, weight) in &self.costs {
            total.cost += weight * cost.evaluate(x, u, k);
            let (gx, gu) = cost.gradient(x, u, k);
            total.grad_x += gx * *weight;
            total.grad_u += gu * *weight;
            let (hx, hu) = cost.hessian(x, u, k);
            total.hess_x += hx * *weight;
            total.hess_u += hu * *weight;
        }
        total
    }
}

/// Quadratic penalty `(v[dim] - origin)^2` on a state or control channel
#[derive(Debug, Clone)]
pub struct QuadraticCost {
    pub dimension: usize,
    pub origin: f64,
    pub on_state: bool,
}

impl Cost for QuadraticCost {
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, _k: usize) -> f64 {
        let v = if self.on_state { x } else { u };
        let d = v[self.dimension] - self.origin;
        d * d
    }

    fn gradient(&self, x: &DVector<f64>, u: &DVector<f64>, _k: usize) -> (DVector<f64>, DVector<f64>) {
        let mut grad_x = DVector::zeros(x.len());
        let mut grad_u = DVector::zeros(u.len());
        if self.on_state {
            grad_x[self.dimension] = 2.0 * (x[self.dimension] - self.origin);
        } else {
            grad_u[self.dimension] = 2.0 * (u[self.dimension] - self.origin);
        }
        (grad_x, grad_u)
    }

    fn hessian(&self, x: &DVector<f64>, u: &DVector<f64>, _k: usize) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut hess_x = DMatrix::zeros(x.len(), x.len());
        let mut hess_u = DMatrix::zeros(u.len(), u.len());
        if self.on_state {
            hess_x[(self.dimension, self.dimension)] = 2.0;
        } else {
            hess_u[(self.dimension, self.dimension)] = 2.0;
        }
        (hess_x, hess_u)
    }
}

/// Squared deviation from a reference value on a state or control channel
#[derive(Debug, Clone)]
pub struct ReferenceDeviationCost {
    pub reference: f64,
    pub dimension: usize,
    pub on_state: bool,
}

impl Cost for ReferenceDeviationCost {
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, _k: usize) -> f64 {
        let v = if self.on_state { x } else { u };
        let d = v[self.dimension] - self.reference;
        d * d
    }

    fn gradient(&self, x: &DVector<f64>, u: &DVector<f64>, _k: usize) -> (DVector<f64>, DVector<f64>) {
        let mut grad_x = DVector::zeros(x.len());
        let mut grad_u = DVector::zeros(u.len());
        if self.on_state {
            grad_x[self.dimension] = 2.0 * (x[self.dimension] - self.reference);
        } else {
            grad_u[self.dimension] = 2.0 * (u[self.dimension] - self.reference);
        }
        (grad_x, grad_u)
    }

    fn hessian(&self, x: &DVector<f64>, u: &DVector<f64>, _k: usize) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut hess_x = DMatrix::zeros(x.len(), x.len());
        let mut hess_u = DMatrix::zeros(u.len(), u.len());
        if self.on_state {
            hess_x[(self.dimension, self.dimension)] = 2.0;
        } else {
            hess_u[(self.dimension, self.dimension)] = 2.0;
        }
        (hess_x, hess_u)
    }
}

/// Reference deviation active only past a longitudinal position threshold
#[derive(Debug, Clone)]
pub struct RegionReferenceCost {
    pub reference: f64,
    pub dimension: usize,
    /// Longitudinal position channel that gates the cost
    pub px_dim: usize,
    /// Cost is active where `x[px_dim] >= px_lower`
    pub px_lower: f64,
}

impl Cost for RegionReferenceCost {
    fn evaluate(&self, x: &DVector<f64>, _u: &DVector<f64>, _k: usize) -> f64 {
        if x[self.px_dim] >= self.px_lower {
            let d = x[self.dimension] - self.reference;
            d * d
        } else {
            0.0
        }
    }
}

/// One-sided exponential-quadratic barrier on a state or control channel
///
/// Flat on one side of the threshold, `exp((v - threshold)^2)` on the other.
#[derive(Debug, Clone)]
pub struct SemiquadraticCost {
    pub dimension: usize,
    pub threshold: f64,
    /// Penalize values above the threshold when true, below when false
    pub oriented_right: bool,
    pub on_state: bool,
}

impl Cost for SemiquadraticCost {
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, _k: usize) -> f64 {
        let v = if self.on_state { x[self.dimension] } else { u[self.dimension] };
        let active = if self.oriented_right {
            v > self.threshold
        } else {
            v < self.threshold
        };
        if active {
            let d = v - self.threshold;
            (d * d).exp()
        } else {
            0.0
        }
    }
}

/// Penalizes proximity to a point obstacle: `min(dist - max_distance, 0)^2`
#[derive(Debug, Clone)]
pub struct ObstacleCost {
    pub x_index: usize,
    pub y_index: usize,
    pub px: f64,
    pub py: f64,
    pub max_distance: f64,
}

impl Cost for ObstacleCost {
    fn evaluate(&self, x: &DVector<f64>, _u: &DVector<f64>, _k: usize) -> f64 {
        let dx = x[self.x_index] - self.px;
        let dy = x[self.y_index] - self.py;
        let dist = (dx * dx + dy * dy).sqrt();
        let margin = (dist - self.max_distance).min(0.0);
        margin * margin
    }
}

/// Exponential proximity penalty to a fixed point
#[derive(Debug, Clone)]
pub struct ProximityCost {
    pub x_index: usize,
    pub y_index: usize,
    pub px: f64,
    pub py: f64,
    pub max_distance: f64,
}

impl Cost for ProximityCost {
    fn evaluate(&self, x: &DVector<f64>, _u: &DVector<f64>, _k: usize) -> f64 {
        let dx = x[self.x_index] - self.px;
        let dy = x[self.y_index] - self.py;
        let dist = (dx * dx + dy * dy).sqrt();
        let margin = (dist - self.max_distance).min(0.0);
        (margin * margin).exp()
    }
}

/// Mutual proximity penalty on a two-player product state
///
/// Penalizes both players' relative distance symmetrically; the
/// exponential is clamped to keep the quadraticization bounded.
#[derive(Debug, Clone)]
pub struct PairwiseProximityCost {
    /// `(x_index, y_index)` per player into the joint state
    pub positions: [(usize, usize); 2],
    pub max_distance: f64,
}

impl Cost for PairwiseProximityCost {
    fn evaluate(&self, x: &DVector<f64>, _u: &DVector<f64>, _k: usize) -> f64 {
        let (x1, y1) = self.positions[0];
        let (x2, y2) = self.positions[1];
        let dx = x[x1] - x[x2];
        let dy = x[y1] - x[y2];
        let dist = (dx * dx + dy * dy).sqrt();
        let margin = (dist - self.max_distance).min(0.0);
        // Both players incur the same one-sided penalty
        2.0 * (margin * margin).exp().min(MAX_EXP_BOUND)
    }
}

/// Speed-limit penalty active within a longitudinal region
#[derive(Debug, Clone)]
pub struct RegionSpeedLimitCost {
    pub v_index: usize,
    pub px_index: usize,
    pub max_v: f64,
    pub px_lower: f64,
    pub px_upper: f64,
}

impl RegionSpeedLimitCost {
    const MAX_EXP: f64 = 1e3;
}

impl Cost for RegionSpeedLimitCost {
    fn evaluate(&self, x: &DVector<f64>, _u: &DVector<f64>, _k: usize) -> f64 {
        let px = x[self.px_index];
        let v = x[self.v_index];
        if v > self.max_v && self.px_lower < px && px < self.px_upper {
            let d = v - self.max_v;
            (d * d).exp().min(Self::MAX_EXP)
        } else {
            0.0
        }
    }
}

/// Soft box constraint on a control channel
///
/// `q1 (e^{q2 (u - max)} - 1) + q1 (e^{q2 (min - u)} - 1)`
#[derive(Debug, Clone)]
pub struct BoxConstraintCost {
    pub u_index: usize,
    pub control_min: f64,
    pub control_max: f64,
    pub q1: f64,
    pub q2: f64,
}

impl Cost for BoxConstraintCost {
    fn evaluate(&self, _x: &DVector<f64>, u: &DVector<f64>, _k: usize) -> f64 {
        let control = u[self.u_index];
        let margin_ub = control - self.control_max;
        let margin_lb = self.control_min - control;
        let c_ub = self.q1 * ((self.q2 * margin_ub).exp() - 1.0);
        let c_lb = self.q1 * ((self.q2 * margin_lb).exp() - 1.0);
        c_lb + c_ub
    }
}
