//! Game-induced nonlinear opinion dynamics
//!
//! Each player holds an opinion vector over their discrete intents and
//! an attention scalar. The opinion field is a saturated, mean-centered
//! nonlinear dynamics whose bias is induced by the subgame values: low
//! expected nominal cost attracts opinion toward that intent. Attention
//! relaxes toward a base level plus an excitation that grows with the
//! price of indecision.
//!
//! The joint opinion state is laid out `[z1, z2, att1, att2]` and is
//! advanced by explicit Euler with the opinion time step.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::subgame::SubgameGrid;
use crate::types::PlayerId;

/// Step size for the finite-difference opinion Jacobian
const FD_JAC_EPS: f64 = 1e-6;
/// Clamp on the attention excitation term
const EXCITATION_CLAMP: f64 = 10.0;
/// Guard below which the best-case cost is treated as zero
const POI_GUARD: f64 = 1e-9;

/// Numerically stable softmax
pub fn softmax(z: &DVector<f64>) -> DVector<f64> {
    let max = z.max();
    let exps = z.map(|v| (v - max).exp());
    let sum: f64 = exps.iter().sum();
    exps / sum
}

/// Joint opinion state of both players
#[derive(Debug, Clone, PartialEq)]
pub struct OpinionState {
    pub z1: DVector<f64>,
    pub z2: DVector<f64>,
    pub attention: [f64; 2],
}

impl OpinionState {
    /// Neutral state: zero opinions, given initial attention
    pub fn neutral(n1: usize, n2: usize, attention: f64) -> Self {
        Self {
            z1: DVector::zeros(n1),
            z2: DVector::zeros(n2),
            attention: [attention, attention],
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.z1.len(), self.z2.len())
    }

    /// Pack as `[z1, z2, att1, att2]`
    pub fn to_vector(&self) -> DVector<f64> {
        let (n1, n2) = self.dims();
        let mut out = DVector::zeros(n1 + n2 + 2);
        out.rows_mut(0, n1).copy_from(&self.z1);
        out.rows_mut(n1, n2).copy_from(&self.z2);
        out[n1 + n2] = self.attention[0];
        out[n1 + n2 + 1] = self.attention[1];
        out
    }

    /// Unpack from `[z1, z2, att1, att2]`
    pub fn from_vector(v: &DVector<f64>, n1: usize, n2: usize) -> Result<Self> {
        if v.len() != n1 + n2 + 2 {
            return Err(Error::DimensionMismatch {
                context: "opinion state vector",
                expected: n1 + n2 + 2,
                actual: v.len(),
            });
        }
        Ok(Self {
            z1: v.rows(0, n1).into_owned(),
            z2: v.rows(n1, n2).into_owned(),
            attention: [v[n1 + n2], v[n1 + n2 + 1]],
        })
    }

    /// Softmax belief over one player's intents
    pub fn belief(&self, player: PlayerId) -> DVector<f64> {
        match player {
            PlayerId::P1 => softmax(&self.z1),
            PlayerId::P2 => softmax(&self.z2),
        }
    }
}

/// Parameters of the opinion dynamics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpinionParams {
    /// Opinion damping `d`
    pub damping: f64,
    /// Self-reinforcement gain inside the saturation
    pub self_gain: f64,
    /// Scale of the game-induced bias
    pub bias_scale: f64,
    /// Base attention level
    pub attention_base: f64,
    /// Attention excitation gain on the price of indecision
    pub attention_gain: f64,
    /// Attention relaxation time constant (seconds)
    pub attention_tau: f64,
}

impl Default for OpinionParams {
    fn default() -> Self {
        Self {
            damping: 0.5,
            self_gain: 1.2,
            bias_scale: 2.0,
            attention_base: 0.4,
            attention_gain: 0.8,
            attention_tau: 1.0,
        }
    }
}

/// Time derivative of the joint opinion state
#[derive(Debug, Clone)]
pub struct OpinionDerivative {
    /// Derivative of `[z1, z2, att1, att2]`
    pub z_dot: DVector<f64>,
    /// Jacobian of the opinion block of the field, `(n1+n2) x (n1+n2)`
    pub jacobian: DMatrix<f64>,
    /// Price of indecision per player
    pub poi: [f64; 2],
}

/// The game-induced opinion dynamics model
#[derive(Debug, Clone)]
pub struct GameInducedDynamics {
    n1: usize,
    n2: usize,
    params: OpinionParams,
}

impl GameInducedDynamics {
    pub fn new(n1: usize, n2: usize, params: OpinionParams) -> Self {
        Self { n1, n2, params }
    }

    pub fn params(&self) -> &OpinionParams {
        &self.params
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.n1, self.n2)
    }

    /// Continuous-time derivative driven by the current subgame grid
    pub fn cont_time_dyn(
        &self,
        z: &OpinionState,
        grid: &SubgameGrid,
    ) -> Result<OpinionDerivative> {
        if grid.dims() != (self.n1, self.n2) {
            return Err(Error::DimensionMismatch {
                context: "subgame grid vs opinion dims",
                expected: self.n1 * self.n2,
                actual: grid.dims().0 * grid.dims().1,
            });
        }
        let c1 = grid.nominal_cost_matrix(PlayerId::P1);
        let c2 = grid.nominal_cost_matrix(PlayerId::P2);
        self.dyn_from_costs(z, &c1, &c2)
    }

    /// Continuous-time derivative from explicit nominal cost matrices
    ///
    /// `c1` and `c2` are each `n1 x n2`, indexed `(own intent of P1,
    /// own intent of P2)` for both players.
    pub fn dyn_from_costs(
        &self,
        z: &OpinionState,
        c1: &DMatrix<f64>,
        c2: &DMatrix<f64>,
    ) -> Result<OpinionDerivative> {
        let (n1, n2) = (self.n1, self.n2);
        if z.dims() != (n1, n2) {
            return Err(Error::DimensionMismatch {
                context: "opinion state dims",
                expected: n1 + n2,
                actual: z.dims().0 + z.dims().1,
            });
        }

        let opinion_dot = self.opinion_field(&z.z1, &z.z2, z.attention, c1, c2);
        let poi = [
            self.price_of_indecision(PlayerId::P1, z, c1),
            self.price_of_indecision(PlayerId::P2, z, c2),
        ];

        // Attention relaxes toward base level plus indecision excitation
        let mut att_dot = [0.0; 2];
        for i in 0..2 {
            let excitation =
                (self.params.attention_gain * (poi[i] - 1.0)).min(EXCITATION_CLAMP);
            let target = self.params.attention_base + excitation;
            att_dot[i] = (target - z.attention[i]) / self.params.attention_tau;
        }

        let jacobian = self.opinion_jacobian(z, c1, c2);

        let mut z_dot = DVector::zeros(n1 + n2 + 2);
        z_dot.rows_mut(0, n1 + n2).copy_from(&opinion_dot);
        z_dot[n1 + n2] = att_dot[0];
        z_dot[n1 + n2 + 1] = att_dot[1];

        if z_dot.iter().any(|v| !v.is_finite()) {
            return Err(Error::NumericError {
                context: "opinion dynamics",
                message: "non-finite opinion derivative".to_string(),
            });
        }

        Ok(OpinionDerivative {
            z_dot,
            jacobian,
            poi,
        })
    }

    /// The opinion block of the field: `[z1_dot, z2_dot]`
    fn opinion_field(
        &self,
        z1: &DVector<f64>,
        z2: &DVector<f64>,
        attention: [f64; 2],
        c1: &DMatrix<f64>,
        c2: &DMatrix<f64>,
    ) -> DVector<f64> {
        let sigma1 = softmax(z1);
        let sigma2 = softmax(z2);

        // Expected nominal cost per own intent, opponent marginalized
        let e1 = c1 * &sigma2;
        let e2 = c2.transpose() * &sigma1;

        let b1 = self.bias(&e1);
        let b2 = self.bias(&e2);

        let d1 = self.saturated_field(z1, &b1, attention[0]);
        let d2 = self.saturated_field(z2, &b2, attention[1]);

        let mut out = DVector::zeros(self.n1 + self.n2);
        out.rows_mut(0, self.n1).copy_from(&d1);
        out.rows_mut(self.n1, self.n2).copy_from(&d2);
        out
    }

    /// Game-induced bias: negative expected cost, mean-centered and
    /// normalized so the bias scale is dimensionless in cost units.
    fn bias(&self, expected_costs: &DVector<f64>) -> DVector<f64> {
        let mean = expected_costs.mean();
        let centered = expected_costs.map(|c| c - mean);
        let scale = centered.amax().max(POI_GUARD);
        centered * (-self.params.bias_scale / scale)
    }

    /// `-d z + att * center(tanh(alpha z + b))`
    fn saturated_field(&self, z: &DVector<f64>, bias: &DVector<f64>, attention: f64) -> DVector<f64> {
        let pre = z * self.params.self_gain + bias;
        let sat = pre.map(f64::tanh);
        let mean = sat.mean();
        let centered = sat.map(|v| v - mean);
        z * (-self.params.damping) + centered * attention
    }

    /// Price of indecision: belief-weighted expected nominal cost over
    /// the best achievable cost given the opponent's current belief.
    /// Equals 1 when fully decided on the best intent.
    fn price_of_indecision(&self, player: PlayerId, z: &OpinionState, c: &DMatrix<f64>) -> f64 {
        let own = z.belief(player);
        let other = z.belief(player.opponent());
        let expected_per_intent = match player {
            PlayerId::P1 => c * &other,
            PlayerId::P2 => c.transpose() * &other,
        };
        let expected = own.dot(&expected_per_intent);
        let best = expected_per_intent.min();
        if best > POI_GUARD {
            (expected / best).max(1.0)
        } else {
            1.0
        }
    }

    /// Central-difference Jacobian of the opinion block w.r.t. `[z1, z2]`
    fn opinion_jacobian(
        &self,
        z: &OpinionState,
        c1: &DMatrix<f64>,
        c2: &DMatrix<f64>,
    ) -> DMatrix<f64> {
        let n = self.n1 + self.n2;
        let mut jac = DMatrix::zeros(n, n);
        let mut z1 = z.z1.clone();
        let mut z2 = z.z2.clone();

        for i in 0..n {
            let (base, idx) = if i < self.n1 {
                (z.z1[i], i)
            } else {
                (z.z2[i - self.n1], i - self.n1)
            };
            let h = FD_JAC_EPS * base.abs().max(1.0);

            let set = |z1: &mut DVector<f64>, z2: &mut DVector<f64>, v: f64| {
                if i < self.n1 {
                    z1[idx] = v;
                } else {
                    z2[idx] = v;
                }
            };

            set(&mut z1, &mut z2, base + h);
            let up = self.opinion_field(&z1, &z2, z.attention, c1, c2);
            set(&mut z1, &mut z2, base - h);
            let dn = self.opinion_field(&z1, &z2, z.attention, c1, c2);
            set(&mut z1, &mut z2, base);

            jac.set_column(i, &((up - dn) / (2.0 * h)));
        }
        jac
    }
}
