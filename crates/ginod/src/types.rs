//! Core simulation types
//!
//! These types describe the two-player game structure at runtime:
//! player identities, discrete intents, and step bookkeeping.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two players of the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerId {
    P1,
    P2,
}

impl PlayerId {
    /// All players in order
    pub const ALL: [PlayerId; 2] = [PlayerId::P1, PlayerId::P2];

    /// The other player
    pub fn opponent(&self) -> PlayerId {
        match self {
            PlayerId::P1 => PlayerId::P2,
            PlayerId::P2 => PlayerId::P1,
        }
    }

    /// Zero-based index into per-player arrays
    pub fn index(&self) -> usize {
        match self {
            PlayerId::P1 => 0,
            PlayerId::P2 => 1,
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerId::P1 => write!(f, "P1"),
            PlayerId::P2 => write!(f, "P2"),
        }
    }
}

/// Time step for one simulation step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dt(pub f64);

impl Dt {
    pub fn seconds(&self) -> f64 {
        self.0
    }
}

/// Integration methods for discretizing continuous dynamics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    /// Simple Euler integration (first-order)
    #[default]
    Euler,
    /// Midpoint method (second-order)
    Midpoint,
    /// Classic Runge-Kutta (fourth-order)
    Rk4,
}

/// QMDP planning variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QmdpMethod {
    /// Both players hedge over the opponent's intent distribution
    #[default]
    Level0,
    /// Both players use the value-aware one-step lookahead
    Level1,
    /// Player 1 plans at level 1, player 2 at level 0
    Level1VsLevel0,
}
