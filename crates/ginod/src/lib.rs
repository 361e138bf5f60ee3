//! Game-Induced Nonlinear Opinion Dynamics
//!
//! Receding-horizon planning for two-player trajectory games. Every
//! intent pair conditions a subgame solved by an iterative LQ game
//! solver; the subgame values drive nonlinear opinion dynamics over the
//! intent sets, and QMDP-style planners hedge each player's control
//! over the opponent's intent belief.

pub mod cost;
pub mod dynamics;
pub mod error;
pub mod opinion;
pub mod planner;
pub mod qmdp;
pub mod scenario;
pub mod solver;
pub mod subgame;
pub mod trace;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
