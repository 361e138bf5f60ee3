//! Subgame solvers
//!
//! The LQ stage solves the feedback Nash equilibrium of a linearized
//! game; the ILQ solver iterates it over a nonlinear subgame.

pub mod ilq;
pub mod lq;

pub use ilq::{IlqOptions, IlqSolver, SubgameSolution};
pub use lq::{solve_lq_game, LinearStep, LqSolution, LqStrategy, QuadraticStageCost};
