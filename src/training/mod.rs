//! Training utilities for finished nets.
//!
//! This module provides:
//! - Solver configuration
//! - A gradient-descent loop over `Net::execute` / `Net::update`
//! - Flattening of parameters for external optimizers
//! - Ridge and logistic regression helpers built on the solver

mod config;
mod params;
mod solver;
mod wraps;

pub use config::SolverConfig;
pub use params::{collect_params, distribute_params, FlatParams};
pub use solver::{GradientDescentSolver, SolveReport};
pub use wraps::{logistic_regression, ridge_regression, LinearModel};
