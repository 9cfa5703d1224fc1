//! Solver configuration.

use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};

/// Configuration for gradient-descent training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Number of execute/update iterations.
    pub iterations: usize,
    /// Step size applied to every parameter gradient.
    pub learning_rate: f64,
    /// Log progress every this many iterations; 0 disables progress logs.
    pub log_every: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            learning_rate: 0.01,
            log_every: 10,
        }
    }
}

impl SolverConfig {
    /// Creates a new SolverConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of iterations.
    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the learning rate.
    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Sets the logging interval.
    pub fn log_every(mut self, every: usize) -> Self {
        self.log_every = every;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(NetError::config(
                "solver",
                "learning_rate",
                format!("must be finite and > 0, got {}", self.learning_rate),
            ));
        }
        Ok(())
    }
}
