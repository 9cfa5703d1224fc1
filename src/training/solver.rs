//! Plain gradient descent over a finished net.

use super::SolverConfig;
use crate::errors::Result;
use crate::graph::Net;
use crate::kernel::Element;

/// Outcome of a training run.
#[derive(Debug, Clone)]
pub struct SolveReport<A> {
    /// Loss returned by `execute` at each iteration, before that iteration's update.
    pub loss_history: Vec<A>,
    /// Loss after the last update.
    pub final_loss: A,
}

/// Steps every parameter against its gradient: `data -= learning_rate * gradient`.
#[derive(Debug, Clone)]
pub struct GradientDescentSolver {
    config: SolverConfig,
}

impl GradientDescentSolver {
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Trains `net` in place. The net must be finished.
    pub fn solve<A: Element>(&self, net: &mut Net<A>) -> Result<SolveReport<A>> {
        let iterations = self.config.iterations;
        let step = A::from_f64(-self.config.learning_rate);
        let mut loss_history = Vec::with_capacity(iterations);

        for iteration in 0..iterations {
            let loss = net.execute()?;
            loss_history.push(loss);

            let every = self.config.log_every;
            if every > 0 && (iteration % every == 0 || iteration + 1 == iterations) {
                log::info!(
                    "Iteration {}/{}: loss = {:.6}",
                    iteration + 1,
                    iterations,
                    Into::<f64>::into(loss)
                );
            }

            for param in net.params_mut()? {
                param.gradient_mut()?.mapv_inplace(|g| g * step);
            }
            net.update()?;
        }

        let final_loss = net.execute()?;
        log::info!(
            "Solver finished `{}`: loss = {:.6}",
            net.name(),
            Into::<f64>::into(final_loss)
        );
        Ok(SolveReport {
            loss_history,
            final_loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NetError;
    use crate::graph::Buffer;
    use crate::layers::{ArrayDataLayer, InnerProductConfig, Loss, LossLayer};
    use ndarray::array;

    fn regression() -> Net<f64> {
        let x = Buffer::from_array(array![[0.0, 1.0], [1.0, 0.0], [1.0, 1.0], [0.5, -0.5]]);
        let y = Buffer::from_array(array![[1.0], [-1.0], [0.0], [-1.0]]);
        let mut net = Net::new("regression");
        net.add_layer(ArrayDataLayer::new("data", vec![x, y]).unwrap(), &[], &["x", "y"])
            .unwrap();
        net.add_layer(InnerProductConfig::new("ip", 1).init().unwrap(), &["x"], &["pred"])
            .unwrap();
        net.add_layer(LossLayer::new("loss", Loss::Squared).unwrap(), &["pred", "y"], &[])
            .unwrap();
        net.finish().unwrap();
        net
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut net = regression();
        let solver = GradientDescentSolver::new(SolverConfig::new().iterations(200).learning_rate(0.05)).unwrap();
        let report = solver.solve(&mut net).unwrap();

        assert_eq!(report.loss_history.len(), 200);
        let initial = report.loss_history[0];
        assert!(
            report.final_loss < initial * 0.1,
            "Loss should decrease: initial={}, final={}",
            initial,
            report.final_loss
        );
        for pair in report.loss_history.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12);
        }
    }

    #[test]
    fn test_unfinished_net() {
        let mut net = Net::<f64>::new("open");
        let solver = GradientDescentSolver::new(SolverConfig::new().iterations(1)).unwrap();
        assert!(matches!(solver.solve(&mut net), Err(NetError::NotFinished)));
    }

    #[test]
    fn test_zero_iterations_only_evaluates() {
        let mut net = regression();
        let solver = GradientDescentSolver::new(SolverConfig::new().iterations(0)).unwrap();
        let report = solver.solve(&mut net).unwrap();
        assert!(report.loss_history.is_empty());
        assert_eq!(report.final_loss, 3.0);
    }
}
