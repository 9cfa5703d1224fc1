//! One-call linear models: a data layer, one inner product and a loss, trained
//! with [`GradientDescentSolver`].

use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, Axis, Ix1, Ix2};

use super::{GradientDescentSolver, SolveReport, SolverConfig};
use crate::errors::{NetError, Result};
use crate::graph::{Buffer, Net};
use crate::kernel::{dot, Element};
use crate::layers::{ArrayDataLayer, InnerProductConfig, Loss, LossLayer, Regularizer};

/// Learned `y = x · weight + bias` together with the training run that produced it.
#[derive(Debug, Clone)]
pub struct LinearModel<A> {
    /// Shape (features, outputs).
    pub weight: Array2<A>,
    pub bias: Array1<A>,
    pub report: SolveReport<A>,
}

impl<A: Element> LinearModel<A> {
    pub fn predict(&self, features: &ArrayView2<'_, A>) -> Result<Array2<A>> {
        let mut output = dot(features, &self.weight)?;
        output += &self.bias;
        Ok(output)
    }

    /// Index of the highest score in each row.
    pub fn classify(&self, features: &ArrayView2<'_, A>) -> Result<Vec<usize>> {
        let scores = self.predict(features)?;
        Ok(scores
            .axis_iter(Axis(0))
            .map(|row| {
                row.indexed_iter()
                    .fold((0, A::neg_infinity()), |best, (index, &value)| {
                        if value > best.1 {
                            (index, value)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect())
    }
}

/// Least squares with an L2 penalty of `reg_weight` on the weights.
///
/// `targets` is a vector (one output) or a (rows, outputs) matrix.
pub fn ridge_regression<A: Element>(
    features: ArrayView2<'_, A>,
    targets: ArrayViewD<'_, A>,
    reg_weight: f64,
    config: SolverConfig,
) -> Result<LinearModel<A>> {
    let targets = match targets.ndim() {
        1 => targets.into_dimensionality::<Ix1>()?.insert_axis(Axis(1)),
        2 => targets.into_dimensionality::<Ix2>()?,
        _ => {
            return Err(NetError::input_shape(
                "ridge_regression",
                targets.shape(),
                "targets must be a vector or a matrix",
            ))
        }
    };
    check_rows(&features, targets.nrows())?;
    let num_output = targets.ncols();
    fit(
        "ridge_regression",
        features,
        Buffer::from_array(targets.to_owned()),
        num_output,
        Loss::Squared,
        reg_weight,
        config,
    )
}

/// Softmax regression with an L2 penalty of `reg_weight` on the weights.
///
/// `targets` holds either one class index per row, in which case the number of
/// classes is the largest index plus one, or a (rows, classes) matrix of
/// target probabilities.
pub fn logistic_regression<A: Element>(
    features: ArrayView2<'_, A>,
    targets: ArrayViewD<'_, A>,
    reg_weight: f64,
    config: SolverConfig,
) -> Result<LinearModel<A>> {
    let num_output = match targets.ndim() {
        1 => {
            let largest = targets.iter().fold(0.0f64, |max, &label| max.max(label.into()));
            largest as usize + 1
        }
        2 => targets.shape()[1],
        _ => {
            return Err(NetError::input_shape(
                "logistic_regression",
                targets.shape(),
                "targets must be class indices or a matrix",
            ))
        }
    };
    check_rows(&features, targets.shape()[0])?;
    fit(
        "logistic_regression",
        features,
        Buffer::from_array(targets.to_owned()),
        num_output,
        Loss::MultinomialLogistic,
        reg_weight,
        config,
    )
}

fn check_rows<A>(features: &ArrayView2<'_, A>, rows: usize) -> Result<()> {
    if features.nrows() != rows {
        return Err(NetError::ShapeMismatch {
            expected: vec![features.nrows()],
            actual: vec![rows],
        });
    }
    Ok(())
}

fn fit<A: Element>(
    name: &str,
    features: ArrayView2<'_, A>,
    targets: Buffer<A>,
    num_output: usize,
    loss: Loss,
    reg_weight: f64,
    config: SolverConfig,
) -> Result<LinearModel<A>> {
    let mut net = Net::new(name);
    let features = Buffer::from_array(features.to_owned());
    net.add_layer(
        ArrayDataLayer::new("data", vec![features, targets])?,
        &[],
        &["features", "target"],
    )?;
    net.add_layer(
        InnerProductConfig::new("ip", num_output)
            .with_regularizer(Regularizer::L2 { weight: reg_weight })
            .init()?,
        &["features"],
        &["output"],
    )?;
    net.add_layer(LossLayer::new("loss", loss)?, &["output", "target"], &[])?;
    net.finish()?;

    let report = GradientDescentSolver::new(config)?.solve(&mut net)?;
    log::debug!("`{}` fitted {} outputs", name, num_output);

    let params = net.params()?;
    let (weight, bias) = match params.as_slice() {
        [weight, bias] => (
            weight.data()?.view().into_dimensionality::<Ix2>()?.to_owned(),
            bias.data()?.view().into_dimensionality::<Ix1>()?.to_owned(),
        ),
        _ => {
            return Err(NetError::MissingParameter {
                layer: "ip".to_string(),
                slot: params.len(),
            })
        }
    };
    Ok(LinearModel {
        weight,
        bias,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn config() -> SolverConfig {
        SolverConfig::new().iterations(500).learning_rate(0.05).log_every(0)
    }

    fn corners() -> Array2<f64> {
        array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_ridge_recovers_linear_map() {
        // y = 2 x0 - x1 + 0.5
        let targets = array![0.5, 2.5, -0.5, 1.5].into_dyn();
        let model = ridge_regression(corners().view(), targets.view(), 0.0, config()).unwrap();

        assert_eq!(model.weight.dim(), (2, 1));
        assert!((model.weight[[0, 0]] - 2.0).abs() < 1e-4);
        assert!((model.weight[[1, 0]] + 1.0).abs() < 1e-4);
        assert!((model.bias[0] - 0.5).abs() < 1e-4);
        assert!(model.report.final_loss < 1e-8);

        let predicted = model.predict(&array![[2.0, 2.0]].view()).unwrap();
        assert!((predicted[[0, 0]] - 2.5).abs() < 1e-3);
    }

    #[test]
    fn test_ridge_penalty_shrinks_weights() {
        let targets = array![[0.5], [2.5], [-0.5], [1.5]].into_dyn();
        let plain = ridge_regression(corners().view(), targets.view(), 0.0, config()).unwrap();
        let shrunk = ridge_regression(corners().view(), targets.view(), 1.0, config()).unwrap();

        let norm = |w: &Array2<f64>| w.iter().map(|v| v * v).sum::<f64>();
        assert!(norm(&shrunk.weight) < norm(&plain.weight));
    }

    #[test]
    fn test_row_mismatch_rejected() {
        let targets = array![1.0, 2.0, 3.0].into_dyn();
        let err = ridge_regression(corners().view(), targets.view(), 0.0, config()).unwrap_err();
        assert!(matches!(err, NetError::ShapeMismatch { .. }));
        let err = logistic_regression(corners().view(), targets.view(), 0.0, config()).unwrap_err();
        assert!(matches!(err, NetError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_targets_of_rank_three_rejected() {
        let targets = Array::<f64, _>::zeros((4, 1, 1)).into_dyn();
        let err = ridge_regression(corners().view(), targets.view(), 0.0, config()).unwrap_err();
        assert!(matches!(err, NetError::InputShape { .. }));
    }

    fn clusters() -> (Array2<f64>, Array1<f64>) {
        let features = array![
            [2.0, 2.5],
            [1.5, 2.0],
            [2.5, 1.0],
            [3.0, 2.0],
            [-2.0, -1.5],
            [-1.0, -2.5],
            [-2.5, -2.0],
            [-1.5, -1.0],
        ];
        let labels = array![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        (features, labels)
    }

    #[test]
    fn test_logistic_separates_clusters() {
        let (features, labels) = clusters();
        let config = SolverConfig::new().iterations(200).learning_rate(0.1).log_every(0);
        let model = logistic_regression(features.view(), labels.view().into_dyn(), 0.01, config).unwrap();

        assert_eq!(model.weight.dim(), (2, 2));
        assert_eq!(model.bias.len(), 2);
        assert!(model.report.final_loss < model.report.loss_history[0]);
        assert_eq!(
            model.classify(&features.view()).unwrap(),
            vec![1, 1, 1, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_logistic_with_probability_targets() {
        let (features, labels) = clusters();
        let dense = Array2::from_shape_fn((8, 3), |(row, class)| if class == labels[row] as usize { 1.0 } else { 0.0 });
        let config = SolverConfig::new().iterations(200).learning_rate(0.1).log_every(0);
        let model = logistic_regression(features.view(), dense.view().into_dyn(), 0.0, config).unwrap();

        // the third class never appears
        assert_eq!(model.weight.dim(), (2, 3));
        assert_eq!(model.classify(&features.view()).unwrap()[0], 1);
        assert_eq!(model.classify(&features.view()).unwrap()[7], 0);
    }
}
