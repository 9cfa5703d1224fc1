//! Loss layers.

use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix1, Zip};
use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};
use crate::graph::Blob;
use crate::kernel::{exp_inplace, Element};
use crate::layers::{as_matrix, as_matrix_mut, check_name, check_same_shape, Layer};

/// Supported loss functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Sum of squared differences: Σ(x - y)².
    Squared,
    /// Softmax cross entropy over rows of unnormalized scores.
    ///
    /// Targets are either a 0/1 matrix shaped like the scores or a vector of
    /// class indices, one per row.
    MultinomialLogistic,
}

impl Loss {
    /// Computes the loss between predictions and targets.
    pub fn compute<A: Element>(&self, predictions: &ArrayD<A>, targets: &ArrayD<A>) -> Result<A> {
        match self {
            Loss::Squared => {
                check_same_shape(predictions.shape(), targets.shape())?;
                let mut total = A::zero();
                Zip::from(predictions).and(targets).for_each(|&x, &y| {
                    let diff = x - y;
                    total += diff * diff;
                });
                Ok(total)
            }
            Loss::MultinomialLogistic => {
                let scores = as_matrix(predictions)?;
                let probabilities = softmax(&scores);
                let floor = A::min_positive_value();
                let mut total = A::zero();
                match labels(targets, scores.dim())? {
                    Targets::Indices(indices) => {
                        for (row, &label) in indices.iter().enumerate() {
                            total -= probabilities[[row, label]].max(floor).ln();
                        }
                    }
                    Targets::Dense(dense) => {
                        Zip::from(&probabilities)
                            .and(&dense)
                            .for_each(|&p, &t| total -= t * p.max(floor).ln());
                    }
                }
                Ok(total)
            }
        }
    }

    /// Writes d(loss)/d(predictions) into `gradient`, which must be shaped like `predictions`.
    pub fn gradient<A: Element>(
        &self,
        predictions: &ArrayD<A>,
        targets: &ArrayD<A>,
        gradient: &mut ArrayD<A>,
    ) -> Result<()> {
        check_same_shape(predictions.shape(), gradient.shape())?;
        match self {
            Loss::Squared => {
                check_same_shape(predictions.shape(), targets.shape())?;
                let two = A::from_f64(2.0);
                Zip::from(gradient)
                    .and(predictions)
                    .and(targets)
                    .for_each(|g, &x, &y| *g = two * (x - y));
            }
            Loss::MultinomialLogistic => {
                let scores = as_matrix(predictions)?;
                let mut out = as_matrix_mut(gradient)?;
                out.assign(&softmax(&scores));
                match labels(targets, scores.dim())? {
                    Targets::Indices(indices) => {
                        for (row, &label) in indices.iter().enumerate() {
                            out[[row, label]] -= A::one();
                        }
                    }
                    Targets::Dense(dense) => out -= &dense,
                }
            }
        }
        Ok(())
    }

    /// Whether `targets` can be differentiated. Class-index vectors cannot.
    pub fn has_target_gradient<A: Element>(&self, targets: &ArrayD<A>) -> bool {
        !(matches!(self, Loss::MultinomialLogistic) && targets.ndim() == 1)
    }

    /// Writes d(loss)/d(targets) into `gradient`, which must be shaped like `targets`.
    pub fn target_gradient<A: Element>(
        &self,
        predictions: &ArrayD<A>,
        targets: &ArrayD<A>,
        gradient: &mut ArrayD<A>,
    ) -> Result<()> {
        check_same_shape(targets.shape(), gradient.shape())?;
        match self {
            Loss::Squared => {
                check_same_shape(predictions.shape(), targets.shape())?;
                let two = A::from_f64(2.0);
                Zip::from(gradient)
                    .and(predictions)
                    .and(targets)
                    .for_each(|g, &x, &y| *g = two * (y - x));
            }
            Loss::MultinomialLogistic => {
                let scores = as_matrix(predictions)?;
                if !self.has_target_gradient(targets) {
                    return Err(NetError::ShapeMismatch {
                        expected: vec![scores.nrows(), scores.ncols()],
                        actual: targets.shape().to_vec(),
                    });
                }
                let mut out = as_matrix_mut(gradient)?;
                check_same_shape(&[scores.nrows(), scores.ncols()], &[out.nrows(), out.ncols()])?;
                let floor = A::min_positive_value();
                Zip::from(&mut out)
                    .and(&softmax(&scores))
                    .for_each(|g, &p| *g = -p.max(floor).ln());
            }
        }
        Ok(())
    }
}

enum Targets<'a, A> {
    Indices(Vec<usize>),
    Dense(ArrayView2<'a, A>),
}

/// Interprets `targets` against scores of shape `(rows, classes)`.
fn labels<A: Element>(targets: &ArrayD<A>, (rows, classes): (usize, usize)) -> Result<Targets<'_, A>> {
    if targets.ndim() == 1 {
        let column = targets.view().into_dimensionality::<Ix1>()?;
        check_same_shape(&[rows], column.shape())?;
        let indices = column
            .iter()
            .map(|&value| {
                let label: f64 = value.into();
                if label >= 0.0 && label.fract() == 0.0 && (label as usize) < classes {
                    Ok(label as usize)
                } else {
                    Err(NetError::InvalidLabel { label, classes })
                }
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Targets::Indices(indices));
    }
    let dense = as_matrix(targets)?;
    check_same_shape(&[rows, classes], &[dense.nrows(), dense.ncols()])?;
    Ok(Targets::Dense(dense))
}

/// Row-wise softmax with the row maximum subtracted first.
fn softmax<A: Element>(scores: &ArrayView2<'_, A>) -> Array2<A> {
    let mut probabilities = scores.to_owned();
    for mut row in probabilities.axis_iter_mut(Axis(0)) {
        let max = row.fold(A::neg_infinity(), |m, &v| m.max(v));
        row.mapv_inplace(|v| v - max);
        exp_inplace(&mut row);
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    probabilities
}

/// Consumes predictions and targets, provides nothing.
///
/// The loss value is produced by `forward`; `backward` fills the gradients of
/// both inputs, except for class-index targets.
#[derive(Debug, Clone)]
pub struct LossLayer {
    name: String,
    loss: Loss,
}

impl LossLayer {
    /// Creates a new loss layer.
    pub fn new(name: impl Into<String>, loss: Loss) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self { name, loss })
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }
}

impl<A: Element> Layer<A> for LossLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, inputs: &[Blob<A>], outputs: &mut [Blob<A>]) -> Result<A> {
        NetError::check_count(&self.name, "input", 2, inputs.len())?;
        NetError::check_count(&self.name, "output", 0, outputs.len())?;
        let predictions = inputs[0].data()?;
        let targets = inputs[1].data()?;
        self.loss.compute(&predictions, &targets)
    }

    fn backward(
        &mut self,
        inputs: &mut [Blob<A>],
        _outputs: &[Blob<A>],
        need_input_gradient: bool,
    ) -> Result<A> {
        if !need_input_gradient {
            return Ok(A::zero());
        }
        NetError::check_count(&self.name, "input", 2, inputs.len())?;
        let predictions = inputs[0].data_buffer()?.clone();
        let targets = inputs[1].data_buffer()?.clone();
        let (predictions, targets) = (predictions.read()?, targets.read()?);
        {
            let mut gradient = inputs[0].init_gradient()?;
            self.loss.gradient(&predictions, &targets, &mut gradient)?;
        }
        // Class indices get no gradient; a learned producer of them fails in the net.
        if self.loss.has_target_gradient(&targets) {
            let mut gradient = inputs[1].init_gradient()?;
            self.loss.target_gradient(&predictions, &targets, &mut gradient)?;
        }
        Ok(A::zero())
    }
}
