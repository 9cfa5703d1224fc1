//! Layer contract and the built-in layers.
//!
//! A layer reads the blobs it needs, writes the blobs it provides, and can push
//! gradients back from its outputs to its inputs and parameters. The net lends
//! each layer its blobs for the duration of one call.

pub mod activation;
pub mod convolution;
pub mod data;
pub mod dropout;
pub mod filler;
pub mod inner_product;
pub mod loss;
pub mod padding;
pub mod regularization;

pub use activation::{Activation, ActivationLayer};
pub use convolution::{ConvolutionConfig, ConvolutionLayer, ConvolutionMode};
pub use data::ArrayDataLayer;
pub use dropout::{DropoutConfig, DropoutLayer};
pub use filler::{Filler, FillerConfig};
pub use inner_product::{InnerProductConfig, InnerProductLayer};
pub use loss::{Loss, LossLayer};
pub use padding::{PaddingConfig, PaddingLayer};
pub use regularization::Regularizer;

use ndarray::{ArrayD, ArrayView2, ArrayViewMut2};

use crate::errors::{NetError, Result};
use crate::graph::Blob;
use crate::kernel::Element;

/// A computation step in a net.
///
/// `forward` and `backward` return a loss contribution; layers that contribute
/// nothing return zero. Parameters must keep their identity and order for the
/// lifetime of the layer.
pub trait Layer<A: Element> {
    /// Unique name of this layer within its net.
    fn name(&self) -> &str;

    /// Computes `outputs` from `inputs`, reallocating outputs as needed.
    fn forward(&mut self, inputs: &[Blob<A>], outputs: &mut [Blob<A>]) -> Result<A>;

    /// Fills parameter gradients from the output gradients, and input gradients
    /// when `need_input_gradient` is set.
    fn backward(
        &mut self,
        inputs: &mut [Blob<A>],
        outputs: &[Blob<A>],
        need_input_gradient: bool,
    ) -> Result<A>;

    /// Applies `data += gradient` to every parameter.
    fn update(&mut self) -> Result<()> {
        for param in self.parameters_mut() {
            param.update()?;
        }
        Ok(())
    }

    /// Trainable parameter blobs, in a stable order.
    fn parameters(&self) -> Vec<&Blob<A>> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Blob<A>> {
        Vec::new()
    }
}

/// Rejects empty layer names.
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(NetError::config("<unnamed>", "name", "must not be empty"));
    }
    Ok(())
}

fn matrix_shape(shape: &[usize]) -> (usize, usize) {
    let rows = shape.first().copied().unwrap_or(1);
    let cols = shape.iter().skip(1).product();
    (rows, cols)
}

/// Views an array as (first axis, product of the remaining axes).
pub(crate) fn as_matrix<A: Element>(array: &ArrayD<A>) -> Result<ArrayView2<'_, A>> {
    let shape = matrix_shape(array.shape());
    Ok(array.view().into_shape(shape)?)
}

pub(crate) fn as_matrix_mut<A: Element>(array: &mut ArrayD<A>) -> Result<ArrayViewMut2<'_, A>> {
    let shape = matrix_shape(array.shape());
    Ok(array.view_mut().into_shape(shape)?)
}

pub(crate) fn check_same_shape(expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(NetError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}
