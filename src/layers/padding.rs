//! Spatial padding layer.

use ndarray::Slice;
use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};
use crate::graph::Blob;
use crate::kernel::Element;
use crate::layers::{check_name, Layer};

/// Configuration for a padding layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddingConfig {
    pub name: String,
    /// Cells added on each side of axes 1 and 2.
    pub pad: usize,
    /// Value written into the padded border.
    #[serde(default)]
    pub value: f64,
}

impl PaddingConfig {
    pub fn new(name: impl Into<String>, pad: usize) -> Self {
        Self {
            name: name.into(),
            pad,
            value: 0.0,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    pub fn init(&self) -> Result<PaddingLayer> {
        check_name(&self.name)?;
        Ok(PaddingLayer {
            name: self.name.clone(),
            pad: self.pad,
            value: self.value,
        })
    }
}

/// Pads axes 1 and 2 of an input of shape (n, h, w, ...) by `pad` on each side.
///
/// With `pad == 0` the output mirrors the input and the input gradient mirrors
/// the output gradient.
#[derive(Debug, Clone)]
pub struct PaddingLayer {
    name: String,
    pad: usize,
    value: f64,
}

impl PaddingLayer {
    pub fn pad(&self) -> usize {
        self.pad
    }

    /// Selects the unpadded interior of an array with padded axes 1 and 2.
    fn interior(&self, axis: usize, len: usize) -> Slice {
        if axis == 1 || axis == 2 {
            Slice::from(self.pad..len - self.pad)
        } else {
            Slice::from(..)
        }
    }
}

impl<A: Element> Layer<A> for PaddingLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, inputs: &[Blob<A>], outputs: &mut [Blob<A>]) -> Result<A> {
        NetError::check_count(&self.name, "input", 1, inputs.len())?;
        NetError::check_count(&self.name, "output", 1, outputs.len())?;
        if self.pad == 0 {
            outputs[0].mirror(inputs[0].data_buffer()?)?;
            return Ok(A::zero());
        }

        let input = inputs[0].data()?;
        if input.ndim() < 3 {
            return Err(NetError::input_shape(
                &self.name,
                input.shape(),
                "padding needs a rank of at least 3",
            ));
        }
        let mut shape = input.shape().to_vec();
        shape[1] += 2 * self.pad;
        shape[2] += 2 * self.pad;

        let mut output = outputs[0].init_data(&shape)?;
        output.fill(A::from_f64(self.value));
        output
            .slice_each_axis_mut(|ax| self.interior(ax.axis.index(), ax.len))
            .assign(&*input);
        Ok(A::zero())
    }

    fn backward(
        &mut self,
        inputs: &mut [Blob<A>],
        outputs: &[Blob<A>],
        need_input_gradient: bool,
    ) -> Result<A> {
        if !need_input_gradient {
            return Ok(A::zero());
        }
        NetError::check_count(&self.name, "input", 1, inputs.len())?;
        NetError::check_count(&self.name, "output", 1, outputs.len())?;
        if self.pad == 0 {
            inputs[0].mirror_gradient(outputs[0].gradient_buffer()?)?;
            return Ok(A::zero());
        }

        let top_gradient = outputs[0].gradient()?;
        let mut gradient = inputs[0].init_gradient()?;
        gradient.assign(&top_gradient.slice_each_axis(|ax| self.interior(ax.axis.index(), ax.len)));
        Ok(A::zero())
    }
}
