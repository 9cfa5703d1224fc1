//! Elementwise activation layer.

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};
use crate::graph::Blob;
use crate::kernel::Element;
use crate::layers::{check_name, check_same_shape, Layer};

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Activation {
    /// Rectified Linear Unit: f(x) = max(0, x)
    #[default]
    Relu,
    /// Sigmoid: f(x) = 1 / (1 + exp(-x))
    Sigmoid,
    /// Hyperbolic tangent: f(x) = tanh(x)
    Tanh,
}

impl Activation {
    /// Applies the activation to one element.
    pub fn apply<A: Element>(&self, x: A) -> A {
        match self {
            Activation::Relu => x.max(A::zero()),
            Activation::Sigmoid => A::one() / (A::one() + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }

    /// Derivative at input `x`, given `y = apply(x)`.
    pub fn derivative<A: Element>(&self, x: A, y: A) -> A {
        match self {
            Activation::Relu => {
                if x > A::zero() {
                    A::one()
                } else {
                    A::zero()
                }
            }
            Activation::Sigmoid => y * (A::one() - y),
            Activation::Tanh => A::one() - y * y,
        }
    }

    /// Returns the upper-case name used in configs.
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Relu => "RELU",
            Activation::Sigmoid => "SIGMOID",
            Activation::Tanh => "TANH",
        }
    }

    /// Creates an Activation from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "RELU" => Some(Activation::Relu),
            "SIGMOID" => Some(Activation::Sigmoid),
            "TANH" => Some(Activation::Tanh),
            _ => None,
        }
    }
}

/// Applies an [`Activation`] to a single input blob.
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    name: String,
    activation: Activation,
}

impl ActivationLayer {
    /// Creates a new activation layer.
    pub fn new(name: impl Into<String>, activation: Activation) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self { name, activation })
    }

    /// Shorthand for a ReLU layer.
    pub fn relu(name: impl Into<String>) -> Result<Self> {
        Self::new(name, Activation::Relu)
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl<A: Element> Layer<A> for ActivationLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, inputs: &[Blob<A>], outputs: &mut [Blob<A>]) -> Result<A> {
        NetError::check_count(&self.name, "input", 1, inputs.len())?;
        NetError::check_count(&self.name, "output", 1, outputs.len())?;
        let input = inputs[0].data()?;
        let mut output = outputs[0].init_data(input.shape())?;
        let activation = self.activation;
        Zip::from(&mut *output)
            .and(&*input)
            .for_each(|y, &x| *y = activation.apply(x));
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

        let input = inputs[0].data_buffer()?.clone();
        let input = input.read()?;
        let output = outputs[0].data()?;
        let top_gradient = outputs[0].gradient()?;
        check_same_shape(input.shape(), top_gradient.shape())?;
        check_same_shape(input.shape(), output.shape())?;

        let mut gradient = inputs[0].init_gradient()?;
        let activation = self.activation;
        Zip::from(&mut *gradient)
            .and(&*top_gradient)
            .and(&*input)
            .and(&*output)
            .for_each(|g, &dy, &x, &y| *g = dy * activation.derivative(x, y));
        Ok(A::zero())
    }
}
