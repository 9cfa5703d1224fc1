//! Inner product (fully connected) layer.

use ndarray::{Axis, Ix1, Ix2};
use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};
use crate::graph::Blob;
use crate::kernel::{dot_into, Element};
use crate::layers::{as_matrix, as_matrix_mut, check_name, FillerConfig, Layer, Regularizer};

fn default_true() -> bool {
    true
}

/// Configuration for an inner product layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerProductConfig {
    /// Layer name.
    pub name: String,
    /// Number of output features.
    pub num_output: usize,
    /// Whether to add a learned bias.
    #[serde(default = "default_true")]
    pub bias: bool,
    /// Initializer for the weight matrix. Zeros when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filler: Option<FillerConfig>,
    /// Penalty applied to the weight matrix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regularizer: Option<Regularizer>,
    /// Seed for the weight filler.
    #[serde(default)]
    pub seed: u64,
}

impl InnerProductConfig {
    /// Creates a new InnerProductConfig with bias enabled and zero-initialized weights.
    pub fn new(name: impl Into<String>, num_output: usize) -> Self {
        Self {
            name: name.into(),
            num_output,
            bias: true,
            filler: None,
            regularizer: None,
            seed: 0,
        }
    }

    /// Sets whether a bias is learned.
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Sets the weight initializer.
    pub fn with_filler(mut self, filler: FillerConfig) -> Self {
        self.filler = Some(filler);
        self
    }

    /// Sets the weight penalty.
    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = Some(regularizer);
        self
    }

    /// Sets the filler seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Checks every option.
    pub fn validate(&self) -> Result<()> {
        check_name(&self.name)?;
        if self.num_output == 0 {
            return Err(NetError::config(&self.name, "num_output", "must be > 0, got 0"));
        }
        if let Some(filler) = &self.filler {
            filler.validate()?;
        }
        if let Some(regularizer) = &self.regularizer {
            regularizer.validate(&self.name)?;
        }
        Ok(())
    }

    /// Validates the configuration and builds the layer.
    ///
    /// Parameters are allocated lazily on the first forward pass, once the
    /// input width is known.
    pub fn init<A: Element>(&self) -> Result<InnerProductLayer<A>> {
        self.validate()?;
        let weight = match self.filler {
            Some(filler) => Blob::with_filler(filler.build(self.seed)?),
            None => Blob::new(),
        };
        Ok(InnerProductLayer {
            name: self.name.clone(),
            num_output: self.num_output,
            weight,
            bias: self.bias.then(Blob::new),
            regularizer: self.regularizer,
        })
    }
}

/// Computes `y = x · W + b` where `x` is the input flattened to (rows, features).
///
/// `W` has shape (features, num_output) and `b` has shape (num_output).
#[derive(Debug)]
pub struct InnerProductLayer<A> {
    name: String,
    num_output: usize,
    weight: Blob<A>,
    bias: Option<Blob<A>>,
    regularizer: Option<Regularizer>,
}

impl<A: Element> InnerProductLayer<A> {
    /// Returns the number of output features.
    pub fn num_output(&self) -> usize {
        self.num_output
    }

    pub fn weight(&self) -> &Blob<A> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Blob<A>> {
        self.bias.as_ref()
    }
}

impl<A: Element> Layer<A> for InnerProductLayer<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, inputs: &[Blob<A>], outputs: &mut [Blob<A>]) -> Result<A> {
        NetError::check_count(&self.name, "input", 1, inputs.len())?;
        NetError::check_count(&self.name, "output", 1, outputs.len())?;

        let input = inputs[0].data()?;
        let x = as_matrix(&input)?;
        let (rows, features) = x.dim();

        self.weight.ensure_data(&[features, self.num_output])?;
        if let Some(bias) = self.bias.as_mut() {
            bias.ensure_data(&[self.num_output])?;
        }

        let weight = self.weight.data()?;
        let w = weight.view().into_dimensionality::<Ix2>()?;
        let mut output = outputs[0].init_data(&[rows, self.num_output])?;
        let mut y = output.view_mut().into_dimensionality::<Ix2>()?;
        dot_into(&x, &w, &mut y)?;
        if let Some(bias) = &self.bias {
            let bias = bias.data()?;
            y += &bias.view().into_dimensionality::<Ix1>()?;
        }

        Ok(match &self.regularizer {
            Some(regularizer) => regularizer.penalty(&w),
            None => A::zero(),
        })
    }

    fn backward(
        &mut self,
        inputs: &mut [Blob<A>],
        outputs: &[Blob<A>],
        need_input_gradient: bool,
    ) -> Result<A> {
        NetError::check_count(&self.name, "input", 1, inputs.len())?;
        NetError::check_count(&self.name, "output", 1, outputs.len())?;

        let top_gradient = outputs[0].gradient()?;
        let dy = top_gradient.view().into_dimensionality::<Ix2>()?;

        {
            let input = inputs[0].data()?;
            let x = as_matrix(&input)?;
            let weight = self.weight.data_buffer()?.clone();
            let mut weight_gradient = self.weight.init_gradient()?;
            let mut dw = weight_gradient.view_mut().into_dimensionality::<Ix2>()?;
            dot_into(&x.t(), &dy, &mut dw)?;
            if let Some(regularizer) = &self.regularizer {
                regularizer.add_gradient(&*weight.read()?, &mut *weight_gradient)?;
            }
        }

        if let Some(bias) = self.bias.as_mut() {
            let mut bias_gradient = bias.init_gradient()?;
            bias_gradient.assign(&dy.sum_axis(Axis(0)));
        }

        if need_input_gradient {
            let weight = self.weight.data()?;
            let w = weight.view().into_dimensionality::<Ix2>()?;
            let mut input_gradient = inputs[0].init_gradient()?;
            let mut dx = as_matrix_mut(&mut input_gradient)?;
            dot_into(&dy, &w.t(), &mut dx)?;
        }
        Ok(A::zero())
    }

    fn parameters(&self) -> Vec<&Blob<A>> {
        let mut params = vec![&self.weight];
        params.extend(self.bias.as_ref());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Blob<A>> {
        let mut params = vec![&mut self.weight];
        params.extend(self.bias.as_mut());
        params
    }
}
