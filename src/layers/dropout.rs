//! Dropout layer.

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};
use crate::graph::Blob;
use crate::kernel::Element;
use crate::layers::{check_name, check_same_shape, FillerConfig, Layer};

/// Configuration for a dropout layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutConfig {
    pub name: String,
    /// Probability of keeping each element.
    pub ratio: f64,
    #[serde(default)]
    pub seed: u64,
}

impl DropoutConfig {
    pub fn new(name: impl Into<String>, ratio: f64) -> Self {
        Self {
            name: name.into(),
            ratio,
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_name(&self.name)?;
        if !(self.ratio > 0.0 && self.ratio <= 1.0) {
            return Err(NetError::config(
                &self.name,
                "ratio",
                format!("must be in (0, 1], got {}", self.ratio),
            ));
        }
        Ok(())
    }

    pub fn init<A: Element>(&self) -> Result<DropoutLayer<A>> {
        self.validate()?;
        let filler = FillerConfig::Bernoulli { ratio: self.ratio }.build(self.seed)?;
        Ok(DropoutLayer {
            name: self.name.clone(),
            mask: Blob::with_filler(filler),
        })
    }
}

/// Multiplies its input by a fresh 0/1 mask on every forward pass.
///
/// Kept elements are not rescaled.
#[derive(Debug)]
pub struct DropoutLayer<A> {
    name: String,
    mask: Blob<A>,
}

impl<A: Element> DropoutLayer<A> {
    /// Mask drawn by the last forward pass.
    pub fn mask(&self) -> &Blob<A> {
        &self.mask
    }
}

impl<A: Element> Layer<A> for DropoutLayer<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, inputs: &[Blob<A>], outputs: &mut [Blob<A>]) -> Result<A> {
        NetError::check_count(&self.name, "input", 1, inputs.len())?;
        NetError::check_count(&self.name, "output", 1, outputs.len())?;
        let input = inputs[0].data()?;
        let mask = self.mask.init_data(input.shape())?;
        let mut output = outputs[0].init_data(input.shape())?;
        Zip::from(&mut *output)
            .and(&*input)
            .and(&*mask)
            .for_each(|y, &x, &m| *y = x * m);
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
        let top_gradient = outputs[0].gradient()?;
        let mask = self.mask.data()?;
        check_same_shape(mask.shape(), top_gradient.shape())?;
        let mut gradient = inputs[0].init_gradient()?;
        Zip::from(&mut *gradient)
            .and(&*top_gradient)
            .and(&*mask)
            .for_each(|g, &dy, &m| *g = dy * m);
        Ok(A::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_output_is_masked_input() {
        let mut layer = DropoutConfig::new("drop", 0.5).with_seed(3).init::<f64>().unwrap();
        let x = Array2::from_shape_fn((10, 10), |(i, j)| (i * 10 + j) as f64 + 1.0);
        let mut inputs = vec![Blob::from_array(x.clone())];
        let mut outputs = vec![Blob::new()];
        layer.forward(&inputs, &mut outputs).unwrap();

        let y = outputs[0].data().unwrap().clone();
        let mask = layer.mask().data().unwrap().clone();
        for ((&yi, &xi), &mi) in y.iter().zip(x.iter()).zip(mask.iter()) {
            assert!(mi == 0.0 || mi == 1.0);
            assert_eq!(yi, xi * mi);
        }
        assert!(mask.sum() > 0.0 && mask.sum() < 100.0);

        outputs[0].init_gradient().unwrap().fill(2.0);
        layer.backward(&mut inputs, &outputs, true).unwrap();
        let dx = inputs[0].gradient().unwrap().clone();
        assert_eq!(dx, mask.mapv(|m| 2.0 * m));
    }

    #[test]
    fn test_ratio_one_keeps_everything() {
        let mut layer = DropoutConfig::new("drop", 1.0).init::<f32>().unwrap();
        let inputs = vec![Blob::from_array(Array2::<f32>::ones((3, 3)))];
        let mut outputs = vec![Blob::new()];
        layer.forward(&inputs, &mut outputs).unwrap();
        assert!(outputs[0].data().unwrap().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_invalid_ratio() {
        assert!(DropoutConfig::new("drop", 0.0).validate().is_err());
        assert!(DropoutConfig::new("drop", 1.2).validate().is_err());
    }
}
