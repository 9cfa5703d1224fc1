//! Convolution layer built on im2col.
//!
//! Each output position gathers its receptive field into one row of a column
//! matrix, so the convolution becomes a single matrix product with the kernels.
//! Strictly this is a correlation: kernels are not flipped.

use ndarray::{s, Array2, Array4, ArrayD, ArrayView4, Axis, Ix1, Ix4};
use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};
use crate::graph::Blob;
use crate::kernel::{dot, dot_into, Element};
use crate::layers::{check_name, FillerConfig, Layer, Regularizer};

/// How the input border is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvolutionMode {
    /// No padding; only positions where the kernel fits entirely.
    #[default]
    Valid,
    /// Pads by `kernel_size / 2` so a stride of 1 keeps the spatial size. Needs an odd kernel.
    Same,
    /// Pads by `kernel_size - 1`; every overlap counts.
    Full,
}

fn default_stride() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Configuration for a convolution layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionConfig {
    pub name: String,
    /// Number of kernels, i.e. output channels.
    pub num_output: usize,
    /// Side of the square kernel. Must be > 1.
    pub kernel_size: usize,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default)]
    pub mode: ConvolutionMode,
    #[serde(default = "default_true")]
    pub bias: bool,
    /// Initializer for the kernels. Zeros when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filler: Option<FillerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regularizer: Option<Regularizer>,
    #[serde(default)]
    pub seed: u64,
}

impl ConvolutionConfig {
    pub fn new(name: impl Into<String>, num_output: usize, kernel_size: usize) -> Self {
        Self {
            name: name.into(),
            num_output,
            kernel_size,
            stride: 1,
            mode: ConvolutionMode::Valid,
            bias: true,
            filler: None,
            regularizer: None,
            seed: 0,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_mode(mut self, mode: ConvolutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_filler(mut self, filler: FillerConfig) -> Self {
        self.filler = Some(filler);
        self
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = Some(regularizer);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_name(&self.name)?;
        if self.num_output == 0 {
            return Err(NetError::config(&self.name, "num_output", "must be > 0, got 0"));
        }
        if self.kernel_size <= 1 {
            return Err(NetError::config(
                &self.name,
                "kernel_size",
                format!("must be > 1, got {}", self.kernel_size),
            ));
        }
        if self.stride == 0 {
            return Err(NetError::config(&self.name, "stride", "must be > 0, got 0"));
        }
        if self.mode == ConvolutionMode::Same && self.kernel_size % 2 == 0 {
            return Err(NetError::config(
                &self.name,
                "mode",
                format!("`same` needs an odd kernel_size, got {}", self.kernel_size),
            ));
        }
        if let Some(filler) = &self.filler {
            filler.validate()?;
        }
        if let Some(regularizer) = &self.regularizer {
            regularizer.validate(&self.name)?;
        }
        Ok(())
    }

    /// Border added on each side of the spatial axes.
    pub fn pad(&self) -> usize {
        match self.mode {
            ConvolutionMode::Valid => 0,
            ConvolutionMode::Same => self.kernel_size / 2,
            ConvolutionMode::Full => self.kernel_size - 1,
        }
    }

    /// Validates the configuration and builds the layer. Kernels are allocated
    /// on the first forward pass, once the channel count is known.
    pub fn init<A: Element>(&self) -> Result<ConvolutionLayer<A>> {
        self.validate()?;
        let weight = match self.filler {
            Some(filler) => Blob::with_filler(filler.build(self.seed)?),
            None => Blob::new(),
        };
        Ok(ConvolutionLayer {
            name: self.name.clone(),
            num_output: self.num_output,
            kernel_size: self.kernel_size,
            stride: self.stride,
            pad: self.pad(),
            weight,
            bias: self.bias.then(Blob::new),
            regularizer: self.regularizer,
        })
    }
}

/// Spatial bookkeeping for one input shape.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    num: usize,
    height: usize,
    width: usize,
    channels: usize,
    out_height: usize,
    out_width: usize,
}

impl Geometry {
    fn rows(&self) -> usize {
        self.num * self.out_height * self.out_width
    }
}

/// Convolves inputs of shape (n, h, w, c), or (n, h, w) for a single channel,
/// producing (n, out_h, out_w, num_output).
///
/// The kernels blob has shape (kernel_size, kernel_size, c, num_output).
#[derive(Debug)]
pub struct ConvolutionLayer<A> {
    name: String,
    num_output: usize,
    kernel_size: usize,
    stride: usize,
    pad: usize,
    weight: Blob<A>,
    bias: Option<Blob<A>>,
    regularizer: Option<Regularizer>,
}

impl<A: Element> ConvolutionLayer<A> {
    pub fn weight(&self) -> &Blob<A> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Blob<A>> {
        self.bias.as_ref()
    }

    fn geometry(&self, shape: &[usize]) -> Result<Geometry> {
        let channels = match shape.len() {
            3 => 1,
            4 => shape[3],
            _ => {
                return Err(NetError::input_shape(
                    &self.name,
                    shape,
                    "convolution needs (n, h, w) or (n, h, w, c)",
                ))
            }
        };
        let (padded_height, padded_width) = (shape[1] + 2 * self.pad, shape[2] + 2 * self.pad);
        if padded_height < self.kernel_size || padded_width < self.kernel_size {
            return Err(NetError::input_shape(
                &self.name,
                shape,
                format!("kernel of size {} does not fit", self.kernel_size),
            ));
        }
        Ok(Geometry {
            num: shape[0],
            height: shape[1],
            width: shape[2],
            channels,
            out_height: (padded_height - self.kernel_size) / self.stride + 1,
            out_width: (padded_width - self.kernel_size) / self.stride + 1,
        })
    }

    fn as_images<'a>(&self, input: &'a ArrayD<A>) -> Result<ArrayView4<'a, A>> {
        let view = input.view();
        let view = if input.ndim() == 3 {
            view.insert_axis(Axis(3))
        } else {
            view
        };
        Ok(view.into_dimensionality::<Ix4>()?)
    }

    /// Top-left corner, in padded coordinates, of every output position in row order.
    fn positions(&self, g: &Geometry) -> impl Iterator<Item = (usize, usize, usize)> {
        let (out_height, out_width, stride) = (g.out_height, g.out_width, self.stride);
        (0..g.num).flat_map(move |b| {
            (0..out_height).flat_map(move |i| (0..out_width).map(move |j| (b, i * stride, j * stride)))
        })
    }

    /// Gathers every receptive field into a row of shape (k * k * c).
    fn im2col(&self, input: &ArrayD<A>, g: &Geometry) -> Result<Array2<A>> {
        let images = self.as_images(input)?;
        let (k, p) = (self.kernel_size, self.pad);
        let mut padded = Array4::zeros((g.num, g.height + 2 * p, g.width + 2 * p, g.channels));
        padded
            .slice_mut(s![.., p..p + g.height, p..p + g.width, ..])
            .assign(&images);

        let mut cols = Array2::zeros((g.rows(), k * k * g.channels));
        for (mut row, (b, top, left)) in cols.rows_mut().into_iter().zip(self.positions(g)) {
            let patch = padded.slice(s![b, top..top + k, left..left + k, ..]);
            row.iter_mut().zip(patch.iter()).for_each(|(dst, &src)| *dst = src);
        }
        Ok(cols)
    }

    /// Scatters column gradients back onto the images, summing overlaps, and crops the padding.
    fn col2im(&self, cols: &Array2<A>, g: &Geometry) -> Array4<A> {
        let (k, p) = (self.kernel_size, self.pad);
        let mut padded = Array4::zeros((g.num, g.height + 2 * p, g.width + 2 * p, g.channels));
        for (row, (b, top, left)) in cols.rows().into_iter().zip(self.positions(g)) {
            let mut patch = padded.slice_mut(s![b, top..top + k, left..left + k, ..]);
            patch.iter_mut().zip(row.iter()).for_each(|(dst, &src)| *dst += src);
        }
        padded
            .slice(s![.., p..p + g.height, p..p + g.width, ..])
            .to_owned()
    }
}

impl<A: Element> Layer<A> for ConvolutionLayer<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, inputs: &[Blob<A>], outputs: &mut [Blob<A>]) -> Result<A> {
        NetError::check_count(&self.name, "input", 1, inputs.len())?;
        NetError::check_count(&self.name, "output", 1, outputs.len())?;

        let input = inputs[0].data()?;
        let g = self.geometry(input.shape())?;
        let cols = self.im2col(&input, &g)?;

        let k = self.kernel_size;
        self.weight.ensure_data(&[k, k, g.channels, self.num_output])?;
        if let Some(bias) = self.bias.as_mut() {
            bias.ensure_data(&[self.num_output])?;
        }

        let weight = self.weight.data()?;
        let w = weight.view().into_shape((cols.ncols(), self.num_output))?;
        let mut output = outputs[0].init_data(&[g.num, g.out_height, g.out_width, self.num_output])?;
        let mut y = output.view_mut().into_shape((g.rows(), self.num_output))?;
        dot_into(&cols, &w, &mut y)?;
        if let Some(bias) = &self.bias {
            let bias = bias.data()?;
            y += &bias.view().into_dimensionality::<Ix1>()?;
        }

        Ok(match &self.regularizer {
            Some(regularizer) => regularizer.penalty(&*weight),
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

        let (g, cols) = {
            let input = inputs[0].data()?;
            let g = self.geometry(input.shape())?;
            (g, self.im2col(&input, &g)?)
        };

        let top_gradient = outputs[0].gradient()?;
        let dy = top_gradient.view().into_shape((g.rows(), self.num_output))?;

        {
            let weight = self.weight.data_buffer()?.clone();
            let mut weight_gradient = self.weight.init_gradient()?;
            {
                let mut dw = weight_gradient
                    .view_mut()
                    .into_shape((cols.ncols(), self.num_output))?;
                dot_into(&cols.t(), &dy, &mut dw)?;
            }
            if let Some(regularizer) = &self.regularizer {
                regularizer.add_gradient(&*weight.read()?, &mut *weight_gradient)?;
            }
        }

        if let Some(bias) = self.bias.as_mut() {
            bias.init_gradient()?.assign(&dy.sum_axis(Axis(0)));
        }

        if need_input_gradient {
            let weight = self.weight.data()?;
            let w = weight.view().into_shape((cols.ncols(), self.num_output))?;
            let images = self.col2im(&dot(&dy, &w.t())?, &g);
            let mut input_gradient = inputs[0].init_gradient()?;
            let shape = input_gradient.shape().to_vec();
            input_gradient.assign(&images.into_shape(shape)?);
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
