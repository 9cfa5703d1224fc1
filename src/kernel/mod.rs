//! Dense numeric kernels used by the layers.

mod blas;
mod element;
mod logexp;

pub use blas::{dot, dot_into};
pub use element::{DType, Element};
pub use logexp::{EXP_CEILING, exp, exp_inplace, log, log_inplace};
