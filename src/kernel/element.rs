//! Element types a blob can hold.

use ndarray::NdFloat;
use serde::{Deserialize, Serialize};

/// Runtime tag for the element type of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
}

/// Floating point element type usable in blobs and kernels.
///
/// Implemented for `f32` and `f64`. The element type is a type parameter of
/// every blob, layer and net, so two blobs of one net always agree on it.
pub trait Element: NdFloat + Default + Into<f64> {
    /// Tag used in logs and plan exports.
    const DTYPE: DType;

    /// Converts from `f64`, rounding when `Self` is narrower.
    fn from_f64(value: f64) -> Self;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}
