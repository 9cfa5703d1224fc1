//! Exponential and logarithm that clip their input instead of producing inf/NaN.
//!
//! Negative inputs to [`log`] are not an error: they clip to the smallest
//! positive normal value like zero does. Callers that need strict checking must
//! validate inputs themselves.

use ndarray::{Array, ArrayBase, Data, DataMut, Dimension};
use num_traits::Float;

use super::Element;

/// Upper clip applied before exponentiating.
pub const EXP_CEILING: f64 = 100.0;

#[inline]
fn clipped_exp<A: Element>(value: A) -> A {
    Float::min(value, A::from_f64(EXP_CEILING)).exp()
}

#[inline]
fn clipped_ln<A: Element>(value: A) -> A {
    Float::max(value, A::min_positive_value()).ln()
}

/// `exp(min(x, EXP_CEILING))` elementwise.
pub fn exp<A, S, D>(input: &ArrayBase<S, D>) -> Array<A, D>
where
    A: Element,
    S: Data<Elem = A>,
    D: Dimension,
{
    input.mapv(clipped_exp)
}

/// In-place variant of [`exp`].
pub fn exp_inplace<A, S, D>(values: &mut ArrayBase<S, D>)
where
    A: Element,
    S: DataMut<Elem = A>,
    D: Dimension,
{
    values.mapv_inplace(clipped_exp);
}

/// `ln(max(x, tiny))` elementwise, where `tiny` is the element type's smallest positive normal.
pub fn log<A, S, D>(input: &ArrayBase<S, D>) -> Array<A, D>
where
    A: Element,
    S: Data<Elem = A>,
    D: Dimension,
{
    input.mapv(clipped_ln)
}

/// In-place variant of [`log`].
pub fn log_inplace<A, S, D>(values: &mut ArrayBase<S, D>)
where
    A: Element,
    S: DataMut<Elem = A>,
    D: Dimension,
{
    values.mapv_inplace(clipped_ln);
}
