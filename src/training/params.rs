//! Flat views of a net's parameters for external optimizers.

use ndarray::Array1;

use crate::errors::{NetError, Result};
use crate::graph::Net;
use crate::kernel::Element;

/// Parameter data and gradients concatenated in `Net::params` order, row-major within each blob.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatParams<A> {
    pub data: Array1<A>,
    /// Zero where a parameter has no gradient yet.
    pub gradient: Array1<A>,
}

/// Copies every parameter into one flat vector.
pub fn collect_params<A: Element>(net: &Net<A>) -> Result<FlatParams<A>> {
    let mut data = Vec::new();
    let mut gradient = Vec::new();
    for param in net.params()? {
        let values = param.data()?;
        data.extend(values.iter().copied());
        if param.has_gradient() {
            gradient.extend(param.gradient()?.iter().copied());
        } else {
            gradient.extend(std::iter::repeat(A::zero()).take(values.len()));
        }
    }
    Ok(FlatParams {
        data: Array1::from_vec(data),
        gradient: Array1::from_vec(gradient),
    })
}

/// Writes `values` back into the parameters, in the order produced by [`collect_params`].
pub fn distribute_params<A: Element>(net: &mut Net<A>, values: &[A]) -> Result<()> {
    let mut params = net.params_mut()?;
    let mut total = 0;
    for param in params.iter() {
        total += param.data()?.len();
    }
    if total != values.len() {
        return Err(NetError::ShapeMismatch {
            expected: vec![total],
            actual: vec![values.len()],
        });
    }

    let mut offset = 0;
    for param in params.iter_mut() {
        let mut data = param.data_mut()?;
        let len = data.len();
        for (dst, &src) in data.iter_mut().zip(&values[offset..offset + len]) {
            *dst = src;
        }
        offset += len;
    }
    Ok(())
}
