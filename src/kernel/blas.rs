//! Matrix product that accepts row-major and column-major operands.
//!
//! `general_mat_mul` reads operands through their strides, so transposed
//! views (`a.t()`) are multiplied without materializing a copy.

use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, ArrayBase, Data, DataMut, Ix2};

use super::Element;
use crate::errors::{NetError, Result};

fn check_aligned<A, S1, S2>(a: &ArrayBase<S1, Ix2>, b: &ArrayBase<S2, Ix2>) -> Result<()>
where
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
{
    if a.ncols() != b.nrows() {
        return Err(NetError::ShapeMismatch {
            expected: vec![a.ncols(), b.ncols()],
            actual: b.shape().to_vec(),
        });
    }
    Ok(())
}

/// Computes `a · b` into a freshly allocated row-major matrix.
///
/// Fails with [`NetError::ShapeMismatch`] when `cols(a) != rows(b)`.
pub fn dot<A, S1, S2>(a: &ArrayBase<S1, Ix2>, b: &ArrayBase<S2, Ix2>) -> Result<Array2<A>>
where
    A: Element,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
{
    check_aligned(a, b)?;
    let mut out = Array2::zeros((a.nrows(), b.ncols()));
    general_mat_mul(A::one(), a, b, A::zero(), &mut out);
    Ok(out)
}

/// Computes `a · b`, overwriting a pre-allocated `out` of shape `(rows(a), cols(b))`.
pub fn dot_into<A, S1, S2, S3>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
    out: &mut ArrayBase<S3, Ix2>,
) -> Result<()>
where
    A: Element,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    S3: DataMut<Elem = A>,
{
    check_aligned(a, b)?;
    let expected = [a.nrows(), b.ncols()];
    if out.shape() != expected {
        return Err(NetError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: out.shape().to_vec(),
        });
    }
    general_mat_mul(A::one(), a, b, A::zero(), out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, ShapeBuilder, array};

    fn naive(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((a.nrows(), b.ncols()));
        for i in 0..a.nrows() {
            for j in 0..b.ncols() {
                for k in 0..a.ncols() {
                    out[[i, j]] += a[[i, k]] * b[[k, j]];
                }
            }
        }
        out
    }

    #[test]
    fn test_dot_matches_naive_product() {
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let b = array![[1.0, 0.5], [-1.0, 2.0], [0.0, 1.0]];
        let out = dot(&a, &b).unwrap();
        assert_eq!(out, naive(&a, &b));
        assert!(out.is_standard_layout());
    }

    #[test]
    fn test_dot_mixed_memory_order() {
        let a_c = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mut a_f = Array2::<f64>::zeros((3, 2).f());
        a_f.assign(&a_c);
        let b = array![[1.0, -1.0, 2.0, 0.0], [0.5, 0.25, 1.0, 3.0]];
        let expected = naive(&a_c, &b);

        assert_eq!(dot(&a_f, &b).unwrap(), expected);
        // transposed views multiply without a copy
        let bt = b.t().to_owned();
        assert_eq!(dot(&a_c, &bt.t()).unwrap(), expected);
    }

    #[test]
    fn test_dot_rejects_misaligned() {
        let a = Array2::<f32>::zeros((2, 3));
        let b = Array2::<f32>::zeros((2, 3));
        assert!(matches!(dot(&a, &b), Err(NetError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_dot_into_checks_output_shape() {
        let a = Array2::<f64>::ones((4, 3));
        let b = Array2::<f64>::ones((3, 2));
        let mut wrong = Array2::<f64>::zeros((2, 4));
        assert!(dot_into(&a, &b, &mut wrong).is_err());

        let mut out = Array2::<f64>::from_elem((4, 2), 7.0);
        dot_into(&a, &b, &mut out).unwrap();
        assert!(out.iter().all(|&v| v == 3.0));
    }
}
