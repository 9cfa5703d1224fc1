//! Weight penalties attached to parameter blobs.

use ndarray::{ArrayBase, Data, DataMut, Dimension, Zip};
use serde::{Deserialize, Serialize};

use crate::errors::{NetError, Result};
use crate::kernel::Element;

/// A penalty on parameter values, scaled by `weight`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Regularizer {
    /// `weight * Σ|x|`
    L1 { weight: f64 },
    /// `weight * Σx²`
    L2 { weight: f64 },
}

impl Regularizer {
    pub fn weight(&self) -> f64 {
        match *self {
            Self::L1 { weight } | Self::L2 { weight } => weight,
        }
    }

    pub fn validate(&self, owner: &str) -> Result<()> {
        let weight = self.weight();
        if !weight.is_finite() || weight < 0.0 {
            return Err(NetError::config(
                owner,
                "regularizer",
                format!("weight must be finite and >= 0, got {weight}"),
            ));
        }
        Ok(())
    }

    /// Penalty value for `values`.
    pub fn penalty<A, S, D>(&self, values: &ArrayBase<S, D>) -> A
    where
        A: Element,
        S: Data<Elem = A>,
        D: Dimension,
    {
        let weight = A::from_f64(self.weight());
        let total = match self {
            Self::L1 { .. } => values.fold(A::zero(), |acc, &x| acc + x.abs()),
            Self::L2 { .. } => values.fold(A::zero(), |acc, &x| acc + x * x),
        };
        weight * total
    }

    /// Adds the penalty's derivative with respect to `values` into `gradient`.
    pub fn add_gradient<A, S, T, D>(&self, values: &ArrayBase<S, D>, gradient: &mut ArrayBase<T, D>) -> Result<()>
    where
        A: Element,
        S: Data<Elem = A>,
        T: DataMut<Elem = A>,
        D: Dimension,
    {
        if values.shape() != gradient.shape() {
            return Err(NetError::ShapeMismatch {
                expected: values.shape().to_vec(),
                actual: gradient.shape().to_vec(),
            });
        }
        let weight = A::from_f64(self.weight());
        match self {
            Self::L1 { .. } => Zip::from(gradient)
                .and(values)
                .for_each(|g, &x| *g += weight * sign(x)),
            Self::L2 { .. } => {
                let twice = weight + weight;
                Zip::from(gradient).and(values).for_each(|g, &x| *g += twice * x)
            }
        }
        Ok(())
    }
}

/// Sign with `sign(0) == 0`.
fn sign<A: Element>(x: A) -> A {
    if x > A::zero() {
        A::one()
    } else if x < A::zero() {
        -A::one()
    } else {
        A::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_l1() {
        let reg = Regularizer::L1 { weight: 0.5 };
        let values = array![-2.0f64, 0.0, 3.0];
        assert_eq!(reg.penalty(&values), 2.5);

        let mut grad = Array1::<f64>::ones(3);
        reg.add_gradient(&values, &mut grad).unwrap();
        assert_eq!(grad, array![0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_l2() {
        let reg = Regularizer::L2 { weight: 0.1 };
        let values = array![[1.0f64, -2.0]];
        assert!((reg.penalty(&values) - 0.5).abs() < 1e-12);

        let mut grad = ndarray::Array2::<f64>::zeros((1, 2));
        reg.add_gradient(&values, &mut grad).unwrap();
        assert!((grad[[0, 0]] - 0.2).abs() < 1e-12);
        assert!((grad[[0, 1]] + 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_l2_gradient_matches_finite_difference() {
        let reg = Regularizer::L2 { weight: 0.3 };
        let x = array![0.7f64, -1.1];
        let mut grad = Array1::<f64>::zeros(2);
        reg.add_gradient(&x, &mut grad).unwrap();

        let eps = 1e-6;
        for i in 0..2 {
            let (mut up, mut down) = (x.clone(), x.clone());
            up[i] += eps;
            down[i] -= eps;
            let numeric = (reg.penalty(&up) - reg.penalty(&down)) / (2.0 * eps);
            assert!((numeric - grad[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_negative_weight_rejected() {
        assert!(Regularizer::L2 { weight: -1.0 }.validate("ip").is_err());
        assert!(Regularizer::L1 { weight: 0.0 }.validate("ip").is_ok());
    }

    #[test]
    fn test_shape_mismatch() {
        let reg = Regularizer::L1 { weight: 1.0 };
        let mut grad = Array1::<f64>::zeros(2);
        assert!(reg.add_gradient(&array![1.0, 2.0, 3.0], &mut grad).is_err());
    }
}
