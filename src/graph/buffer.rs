//! Buffer - the shared dense array behind blob data and gradients.
//!
//! A buffer is a reference-counted handle to one `ArrayD`. Cloning the handle
//! shares the array without copying it, which is how a blob mirrors data owned
//! by someone else. Buffers are `!Send`: a net and everything it touches runs on
//! one thread.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use ndarray::{Array, ArrayD, Dimension, IxDyn};

use crate::errors::{NetError, Result};
use crate::kernel::Element;

/// Shared handle to a dense n-dimensional array.
#[derive(Debug)]
pub struct Buffer<A> {
    inner: Rc<RefCell<ArrayD<A>>>,
}

impl<A> Clone for Buffer<A> {
    /// Returns another handle to the same array. No element is copied.
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: Element> Buffer<A> {
    /// Wraps an owned array of any dimensionality.
    pub fn from_array<D: Dimension>(array: Array<A, D>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(array.into_dyn())),
        }
    }

    /// Allocates a zero-filled buffer.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_array(ArrayD::zeros(IxDyn(shape)))
    }

    /// Builds a row-major buffer from a flat vector.
    pub fn from_shape_vec(shape: &[usize], values: Vec<A>) -> Result<Self> {
        Ok(Self::from_array(ArrayD::from_shape_vec(IxDyn(shape), values)?))
    }

    /// Borrows the array for reading.
    pub fn read(&self) -> Result<Ref<'_, ArrayD<A>>> {
        self.inner.try_borrow().map_err(|_| NetError::BufferBusy)
    }

    /// Borrows the array for writing. Every handle sharing this buffer observes the writes.
    pub fn write(&self) -> Result<RefMut<'_, ArrayD<A>>> {
        self.inner.try_borrow_mut().map_err(|_| NetError::BufferBusy)
    }

    /// Current shape.
    pub fn shape(&self) -> Result<Vec<usize>> {
        Ok(self.read()?.shape().to_vec())
    }

    /// Returns true if both handles point at the same array.
    pub fn aliases(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copies the current contents out.
    pub fn to_array(&self) -> Result<ArrayD<A>> {
        Ok(self.read()?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_buffer_clone_shares_storage() {
        let a = Buffer::from_array(array![[1.0f64, 2.0], [3.0, 4.0]]);
        let b = a.clone();
        assert!(a.aliases(&b));

        a.write().unwrap()[[0, 1]] = 9.0;
        assert_eq!(b.read().unwrap()[[0, 1]], 9.0);
    }

    #[test]
    fn test_distinct_buffers_do_not_alias() {
        let a = Buffer::<f32>::zeros(&[2, 2]);
        let b = Buffer::<f32>::zeros(&[2, 2]);
        assert!(!a.aliases(&b));
        assert_eq!(a.shape().unwrap(), vec![2, 2]);
    }

    #[test]
    fn test_overlapping_write_is_reported() {
        let a = Buffer::<f64>::zeros(&[3]);
        let _guard = a.write().unwrap();
        assert!(matches!(a.read(), Err(NetError::BufferBusy)));
        assert!(matches!(a.write(), Err(NetError::BufferBusy)));
    }

    #[test]
    fn test_from_shape_vec_rejects_bad_length() {
        assert!(Buffer::<f64>::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0]).is_err());
        let ok = Buffer::<f64>::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(ok.read().unwrap()[[1, 0]], 3.0);
    }
}
