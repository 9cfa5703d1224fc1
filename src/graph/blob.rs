//! Blob - a named slot holding a data array and a same-shaped gradient array.

use std::cell::{Ref, RefMut};

use ndarray::ArrayD;

use crate::errors::{NetError, Result};
use crate::graph::Buffer;
use crate::kernel::Element;
use crate::layers::Filler;

/// Data and gradient storage for one edge of the net, or for one layer parameter.
///
/// Both arrays are lazily allocated. A blob may own its data or mirror a buffer
/// owned elsewhere; mirrored storage is never zeroed or reallocated in place.
#[derive(Debug)]
pub struct Blob<A> {
    data: Option<Buffer<A>>,
    gradient: Option<Buffer<A>>,
    data_mirrored: bool,
    gradient_mirrored: bool,
    filler: Option<Filler>,
}

impl<A> Default for Blob<A> {
    fn default() -> Self {
        Self {
            data: None,
            gradient: None,
            data_mirrored: false,
            gradient_mirrored: false,
            filler: None,
        }
    }
}

impl<A: Element> Blob<A> {
    /// Creates an empty blob.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty blob that runs `filler` whenever its data is (re)initialized.
    pub fn with_filler(filler: Filler) -> Self {
        Self {
            filler: Some(filler),
            ..Self::default()
        }
    }

    /// Creates a blob owning a copy-free wrap of `array`.
    pub fn from_array<D: ndarray::Dimension>(array: ndarray::Array<A, D>) -> Self {
        Self {
            data: Some(Buffer::from_array(array)),
            ..Self::default()
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn has_gradient(&self) -> bool {
        self.gradient.is_some()
    }

    /// True if the data buffer belongs to someone else.
    pub fn is_mirrored(&self) -> bool {
        self.data_mirrored
    }

    pub fn data_buffer(&self) -> Result<&Buffer<A>> {
        self.data.as_ref().ok_or(NetError::Uninitialized { what: "data" })
    }

    pub fn gradient_buffer(&self) -> Result<&Buffer<A>> {
        self.gradient
            .as_ref()
            .ok_or(NetError::Uninitialized { what: "gradient" })
    }

    pub fn data(&self) -> Result<Ref<'_, ArrayD<A>>> {
        self.data_buffer()?.read()
    }

    pub fn data_mut(&mut self) -> Result<RefMut<'_, ArrayD<A>>> {
        self.data_buffer()?.write()
    }

    pub fn gradient(&self) -> Result<Ref<'_, ArrayD<A>>> {
        self.gradient_buffer()?.read()
    }

    pub fn gradient_mut(&mut self) -> Result<RefMut<'_, ArrayD<A>>> {
        self.gradient_buffer()?.write()
    }

    /// Shape of the data array.
    pub fn shape(&self) -> Result<Vec<usize>> {
        self.data_buffer()?.shape()
    }

    /// Makes the data an owned array of `shape`, zero-filled, then runs the filler.
    ///
    /// Storage is reused when it is owned and already has the right shape. A
    /// mirrored blob always gets a fresh buffer so the external owner is untouched.
    pub fn init_data(&mut self, shape: &[usize]) -> Result<RefMut<'_, ArrayD<A>>> {
        let reusable = !self.data_mirrored && matches_shape(self.data.as_ref(), shape)?;
        if reusable {
            if let Some(buffer) = &self.data {
                buffer.write()?.fill(A::zero());
            }
        } else {
            self.allocate_data(shape)?;
        }
        self.run_filler()?;
        self.data_mut()
    }

    /// Allocates data of `shape` unless it already has that shape; existing contents are kept.
    ///
    /// Parameters use this so that learned values survive repeated forward passes.
    pub fn ensure_data(&mut self, shape: &[usize]) -> Result<()> {
        if !matches_shape(self.data.as_ref(), shape)? {
            self.allocate_data(shape)?;
            self.run_filler()?;
        }
        Ok(())
    }

    /// Makes the gradient an owned zero array shaped like the data.
    pub fn init_gradient(&mut self) -> Result<RefMut<'_, ArrayD<A>>> {
        let shape = self.shape()?;
        let reusable = !self.gradient_mirrored && matches_shape(self.gradient.as_ref(), &shape)?;
        if reusable {
            if let Some(buffer) = &self.gradient {
                buffer.write()?.fill(A::zero());
            }
        } else {
            self.gradient = Some(Buffer::zeros(&shape));
            self.gradient_mirrored = false;
        }
        self.gradient_mut()
    }

    /// Shares `source` as this blob's data.
    ///
    /// A gradient whose shape no longer matches is dropped.
    pub fn mirror(&mut self, source: &Buffer<A>) -> Result<()> {
        let shape = source.shape()?;
        if !matches_shape(self.gradient.as_ref(), &shape)? {
            self.gradient = None;
            self.gradient_mirrored = false;
        }
        self.data = Some(source.clone());
        self.data_mirrored = true;
        Ok(())
    }

    /// Shares `source` as this blob's gradient. It must match the data shape.
    pub fn mirror_gradient(&mut self, source: &Buffer<A>) -> Result<()> {
        let expected = self.shape()?;
        let actual = source.shape()?;
        if expected != actual {
            return Err(NetError::ShapeMismatch { expected, actual });
        }
        self.gradient = Some(source.clone());
        self.gradient_mirrored = true;
        Ok(())
    }

    /// Applies `data += gradient` elementwise.
    pub fn update(&mut self) -> Result<()> {
        let data = self.data_buffer()?;
        let gradient = self.gradient_buffer()?;
        if data.aliases(gradient) {
            return Err(NetError::BufferBusy);
        }
        let gradient = gradient.read()?;
        let mut data = data.write()?;
        if data.shape() != gradient.shape() {
            return Err(NetError::ShapeMismatch {
                expected: data.shape().to_vec(),
                actual: gradient.shape().to_vec(),
            });
        }
        *data += &*gradient;
        Ok(())
    }

    fn allocate_data(&mut self, shape: &[usize]) -> Result<()> {
        match &self.data {
            Some(old) if !self.data_mirrored => {
                log::info!("Reshaping blob from {:?} to {:?}", old.shape()?, shape);
            }
            _ => log::debug!("Allocating blob of shape {:?}", shape),
        }
        self.data = Some(Buffer::zeros(shape));
        self.data_mirrored = false;
        if !matches_shape(self.gradient.as_ref(), shape)? {
            self.gradient = None;
            self.gradient_mirrored = false;
        }
        Ok(())
    }

    fn run_filler(&mut self) -> Result<()> {
        if let (Some(filler), Some(buffer)) = (self.filler.as_mut(), self.data.as_ref()) {
            filler.fill(&mut *buffer.write()?);
        }
        Ok(())
    }
}

fn matches_shape<A: Element>(buffer: Option<&Buffer<A>>, shape: &[usize]) -> Result<bool> {
    match buffer {
        Some(buffer) => Ok(buffer.shape()? == shape),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::FillerConfig;
    use ndarray::array;

    #[test]
    fn test_new_blob_is_empty() {
        let blob = Blob::<f64>::new();
        assert!(!blob.has_data());
        assert!(!blob.has_gradient());
        assert!(matches!(blob.data(), Err(NetError::Uninitialized { what: "data" })));
    }

    #[test]
    fn test_init_data_zero_fills_in_place() {
        let mut blob = Blob::<f64>::new();
        blob.init_data(&[2, 3]).unwrap().fill(5.0);
        let first = blob.data_buffer().unwrap().clone();

        let data = blob.init_data(&[2, 3]).unwrap();
        assert!(data.iter().all(|&v| v == 0.0));
        drop(data);
        assert!(blob.data_buffer().unwrap().aliases(&first));
    }

    #[test]
    fn test_init_data_reallocates_on_new_shape() {
        let mut blob = Blob::<f32>::new();
        blob.init_data(&[2, 2]).unwrap();
        blob.init_gradient().unwrap();
        blob.init_data(&[3]).unwrap();
        assert_eq!(blob.shape().unwrap(), vec![3]);
        assert!(!blob.has_gradient());
    }

    #[test]
    fn test_init_gradient_requires_data() {
        let mut blob = Blob::<f64>::new();
        assert!(blob.init_gradient().is_err());

        blob.init_data(&[4, 1]).unwrap();
        let grad = blob.init_gradient().unwrap();
        assert_eq!(grad.shape(), &[4, 1]);
    }

    #[test]
    fn test_update_adds_gradient() {
        let mut blob = Blob::from_array(array![1.0f64, 2.0, 3.0]);
        blob.init_gradient().unwrap().assign(&array![0.5, -1.0, 0.0]);
        blob.update().unwrap();
        assert_eq!(*blob.data().unwrap(), array![1.5, 1.0, 3.0].into_dyn());
    }

    #[test]
    fn test_update_with_zero_gradient_is_identity() {
        let mut blob = Blob::from_array(array![[0.1f64, -7.25], [1e-300, 3.0e12]]);
        let before = blob.data().unwrap().clone();
        blob.init_gradient().unwrap();
        blob.update().unwrap();
        blob.update().unwrap();
        let after = blob.data().unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_update_without_gradient_fails() {
        let mut blob = Blob::from_array(array![1.0f64]);
        assert!(matches!(
            blob.update(),
            Err(NetError::Uninitialized { what: "gradient" })
        ));
    }

    #[test]
    fn test_mirror_observes_external_writes() {
        let source = Buffer::from_array(array![[1.0f64, 2.0], [3.0, 4.0]]);
        let mut blob = Blob::new();
        blob.mirror(&source).unwrap();
        assert!(blob.is_mirrored());

        source.write().unwrap()[[1, 1]] = -4.0;
        assert_eq!(blob.data().unwrap()[[1, 1]], -4.0);

        blob.data_mut().unwrap()[[0, 0]] = 10.0;
        assert_eq!(source.read().unwrap()[[0, 0]], 10.0);
    }

    #[test]
    fn test_init_data_on_mirror_leaves_source_untouched() {
        let source = Buffer::from_array(array![1.0f64, 2.0]);
        let mut blob = Blob::new();
        blob.mirror(&source).unwrap();
        blob.init_data(&[2]).unwrap();

        assert!(!blob.is_mirrored());
        assert!(!blob.data_buffer().unwrap().aliases(&source));
        assert_eq!(*source.read().unwrap(), array![1.0, 2.0].into_dyn());
    }

    #[test]
    fn test_mirror_gradient_checks_shape() {
        let mut blob = Blob::from_array(array![1.0f64, 2.0]);
        let wrong = Buffer::<f64>::zeros(&[3]);
        assert!(matches!(
            blob.mirror_gradient(&wrong),
            Err(NetError::ShapeMismatch { .. })
        ));

        let right = Buffer::<f64>::zeros(&[2]);
        blob.mirror_gradient(&right).unwrap();
        assert!(blob.gradient_buffer().unwrap().aliases(&right));
    }

    #[test]
    fn test_filler_runs_on_init_but_not_on_ensure() {
        let filler = FillerConfig::Constant { value: 0.25 }.build(0).unwrap();
        let mut blob = Blob::<f64>::with_filler(filler);
        blob.ensure_data(&[2, 2]).unwrap();
        assert!(blob.data().unwrap().iter().all(|&v| v == 0.25));

        blob.data_mut().unwrap().fill(3.0);
        blob.ensure_data(&[2, 2]).unwrap();
        assert!(blob.data().unwrap().iter().all(|&v| v == 3.0));

        blob.init_data(&[2, 2]).unwrap();
        assert!(blob.data().unwrap().iter().all(|&v| v == 0.25));
    }
}
