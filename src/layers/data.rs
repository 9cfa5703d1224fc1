//! Source layer that exposes in-memory arrays.

use crate::errors::{NetError, Result};
use crate::graph::{Blob, Buffer};
use crate::kernel::Element;
use crate::layers::{check_name, Layer};

/// Provides one output blob per source buffer, each mirroring its source.
///
/// Writes made to a source between executions are seen on the next forward
/// pass without copying.
#[derive(Debug, Clone)]
pub struct ArrayDataLayer<A> {
    name: String,
    sources: Vec<Buffer<A>>,
}

impl<A: Element> ArrayDataLayer<A> {
    /// Creates a data layer over the given buffers, in output order.
    pub fn new(name: impl Into<String>, sources: Vec<Buffer<A>>) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self { name, sources })
    }

    pub fn sources(&self) -> &[Buffer<A>] {
        &self.sources
    }
}

impl<A: Element> Layer<A> for ArrayDataLayer<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, _inputs: &[Blob<A>], outputs: &mut [Blob<A>]) -> Result<A> {
        NetError::check_count(&self.name, "output", self.sources.len(), outputs.len())?;
        for (blob, source) in outputs.iter_mut().zip(&self.sources) {
            blob.mirror(source)?;
        }
        Ok(A::zero())
    }

    fn backward(&mut self, _: &mut [Blob<A>], _: &[Blob<A>], _: bool) -> Result<A> {
        Err(NetError::UnexpectedBackward(self.name.clone()))
    }
}
