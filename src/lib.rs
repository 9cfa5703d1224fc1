//! # layernet
//!
//! A small computation-graph engine for training feed-forward models.
//!
//! A [`Net`] is a directed acyclic graph of named layers connected by named
//! blobs. Each blob carries a data array and a gradient array of the same shape.
//! Once a net is finished, one call to [`Net::execute`] runs every layer forward,
//! then runs backward only through the layers whose gradients matter, and returns
//! the summed loss. [`Net::update`] applies the accumulated parameter gradients.
//!
//! ## Features
//!
//! - **Shared buffers**: blobs can mirror arrays owned elsewhere, so data sources
//!   are read without copies.
//! - **Backward pruning**: layers that cannot reach a parameter are skipped in the
//!   backward pass, and layers are told whether their input gradients are needed.
//! - **Plan export**: the finished execution plan can be serialized to JSON.
//!
//! ## Example
//!
//! ```
//! use layernet::prelude::*;
//! use ndarray::array;
//!
//! let x = Buffer::from_array(array![[0.0f64, 1.0], [1.0, 0.0], [1.0, 1.0]]);
//! let y = Buffer::from_array(array![[1.0f64], [-1.0], [0.0]]);
//!
//! let mut net = Net::new("example");
//! net.add_layer(ArrayDataLayer::new("data", vec![x, y]).unwrap(), &[], &["x", "y"])
//!     .unwrap();
//! net.add_layer(
//!     InnerProductConfig::new("ip", 1)
//!         .with_filler(FillerConfig::gaussian())
//!         .init()
//!         .unwrap(),
//!     &["x"],
//!     &["pred"],
//! )
//! .unwrap();
//! net.add_layer(LossLayer::new("loss", Loss::Squared).unwrap(), &["pred", "y"], &[])
//!     .unwrap();
//! net.finish().unwrap();
//!
//! let solver = GradientDescentSolver::new(SolverConfig::new().iterations(50).learning_rate(0.1)).unwrap();
//! let report = solver.solve(&mut net).unwrap();
//! assert!(report.final_loss < report.loss_history[0]);
//! ```

pub mod errors;
pub mod graph;
pub mod kernel;
pub mod layers;
pub mod training;

// Re-exports for convenience
pub use errors::{NetError, Result};
pub use graph::{Blob, Buffer, Net};
pub use kernel::{DType, Element};
pub use layers::Layer;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::errors::NetError;
    pub use crate::graph::{Blob, Buffer, Net};
    pub use crate::kernel::{DType, Element};
    pub use crate::layers::{
        Activation, ActivationLayer, ArrayDataLayer, ConvolutionConfig, ConvolutionMode,
        DropoutConfig, FillerConfig, InnerProductConfig, Layer, Loss, LossLayer, PaddingConfig,
        Regularizer,
    };
    pub use crate::training::{
        logistic_regression, ridge_regression, GradientDescentSolver, LinearModel, SolverConfig,
    };
}
