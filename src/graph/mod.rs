//! Blobs, the net that wires layers through them, and its execution plan.
//!
//! # Example
//!
//! ```
//! use layernet::graph::{Blob, Buffer};
//! use ndarray::array;
//!
//! // A blob mirroring an external buffer sees writes made to it.
//! let source = Buffer::from_array(array![1.0f64, 2.0, 3.0]);
//! let mut blob = Blob::new();
//! blob.mirror(&source).unwrap();
//! source.write().unwrap()[[0]] = 10.0;
//! assert_eq!(blob.data().unwrap()[[0]], 10.0);
//! ```

mod blob;
mod buffer;
mod core;
mod export;
mod schedule;
mod topology;

pub use blob::Blob;
pub use buffer::Buffer;
pub use self::core::Net;
pub use export::{BackwardExport, BlobExport, LayerExport, ParamExport, PlanExport};
pub use schedule::LayerSchedule;
