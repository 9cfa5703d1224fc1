//! Error types.

mod net_error;

pub use net_error::{InvalidGraphReason, NetError, Result};
