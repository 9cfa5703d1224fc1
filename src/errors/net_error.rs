//! Net-related error types.

use std::fmt;

use thiserror::Error;

/// The specific structural defect found by `Net::finish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidGraphReason {
    /// The layer/blob graph contains a directed cycle through the named node.
    Cycle { node: String },
    /// A blob is read by some layer but no layer provides it.
    OrphanBlob { blob: String },
    /// More than one layer provides the same blob.
    MultipleProducers { blob: String, producers: Vec<String> },
    /// More than one layer reads the same blob.
    MultipleConsumers { blob: String, consumers: Vec<String> },
}

impl fmt::Display for InvalidGraphReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cycle { node } => write!(f, "the network is not a DAG (cycle through `{node}`)"),
            Self::OrphanBlob { blob } => write!(f, "blob `{blob}` has no source layer"),
            Self::MultipleProducers { blob, producers } => write!(
                f,
                "blob `{blob}` has multiple source layers: {}",
                producers.join(", ")
            ),
            Self::MultipleConsumers { blob, consumers } => write!(
                f,
                "blob `{blob}` has multiple consumers: {}",
                consumers.join(", ")
            ),
        }
    }
}

/// Errors that can occur while building, validating or running a net.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Invalid configuration for `{layer}`: option `{option}` {message}")]
    Configuration {
        layer: String,
        option: &'static str,
        message: String,
    },

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Blob name `{0}` is already used by a layer")]
    NameCollision(String),

    #[error("Modifying an already finished net")]
    FinalizedGraph,

    #[error("Net failed validation and must be rebuilt")]
    Invalid,

    #[error("Net is not finished; call finish() before executing it")]
    NotFinished,

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(InvalidGraphReason),

    #[error("Blob {what} read before being initialized")]
    Uninitialized { what: &'static str },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Layer `{layer}` expects {expected} {side} blob(s), got {actual}")]
    WrongBlobCount {
        layer: String,
        side: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Layer `{layer}` cannot take an input of shape {shape:?}: {message}")]
    InputShape {
        layer: String,
        shape: Vec<usize>,
        message: String,
    },

    #[error("Layer `{layer}` needs a gradient for blob `{blob}`, but its consumer wrote none")]
    MissingGradient { layer: String, blob: String },

    #[error("Layer `{layer}` no longer has a parameter in slot {slot}")]
    MissingParameter { layer: String, slot: usize },

    #[error("Label {label} is out of range for {classes} classes")]
    InvalidLabel { label: f64, classes: usize },

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Buffer is already borrowed elsewhere")]
    BufferBusy,

    #[error("Layer `{0}` does not support backward")]
    UnexpectedBackward(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NetError {
    pub(crate) fn config(layer: &str, option: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            layer: layer.to_string(),
            option,
            message: message.into(),
        }
    }

    pub(crate) fn input_shape(layer: &str, shape: &[usize], message: impl Into<String>) -> Self {
        Self::InputShape {
            layer: layer.to_string(),
            shape: shape.to_vec(),
            message: message.into(),
        }
    }

    /// Checks the number of blobs handed to a layer on one side.
    pub(crate) fn check_count(layer: &str, side: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::WrongBlobCount {
                layer: layer.to_string(),
                side,
                expected,
                actual,
            })
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;
