//! Error types for the MLS core
//!
//! Every failure surfaces as a distinct [`MlsError`] kind; the state
//! machine never drops an error silently, and a failed handshake leaves
//! the caller's state unchanged.

use thiserror::Error;

/// Main error type for MLS operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MlsError {
    /// Truncated, over-long, or badly tagged wire input
    #[error("invalid TLS syntax: {0}")]
    InvalidTlsSyntax(String),

    /// Transcript, confirmation, version, or welcome-hash disagreement
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Ill-formed input structure (bad CIK, missing private key, ...)
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A merged path disagrees with a re-derived node public key
    #[error("incompatible node: {0}")]
    IncompatibleNode(String),

    /// No resolution entry of a direct path could be opened
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Leaf index out of range for the tree
    #[error("invalid index: {0}")]
    InvalidIndex(String),

    /// A path operation hit an unexpected blank node
    #[error("missing node: {0}")]
    MissingNode(String),

    /// A message references an epoch (or key generation) no longer held
    #[error("missing state: {0}")]
    MissingState(String),

    /// The cipher suite tag is known but its curve has no binding
    #[error("unsupported cipher suite: {0}")]
    UnsupportedSuite(String),

    /// The random number generator could not produce bytes
    #[error("rng failure: {0}")]
    RngFailure(String),
}

/// Result type for MLS operations
pub type MlsResult<T> = Result<T, MlsError>;
