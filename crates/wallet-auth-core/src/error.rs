//! Error types for wallet authorization operations

use thiserror::Error;

/// Result type alias for wallet authorization operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, hashing or encoding wallet configurations
#[derive(Debug, Error)]
pub enum Error {
    // ============ Malformed Input ============
    /// Bytes or text that cannot be decoded
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Unknown flag in a tagged binary encoding
    #[error("Invalid flag: {0:#04x}")]
    InvalidFlag(u8),

    // ============ Capacity Errors ============
    /// A structure exceeds the size its wire format can express
    #[error("{0}")]
    CapacityExceeded(String),

    // ============ Configuration Tree Errors ============
    /// Configuration rejected by the safety evaluation
    #[error("{0}")]
    UnsafeConfiguration(String),

    /// Two representations of a topology disagree
    #[error("Topology mismatch")]
    TopologyMismatch,

    /// An empty leaf list cannot form a topology
    #[error("Cannot build a topology from an empty list of leaves")]
    EmptyTopology,

    // ============ Session Errors ============
    /// Session topology lacks an identity signer or a single blacklist
    #[error("Incomplete topology")]
    IncompleteTopology,

    /// Explicit session already present for the signer
    #[error("Session already exists for signer {0}")]
    DuplicateSession(String),

    /// Topology has no implicit blacklist leaf
    #[error("No blacklist found")]
    NoBlacklist,

    /// Session permissions without any permission
    #[error("No permissions")]
    NoPermissions,

    /// Explicit call signature points past the permission list
    #[error("Permission index is too large")]
    PermissionIndexTooLarge,

    /// No session in the signer can authorize a call
    #[error("No session supports call {index}: {reason}")]
    UnsupportedCall { index: usize, reason: String },

    // ============ Builder Errors ============
    /// Permission builder misuse
    #[error("{0}")]
    Builder(String),

    // ============ Signing Errors ============
    /// Signer failed to produce a signature
    #[error("Signer error: {0}")]
    Signer(String),

    /// Invalid signature
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    // ============ Collaborator Errors ============
    /// Provider request failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// State provider lookup or write failed
    #[error("State error: {0}")]
    State(String),

    // ============ Serialization Errors ============
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Shorthand for [`Error::MalformedInput`]
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedInput(msg.into())
    }

    /// Shorthand for [`Error::CapacityExceeded`]
    pub(crate) fn capacity(msg: impl Into<String>) -> Self {
        Error::CapacityExceeded(msg.into())
    }

    /// Shorthand for [`Error::Builder`]
    pub(crate) fn builder(msg: impl Into<String>) -> Self {
        Error::Builder(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Deserialization(e.to_string())
    }
}
