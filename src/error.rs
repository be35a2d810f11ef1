//! Error types and handling for strata

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Error types for the strata buffer pool
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Memory allocation failures
    #[error("Memory error: {message}")]
    Memory { message: String },

    /// Operation attempted on a buffer that was already returned to its pool
    #[error("Buffer has already been disposed")]
    BufferDisposed,

    /// Write attempted through a read-only view
    #[error("Buffer view is read-only")]
    ReadOnly,

    /// Not enough room for the requested byte operation
    #[error("Insufficient space: requested {requested}, available {available}")]
    InsufficientSpace { requested: usize, available: usize },

    /// No size class can satisfy a direct pool lookup.
    /// Unreachable in a valid configuration; oversize requests take the
    /// composite path before the lookup happens.
    #[error("No pool is big enough to allocate {requested} bytes")]
    NoPoolFits { requested: usize },

    /// Slice slot count exceeds what the packed 32-bit indices can address
    #[error("Cannot manage a pool slice larger than 2^30-1 slots (got {slots})")]
    CapacityOverflow { slots: u64 },
}

impl StrataError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create an insufficient space error
    pub fn insufficient_space(requested: usize, available: usize) -> Self {
        Self::InsufficientSpace {
            requested,
            available,
        }
    }
}
