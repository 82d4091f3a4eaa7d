//! Error types for the allocator

use core::fmt;

/// Errors that can occur during allocation operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No free block large enough for the request
    OutOfMemory,
    /// Zero-sized or otherwise unrepresentable request
    InvalidRequest,
    /// Allocator not initialised
    NotInitialised,
    /// Allocator already initialised
    AlreadyInitialised,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidRequest => write!(f, "invalid allocation request"),
            Self::NotInitialised => write!(f, "allocator not initialised"),
            Self::AlreadyInitialised => write!(f, "allocator already initialised"),
        }
    }
}
