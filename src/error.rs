//! Unified error types for the access-layer delivery core.
//!
//! A single `Error` enum that every subsystem returns, with the transport
//! seam's failures nested in [`SendError`].  All variants are `Copy` so they
//! can be handed to completion callbacks and across threads without
//! allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A fixed-capacity pool (chunks, pending slots, elements) is full.
    ResourceExhausted,
    /// An output buffer has no room for the encoded data.
    OutOfMemory,
    /// A request, sequence, or context slot is already in use.
    AlreadyInProgress,
    /// No response arrived before the deadline.
    Timeout,
    /// Wire data is truncated or malformed.
    InvalidFormat,
    /// A caller-supplied value is out of range.
    InvalidArgument,
    /// The node is suspended and refuses new work.
    Unavailable,
    /// A pending operation was cancelled before it completed.
    Cancelled,
    /// No element or model handles the message.
    NotFound,
    /// The transport rejected a message.
    Transport(SendError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted => write!(f, "resources exhausted"),
            Self::OutOfMemory => write!(f, "out of buffer space"),
            Self::AlreadyInProgress => write!(f, "operation already in progress"),
            Self::Timeout => write!(f, "timed out"),
            Self::InvalidFormat => write!(f, "invalid message format"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Unavailable => write!(f, "node unavailable"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::NotFound => write!(f, "no handler found"),
            Self::Transport(e) => write!(f, "transport: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// Transmit queue momentarily full; retry shortly.
    Backpressure,
    /// The application key index is not bound.
    NoAppKey,
    /// The network layer is not ready (not provisioned, disabled).
    NotReady,
    /// The payload does not fit a single SDU.
    TooLarge,
    /// Generic bearer failure.
    Io,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backpressure => write!(f, "transmit queue full"),
            Self::NoAppKey => write!(f, "unknown application key"),
            Self::NotReady => write!(f, "network not ready"),
            Self::TooLarge => write!(f, "payload too large"),
            Self::Io => write!(f, "bearer I/O error"),
        }
    }
}

impl From<SendError> for Error {
    fn from(e: SendError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
