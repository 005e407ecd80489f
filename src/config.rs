//! Access-layer configuration parameters.
//!
//! Pool sizes are compile-time constants (they size fixed arrays); timeouts
//! and delay windows are runtime tunables in [`AccessConfig`], which can be
//! loaded from JSON or from a compact postcard settings blob.

use core::fmt;

use serde::{Deserialize, Serialize};

// --- Delayable message pools ---

/// Bytes per delayable-message chunk.
pub const DELAYABLE_CHUNK_SIZE: usize = 20;
/// Number of chunks shared by all pending delayable messages.
pub const DELAYABLE_CHUNK_COUNT: usize = 20;
/// Maximum number of concurrently pending delayable messages.
pub const DELAYABLE_MSG_COUNT: usize = 4;

// --- Access payloads ---

/// Largest access payload (opcode + parameters) a single SDU can carry.
pub const ACCESS_PAYLOAD_MAX: usize = 380;
/// Maximum number of elements registered with the access layer.
pub const MAX_ELEMENTS: usize = 8;

// --- Opcodes Aggregator ---

/// Maximum number of items a client sequence may accumulate.
pub const OP_AGG_ITEMS_MAX: usize = 16;

// --- Acknowledged messages ---

/// Default per-model acknowledged-request timeout (milliseconds).
pub const DEFAULT_ACK_TIMEOUT_MS: u32 = 5_000;
/// Default Opcodes Aggregator client timeout (milliseconds).
pub const OP_AGG_TIMEOUT_MS: u32 = 10_000;

/// Random transmit delay parameters for delayable messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Lower bound of every drawn delay (ms).
    pub min_ms: u16,
    /// Width of the random window for replies to unicast traffic (ms).
    pub unicast_window_ms: u16,
    /// Width of the random window for replies to group/virtual traffic (ms).
    pub group_window_ms: u16,
    /// Fixed back-off applied when the transport reports backpressure (ms).
    pub backpressure_retry_ms: u16,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_ms: 20,
            unicast_window_ms: 30,
            group_window_ms: 480,
            backpressure_retry_ms: 10,
        }
    }
}

/// Runtime tunables for the access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Default timeout for acknowledged model requests (ms).
    pub ack_timeout_ms: u32,
    /// Timeout for an Opcodes Aggregator Sequence round trip (ms).
    pub op_agg_timeout_ms: u32,
    /// Delayable message scheduling.
    pub delay: DelayConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            op_agg_timeout_ms: OP_AGG_TIMEOUT_MS,
            delay: DelayConfig::default(),
        }
    }
}

/// Errors from loading or validating an [`AccessConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The stored blob could not be deserialised.
    Corrupted,
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl AccessConfig {
    /// Reject values that would leave callers blocked forever or make the
    /// delay draw degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("ack_timeout_ms must be non-zero"));
        }
        if self.op_agg_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "op_agg_timeout_ms must be non-zero",
            ));
        }
        if self.delay.unicast_window_ms == 0 || self.delay.group_window_ms == 0 {
            return Err(ConfigError::ValidationFailed("delay windows must be non-zero"));
        }
        if self.delay.unicast_window_ms > self.delay.group_window_ms {
            return Err(ConfigError::ValidationFailed(
                "unicast window must not exceed group window",
            ));
        }
        if self.delay.backpressure_retry_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "backpressure_retry_ms must be non-zero",
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialise into a compact settings blob.
    pub fn to_blob(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Corrupted)
    }

    /// Load and validate a settings blob produced by [`to_blob`](Self::to_blob).
    pub fn from_blob(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }
}
