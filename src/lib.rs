//! Bluetooth Mesh access-layer delivery core.
//!
//! Three cooperating pieces sit between the models and the (external)
//! access/transport layer:
//!
//! - [`delayable`]: randomised-delay outbound queue over fixed pools.
//! - [`msg::ack`]: request/response correlation for acknowledged models.
//! - [`agg`]: Opcodes Aggregator client and server.
//!
//! The transport is reached only through the [`msg::Transport`] trait.

#![deny(unused_must_use)]

pub mod access;
pub mod addr;
pub mod agg;
pub mod config;
pub mod delayable;
pub mod msg;
pub mod opcode;
pub mod time;

mod error;

pub use error::{Error, Result, SendError};

// Links the time driver `async_io_mini::Timer` ticks against.
extern crate embassy_time as _;
