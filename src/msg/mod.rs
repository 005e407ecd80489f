//! Message plumbing shared by every model.
//!
//! ```text
//! ┌────────────┐  prepare   ┌────────────┐
//! │ Client     │──────────▶│ AckContext │◀── status handler: with_match + rx
//! │ model      │   send     └────────────┘
//! │            │──────────▶ Transport (non-blocking)
//! │            │   wait  ── blocks caller until rx or timeout
//! └────────────┘
//! ```

pub mod ack;
pub mod ctx;
pub mod transport;

pub use ack::{AckContext, RspCtx, send_acked};
pub use ctx::MsgCtx;
pub use transport::{NullTransport, SendCallback, Transport};
