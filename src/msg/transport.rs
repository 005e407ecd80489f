//! Transport abstraction — the non-blocking send primitive of the
//! access/transport layer below this core.
//!
//! Everything above the seam (ack contexts, the aggregator, the delayable
//! scheduler) is generic over `Transport`, so tests drive the whole core
//! with a recording mock and no radio.

use crate::addr::Address;
use crate::error::Result;

use super::ctx::MsgCtx;

/// Completion callback for a deferred send.
///
/// Invoked exactly once: with the transmit result when the message leaves
/// the delayable queue, or with [`Error::Cancelled`](crate::Error::Cancelled)
/// when the queue is shut down first.
pub type SendCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Non-blocking access-message transmitter.
pub trait Transport {
    /// Queue `payload` (opcode + parameters) from element `src`.
    ///
    /// Must not block.  `Error::Transport(SendError::Backpressure)` signals a
    /// transient full queue; callers that can defer (the delayable
    /// scheduler) retry.
    fn send(&mut self, ctx: &MsgCtx, payload: &[u8], src: Address) -> Result<()>;

    /// `true` while sends with `ctx` are captured into an aggregation
    /// sequence rather than transmitted, so no direct reply will arrive.
    fn batching(&self, _ctx: &MsgCtx) -> bool {
        false
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, ctx: &MsgCtx, payload: &[u8], src: Address) -> Result<()> {
        (**self).send(ctx, payload, src)
    }

    fn batching(&self, ctx: &MsgCtx) -> bool {
        (**self).batching(ctx)
    }
}

/// A transport that accepts and discards every message.
/// Useful as a default before the network layer is up.
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&mut self, _ctx: &MsgCtx, _payload: &[u8], _src: Address) -> Result<()> {
        Ok(())
    }
}
