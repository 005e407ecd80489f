//! Acknowledged message context — synchronous request/response over an
//! asynchronous, possibly one-to-many transport.
//!
//! One `AckContext` lives in each client model instance.  The request path
//! [`prepare`](AckContext::prepare)s it, sends, and blocks in
//! [`wait`](AckContext::wait); the status handler on the receive path calls
//! [`with_match`](AckContext::with_match) for every inbound status of the
//! awaited opcode, copies the response fields into the typed slot, and
//! wakes the waiter with [`rx`](AckContext::rx).
//!
//! ```text
//!   idle ──prepare──▶ pending ──rx──▶ signalled ──wait──▶ idle
//!                        │                                  ▲
//!                        └──── timeout / clear / send error ┘
//! ```

use core::cell::RefCell;
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{error, warn};

use crate::addr::{self, Address};
use crate::config::DEFAULT_ACK_TIMEOUT_MS;
use crate::error::{Error, Result};
use crate::opcode::Opcode;

use super::ctx::MsgCtx;
use super::transport::Transport;

/// What the pending request expects back.
struct Expect<T> {
    op: Opcode,
    dst: Address,
    user_data: T,
}

/// Single-slot request/response correlator with a typed response slot.
pub struct AckContext<T> {
    expect: Mutex<CriticalSectionRawMutex, RefCell<Option<Expect<T>>>>,
    /// Binary semaphore: one outstanding wakeup at most.
    sem: Signal<CriticalSectionRawMutex, ()>,
}

impl<T> Default for AckContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AckContext<T> {
    pub const fn new() -> Self {
        Self {
            expect: Mutex::new(RefCell::new(None)),
            sem: Signal::new(),
        }
    }

    /// Claim the context for a request expecting `op` from `dst`.
    ///
    /// `dst` may be a group or virtual address, in which case the first
    /// matching status from any source completes the request.
    pub fn prepare(&self, op: Opcode, dst: Address, user_data: T) -> Result<()> {
        self.expect.lock(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.is_some() {
                warn!("AckCtx: another synchronous operation pending, rejecting {}", op);
                return Err(Error::AlreadyInProgress);
            }
            *slot = Some(Expect { op, dst, user_data });
            Ok(())
        })?;
        // Drop a wakeup left over from a reply that lost a race with a timeout.
        self.sem.reset();
        Ok(())
    }

    /// Whether a request is outstanding.
    pub fn is_busy(&self) -> bool {
        self.expect.lock(|cell| cell.borrow().is_some())
    }

    /// Run `f` on the response slot if `op` from `src` answers the pending
    /// request.  Returns `None` when it does not.
    pub fn with_match<R>(
        &self,
        op: Opcode,
        src: Address,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        self.expect.lock(|cell| {
            let mut slot = cell.borrow_mut();
            let expect = slot.as_mut()?;
            if expect.op != op || (addr::is_unicast(expect.dst) && expect.dst != src) {
                return None;
            }
            Some(f(&mut expect.user_data))
        })
    }

    /// `true` iff `op` from `src` answers the pending request.
    pub fn matches(&self, op: Opcode, src: Address) -> bool {
        self.with_match(op, src, |_| ()).is_some()
    }

    /// Wake the waiter after the response slot has been filled.
    pub fn rx(&self) {
        self.sem.signal(());
    }

    /// Release the context without waiting, returning the slot if one was
    /// pending.  Used for fire-and-forget sends and failed transmissions.
    pub fn clear(&self) -> Option<T> {
        self.expect
            .lock(|cell| cell.borrow_mut().take())
            .map(|expect| expect.user_data)
    }

    /// Discard any pending wakeup.
    pub fn reset(&self) {
        self.sem.reset();
    }

    /// Wait for the response, up to `timeout`.
    ///
    /// The context is always released on return, whatever the outcome.
    pub async fn wait_async(&self, timeout: Duration) -> Result<T> {
        let woke = future::or(
            async {
                self.sem.wait().await;
                true
            },
            async {
                async_io_mini::Timer::after(timeout).await;
                false
            },
        )
        .await;

        let user_data = self.clear();
        match (woke, user_data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(Error::Cancelled),
            (false, _) => Err(Error::Timeout),
        }
    }

    /// Blocking variant of [`wait_async`](Self::wait_async); blocks the
    /// calling thread only.
    pub fn wait(&self, timeout: Duration) -> Result<T> {
        future::block_on(self.wait_async(timeout))
    }
}

/// Response expectations for [`send_acked`].
pub struct RspCtx<'a, T> {
    pub ack: &'a AckContext<T>,
    /// Status opcode that answers the request.
    pub op: Opcode,
    /// Initial value of the response slot.
    pub user_data: T,
    pub timeout: Duration,
}

impl<'a, T> RspCtx<'a, T> {
    pub fn new(ack: &'a AckContext<T>, op: Opcode, user_data: T) -> Self {
        Self {
            ack,
            op,
            user_data,
            timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS as u64),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Send `msg` and, if `rsp` is given, block until the status arrives.
///
/// Returns `Ok(None)` for unacknowledged sends, and also when the transport
/// is batching sends to `ctx` into an aggregation sequence: the reply then
/// arrives inside the aggregator Status and is dispatched to the status
/// handler directly.
/// A failed send releases the context so the model does not stay busy.
pub fn send_acked<X, T>(
    transport: &mut X,
    ctx: &MsgCtx,
    src: Address,
    msg: &[u8],
    rsp: Option<RspCtx<'_, T>>,
) -> Result<Option<T>>
where
    X: Transport + ?Sized,
{
    let batching = transport.batching(ctx);
    let Some(rsp) = rsp.filter(|_| !batching) else {
        transport.send(ctx, msg, src)?;
        return Ok(None);
    };

    rsp.ack.prepare(rsp.op, ctx.addr, rsp.user_data)?;

    if let Err(e) = transport.send(ctx, msg, src) {
        error!("AckCtx: send to {:#06x} failed: {}", ctx.addr, e);
        rsp.ack.clear();
        return Err(e);
    }

    rsp.ack.wait(rsp.timeout).map(Some)
}
