//! Delayable message scheduler.
//!
//! Spreads transmissions (typically many nodes replying to one group
//! query) over a random delay, using fixed memory only.
//!
//! ```text
//!   enqueue ──▶ [chunk pool] ──▶ busy list (ascending fire time)
//!                                   │
//!   timer ──▶ on_timer_fire ──▶ head due? ──▶ Transport::send
//!                                   │              │
//!                   backpressure ◀──┘              ├─ ok/err ─▶ release ─▶ callback
//!                   (+retry, reinsert)             │
//!   shutdown ──────────────────────────────────────┴─ Cancelled ─▶ callback
//! ```
//!
//! The core here is a plain state machine: callers pass `now` and the
//! transport into every call, and [`on_timer_fire`] says when it next
//! wants to be called.  [`worker::DelayableWorker`] drives it from a host
//! thread.
//!
//! [`on_timer_fire`]: DelayableScheduler::on_timer_fire

pub mod pool;
pub mod worker;

use heapless::Vec;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::addr::Address;
use crate::config::{
    ACCESS_PAYLOAD_MAX, DELAYABLE_CHUNK_COUNT, DELAYABLE_CHUNK_SIZE, DELAYABLE_MSG_COUNT,
    DelayConfig,
};
use crate::error::{Error, Result, SendError};
use crate::msg::{MsgCtx, SendCallback, Transport};

use pool::{ChunkList, ChunkPool, FreeList};

pub use worker::DelayableWorker;

/// Counters since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayableStats {
    /// Messages the transport accepted.
    pub sent: u32,
    /// Messages force-sent early to make room.
    pub purged: u32,
    /// Backpressure retries.
    pub rescheduled: u32,
    /// Messages released by shutdown.
    pub cancelled: u32,
}

struct PendingMessage<const N: usize> {
    ctx: MsgCtx,
    src: Address,
    chunks: ChunkList<N>,
    len: usize,
    fire_at: u64,
    cb: Option<SendCallback>,
}

/// Randomised-delay transmit queue over a fixed chunk pool.
///
/// `CHUNK_SIZE * CHUNK_COUNT` bounds the bytes held by all pending
/// messages together; `MSG_COUNT` bounds how many may be pending.
pub struct DelayableScheduler<
    const CHUNK_SIZE: usize = DELAYABLE_CHUNK_SIZE,
    const CHUNK_COUNT: usize = DELAYABLE_CHUNK_COUNT,
    const MSG_COUNT: usize = DELAYABLE_MSG_COUNT,
> {
    pool: ChunkPool<CHUNK_SIZE, CHUNK_COUNT>,
    slots: [Option<PendingMessage<CHUNK_COUNT>>; MSG_COUNT],
    free_slots: FreeList<MSG_COUNT>,
    /// Slot indices, ascending by fire time; equal times keep enqueue order.
    busy: Vec<u16, MSG_COUNT>,
    delay: DelayConfig,
    rng: StdRng,
    suspended: bool,
    stats: DelayableStats,
}

impl Default for DelayableScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayableScheduler {
    /// Scheduler with the default pool sizes and delay parameters.
    pub fn new() -> Self {
        Self::with_config(DelayConfig::default())
    }
}

impl<const CHUNK_SIZE: usize, const CHUNK_COUNT: usize, const MSG_COUNT: usize>
    DelayableScheduler<CHUNK_SIZE, CHUNK_COUNT, MSG_COUNT>
{
    pub fn with_config(delay: DelayConfig) -> Self {
        Self::with_rng(delay, StdRng::from_entropy())
    }

    /// Scheduler drawing delays from `rng`; seed it for reproducible runs.
    pub fn with_rng(delay: DelayConfig, rng: StdRng) -> Self {
        Self {
            pool: ChunkPool::new(),
            slots: core::array::from_fn(|_| None),
            free_slots: FreeList::full(),
            busy: Vec::new(),
            delay,
            rng,
            suspended: false,
            stats: DelayableStats::default(),
        }
    }

    /// Queue `payload` from element `src` for transmission after a random
    /// delay.
    ///
    /// When the pools are full the earliest pending message is sent
    /// immediately through `transport` to make room, once.  `cb`, if
    /// given, is called exactly once with the outcome.
    pub fn enqueue<T: Transport + ?Sized>(
        &mut self,
        now: u64,
        ctx: &MsgCtx,
        payload: &[u8],
        src: Address,
        cb: Option<SendCallback>,
        transport: &mut T,
    ) -> Result<()> {
        if self.suspended {
            warn!("Delayable: suspended, refusing message to {:#06x}", ctx.addr);
            return Err(Error::Unavailable);
        }

        let needed = ChunkPool::<CHUNK_SIZE, CHUNK_COUNT>::chunks_for(payload.len());
        if needed > CHUNK_COUNT || payload.len() > ACCESS_PAYLOAD_MAX {
            warn!(
                "Delayable: {} byte payload exceeds pool capacity",
                payload.len()
            );
            return Err(Error::InvalidArgument);
        }

        if !self.has_room(needed) && !(self.purge(transport) && self.has_room(needed)) {
            warn!(
                "Delayable: no room for {} chunk(s), {} free",
                needed,
                self.pool.available()
            );
            return Err(Error::ResourceExhausted);
        }

        let slot = self.free_slots.alloc().ok_or(Error::ResourceExhausted)?;
        let chunks = match self.pool.store(payload) {
            Ok(chunks) => chunks,
            Err(e) => {
                self.free_slots.release(slot);
                return Err(e);
            }
        };

        let fire_at = now.saturating_add(self.draw_delay(ctx));
        self.slots[slot as usize] = Some(PendingMessage {
            ctx: *ctx,
            src,
            chunks,
            len: payload.len(),
            fire_at,
            cb,
        });
        self.insert_busy(slot, fire_at);

        debug!(
            "Delayable: {} bytes to {:#06x} in {} ms",
            payload.len(),
            ctx.addr,
            fire_at - now
        );
        Ok(())
    }

    /// Send the head of the queue if it is due.
    ///
    /// Returns the next time (ms) this should be called, or `None` once the
    /// queue is empty.
    pub fn on_timer_fire<T: Transport + ?Sized>(
        &mut self,
        now: u64,
        transport: &mut T,
    ) -> Option<u64> {
        let head = *self.busy.first()?;
        let fire_at = self.fire_time(head)?;
        if fire_at > now {
            return Some(fire_at);
        }
        self.busy.remove(0);

        match self.transmit(head, transport) {
            Err(Error::Transport(SendError::Backpressure)) => {
                let retry = now.saturating_add(u64::from(self.delay.backpressure_retry_ms));
                if let Some(msg) = self.slots[head as usize].as_mut() {
                    msg.fire_at = retry;
                }
                self.insert_busy(head, retry);
                self.stats.rescheduled += 1;
                debug!("Delayable: transport busy, retry at {}", retry);
            }
            result => self.complete(head, result),
        }

        self.next_fire_time()
    }

    /// Cancel every pending message; each callback gets
    /// [`Error::Cancelled`].  Returns how many were cancelled.
    pub fn shutdown(&mut self) -> usize {
        let busy = core::mem::take(&mut self.busy);
        for &slot in &busy {
            if let Some(msg) = self.release(slot) {
                self.stats.cancelled += 1;
                if let Some(cb) = msg.cb {
                    cb(Err(Error::Cancelled));
                }
            }
        }
        if !busy.is_empty() {
            info!("Delayable: cancelled {} pending message(s)", busy.len());
        }
        busy.len()
    }

    /// Refuse new messages; queued ones still go out.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Fire time of the queue head.
    pub fn next_fire_time(&self) -> Option<u64> {
        self.busy.first().and_then(|&slot| self.fire_time(slot))
    }

    /// Number of messages waiting.
    pub fn pending(&self) -> usize {
        self.busy.len()
    }

    pub fn free_chunks(&self) -> usize {
        self.pool.available()
    }

    pub fn stats(&self) -> DelayableStats {
        self.stats
    }

    // ─── internals ───────────────────────────────────────────────

    fn has_room(&self, chunks: usize) -> bool {
        self.free_slots.available() > 0 && self.pool.available() >= chunks
    }

    /// Force out the earliest pending message.  `false` if nothing was
    /// freed.
    fn purge<T: Transport + ?Sized>(&mut self, transport: &mut T) -> bool {
        let Some(&head) = self.busy.first() else {
            return false;
        };
        match self.transmit(head, transport) {
            Err(Error::Transport(SendError::Backpressure)) => {
                debug!("Delayable: purge blocked by backpressure");
                false
            }
            result => {
                self.busy.remove(0);
                self.stats.purged += 1;
                debug!("Delayable: purged message in slot {}", head);
                self.complete(head, result);
                true
            }
        }
    }

    fn transmit<T: Transport + ?Sized>(&self, slot: u16, transport: &mut T) -> Result<()> {
        let msg = self.slots[slot as usize]
            .as_ref()
            .ok_or(Error::NotFound)?;
        let payload = self.pool.read(&msg.chunks, msg.len)?;
        transport.send(&msg.ctx, &payload, msg.src)
    }

    fn complete(&mut self, slot: u16, result: Result<()>) {
        match result {
            Ok(()) => self.stats.sent += 1,
            Err(e) => warn!("Delayable: send failed: {}", e),
        }
        if let Some(cb) = self.release(slot).and_then(|msg| msg.cb) {
            cb(result);
        }
    }

    fn release(&mut self, slot: u16) -> Option<PendingMessage<CHUNK_COUNT>> {
        let mut msg = self.slots[slot as usize].take()?;
        self.pool.release(&mut msg.chunks);
        self.free_slots.release(slot);
        Some(msg)
    }

    fn fire_time(&self, slot: u16) -> Option<u64> {
        self.slots[slot as usize].as_ref().map(|msg| msg.fire_at)
    }

    fn insert_busy(&mut self, slot: u16, fire_at: u64) {
        let pos = self
            .busy
            .iter()
            .position(|&s| self.fire_time(s).is_some_and(|t| t > fire_at))
            .unwrap_or(self.busy.len());
        if self.busy.insert(pos, slot).is_err() {
            error!("Delayable: busy list overflow, slot {} lost", slot);
        }
    }

    fn draw_delay(&mut self, ctx: &MsgCtx) -> u64 {
        let window = if ctx.received_on_unicast() {
            self.delay.unicast_window_ms
        } else {
            self.delay.group_window_ms
        };
        let jitter = if window == 0 {
            0
        } else {
            self.rng.gen_range(0..window)
        };
        u64::from(self.delay.min_ms) + u64::from(jitter)
    }
}
