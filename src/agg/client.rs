//! Opcodes Aggregator client.
//!
//! A client collects the requests of its local models into one Sequence
//! PDU addressed to a peer's aggregator server, then demultiplexes the
//! Status back into the individual status handlers:
//!
//! ```text
//!   start(dst, elem) ─▶ send(src_0, msg_0) ─▶ ... ─▶ finish() ──▶ Sequence
//!                                                        │ blocks
//!   Status ──▶ handle_status ──▶ slot i ──▶ dispatch(recv_dst = src_i)
//!                                  └──────▶ wake finish()
//! ```
//!
//! The source element of every accumulated message is recorded in send
//! order; slot *i* of the Status is delivered as if element `src_i` had
//! received it directly.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::{Deque, Vec};
use log::{debug, error, info, warn};

use crate::access::LocalDispatch;
use crate::addr::{self, Address};
use crate::config::{ACCESS_PAYLOAD_MAX, AccessConfig, OP_AGG_ITEMS_MAX, OP_AGG_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::msg::{AckContext, MsgCtx, RspCtx, Transport, send_acked};
use crate::opcode::Opcode;

use super::StatusCode;
use super::codec::{self, Items, OP_SEQUENCE, OP_STATUS};

/// Header fields of a received Opcodes Aggregator Status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggStatus {
    pub status: u8,
    pub elem_addr: Address,
}

impl AggStatus {
    pub fn code(&self) -> Option<StatusCode> {
        StatusCode::from_u8(self.status)
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusCode::Success as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// `start` called; items are being appended.
    Accumulating,
    /// The Sequence is on the air and `finish` is blocked on its Status.
    AwaitingStatus,
}

struct Sequence {
    phase: Phase,
    ctx: MsgCtx,
    elem_addr: Address,
    sdu: Vec<u8, ACCESS_PAYLOAD_MAX>,
    /// Source element of each accumulated item, in send order.
    srcs: Deque<Address, OP_AGG_ITEMS_MAX>,
}

impl Sequence {
    const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            ctx: MsgCtx {
                net_idx: 0,
                app_idx: 0,
                addr: addr::UNASSIGNED,
                recv_dst: addr::UNASSIGNED,
                send_ttl: crate::msg::ctx::TTL_DEFAULT,
                rnd_delay: false,
            },
            elem_addr: addr::UNASSIGNED,
            sdu: Vec::new(),
            srcs: Deque::new(),
        }
    }
}

/// One aggregation session per client model instance.
pub struct OpAggClient {
    /// Element the client model lives on; source of the Sequence.
    addr: Address,
    seq: Mutex<CriticalSectionRawMutex, RefCell<Sequence>>,
    ack: AckContext<AggStatus>,
    timeout_ms: AtomicU32,
}

impl OpAggClient {
    pub const fn new(addr: Address) -> Self {
        Self {
            addr,
            seq: Mutex::new(RefCell::new(Sequence::new())),
            ack: AckContext::new(),
            timeout_ms: AtomicU32::new(OP_AGG_TIMEOUT_MS),
        }
    }

    pub fn with_config(addr: Address, config: &AccessConfig) -> Self {
        let client = Self::new(addr);
        client.timeout_ms.store(config.op_agg_timeout_ms, Ordering::Relaxed);
        client
    }

    /// Begin a sequence to the server at `dst`, targeting element
    /// `elem_addr` on it.
    pub fn start(
        &self,
        net_idx: u16,
        app_idx: u16,
        dst: Address,
        elem_addr: Address,
    ) -> Result<()> {
        if !addr::is_unicast(elem_addr) {
            return Err(Error::InvalidArgument);
        }

        let mut hdr = [0u8; 4];
        let op_len = OP_SEQUENCE.write(&mut hdr)?;
        hdr[op_len..op_len + 2].copy_from_slice(&elem_addr.to_le_bytes());

        self.seq.lock(|cell| {
            let mut seq = cell.borrow_mut();
            if seq.phase != Phase::Idle {
                warn!("OpAgg: sequence to {:#06x} still open", seq.ctx.addr);
                return Err(Error::AlreadyInProgress);
            }
            seq.sdu.clear();
            seq.srcs.clear();
            seq.sdu
                .extend_from_slice(&hdr[..op_len + 2])
                .map_err(|_| Error::OutOfMemory)?;
            seq.ctx = MsgCtx::app(net_idx, app_idx, dst);
            seq.elem_addr = elem_addr;
            seq.phase = Phase::Accumulating;
            Ok(())
        })?;

        info!(
            "OpAgg: sequence started to {:#06x} (element {:#06x})",
            dst, elem_addr
        );
        Ok(())
    }

    /// Append `msg`, sent by local element `src`, to the open sequence.
    ///
    /// Either both the item and its source are recorded or neither is.
    pub fn send(&self, src: Address, msg: &[u8]) -> Result<()> {
        self.seq.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let seq = &mut *guard;
            if seq.phase != Phase::Accumulating {
                return Err(Error::InvalidArgument);
            }

            let start = seq.sdu.len();
            let needed = codec::encoded_len(msg.len());
            if seq.srcs.is_full() || seq.sdu.capacity() - start < needed {
                debug!("OpAgg: sequence full, dropping item from {:#06x}", src);
                return Err(Error::OutOfMemory);
            }

            seq.sdu
                .resize(start + needed, 0)
                .map_err(|_| Error::OutOfMemory)?;
            if let Err(e) = codec::encode_msg(msg, &mut seq.sdu[start..]) {
                seq.sdu.truncate(start);
                return Err(e);
            }
            seq.srcs
                .push_back(src)
                .map_err(|_| Error::OutOfMemory)?;
            Ok(())
        })
    }

    /// Send the accumulated sequence and block until the Status arrives or
    /// the client timeout expires.
    ///
    /// The item replies are dispatched by [`handle_status`](Self::handle_status)
    /// before this returns.  The client stays claimed until then, so no new
    /// sequence can start over the recorded source addresses.
    pub fn finish<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<AggStatus> {
        let (ctx, elem_addr, sdu, items) = self.seq.lock(|cell| {
            let mut seq = cell.borrow_mut();
            if seq.phase != Phase::Accumulating {
                return Err(Error::InvalidArgument);
            }
            seq.phase = Phase::AwaitingStatus;
            Ok((seq.ctx, seq.elem_addr, seq.sdu.clone(), seq.srcs.len()))
        })?;

        info!(
            "OpAgg: sending {} item(s) to {:#06x} (element {:#06x})",
            items, ctx.addr, elem_addr
        );

        let rsp = RspCtx::new(
            &self.ack,
            OP_STATUS,
            AggStatus {
                status: 0,
                elem_addr,
            },
        )
        .with_timeout(self.timeout());

        let result = send_acked(transport, &ctx, self.addr, &sdu, Some(rsp));
        self.release();
        match result {
            Ok(Some(status)) => Ok(status),
            // A batching transport swallowed the Sequence itself.
            Ok(None) => Err(Error::Unavailable),
            Err(e) => {
                warn!("OpAgg: sequence to {:#06x} failed: {}", ctx.addr, e);
                Err(e)
            }
        }
    }

    /// Drop the open sequence without sending it.
    ///
    /// No effect once `finish` has sent it.
    pub fn abort(&self) {
        let aborted = self.seq.lock(|cell| {
            let mut seq = cell.borrow_mut();
            if seq.phase != Phase::Accumulating {
                return false;
            }
            seq.phase = Phase::Idle;
            seq.sdu.clear();
            seq.srcs.clear();
            true
        });
        if aborted {
            debug!("OpAgg: sequence aborted");
        }
    }

    /// Whether a sequence is currently accumulating.
    pub fn is_started(&self) -> bool {
        self.seq.lock(|cell| cell.borrow().phase == Phase::Accumulating)
    }

    /// Whether a send with `ctx` belongs in the open sequence: same keys
    /// and same server as the one passed to [`start`](Self::start).
    pub fn accepts(&self, ctx: &MsgCtx) -> bool {
        self.seq.lock(|cell| {
            let seq = cell.borrow();
            seq.phase == Phase::Accumulating
                && seq.ctx.net_idx == ctx.net_idx
                && seq.ctx.app_idx == ctx.app_idx
                && seq.ctx.addr == ctx.addr
        })
    }

    /// Number of items accumulated in the open sequence.
    pub fn item_count(&self) -> usize {
        self.seq.lock(|cell| cell.borrow().srcs.len())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms.load(Ordering::Relaxed)))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self.timeout_ms.store(ms, Ordering::Relaxed);
    }

    /// Handle an inbound Opcodes Aggregator Status (`pdu` includes the
    /// opcode).
    ///
    /// Each non-empty slot is delivered through `dispatch` with `recv_dst`
    /// set to the element that sent the matching item.  Once every slot is
    /// delivered, the waiting [`finish`](Self::finish) is woken.  A
    /// malformed slot or a failing handler stops processing and leaves the
    /// waiter to time out.
    pub fn handle_status<D: LocalDispatch + ?Sized>(
        &self,
        ctx: &MsgCtx,
        pdu: &[u8],
        dispatch: &mut D,
    ) -> Result<()> {
        let (op, params) = Opcode::parse(pdu)?;
        if op != OP_STATUS {
            return Err(Error::InvalidArgument);
        }
        if params.len() < 3 {
            return Err(Error::InvalidFormat);
        }
        let status = params[0];
        let elem_addr = u16::from_le_bytes([params[1], params[2]]);

        debug!(
            "OpAgg: status {:#04x} from {:#06x} for element {:#06x}",
            status, ctx.addr, elem_addr
        );

        for item in Items::new(&params[3..]) {
            let msg = match item {
                Ok(msg) => msg,
                Err(e) => {
                    error!("OpAgg: cannot decode aggregated message");
                    self.discard_sources();
                    return Err(e);
                }
            };

            let Some(src) = self.seq.lock(|cell| cell.borrow_mut().srcs.pop_front()) else {
                error!("OpAgg: mismatch in source address buffer");
                return Err(Error::InvalidFormat);
            };

            if msg.is_empty() {
                debug!("OpAgg: item for {:#06x} was not acknowledged", src);
                continue;
            }

            let item_ctx = MsgCtx {
                recv_dst: src,
                ..*ctx
            };
            if let Err(e) = dispatch.dispatch(&item_ctx, msg, &mut |_, _| {}) {
                error!("OpAgg: handling aggregated message for {:#06x} failed: {}", src, e);
                self.discard_sources();
                return Err(e);
            }
        }

        let matched = self.ack.with_match(OP_STATUS, ctx.addr, |slot| {
            *slot = AggStatus { status, elem_addr };
        });
        if matched.is_some() {
            self.ack.rx();
        }
        Ok(())
    }

    fn discard_sources(&self) {
        self.seq.lock(|cell| cell.borrow_mut().srcs.clear());
    }

    /// Back to idle once `finish` is done waiting; slots the Status did
    /// not cover are dropped with the sequence.
    fn release(&self) {
        self.seq.lock(|cell| {
            let mut seq = cell.borrow_mut();
            seq.phase = Phase::Idle;
            seq.sdu.clear();
            seq.srcs.clear();
        });
    }
}
