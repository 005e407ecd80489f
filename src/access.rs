//! Local dispatch and outbound routing — the thin slice of the access layer
//! this core needs.
//!
//! ```text
//!   inbound PDU ──▶ Access::dispatch ──▶ element(recv_dst) ──▶ ModelHandler
//!                                                    │
//!                                   reply ◀──────────┘
//!
//!   model send ──▶ Router ──┬── sequence accepts ctx? ─▶ OpAggClient::send
//!                           └── otherwise ─────────────▶ Transport::send
//! ```
//!
//! The aggregator client demultiplexes Status slots through the same
//! [`LocalDispatch`] path an unaggregated reply takes, and the aggregator
//! server captures the replies [`Access`] reports.

use heapless::Vec;
use log::{debug, warn};

use crate::addr::{self, Address};
use crate::agg::{OpAggClient, is_aggregator_message};
use crate::config::{ACCESS_PAYLOAD_MAX, MAX_ELEMENTS};
use crate::error::{Error, Result};
use crate::msg::{MsgCtx, Transport};
use crate::opcode::Opcode;

/// An access payload: opcode followed by parameters.
pub type Payload = Vec<u8, ACCESS_PAYLOAD_MAX>;

/// Start a payload with `op`.
pub fn new_message(op: Opcode) -> Payload {
    let mut msg = Payload::new();
    let mut hdr = [0u8; 3];
    let written = op.write(&mut hdr);
    debug_assert!(written.is_ok(), "three octets hold any opcode");
    let len = written.unwrap_or(0);
    let pushed = msg.extend_from_slice(&hdr[..len]);
    debug_assert!(pushed.is_ok(), "payload capacity holds an opcode");
    msg
}

// ───────────────────────────────────────────────────────────────
// Model handlers
// ───────────────────────────────────────────────────────────────

/// A model bound to an element.
pub trait ModelHandler: Send {
    /// Opcodes this model accepts.
    fn opcodes(&self) -> &[Opcode];

    /// Handle one message.  Write a reply (opcode + parameters) into
    /// `reply` to answer it; leave it empty otherwise.
    fn recv(
        &mut self,
        op: Opcode,
        ctx: &MsgCtx,
        params: &[u8],
        reply: &mut Payload,
    ) -> Result<()>;
}

/// Delivery of inbound access payloads to local models.
pub trait LocalDispatch {
    /// Whether `addr` is one of this node's elements.
    fn has_element(&self, addr: Address) -> bool;

    /// Whether a model on element `elem` accepts `op`.
    fn supports(&self, elem: Address, op: Opcode) -> bool;

    /// Deliver `msg` as if received on `ctx.recv_dst`.
    ///
    /// `on_reply` is called with the replying element's address and the
    /// reply payload for each model that answers.
    fn dispatch(
        &mut self,
        ctx: &MsgCtx,
        msg: &[u8],
        on_reply: &mut dyn FnMut(Address, &[u8]),
    ) -> Result<()>;
}

struct Element {
    addr: Address,
    models: std::vec::Vec<Box<dyn ModelHandler>>,
}

impl Element {
    fn model_for(&mut self, op: Opcode) -> Option<&mut Box<dyn ModelHandler>> {
        self.models.iter_mut().find(|m| m.opcodes().contains(&op))
    }
}

/// Element/model registry of one node.
#[derive(Default)]
pub struct Access {
    elements: Vec<Element, MAX_ELEMENTS>,
}

impl Access {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an element at unicast address `addr`.
    pub fn add_element(&mut self, addr: Address) -> Result<()> {
        if !addr::is_unicast(addr) || self.has_element(addr) {
            return Err(Error::InvalidArgument);
        }
        self.elements
            .push(Element {
                addr,
                models: std::vec::Vec::new(),
            })
            .map_err(|_| Error::ResourceExhausted)
    }

    /// Bind `model` to the element at `addr`.
    pub fn add_model(&mut self, addr: Address, model: Box<dyn ModelHandler>) -> Result<()> {
        let elem = self
            .elements
            .iter_mut()
            .find(|e| e.addr == addr)
            .ok_or(Error::NotFound)?;
        elem.models.push(model);
        Ok(())
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Dispatch an inbound message and send each model's reply back to the
    /// peer from the replying element.
    ///
    /// Replies go out with [`MsgCtx::reply`], so they carry `rnd_delay` and
    /// a delaying transport spreads them out.  Every reply is attempted;
    /// the first send failure is returned.
    pub fn recv<T: Transport + ?Sized>(
        &mut self,
        ctx: &MsgCtx,
        msg: &[u8],
        transport: &mut T,
    ) -> Result<()> {
        let reply_ctx = ctx.reply();
        let mut sent = Ok(());
        self.dispatch(ctx, msg, &mut |elem, reply| {
            if let Err(e) = transport.send(&reply_ctx, reply, elem) {
                warn!("Access: reply from {:#06x} failed: {}", elem, e);
                if sent.is_ok() {
                    sent = Err(e);
                }
            }
        })?;
        sent
    }
}

impl LocalDispatch for Access {
    fn has_element(&self, addr: Address) -> bool {
        self.elements.iter().any(|e| e.addr == addr)
    }

    fn supports(&self, elem: Address, op: Opcode) -> bool {
        self.elements
            .iter()
            .filter(|e| e.addr == elem)
            .any(|e| e.models.iter().any(|m| m.opcodes().contains(&op)))
    }

    fn dispatch(
        &mut self,
        ctx: &MsgCtx,
        msg: &[u8],
        on_reply: &mut dyn FnMut(Address, &[u8]),
    ) -> Result<()> {
        let (op, params) = Opcode::parse(msg)?;
        let unicast = addr::is_unicast(ctx.recv_dst);
        let mut delivered = false;

        for elem in self.elements.iter_mut() {
            if unicast && elem.addr != ctx.recv_dst {
                continue;
            }
            let elem_addr = elem.addr;
            let Some(model) = elem.model_for(op) else {
                continue;
            };

            let mut reply = Payload::new();
            model.recv(op, ctx, params, &mut reply)?;
            delivered = true;
            if !reply.is_empty() {
                on_reply(elem_addr, &reply);
            }
        }

        if delivered {
            Ok(())
        } else {
            debug!(
                "Access: no model for {} on {:#06x} (from {:#06x})",
                op, ctx.recv_dst, ctx.addr
            );
            Err(Error::NotFound)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Outbound routing
// ───────────────────────────────────────────────────────────────

/// Transport wrapper that diverts model sends into a started aggregation
/// sequence.
///
/// Only sends the sequence [accepts](OpAggClient::accepts) are captured;
/// traffic to any other peer or key passes straight through and is
/// reported as not batching, so acknowledged requests to it still wait
/// for their reply.  Aggregator PDUs themselves always pass through, so
/// finishing a sequence through the router cannot recurse into it.
pub struct Router<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    aggregator: &'a OpAggClient,
}

impl<'a, T: Transport + ?Sized> Router<'a, T> {
    pub fn new(transport: &'a mut T, aggregator: &'a OpAggClient) -> Self {
        Self {
            transport,
            aggregator,
        }
    }
}

impl<T: Transport + ?Sized> Transport for Router<'_, T> {
    fn send(&mut self, ctx: &MsgCtx, payload: &[u8], src: Address) -> Result<()> {
        if !is_aggregator_message(payload) && self.aggregator.accepts(ctx) {
            return self.aggregator.send(src, payload);
        }
        if self.aggregator.is_started() {
            debug!("Access: {:#06x} is outside the open sequence, sending direct", ctx.addr);
        }
        self.transport.send(ctx, payload, src)
    }

    fn batching(&self, ctx: &MsgCtx) -> bool {
        self.aggregator.accepts(ctx)
    }
}
