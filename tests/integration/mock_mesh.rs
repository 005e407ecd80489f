//! Mock mesh network for integration tests.
//!
//! Provides a recording transport, a pair of toy level models, and a
//! loopback wire that runs a peer's aggregator server and feeds its
//! Status straight back into the local client.

use mesh_access::access::{Access, ModelHandler, Payload, new_message};
use mesh_access::addr::Address;
use mesh_access::agg::{OP_SEQUENCE, OpAggClient, handle_sequence};
use mesh_access::msg::{MsgCtx, Transport};
use mesh_access::opcode::Opcode;
use mesh_access::{Error, Result, SendError};
use std::sync::{Arc, Mutex};

pub const LEVEL_GET: Opcode = Opcode::op2(0x82, 0x05);
pub const LEVEL_STATUS: Opcode = Opcode::op2(0x82, 0x08);

// ── Recording transport ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub ctx: MsgCtx,
    pub payload: Vec<u8>,
    pub src: Address,
}

/// Records every send; refuses the first `backpressure` of them.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Vec<Sent>,
    pub backpressure: usize,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_bytes(&self) -> Vec<u8> {
        self.sent.iter().map(|s| s.payload[0]).collect()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, ctx: &MsgCtx, payload: &[u8], src: Address) -> Result<()> {
        if self.backpressure > 0 {
            self.backpressure -= 1;
            return Err(SendError::Backpressure.into());
        }
        self.sent.push(Sent {
            ctx: *ctx,
            payload: payload.to_vec(),
            src,
        });
        Ok(())
    }
}

// ── Level models ─────────────────────────────────────────────

/// Answers every Get with a Status carrying a running counter.
pub struct LevelServer {
    pub count: u8,
}

impl ModelHandler for LevelServer {
    fn opcodes(&self) -> &[Opcode] {
        &[LEVEL_GET]
    }

    fn recv(&mut self, _op: Opcode, _ctx: &MsgCtx, _params: &[u8], reply: &mut Payload) -> Result<()> {
        self.count += 1;
        *reply = new_message(LEVEL_STATUS);
        reply.push(self.count).map_err(|_| Error::OutOfMemory)
    }
}

pub type StatusLog = Arc<Mutex<Vec<(Address, u8)>>>;

/// Logs `(receiving element, level)` for every Status it sees.
pub struct LevelClient {
    pub log: StatusLog,
}

impl ModelHandler for LevelClient {
    fn opcodes(&self) -> &[Opcode] {
        &[LEVEL_STATUS]
    }

    fn recv(&mut self, _op: Opcode, ctx: &MsgCtx, params: &[u8], _reply: &mut Payload) -> Result<()> {
        let level = *params.first().ok_or(Error::InvalidFormat)?;
        self.log.lock().unwrap().push((ctx.recv_dst, level));
        Ok(())
    }
}

/// Client node with level clients on each of `elements`.
pub fn client_node(elements: &[Address], log: &StatusLog) -> Access {
    let mut node = Access::new();
    for &addr in elements {
        node.add_element(addr).unwrap();
        node.add_model(addr, Box::new(LevelClient { log: Arc::clone(log) }))
            .unwrap();
    }
    node
}

/// Server node with one level server per element.
pub fn server_node(elements: &[Address]) -> Access {
    let mut node = Access::new();
    for &addr in elements {
        node.add_element(addr).unwrap();
        node.add_model(addr, Box::new(LevelServer { count: 0 })).unwrap();
    }
    node
}

// ── Loopback wire ────────────────────────────────────────────

/// Delivers Sequences to `server` and its Status back to `client`.
pub struct Loopback<'a> {
    pub client: &'a OpAggClient,
    pub client_node: &'a mut Access,
    pub server_node: &'a mut Access,
    /// Status bytes to chop off before delivery.
    pub truncate_status: usize,
    pub sequences: usize,
    pub status_result: Option<Result<()>>,
}

#[allow(dead_code)]
impl<'a> Loopback<'a> {
    pub fn new(client: &'a OpAggClient, client_node: &'a mut Access, server_node: &'a mut Access) -> Self {
        Self {
            client,
            client_node,
            server_node,
            truncate_status: 0,
            sequences: 0,
            status_result: None,
        }
    }
}

impl Transport for Loopback<'_> {
    fn send(&mut self, ctx: &MsgCtx, payload: &[u8], src: Address) -> Result<()> {
        let Ok((op, _)) = Opcode::parse(payload) else {
            return Err(Error::InvalidFormat);
        };
        if op != OP_SEQUENCE {
            return Ok(());
        }
        self.sequences += 1;

        let at_server = MsgCtx {
            addr: src,
            recv_dst: ctx.addr,
            ..*ctx
        };
        let status = handle_sequence(&at_server, payload, &mut *self.server_node)?;
        let keep = status.len().saturating_sub(self.truncate_status);

        let at_client = MsgCtx {
            addr: ctx.addr,
            recv_dst: src,
            ..*ctx
        };
        self.status_result = Some(self.client.handle_status(
            &at_client,
            &status[..keep],
            &mut *self.client_node,
        ));
        Ok(())
    }
}
