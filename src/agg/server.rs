//! Opcodes Aggregator server.
//!
//! Validates a whole Sequence before touching any model, then dispatches
//! the items in order and packs each reply (or an empty slot) into a
//! single Status.

use log::{debug, info, warn};

use crate::access::{LocalDispatch, Payload, new_message};
use crate::addr::{self, Address};
use crate::error::{Error, Result};
use crate::msg::MsgCtx;
use crate::opcode::Opcode;

use super::StatusCode;
use super::codec::{self, Items, OP_SEQUENCE, OP_STATUS};

/// Offset of the status octet in the Status PDU.
const STATUS_OFFSET: usize = 2;

/// Process a received Sequence (`pdu` includes the opcode) and build the
/// Status PDU to return to `ctx.addr`.
///
/// Returns `Err(InvalidFormat)` when the Sequence cannot be parsed at all;
/// no Status is sent in that case.
pub fn handle_sequence<D: LocalDispatch + ?Sized>(
    ctx: &MsgCtx,
    pdu: &[u8],
    dispatch: &mut D,
) -> Result<Payload> {
    let (op, params) = Opcode::parse(pdu)?;
    if op != OP_SEQUENCE {
        return Err(Error::InvalidArgument);
    }
    if params.len() < 2 {
        return Err(Error::InvalidFormat);
    }
    let elem_addr = u16::from_le_bytes([params[0], params[1]]);
    let items = &params[2..];

    let mut rsp = status_header(elem_addr)?;

    if !addr::is_unicast(elem_addr) || !dispatch.has_element(elem_addr) {
        warn!("OpAgg: sequence for unknown element {:#06x}", elem_addr);
        rsp[STATUS_OFFSET] = StatusCode::InvalidAddress as u8;
        return Ok(rsp);
    }

    // Pass 1: the whole sequence must parse and be deliverable.
    for item in Items::new(items) {
        let msg = item.inspect_err(|_| warn!("OpAgg: malformed sequence from {:#06x}", ctx.addr))?;
        let status = match Opcode::parse(msg) {
            Err(_) => Some(StatusCode::MessageNotUnderstood),
            Ok(_) if codec::is_aggregator_message(msg) => Some(StatusCode::WrongOpcode),
            Ok((item_op, _)) if !dispatch.supports(elem_addr, item_op) => {
                Some(StatusCode::WrongOpcode)
            }
            Ok(_) => None,
        };
        if let Some(status) = status {
            debug!("OpAgg: rejecting sequence: {:?}", status);
            rsp[STATUS_OFFSET] = status as u8;
            return Ok(rsp);
        }
    }

    // Pass 2: deliver in order, one slot per item.
    let item_ctx = MsgCtx {
        recv_dst: elem_addr,
        ..*ctx
    };
    let mut count = 0usize;
    for msg in Items::new(items).flatten() {
        let mut reply: Option<Payload> = None;
        let mut capture = |_: Address, r: &[u8]| {
            if reply.is_none() {
                reply = Payload::from_slice(r).ok();
            }
        };
        if let Err(e) = dispatch.dispatch(&item_ctx, msg, &mut capture) {
            debug!("OpAgg: item {} not handled: {}", count, e);
        }

        let body = reply.as_deref().unwrap_or(&[]);
        if !append_slot(&mut rsp, body) {
            warn!("OpAgg: status overflow after {} item(s)", count);
            rsp[STATUS_OFFSET] = StatusCode::ResponseOverflow as u8;
            break;
        }
        count += 1;
    }

    info!(
        "OpAgg: answered {} item(s) for element {:#06x} to {:#06x}",
        count, elem_addr, ctx.addr
    );
    Ok(rsp)
}

fn status_header(elem_addr: Address) -> Result<Payload> {
    let mut rsp = new_message(OP_STATUS);
    rsp.push(StatusCode::Success as u8)
        .map_err(|_| Error::OutOfMemory)?;
    rsp.extend_from_slice(&elem_addr.to_le_bytes())
        .map_err(|_| Error::OutOfMemory)?;
    Ok(rsp)
}

/// Append `body` as the next slot; `false` if it does not fit.
fn append_slot(rsp: &mut Payload, body: &[u8]) -> bool {
    let start = rsp.len();
    let needed = codec::encoded_len(body.len());
    if rsp.capacity() - start < needed || rsp.resize(start + needed, 0).is_err() {
        return false;
    }
    if codec::encode_msg(body, &mut rsp[start..]).is_err() {
        rsp.truncate(start);
        return false;
    }
    true
}
