//! Opcodes Aggregator item framing.
//!
//! Each aggregated access message is prefixed by its length; the low bit
//! of the first octet selects the header width:
//! ```text
//! ┌──────────────────┬─────────────────────┐
//! │ (len << 1)   1B  │ message (len ≤ 127) │
//! └──────────────────┴─────────────────────┘
//! ┌──────────────────┬─────────────────────┐
//! │ (len << 1)|1  2B │ message (len > 127) │
//! │ LE u16           │                     │
//! └──────────────────┴─────────────────────┘
//! ```
//! A zero-length item in a Status is an unacknowledged message's slot.

use crate::error::{Error, Result};
use crate::opcode::Opcode;

pub const OP_SEQUENCE: Opcode = Opcode::op2(0x80, 0x72);
pub const OP_STATUS: Opcode = Opcode::op2(0x80, 0x73);

/// Longest item the short (1-octet) header can describe.
const LENGTH_SHORT_MAX: usize = 0x7F;

/// Longest item the long header can describe.
pub const ITEM_LEN_MAX: usize = 0x7FFF;

/// Bytes [`encode_msg`] writes for an item of `len` octets.
pub const fn encoded_len(len: usize) -> usize {
    if len > LENGTH_SHORT_MAX { len + 2 } else { len + 1 }
}

/// Write `msg` with its length header at the start of `out`.
///
/// Returns the number of bytes written.
pub fn encode_msg(msg: &[u8], out: &mut [u8]) -> Result<usize> {
    if msg.len() > ITEM_LEN_MAX {
        return Err(Error::InvalidArgument);
    }
    let total = encoded_len(msg.len());
    if total > out.len() {
        return Err(Error::OutOfMemory);
    }

    let header = if msg.len() > LENGTH_SHORT_MAX {
        let field = ((msg.len() as u16) << 1) | 1;
        out[..2].copy_from_slice(&field.to_le_bytes());
        2
    } else {
        out[0] = (msg.len() as u8) << 1;
        1
    };
    out[header..total].copy_from_slice(msg);

    Ok(total)
}

/// Pull the next item off the front of `buf`.
///
/// On error `buf` is left untouched.
pub fn decode_msg<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let data: &'a [u8] = *buf;
    let Some(&first) = data.first() else {
        return Err(Error::InvalidFormat);
    };

    let (len, header) = if first & 1 == 1 {
        if data.len() < 2 {
            return Err(Error::InvalidFormat);
        }
        ((u16::from_le_bytes([data[0], data[1]]) >> 1) as usize, 2)
    } else {
        ((first >> 1) as usize, 1)
    };

    let rest = &data[header..];
    if rest.len() < len {
        return Err(Error::InvalidFormat);
    }

    let (msg, tail) = rest.split_at(len);
    *buf = tail;
    Ok(msg)
}

/// Whether `msg` is an Opcodes Aggregator Sequence or Status.
///
/// Only peeks at the opcode; `msg` is not consumed.
pub fn is_aggregator_message(msg: &[u8]) -> bool {
    if msg.len() < 2 || msg[0] >> 6 != 2 {
        return false;
    }
    let op = Opcode::op2(msg[0], msg[1]);
    op == OP_SEQUENCE || op == OP_STATUS
}

/// Iterator over the items of an aggregated payload.
///
/// Yields one `Err` on the first malformed item and then stops.
pub struct Items<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> Items<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, failed: false }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        self.buf
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        let item = decode_msg(&mut self.buf);
        self.failed = item.is_err();
        Some(item)
    }
}
