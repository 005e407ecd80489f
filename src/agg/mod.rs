//! Opcodes Aggregator — batch several per-element access messages into one
//! PDU and demultiplex the reply.
//!
//! ```text
//! Sequence: ┌────────┬──────────────┬────────┬────────┬─────┐
//!           │ 0x8072 │ elem addr LE │ item 0 │ item 1 │ ... │
//!           └────────┴──────────────┴────────┴────────┴─────┘
//! Status:   ┌────────┬────────┬──────────────┬────────┬─────┐
//!           │ 0x8073 │ status │ elem addr LE │ slot 0 │ ... │
//!           └────────┴────────┴──────────────┴────────┴─────┘
//! ```
//! Slot *i* of a Status answers item *i* of the Sequence; an empty slot
//! means the item was unacknowledged.

pub mod client;
pub mod codec;
pub mod server;

pub use client::{AggStatus, OpAggClient};
pub use codec::{
    ITEM_LEN_MAX, Items, OP_SEQUENCE, OP_STATUS, decode_msg, encode_msg, encoded_len,
    is_aggregator_message,
};
pub use server::handle_sequence;

/// Status codes carried in an Opcodes Aggregator Status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    /// The element address is not a unicast address of this node.
    InvalidAddress = 0x01,
    /// An item is not bound to the key the Sequence arrived on.
    WrongAccessKey = 0x02,
    /// No model on the element handles an item's opcode.
    WrongOpcode = 0x03,
    /// An item could not be parsed.
    MessageNotUnderstood = 0x04,
    /// The responses did not fit one Status.
    ResponseOverflow = 0x05,
}

impl StatusCode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::Success),
            0x01 => Some(Self::InvalidAddress),
            0x02 => Some(Self::WrongAccessKey),
            0x03 => Some(Self::WrongOpcode),
            0x04 => Some(Self::MessageNotUnderstood),
            0x05 => Some(Self::ResponseOverflow),
            _ => None,
        }
    }
}
