//! Access-layer opcodes.
//!
//! Wire format (first octet selects the width):
//! ```text
//! 0xxxxxxx                     1 octet  SIG   (0x7F reserved)
//! 10xxxxxx xxxxxxxx            2 octets SIG   (big-endian)
//! 11xxxxxx cccccccc cccccccc   3 octets vendor (company id little-endian)
//! ```

use crate::error::{Error, Result};

/// A numeric message-type identifier.
///
/// Stored in the same packed form the wire order implies: 1-octet opcodes
/// are `< 0x100`, 2-octet opcodes `< 0x10000`, vendor opcodes carry the
/// leading octet in bits 16..24 and the company id in the low 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(u32);

impl Opcode {
    pub const fn op1(b0: u8) -> Self {
        Self(b0 as u32)
    }

    pub const fn op2(b0: u8, b1: u8) -> Self {
        Self(((b0 as u32) << 8) | b1 as u32)
    }

    /// Vendor opcode: 6-bit `op` plus the vendor's company identifier.
    pub const fn vendor(op: u8, company: u16) -> Self {
        Self((((op as u32) | 0xC0) << 16) | company as u32)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Number of octets this opcode occupies on the wire.
    pub const fn encoded_len(self) -> usize {
        if self.0 < 0x100 {
            1
        } else if self.0 < 0x1_0000 {
            2
        } else {
            3
        }
    }

    /// Write the opcode at the start of `out`, returning the octets used.
    pub fn write(self, out: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        if out.len() < len {
            return Err(Error::OutOfMemory);
        }
        match len {
            1 => out[0] = self.0 as u8,
            2 => out[..2].copy_from_slice(&(self.0 as u16).to_be_bytes()),
            _ => {
                out[0] = (self.0 >> 16) as u8;
                out[1..3].copy_from_slice(&(self.0 as u16).to_le_bytes());
            }
        }
        Ok(len)
    }

    /// Split an access payload into its opcode and parameters.
    pub fn parse(msg: &[u8]) -> Result<(Self, &[u8])> {
        let Some(&b0) = msg.first() else {
            return Err(Error::InvalidFormat);
        };
        match b0 >> 6 {
            0 | 1 => {
                if b0 == 0x7F {
                    return Err(Error::InvalidFormat);
                }
                Ok((Self(b0 as u32), &msg[1..]))
            }
            2 => {
                if msg.len() < 2 {
                    return Err(Error::InvalidFormat);
                }
                Ok((Self::op2(b0, msg[1]), &msg[2..]))
            }
            _ => {
                if msg.len() < 3 {
                    return Err(Error::InvalidFormat);
                }
                let company = u16::from_le_bytes([msg[1], msg[2]]);
                Ok((Self(((b0 as u32) << 16) | company as u32), &msg[3..]))
            }
        }
    }
}

impl core::fmt::Display for Opcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}
