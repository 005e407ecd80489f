//! Mesh address classes.
//!
//! ```text
//! 0x0000            unassigned
//! 0x0001 ..= 0x7FFF unicast (one per element)
//! 0x8000 ..= 0xBFFF virtual (label UUID hash)
//! 0xC000 ..= 0xFFFF group   (0xFF00.. reserved fixed groups)
//! ```

/// A 16-bit mesh address.
pub type Address = u16;

pub const UNASSIGNED: Address = 0x0000;
pub const ALL_PROXIES: Address = 0xFFFC;
pub const ALL_FRIENDS: Address = 0xFFFD;
pub const ALL_RELAYS: Address = 0xFFFE;
pub const ALL_NODES: Address = 0xFFFF;

pub const fn is_unassigned(addr: Address) -> bool {
    addr == UNASSIGNED
}

pub const fn is_unicast(addr: Address) -> bool {
    addr != UNASSIGNED && addr < 0x8000
}

pub const fn is_virtual(addr: Address) -> bool {
    addr >= 0x8000 && addr < 0xC000
}

pub const fn is_group(addr: Address) -> bool {
    addr >= 0xC000
}

pub const fn is_fixed_group(addr: Address) -> bool {
    addr >= 0xFF00
}
