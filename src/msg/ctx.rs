//! Per-message addressing context.

use crate::addr::{self, Address};

/// Default TTL marker: let the network layer apply the node's default.
pub const TTL_DEFAULT: u8 = 0xFF;

/// Keys and addresses for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgCtx {
    /// NetKey index.
    pub net_idx: u16,
    /// AppKey index.
    pub app_idx: u16,
    /// Peer address: destination when sending, source when received.
    pub addr: Address,
    /// Destination the triggering message was received on.
    pub recv_dst: Address,
    /// TTL for outgoing messages.
    pub send_ttl: u8,
    /// Ask the access layer to send after a random delay.
    pub rnd_delay: bool,
}

impl Default for MsgCtx {
    fn default() -> Self {
        Self {
            net_idx: 0,
            app_idx: 0,
            addr: addr::UNASSIGNED,
            recv_dst: addr::UNASSIGNED,
            send_ttl: TTL_DEFAULT,
            rnd_delay: false,
        }
    }
}

impl MsgCtx {
    /// Context for an application-key secured message to `addr`.
    pub fn app(net_idx: u16, app_idx: u16, addr: Address) -> Self {
        Self {
            net_idx,
            app_idx,
            addr,
            ..Self::default()
        }
    }

    /// Context for replying to a message received with `self`.
    ///
    /// Keeps keys, peer, and the request's destination so the delayable
    /// queue can pick the delay window from how the request was addressed.
    /// Replies are always sent with a random delay.
    pub fn reply(&self) -> Self {
        Self {
            send_ttl: TTL_DEFAULT,
            rnd_delay: true,
            ..*self
        }
    }

    /// Whether the triggering message was addressed to a single element.
    pub fn received_on_unicast(&self) -> bool {
        addr::is_unicast(self.recv_dst)
    }
}
