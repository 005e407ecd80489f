//! Fuzz target: `OpAggClient::handle_status`
//!
//! Accumulates a few items, then feeds the client an arbitrary Status.
//! The handler must never panic and must leave the client reusable.
//!
//! cargo fuzz run fuzz_status_handler

#![no_main]

use libfuzzer_sys::fuzz_target;
use mesh_access::access::LocalDispatch;
use mesh_access::addr::Address;
use mesh_access::agg::OpAggClient;
use mesh_access::msg::MsgCtx;
use mesh_access::opcode::Opcode;

struct Sink;

impl LocalDispatch for Sink {
    fn has_element(&self, _addr: Address) -> bool {
        true
    }

    fn supports(&self, _elem: Address, _op: Opcode) -> bool {
        true
    }

    fn dispatch(
        &mut self,
        _ctx: &MsgCtx,
        msg: &[u8],
        _on_reply: &mut dyn FnMut(Address, &[u8]),
    ) -> mesh_access::Result<()> {
        Opcode::parse(msg).map(|_| ())
    }
}

fuzz_target!(|data: &[u8]| {
    let client = OpAggClient::new(0x0001);
    if client.start(0, 0, 0x0100, 0x0100).is_err() {
        return;
    }
    for src in 1..=4 {
        let _ = client.send(src, &[0x82, 0x01]);
    }

    let ctx = MsgCtx::app(0, 0, 0x0100);
    let mut pdu = vec![0x80, 0x73];
    pdu.extend_from_slice(data);
    let _ = client.handle_status(&ctx, &pdu, &mut Sink);

    assert!(client.item_count() <= 4);
    client.abort();
    assert!(client.start(0, 0, 0x0100, 0x0100).is_ok());
});
