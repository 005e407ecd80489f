//! Fuzz target: `handle_sequence`
//!
//! Feeds arbitrary Sequence parameters to the server and checks that any
//! Status it builds fits one access payload and is itself well framed.
//!
//! cargo fuzz run fuzz_sequence_server

#![no_main]

use libfuzzer_sys::fuzz_target;
use mesh_access::access::{Access, ModelHandler, Payload};
use mesh_access::agg::{Items, handle_sequence};
use mesh_access::config::ACCESS_PAYLOAD_MAX;
use mesh_access::msg::MsgCtx;
use mesh_access::opcode::Opcode;

const GET: Opcode = Opcode::op2(0x82, 0x01);

/// Echoes the request parameters back, doubled.
struct Echo;

impl ModelHandler for Echo {
    fn opcodes(&self) -> &[Opcode] {
        &[GET]
    }

    fn recv(
        &mut self,
        _op: Opcode,
        _ctx: &MsgCtx,
        params: &[u8],
        reply: &mut Payload,
    ) -> mesh_access::Result<()> {
        for _ in 0..2 {
            let _ = reply.extend_from_slice(params);
        }
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let mut node = Access::new();
    if node.add_element(0x0100).is_err() || node.add_model(0x0100, Box::new(Echo)).is_err() {
        return;
    }

    let mut pdu = vec![0x80, 0x72];
    pdu.extend_from_slice(data);
    let ctx = MsgCtx::app(0, 0, 0x0001);

    if let Ok(status) = handle_sequence(&ctx, &pdu, &mut node) {
        assert!(status.len() <= ACCESS_PAYLOAD_MAX);
        assert!(status.len() >= 5);
        assert!(Items::new(&status[5..]).all(|item| item.is_ok()));
    }
});
