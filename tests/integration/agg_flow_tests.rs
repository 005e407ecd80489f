//! Opcodes Aggregator end to end: client models batch through the
//! router, the peer's server answers, and replies land on the elements
//! that asked.

use crate::mock_mesh::{
    LEVEL_GET, LEVEL_STATUS, Loopback, MockTransport, StatusLog, client_node, server_node,
};

use mesh_access::access::{Router, new_message};
use mesh_access::agg::{OpAggClient, StatusCode, is_aggregator_message};
use mesh_access::msg::{AckContext, MsgCtx, RspCtx, Transport, send_acked};
use mesh_access::Error;
use std::time::Duration;

const ELEM_A: u16 = 0x0001;
const ELEM_B: u16 = 0x0002;
const PEER: u16 = 0x0100;

fn to_peer() -> MsgCtx {
    MsgCtx::app(0, 0, PEER)
}

#[test]
fn two_senders_get_their_replies_in_order() {
    let log = StatusLog::default();
    let mut local = client_node(&[ELEM_A, ELEM_B], &log);
    let mut peer = server_node(&[PEER]);
    let client = OpAggClient::new(ELEM_A);
    let get = new_message(LEVEL_GET);

    client.start(0, 0, PEER, PEER).unwrap();
    let mut wire = Loopback::new(&client, &mut local, &mut peer);
    let status = {
        let mut router = Router::new(&mut wire, &client);

        // An acknowledged request is batched rather than awaited.
        let ack = AckContext::<u8>::new();
        let rsp = RspCtx::new(&ack, LEVEL_GET, 0);
        assert_eq!(send_acked(&mut router, &to_peer(), ELEM_A, &get, Some(rsp)), Ok(None));
        assert!(!ack.is_busy());

        router.send(&to_peer(), &get, ELEM_B).unwrap();
        assert_eq!(client.item_count(), 2);

        client.finish(&mut router).unwrap()
    };

    assert_eq!(wire.sequences, 1, "one PDU on the air");
    assert_eq!(wire.status_result, Some(Ok(())));
    assert!(status.is_success());
    assert_eq!(status.elem_addr, PEER);
    assert_eq!(*log.lock().unwrap(), vec![(ELEM_A, 1), (ELEM_B, 2)]);
}

#[test]
fn rejected_sequence_dispatches_nothing() {
    let log = StatusLog::default();
    let mut local = client_node(&[ELEM_A], &log);
    let mut peer = server_node(&[PEER]);
    let client = OpAggClient::new(ELEM_A);

    client.start(0, 0, PEER, PEER).unwrap();
    client.send(ELEM_A, &new_message(LEVEL_GET)).unwrap();
    client.send(ELEM_A, &[0x82, 0x30]).unwrap();

    let mut wire = Loopback::new(&client, &mut local, &mut peer);
    let status = client.finish(&mut wire).unwrap();

    assert_eq!(status.code(), Some(StatusCode::WrongOpcode));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn wrong_element_reports_invalid_address() {
    let log = StatusLog::default();
    let mut local = client_node(&[ELEM_A], &log);
    let mut peer = server_node(&[PEER]);
    let client = OpAggClient::new(ELEM_A);

    client.start(0, 0, PEER, PEER + 7).unwrap();
    client.send(ELEM_A, &new_message(LEVEL_GET)).unwrap();

    let mut wire = Loopback::new(&client, &mut local, &mut peer);
    let status = client.finish(&mut wire).unwrap();
    assert_eq!(status.code(), Some(StatusCode::InvalidAddress));
    assert_eq!(status.elem_addr, PEER + 7);
}

#[test]
fn corrupt_status_keeps_earlier_replies_and_times_out() {
    let log = StatusLog::default();
    let mut local = client_node(&[ELEM_A, ELEM_B], &log);
    let mut peer = server_node(&[PEER]);
    let client = OpAggClient::new(ELEM_A);
    client.set_timeout(Duration::from_millis(50));

    client.start(0, 0, PEER, PEER).unwrap();
    client.send(ELEM_A, &new_message(LEVEL_GET)).unwrap();
    client.send(ELEM_B, &new_message(LEVEL_GET)).unwrap();

    let mut wire = Loopback::new(&client, &mut local, &mut peer);
    wire.truncate_status = 1;
    assert_eq!(client.finish(&mut wire), Err(Error::Timeout));
    assert_eq!(wire.status_result, Some(Err(Error::InvalidFormat)));

    assert_eq!(*log.lock().unwrap(), vec![(ELEM_A, 1)], "first slot still landed");
    assert!(client.start(0, 0, PEER, PEER).is_ok(), "client reusable");
}

#[test]
fn router_passes_traffic_through_when_idle() {
    let client = OpAggClient::new(ELEM_A);
    let mut radio = MockTransport::new();
    {
        let mut router = Router::new(&mut radio, &client);
        assert!(!router.batching(&to_peer()));
        router.send(&to_peer(), &new_message(LEVEL_GET), ELEM_A).unwrap();
    }
    assert_eq!(radio.sent.len(), 1);
    assert_eq!(radio.sent[0].src, ELEM_A);
}

#[test]
fn router_sends_other_destinations_directly() {
    let client = OpAggClient::new(ELEM_A);
    let mut radio = MockTransport::new();
    client.start(0, 0, PEER, PEER).unwrap();
    {
        let mut router = Router::new(&mut radio, &client);
        router
            .send(&MsgCtx::app(0, 0, 0x0200), &new_message(LEVEL_GET), ELEM_B)
            .unwrap();
        router.send(&to_peer(), &new_message(LEVEL_GET), ELEM_B).unwrap();
    }
    assert_eq!(radio.sent.len(), 1);
    assert_eq!(radio.sent[0].ctx.addr, 0x0200);
    assert_eq!(client.item_count(), 1);

    client.set_timeout(Duration::from_millis(20));
    assert_eq!(client.finish(&mut radio), Err(Error::Timeout));
    assert!(is_aggregator_message(&radio.sent[1].payload));
}

#[test]
fn acknowledged_request_to_another_peer_still_waits() {
    let client = OpAggClient::new(ELEM_A);
    let mut radio = MockTransport::new();
    client.start(0, 0, PEER, PEER).unwrap();

    let other = MsgCtx::app(0, 0, 0x0200);
    let other_key = MsgCtx::app(0, 1, PEER);
    let ack = AckContext::<u8>::new();
    let got = {
        let mut router = Router::new(&mut radio, &client);
        assert!(router.batching(&to_peer()));
        assert!(!router.batching(&other));
        assert!(!router.batching(&other_key));

        let rsp = RspCtx::new(&ack, LEVEL_STATUS, 0).with_timeout(Duration::from_millis(30));
        send_acked(&mut router, &other, ELEM_A, &new_message(LEVEL_GET), Some(rsp))
    };

    assert_eq!(got, Err(Error::Timeout), "waited for a reply instead of batching");
    assert!(!ack.is_busy());
    assert_eq!(radio.sent.len(), 1);
    assert_eq!(radio.sent[0].ctx.addr, 0x0200);
    assert_eq!(client.item_count(), 0);
}

#[test]
fn sequence_capacity_is_bounded() {
    let client = OpAggClient::new(ELEM_A);
    client.start(0, 0, PEER, PEER).unwrap();
    let big = [0x55u8; 120];
    let mut accepted = 0;
    while client.send(ELEM_A, &big).is_ok() {
        accepted += 1;
    }
    assert_eq!(accepted, 3);
    assert_eq!(client.send(ELEM_A, &big), Err(Error::OutOfMemory));
    assert_eq!(client.item_count(), 3);
    client.abort();
    assert!(!client.is_started());
}
