//! Delayable scheduler scenarios driven through the public API with a
//! hand-cranked clock.

use crate::mock_mesh::{LEVEL_GET, LEVEL_STATUS, MockTransport, server_node};

use mesh_access::access::new_message;
use mesh_access::config::DelayConfig;
use mesh_access::delayable::{DelayableScheduler, DelayableWorker};
use mesh_access::msg::{MsgCtx, SendCallback};
use mesh_access::{Error, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Outcomes = Arc<Mutex<Vec<(u8, Result<()>)>>>;

fn callback(outcomes: &Outcomes, tag: u8) -> Option<SendCallback> {
    let outcomes = Arc::clone(outcomes);
    Some(Box::new(move |result| outcomes.lock().unwrap().push((tag, result))))
}

fn group_reply() -> MsgCtx {
    MsgCtx {
        recv_dst: 0xC001,
        ..MsgCtx::app(0, 0, 0x0042)
    }
}

/// Crank the scheduler until idle; returns `(time, first payload byte)`
/// for each transmission.
fn run_to_idle<const S: usize, const C: usize, const M: usize>(
    sched: &mut DelayableScheduler<S, C, M>,
    tx: &mut MockTransport,
) -> Vec<(u64, u8)> {
    let mut fired = Vec::new();
    let mut now = 0;
    loop {
        let before = tx.sent.len();
        let next = sched.on_timer_fire(now, tx);
        fired.extend(tx.sent[before..].iter().map(|s| (now, s.payload[0])));
        match next {
            Some(at) => now = at.max(now),
            None => break,
        }
    }
    fired
}

// ── Pool pressure ────────────────────────────────────────────

#[test]
fn three_messages_into_two_chunks_purge_once() {
    let outcomes = Outcomes::default();
    let mut sched: DelayableScheduler<20, 2, 4> =
        DelayableScheduler::with_rng(DelayConfig::default(), StdRng::seed_from_u64(42));
    let mut tx = MockTransport::new();

    for tag in 0..3u8 {
        sched
            .enqueue(0, &group_reply(), &[tag, 0xFF], 0x0001, callback(&outcomes, tag), &mut tx)
            .unwrap();
    }
    assert_eq!(sched.stats().purged, 1, "exactly one purge");
    assert_eq!(tx.sent.len(), 1);

    let fired = run_to_idle(&mut sched, &mut tx);
    assert_eq!(fired.len(), 2);
    assert!(fired[0].0 <= fired[1].0, "fire-time order: {fired:?}");
    assert!(fired.iter().all(|&(t, _)| (20..500).contains(&t)));

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 3, "three final outcomes");
    assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
    let mut tags: Vec<u8> = outcomes.iter().map(|&(t, _)| t).collect();
    tags.sort_unstable();
    assert_eq!(tags, vec![0, 1, 2]);
    assert_eq!(sched.free_chunks(), 2);
}

#[test]
fn payload_larger_than_pool_fails_without_side_effects() {
    let outcomes = Outcomes::default();
    let mut sched: DelayableScheduler<20, 2, 4> =
        DelayableScheduler::with_rng(DelayConfig::default(), StdRng::seed_from_u64(1));
    let mut tx = MockTransport::new();
    sched
        .enqueue(0, &group_reply(), &[0x01], 0x0001, callback(&outcomes, 0), &mut tx)
        .unwrap();

    assert_eq!(
        sched.enqueue(0, &group_reply(), &[0u8; 41], 0x0001, callback(&outcomes, 1), &mut tx),
        Err(Error::InvalidArgument)
    );
    assert_eq!(sched.free_chunks(), 1);
    assert_eq!(sched.pending(), 1);
    assert!(tx.sent.is_empty(), "an oversized payload never triggers a purge");
    assert!(outcomes.lock().unwrap().is_empty());
}

// ── Backpressure ─────────────────────────────────────────────

#[test]
fn backpressure_is_retried_every_ten_ms() {
    let outcomes = Outcomes::default();
    let mut sched = DelayableScheduler::new();
    let mut tx = MockTransport {
        backpressure: 3,
        ..MockTransport::new()
    };
    sched
        .enqueue(0, &group_reply(), &[0x07], 0x0001, callback(&outcomes, 7), &mut tx)
        .unwrap();
    let first = sched.next_fire_time().unwrap();

    let fired = run_to_idle(&mut sched, &mut tx);
    assert_eq!(fired, vec![(first + 30, 0x07)]);
    assert_eq!(sched.stats().rescheduled, 3);
    assert_eq!(*outcomes.lock().unwrap(), vec![(7, Ok(()))]);
}

// ── Lifecycle ────────────────────────────────────────────────

#[test]
fn every_message_ends_exactly_once() {
    let outcomes = Outcomes::default();
    let mut sched = DelayableScheduler::new();
    let mut tx = MockTransport::new();
    for tag in 0..4u8 {
        sched
            .enqueue(0, &group_reply(), &[tag], 0x0001, callback(&outcomes, tag), &mut tx)
            .unwrap();
    }

    // Deliver whatever is due by 260 ms, cancel the rest.
    let mut now = 0;
    while let Some(at) = sched.on_timer_fire(now, &mut tx) {
        if at > 260 {
            break;
        }
        now = at.max(now);
    }
    let cancelled = sched.shutdown();
    assert_eq!(tx.sent.len() + cancelled, 4);

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 4);
    let delivered = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
    let dropped = outcomes
        .iter()
        .filter(|(_, r)| *r == Err(Error::Cancelled))
        .count();
    assert_eq!(delivered, tx.sent.len());
    assert_eq!(dropped, cancelled);
}

#[test]
fn suspend_keeps_queued_messages_flowing() {
    let mut sched = DelayableScheduler::new();
    let mut tx = MockTransport::new();
    sched
        .enqueue(0, &group_reply(), &[0x01], 0x0001, None, &mut tx)
        .unwrap();
    sched.suspend();
    assert_eq!(
        sched.enqueue(0, &group_reply(), &[0x02], 0x0001, None, &mut tx),
        Err(Error::Unavailable)
    );
    assert_eq!(run_to_idle(&mut sched, &mut tx).len(), 1);
    assert_eq!(tx.first_bytes(), vec![0x01]);
}

// ── Replies through the worker ───────────────────────────────

#[test]
fn replies_to_a_group_query_leave_through_the_delay_queue() {
    let mut node = server_node(&[0x0001, 0x0002]);
    let mut worker =
        DelayableWorker::spawn(DelayableScheduler::new(), MockTransport::new()).unwrap();

    node.recv(&group_reply(), &new_message(LEVEL_GET), &mut worker)
        .unwrap();
    assert_eq!(worker.pending(), 2, "both replies queued, none sent yet");

    let deadline = Instant::now() + Duration::from_secs(2);
    while worker.pending() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    let sent = worker.with_transport(|t| t.sent.clone());
    let mut from: Vec<u16> = sent.iter().map(|s| s.src).collect();
    from.sort_unstable();
    assert_eq!(from, vec![0x0001, 0x0002]);
    for reply in &sent {
        assert_eq!(reply.ctx.addr, 0x0042);
        assert!(reply.ctx.rnd_delay);
        assert_eq!(&reply.payload[..2], &new_message(LEVEL_STATUS)[..]);
    }
}
