//! Tests for `ppp::chain`: the `Chain` buffer-chain type and the bounded
//! `PacketQueue` FIFO built on top of it.

extern crate alloc;

use slopos_lib::testing::TestResult;
use slopos_lib::{assert_eq_test, assert_test, pass};

use crate::net::packetbuf::PacketBuf;
use crate::net::pool::PACKET_POOL;
use crate::ppp::chain::{packetbuf_from_bytes, Chain, PacketQueue};
use crate::ppp::npmode::NpMode;

fn ensure_pool_init() {
    PACKET_POOL.init();
}

fn buf_with(data: &[u8]) -> PacketBuf {
    PacketBuf::from_raw_copy(data).expect("pool should have free slots")
}

pub fn test_single_chain_len() -> TestResult {
    ensure_pool_init();
    let chain = Chain::single(buf_with(&[1, 2, 3, 4]));
    assert_eq_test!(chain.len(), 4);
    assert_eq_test!(chain.segment_count(), 1);
    assert_test!(!chain.is_empty());

    pass!()
}

pub fn test_push_back_and_flatten() -> TestResult {
    ensure_pool_init();
    let mut chain = Chain::single(buf_with(&[1, 2]));
    chain.push_back(buf_with(&[3, 4, 5]));
    assert_eq_test!(chain.len(), 5);
    assert_eq_test!(chain.segment_count(), 2);
    assert_eq_test!(chain.flatten(), alloc::vec![1, 2, 3, 4, 5]);

    pass!()
}

pub fn test_splice_after_first() -> TestResult {
    ensure_pool_init();
    let mut chain = Chain::single(buf_with(&[0xAA]));
    chain.push_back(buf_with(&[0xCC]));
    chain.splice_after_first(buf_with(&[0xBB]));
    assert_eq_test!(chain.segment_count(), 3);
    assert_eq_test!(chain.flatten(), alloc::vec![0xAA, 0xBB, 0xCC]);

    pass!()
}

pub fn test_push_front() -> TestResult {
    ensure_pool_init();
    let mut chain = Chain::single(buf_with(&[2, 3]));
    chain.push_front(buf_with(&[1]));
    assert_eq_test!(chain.flatten(), alloc::vec![1, 2, 3]);
    assert_eq_test!(*chain.first().payload().first().unwrap(), 1u8);

    pass!()
}

pub fn test_into_single() -> TestResult {
    ensure_pool_init();
    let chain = Chain::single(buf_with(&[9, 9]));
    let buf = chain.into_single();
    assert_test!(buf.is_some(), "a one-segment chain must yield its segment");

    let mut multi = Chain::single(buf_with(&[1]));
    multi.push_back(buf_with(&[2]));
    assert_test!(multi.into_single().is_none(), "a multi-segment chain has no single segment to return");

    pass!()
}

pub fn test_collapse_if_small_merges_multi_segment() -> TestResult {
    ensure_pool_init();
    let mut chain = Chain::single(buf_with(&[1, 2]));
    chain.push_back(buf_with(&[3, 4]));
    assert_eq_test!(chain.segment_count(), 2);

    let collapsed = chain.collapse_if_small();
    assert_eq_test!(collapsed.segment_count(), 1, "a small multi-segment chain collapses to one segment");
    assert_eq_test!(collapsed.flatten(), alloc::vec![1, 2, 3, 4]);

    pass!()
}

pub fn test_collapse_if_small_leaves_single_segment_alone() -> TestResult {
    ensure_pool_init();
    let chain = Chain::single(buf_with(&[1, 2, 3]));
    let collapsed = chain.collapse_if_small();
    assert_eq_test!(collapsed.segment_count(), 1);

    pass!()
}

pub fn test_packetbuf_from_bytes_roundtrip() -> TestResult {
    ensure_pool_init();
    let data = [5u8, 6, 7, 8, 9];
    let buf = packetbuf_from_bytes(&data).expect("small payload should fit a pooled buffer");
    assert_eq_test!(buf.payload(), &data[..]);

    pass!()
}

// =============================================================================
// PacketQueue
// =============================================================================

pub fn test_queue_push_pop_fifo_order() -> TestResult {
    ensure_pool_init();
    let q = PacketQueue::new(4);
    assert_test!(q.push(Chain::single(buf_with(&[1]))).is_ok());
    assert_test!(q.push(Chain::single(buf_with(&[2]))).is_ok());

    let first = q.pop().expect("queue should yield the oldest chain first");
    assert_eq_test!(first.flatten(), alloc::vec![1]);
    let second = q.pop().expect("queue should then yield the second chain");
    assert_eq_test!(second.flatten(), alloc::vec![2]);
    assert_test!(q.pop().is_none());

    pass!()
}

pub fn test_queue_drops_past_capacity() -> TestResult {
    ensure_pool_init();
    let q = PacketQueue::new(1);
    assert_test!(q.push(Chain::single(buf_with(&[1]))).is_ok());
    let result = q.push(Chain::single(buf_with(&[2])));
    assert_test!(result.is_err(), "pushing past capacity must hand the chain back, not block");
    assert_eq_test!(q.dropped(), 1);
    assert_eq_test!(q.len(), 1);

    pass!()
}

pub fn test_take_first_passable_skips_queue_and_drops_error() -> TestResult {
    ensure_pool_init();
    let q = PacketQueue::new(8);
    // Tag each chain's payload byte with its intended mode for the closure below.
    q.push(Chain::single(buf_with(&[0]))).unwrap(); // Queue
    q.push(Chain::single(buf_with(&[1]))).unwrap(); // Drop
    q.push(Chain::single(buf_with(&[2]))).unwrap(); // Pass

    let mode_of = |c: &Chain| match c.first().payload().first() {
        Some(0) => NpMode::Queue,
        Some(1) => NpMode::Drop,
        _ => NpMode::Pass,
    };

    let taken = q.take_first_passable(mode_of).expect("the Pass-tagged chain should be returned");
    assert_eq_test!(taken.flatten(), alloc::vec![2]);
    // The Drop-tagged chain was removed in place; the Queue-tagged chain is
    // left behind, still queued.
    assert_eq_test!(q.len(), 1);
    assert_eq_test!(q.pop().unwrap().flatten(), alloc::vec![0]);

    pass!()
}

pub fn test_take_first_passable_returns_none_when_all_queued() -> TestResult {
    ensure_pool_init();
    let q = PacketQueue::new(4);
    q.push(Chain::single(buf_with(&[0]))).unwrap();
    let taken = q.take_first_passable(|_| NpMode::Queue);
    assert_test!(taken.is_none());
    assert_eq_test!(q.len(), 1, "a chain held by Queue mode is never removed");

    pass!()
}

pub fn test_queue_byte_len_and_drain() -> TestResult {
    ensure_pool_init();
    let q = PacketQueue::new(4);
    q.push(Chain::single(buf_with(&[1, 2, 3]))).unwrap();
    q.push(Chain::single(buf_with(&[4, 5]))).unwrap();
    assert_eq_test!(q.byte_len(), 5);

    q.drain();
    assert_test!(q.is_empty());
    assert_eq_test!(q.byte_len(), 0);

    pass!()
}

slopos_lib::define_test_suite!(
    ppp_chain,
    [
        test_single_chain_len,
        test_push_back_and_flatten,
        test_splice_after_first,
        test_push_front,
        test_into_single,
        test_collapse_if_small_merges_multi_segment,
        test_collapse_if_small_leaves_single_segment_alone,
        test_packetbuf_from_bytes_roundtrip,
        test_queue_push_pop_fifo_order,
        test_queue_drops_past_capacity,
        test_take_first_passable_skips_queue_and_drops_error,
        test_take_first_passable_returns_none_when_all_queued,
        test_queue_byte_len_and_drain,
    ]
);
