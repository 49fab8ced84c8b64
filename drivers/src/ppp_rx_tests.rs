//! Tests for the receive entry point (`pkt_in`) and the deferred receive
//! sweep (`in_proc`): protocol dispatch, NP-mode gating on delivery, and the
//! VJ decompression error paths.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use slopos_lib::testing::TestResult;
use slopos_lib::{assert_eq_test, assert_test, pass};

use crate::net::netdev::{DeviceHandle, NetDevice, DEVICE_REGISTRY};
use crate::net::packetbuf::PacketBuf;
use crate::net::pool::{PacketPool, PACKET_POOL};
use crate::net::types::{MacAddr, NetDeviceFeatures, NetDeviceStats, NetError};
use crate::ppp::chain::Chain;
use crate::ppp::flags::UnitFlags;
use crate::ppp::npmode::NpProtocol;
use crate::ppp::rx::{in_proc, pkt_in};
use crate::ppp::tx::{dequeue, output, out_pkt};
use crate::ppp::unit::UnitPool;
use crate::ppp::vj::{VjCompressor, VjPacketType};
use crate::ppp::{DestFamily, IP, VJC_COMP, VJC_UNCOMP};

fn ensure_pool_init() {
    PACKET_POOL.init();
}

fn framed(address: u8, control: u8, protocol: u16, payload: &[u8]) -> Chain {
    let mut data = alloc::vec![address, control];
    data.extend_from_slice(&protocol.to_be_bytes());
    data.extend_from_slice(payload);
    Chain::single(PacketBuf::from_raw_copy(&data).unwrap())
}

fn up_unit(pool: &UnitPool) -> &'static crate::ppp::unit::Unit {
    let handle = pool.allocate(1).unwrap();
    let unit = handle.get();
    unit.set_interface_up(true);
    unit.set_np_mode(NpProtocol::Ip, crate::ppp::npmode::NpMode::Pass);
    unit
}

/// A device that accepts transmits without doing anything with them — the
/// loopback round-trip test below feeds `out_pkt`'s staged frame straight
/// back into `in_proc` rather than through an actual device queue.
struct DummyDevice;

impl NetDevice for DummyDevice {
    fn tx(&self, _pkt: PacketBuf) -> Result<(), NetError> {
        Ok(())
    }

    fn poll_rx(&self, _budget: usize, _pool: &'static PacketPool) -> Vec<PacketBuf> {
        Vec::new()
    }

    fn set_up(&self) {}
    fn set_down(&self) {}
    fn mtu(&self) -> u16 {
        1500
    }
    fn mac(&self) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, 1])
    }
    fn stats(&self) -> NetDeviceStats {
        NetDeviceStats::new()
    }
    fn features(&self) -> NetDeviceFeatures {
        NetDeviceFeatures::empty()
    }
}

fn attach_fresh_device() -> DeviceHandle {
    DEVICE_REGISTRY.register(Box::new(DummyDevice)).expect("registry should have room for a test device")
}

/// Build a chain the way the kernel's IP output path would hand one down:
/// allocated with headroom, payload appended, ready for `output` to prepend
/// a PPP header into the reserved space.
fn ip_chain(payload: &[u8]) -> Chain {
    let mut buf = PacketBuf::alloc().unwrap();
    buf.append(payload).unwrap();
    Chain::single(buf)
}

/// A minimal IPv4+TCP datagram naming the given ports, sequence/ack numbers,
/// and TCP control-flags byte.
fn tcp_ip_datagram(src_port: u16, dst_port: u16, tcp_flags: u8, seq: u32, ack: u32) -> alloc::vec::Vec<u8> {
    let mut d = alloc::vec![0u8; 40];
    d[0] = 0x45;
    d[2..4].copy_from_slice(&40u16.to_be_bytes());
    d[9] = 6; // TCP
    d[20..22].copy_from_slice(&src_port.to_be_bytes());
    d[22..24].copy_from_slice(&dst_port.to_be_bytes());
    d[24..28].copy_from_slice(&seq.to_be_bytes());
    d[28..32].copy_from_slice(&ack.to_be_bytes());
    d[32] = 0x50; // data offset
    d[33] = tcp_flags;
    d
}

pub fn test_short_frame_counts_as_in_error() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = up_unit(&pool);

    let chain = Chain::single(PacketBuf::from_raw_copy(&[0xFF, 0x03]).unwrap());
    in_proc(unit, chain);
    assert_eq_test!(unit.counters.snapshot().in_errors, 1);

    pass!()
}

pub fn test_ip_frame_delivered_via_deliver_ip_hook() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = up_unit(&pool);

    static DELIVERED_LEN: AtomicU64 = AtomicU64::new(0);
    DELIVERED_LEN.store(0, Ordering::Relaxed);
    fn on_deliver(_index: usize, buf: PacketBuf) {
        DELIVERED_LEN.store(buf.len() as u64, Ordering::Relaxed);
    }
    unit.set_callbacks(crate::ppp::unit::LineDriverCallbacks {
        start: None,
        ctl_notify: None,
        deliver_ip: Some(on_deliver),
        tap: None,
    });

    let payload = [1u8, 2, 3, 4, 5];
    in_proc(unit, framed(0xFF, 0x03, IP, &payload));
    assert_eq_test!(DELIVERED_LEN.load(Ordering::Relaxed), payload.len() as u64, "the PPP header must be stripped before delivery");
    assert_eq_test!(unit.counters.snapshot().in_packets, 1);

    pass!()
}

pub fn test_ip_frame_dropped_when_np_mode_not_pass() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let handle = pool.allocate(1).unwrap();
    let unit = handle.get();
    unit.set_interface_up(true);
    // np_mode left at its default (Error).

    in_proc(unit, framed(0xFF, 0x03, IP, &[1, 2, 3]));
    assert_eq_test!(unit.user_read.len(), 0);
    assert_eq_test!(unit.counters.snapshot().in_packets, 1, "the frame is still counted even though it's not delivered");

    pass!()
}

pub fn test_non_ip_frame_lands_on_user_read_queue() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = up_unit(&pool);

    in_proc(unit, framed(0xFF, 0x03, crate::ppp::LCP, &[1, 1, 0, 4]));
    assert_eq_test!(unit.user_read.len(), 1, "LCP traffic goes to the negotiation daemon via user-read");

    pass!()
}

pub fn test_pkt_in_schedules_napi_and_queues_raw_frame() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let handle = pool.allocate(1).unwrap();
    let unit = handle.get();

    pkt_in(unit, framed(0xFF, 0x03, IP, &[1, 2]), false);
    assert_eq_test!(unit.raw_receive.len(), 1);
    assert_test!(unit.napi.is_scheduled());

    pass!()
}

pub fn test_pkt_in_lost_flag_sets_vj_reset() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let handle = pool.allocate(1).unwrap();
    let unit = handle.get();

    pkt_in(unit, framed(0xFF, 0x03, IP, &[1, 2]), true);
    assert_test!(unit.take_vj_reset(), "a lost-frame report must desync the VJ receive dictionary");

    pass!()
}

pub fn test_vj_compressed_frame_rejected_after_vj_reset() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = up_unit(&pool);
    unit.set_vj_reset();

    in_proc(unit, framed(0xFF, 0x03, VJC_COMP, &[0, 1, 2, 3]));
    assert_eq_test!(unit.counters.snapshot().in_errors, 1, "the first VJ-compressed frame after a reset must be dropped");
    assert_eq_test!(unit.user_read.len(), 0);

    pass!()
}

pub fn test_vj_uncompressed_frame_round_trips_into_ip_delivery() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = up_unit(&pool);

    // Build a valid compressed-form TCP/IP header via the real compressor so
    // the decompressor's dictionary agrees, exactly as the transmit/receive
    // sides of a real link would.
    let mut tx = VjCompressor::new();
    let mut ip_tcp = alloc::vec![0u8; 40];
    ip_tcp[0] = 0x45;
    ip_tcp[2..4].copy_from_slice(&40u16.to_be_bytes());
    ip_tcp[9] = 6;
    ip_tcp[32] = 0x50;
    ip_tcp[33] = 0x02; // SYN — forces uncompressed form
    let result = tx.compress(&ip_tcp, false).unwrap();
    assert_eq_test!(result.kind, VjPacketType::UncompressedTcp);

    static DELIVERED: AtomicU64 = AtomicU64::new(0);
    DELIVERED.store(0, Ordering::Relaxed);
    fn on_deliver(_index: usize, buf: PacketBuf) {
        DELIVERED.store(buf.len() as u64, Ordering::Relaxed);
    }
    unit.set_callbacks(crate::ppp::unit::LineDriverCallbacks {
        start: None,
        ctl_notify: None,
        deliver_ip: Some(on_deliver),
        tap: None,
    });

    in_proc(unit, framed(0xFF, 0x03, VJC_UNCOMP, &result.header));
    assert_eq_test!(DELIVERED.load(Ordering::Relaxed), 40, "the reconstructed IP+TCP header must reach the IP delivery hook");
    assert_eq_test!(unit.counters.snapshot().in_errors, 0);

    pass!()
}

pub fn test_no_tcp_ccid_compressed_frame_round_trips_through_tx_and_rx() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = up_unit(&pool);
    unit.attach_device(attach_fresh_device());
    unit.set_flags(UnitFlags::COMP_TCP | UnitFlags::NO_TCP_CCID);

    static DELIVERED_BYTES: AtomicU64 = AtomicU64::new(0);
    DELIVERED_BYTES.store(0, Ordering::Relaxed);
    fn on_deliver(_index: usize, buf: PacketBuf) {
        DELIVERED_BYTES.fetch_add(buf.len() as u64, Ordering::Relaxed);
    }
    unit.set_callbacks(crate::ppp::unit::LineDriverCallbacks {
        start: None,
        ctl_notify: None,
        deliver_ip: Some(on_deliver),
        tap: None,
    });

    // First segment carries SYN, forcing an uncompressed wire form that
    // seeds both the transmit and (once looped back) receive dictionaries
    // for this connection.
    output(unit, ip_chain(&tcp_ip_datagram(5000, 80, 0x02, 1000, 0)), DestFamily::Ip).unwrap();
    out_pkt(unit);
    let first = dequeue(unit).expect("out_pkt must have staged the first frame");
    in_proc(unit, first);
    assert_eq_test!(unit.counters.snapshot().in_errors, 0);

    // Second segment reuses the connection with no SYN/FIN/RST: under
    // NO_TCP_CCID this must compress with the connection-id byte omitted.
    output(unit, ip_chain(&tcp_ip_datagram(5000, 80, 0x10, 1001, 1)), DestFamily::Ip).unwrap();
    out_pkt(unit);
    let second = dequeue(unit).expect("out_pkt must have staged the second frame");
    let hdr = second.first().payload();
    assert_eq_test!(u16::from_be_bytes([hdr[2], hdr[3]]), VJC_COMP, "a repeat-connection segment must compress");

    in_proc(unit, second);
    assert_eq_test!(
        unit.counters.snapshot().in_errors,
        0,
        "the implicit-cid compressed frame must decode cleanly when NO_TCP_CCID is threaded through on receive"
    );
    assert_eq_test!(DELIVERED_BYTES.load(Ordering::Relaxed), 80, "both segments must reach IP delivery");

    pass!()
}

pub fn test_tap_hook_sees_every_received_chain() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = up_unit(&pool);

    static TAPPED: AtomicU64 = AtomicU64::new(0);
    TAPPED.store(0, Ordering::Relaxed);
    fn on_tap(_index: usize, _chain: &Chain) {
        TAPPED.fetch_add(1, Ordering::Relaxed);
    }
    unit.set_callbacks(crate::ppp::unit::LineDriverCallbacks {
        start: None,
        ctl_notify: None,
        deliver_ip: None,
        tap: Some(on_tap),
    });

    in_proc(unit, framed(0xFF, 0x03, IP, &[1, 2, 3]));
    assert_eq_test!(TAPPED.load(Ordering::Relaxed), 1);

    pass!()
}

slopos_lib::define_test_suite!(
    ppp_rx,
    [
        test_short_frame_counts_as_in_error,
        test_ip_frame_delivered_via_deliver_ip_hook,
        test_ip_frame_dropped_when_np_mode_not_pass,
        test_non_ip_frame_lands_on_user_read_queue,
        test_pkt_in_schedules_napi_and_queues_raw_frame,
        test_pkt_in_lost_flag_sets_vj_reset,
        test_vj_compressed_frame_rejected_after_vj_reset,
        test_vj_uncompressed_frame_round_trips_into_ip_delivery,
        test_no_tcp_ccid_compressed_frame_round_trips_through_tx_and_rx,
        test_tap_hook_sees_every_received_chain,
    ]
);
