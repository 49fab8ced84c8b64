//! Tests for the transmit entry point (`output`) and the deferred transmit
//! sweep (`out_pkt`): interactive-port fast-queue classification, NP-mode
//! gating, and header framing.

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
use crate::ppp::error::PppError;
use crate::ppp::npmode::{NpMode, NpProtocol};
use crate::ppp::tx::{dequeue, output, out_pkt};
use crate::ppp::unit::UnitPool;
use crate::ppp::{DestFamily, HEADER_LEN, IP};

fn ensure_pool_init() {
    PACKET_POOL.init();
}

/// A device that always accepts transmits, counting them.
struct AcceptingDevice {
    tx_count: AtomicU64,
}

impl NetDevice for AcceptingDevice {
    fn tx(&self, _pkt: PacketBuf) -> Result<(), NetError> {
        self.tx_count.fetch_add(1, Ordering::Relaxed);
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

/// Register a throwaway device and return its handle, for attaching to a
/// unit under test. Leaked deliberately — the registry has ample headroom
/// for the handful of devices this test module registers.
fn attach_fresh_device() -> DeviceHandle {
    DEVICE_REGISTRY
        .register(Box::new(AcceptingDevice {
            tx_count: AtomicU64::new(0),
        }))
        .expect("registry should have room for a test device")
}

/// Build a chain the way the kernel's IP output path would hand one down:
/// allocated with headroom, payload appended, ready for `output` to prepend
/// a PPP header into the reserved space.
fn ip_chain(payload: &[u8]) -> crate::ppp::chain::Chain {
    let mut buf = PacketBuf::alloc().unwrap();
    buf.append(payload).unwrap();
    crate::ppp::chain::Chain::single(buf)
}

/// A minimal IPv4+TCP datagram naming the given source/destination ports.
fn tcp_datagram(src_port: u16, dst_port: u16) -> alloc::vec::Vec<u8> {
    let mut d = alloc::vec![0u8; 40];
    d[0] = 0x45;
    d[9] = 6; // TCP
    d[20..22].copy_from_slice(&src_port.to_be_bytes());
    d[22..24].copy_from_slice(&dst_port.to_be_bytes());
    d
}

pub fn test_output_rejects_when_no_device_attached() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = pool.allocate(1).unwrap();
    let unit = unit.get();
    unit.set_interface_up(true);
    unit.set_np_mode(NpProtocol::Ip, NpMode::Pass);

    match output(unit, ip_chain(&tcp_datagram(1234, 80)), DestFamily::Ip) {
        Err(PppError::NetworkDown) => pass!(),
        other => slopos_lib::fail!("expected NetworkDown, got {:?}", other),
    }
}

pub fn test_output_rejects_when_np_mode_error() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = pool.allocate(1).unwrap();
    let unit = unit.get();
    unit.attach_device(attach_fresh_device());
    unit.set_interface_up(true);
    // np_mode defaults to Error until configured.

    match output(unit, ip_chain(&tcp_datagram(1234, 80)), DestFamily::Ip) {
        Err(PppError::NetworkDown) => pass!(),
        other => slopos_lib::fail!("expected NetworkDown, got {:?}", other),
    }
}

pub fn test_output_drops_silently_in_drop_mode() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = pool.allocate(1).unwrap();
    let unit = unit.get();
    unit.attach_device(attach_fresh_device());
    unit.set_interface_up(true);
    unit.set_np_mode(NpProtocol::Ip, NpMode::Drop);

    let result = output(unit, ip_chain(&tcp_datagram(1234, 80)), DestFamily::Ip);
    assert_test!(result.is_ok(), "DROP mode reports success without actually enqueuing");
    assert_eq_test!(unit.fast_output.len(), 0);
    assert_eq_test!(unit.normal_output.len(), 0);

    pass!()
}

pub fn test_interactive_port_goes_to_fast_queue() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = pool.allocate(1).unwrap();
    let unit = unit.get();
    unit.attach_device(attach_fresh_device());
    unit.set_interface_up(true);
    unit.set_np_mode(NpProtocol::Ip, NpMode::Pass);

    // telnet (23) as the destination port.
    output(unit, ip_chain(&tcp_datagram(5000, 23)), DestFamily::Ip).unwrap();
    assert_eq_test!(unit.fast_output.len(), 1, "telnet traffic classifies as interactive");
    assert_eq_test!(unit.normal_output.len(), 0);

    pass!()
}

pub fn test_non_interactive_port_goes_to_normal_queue() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = pool.allocate(1).unwrap();
    let unit = unit.get();
    unit.attach_device(attach_fresh_device());
    unit.set_interface_up(true);
    unit.set_np_mode(NpProtocol::Ip, NpMode::Pass);

    output(unit, ip_chain(&tcp_datagram(5000, 443)), DestFamily::Ip).unwrap();
    assert_eq_test!(unit.normal_output.len(), 1, "ordinary HTTPS traffic is not interactive");
    assert_eq_test!(unit.fast_output.len(), 0);

    pass!()
}

pub fn test_output_prepends_ppp_header() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = pool.allocate(1).unwrap();
    let unit = unit.get();
    unit.attach_device(attach_fresh_device());
    unit.set_interface_up(true);
    unit.set_np_mode(NpProtocol::Ip, NpMode::Pass);

    output(unit, ip_chain(&tcp_datagram(5000, 443)), DestFamily::Ip).unwrap();
    let chain = unit.normal_output.pop().unwrap();
    let hdr = chain.first().payload();
    assert_eq_test!(hdr.len(), HEADER_LEN + 40);
    assert_eq_test!(u16::from_be_bytes([hdr[2], hdr[3]]), IP);

    pass!()
}

pub fn test_dequeue_schedules_dispatcher_when_nothing_staged() -> TestResult {
    let pool = UnitPool::new();
    pool.init();
    let unit = pool.allocate(1).unwrap();
    let unit = unit.get();

    assert_test!(dequeue(unit).is_none(), "an empty staged slot yields nothing");
    assert_test!(unit.napi.is_scheduled(), "dequeue must schedule the deferred dispatcher to refill the slot");

    pass!()
}

pub fn test_out_pkt_stages_highest_priority_passable_frame() -> TestResult {
    ensure_pool_init();
    let pool = UnitPool::new();
    pool.init();
    let unit = pool.allocate(1).unwrap();
    let unit = unit.get();
    unit.attach_device(attach_fresh_device());
    unit.set_interface_up(true);
    unit.set_np_mode(NpProtocol::Ip, NpMode::Pass);

    output(unit, ip_chain(&tcp_datagram(5000, 443)), DestFamily::Ip).unwrap(); // normal
    output(unit, ip_chain(&tcp_datagram(5000, 23)), DestFamily::Ip).unwrap(); // fast

    assert_test!(!unit.tbusy());
    out_pkt(unit);
    assert_test!(unit.tbusy(), "out_pkt should stage exactly one frame");
    assert_eq_test!(unit.fast_output.len(), 0, "the fast queue's frame is drained first");
    assert_eq_test!(unit.normal_output.len(), 1, "the normal queue's frame is left for the next sweep");

    pass!()
}

slopos_lib::define_test_suite!(
    ppp_tx,
    [
        test_output_rejects_when_no_device_attached,
        test_output_rejects_when_np_mode_error,
        test_output_drops_silently_in_drop_mode,
        test_interactive_port_goes_to_fast_queue,
        test_non_interactive_port_goes_to_normal_queue,
        test_output_prepends_ppp_header,
        test_dequeue_schedules_dispatcher_when_nothing_staged,
        test_out_pkt_stages_highest_priority_passable_frame,
    ]
);
