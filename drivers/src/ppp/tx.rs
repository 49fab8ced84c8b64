//! Transmit entry point, hard-interrupt dequeue, and the deferred transmit
//! sweep (`out_pkt`).

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use slopos_lib::{klog_debug, klog_trace};

use crate::net::packetbuf::PacketBuf;
use crate::net::types::IpProtocol;

use super::ccp::{self, CcpDirection};
use super::chain::{packetbuf_from_bytes, Chain};
use super::error::PppError;
use super::flags::UnitFlags;
use super::npmode::{NpMode, NpProtocol};
use super::unit::Unit;
use super::vj::VjPacketType;
use super::{ALL_STATIONS, CCP as CCP_PROTO, DestFamily, HEADER_LEN, IP, LCP, UI, VJC_COMP, VJC_UNCOMP};

/// Ports that mark a TCP flow as interactive (ftp-data, ftp-control,
/// telnet, rlogin). An explicit match, not a lookup table keyed by the
/// low bits of the port number — a low-bits table aliases ports that were
/// never meant to classify as interactive.
#[inline]
fn is_interactive_port(port: u16) -> bool {
    matches!(port, 20 | 21 | 23 | 513)
}

/// Peek the TCP source/destination ports of an IP payload, if the IP
/// payload is in fact TCP and long enough to contain a port pair.
fn tcp_ports(ip_payload: &[u8]) -> Option<(u16, u16)> {
    let first = *ip_payload.first()?;
    let ihl = (first & 0x0F) as usize * 4;
    if ihl < 20 || ip_payload.len() < ihl + 4 {
        return None;
    }
    if ip_payload[9] != IpProtocol::Tcp.as_u8() {
        return None;
    }
    let tcp = &ip_payload[ihl..];
    let src = u16::from_be_bytes([tcp[0], tcp[1]]);
    let dst = u16::from_be_bytes([tcp[2], tcp[3]]);
    Some((src, dst))
}

/// Prepend the 4-byte PPP header onto a chain that doesn't have one yet,
/// growing into existing head room or pushing a dedicated header segment
/// if there isn't any.
fn prepend_header(chain: &mut Chain, address: u8, control: u8, protocol: u16) -> Result<(), PppError> {
    match chain.first_mut().push_header(HEADER_LEN) {
        Ok(hdr) => {
            hdr[0] = address;
            hdr[1] = control;
            hdr[2..4].copy_from_slice(&protocol.to_be_bytes());
            Ok(())
        }
        Err(_) => {
            let mut seg = PacketBuf::alloc().ok_or(PppError::OutOfBuffers)?;
            let hdr = seg.push_header(HEADER_LEN).map_err(|_| PppError::OutOfBuffers)?;
            hdr[0] = address;
            hdr[1] = control;
            hdr[2..4].copy_from_slice(&protocol.to_be_bytes());
            chain.push_front(seg);
            Ok(())
        }
    }
}

/// Overwrite the protocol field of an already-framed chain's leading
/// segment in place (address/control are left untouched).
fn rewrite_protocol(chain: &mut Chain, protocol: u16) {
    let first = chain.first_mut();
    if first.len() >= HEADER_LEN {
        first.payload_mut()[2..4].copy_from_slice(&protocol.to_be_bytes());
    }
}

/// `output(unit, chain, dest)`: submit a chain for transmission.
///
/// Preconditions and mode handling follow the design in order: network
/// state, address family, per-protocol NP mode, then priority
/// classification and enqueue.
pub fn output(unit: &Unit, mut chain: Chain, dest: DestFamily) -> Result<(), PppError> {
    if !unit.has_device() || !unit.is_running() || (!unit.is_up() && !matches!(dest, DestFamily::Raw)) {
        return Err(PppError::NetworkDown);
    }

    let (address, control, protocol, mode) = match dest {
        DestFamily::Ip => {
            let mode = unit.np_mode(NpProtocol::Ip);
            (ALL_STATIONS, UI, IP, mode)
        }
        DestFamily::Raw => {
            // The raw PPP family hands down frames that already carry
            // their own address/control/protocol in the leading segment.
            let hdr = chain.first().payload();
            if hdr.len() < HEADER_LEN {
                return Err(PppError::Invalid);
            }
            let address = hdr[0];
            let control = hdr[1];
            let protocol = u16::from_be_bytes([hdr[2], hdr[3]]);
            (address, control, protocol, NpMode::Pass)
        }
    };

    match mode {
        NpMode::Error => return Err(PppError::NetworkDown),
        NpMode::Drop => return Ok(()),
        NpMode::Pass | NpMode::Queue => {}
    }

    if matches!(dest, DestFamily::Ip) {
        prepend_header(&mut chain, address, control, protocol)?;
    }

    let fast = matches!(dest, DestFamily::Ip)
        && tcp_ports(&chain.first().payload()[HEADER_LEN..])
            .is_some_and(|(src, dst)| is_interactive_port(src) || is_interactive_port(dst));

    let len = chain.len() as u64;
    let queue = if fast { &unit.fast_output } else { &unit.normal_output };

    if queue.push(chain).is_err() {
        unit.counters.out_errors.fetch_add(1, Ordering::Relaxed);
        return Err(PppError::OutOfBuffers);
    }

    unit.counters.out_bytes.fetch_add(len, Ordering::Relaxed);

    if mode == NpMode::Pass {
        unit.notify_start();
    }
    Ok(())
}

/// `dequeue(unit)`: called from hard-interrupt context by the line driver
/// when it can accept a new frame. Never allocates or compresses — it only
/// inspects the staged-output slot, scheduling the deferred dispatcher if
/// there's nothing staged.
pub fn dequeue(unit: &Unit) -> Option<Chain> {
    if let Some(chain) = unit.take_staged() {
        return Some(chain);
    }
    unit.napi.schedule();
    None
}

/// Look at a chain's PPP header and classify its protocol's NP mode
/// (PASS for anything the NP-mode table doesn't gate).
fn mode_of(unit: &Unit, chain: &Chain) -> NpMode {
    let hdr = chain.first().payload();
    if hdr.len() < HEADER_LEN {
        return NpMode::Pass;
    }
    let protocol = u16::from_be_bytes([hdr[2], hdr[3]]);
    match NpProtocol::from_wire(protocol) {
        Some(np) => unit.np_mode(np),
        None => NpMode::Pass,
    }
}

/// Replace the IP+TCP header bytes (the `consumed` bytes immediately after
/// the 4-byte PPP header) with `replacement`, preserving the rest of the
/// first segment's payload and every subsequent segment untouched.
fn splice_header_replacement(chain: &mut Chain, consumed: usize, replacement: &[u8]) -> Result<(), PppError> {
    let original = chain.first().payload().to_vec();
    if original.len() < HEADER_LEN + consumed {
        return Err(PppError::Invalid);
    }
    let mut rebuilt = Vec::with_capacity(HEADER_LEN + replacement.len() + original.len() - HEADER_LEN - consumed);
    rebuilt.extend_from_slice(&original[..HEADER_LEN]);
    rebuilt.extend_from_slice(replacement);
    rebuilt.extend_from_slice(&original[HEADER_LEN + consumed..]);
    let buf = packetbuf_from_bytes(&rebuilt).ok_or(PppError::OutOfBuffers)?;
    *chain.first_mut() = buf;
    Ok(())
}

/// The deferred transmit sweep, run from soft-interrupt context.
/// Implements the 8-step algorithm: pick the next passable frame (fast
/// queue first), run VJ/CCP/AC/protocol compression on it, then stage it
/// and kick the line driver.
pub fn out_pkt(unit: &Unit) {
    let chain = unit
        .fast_output
        .take_first_passable(|c| mode_of(unit, c))
        .or_else(|| unit.normal_output.take_first_passable(|c| mode_of(unit, c)));

    let Some(mut chain) = chain else {
        return;
    };

    let hdr = chain.first().payload();
    if hdr.len() < HEADER_LEN {
        return;
    }
    let mut address = hdr[0];
    let mut control = hdr[1];
    let mut protocol = u16::from_be_bytes([hdr[2], hdr[3]]);

    let flags = unit.flags();

    if flags.contains(UnitFlags::COMP_TCP) && protocol == IP {
        let ip_payload = chain.first().payload()[HEADER_LEN..].to_vec();
        let looks_like_tcp_ip = ip_payload.len() >= 20 && ip_payload[9] == IpProtocol::Tcp.as_u8();
        if looks_like_tcp_ip {
            let result = {
                let mut vj = unit.vj.lock();
                vj.tx.compress(&ip_payload, flags.contains(UnitFlags::NO_TCP_CCID))
            };
            if let Some(result) = result {
                protocol = match result.kind {
                    VjPacketType::UncompressedTcp => VJC_UNCOMP,
                    VjPacketType::CompressedTcp => VJC_COMP,
                    VjPacketType::Ip => IP,
                };
                if splice_header_replacement(&mut chain, result.consumed, &result.header).is_ok() {
                    rewrite_protocol(&mut chain, protocol);
                }
            }
        }
    }

    if protocol == CCP_PROTO {
        let body = chain.first().payload()[HEADER_LEN..].to_vec();
        unit.with_flags_and_ccp(|f, ccp_state| {
            ccp::ccp_observe(f, ccp_state, &body, CcpDirection::Sending);
        });
    }

    if protocol != LCP && protocol != CCP_PROTO && flags.contains(UnitFlags::COMP_RUN) {
        let compressed = unit.ccp.lock().compress(&chain);
        if let Some(compressed) = compressed {
            chain = compressed;
            if let Some(hdr) = chain.first().payload().get(..HEADER_LEN) {
                protocol = u16::from_be_bytes([hdr[2], hdr[3]]);
            }
        }
    }

    if flags.contains(UnitFlags::COMP_AC)
        && address == ALL_STATIONS
        && control == UI
        && protocol != ALL_STATIONS as u16
        && protocol != LCP
    {
        if chain.first_mut().pull_header(2).is_ok() {
            address = 0;
            control = 0;
        }
    }

    if flags.contains(UnitFlags::COMP_PROT) && protocol < 0x100 {
        let _ = chain.first_mut().pull_header(1);
    }

    if flags.contains(UnitFlags::LOG_OUTPKT) {
        klog_debug!("ppp{}: out protocol={:#06x} len={}", unit.index, protocol, chain.len());
    } else {
        klog_trace!("ppp{}: out protocol={:#06x}", unit.index, protocol);
    }

    unit.counters.out_packets.fetch_add(1, Ordering::Relaxed);
    unit.stage(chain);
    unit.notify_start();
}
