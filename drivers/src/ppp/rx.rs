//! Receive entry point and the deferred receive sweep (`in_proc`).

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use slopos_lib::{klog_debug, klog_trace};

use super::ccp::{self, CcpDirection, DecompressOutcome};
use super::chain::{packetbuf_from_bytes, Chain};
use super::flags::UnitFlags;
use super::npmode::{NpMode, NpProtocol};
use super::unit::Unit;
use super::vj::VjError;
use super::{CCP as CCP_PROTO, COMP, HEADER_LEN, IP, LCP, VJC_COMP, VJC_UNCOMP};

/// `pkt_in(unit, chain, lost)`: called from hard-interrupt context by the
/// line driver with an already-framed chain. `lost` reports that the driver
/// detected a gap ahead of this frame (e.g. a discarded fragment), which
/// desyncs the VJ receive dictionary until the next explicit-cid frame.
pub fn pkt_in(unit: &Unit, chain: Chain, lost: bool) {
    if lost {
        unit.set_vj_reset();
    }
    if unit.raw_receive.push(chain).is_err() {
        unit.counters.in_errors.fetch_add(1, Ordering::Relaxed);
        return;
    }
    unit.napi.schedule();
}

/// Pass a received, already-dequeued chain up through decompression to its
/// eventual destination: the kernel IP input hook for IP datagrams, or the
/// user-read queue for everything else.
pub fn in_proc(unit: &Unit, mut chain: Chain) {
    let hdr = chain.first().payload();
    if hdr.len() < HEADER_LEN {
        unit.counters.in_errors.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let mut protocol = u16::from_be_bytes([hdr[2], hdr[3]]);

    let len = chain.len() as u64;
    unit.counters.in_packets.fetch_add(1, Ordering::Relaxed);
    unit.counters.in_bytes.fetch_add(len, Ordering::Relaxed);

    let flags = unit.flags();
    if flags.contains(UnitFlags::LOG_INPKT) {
        klog_debug!("ppp{}: in protocol={:#06x} len={}", unit.index, protocol, len);
    } else {
        klog_trace!("ppp{}: in protocol={:#06x}", unit.index, protocol);
    }

    if protocol == CCP_PROTO {
        let body = chain.first().payload()[HEADER_LEN..].to_vec();
        unit.with_flags_and_ccp(|f, ccp_state| {
            ccp::ccp_observe(f, ccp_state, &body, CcpDirection::Received);
        });
    }

    if protocol == COMP {
        let body = chain.first().payload()[HEADER_LEN..].to_vec();
        let (outcome, replacement) = unit.ccp.lock().decompress(&body);
        match outcome {
            DecompressOutcome::Ok => {
                if let Some(replacement) = replacement {
                    chain = replacement;
                    let hdr = chain.first().payload();
                    if hdr.len() < HEADER_LEN {
                        unit.counters.in_errors.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    protocol = u16::from_be_bytes([hdr[2], hdr[3]]);
                }
            }
            DecompressOutcome::NoOutput => return,
            DecompressOutcome::Error => {
                unit.set_dc_error();
                deliver_to_daemon(unit, chain);
                return;
            }
            DecompressOutcome::FatalError => {
                unit.set_dc_ferror();
                deliver_to_daemon(unit, chain);
                return;
            }
        }
    } else if protocol != LCP && protocol != CCP_PROTO && flags.contains(UnitFlags::DECOMP_RUN) {
        let body = chain.first().payload()[HEADER_LEN..].to_vec();
        unit.ccp.lock().incomp(&body);
    }

    // A lost frame reported by `pkt_in` desyncs the VJ receive dictionary;
    // the flush itself is deferred-context-only work, unlike the VJ_RESET
    // flag it responds to.
    if flags.contains(UnitFlags::VJ_RESET) {
        unit.vj.lock().rx.flush();
    }

    if protocol == VJC_COMP || protocol == VJC_UNCOMP {
        match vj_uncompress(unit, &chain, protocol) {
            Some(rebuilt) => chain = rebuilt,
            None => return,
        }
        protocol = IP;
    }

    chain = chain.collapse_if_small();

    unit.tap(&chain);

    if protocol == IP {
        if !unit.is_up() || unit.np_mode(NpProtocol::Ip) != NpMode::Pass {
            return;
        }
        if chain.first_mut().pull_header(HEADER_LEN).is_err() {
            unit.counters.in_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match chain.into_single() {
            Some(buf) => unit.deliver_ip(buf),
            None => {
                let flat = chain.flatten();
                if let Some(buf) = packetbuf_from_bytes(&flat) {
                    unit.deliver_ip(buf);
                }
            }
        }
        return;
    }

    if unit.user_read.push(chain).is_err() {
        unit.counters.in_errors.fetch_add(1, Ordering::Relaxed);
        return;
    }
    unit.notify_ctl();
}

/// An undecodable or rejected compressed frame still needs to reach the
/// negotiation daemon so it can see the failure; deliver it unmodified via
/// the user-read queue rather than dropping it silently.
fn deliver_to_daemon(unit: &Unit, chain: Chain) {
    if unit.user_read.push(chain).is_err() {
        unit.counters.in_errors.fetch_add(1, Ordering::Relaxed);
        return;
    }
    unit.notify_ctl();
}

/// Undo Van Jacobson header compression, reconstituting the IP+TCP header
/// ahead of the chain's unchanged trailing payload. Returns `None` if the
/// frame was consumed (dropped, or folded into a reset) without producing
/// output.
fn vj_uncompress(unit: &Unit, chain: &Chain, protocol: u16) -> Option<Chain> {
    let body = &chain.first().payload()[HEADER_LEN..];

    let flags = unit.flags();

    if protocol == VJC_COMP {
        if unit.take_vj_reset() {
            unit.counters.in_errors.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if flags.contains(UnitFlags::REJ_COMP_TCP) {
            unit.counters.in_errors.fetch_add(1, Ordering::Relaxed);
            return None;
        }
    }

    let mut vj = unit.vj.lock();
    let result = if protocol == VJC_UNCOMP {
        vj.rx.uncompress_uncompressed(body)
    } else {
        vj.rx.uncompress_compressed(body, !flags.contains(UnitFlags::NO_TCP_CCID))
    };
    drop(vj);

    match result {
        Ok(rebuilt) => {
            let trailing = &body[rebuilt.consumed..];
            let mut flat = Vec::with_capacity(HEADER_LEN + rebuilt.header.len() + trailing.len());
            flat.extend_from_slice(&chain.first().payload()[..HEADER_LEN]);
            flat.extend_from_slice(&rebuilt.header);
            flat.extend_from_slice(trailing);
            let mut buf = packetbuf_from_bytes(&flat)?;
            buf.payload_mut()[2..4].copy_from_slice(&IP.to_be_bytes());
            Some(Chain::single(buf))
        }
        Err(VjError::UnknownConnection | VjError::BadLength | VjError::NotSynced) => {
            unit.counters.in_errors.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}
