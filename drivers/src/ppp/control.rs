//! The PPP control surface: the fixed set of operations a line discipline
//! or socket layer performs against a unit outside the data path (§6).
//!
//! Address and routing configuration are deliberately absent here — IPCP
//! negotiation and the kernel's IP routing tables are both out of scope for
//! this core, and a unit carries no address fields of its own (§3). What
//! remains maps onto real MTU/interface-flags ioctls: MRU doubles as the
//! reported MTU, and "interface flags" is exactly RUNNING/UP.

extern crate alloc;

use alloc::vec::Vec;

use super::ccp::{CompStats, SetCompressorError};
use super::error::PppError;
use super::flags::UnitFlags;
use super::npmode::{NpMode, NpProtocol};
use super::unit::{Pid, PppStatsSnapshot, Unit};
use super::vj::MAX_SLOTS_CAP;

/// Which side of generic compression a SET-COMPRESSOR/GET-COMP-STATS call
/// names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressorDirection {
    Transmit,
    Receive,
}

/// One control-surface request.
pub enum ControlOp {
    /// GET-READABLE-COUNT: bytes queued on the user-read queue.
    GetReadableCount,
    GetUnitIndex,
    GetFlags,
    SetFlags(UnitFlags),
    GetMru,
    SetMru(u16),
    /// SET-MAX-CID: resize (and reset) the VJ connection-id dictionary.
    SetMaxCid(usize),
    /// TRANSFER-UNIT: name the next process allowed to claim this unit.
    TransferUnit(Pid),
    SetCompressor {
        direction: CompressorDirection,
        id: u8,
        options: Vec<u8>,
    },
    GetPppStats,
    GetCompStats(CompressorDirection),
    GetNpMode(NpProtocol),
    SetNpMode(NpProtocol, NpMode),
    /// Standard interface MTU read (aliases GET-MRU: this core has no
    /// separate negotiated MTU).
    GetMtu,
    /// Standard interface flags: `true` requests the link up.
    SetInterfaceUp(bool),
}

/// Result of a successful [`ControlOp`].
#[derive(Clone, Copy, Debug)]
pub enum ControlResult {
    Count(usize),
    UnitIndex(usize),
    Flags(UnitFlags),
    Mru(u16),
    PppStats(PppStatsSnapshot),
    CompStats(CompStats),
    NpMode(NpMode),
    Ack,
}

/// Dispatch one control operation against `unit`. Returns the resulting
/// value, or an error (out-of-range MRU is clamped rather than rejected;
/// only genuinely invalid requests — e.g. an unknown compressor id — fail).
pub fn control(unit: &Unit, op: ControlOp) -> Result<ControlResult, PppError> {
    match op {
        ControlOp::GetReadableCount => Ok(ControlResult::Count(unit.user_read.byte_len())),
        ControlOp::GetUnitIndex => Ok(ControlResult::UnitIndex(unit.index)),
        ControlOp::GetFlags => Ok(ControlResult::Flags(unit.flags())),
        ControlOp::SetFlags(requested) => Ok(ControlResult::Flags(unit.set_flags(requested))),
        ControlOp::GetMru | ControlOp::GetMtu => Ok(ControlResult::Mru(unit.mru())),
        ControlOp::SetMru(requested) => {
            unit.set_mru(requested);
            Ok(ControlResult::Mru(unit.mru()))
        }
        ControlOp::SetMaxCid(max_slots) => {
            if max_slots == 0 || max_slots > MAX_SLOTS_CAP {
                return Err(PppError::Invalid);
            }
            unit.vj.lock().init(max_slots);
            Ok(ControlResult::Ack)
        }
        ControlOp::TransferUnit(pid) => {
            unit.mark_transfer(pid);
            Ok(ControlResult::Ack)
        }
        ControlOp::SetCompressor { direction, id, options } => {
            let result = unit.with_flags_and_ccp(|flags, ccp| {
                let result = match direction {
                    CompressorDirection::Transmit => ccp.set_tx(id, &options),
                    CompressorDirection::Receive => ccp.set_rx(id, &options),
                };
                // Replacing a compressor invalidates any prior negotiation;
                // the corresponding side must not run again before a fresh
                // Configure-Ack.
                if result.is_ok() {
                    match direction {
                        CompressorDirection::Transmit => flags.remove(UnitFlags::COMP_RUN),
                        CompressorDirection::Receive => flags.remove(UnitFlags::DECOMP_RUN),
                    }
                }
                result
            });
            result.map(|()| ControlResult::Ack).map_err(|e| match e {
                SetCompressorError::UnknownId | SetCompressorError::InitFailed => PppError::Invalid,
            })
        }
        ControlOp::GetPppStats => Ok(ControlResult::PppStats(unit.counters.snapshot())),
        ControlOp::GetCompStats(direction) => {
            let ccp = unit.ccp.lock();
            let stats = match direction {
                CompressorDirection::Transmit => ccp.tx_stats(),
                CompressorDirection::Receive => ccp.rx_stats(),
            };
            Ok(ControlResult::CompStats(stats))
        }
        ControlOp::GetNpMode(proto) => Ok(ControlResult::NpMode(unit.np_mode(proto))),
        ControlOp::SetNpMode(proto, mode) => {
            if unit.set_np_mode(proto, mode) {
                unit.notify_start();
            }
            Ok(ControlResult::NpMode(unit.np_mode(proto)))
        }
        ControlOp::SetInterfaceUp(requested_up) => {
            unit.set_interface_up(requested_up);
            Ok(ControlResult::Ack)
        }
    }
}
