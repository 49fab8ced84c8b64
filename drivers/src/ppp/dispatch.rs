//! The deferred soft-interrupt dispatcher: the bridge between the
//! hard-interrupt line driver (which only ever touches the staged-output
//! slot and schedules this dispatcher) and the receive/transmit sweeps that
//! do the real work.
//!
//! Units are polled in index order, single-threaded, matching the
//! concurrency model in §5 — the dispatcher itself never runs two units'
//! sweeps concurrently.

use super::rx;
use super::tx;
use super::unit::{Unit, UnitPool, UNIT_POOL};

/// Poll one scheduled unit: drain its raw-receive queue through `in_proc`,
/// bounded by the unit's NAPI budget, then give the transmit sweep one
/// chance to fill the (now possibly empty) staged-output slot.
///
/// A no-op if the unit wasn't actually scheduled (`begin_poll` only
/// succeeds out of the `Scheduled` state).
pub fn poll_unit(unit: &Unit) {
    if !unit.napi.begin_poll() {
        return;
    }

    let budget = unit.napi.budget();
    let mut processed = 0u32;
    while processed < budget {
        let Some(chain) = unit.raw_receive.pop() else {
            break;
        };
        rx::in_proc(unit, chain);
        processed += 1;
    }

    // The staged-output slot holds at most one chain; only refill it once
    // the line driver's hard-interrupt `dequeue` has emptied it.
    if !unit.tbusy() {
        tx::out_pkt(unit);
    }

    unit.napi.add_processed(processed);
    unit.napi.complete();
}

/// Sweep every unit in the pool, polling any that a hard-interrupt callback
/// (`pkt_in`'s queue push or `dequeue`'s TBUSY clear) scheduled.
pub fn poll_all(pool: &UnitPool) {
    for index in 0..pool.unit_count() {
        let Some(handle) = pool.handle(index) else {
            continue;
        };
        let unit = handle.get();
        if unit.napi.is_scheduled() {
            poll_unit(unit);
        }
    }
}

/// Entry point for the kernel's soft-interrupt scheduler: sweep the
/// process-wide unit pool.
pub fn dispatch() {
    poll_all(&UNIT_POOL);
}
