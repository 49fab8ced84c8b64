//! Per-link unit state and the fixed pool units are allocated from.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};

use slopos_lib::IrqMutex;

use crate::net::napi::NapiContext;
use crate::net::netdev::DeviceHandle;
use crate::net::packetbuf::PacketBuf;

use super::ccp::{self, CcpState};
use super::chain::{Chain, PacketQueue};
use super::flags::UnitFlags;
use super::npmode::{NpMode, NpModeTable, NpProtocol};
use super::vj::VjState;

/// Process id. `0` is reserved to mean "unowned" / "no pending claim".
pub type Pid = u32;

/// Minimum and (default) MRU a freshly allocated unit starts at. The
/// maximum is the largest MRU SET-MRU will accept.
pub const MRU_MIN: u16 = 128;
pub const MRU_MAX: u16 = 65535;

const FAST_QUEUE_CAPACITY: usize = 32;
const NORMAL_QUEUE_CAPACITY: usize = 64;
const RAW_RECEIVE_CAPACITY: usize = 64;
const USER_READ_CAPACITY: usize = 64;

/// Number of fixed unit slots the pool manages.
pub const MAX_UNITS: usize = 8;

/// Line-driver-supplied upcalls, stored on the unit at attach time.
#[derive(Clone, Copy, Default)]
pub struct LineDriverCallbacks {
    /// Invoked whenever a chain is staged for transmit and the line driver
    /// should start pulling frames via `dequeue`.
    pub start: Option<fn(usize)>,
    /// Invoked whenever a non-IP frame lands on the user-read queue, so the
    /// daemon can be woken.
    pub ctl_notify: Option<fn(usize)>,
    /// Invoked for each IP datagram accepted on receive, handing the
    /// PPP-header-stripped buffer to the kernel's IP input path. The queue
    /// and routing logic behind this hook live outside the PPP core.
    pub deliver_ip: Option<fn(usize, PacketBuf)>,
    /// Optional capture hook invoked with every received chain before
    /// protocol dispatch (a tap point; the capture facility itself — e.g. a
    /// BPF filter — lives outside the PPP core).
    pub tap: Option<fn(usize, &Chain)>,
}

/// Free-running interface counters, read back via GET-PPP-STATS.
pub struct PppCounters {
    pub in_packets: AtomicU64,
    pub out_packets: AtomicU64,
    pub in_bytes: AtomicU64,
    pub out_bytes: AtomicU64,
    pub in_errors: AtomicU64,
    pub out_errors: AtomicU64,
}

impl PppCounters {
    pub const fn new() -> Self {
        Self {
            in_packets: AtomicU64::new(0),
            out_packets: AtomicU64::new(0),
            in_bytes: AtomicU64::new(0),
            out_bytes: AtomicU64::new(0),
            in_errors: AtomicU64::new(0),
            out_errors: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.in_packets.store(0, Ordering::Relaxed);
        self.out_packets.store(0, Ordering::Relaxed);
        self.in_bytes.store(0, Ordering::Relaxed);
        self.out_bytes.store(0, Ordering::Relaxed);
        self.in_errors.store(0, Ordering::Relaxed);
        self.out_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PppStatsSnapshot {
        PppStatsSnapshot {
            in_packets: self.in_packets.load(Ordering::Relaxed),
            out_packets: self.out_packets.load(Ordering::Relaxed),
            in_bytes: self.in_bytes.load(Ordering::Relaxed),
            out_bytes: self.out_bytes.load(Ordering::Relaxed),
            in_errors: self.in_errors.load(Ordering::Relaxed),
            out_errors: self.out_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for PppCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`PppCounters`] returned by GET-PPP-STATS.
#[derive(Clone, Copy, Debug, Default)]
pub struct PppStatsSnapshot {
    pub in_packets: u64,
    pub out_packets: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub in_errors: u64,
    pub out_errors: u64,
}

/// The staged-output slot, bundled with the bit that must always mirror
/// whether it holds a chain.
struct TxState {
    staged: Option<Chain>,
}

/// One PPP link. Guarded piecewise rather than behind a single lock: the
/// staged-output slot and flag word get their own short critical sections
/// (taken from hard-interrupt context), while VJ/CCP state is only ever
/// touched from the deferred soft-interrupt context and can afford a wider
/// one.
pub struct Unit {
    pub index: usize,
    flags: IrqMutex<UnitFlags>,
    tx_state: IrqMutex<TxState>,
    np_modes: IrqMutex<NpModeTable>,
    pub counters: PppCounters,
    pub fast_output: PacketQueue,
    pub normal_output: PacketQueue,
    pub raw_receive: PacketQueue,
    pub user_read: PacketQueue,
    pub(crate) vj: IrqMutex<VjState>,
    pub(crate) ccp: IrqMutex<CcpState>,
    mru: AtomicU16,
    mru_min: u16,
    mru_max: u16,
    callbacks: IrqMutex<LineDriverCallbacks>,
    owner: AtomicU32,
    transfer_claim: AtomicU32,
    attached_device: IrqMutex<Option<DeviceHandle>>,
    running: AtomicBool,
    up: AtomicBool,
    pub napi: NapiContext,
}

impl Unit {
    const fn new(index: usize) -> Self {
        Self {
            index,
            flags: IrqMutex::new(UnitFlags::empty()),
            tx_state: IrqMutex::new(TxState { staged: None }),
            np_modes: IrqMutex::new(NpModeTable::new()),
            counters: PppCounters::new(),
            fast_output: PacketQueue::new(FAST_QUEUE_CAPACITY),
            normal_output: PacketQueue::new(NORMAL_QUEUE_CAPACITY),
            raw_receive: PacketQueue::new(RAW_RECEIVE_CAPACITY),
            user_read: PacketQueue::new(USER_READ_CAPACITY),
            vj: IrqMutex::new(VjState::new()),
            ccp: IrqMutex::new(CcpState::new()),
            mru: AtomicU16::new(MRU_MIN),
            mru_min: MRU_MIN,
            mru_max: MRU_MAX,
            callbacks: IrqMutex::new(LineDriverCallbacks {
                start: None,
                ctl_notify: None,
                deliver_ip: None,
                tap: None,
            }),
            owner: AtomicU32::new(0),
            transfer_claim: AtomicU32::new(0),
            attached_device: IrqMutex::new(None),
            running: AtomicBool::new(false),
            up: AtomicBool::new(false),
            napi: NapiContext::new(64),
        }
    }

    fn reset_for_allocation(&self) {
        *self.flags.lock() = UnitFlags::empty();
        self.mru.store(self.mru_min, Ordering::Release);
        *self.ccp.lock() = CcpState::new();
        *self.vj.lock() = VjState::new();
        *self.np_modes.lock() = NpModeTable::new();
        self.tx_state.lock().staged = None;
        self.fast_output.drain();
        self.normal_output.drain();
        self.raw_receive.drain();
        self.user_read.drain();
        self.counters.reset();
    }

    // -- flags -----------------------------------------------------------

    /// Flags as reported to the control surface: the stored word with
    /// TBUSY synthesized from the staged-output slot, which is the single
    /// source of truth for that bit.
    pub fn flags(&self) -> UnitFlags {
        let mut f = *self.flags.lock();
        f.set(UnitFlags::TBUSY, self.tx_state.lock().staged.is_some());
        f
    }

    pub(crate) fn flags_raw(&self) -> UnitFlags {
        *self.flags.lock()
    }

    /// Apply a SET-FLAGS request: only `UnitFlags::SC_MASK` bits are
    /// writable. If this clears CCP_OPEN while it was set, tears down
    /// generic compression. Returns the resulting flags snapshot.
    pub fn set_flags(&self, requested: UnitFlags) -> UnitFlags {
        let mut guard = self.flags.lock();
        let before = *guard;
        *guard = guard.apply_writable(requested);
        if before.contains(UnitFlags::CCP_OPEN) && !guard.contains(UnitFlags::CCP_OPEN) {
            let mut ccp_guard = self.ccp.lock();
            ccp::ccp_closed(&mut guard, &mut ccp_guard);
        }
        drop(guard);
        self.flags()
    }

    pub(crate) fn with_flags_and_ccp<R>(&self, f: impl FnOnce(&mut UnitFlags, &mut CcpState) -> R) -> R {
        let mut flags = self.flags.lock();
        let mut ccp_state = self.ccp.lock();
        f(&mut flags, &mut ccp_state)
    }

    /// Record that the line driver reported a gap ahead of the next
    /// received frame: the VJ receive dictionary can no longer trust an
    /// implicit connection id until a frame names one explicitly.
    pub(crate) fn set_vj_reset(&self) {
        self.flags.lock().insert(UnitFlags::VJ_RESET);
    }

    /// Consume the VJ_RESET condition, reporting whether it was set.
    pub(crate) fn take_vj_reset(&self) -> bool {
        let mut f = self.flags.lock();
        let was = f.contains(UnitFlags::VJ_RESET);
        f.remove(UnitFlags::VJ_RESET);
        was
    }

    pub(crate) fn set_dc_error(&self) {
        self.flags.lock().insert(UnitFlags::DC_ERROR);
    }

    pub(crate) fn set_dc_ferror(&self) {
        self.flags.lock().insert(UnitFlags::DC_FERROR);
    }

    // -- staged output / TBUSY --------------------------------------------

    pub fn tbusy(&self) -> bool {
        self.tx_state.lock().staged.is_some()
    }

    /// Take the staged chain, if any, clearing TBUSY. Called from hard
    /// interrupt context by `dequeue`.
    pub fn take_staged(&self) -> Option<Chain> {
        self.tx_state.lock().staged.take()
    }

    /// Place a chain in the (assumed empty) staged-output slot.
    pub fn stage(&self, chain: Chain) {
        self.tx_state.lock().staged = Some(chain);
    }

    // -- NP mode -----------------------------------------------------------

    pub fn np_mode(&self, proto: NpProtocol) -> NpMode {
        self.np_modes.lock().get(proto)
    }

    /// SET-NP-MODE: no-op if unchanged; otherwise records the new mode and
    /// returns `true` if the caller should invoke the line driver's start
    /// callback (the new mode isn't QUEUE, so held traffic can move again).
    pub fn set_np_mode(&self, proto: NpProtocol, mode: NpMode) -> bool {
        let mut modes = self.np_modes.lock();
        if modes.get(proto) == mode {
            return false;
        }
        modes.set(proto, mode);
        mode != NpMode::Queue
    }

    // -- MRU -----------------------------------------------------------

    pub fn mru(&self) -> u16 {
        self.mru.load(Ordering::Acquire)
    }

    /// SET-MRU: silently clamped to `[mru_min, mru_max]`.
    pub fn set_mru(&self, requested: u16) {
        let clamped = requested.clamp(self.mru_min, self.mru_max);
        self.mru.store(clamped, Ordering::Release);
    }

    pub fn mru_min(&self) -> u16 {
        self.mru_min
    }

    pub fn mru_max(&self) -> u16 {
        self.mru_max
    }

    // -- device attachment / interface state --------------------------------

    pub fn attach_device(&self, dev: DeviceHandle) {
        *self.attached_device.lock() = Some(dev);
    }

    pub fn has_device(&self) -> bool {
        self.attached_device.lock().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    pub fn set_up(&self, up: bool) {
        let effective = up && self.running.load(Ordering::Acquire);
        self.up.store(effective, Ordering::Release);
    }

    /// Standard point-to-point "set interface flags": forces UP off when
    /// RUNNING isn't set.
    pub fn set_interface_up(&self, requested_up: bool) {
        if !self.running.load(Ordering::Acquire) {
            self.up.store(false, Ordering::Release);
            return;
        }
        self.up.store(requested_up, Ordering::Release);
    }

    // -- line driver callbacks --------------------------------------------

    pub fn set_callbacks(&self, callbacks: LineDriverCallbacks) {
        *self.callbacks.lock() = callbacks;
    }

    pub fn notify_start(&self) {
        if let Some(f) = self.callbacks.lock().start {
            f(self.index);
        }
    }

    pub fn notify_ctl(&self) {
        if let Some(f) = self.callbacks.lock().ctl_notify {
            f(self.index);
        }
    }

    /// Hand a decapsulated IP datagram to the line driver's kernel-IP-input hook.
    pub fn deliver_ip(&self, buf: PacketBuf) {
        if let Some(f) = self.callbacks.lock().deliver_ip {
            f(self.index, buf);
        }
    }

    /// Run the capture hook, if any, over a received chain before dispatch.
    pub(crate) fn tap(&self, chain: &Chain) {
        if let Some(f) = self.callbacks.lock().tap {
            f(self.index, chain);
        }
    }

    // -- ownership transfer --------------------------------------------

    pub fn owner(&self) -> Pid {
        self.owner.load(Ordering::Acquire)
    }

    /// TRANSFER-UNIT: records `pid` as the next process allowed to claim
    /// this unit via `UnitPool::allocate`. The current owner keeps the
    /// descriptor until that claim happens.
    pub fn mark_transfer(&self, pid: Pid) {
        self.transfer_claim.store(pid, Ordering::Release);
    }
}

// =============================================================================
// UnitPool
// =============================================================================

/// A stable handle to a pool-resident unit. Units are never moved or freed
/// once the pool is initialized, so this pointer stays valid for the
/// program's lifetime — the same stability assumption the device registry
/// relies on for `DeviceHandle`.
pub struct UnitHandle {
    unit: *const Unit,
}

unsafe impl Send for UnitHandle {}
unsafe impl Sync for UnitHandle {}

impl UnitHandle {
    pub fn get(&self) -> &Unit {
        unsafe { &*self.unit }
    }
}

/// Fixed pool of [`Unit`]s, indexed by stable position.
pub struct UnitPool {
    inner: IrqMutex<Vec<Box<Unit>>>,
}

impl UnitPool {
    pub const fn new() -> Self {
        Self {
            inner: IrqMutex::new(Vec::new()),
        }
    }

    /// Populate the pool with `MAX_UNITS` idle units. Idempotent.
    pub fn init(&self) {
        let mut units = self.inner.lock();
        if !units.is_empty() {
            return;
        }
        for i in 0..MAX_UNITS {
            units.push(Box::new(Unit::new(i)));
        }
    }

    fn handle_for(units: &[Box<Unit>], index: usize) -> UnitHandle {
        UnitHandle {
            unit: units[index].as_ref() as *const Unit,
        }
    }

    /// Look up a unit by its stable index without going through
    /// allocation, used by the deferred dispatcher's sweep.
    pub fn handle(&self, index: usize) -> Option<UnitHandle> {
        let units = self.inner.lock();
        if index >= units.len() {
            return None;
        }
        Some(Self::handle_for(&units, index))
    }

    pub fn unit_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// `allocate(pid)`: first honors a pending transfer claim addressed to
    /// `pid`, else finds an idle (no attached device) unit. On success the
    /// unit is fully reset, marked RUNNING, and owned by `pid`.
    pub fn allocate(&self, pid: Pid) -> Option<UnitHandle> {
        let units = self.inner.lock();

        let mut target = None;
        for u in units.iter() {
            if u.transfer_claim.load(Ordering::Acquire) == pid {
                target = Some(u.index);
                break;
            }
        }
        if target.is_none() {
            for u in units.iter() {
                if u.attached_device.lock().is_none() {
                    target = Some(u.index);
                    break;
                }
            }
        }

        let index = target?;
        let unit = &units[index];
        unit.reset_for_allocation();
        unit.transfer_claim.store(0, Ordering::Release);
        unit.owner.store(pid, Ordering::Release);
        unit.running.store(true, Ordering::Release);
        unit.up.store(false, Ordering::Release);
        Some(Self::handle_for(&units, index))
    }

    /// `release(unit)`: marks the unit down/not-running, detaches its
    /// device, drains every queue and frees the staged chain, and tears
    /// down CCP.
    pub fn release(&self, index: usize) {
        let units = self.inner.lock();
        let Some(unit) = units.get(index) else {
            return;
        };
        unit.running.store(false, Ordering::Release);
        unit.up.store(false, Ordering::Release);
        *unit.attached_device.lock() = None;
        unit.owner.store(0, Ordering::Release);
        unit.transfer_claim.store(0, Ordering::Release);
        unit.fast_output.drain();
        unit.normal_output.drain();
        unit.raw_receive.drain();
        unit.user_read.drain();
        unit.tx_state.lock().staged = None;
        let mut flags = unit.flags.lock();
        let mut ccp_state = unit.ccp.lock();
        ccp::ccp_closed(&mut flags, &mut ccp_state);
    }
}

impl Default for UnitPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide unit pool.
pub static UNIT_POOL: UnitPool = UnitPool::new();
