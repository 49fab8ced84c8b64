//! Unified Processor Control Region (PCR) for SMP Support
//!
//! # Assembly Offsets (CRITICAL)
//!
//! Fields at offsets 0-24 are accessed by assembly code via `gs:[offset]`.
//! DO NOT CHANGE these field positions without updating any hand-written
//! asm that reads them directly.

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};

use super::percpu::MAX_CPUS as PCR_MAX_CPUS;

/// Processor Control Region - unified per-CPU data structure.
///
/// GS_BASE points to this structure in kernel mode, so `current_pcr()` can
/// reach it in ~1-3 cycles via a single `gs:[0]` load instead of scanning
/// the APIC-ID-indexed table in [`crate::percpu`].
///
/// CRITICAL: Offsets 0-24 are used by assembly - DO NOT CHANGE without
/// updating the matching asm.
#[repr(C, align(64))]
pub struct ProcessorControlRegion {
    /// Self-reference pointer for GS-based PCR access.
    /// Assembly: `mov rax, gs:[0]` to get PCR pointer.
    pub self_ref: *mut ProcessorControlRegion, // offset 0

    /// Temporary storage for user RSP during SYSCALL entry.
    pub user_rsp_tmp: u64, // offset 8

    /// Kernel RSP loaded during SYSCALL entry.
    pub kernel_rsp: u64, // offset 16

    /// CPU index (0..n-1), NOT the hardware APIC ID.
    /// Assembly: `mov eax, gs:[24]` for fast current_cpu_id().
    pub cpu_id: u32, // offset 24

    /// Hardware Local APIC ID.
    pub apic_id: u32, // offset 28

    /// Preemption disable nesting counter. >0 means preemption is disabled.
    pub preempt_count: AtomicU32, // offset 32

    /// Set by a PreemptGuard drop that found a reschedule queued while
    /// preemption was held disabled.
    pub reschedule_pending: AtomicU32, // offset 36

    /// Currently executing in interrupt/exception context.
    pub in_interrupt: AtomicBool, // offset 40

    _pad1: [u8; 7], // offset 41-47

    /// Pointer to currently running task (opaque).
    pub current_task: AtomicPtr<()>, // offset 48

    /// Pointer to this CPU's scheduler instance (opaque).
    pub scheduler: AtomicPtr<()>, // offset 56

    /// CPU is online and accepting scheduled work.
    pub online: AtomicBool, // offset 64

    _pad2: [u8; 7], // offset 65-71

    /// Total context switches on this CPU.
    pub context_switches: AtomicU64,

    /// Total interrupts handled on this CPU.
    pub interrupt_count: AtomicU64,

    /// Total syscalls handled on this CPU.
    pub syscall_count: AtomicU64,

    /// PID of task currently in syscall (for user pointer validation).
    pub syscall_pid: AtomicU32,

    _pad3: [u8; 4],
}

// Compile-time offset verification
const _: () = {
    assert!(core::mem::offset_of!(ProcessorControlRegion, self_ref) == 0);
    assert!(core::mem::offset_of!(ProcessorControlRegion, user_rsp_tmp) == 8);
    assert!(core::mem::offset_of!(ProcessorControlRegion, kernel_rsp) == 16);
    assert!(core::mem::offset_of!(ProcessorControlRegion, cpu_id) == 24);
    assert!(core::mem::offset_of!(ProcessorControlRegion, apic_id) == 28);
};

impl ProcessorControlRegion {
    /// Create a new zeroed PCR.
    pub const fn new() -> Self {
        Self {
            self_ref: ptr::null_mut(),
            user_rsp_tmp: 0,
            kernel_rsp: 0,
            cpu_id: 0,
            apic_id: 0,
            preempt_count: AtomicU32::new(0),
            reschedule_pending: AtomicU32::new(0),
            in_interrupt: AtomicBool::new(false),
            _pad1: [0; 7],
            current_task: AtomicPtr::new(ptr::null_mut()),
            scheduler: AtomicPtr::new(ptr::null_mut()),
            online: AtomicBool::new(false),
            _pad2: [0; 7],
            context_switches: AtomicU64::new(0),
            interrupt_count: AtomicU64::new(0),
            syscall_count: AtomicU64::new(0),
            syscall_pid: AtomicU32::new(u32::MAX),
            _pad3: [0; 4],
        }
    }
}

impl Default for ProcessorControlRegion {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: PCR uses atomics for all mutable fields and is only
// accessed by the owning CPU (except during initialization).
unsafe impl Send for ProcessorControlRegion {}
unsafe impl Sync for ProcessorControlRegion {}

use slopos_abi::arch::x86_64::msr::Msr;

impl ProcessorControlRegion {
    /// # Safety
    /// Must be called exactly once per CPU, before any code on that CPU
    /// dereferences `gs:[0]`.
    pub unsafe fn install(&mut self) {
        let self_addr = self as *mut _ as u64;
        self.self_ref = self as *mut _;
        let low = self_addr as u32;
        let high = (self_addr >> 32) as u32;

        core::arch::asm!(
            "wrmsr",
            in("ecx") Msr::GS_BASE.address(),
            in("eax") low,
            in("edx") high,
            options(nostack, preserves_flags)
        );

        core::arch::asm!(
            "wrmsr",
            in("ecx") Msr::KERNEL_GS_BASE.address(),
            in("eax") low,
            in("edx") high,
            options(nostack, preserves_flags)
        );

        mark_gs_base_set();
    }
}

// ==================== PCR STORAGE AND ACCESS ====================

use crate::InitFlag;

/// BSP's PCR (statically allocated)
static mut BSP_PCR: ProcessorControlRegion = ProcessorControlRegion::new();

/// Array of pointers to all PCRs (BSP + APs)
/// Index 0 = BSP, Index 1+ = APs
static mut ALL_PCRS: [*mut ProcessorControlRegion; PCR_MAX_CPUS] = [ptr::null_mut(); PCR_MAX_CPUS];

/// Number of initialized PCRs
static PCR_COUNT: AtomicU32 = AtomicU32::new(0);

static PCR_INIT: InitFlag = InitFlag::new();
static GS_BASE_SET: InitFlag = InitFlag::new();

/// Initialize the BSP's PCR (data structures only, GS_BASE not yet set)
///
/// # Safety
/// Must be called exactly once during early BSP boot.
/// Must call `install()` on the returned PCR before using `current_cpu_id()`.
pub unsafe fn init_bsp_pcr(apic_id: u32) {
    if !PCR_INIT.init_once() {
        return;
    }

    let pcr = &raw mut BSP_PCR;

    (*pcr).self_ref = pcr;
    (*pcr).cpu_id = 0;
    (*pcr).apic_id = apic_id;

    ALL_PCRS[0] = pcr;
    PCR_COUNT.store(1, Ordering::Release);
}

pub fn mark_gs_base_set() {
    GS_BASE_SET.init_once();
}

/// Allocate and initialize a PCR for an AP
///
/// Returns a pointer to the new PCR.
///
/// # Safety
/// Must be called exactly once per AP during AP boot.
pub unsafe fn init_ap_pcr(cpu_id: usize, apic_id: u32) -> *mut ProcessorControlRegion {
    if cpu_id == 0 || cpu_id >= PCR_MAX_CPUS {
        panic!("init_ap_pcr: invalid cpu_id {}", cpu_id);
    }

    static mut AP_PCRS: [ProcessorControlRegion; 16] = {
        const INIT: ProcessorControlRegion = ProcessorControlRegion::new();
        [INIT; 16]
    };

    if cpu_id > 16 {
        panic!("init_ap_pcr: too many APs (max 16)");
    }

    let pcr = &raw mut AP_PCRS[cpu_id - 1];

    (*pcr).self_ref = pcr;
    (*pcr).cpu_id = cpu_id as u32;
    (*pcr).apic_id = apic_id;

    ALL_PCRS[cpu_id] = pcr;

    let current_count = PCR_COUNT.load(Ordering::Acquire);
    if cpu_id as u32 >= current_count {
        PCR_COUNT.store(cpu_id as u32 + 1, Ordering::Release);
    }

    pcr
}

/// Get the current CPU's PCR via GS segment (FAST PATH - ~1-3 cycles)
///
/// # Safety
/// GS_BASE must be set to point to a valid PCR (done during CPU init).
#[inline(always)]
pub unsafe fn current_pcr() -> &'static ProcessorControlRegion {
    let ptr: *mut ProcessorControlRegion;
    core::arch::asm!(
        "mov {}, gs:[0]",
        out(reg) ptr,
        options(nostack, preserves_flags, readonly)
    );
    &*ptr
}

/// Get the current CPU's PCR as mutable via GS segment
///
/// # Safety
/// GS_BASE must be set to point to a valid PCR.
/// Caller must ensure exclusive access.
#[inline(always)]
pub unsafe fn current_pcr_mut() -> &'static mut ProcessorControlRegion {
    let ptr: *mut ProcessorControlRegion;
    core::arch::asm!(
        "mov {}, gs:[0]",
        out(reg) ptr,
        options(nostack, preserves_flags, readonly)
    );
    &mut *ptr
}

#[inline(always)]
pub fn current_cpu_id() -> usize {
    if !GS_BASE_SET.is_set() {
        return 0;
    }
    unsafe {
        let id: u32;
        core::arch::asm!(
            "mov {:e}, gs:[24]",
            out(reg) id,
            options(nostack, preserves_flags, readonly)
        );
        id as usize
    }
}

/// Get a PCR by CPU ID
pub fn get_pcr(cpu_id: usize) -> Option<&'static ProcessorControlRegion> {
    if cpu_id >= PCR_MAX_CPUS {
        return None;
    }
    unsafe {
        let ptr = ALL_PCRS[cpu_id];
        if ptr.is_null() { None } else { Some(&*ptr) }
    }
}

/// Get a mutable PCR by CPU ID
///
/// # Safety
/// Caller must ensure exclusive access to the PCR.
pub unsafe fn get_pcr_mut(cpu_id: usize) -> Option<&'static mut ProcessorControlRegion> {
    if cpu_id >= PCR_MAX_CPUS {
        return None;
    }
    let ptr = ALL_PCRS[cpu_id];
    if ptr.is_null() { None } else { Some(&mut *ptr) }
}

/// Get the number of initialized PCRs (CPU count)
#[inline]
pub fn get_pcr_count() -> usize {
    PCR_COUNT.load(Ordering::Acquire) as usize
}

/// Check if PCR subsystem is initialized
#[inline]
pub fn is_pcr_initialized() -> bool {
    PCR_INIT.is_set()
}

/// PCR offset constants for assembly code
pub mod offsets {
    pub const SELF_REF: usize = 0;
    pub const USER_RSP_TMP: usize = 8;
    pub const KERNEL_RSP: usize = 16;
    pub const CPU_ID: usize = 24;
    pub const APIC_ID: usize = 28;
}

pub const MAX_CPUS: usize = PCR_MAX_CPUS;

/// Re-exported for callers that need the APIC-ID <-> cpu-index mapping
/// maintained by [`crate::percpu`].
pub use crate::percpu::{apic_id_from_cpu_index, cpu_index_from_apic_id};
pub use crate::percpu::{get_bsp_apic_id, get_cpu_count, get_online_cpu_count};
pub use crate::percpu::{is_bsp, is_cpu_online, mark_cpu_offline, mark_cpu_online};
pub use crate::percpu::{SendIpiToCpuFn, register_lapic_id_fn, register_send_ipi_to_cpu_fn, send_ipi_to_cpu};
pub use crate::percpu::get_current_cpu;
