//! One-shot initialization guard for statics that must run their setup
//! exactly once, from any CPU, before being read.

use core::sync::atomic::{AtomicBool, Ordering};

pub struct InitFlag {
    done: AtomicBool,
}

impl InitFlag {
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Returns `true` the first time this is called (caller should run its
    /// one-time setup), `false` on every subsequent call.
    #[inline]
    pub fn init_once(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Default for InitFlag {
    fn default() -> Self {
        Self::new()
    }
}
