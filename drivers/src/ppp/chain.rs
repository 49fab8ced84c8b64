//! Buffer chains and the bounded FIFO queues built on top of them.
//!
//! A [`Chain`] is an ordered sequence of [`PacketBuf`] segments. Most chains
//! in practice hold exactly one segment; the receive path synthesizes a
//! second segment when VJ reconstruction needs to prepend a rebuilt IP/TCP
//! header without copying the trailing payload.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use slopos_lib::IrqMutex;

use crate::net::packetbuf::PacketBuf;
use crate::net::pool::BUF_SIZE;

use super::npmode::NpMode;

// =============================================================================
// Chain
// =============================================================================

/// An ordered, non-empty sequence of buffer segments forming one logical
/// packet. See §3 "Buffer chain" — head trimming happens on the first
/// segment; splicing a reconstructed header ahead of an existing payload
/// segment is a `push_front`-style insert rather than a copy.
pub struct Chain {
    segments: Vec<PacketBuf>,
}

impl Chain {
    /// Wrap a single segment as a one-element chain.
    pub fn single(buf: PacketBuf) -> Self {
        Self {
            segments: alloc::vec![buf],
        }
    }

    /// Total logical payload length across all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(PacketBuf::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The leading segment, which carries the PPP header for any chain that
    /// has passed through `output`'s header-prepend step or `pkt_in`'s framing.
    pub fn first(&self) -> &PacketBuf {
        &self.segments[0]
    }

    pub fn first_mut(&mut self) -> &mut PacketBuf {
        &mut self.segments[0]
    }

    pub fn segments(&self) -> &[PacketBuf] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Append a segment at the tail of the chain.
    pub fn push_back(&mut self, buf: PacketBuf) {
        self.segments.push(buf);
    }

    /// Insert a newly synthesized segment immediately after the first one —
    /// used by VJ reconstruction to splice a rebuilt header ahead of the
    /// remaining (untouched) payload segment(s) rather than copying them.
    pub fn splice_after_first(&mut self, buf: PacketBuf) {
        self.segments.insert(1, buf);
    }

    /// Insert a new leading segment (used when the existing first segment
    /// has no room left to grow a header into).
    pub fn push_front(&mut self, buf: PacketBuf) {
        self.segments.insert(0, buf);
    }

    /// Consume the chain, returning its single segment if it has exactly one.
    pub fn into_single(mut self) -> Option<PacketBuf> {
        if self.segments.len() == 1 {
            self.segments.pop()
        } else {
            None
        }
    }

    /// Flatten the chain's logical payload into one contiguous buffer.
    pub fn flatten(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for seg in &self.segments {
            out.extend_from_slice(seg.payload());
        }
        out
    }

    /// If the chain is multi-segment or its sole segment is cluster-backed,
    /// and the total payload is small enough, copy it down into a single
    /// pool-backed segment to reclaim the cluster (§4.4 step 5).
    ///
    /// Leaves the chain untouched if it is already a single pool-backed
    /// segment, or if the payload is too large to fit in one pooled buffer.
    pub fn collapse_if_small(self) -> Self {
        let needs_collapse =
            self.segments.len() > 1 || self.segments.first().is_some_and(PacketBuf::is_oversized);
        if !needs_collapse {
            return self;
        }
        let total = self.len();
        if total > BUF_SIZE {
            return self;
        }
        let flat = self.flatten();
        match PacketBuf::from_raw_copy(&flat) {
            Some(buf) => Chain::single(buf),
            None => self,
        }
    }
}

/// Build a `PacketBuf` from a byte slice, falling back to an oversized
/// (heap-backed) buffer if it doesn't fit in a pool slot.
pub fn packetbuf_from_bytes(data: &[u8]) -> Option<PacketBuf> {
    if let Some(buf) = PacketBuf::from_raw_copy(data) {
        return Some(buf);
    }
    let mut buf = PacketBuf::oversized(data.len());
    buf.append(data).ok()?;
    Some(buf)
}

// =============================================================================
// PacketQueue
// =============================================================================

/// A bounded, `IrqMutex`-guarded FIFO of [`Chain`]s.
///
/// Used for the per-unit fast-output, normal-output, raw-receive, and
/// user-read queues. Pushing past capacity drops the chain and increments
/// the drop counter rather than blocking or growing unbounded.
pub struct PacketQueue {
    inner: IrqMutex<VecDeque<Chain>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl PacketQueue {
    pub const fn new(capacity: usize) -> Self {
        Self {
            inner: IrqMutex::new(VecDeque::new()),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a chain. Returns the chain back to the caller (to be freed or
    /// otherwise accounted for) if the queue is at capacity.
    pub fn push(&self, chain: Chain) -> Result<(), Chain> {
        let mut q = self.inner.lock();
        if q.len() >= self.capacity {
            drop(q);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(chain);
        }
        q.push_back(chain);
        Ok(())
    }

    /// Pop the chain at the head of the queue, if any.
    pub fn pop(&self) -> Option<Chain> {
        self.inner.lock().pop_front()
    }

    /// Scan front-to-back for the first chain whose protocol mode resolves
    /// to `Pass`. `Drop`/`Error` entries are removed and dropped in place;
    /// `Queue` entries are left untouched and skipped. Implements the
    /// per-queue half of the `out_pkt` scan in §4.3 step 1.
    pub fn take_first_passable<F>(&self, mut mode_of: F) -> Option<Chain>
    where
        F: FnMut(&Chain) -> NpMode,
    {
        let mut q = self.inner.lock();
        let mut i = 0;
        while i < q.len() {
            match mode_of(&q[i]) {
                NpMode::Drop | NpMode::Error => {
                    let _ = q.remove(i);
                }
                NpMode::Queue => {
                    i += 1;
                }
                NpMode::Pass => {
                    return q.remove(i);
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total logical payload bytes currently queued (used by
    /// GET-READABLE-COUNT on the user-read queue).
    pub fn byte_len(&self) -> usize {
        self.inner.lock().iter().map(Chain::len).sum()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain and free every queued chain (used by `release`).
    pub fn drain(&self) {
        self.inner.lock().clear();
    }
}
