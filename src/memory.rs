//! Peak memory tracking
//!
//! [`TrackingAllocator`] wraps a real allocator and stamps every block with
//! the session epoch it was allocated in. A [`MemorySession`] started with
//! [`start`] only counts blocks stamped at or after its own epoch, so memory
//! that existed before the session never counts, and freeing it inside the
//! session does not hide new allocations.
//!
//! Sessions nest: a session started while another one is running gets its
//! own counters, and every allocation counts towards all running sessions.
//! Up to [`MAX_NESTED_SESSIONS`] can run at once.
//!
//! ```
//! use std::alloc::System;
//! use sniffer::memory::{self, TrackingAllocator};
//!
//! #[global_allocator]
//! static ALLOCATOR: TrackingAllocator<System> = TrackingAllocator::system();
//!
//! fn main() {
//!     let session = memory::start();
//!     let data = vec![0u8; 64 * 1024];
//!     let (_current, peak) = session.traced();
//!     assert!(peak >= data.len());
//!     session.stop();
//! }
//! ```
//!
//! # Limitations
//!
//! Sessions form one process-wide stack. Nested sessions on one thread are
//! measured correctly as long as they stop in reverse order of starting.
//! Sessions on two threads, or in interleaved async tasks, see each other's
//! allocations. Profile one call chain at a time.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Deepest supported nesting of memory sessions
pub const MAX_NESTED_SESSIONS: usize = 32;

/// Bytes reserved in front of each block for its epoch stamp
const TAG_SIZE: usize = std::mem::size_of::<u64>();

static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
static DEPTH: AtomicUsize = AtomicUsize::new(0);
/// Last epoch handed out; blocks allocated outside any session carry 0
static EPOCH: AtomicU64 = AtomicU64::new(0);
static INSTALLED: AtomicBool = AtomicBool::new(false);
static NOT_INSTALLED_WARNED: AtomicBool = AtomicBool::new(false);
static TOO_DEEP_WARNED: AtomicBool = AtomicBool::new(false);

struct Slot {
    epoch: AtomicU64,
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: Slot = Slot {
    epoch: AtomicU64::new(0),
    current: AtomicUsize::new(0),
    peak: AtomicUsize::new(0),
};

static SLOTS: [Slot; MAX_NESTED_SESSIONS] = [EMPTY_SLOT; MAX_NESTED_SESSIONS];

fn running() -> &'static [Slot] {
    let depth = DEPTH.load(Ordering::Acquire).min(MAX_NESTED_SESSIONS);
    &SLOTS[..depth]
}

/// Layout actually requested from the inner allocator, and the offset of
/// the caller's block inside it
fn tagged(layout: Layout) -> Option<(Layout, usize)> {
    let align = layout.align().max(TAG_SIZE);
    let offset = align;
    let size = layout.size().checked_add(offset)?;
    Layout::from_size_align(size, align).ok().map(|outer| (outer, offset))
}

/// Allocator wrapper that feeds the peak-memory counters
///
/// Install it as the `#[global_allocator]` of the binary being profiled.
/// Without it every session reports a peak of zero.
#[derive(Debug, Default)]
pub struct TrackingAllocator<A = System> {
    inner: A,
}

impl TrackingAllocator<System> {
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }

    /// Count `size` new bytes and return the stamp for their block
    #[inline]
    fn grew(size: usize) -> u64 {
        if !INSTALLED.load(Ordering::Relaxed) {
            INSTALLED.store(true, Ordering::Relaxed);
        }
        LIVE_BYTES.fetch_add(size, Ordering::Relaxed);

        let slots = running();
        if slots.is_empty() {
            return 0;
        }
        for slot in slots {
            let current = slot.current.fetch_add(size, Ordering::Relaxed).wrapping_add(size);
            slot.peak.fetch_max(current, Ordering::Relaxed);
        }
        EPOCH.load(Ordering::Acquire)
    }

    /// Release `size` bytes of a block stamped `tag`
    #[inline]
    fn shrank(size: usize, tag: u64) {
        LIVE_BYTES.fetch_sub(size, Ordering::Relaxed);
        if tag == 0 {
            return;
        }
        for slot in running() {
            if slot.epoch.load(Ordering::Relaxed) <= tag {
                let _ = slot.current.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    Some(current.saturating_sub(size))
                });
            }
        }
    }
}

// SAFETY: every request is forwarded to the inner allocator with room for
// an 8-byte stamp in front of the caller's block. The caller's pointer keeps
// the requested alignment and the stamp is never handed out.
unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some((outer, offset)) = tagged(layout) else {
            return std::ptr::null_mut();
        };
        // SAFETY: `outer` has a non-zero size and a valid alignment
        let base = unsafe { self.inner.alloc(outer) };
        if base.is_null() {
            return base;
        }
        let tag = Self::grew(layout.size());
        // SAFETY: `offset >= TAG_SIZE` and `base` is aligned to at least 8,
        // so the stamp is in bounds and aligned
        unsafe {
            let ptr = base.add(offset);
            ptr.sub(TAG_SIZE).cast::<u64>().write(tag);
            ptr
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let Some((outer, offset)) = tagged(layout) else {
            return std::ptr::null_mut();
        };
        // SAFETY: as in `alloc`
        let base = unsafe { self.inner.alloc_zeroed(outer) };
        if base.is_null() {
            return base;
        }
        let tag = Self::grew(layout.size());
        // SAFETY: as in `alloc`
        unsafe {
            let ptr = base.add(offset);
            ptr.sub(TAG_SIZE).cast::<u64>().write(tag);
            ptr
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // `alloc` succeeded with this layout, so it is taggable
        let Some((outer, offset)) = tagged(layout) else {
            return;
        };
        // SAFETY: `ptr` came from `alloc` with this layout, so the stamp
        // and the base pointer are where `alloc` put them
        let (tag, base) = unsafe { (ptr.sub(TAG_SIZE).cast::<u64>().read(), ptr.sub(offset)) };
        // SAFETY: `base` was returned by the inner allocator for `outer`
        unsafe { self.inner.dealloc(base, outer) };
        Self::shrank(layout.size(), tag);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some((outer, offset)) = tagged(layout) else {
            return std::ptr::null_mut();
        };
        let Some(new_outer) = new_size
            .checked_add(offset)
            .and_then(|size| Layout::from_size_align(size, outer.align()).ok())
        else {
            return std::ptr::null_mut();
        };
        // SAFETY: as in `dealloc`
        let (old_tag, base) = unsafe { (ptr.sub(TAG_SIZE).cast::<u64>().read(), ptr.sub(offset)) };
        // SAFETY: `base` was allocated with `outer`; `new_outer` is a valid
        // layout with the same alignment
        let new_base = unsafe { self.inner.realloc(base, outer, new_outer.size()) };
        if new_base.is_null() {
            return new_base;
        }

        // The block moves into the current epoch with its new size
        Self::shrank(layout.size(), old_tag);
        let tag = Self::grew(new_size);
        // SAFETY: the stamp sits at the same offset in the resized block
        unsafe {
            let new_ptr = new_base.add(offset);
            new_ptr.sub(TAG_SIZE).cast::<u64>().write(tag);
            new_ptr
        }
    }
}

/// Whether a [`TrackingAllocator`] has served at least one allocation
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Relaxed)
}

/// Whether any memory session is currently running
pub fn is_tracing() -> bool {
    DEPTH.load(Ordering::Acquire) > 0
}

/// Heap bytes currently live, as seen by the tracking allocator
pub fn live_bytes() -> usize {
    LIVE_BYTES.load(Ordering::Relaxed)
}

/// Begin a peak-memory session
///
/// The session counts only blocks allocated from now on. Sessions already
/// running keep counting too.
pub fn start() -> MemorySession {
    if !is_installed() && !NOT_INSTALLED_WARNED.swap(true, Ordering::Relaxed) {
        tracing::warn!(
            target: "sniffer",
            "TrackingAllocator is not the global allocator; peak memory will read as 0"
        );
    }

    let depth = DEPTH.load(Ordering::Acquire);
    let slot = if depth < MAX_NESTED_SESSIONS {
        let epoch = EPOCH.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = &SLOTS[depth];
        slot.epoch.store(epoch, Ordering::Relaxed);
        slot.current.store(0, Ordering::Relaxed);
        slot.peak.store(0, Ordering::Relaxed);
        Some(depth)
    } else {
        if !TOO_DEEP_WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                target: "sniffer",
                max = MAX_NESTED_SESSIONS,
                "memory sessions nested too deep; inner peaks read as 0"
            );
        }
        None
    };
    DEPTH.fetch_add(1, Ordering::AcqRel);

    MemorySession {
        slot,
        stopped: false,
    }
}

/// A running peak-memory measurement; stops itself when dropped
#[derive(Debug)]
pub struct MemorySession {
    slot: Option<usize>,
    stopped: bool,
}

impl MemorySession {
    /// `(current, peak)` bytes allocated since the session started and
    /// still live, and the most that ever were
    pub fn traced(&self) -> (usize, usize) {
        match self.slot {
            Some(index) => {
                let slot = &SLOTS[index];
                let current = slot.current.load(Ordering::Relaxed);
                let peak = slot.peak.load(Ordering::Relaxed);
                // The current counter can move past the recorded peak between the two loads
                (current, peak.max(current))
            }
            None => (0, 0),
        }
    }

    /// End the session and return its peak in bytes
    pub fn stop(mut self) -> usize {
        let (_, peak) = self.traced();
        self.release();
        peak
    }

    fn release(&mut self) {
        if !self.stopped {
            self.stopped = true;
            DEPTH.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Convert a byte count to kilobytes (1 KB = 1024 bytes)
pub fn bytes_to_kb(bytes: usize) -> f64 {
    bytes as f64 / 1024.0
}
