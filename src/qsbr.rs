//! The QSBR engine: thread registration, quiescent announcements, and
//! two-log epoch rotation.
//!
//! Each registered thread owns one bit of a 64-bit quiescent mask. An
//! announcement sets the thread's bit; the announcement that completes
//! the mask rotates the epoch: the `previous` log is drained (its entries
//! were deferred at least one full epoch ago, so every registered thread
//! has passed a quiescent state since), the two logs swap roles, and the
//! mask resets. Entries therefore live for two rotations after deferral.

use crate::error::QsbrError;
use crate::mpsc::MpscQueue;
use crate::retired::Retired;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use crossbeam_utils::CachePadded;

/// Maximum number of threads one engine can register: one per bit of
/// the quiescent mask.
pub const MAX_THREADS: u64 = 64;

type Log = MpscQueue<Retired>;

/// Lock-free quiescent-state-based reclamation engine.
///
/// Construct one engine per protected structure and keep it alive for the
/// structure's lifetime; on drop, both logs are drained and their entries
/// reclaimed. See the [crate docs](crate) for the protocol.
pub struct Qsbr {
    /// Number of registered threads. Monotonic, capped at [`MAX_THREADS`].
    counter: AtomicU64,
    /// Bit `i` set: thread `i` announced quiescence in the current epoch.
    quiescent: CachePadded<AtomicU64>,
    /// Set by the first announcement; registration is refused afterwards.
    sealed: AtomicBool,
    /// Log receiving new deferrals.
    current: CachePadded<AtomicPtr<Log>>,
    /// Log drained on the next rotation.
    previous: CachePadded<AtomicPtr<Log>>,
}

// SAFETY: all state is atomic words; the logs enforce their own
// single-consumer contract through the unique-rotator protocol below.
unsafe impl Send for Qsbr {}
// SAFETY: see above.
unsafe impl Sync for Qsbr {}

impl Qsbr {
    /// Creates an engine with no registered threads and two empty logs.
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            quiescent: CachePadded::new(AtomicU64::new(0)),
            sealed: AtomicBool::new(false),
            current: CachePadded::new(AtomicPtr::new(Box::into_raw(Box::new(Log::new())))),
            previous: CachePadded::new(AtomicPtr::new(Box::into_raw(Box::new(Log::new())))),
        }
    }

    /// Registers the calling thread and returns its permanent id.
    ///
    /// Ids are handed out densely from 0. Returns
    /// [`QsbrError::ThreadLimitExceeded`] once [`MAX_THREADS`] threads
    /// hold ids; the counter never moves past the cap, so a failed
    /// registration does not poison epoch rotation for the others.
    ///
    /// # Panics
    ///
    /// Panics if any thread has already announced quiescence. The engine
    /// does not rotate with partial membership, so registration must
    /// complete before the first [`quiescent`](Qsbr::quiescent) call.
    pub fn register_thread(&self) -> Result<u64, QsbrError> {
        assert!(
            !self.sealed.load(Ordering::Acquire),
            "register_thread called after a quiescent announcement"
        );
        let mut count = self.counter.load(Ordering::Acquire);
        loop {
            if count >= MAX_THREADS {
                return Err(QsbrError::ThreadLimitExceeded);
            }
            match self.counter.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(count),
                Err(observed) => count = observed,
            }
        }
    }

    /// Defers reclamation of `entry` until the current epoch expires.
    ///
    /// Usable from any registered thread; lock-free apart from the log's
    /// node allocation. The entry's deleter runs during the rotation
    /// after next, once every registered thread has announced quiescence
    /// in between.
    pub fn defer(&self, entry: Retired) {
        let log = self.current.load(Ordering::Acquire);
        // SAFETY: both logs are allocated in `new` and freed only in
        // `drop`; a loaded pointer is always live. A rotation racing with
        // this push lands the entry in whichever log `current` named at
        // the instant of the load, which is drained no earlier than the
        // next epoch either way.
        unsafe { (*log).push(entry) };
    }

    /// Announces that thread `tid` holds no pointers into the protected
    /// structure.
    ///
    /// The announcement that sets the last missing bit also rotates the
    /// epoch, draining the previous log and running its deleters; every
    /// other call is a pair of atomic operations. `tid` must be an id
    /// returned by [`register_thread`](Qsbr::register_thread) on this
    /// engine.
    pub fn quiescent(&self, tid: u64) {
        debug_assert!(tid < self.counter.load(Ordering::Acquire));
        if !self.sealed.load(Ordering::Relaxed) {
            self.sealed.store(true, Ordering::Release);
        }

        let mask = 1u64 << tid;
        let prev = self.quiescent.fetch_or(mask, Ordering::AcqRel);
        let now = prev | mask;
        // Only the thread whose bit completed the mask rotates; a repeat
        // announcement (bit already set) never does.
        if prev != now && u64::from(now.count_ones()) == self.counter.load(Ordering::Acquire) {
            self.rotate();
        }
    }

    /// Drains the previous log, swaps the log roles, and opens a fresh
    /// epoch. Called by exactly one thread per epoch.
    fn rotate(&self) {
        let previous = self.previous.load(Ordering::Acquire);
        // SAFETY: single-consumer contract; the rotator is unique
        // because only the completing announcement reaches here, and the
        // mask is not reset until rotation finishes. Dropping each entry
        // runs its deleter; every registered thread announced quiescence
        // after these entries were deferred.
        unsafe { while (*previous).pop().is_some() {} }

        // The drained log starts collecting new deferrals; the old
        // current log waits out the epoch that just opened.
        let retiring = self.current.swap(previous, Ordering::AcqRel);
        self.previous.store(retiring, Ordering::Release);
        self.quiescent.store(0, Ordering::Release);
    }

    /// Returns `true` if both logs are empty.
    ///
    /// Exclusive access stands in for quiescence: with `&mut self` no
    /// deferral or rotation can race the check.
    pub fn is_idle(&mut self) -> bool {
        // SAFETY: `&mut self` rules out concurrent pushes and rotations.
        unsafe {
            (**self.current.get_mut()).is_empty() && (**self.previous.get_mut()).is_empty()
        }
    }
}

impl Default for Qsbr {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Qsbr {
    fn drop(&mut self) {
        // Dropping a log drops its remaining entries, which runs their
        // deleters; nothing can still hold pointers into the structure
        // once the engine itself is being dropped.
        for log in [self.previous.get_mut(), self.current.get_mut()] {
            // SAFETY: allocated in `new`, never freed elsewhere.
            drop(unsafe { Box::from_raw(*log) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_hands_out_dense_ids() {
        let qs = Qsbr::new();
        assert_eq!(qs.register_thread(), Ok(0));
        assert_eq!(qs.register_thread(), Ok(1));
        assert_eq!(qs.register_thread(), Ok(2));
    }

    #[test]
    fn register_fails_past_the_cap() {
        let qs = Qsbr::new();
        for expected in 0..MAX_THREADS {
            assert_eq!(qs.register_thread(), Ok(expected));
        }
        assert_eq!(qs.register_thread(), Err(QsbrError::ThreadLimitExceeded));
        // The failed registration must not desync the mask arithmetic.
        assert_eq!(qs.counter.load(Ordering::Acquire), MAX_THREADS);
    }

    #[test]
    #[should_panic(expected = "register_thread called after")]
    fn register_after_quiescent_panics() {
        let qs = Qsbr::new();
        let tid = qs.register_thread().unwrap();
        qs.quiescent(tid);
        let _ = qs.register_thread();
    }
}
