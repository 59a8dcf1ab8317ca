//! The hash-set façade: `find`/`insert`/`erase`/`rehash` over copy-on-write
//! buckets, with QSBR reclamation of everything a writer unlinks.
//!
//! Every operation takes one acquire load of the packed top word to get a
//! consistent `(modulus, array)` pair, indexes a bucket cell by
//! `hash mod M`, and works on the strip-locked bucket pointer. Mutation
//! is CAS-replacement of the whole bucket; the displaced bucket goes to
//! the reclamation log. Table growth doubles the array in place, freezing
//! each old bucket with the cell's lock bit while it is redistributed.

use crate::bucket::Bucket;
use crate::cell::{BucketCell, Top};
use crate::error::SetError;
use core::hash::{BuildHasher, Hash};
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_utils::Backoff;
use durgun::{Qsbr, QsbrError, Retired};
use foldhash::fast::FixedState;

/// Bucket count of [`HashSet::new`].
const DEFAULT_BUCKET_COUNT: usize = 16;

/// A lock-free concurrent hash set with copy-on-write buckets.
///
/// Keys are stored by value in fixed-capacity buckets (`B` slots, 8 by
/// default), so `T` must be `Copy`: reclamation frees whole buckets and
/// never runs per-key destructors. The set owns a [`Qsbr`] engine;
/// threads register once via [`register_thread`](HashSet::register_thread)
/// and pass their id to every operation.
///
/// # Example
///
/// ```rust
/// use durgun_set::HashSet;
///
/// let set: HashSet<u64> = HashSet::new();
/// let tid = set.register_thread().unwrap();
///
/// assert!(!set.insert(7, tid).unwrap());
/// assert!(set.find(&7, tid, false));
/// assert!(set.erase(&7, tid));
/// assert!(!set.find(&7, tid, false));
/// ```
pub struct HashSet<T, S = FixedState, const B: usize = 8> {
    qs: Qsbr,
    /// Serializes rehashers against each other and stalls writers.
    rehashing: AtomicBool,
    top: Top<T, B>,
    hasher: S,
}

impl<T, const B: usize> HashSet<T, FixedState, B>
where
    T: Copy + Eq + Hash + 'static,
{
    /// Creates a set with 16 buckets and the default hasher.
    pub fn new() -> Self {
        Self::with_capacity_and_hasher(DEFAULT_BUCKET_COUNT, FixedState::default())
    }

    /// Creates a set with `bucket_count` buckets (a power of two ≥ 2).
    pub fn with_capacity(bucket_count: usize) -> Self {
        Self::with_capacity_and_hasher(bucket_count, FixedState::default())
    }
}

impl<T, const B: usize> Default for HashSet<T, FixedState, B>
where
    T: Copy + Eq + Hash + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S, const B: usize> HashSet<T, S, B>
where
    T: Copy + Eq + Hash + 'static,
    S: BuildHasher,
{
    /// Creates a set with `bucket_count` buckets and a caller-supplied
    /// hasher.
    ///
    /// # Panics
    ///
    /// Panics unless `bucket_count` is a power of two, at least 2.
    pub fn with_capacity_and_hasher(bucket_count: usize, hasher: S) -> Self {
        assert!(
            bucket_count.is_power_of_two() && bucket_count >= 2,
            "bucket_count must be a power of two >= 2"
        );
        let cells: Box<[BucketCell<T, B>]> = (0..bucket_count)
            .map(|_| BucketCell::new(Box::into_raw(Bucket::boxed())))
            .collect();
        let base = Box::into_raw(cells) as *mut BucketCell<T, B>;
        Self {
            qs: Qsbr::new(),
            rehashing: AtomicBool::new(false),
            top: Top::new(base, bucket_count),
            hasher,
        }
    }

    /// Registers the calling thread with the set's reclamation engine.
    ///
    /// Must be called once per thread before its first operation, and
    /// before any thread announces quiescence. See
    /// [`Qsbr::register_thread`].
    pub fn register_thread(&self) -> Result<u64, QsbrError> {
        self.qs.register_thread()
    }

    /// Announces a quiescent state for `tid`.
    ///
    /// Only needed by callers that read with `wait_free = true`; the
    /// other operations announce on their own.
    pub fn quiescent(&self, tid: u64) {
        self.qs.quiescent(tid);
    }

    /// The current number of buckets (always a power of two).
    pub fn bucket_count(&self) -> usize {
        self.top.snapshot().0
    }

    fn hash_of(&self, key: &T) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Spin-yields until no rehash is in flight. Writers re-check after
    /// every failed CAS by coming back through here.
    fn wait_for_rehash(&self) {
        if self.rehashing.load(Ordering::Acquire) {
            let backoff = Backoff::new();
            while self.rehashing.load(Ordering::Acquire) {
                backoff.snooze();
            }
        }
    }

    /// Returns whether `key` is in the set.
    ///
    /// With `wait_free = false` the call announces a quiescent state on
    /// the way out, which may make this caller the epoch rotator (a
    /// bounded drain of the previous log). `wait_free = true` suppresses
    /// the announcement; the caller must announce later via
    /// [`quiescent`](HashSet::quiescent) or epoch rotation stalls.
    pub fn find(&self, key: &T, tid: u64, wait_free: bool) -> bool {
        let hash = self.hash_of(key);
        let (modulus, base) = self.top.snapshot();
        // SAFETY: the array published by the top word stays alive until
        // every registered thread announces quiescence after its
        // replacement; this thread has not announced yet.
        let cells = unsafe { core::slice::from_raw_parts(base, modulus) };
        let cell = &cells[hash as usize & (modulus - 1)];
        // SAFETY: strip-locked bucket pointers are live under the same
        // QSBR argument; a set lock bit does not affect the contents.
        let bucket = unsafe { &*cell.load() };
        let found = bucket.find(key, hash).is_some();
        if !wait_free {
            self.qs.quiescent(tid);
        }
        found
    }

    /// Inserts `key`; returns `Ok(true)` iff it was already present.
    ///
    /// A full target bucket triggers [`rehash`](HashSet::rehash) and the
    /// insert retries against the doubled table.
    /// [`SetError::RehashOverflow`] surfaces only if that doubling itself
    /// cannot place every key.
    pub fn insert(&self, key: T, tid: u64) -> Result<bool, SetError> {
        let hash = self.hash_of(&key);
        // A CAS loser keeps its copy as a preallocated buffer so retries
        // do not pay the allocator again.
        let mut prealloc: Option<Box<Bucket<T, B>>> = None;
        loop {
            self.wait_for_rehash();
            let (modulus, base) = self.top.snapshot();
            // SAFETY: see `find`; no quiescent announcement yet.
            let cells = unsafe { core::slice::from_raw_parts(base, modulus) };
            let cell = &cells[hash as usize & (modulus - 1)];
            let old = cell.load();
            // SAFETY: see `find`.
            let old_ref = unsafe { &*old };

            if old_ref.find(&key, hash).is_some() {
                self.qs.quiescent(tid);
                return Ok(true);
            }
            if old_ref.full() {
                if let Err(e) = self.rehash() {
                    self.qs.quiescent(tid);
                    return Err(e);
                }
                continue;
            }

            let mut copy = match prealloc.take() {
                Some(mut buf) => {
                    *buf = old_ref.clone();
                    buf
                }
                None => Box::new(old_ref.clone()),
            };
            copy.insert(key, hash);
            let copy_ptr = Box::into_raw(copy);
            match cell.publish(old, copy_ptr) {
                Ok(()) => {
                    // SAFETY: `old` is unlinked; in-flight readers are
                    // covered by QSBR until their next announcement.
                    unsafe { self.qs.defer(Retired::boxed(old)) };
                    self.qs.quiescent(tid);
                    return Ok(false);
                }
                Err(()) => {
                    // SAFETY: the copy never became reachable; reclaim it
                    // as the next iteration's preallocated buffer.
                    prealloc = Some(unsafe { Box::from_raw(copy_ptr) });
                }
            }
        }
    }

    /// Removes `key`; returns `true` iff it was present.
    pub fn erase(&self, key: &T, tid: u64) -> bool {
        let hash = self.hash_of(key);
        let mut prealloc: Option<Box<Bucket<T, B>>> = None;
        loop {
            self.wait_for_rehash();
            let (modulus, base) = self.top.snapshot();
            // SAFETY: see `find`; no quiescent announcement yet.
            let cells = unsafe { core::slice::from_raw_parts(base, modulus) };
            let cell = &cells[hash as usize & (modulus - 1)];
            let old = cell.load();
            // SAFETY: see `find`.
            let old_ref = unsafe { &*old };

            let Some(index) = old_ref.find(key, hash) else {
                self.qs.quiescent(tid);
                return false;
            };
            debug_assert!(!old_ref.empty());

            let mut copy = match prealloc.take() {
                Some(mut buf) => {
                    *buf = old_ref.clone();
                    buf
                }
                None => Box::new(old_ref.clone()),
            };
            copy.remove(index);
            let copy_ptr = Box::into_raw(copy);
            match cell.publish(old, copy_ptr) {
                Ok(()) => {
                    // SAFETY: as in `insert`.
                    unsafe { self.qs.defer(Retired::boxed(old)) };
                    self.qs.quiescent(tid);
                    return true;
                }
                Err(()) => {
                    // SAFETY: the copy never became reachable.
                    prealloc = Some(unsafe { Box::from_raw(copy_ptr) });
                }
            }
        }
    }

    /// Doubles the table in place.
    ///
    /// Returns `Ok(true)` if this caller performed the rehash and
    /// `Ok(false)` if another thread already held the rehasher role (the
    /// caller's retry will observe the new table). Old buckets are frozen
    /// one cell at a time with the lock bit, redistributed into the new
    /// array, and retired together with the old array once the new top
    /// word is published.
    ///
    /// On [`SetError::RehashOverflow`] the old table is restored to full
    /// operation: every locked cell is unlocked, the unpublished
    /// replacement is freed outright, and the rehasher role is released
    /// before the error surfaces.
    pub fn rehash(&self) -> Result<bool, SetError> {
        if self.rehashing.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        #[cfg(feature = "rehash-trace")]
        eprintln!("rehash");

        let (modulus, base) = self.top.snapshot();
        // SAFETY: this thread is the rehasher and has not announced
        // quiescence; the array cannot be reclaimed under it.
        let cells = unsafe { core::slice::from_raw_parts(base, modulus) };
        let doubled = modulus << 1;

        let mut fresh: Box<[BucketCell<T, B>]> = (0..doubled)
            .map(|_| BucketCell::new(Box::into_raw(Bucket::boxed())))
            .collect();

        // Freeze and redistribute. Old buckets are deferred only after
        // the whole pass succeeds, so aborting leaves them live.
        let mut frozen: Vec<*mut Bucket<T, B>> = Vec::with_capacity(modulus);
        for cell in cells {
            let old = cell.lock();
            frozen.push(old);
            // SAFETY: the lock bit makes every writer CAS against this
            // cell fail, so the bucket can no longer be replaced.
            let bucket = unsafe { &*old };
            for slot in bucket.occupied() {
                let idx = slot.hash as usize & (doubled - 1);
                // SAFETY: `fresh` is exclusively owned until published.
                let target = unsafe { &mut *fresh[idx].get_mut() };
                if target.full() {
                    return self.abort_rehash(cells, frozen.len(), fresh);
                }
                target.insert(slot.key, slot.hash);
            }
        }

        // Publish `(log2(2M), new array)` atomically, then retire the old
        // generation. Readers that already hold the old pair stay safe
        // until their next announcement.
        let fresh_base = Box::into_raw(fresh) as *mut BucketCell<T, B>;
        self.top.publish(fresh_base, doubled);

        for old in frozen {
            // SAFETY: unreachable through the new top word; `lock`
            // returned the payload with the tag stripped.
            unsafe { self.qs.defer(Retired::boxed(old)) };
        }
        // SAFETY: the old cell array is likewise unreachable.
        unsafe { self.qs.defer(Retired::boxed_slice(base, modulus)) };

        self.rehashing.store(false, Ordering::Release);
        Ok(true)
    }

    /// Restores the old table after a redistribution overflow.
    #[cold]
    fn abort_rehash(
        &self,
        cells: &[BucketCell<T, B>],
        locked: usize,
        mut fresh: Box<[BucketCell<T, B>]>,
    ) -> Result<bool, SetError> {
        for cell in &cells[..locked] {
            cell.unlock();
        }
        for cell in fresh.iter_mut() {
            // SAFETY: the replacement table was never published; its
            // buckets are exclusively owned.
            drop(unsafe { Box::from_raw(cell.get_mut()) });
        }
        self.rehashing.store(false, Ordering::Release);
        Err(SetError::RehashOverflow)
    }
}

impl<T, S, const B: usize> Drop for HashSet<T, S, B> {
    fn drop(&mut self) {
        let (modulus, base) = self.top.snapshot();
        // SAFETY: exclusive access; the live table was allocated by the
        // constructor or `rehash` and is owned solely by `self`. Buckets
        // sitting on reclamation logs are disjoint from it and are
        // reclaimed when the `qs` field drops right after.
        let mut cells =
            unsafe { Box::from_raw(core::ptr::slice_from_raw_parts_mut(base, modulus)) };
        for cell in cells.iter_mut() {
            // SAFETY: each live cell owns its bucket.
            drop(unsafe { Box::from_raw(cell.get_mut()) });
        }
    }
}
