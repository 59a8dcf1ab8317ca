//! Tagged-pointer words: the per-bucket cell with its low-bit lock, and
//! the packed top word publishing `(log2(M), array)` as one unit.

use crate::bucket::Bucket;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Low bit of a bucket-pointer cell. While set, every writer CAS against
/// the cell fails because the expected value is an unlocked word.
const LOCK_BIT: usize = 0b1;

/// Bit position of the log2(modulus) field in the top word.
const MOD_SHIFT: u32 = 48;

/// Low 48 bits: the array base pointer.
const PTR_MASK: u64 = (1 << MOD_SHIFT) - 1;

/// An atomic word holding a bucket pointer whose low bit is the rehash
/// lock flag. Bucket allocations are at least 8-byte aligned, so the bit
/// is free for tagging.
pub(crate) struct BucketCell<T, const B: usize> {
    word: AtomicUsize,
    _marker: PhantomData<*mut Bucket<T, B>>,
}

// SAFETY: the cell is a tagged atomic word; the buckets it points at are
// immutable once published and reclaimed through QSBR.
unsafe impl<T: Send, const B: usize> Send for BucketCell<T, B> {}
// SAFETY: see above.
unsafe impl<T: Send, const B: usize> Sync for BucketCell<T, B> {}

impl<T, const B: usize> BucketCell<T, B> {
    pub(crate) fn new(bucket: *mut Bucket<T, B>) -> Self {
        debug_assert_eq!(bucket as usize & LOCK_BIT, 0);
        Self {
            word: AtomicUsize::new(bucket as usize),
            _marker: PhantomData,
        }
    }

    /// The payload pointer, ignoring the lock bit. In-flight rehashing is
    /// transparent to readers of the bucket contents.
    pub(crate) fn load(&self) -> *mut Bucket<T, B> {
        (self.word.load(Ordering::Acquire) & !LOCK_BIT) as *mut Bucket<T, B>
    }

    /// Sets the lock bit and returns the payload that was current at that
    /// instant. Any writer CAS issued afterwards observes a locked word
    /// and fails; the rehasher owns the returned bucket's contents.
    pub(crate) fn lock(&self) -> *mut Bucket<T, B> {
        (self.word.fetch_or(LOCK_BIT, Ordering::AcqRel) & !LOCK_BIT) as *mut Bucket<T, B>
    }

    /// Clears the lock bit, restoring the cell to writer CAS traffic.
    /// Only the rehash abort path uses this; a completed rehash retires
    /// the whole array with the bits still set.
    pub(crate) fn unlock(&self) {
        self.word.fetch_and(!LOCK_BIT, Ordering::Release);
    }

    /// Publishes `new` if the cell still holds `current` unlocked.
    pub(crate) fn publish(
        &self,
        current: *mut Bucket<T, B>,
        new: *mut Bucket<T, B>,
    ) -> Result<(), ()> {
        self.word
            .compare_exchange(
                current as usize,
                new as usize,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| ())
    }

    /// The payload pointer under exclusive access (table construction,
    /// rehash redistribution into a not-yet-published array, drop).
    pub(crate) fn get_mut(&mut self) -> *mut Bucket<T, B> {
        (*self.word.get_mut() & !LOCK_BIT) as *mut Bucket<T, B>
    }
}

/// The packed top word: a single atomic publishing the bucket-array
/// pointer and its modulus together.
///
/// ```text
/// bits 63..56   zero
/// bits 55..48   log2(M), 1..=63
/// bits 47..0    array base pointer
/// ```
///
/// Packing both fields into one word makes the `(M, array)` pair readable
/// with a single acquire load, so a reader can never see a new modulus
/// with an old array or vice versa. The pointer field relies on 48-bit
/// user-space virtual addresses, which `publish` asserts.
pub(crate) struct Top<T, const B: usize> {
    word: AtomicU64,
    _marker: PhantomData<*mut BucketCell<T, B>>,
}

// SAFETY: a packed atomic word over pointers managed by the set.
unsafe impl<T: Send, const B: usize> Send for Top<T, B> {}
// SAFETY: see above.
unsafe impl<T: Send, const B: usize> Sync for Top<T, B> {}

impl<T, const B: usize> Top<T, B> {
    pub(crate) fn new(cells: *mut BucketCell<T, B>, modulus: usize) -> Self {
        let top = Self {
            word: AtomicU64::new(0),
            _marker: PhantomData,
        };
        top.publish(cells, modulus);
        top
    }

    /// Atomically publishes `(log2(modulus), cells)`.
    pub(crate) fn publish(&self, cells: *mut BucketCell<T, B>, modulus: usize) {
        debug_assert!(modulus.is_power_of_two() && modulus >= 2);
        debug_assert_eq!(cells as u64 & !PTR_MASK, 0, "pointer exceeds 48 bits");
        let packed = (u64::from(modulus.trailing_zeros()) << MOD_SHIFT) | cells as u64;
        self.word.store(packed, Ordering::Release);
    }

    /// The current `(modulus, cells)` pair, mutually consistent because
    /// both ride in one word.
    pub(crate) fn snapshot(&self) -> (usize, *mut BucketCell<T, B>) {
        let packed = self.word.load(Ordering::Acquire);
        let modulus = 1usize << (packed >> MOD_SHIFT);
        (modulus, (packed & PTR_MASK) as *mut BucketCell<T, B>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Cell = BucketCell<u64, 8>;

    #[test]
    fn lock_makes_publish_fail() {
        let a = Box::into_raw(Bucket::<u64, 8>::boxed());
        let b = Box::into_raw(Bucket::<u64, 8>::boxed());
        let cell = Cell::new(a);

        assert_eq!(cell.lock(), a);
        // The observed payload is still `a`, but the stored word carries
        // the lock bit, so a CAS expecting the unlocked word must fail.
        assert_eq!(cell.load(), a);
        assert!(cell.publish(a, b).is_err());

        cell.unlock();
        assert!(cell.publish(a, b).is_ok());
        assert_eq!(cell.load(), b);

        // SAFETY: test-local allocations, no concurrent access.
        unsafe {
            drop(Box::from_raw(a));
            drop(Box::from_raw(b));
        }
    }

    #[test]
    fn top_word_round_trips() {
        let cells: Box<[Cell]> = (0..16)
            .map(|_| Cell::new(core::ptr::null_mut()))
            .collect();
        let base = Box::into_raw(cells) as *mut Cell;

        let top = Top::<u64, 8>::new(base, 16);
        assert_eq!(top.snapshot(), (16, base));

        top.publish(base, 32);
        assert_eq!(top.snapshot(), (32, base));

        // SAFETY: reconstructing the boxed slice allocated above.
        drop(unsafe { Box::from_raw(core::ptr::slice_from_raw_parts_mut(base, 16)) });
    }
}
