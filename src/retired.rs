//! Type-erased reclamation entries.
//!
//! An entry pairs a raw pointer with the deleter that destroys it. The
//! deleter is a monomorphized drop function chosen at construction, so
//! the log stores a uniform type while reclaiming heterogeneous
//! allocations (buckets, bucket arrays, user payloads).

/// Type-erased deleter. `len` is meaningful only for slice entries.
type DropFn = unsafe fn(*mut u8, usize);

/// A deferred-reclamation entry: a pointer and the deleter that frees it.
///
/// The deleter runs when the entry is dropped, which the QSBR engine does
/// while draining a log whose epoch has expired. Entries own their
/// pointee from construction onward; leaking an entry leaks the pointee.
pub struct Retired {
    ptr: *mut u8,
    len: usize,
    drop_fn: DropFn,
}

// SAFETY: an entry is the unique owner of its pointee and is only ever
// consumed by running the deleter, which may happen on any thread.
unsafe impl Send for Retired {}

impl Retired {
    /// Entry that reclaims a `Box<T>` allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw` for this exact `T`, the entry
    /// must be the sole owner from this point on, and no thread may
    /// dereference `ptr` after the entry's epoch expires.
    pub unsafe fn boxed<T: 'static>(ptr: *mut T) -> Self {
        unsafe fn drop_boxed<T>(ptr: *mut u8, _len: usize) {
            // SAFETY: `boxed` stored a `Box<T>` allocation here.
            drop(unsafe { Box::from_raw(ptr as *mut T) });
        }
        Self {
            ptr: ptr.cast(),
            len: 0,
            drop_fn: drop_boxed::<T>,
        }
    }

    /// Entry that reclaims a `Box<[T]>` allocation of `len` elements.
    ///
    /// # Safety
    ///
    /// `ptr`/`len` must describe an allocation from `Box::<[T]>::into_raw`
    /// (thin data pointer plus element count), with the same ownership
    /// contract as [`Retired::boxed`].
    pub unsafe fn boxed_slice<T: 'static>(ptr: *mut T, len: usize) -> Self {
        unsafe fn drop_slice<T>(ptr: *mut u8, len: usize) {
            let slice = core::ptr::slice_from_raw_parts_mut(ptr as *mut T, len);
            // SAFETY: `boxed_slice` stored a `Box<[T]>` of `len` elements.
            drop(unsafe { Box::from_raw(slice) });
        }
        Self {
            ptr: ptr.cast(),
            len,
            drop_fn: drop_slice::<T>,
        }
    }
}

impl Drop for Retired {
    fn drop(&mut self) {
        // SAFETY: the constructor contracts make this the unique owner
        // and guarantee the pointer matches the deleter.
        unsafe { (self.drop_fn)(self.ptr, self.len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flagged(Arc<AtomicBool>);

    impl Drop for Flagged {
        fn drop(&mut self) {
            self.0.store(true, Ordering::Release);
        }
    }

    #[test]
    fn boxed_runs_destructor_on_drop() {
        let freed = Arc::new(AtomicBool::new(false));
        let ptr = Box::into_raw(Box::new(Flagged(freed.clone())));
        // SAFETY: `ptr` is a fresh Box allocation owned by the entry.
        let entry = unsafe { Retired::boxed(ptr) };
        assert!(!freed.load(Ordering::Acquire));
        drop(entry);
        assert!(freed.load(Ordering::Acquire));
    }

    #[test]
    fn boxed_slice_frees_all_elements() {
        let freed: Vec<Arc<AtomicBool>> =
            (0..4).map(|_| Arc::new(AtomicBool::new(false))).collect();
        let slice: Box<[Flagged]> = freed.iter().map(|f| Flagged(f.clone())).collect();
        let len = slice.len();
        let ptr = Box::into_raw(slice) as *mut Flagged;
        // SAFETY: thin pointer and length describe the boxed slice above.
        drop(unsafe { Retired::boxed_slice(ptr, len) });
        assert!(freed.iter().all(|f| f.load(Ordering::Acquire)));
    }
}
