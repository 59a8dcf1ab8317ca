//! Durgun: lock-free Quiescent-State-Based Reclamation (QSBR).
//!
//! Durgun lets lock-free readers dereference pointers they observed
//! without risking use-after-free when writers publish replacements.
//! Writers unlink an object, hand it to the engine with [`Qsbr::defer`],
//! and every participating thread periodically announces a quiescent
//! state with [`Qsbr::quiescent`], a point at which it holds no pointers
//! into the shared structure. Once all registered threads have announced
//! within an epoch, the entries deferred two epochs ago are reclaimed.
//!
//! # Architecture
//!
//! - **Reclamation log** ([`MpscQueue`]): an unbounded multi-producer
//!   single-consumer queue. Any thread pushes; only the epoch rotator pops.
//! - **Engine** ([`Qsbr`]): registration counter, per-thread quiescent
//!   bitmask, and two logs whose roles swap each epoch.
//! - **Entries** ([`Retired`]): a type-erased pointer/deleter pair. The
//!   deleter runs when the entry is drained.
//!
//! # Example
//!
//! ```rust
//! use durgun::{Qsbr, Retired};
//!
//! let qs = Qsbr::new();
//! let tid = qs.register_thread().unwrap();
//!
//! // A writer unlinked this allocation from a shared structure.
//! let stale = Box::into_raw(Box::new(42u64));
//! // SAFETY: `stale` is uniquely owned and no longer reachable by new readers.
//! unsafe { qs.defer(Retired::boxed(stale)) };
//!
//! // Reclaimed after every registered thread passes a quiescent state twice.
//! qs.quiescent(tid);
//! qs.quiescent(tid);
//! ```
//!
//! # Limits
//!
//! At most 64 threads may register with one engine, and registration must
//! finish before the first quiescent announcement. The engine does not
//! bound reclamation latency: a registered thread that stops announcing
//! stalls epoch rotation (entries accumulate, but no operation blocks).

#![warn(missing_docs)]

mod error;
mod mpsc;
mod qsbr;
mod retired;

pub use error::QsbrError;
pub use mpsc::MpscQueue;
pub use qsbr::{MAX_THREADS, Qsbr};
pub use retired::Retired;
