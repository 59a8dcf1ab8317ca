//! Lock-free concurrent hash set with copy-on-write buckets and QSBR
//! reclamation.
//!
//! # Design
//!
//! - **Buckets**: fixed-capacity arrays of `(hash, key)` slots, immutable
//!   once published. Writers clone the bucket, mutate the clone, and
//!   CAS-swap the bucket pointer; the displaced bucket is retired through
//!   [`durgun`]'s QSBR engine and freed two epochs later.
//! - **Growth**: the table doubles in place. The rehasher freezes each
//!   bucket by tagging its pointer cell with a lock bit (every concurrent
//!   writer CAS then fails), redistributes into a fresh array of twice
//!   the size, and publishes the new `(log2(M), array)` pair with a
//!   single atomic store of the packed top word.
//! - **Reads**: one atomic load of the top word, one strip-locked bucket
//!   load, one linear scan. Readers participate in epoch progress by
//!   announcing a quiescent state on the way out, or opt out for a
//!   wait-free read and announce later.
//!
//! # Limits
//!
//! At most 64 threads per set, registered before the first operation.
//! The table never shrinks and the set has no iteration.

#![warn(missing_docs)]

mod bucket;
mod cell;
mod error;
mod set;

pub use durgun::QsbrError;
pub use error::SetError;
pub use set::HashSet;
