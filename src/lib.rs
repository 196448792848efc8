//! Hazard pointer based concurrent memory reclamation and a sharded hash
//! table built on top of it.
//!
//! A difficult problem that has to be considered when implementing lock-free
//! collections or data structures is deciding, when a removed entry can be
//! safely deallocated.
//! It is usually not correct to deallocate removed entries right away, because
//! different threads might still hold references to such entries and could
//! consequently access already freed memory.
//!
//! The Hazard-pointer reclamation scheme was described by Maged M. Michael in
//! 2004 [[1]].
//! It requires every *read* of an entry from shared memory to be accompanied by
//! a global announcement marking the read entry as protected.
//! Removed entries are *retired* instead of being freed, and retired entries
//! are regularly reclaimed in bulk, skipping every entry that is still
//! protected by some hazard pointer.
//!
//! # Reclamation
//!
//! - [`Object`] is the header every reclaimable record starts with, records
//!   are retired through [`Object::retire`] or [`Domain::retire_boxed`].
//! - [`Domain`] owns all hazard pointer entries and retired records, a lazily
//!   initialized process-wide instance is returned by [`default_domain`].
//! - [`Hazptr`] is the RAII handle readers use to protect pointers loaded
//!   from shared atomics.
//!
//! Every domain sweeps after a configurable number of retirements.
//! Hosts with low retirement rates should additionally call
//! [`reclaim_default_domain`] from some periodic timer.
//!
//! # Hash table
//!
//! [`BucketTable`] is a fixed-size hash table whose readers never block and
//! whose writers serialize through a separately sized array of shard locks.
//! [`BasicCache`] wraps a table behind the [`Cache`] interface.
//!
//! [1]: https://dl.acm.org/citation.cfm?id=987595

#![warn(missing_docs)]

mod basic_cache;
mod cache;
mod config;
mod domain;
mod entry;
mod error;
mod hazptr;
mod object;
mod queue;
mod table;

pub use crate::basic_cache::{BasicCache, Cache};
pub use crate::config::{Config, ConfigBuilder, ConfigError, CONFIG};
pub use crate::domain::{default_domain, reclaim_default_domain, Domain};
pub use crate::error::Error;
pub use crate::hazptr::Hazptr;
pub use crate::object::{deleters, Deleter, Object, Reclaimable};
pub use crate::table::BucketTable;

use core::sync::atomic::{self, Ordering};

/// The barrier readers issue between exposing a pointer and validating it.
#[inline]
fn light_barrier() {
    atomic::fence(Ordering::SeqCst);
}

/// The barrier a sweep issues before scanning the hazard pointers.
#[inline]
fn heavy_barrier() {
    atomic::fence(Ordering::SeqCst);
}

// The ThreadSanitizer can not correctly asses ordering restraints from explicit
// fences, so memory operations around such fences need stricter ordering than
// `Relaxed`, when instrumentation is chosen.

cfg_if::cfg_if! {
    if #[cfg(feature = "sanitize-threads")] {
        mod sanitize {
            use core::sync::atomic::Ordering;

            pub const RELAXED_LOAD: Ordering = Ordering::Acquire;

            pub const RELEASE_SUCCESS: Ordering = Ordering::AcqRel;
            pub const RELEASE_FAIL: Ordering = Ordering::Acquire;
        }
    } else {
        mod sanitize {
            use core::sync::atomic::Ordering;

            pub const RELAXED_LOAD: Ordering = Ordering::Relaxed;

            pub const RELEASE_SUCCESS: Ordering = Ordering::Release;
            pub const RELEASE_FAIL: Ordering = Ordering::Relaxed;
        }
    }
}
