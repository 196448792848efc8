//! The reader side of the reclamation scheme.
//!
//! Protecting a pointer is a double check: the pointer is first loaded from
//! its source, then exposed in the hazard pointer's entry and finally loaded
//! again after a full fence.
//! If both loads agree, any sweep that starts afterwards sees the exposed
//! pointer and skips the record, and any record unlinked before the exposure
//! would have been noticed by the second load.
//! [`Hazptr::try_keep`] performs a single such attempt, [`Hazptr::keep`]
//! repeats it until it succeeds.

use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::cache;
use crate::domain::{default_domain, Domain};
use crate::entry::Entry;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Hazptr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A hazard pointer, the handle through which a reader protects a record
/// from reclamation.
///
/// As long as a `Hazptr` protects a pointer, the pointed-to record is not
/// destroyed, even if it is unlinked and retired in the meantime.
/// The protection is released when the `Hazptr` is cleared, re-used for
/// another pointer or dropped.
pub struct Hazptr<'d> {
    slot: Slot<'d>,
}

/// Where the entry came from and where it goes back to.
enum Slot<'d> {
    /// An entry of the default domain, recycled through the thread local
    /// cache.
    Cached(&'static Entry),
    /// An entry of some other domain.
    Owned(&'d Entry, &'d Domain),
}

/********** impl Default **************************************************************************/

impl Default for Hazptr<'static> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for Hazptr<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Hazptr").field("protected", &self.protected()).finish()
    }
}

/********** impl inherent *************************************************************************/

impl Hazptr<'static> {
    /// Creates a new hazard pointer in the default domain.
    #[inline]
    pub fn new() -> Self {
        Self { slot: Slot::Cached(cache::get_entry()) }
    }
}

impl<'d> Hazptr<'d> {
    /// Creates a new hazard pointer in the given `domain`.
    #[inline]
    pub fn in_domain(domain: &'d Domain) -> Self {
        if ptr::eq(domain, default_domain()) {
            Self { slot: Slot::Cached(cache::get_entry()) }
        } else {
            Self { slot: Slot::Owned(domain.get_entry(), domain) }
        }
    }

    /// Loads the pointer stored in `src` and protects it.
    ///
    /// This never fails, but may have to retry if `src` is changed
    /// concurrently.
    /// The returned pointer stays valid until `self` is cleared, re-used or
    /// dropped, provided every record stored in `src` is only ever retired
    /// into the domain of `self` after it was unlinked from `src`.
    /// A null pointer is returned unprotected.
    #[inline]
    pub fn keep<T>(&mut self, src: &AtomicPtr<T>) -> *mut T {
        let mut ptr = src.load(Ordering::Relaxed);
        while !self.try_keep(&mut ptr, src) {}
        ptr
    }

    /// Attempts to protect the candidate `ptr` previously loaded from `src`.
    ///
    /// Returns `true` if `src` still contains `ptr` after it was exposed, in
    /// which case it is protected.
    /// Otherwise, `ptr` is updated to the value currently stored in `src`,
    /// nothing is protected and `false` is returned.
    #[inline]
    pub fn try_keep<T>(&mut self, ptr: &mut *mut T, src: &AtomicPtr<T>) -> bool {
        let expected = *ptr;
        self.entry().expose(expected as *mut ());
        // (HAZ:1) this fence pairs with the heavy barrier (DOM:2) of any sweep, the exposure
        // above is thereby either seen by a sweep or the re-load below sees the unlink
        crate::light_barrier();

        let actual = src.load(Ordering::Acquire);
        if actual == expected {
            return true;
        }

        self.clear();
        *ptr = actual;
        false
    }

    /// Releases the current protection, the hazard pointer can be used again
    /// afterwards.
    #[inline]
    pub fn clear(&mut self) {
        self.entry().clear();
    }

    /// Returns the currently protected (untyped) pointer or null.
    #[inline]
    pub fn protected(&self) -> *mut () {
        self.entry().protected(Ordering::Relaxed)
    }

    #[inline]
    fn entry(&self) -> &Entry {
        match self.slot {
            Slot::Cached(entry) => entry,
            Slot::Owned(entry, _) => entry,
        }
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for Hazptr<'_> {
    #[inline]
    fn drop(&mut self) {
        match self.slot {
            Slot::Cached(entry) => cache::put_entry(entry),
            Slot::Owned(entry, domain) => domain.put_entry(entry),
        }
    }
}
