//! The intrusive header every reclaimable record starts with.
//!
//! A record that participates in reclamation embeds an [`Object`] as its
//! first field.
//! Once the record is unlinked from all shared data structures it is
//! *retired*: the header is pushed onto its domain's list of retired records
//! together with a type-erased [`Deleter`].
//! The domain later destroys the record by invoking that deleter, but only
//! after a scan has proven that no hazard pointer protects the record's
//! address.

use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::domain::Domain;
use crate::queue::RawNode;

/// State of the `next` link of an object that has not been retired yet.
const UNRETIRED: *mut Object = 1 as _;

/// The type-erased function that destroys a retired record.
///
/// It receives a pointer to the record's [`Object`] header, which by the
/// [`Reclaimable`] contract is also a pointer to the record itself.
pub type Deleter = unsafe fn(NonNull<Object>);

////////////////////////////////////////////////////////////////////////////////////////////////////
// Reclaimable (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Marker for record types that can be retired.
///
/// # Safety
///
/// The implementing type must be `#[repr(C)]` and contain an [`Object`] as
/// its **first** field, so that a pointer to the record and a pointer to its
/// header have the same address.
pub unsafe trait Reclaimable: Send + Sized {
    /// Returns the pointer to the header of the record at `record`.
    #[inline]
    fn as_object(record: NonNull<Self>) -> NonNull<Object> {
        record.cast()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Object
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The header of a reclaimable record.
pub struct Object {
    /// The link in the retired list, or `UNRETIRED` before retirement.
    next: AtomicPtr<Object>,
    /// Set exactly once right before the object is published as retired.
    deleter: UnsafeCell<Option<Deleter>>,
}

// the deleter is only written by the single thread that wins the retirement
// and only read by the thread that destroys the object
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

/********** impl Default **************************************************************************/

impl Default for Object {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for Object {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Object").field("retired", &self.is_retired()).finish()
    }
}

/********** impl inherent *************************************************************************/

impl Object {
    /// Creates a new header for a record that has not been retired.
    #[inline]
    pub const fn new() -> Self {
        Self { next: AtomicPtr::new(UNRETIRED), deleter: UnsafeCell::new(None) }
    }

    /// Returns `true` if the object has been handed to a domain.
    #[inline]
    pub fn is_retired(&self) -> bool {
        self.next.load(Ordering::Relaxed) != UNRETIRED
    }

    /// Retires the object, its destruction is deferred until no hazard
    /// pointer in `domain` protects it anymore.
    ///
    /// This never blocks and never destroys the object in place, although it
    /// may happen to run a sweep over the records retired earlier.
    ///
    /// # Panics
    ///
    /// Panics if the object has already been retired.
    ///
    /// # Safety
    ///
    /// `object` must be valid and it must be impossible for any thread to
    /// obtain a new reference to it after this call, e.g. because it has been
    /// unlinked before.
    /// `deleter` must be able to destroy the record `object` belongs to and
    /// must not access any non-`'static` data.
    #[inline]
    pub unsafe fn retire(object: NonNull<Self>, deleter: Deleter, domain: &Domain) {
        Self::prepare_retire(object, deleter);
        domain.retire(object);
    }

    /// Retires the object and forces an immediate sweep of `domain`.
    ///
    /// # Panics
    ///
    /// Panics if the object has already been retired.
    ///
    /// # Safety
    ///
    /// Same as [`retire`][Object::retire], and additionally no hazard pointer
    /// may currently protect the object.
    #[inline]
    pub unsafe fn reclaim(object: NonNull<Self>, deleter: Deleter, domain: &Domain) {
        Self::prepare_retire(object, deleter);
        domain.reclaim(object);
    }

    /// Invokes the deleter stored during retirement.
    ///
    /// # Safety
    ///
    /// Must be called at most once and only after the object has been removed
    /// from its domain's retired list and proven unprotected.
    #[inline]
    pub(crate) unsafe fn destroy_self(object: NonNull<Self>) {
        let deleter = (*object.as_ref().deleter.get()).take();
        debug_assert!(deleter.is_some(), "destroying an object that was never retired");
        if let Some(deleter) = deleter {
            deleter(object);
        }
    }

    #[inline]
    unsafe fn prepare_retire(object: NonNull<Self>, deleter: Deleter) {
        let this = object.as_ref();
        // claiming the link with a CAS also catches two threads retiring the
        // same object at once
        let res = this.next.compare_exchange(
            UNRETIRED,
            ptr::null_mut(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        assert!(res.is_ok(), "object retired twice");
        *this.deleter.get() = Some(deleter);
    }
}

/********** impl RawNode **************************************************************************/

impl RawNode for Object {
    #[inline]
    unsafe fn next(node: *mut Self) -> *mut Self {
        (*node).next.load(Ordering::Relaxed)
    }

    #[inline]
    unsafe fn set_next(node: *mut Self, next: *mut Self) {
        (*node).next.store(next, Ordering::Relaxed);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// deleters
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Common [`Deleter`] functions.
pub mod deleters {
    use core::ptr::NonNull;

    use super::{Object, Reclaimable};

    /// Drops a record that was allocated as a [`Box<T>`].
    ///
    /// # Safety
    ///
    /// `object` must be the header of a `T` allocated through `Box::new`
    /// (or the global allocator with the layout of `T`) that is no longer
    /// accessed by anyone else.
    #[inline]
    pub unsafe fn drop_boxed<T: Reclaimable>(object: NonNull<Object>) {
        drop(Box::from_raw(object.cast::<T>().as_ptr()));
    }
}
