//! Hazard pointer entries and the append-only registry a domain keeps them
//! in.

use core::iter::FusedIterator;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Entry
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A single hazard pointer slot.
///
/// An entry is `active` while it is owned by a thread (either by a live
/// `Hazptr` or a thread's entry cache) and its `ptr` is non-null only while a
/// `Hazptr` actually protects something through it.
/// Once allocated, an entry lives as long as its domain.
pub(crate) struct Entry {
    ptr: CachePadded<AtomicPtr<()>>,
    active: AtomicBool,
    next: AtomicPtr<Entry>,
}

/********** impl inherent *************************************************************************/

impl Entry {
    #[inline]
    fn new_active() -> Self {
        Self {
            ptr: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            active: AtomicBool::new(true),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Attempts to take ownership of a free entry.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        !self.active.load(Ordering::Relaxed)
            && self
                .active
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    /// Gives up ownership, the entry may be acquired by any thread afterwards.
    #[inline]
    pub fn release(&self) {
        self.ptr.store(ptr::null_mut(), Ordering::Release);
        // (ENT:1) this `Release` store synchronizes-with the `Acquire` CAS in `try_acquire`
        self.active.store(false, Ordering::Release);
    }

    /// Publishes `ptr` as protected.
    #[inline]
    pub fn expose(&self, ptr: *mut ()) {
        // (ENT:2) this `SeqCst` store synchronizes-with the `SeqCst` fence (DOM:2)
        self.ptr.store(ptr, Ordering::SeqCst);
    }

    /// Withdraws any protection without giving up ownership.
    #[inline]
    pub fn clear(&self) {
        // (ENT:3) this `Release` store ensures all reads through the previously protected pointer
        // happen before the pointed-to record can be reclaimed
        self.ptr.store(ptr::null_mut(), Ordering::Release);
    }

    /// Returns the currently protected pointer, which may be null.
    #[inline]
    pub fn protected(&self, order: Ordering) -> *mut () {
        self.ptr.load(order)
    }

    #[inline]
    pub fn is_active(&self, order: Ordering) -> bool {
        self.active.load(order)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// EntryList
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Linked list of all entries ever allocated by a domain.
///
/// Entries are only ever prepended and are never unlinked, so traversing the
/// list requires no protection.
#[derive(Debug)]
pub(crate) struct EntryList {
    head: AtomicPtr<Entry>,
    len: AtomicUsize,
}

/********** impl inherent *************************************************************************/

impl EntryList {
    /// Creates a new empty list.
    #[inline]
    pub const fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()), len: AtomicUsize::new(0) }
    }

    /// Returns the number of entries allocated so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        // (LIS:1) this `Acquire` load synchronizes-with the `Release` CAS (LIS:2)
        Iter { current: unsafe { self.head.load(Ordering::Acquire).as_ref() } }
    }

    /// Acquires a free entry or allocates a new one if all are in use.
    #[inline]
    pub fn acquire(&self) -> &Entry {
        match self.iter().find(|entry| entry.try_acquire()) {
            Some(entry) => entry,
            None => self.insert_front(),
        }
    }

    #[cold]
    fn insert_front(&self) -> &Entry {
        let entry = Box::leak(Box::new(Entry::new_active()));
        let backoff = Backoff::new();

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            entry.next.store(head, Ordering::Relaxed);
            // (LIS:2) this `Release` CAS publishes the new entry and synchronizes-with the
            // `Acquire` loads (LIS:1) and (LIS:3)
            match self.head.compare_exchange_weak(
                head,
                entry,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => {
                    head = actual;
                    backoff.spin();
                }
            }
        }

        let len = self.len.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(entries = len, "allocated new hazard pointer entry");
        entry
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for EntryList {
    #[inline]
    fn drop(&mut self) {
        // `Relaxed` ordering is sufficient here because no other threads have access during `drop`
        let mut curr = self.head.load(Ordering::Relaxed);
        while !curr.is_null() {
            let entry = unsafe { Box::from_raw(curr) };
            curr = entry.next.load(Ordering::Relaxed);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Iter
////////////////////////////////////////////////////////////////////////////////////////////////////

pub(crate) struct Iter<'a> {
    current: Option<&'a Entry>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Entry;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let next = self.current.take();
        if let Some(entry) = next {
            // (LIS:3) this `Acquire` load synchronizes-with the `Release` CAS (LIS:2)
            self.current = unsafe { entry.next.load(Ordering::Acquire).as_ref() };
        }

        next
    }
}

impl FusedIterator for Iter<'_> {}
