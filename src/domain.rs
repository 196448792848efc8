//! Hazard pointer domains: the registry of all hazard pointer entries and the
//! list of retired records that are waiting to be reclaimed.
//!
//! # Scan and sweep
//!
//! A sweep takes the entire list of retired records at once, so that records
//! retired concurrently are left for a later sweep.
//! It then collects every pointer currently protected by an active entry
//! into a sorted scan cache and destroys every taken record whose address is
//! not found within it.
//! Records that are still protected are pushed back for the next sweep.
//! There is no bound on how often a record may be pushed back, reclamation
//! is best-effort.

use core::ptr::{self, NonNull};
use core::sync::atomic::{self, AtomicUsize, Ordering};

use conquer_once::Lazy;

use crate::config::{Config, CONFIG};
use crate::entry::{Entry, EntryList};
use crate::object::{deleters, Object, Reclaimable};
use crate::queue::{RawNode, RawQueue};
use crate::sanitize;

/// The process-wide default domain, initialized on first use and never torn
/// down.
static DEFAULT_DOMAIN: Lazy<Domain> = Lazy::new(|| {
    let config = CONFIG.try_get().ok().copied().unwrap_or_default();
    tracing::debug!(scan_threshold = config.scan_threshold(), "initializing default domain");
    Domain::with_config(config)
});

/// Returns the process-wide default domain.
#[inline]
pub fn default_domain() -> &'static Domain {
    &DEFAULT_DOMAIN
}

/// Runs a sweep over the default domain and returns the number of reclaimed
/// records.
///
/// This is the entry point for a periodic host timer (e.g. every 100 ms), so
/// that records are eventually reclaimed even when hardly anything is
/// retired.
/// It can be called at any time from any thread.
#[inline]
pub fn reclaim_default_domain() -> usize {
    default_domain().reclaim_best_effort()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Domain
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A set of hazard pointer entries together with the records retired into
/// it.
///
/// Hazard pointers of one domain never protect records retired into another.
#[derive(Debug)]
pub struct Domain {
    entries: EntryList,
    retired: RawQueue<Object>,
    /// The number of records currently in `retired` (or taken by a sweep).
    retired_len: AtomicUsize,
    /// The number of calls to `retire`, every `scan_threshold`-th call sweeps.
    retire_count: AtomicUsize,
    config: Config,
}

/********** impl Default **************************************************************************/

impl Default for Domain {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl inherent *************************************************************************/

impl Domain {
    /// Creates a new domain with the default configuration.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a new domain with the given `config`.
    #[inline]
    pub fn with_config(config: Config) -> Self {
        Self {
            entries: EntryList::new(),
            retired: RawQueue::new(),
            retired_len: AtomicUsize::new(0),
            retire_count: AtomicUsize::new(0),
            config,
        }
    }

    /// Returns the domain's configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the number of hazard pointer entries allocated by this domain.
    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of retired records that have not yet been
    /// reclaimed.
    #[inline]
    pub fn retired_count(&self) -> usize {
        self.retired_len.load(Ordering::Relaxed)
    }

    /// Retires the boxed record at `record`.
    ///
    /// # Safety
    ///
    /// `record` must have been allocated through `Box` (or the global
    /// allocator with the layout of `T`), must not be retired already and
    /// it must be impossible for any thread to obtain a new reference to it.
    #[inline]
    pub unsafe fn retire_boxed<T: Reclaimable + 'static>(&self, record: NonNull<T>) {
        Object::retire(T::as_object(record), deleters::drop_boxed::<T>, self);
    }

    /// Acquires an entry for the exclusive use of the caller.
    ///
    /// The list is traversed from the head for a free entry, a new one is
    /// allocated and prepended only if all entries are in use.
    #[inline]
    pub(crate) fn get_entry(&self) -> &Entry {
        self.entries.acquire()
    }

    /// Returns an entry acquired through [`get_entry`][Domain::get_entry].
    #[inline]
    pub(crate) fn put_entry(&self, entry: &Entry) {
        entry.release();
    }

    /// Pushes a prepared `object` onto the retired list and sweeps on every
    /// `scan_threshold`-th call.
    #[inline]
    pub(crate) unsafe fn retire(&self, object: NonNull<Object>) {
        self.push_retired(object);

        let mask = self.config.scan_mask();
        if self.retire_count.fetch_add(1, Ordering::Relaxed) & mask == mask {
            self.reclaim_best_effort();
        }
    }

    /// Pushes a prepared `object` onto the retired list and sweeps
    /// immediately.
    #[inline]
    pub(crate) unsafe fn reclaim(&self, object: NonNull<Object>) {
        self.push_retired(object);
        self.reclaim_best_effort();
    }

    /// Attempts to reclaim all records retired so far and returns the number
    /// of records that were actually reclaimed.
    ///
    /// Calling this any number of times, concurrently with any other
    /// operation, is always safe.
    pub fn reclaim_best_effort(&self) -> usize {
        // (DOM:1) this `Acquire` swap synchronizes-with the `Release` CAS in (QUE:1), so every
        // taken record is fully retired
        let taken = self.retired.take_all();
        if taken.is_null() {
            return 0;
        }

        // (DOM:2) this `SeqCst` fence synchronizes-with the `SeqCst` stores (ENT:2) and fences
        // in `Hazptr::try_keep` and enforces a total order between them, so every protection
        // that was in place before the records were unlinked is visible to the scan below
        crate::heavy_barrier();

        let mut scan_cache = Vec::new();
        self.collect_protected(&mut scan_cache);
        scan_cache.sort_unstable();

        let (reclaimed, requeued) = unsafe { self.reclaim_unprotected(taken, &scan_cache) };
        self.retired_len.fetch_sub(reclaimed, Ordering::Relaxed);

        tracing::trace!(reclaimed, requeued, protected = scan_cache.len(), "hazard pointer sweep");
        reclaimed
    }

    #[inline]
    fn push_retired(&self, object: NonNull<Object>) {
        self.retired_len.fetch_add(1, Ordering::Relaxed);
        unsafe { self.retired.push(object.as_ptr()) };
    }

    #[inline]
    fn collect_protected(&self, scan_cache: &mut Vec<*mut ()>) {
        for entry in self.entries.iter() {
            if entry.is_active(sanitize::RELAXED_LOAD) {
                let protected = entry.protected(sanitize::RELAXED_LOAD);
                if !protected.is_null() {
                    scan_cache.push(protected);
                }
            }
        }

        // (DOM:3) this `Acquire` fence synchronizes-with the `Release` stores (ENT:1) and (ENT:3)
        // of every cleared entry observed above
        atomic::fence(Ordering::Acquire);
    }

    /// Destroys every record in the list starting at `curr` that is not
    /// contained in the (sorted) `scan_cache` and pushes back all others.
    ///
    /// Returns the number of reclaimed and pushed back records.
    unsafe fn reclaim_unprotected(
        &self,
        mut curr: *mut Object,
        scan_cache: &[*mut ()],
    ) -> (usize, usize) {
        // these pointers form the list of unreclaimed records that need to be pushed back
        let (mut first, mut last): (*mut Object, *mut Object) = (ptr::null_mut(), ptr::null_mut());
        let (mut reclaimed, mut requeued) = (0, 0);

        while !curr.is_null() {
            // `next` must be read HERE because `curr` may be de-allocated in the next step
            let next = Object::next(curr);
            match scan_cache.binary_search(&(curr as *mut ())) {
                // the record is still protected by some hazard pointer
                Ok(_) => {
                    if first.is_null() {
                        first = curr;
                    } else {
                        Object::set_next(last, curr);
                    }

                    last = curr;
                    requeued += 1;
                }
                Err(_) => {
                    Object::destroy_self(NonNull::new_unchecked(curr));
                    reclaimed += 1;
                }
            }

            curr = next;
        }

        if !first.is_null() {
            self.retired.push_many((first, last));
        }

        (reclaimed, requeued)
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for Domain {
    #[inline(never)]
    fn drop(&mut self) {
        // a domain can only be dropped when no hazard pointer borrows it anymore, so all remaining
        // records can be simply destroyed
        let mut curr = self.retired.take_all_unsync();
        while !curr.is_null() {
            unsafe {
                let next = Object::next(curr);
                Object::destroy_self(NonNull::new_unchecked(curr));
                curr = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;
    use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::config::Config;
    use crate::hazptr::Hazptr;
    use crate::object::Object;

    use super::Domain;

    #[repr(C)]
    struct DropCount {
        object: Object,
        count: Arc<AtomicUsize>,
    }

    unsafe impl crate::Reclaimable for DropCount {}

    impl Drop for DropCount {
        fn drop(&mut self) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record(count: &Arc<AtomicUsize>) -> NonNull<DropCount> {
        let boxed = Box::new(DropCount { object: Object::new(), count: Arc::clone(count) });
        NonNull::from(Box::leak(boxed))
    }

    #[test]
    fn retire_threshold() {
        let domain = Domain::with_config(Config::with_params(16).unwrap());
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..15 {
            unsafe { domain.retire_boxed(record(&count)) };
        }

        // nothing has been reclaimed so far
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert_eq!(domain.retired_count(), 15);

        // retire another record, triggering a sweep which reclaims all records
        unsafe { domain.retire_boxed(record(&count)) };
        assert_eq!(count.load(Ordering::Relaxed), 16);
        assert_eq!(domain.retired_count(), 0);
    }

    #[test]
    fn protected_records_are_requeued() {
        let domain = Domain::new();
        let count = Arc::new(AtomicUsize::new(0));

        let protected = record(&count);
        let atomic = AtomicPtr::new(protected.as_ptr());

        let mut hazptr = Hazptr::in_domain(&domain);
        assert_eq!(hazptr.keep(&atomic), protected.as_ptr());

        atomic.store(std::ptr::null_mut(), Ordering::Relaxed);
        unsafe {
            domain.retire_boxed(protected);
            domain.retire_boxed(record(&count));
        }

        // only the unprotected record can be reclaimed
        assert_eq!(domain.reclaim_best_effort(), 1);
        assert_eq!(domain.retired_count(), 1);
        assert_eq!(unsafe { protected.as_ref() }.count.load(Ordering::Relaxed), 1);

        // still protected, the record is requeued again
        assert_eq!(domain.reclaim_best_effort(), 0);

        hazptr.clear();
        assert_eq!(domain.reclaim_best_effort(), 1);
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(domain.retired_count(), 0);
    }

    #[test]
    fn empty_sweep() {
        let domain = Domain::new();
        assert_eq!(domain.reclaim_best_effort(), 0);
        assert_eq!(domain.entry_count(), 0);
    }

    #[test]
    fn entries_are_recycled() {
        let domain = Domain::new();
        {
            let _a = Hazptr::in_domain(&domain);
            let _b = Hazptr::in_domain(&domain);
            assert_eq!(domain.entry_count(), 2);
        }

        let _c = Hazptr::in_domain(&domain);
        assert_eq!(domain.entry_count(), 2);
    }

    #[test]
    fn drop_reclaims_remaining() {
        let domain = Domain::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            unsafe { domain.retire_boxed(record(&count)) };
        }

        drop(domain);
        assert_eq!(count.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn default_domain_is_shared() {
        assert!(std::ptr::eq(super::default_domain(), super::default_domain()));
        // safe to call at any time, even when nothing was ever retired
        let _ = super::reclaim_default_domain();
    }
}
