//! Thread local cache of hazard pointer entries for the default domain.
//!
//! Entries stay reserved (active) while they are cached, so acquiring and
//! releasing hazard pointers in the common case never touches the shared
//! entry list at all.

use core::cell::UnsafeCell;

use arrayvec::ArrayVec;

use crate::domain::{default_domain, Domain};
use crate::entry::Entry;

const ENTRY_CACHE: usize = 8;

thread_local! {
    static LOCAL: UnsafeCell<EntryCache> = UnsafeCell::new(EntryCache::new(default_domain()));
}

/// Takes an entry from the current thread's cache or, if it is empty, from
/// the default domain.
#[inline]
pub(crate) fn get_entry() -> &'static Entry {
    LOCAL
        .try_with(|cache| unsafe { (*cache.get()).get() })
        .unwrap_or_else(|_| default_domain().get_entry())
}

/// Returns an entry to the current thread's cache or, if it is full or
/// already destroyed, to the default domain.
#[inline]
pub(crate) fn put_entry(entry: &'static Entry) {
    if LOCAL.try_with(|cache| unsafe { (*cache.get()).put(entry) }).is_err() {
        default_domain().put_entry(entry);
    }
}

/// Returns the number of entries cached by the current thread.
#[cfg(test)]
pub(crate) fn cached_entries() -> usize {
    LOCAL.with(|cache| unsafe { (*cache.get()).entries.len() })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// EntryCache
////////////////////////////////////////////////////////////////////////////////////////////////////

struct EntryCache {
    domain: &'static Domain,
    entries: ArrayVec<[&'static Entry; ENTRY_CACHE]>,
}

/********** impl inherent *************************************************************************/

impl EntryCache {
    #[inline]
    fn new(domain: &'static Domain) -> Self {
        Self { domain, entries: ArrayVec::new() }
    }

    #[inline]
    fn get(&mut self) -> &'static Entry {
        match self.entries.pop() {
            Some(entry) => entry,
            None => self.domain.get_entry(),
        }
    }

    #[inline]
    fn put(&mut self, entry: &'static Entry) {
        entry.clear();
        if let Err(err) = self.entries.try_push(entry) {
            self.domain.put_entry(err.element());
        }
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for EntryCache {
    #[cold]
    fn drop(&mut self) {
        // hand all reserved entries back to the domain when the thread exits
        for entry in self.entries.drain(..) {
            self.domain.put_entry(entry);
        }
    }
}
