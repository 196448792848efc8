//! A fixed-size concurrent hash table with lock-free readers.
//!
//! Every bucket is a singly linked list of nodes, newest first.
//! Readers traverse a bucket without taking any lock, protecting each node
//! with a hazard pointer before dereferencing it.
//! Writers serialize through an array of shard locks, which is sized
//! independently of the bucket array: the lock index is derived from the
//! bucket index, so every bucket is covered by exactly one lock.
//!
//! Nodes are never mutated once published, except for their `next` link.
//! Replacing a value means splicing in a new node and retiring the old one.
//!
//! # Unlinked nodes
//!
//! A writer marks the `next` link of every node it unlinks before retiring
//! it.
//! A reader that validates a marked link is standing on an unlinked node
//! whose successor may have been unlinked and retired after it, so it
//! restarts from the bucket's head instead of protecting that successor.

use std::alloc::{self, Layout};
use std::borrow::Borrow;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};

use crate::config::ConfigError;
use crate::domain::{default_domain, Domain};
use crate::error::Error;
use crate::hazptr::Hazptr;
use crate::object::{deleters, Object, Reclaimable};

const DEFAULT_BUCKETS: usize = 1024;
const DEFAULT_LOCKS: usize = 64;

/// The tag bit set in the `next` link of an unlinked node.
const UNLINKED: usize = 1;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Node
////////////////////////////////////////////////////////////////////////////////////////////////////

#[repr(C)]
pub(crate) struct Node<K, V> {
    object: Object,
    next: AtomicPtr<Node<K, V>>,
    hash: u64,
    key: K,
    value: V,
}

unsafe impl<K: Send, V: Send> Reclaimable for Node<K, V> {}

/********** impl inherent *************************************************************************/

impl<K, V> Node<K, V> {
    /// Allocates a new node, reporting allocation failure instead of
    /// aborting.
    #[inline]
    fn try_alloc(hash: u64, key: K, value: V, next: *mut Self) -> Result<NonNull<Self>, Error> {
        let layout = Layout::new::<Self>();
        // safety: `Node` is never zero-sized
        let ptr = unsafe { alloc::alloc(layout) } as *mut Self;
        match NonNull::new(ptr) {
            Some(node) => {
                let next = AtomicPtr::new(next);
                unsafe { node.as_ptr().write(Self { object: Object::new(), next, hash, key, value }) };
                Ok(node)
            }
            None => Err(Error::AllocFailed { size: layout.size() }),
        }
    }

    #[inline]
    fn matches<Q>(&self, hash: u64, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.hash == hash && self.key.borrow() == key
    }

    /// Marks the node's `next` link as unlinked.
    #[inline]
    fn mark_unlinked(&self) {
        let next = self.next.load(Ordering::Relaxed);
        // (TAB:1) this `Release` store happens-before the node is retired and therefore before
        // the `SeqCst` fence (DOM:2) of any sweep that might reclaim its successor
        self.next.store((next as usize | UNLINKED) as *mut _, Ordering::Release);
    }
}

#[inline]
fn is_unlinked<T>(ptr: *mut T) -> bool {
    ptr as usize & UNLINKED != 0
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Bucket
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The head of a singly linked list of nodes.
///
/// All mutating methods require the caller to hold the shard lock covering
/// the bucket.
pub(crate) struct Bucket<K, V> {
    head: AtomicPtr<Node<K, V>>,
}

/********** impl inherent *************************************************************************/

impl<K, V> Bucket<K, V> {
    #[inline]
    const fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Searches the bucket without locking and applies `f` to the value of
    /// the matching node.
    fn get_with<Q, F, R>(&self, domain: &Domain, hash: u64, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        F: FnOnce(&V) -> R,
    {
        let mut curr_hp = Hazptr::in_domain(domain);
        let mut next_hp = Hazptr::in_domain(domain);

        'restart: loop {
            let mut curr = curr_hp.keep(&self.head);
            // safety: `curr` is always protected by `curr_hp` and was reachable from the head
            while let Some(node) = unsafe { curr.as_ref() } {
                if node.matches(hash, key) {
                    return Some(f(&node.value));
                }

                let next = next_hp.keep(&node.next);
                if is_unlinked(next) {
                    continue 'restart;
                }

                mem::swap(&mut curr_hp, &mut next_hp);
                curr = next;
            }

            return None;
        }
    }

    /// Returns the link pointing at the node matching `key` and the node
    /// itself.
    #[inline]
    fn find<Q>(&self, hash: u64, key: &Q) -> Option<(&AtomicPtr<Node<K, V>>, NonNull<Node<K, V>>)>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut link = &self.head;
        loop {
            // the lock holder is the only one to modify links, so no hazard pointers are needed
            let node = NonNull::new(link.load(Ordering::Acquire))?;
            let node_ref = unsafe { &*node.as_ptr() };
            if node_ref.matches(hash, key) {
                return Some((link, node));
            }

            link = &node_ref.next;
        }
    }

    #[inline]
    fn push_front(&self, hash: u64, key: K, value: V) -> Result<(), Error> {
        let head = self.head.load(Ordering::Relaxed);
        let node = Node::try_alloc(hash, key, value, head)?;
        // (TAB:2) this `Release` store publishes the fully initialized node and synchronizes-with
        // the `Acquire` loads in `Hazptr::try_keep`
        self.head.store(node.as_ptr(), Ordering::Release);
        Ok(())
    }

    /// Replaces the node at `link` with a new node holding `value`.
    #[inline]
    unsafe fn replace(
        &self,
        domain: &Domain,
        link: &AtomicPtr<Node<K, V>>,
        old: NonNull<Node<K, V>>,
        key: K,
        value: V,
    ) -> Result<(), Error>
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let old_ref = old.as_ref();
        let next = old_ref.next.load(Ordering::Relaxed);
        let node = Node::try_alloc(old_ref.hash, key, value, next)?;
        link.store(node.as_ptr(), Ordering::Release);
        Self::retire_node(domain, old);
        Ok(())
    }

    #[inline]
    unsafe fn unlink(&self, domain: &Domain, link: &AtomicPtr<Node<K, V>>, node: NonNull<Node<K, V>>)
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let next = node.as_ref().next.load(Ordering::Relaxed);
        link.store(next, Ordering::Release);
        Self::retire_node(domain, node);
    }

    /// Retires every node and returns the number of retired nodes.
    fn clear(&self, domain: &Domain) -> usize
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let mut curr = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut retired = 0;
        while let Some(node) = NonNull::new(curr) {
            // the successor must be read before `node` is retired, which may reclaim it right away
            curr = unsafe { node.as_ref() }.next.load(Ordering::Relaxed);
            unsafe { Self::retire_node(domain, node) };
            retired += 1;
        }

        retired
    }

    /// Destroys every node right away and returns the number of destroyed
    /// nodes.
    fn reclaim(&mut self) -> usize {
        let mut curr = mem::replace(self.head.get_mut(), ptr::null_mut());
        let mut reclaimed = 0;
        while !curr.is_null() {
            let node = unsafe { Box::from_raw(curr) };
            curr = node.next.load(Ordering::Relaxed);
            reclaimed += 1;
        }

        reclaimed
    }

    #[inline]
    unsafe fn retire_node(domain: &Domain, node: NonNull<Node<K, V>>)
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        node.as_ref().mark_unlinked();
        Object::retire(Node::as_object(node), deleters::drop_boxed::<Node<K, V>>, domain);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// BucketTable
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A fixed-size concurrent hash table keyed by caller-supplied hashes.
///
/// Lookups never block, writers only block on the lock of their own shard.
/// The number of buckets and the number of shard locks are fixed at
/// construction, the table never grows.
///
/// Callers must always supply the same hash for equal keys.
pub struct BucketTable<K, V> {
    buckets: Box<[Bucket<K, V>]>,
    locks: Box<[CachePadded<Mutex<()>>]>,
    len: CachePadded<AtomicUsize>,
    domain: &'static Domain,
}

unsafe impl<K: Send + Sync, V: Send + Sync> Send for BucketTable<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for BucketTable<K, V> {}

/********** impl Default **************************************************************************/

impl<K, V> Default for BucketTable<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl Debug ****************************************************************************/

impl<K, V> fmt::Debug for BucketTable<K, V> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BucketTable")
            .field("len", &self.len())
            .field("buckets", &self.bucket_count())
            .field("locks", &self.lock_count())
            .finish()
    }
}

/********** impl inherent *************************************************************************/

impl<K, V> BucketTable<K, V> {
    /// Creates a new table with 1024 buckets and 64 shard locks in the
    /// default domain.
    #[inline]
    pub fn new() -> Self {
        Self::build(default_domain(), DEFAULT_BUCKETS, DEFAULT_LOCKS)
    }

    /// Creates a new table with the given number of buckets and shard locks
    /// in the default domain.
    ///
    /// # Errors
    ///
    /// Fails if either count is not a non-zero power of two.
    #[inline]
    pub fn with_shards(buckets: usize, locks: usize) -> Result<Self, ConfigError> {
        Self::with_domain(default_domain(), buckets, locks)
    }

    /// Creates a new table whose nodes are retired into `domain`.
    ///
    /// # Errors
    ///
    /// Fails if either count is not a non-zero power of two.
    #[inline]
    pub fn with_domain(
        domain: &'static Domain,
        buckets: usize,
        locks: usize,
    ) -> Result<Self, ConfigError> {
        check_shard_count("bucket", buckets)?;
        check_shard_count("lock", locks)?;
        Ok(Self::build(domain, buckets, locks))
    }

    /// Returns the number of entries, consistent with all completed writes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if the table contains no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of buckets.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the number of shard locks.
    #[inline]
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Returns the domain the table's nodes are retired into.
    #[inline]
    pub fn domain(&self) -> &'static Domain {
        self.domain
    }

    /// Destroys all entries right away.
    ///
    /// The exclusive borrow proves that no reader can be traversing the
    /// table, so nothing needs to be retired.
    pub fn reclaim(&mut self) {
        let reclaimed: usize = self.buckets.iter_mut().map(Bucket::reclaim).sum();
        *self.len.get_mut() = 0;
        tracing::trace!(reclaimed, "reclaimed all table entries");
    }

    fn build(domain: &'static Domain, buckets: usize, locks: usize) -> Self {
        tracing::debug!(buckets, locks, "building bucket table");
        Self {
            buckets: (0..buckets).map(|_| Bucket::new()).collect(),
            locks: (0..locks).map(|_| CachePadded::new(Mutex::new(()))).collect(),
            len: CachePadded::new(AtomicUsize::new(0)),
            domain,
        }
    }

    #[inline]
    fn bucket(&self, hash: u64) -> &Bucket<K, V> {
        &self.buckets[hash as usize & (self.buckets.len() - 1)]
    }

    /// Locks the shard covering the bucket of `hash`.
    ///
    /// The lock index is taken from the bucket index, so all writers of one
    /// bucket contend on the same lock even if there are more locks than
    /// buckets.
    #[inline]
    fn lock(&self, hash: u64) -> MutexGuard<'_, ()> {
        let bucket = hash as usize & (self.buckets.len() - 1);
        self.locks[bucket & (self.locks.len() - 1)].lock()
    }
}

impl<K, V> BucketTable<K, V>
where
    K: Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Returns a copy of the value for `key`.
    ///
    /// Lookups never block, but they are lock-free rather than wait-free: a
    /// lookup that finds itself on an unlinked node restarts from the head
    /// of the bucket.
    #[inline]
    pub fn get<Q>(&self, hash: u64, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        V: Clone,
    {
        self.get_with(hash, key, V::clone)
    }

    /// Applies `f` to the value for `key` while it is protected from
    /// reclamation.
    ///
    /// Like [`get`][BucketTable::get] this may restart its traversal if
    /// nodes on its path are erased concurrently.
    #[inline]
    pub fn get_with<Q, F, R>(&self, hash: u64, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        F: FnOnce(&V) -> R,
    {
        self.bucket(hash).get_with(self.domain, hash, key, f)
    }

    /// Returns `true` if the table contains `key`.
    #[inline]
    pub fn contains<Q>(&self, hash: u64, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.get_with(hash, key, |_| ()).is_some()
    }

    /// Inserts `key` with `value` if `key` is not yet present.
    ///
    /// Returns `false` and leaves the table unchanged if the key exists.
    ///
    /// # Errors
    ///
    /// Fails if the new node could not be allocated.
    pub fn insert(&self, hash: u64, key: K, value: V) -> Result<bool, Error> {
        let _shard = self.lock(hash);
        let bucket = self.bucket(hash);
        if bucket.find(hash, &key).is_some() {
            return Ok(false);
        }

        bucket.push_front(hash, key, value)?;
        self.len.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Removes `key` and returns `true` if it was present.
    ///
    /// The removed node is retired, concurrent readers may still use it.
    pub fn erase<Q>(&self, hash: u64, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let _shard = self.lock(hash);
        let bucket = self.bucket(hash);
        match bucket.find(hash, key) {
            Some((link, node)) => {
                unsafe { bucket.unlink(self.domain, link, node) };
                self.len.fetch_sub(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Returns a copy of the existing value for `key` or inserts `value` and
    /// returns `None`.
    ///
    /// # Errors
    ///
    /// Fails if the new node could not be allocated.
    pub fn get_or_insert(&self, hash: u64, key: K, value: V) -> Result<Option<V>, Error>
    where
        V: Clone,
    {
        let _shard = self.lock(hash);
        let bucket = self.bucket(hash);
        if let Some((_, node)) = bucket.find(hash, &key) {
            return Ok(Some(unsafe { node.as_ref() }.value.clone()));
        }

        bucket.push_front(hash, key, value)?;
        self.len.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Inserts `key` with `value` or replaces the existing value.
    ///
    /// Returns `true` if the key was newly inserted.
    /// An existing node is never modified, it is replaced by a new node and
    /// retired.
    ///
    /// # Errors
    ///
    /// Fails if the new node could not be allocated.
    pub fn insert_or_assign(&self, hash: u64, key: K, value: V) -> Result<bool, Error> {
        let _shard = self.lock(hash);
        let bucket = self.bucket(hash);
        match bucket.find(hash, &key) {
            Some((link, old)) => {
                unsafe { bucket.replace(self.domain, link, old, key, value)? };
                Ok(false)
            }
            None => {
                bucket.push_front(hash, key, value)?;
                self.len.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
        }
    }

    /// Removes and retires all entries.
    ///
    /// All shard locks are held for the duration, concurrent readers are
    /// unaffected.
    pub fn clear(&self) {
        let _shards: Vec<_> = self.locks.iter().map(|lock| lock.lock()).collect();
        let retired: usize = self.buckets.iter().map(|bucket| bucket.clear(self.domain)).sum();
        self.len.store(0, Ordering::Relaxed);
        tracing::trace!(retired, "cleared table");
    }
}

/********** impl Drop *****************************************************************************/

impl<K, V> Drop for BucketTable<K, V> {
    #[inline]
    fn drop(&mut self) {
        self.reclaim();
    }
}

#[inline]
fn check_shard_count(kind: &'static str, count: usize) -> Result<(), ConfigError> {
    if count.is_power_of_two() {
        Ok(())
    } else {
        Err(ConfigError::InvalidShardCount { kind, count })
    }
}
