//! A simple lock-free stack that uses *compare-and-swap* to insert elements at
//! the head and *swap* (exchange) to consume all elements at once, thereby not
//! requiring any dedicated memory reclamation mechanism.
//!
//! This is the shape of every domain's list of retired records: any thread
//! may push, the sweeping thread takes the entire list and becomes its sole
//! owner.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::Backoff;

use crate::sanitize;

////////////////////////////////////////////////////////////////////////////////////////////////////
// RawNode (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A trait for node types that contain `next` pointers and can be accessed
/// through raw pointers.
pub(crate) trait RawNode {
    /// Returns the `node`'s next pointer.
    ///
    /// # Safety
    ///
    /// The caller has to ensure `node` is a valid pointer to a node.
    unsafe fn next(node: *mut Self) -> *mut Self;

    /// Sets the `node`'s next pointer to `next`.
    ///
    /// # Safety
    ///
    /// The caller has to ensure `node` is a valid pointer to a node that is
    /// not concurrently linked into a queue by another thread.
    unsafe fn set_next(node: *mut Self, next: *mut Self);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RawQueue
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A concurrent linked-list based stack operating on raw pointers.
///
/// Elements are inserted at the front and can only be removed all at once by
/// returning the first node which contains a link to the next node and so on
/// and switching the queue to empty.
#[derive(Debug)]
pub(crate) struct RawQueue<N> {
    head: AtomicPtr<N>,
}

/********** impl inherent *************************************************************************/

impl<N> RawQueue<N> {
    /// Creates a new empty `RawQueue`.
    #[inline]
    pub const fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }
}

impl<N: RawNode> RawQueue<N> {
    /// Returns `true` if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(sanitize::RELAXED_LOAD).is_null()
    }

    /// Pushes `node` to the head of the queue.
    ///
    /// # Safety
    ///
    /// `node` must be non-null and valid (alive and not mutably aliased).
    #[inline]
    pub unsafe fn push(&self, node: *mut N) {
        self.push_many((node, node));
    }

    /// Pushes the sub-list formed by `first` and `last` to the head of the
    /// queue.
    ///
    /// # Safety
    ///
    /// `(first, last)` must form the head and the tail of a consecutively
    /// linked sub-list.
    /// Both must be non-null and valid.
    #[inline]
    pub unsafe fn push_many(&self, (first, last): (*mut N, *mut N)) {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Relaxed);
            N::set_next(last, head);

            // (QUE:1) this `Release` CAS synchronizes-with the `Acquire` swap in (QUE:2)
            if self.cas_head(head, first) {
                return;
            }

            backoff.spin();
        }
    }

    /// Swaps out the first node and leaves the `RawQueue` empty.
    ///
    /// The returned node (if it is non-`null`) effectively owns all following
    /// nodes and can deallocate or mutate them as desired.
    #[inline]
    pub fn take_all(&self) -> *mut N {
        // this avoids the swap if the queue is empty
        if self.is_empty() {
            return ptr::null_mut();
        }

        // (QUE:2) this `Acquire` swap synchronizes-with the `Release` CAS in (QUE:1)
        self.head.swap(ptr::null_mut(), Ordering::Acquire)
    }

    /// Same as take all, but without synchronization or ordering constraints.
    /// Requires exclusive access through the `&mut self` receiver.
    #[inline]
    pub fn take_all_unsync(&mut self) -> *mut N {
        self.head.swap(ptr::null_mut(), Ordering::Relaxed)
    }

    #[inline]
    unsafe fn cas_head(&self, current: *mut N, new: *mut N) -> bool {
        self.head
            .compare_exchange_weak(
                current,
                new,
                sanitize::RELEASE_SUCCESS,
                sanitize::RELEASE_FAIL,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use super::{RawNode, RawQueue};

    struct Node {
        value: i32,
        next: *mut Node,
    }

    impl RawNode for Node {
        unsafe fn next(node: *mut Self) -> *mut Self {
            (*node).next
        }

        unsafe fn set_next(node: *mut Self, next: *mut Self) {
            (*node).next = next;
        }
    }

    fn node(value: i32) -> *mut Node {
        Box::into_raw(Box::new(Node { value, next: ptr::null_mut() }))
    }

    fn drain(mut curr: *mut Node) -> Vec<i32> {
        let mut values = Vec::new();
        while !curr.is_null() {
            let boxed = unsafe { Box::from_raw(curr) };
            values.push(boxed.value);
            curr = boxed.next;
        }

        values
    }

    #[test]
    fn push_and_take_all() {
        let queue = RawQueue::<Node>::new();
        assert!(queue.is_empty());
        assert!(queue.take_all().is_null());

        unsafe {
            queue.push(node(1));
            queue.push(node(2));
            queue.push(node(3));
        }

        assert!(!queue.is_empty());
        assert_eq!(drain(queue.take_all()), vec![3, 2, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn push_many() {
        let mut queue = RawQueue::new();
        let (first, last) = (node(1), node(2));
        unsafe {
            Node::set_next(first, last);
            queue.push(node(0));
            queue.push_many((first, last));
        }

        assert_eq!(drain(queue.take_all_unsync()), vec![1, 2, 0]);
    }
}
