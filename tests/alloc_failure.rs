use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::ptr;

use matches::assert_matches;

use hazmap::{BucketTable, Error};

/// Fails every allocation made by a thread while its switch is set.
struct FailingAlloc;

thread_local! {
    static FAIL: Cell<bool> = const { Cell::new(false) };
}

unsafe impl GlobalAlloc for FailingAlloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if FAIL.try_with(Cell::get).unwrap_or(false) {
            return ptr::null_mut();
        }

        System.alloc(layout)
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static ALLOC: FailingAlloc = FailingAlloc;

fn without_memory<R>(f: impl FnOnce() -> R) -> R {
    FAIL.with(|fail| fail.set(true));
    let res = f();
    FAIL.with(|fail| fail.set(false));
    res
}

#[test]
fn failed_writes_leave_table_unchanged() {
    let table = BucketTable::with_shards(4, 2).unwrap();
    assert_eq!(table.insert(1, 1u64, 10u64), Ok(true));

    let (inserted, assigned, got) = without_memory(|| {
        (table.insert(2, 2, 20), table.insert_or_assign(1, 1, 11), table.get_or_insert(3, 3, 30))
    });

    assert_matches!(inserted, Err(Error::AllocFailed { size }) if size > 0);
    assert_matches!(assigned, Err(Error::AllocFailed { .. }));
    assert_matches!(got, Err(Error::AllocFailed { .. }));

    assert_eq!(table.len(), 1);
    assert_eq!(table.get(1, &1), Some(10));
    assert_eq!(table.get(2, &2), None);
    assert_eq!(table.get(3, &3), None);

    // the table keeps working once memory is available again
    assert_eq!(table.insert(2, 2, 20), Ok(true));
    assert_eq!(table.insert_or_assign(1, 1, 11), Ok(false));
    assert_eq!(table.get(1, &1), Some(11));
    assert_eq!(table.len(), 2);
}

#[test]
fn error_reports_requested_size() {
    let table = BucketTable::with_shards(1, 1).unwrap();
    let res = without_memory(|| table.insert(0, 0u64, [0u64; 16]));
    match res {
        Err(Error::AllocFailed { size }) => assert!(size >= 16 * 8),
        Ok(_) => panic!("insert must fail without memory"),
    }

    assert!(table.is_empty());
}
