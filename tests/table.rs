use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use hazmap::{BucketTable, Config, Domain};

fn hash(key: &str) -> u64 {
    key.bytes().fold(0xCBF2_9CE4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01B3)
    })
}

#[test]
fn insert_get_erase() {
    let table = BucketTable::new();
    let h = hash("a");

    assert_eq!(table.insert(h, "a", 1), Ok(true));
    // an insert never overwrites an existing entry
    assert_eq!(table.insert(h, "a", 2), Ok(false));
    assert_eq!(table.get(h, &"a"), Some(1));
    assert_eq!(table.insert_or_assign(h, "a", 2), Ok(false));
    assert_eq!(table.get(h, &"a"), Some(2));

    assert!(table.erase(h, &"a"));
    assert_eq!(table.get(h, &"a"), None);
    assert!(!table.erase(h, &"a"));
    assert_eq!(table.len(), 0);
}

#[test]
fn get_or_insert() {
    let table = BucketTable::new();
    let h = hash("x");

    assert_eq!(table.get_or_insert(h, "x", 5), Ok(None));
    assert_eq!(table.get_or_insert(h, "x", 9), Ok(Some(5)));
    assert_eq!(table.get(h, &"x"), Some(5));
}

#[test]
fn clear_is_idempotent() {
    let table = BucketTable::with_shards(16, 4).unwrap();
    let keys: Vec<String> = (0..100).map(|i| format!("key-{}", i)).collect();
    for key in &keys {
        assert_eq!(table.insert(hash(key), key.clone(), key.len()), Ok(true));
    }

    assert_eq!(table.len(), 100);
    for _ in 0..2 {
        table.clear();
        assert_eq!(table.len(), 0);
        assert!(keys.iter().all(|key| !table.contains(hash(key), key.as_str())));
    }
}

#[test]
fn count_invariant() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 1_000;

    let table = Arc::new(BucketTable::with_shards(64, 8).unwrap());
    let inserted = Arc::new(AtomicUsize::new(0));
    let erased = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|id| {
            let table = Arc::clone(&table);
            let (inserted, erased) = (Arc::clone(&inserted), Arc::clone(&erased));
            thread::spawn(move || {
                // every thread owns a disjoint range of keys
                let keys = id * PER_THREAD..(id + 1) * PER_THREAD;
                for key in keys.clone() {
                    if table.insert(key as u64, key, key).unwrap() {
                        inserted.fetch_add(1, Ordering::Relaxed);
                    }
                }

                for key in keys.step_by(3) {
                    if table.erase(key as u64, &key) {
                        erased.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let (inserted, erased) = (inserted.load(Ordering::Relaxed), erased.load(Ordering::Relaxed));
    assert_eq!(inserted, THREADS * PER_THREAD);
    assert_eq!(table.len(), inserted - erased);
}

#[test]
fn readers_never_see_partial_values() {
    const READERS: usize = 4;

    let domain: &'static Domain =
        Box::leak(Box::new(Domain::with_config(Config::with_params(4).unwrap())));
    let table = Arc::new(BucketTable::with_domain(domain, 1, 1).unwrap());
    let barrier = Arc::new(Barrier::new(READERS + 1));
    let expected: Vec<u64> = (0..64).collect();

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            let expected = expected.clone();
            thread::spawn(move || {
                barrier.wait();
                loop {
                    match table.get(0, &"k") {
                        Some(value) => {
                            assert_eq!(value, expected);
                            break;
                        }
                        None => thread::yield_now(),
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    assert_eq!(table.insert(0, "k", expected), Ok(true));

    for reader in readers {
        reader.join().unwrap();
    }
}
