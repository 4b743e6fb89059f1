//! A single writer inserting while readers walk the table. Readers must
//! never observe a torn head or a half-written row, including across the
//! remaps the writer's growth triggers.

use std::sync::atomic::{AtomicBool, Ordering};

use chainstore::{MemoryMap, RecordHashTable};
use tempfile::tempdir;

const KEY_SIZE: usize = 8;
const VALUE_SIZE: usize = 8;
const INSERTS: u64 = 2000;

fn key(id: u64) -> [u8; KEY_SIZE] {
    id.to_le_bytes()
}

#[test]
fn readers_stay_consistent_during_inserts_and_growth() {
    let dir = tempdir().unwrap();

    // A tiny initial file so the writer forces many remaps underneath the
    // readers.
    let file = MemoryMap::create(dir.path().join("table.db"), 1).unwrap();
    let table = RecordHashTable::<KEY_SIZE>::new(&file, 64, VALUE_SIZE);
    table.create().unwrap();

    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let table = &table;
        let done = &done;

        for _ in 0..4 {
            scope.spawn(move || {
                let mut observed = 0u64;
                loop {
                    // One more full pass after the writer finishes, so the
                    // last iteration is guaranteed to see every insert.
                    let finished = done.load(Ordering::Acquire);
                    for id in 0..INSERTS {
                        if let Some(guard) = table.find(&key(id)) {
                            let value =
                                u64::from_le_bytes(guard.buffer()[..8].try_into().unwrap());
                            // A visible entry always carries its final value.
                            assert_eq!(value, id * 3);
                            observed += 1;
                        }
                    }
                    if finished {
                        break;
                    }
                }
                assert!(observed >= INSERTS);
            });
        }

        for id in 0..INSERTS {
            table
                .store(&key(id), |buffer| {
                    buffer.copy_from_slice(&(id * 3).to_le_bytes());
                })
                .unwrap();
        }
        done.store(true, Ordering::Release);
    });

    // Completed inserts are visible to lookups that start afterwards.
    for id in 0..INSERTS {
        let guard = table.find(&key(id)).unwrap();
        assert_eq!(
            u64::from_le_bytes(guard.buffer()[..8].try_into().unwrap()),
            id * 3
        );
    }
}
