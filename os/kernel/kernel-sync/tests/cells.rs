use kernel_sync::{StaticCell, SyncOnceCell};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[test]
fn static_cell_is_handed_out_once() {
    static CELL: StaticCell<[u8; 16]> = StaticCell::new([0; 16]);

    assert!(!CELL.is_taken());
    let first = CELL.take().expect("first take succeeds");
    first[3] = 7;

    assert!(CELL.is_taken());
    assert!(CELL.take().is_none());
}

#[test]
fn static_cell_races_have_one_winner() {
    static CELL: StaticCell<u64> = StaticCell::new(0);
    static WINNERS: AtomicUsize = AtomicUsize::new(0);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            thread::spawn(|| {
                if let Some(v) = CELL.take() {
                    *v += 1;
                    WINNERS.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(WINNERS.load(Ordering::SeqCst), 1);
}

#[test]
fn once_cell_runs_the_initializer_once() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let cell = SyncOnceCell::new();

    assert!(cell.get().is_none());
    let a = *cell.get_or_init(|| {
        CALLS.fetch_add(1, Ordering::SeqCst);
        11
    });
    let b = *cell.get_or_init(|| {
        CALLS.fetch_add(1, Ordering::SeqCst);
        22
    });

    assert_eq!((a, b), (11, 11));
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(cell.get(), Some(&11));
}

#[test]
fn once_cell_set_keeps_the_first_value() {
    let cell = SyncOnceCell::new();
    assert_eq!(cell.set("first").copied(), Ok("first"));
    assert_eq!(cell.set("second"), Err("second"));
    assert_eq!(cell.get(), Some(&"first"));
}
