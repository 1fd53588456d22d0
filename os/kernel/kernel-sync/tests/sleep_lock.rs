use kernel_sync::{SleepLock, ThreadContext};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

type Lock<T> = SleepLock<T, ThreadContext>;

#[test]
fn holding_tracks_the_current_context() {
    let l = Arc::new(Lock::new("payload", [0u8; 4]));
    assert!(!l.holding());

    let mut g = l.lock();
    g[0] = 9;
    assert!(l.holding());
    assert!(g.holding());

    // another context sees the lock taken but does not hold it
    let other = {
        let l = Arc::clone(&l);
        thread::spawn(move || (l.is_locked(), l.holding()))
    };
    assert_eq!(other.join().unwrap(), (true, false));

    drop(g);
    assert!(!l.holding());
    assert!(!l.is_locked());
}

#[test]
fn try_lock_fails_while_held_elsewhere() {
    let l = Arc::new(Lock::new("payload", 0u32));
    let g = l.lock();

    let attempt = {
        let l = Arc::clone(&l);
        thread::spawn(move || l.try_lock().is_none())
    };
    assert!(attempt.join().unwrap());
    drop(g);
}

#[test]
fn waiter_blocks_until_release() {
    let l = Arc::new(Lock::new("payload", 0u32));
    let acquired = Arc::new(AtomicBool::new(false));
    let ready = Arc::new(Barrier::new(2));

    let g = l.lock();
    let waiter = {
        let l = Arc::clone(&l);
        let acquired = Arc::clone(&acquired);
        let ready = Arc::clone(&ready);
        thread::spawn(move || {
            ready.wait();
            let mut g = l.lock();
            acquired.store(true, Ordering::SeqCst);
            *g += 1;
        })
    };

    ready.wait();
    thread::sleep(Duration::from_millis(20));
    assert!(!acquired.load(Ordering::SeqCst));

    drop(g);
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
    assert_eq!(*l.lock(), 1);
}

#[test]
#[should_panic(expected = "re-acquired by its holder")]
fn relocking_from_the_holder_is_fatal() {
    let l = Lock::new("payload", ());
    let _g = l.lock();
    let _again = l.lock();
}

#[test]
fn contended_updates_are_exclusive() {
    let threads = 6;
    let iters = 500;
    let lock = Arc::new(Lock::new("counter", 0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            thread::spawn(move || {
                for _ in 0..iters {
                    let mut g = lock.lock();
                    assert_eq!(in_cs.fetch_add(1, Ordering::SeqCst), 0);
                    *g += 1;
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.lock(), threads * iters);
}
