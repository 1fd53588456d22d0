use kernel_alloc::phys_mapper::{PhysArena, PhysMemory};
use kernel_alloc::{AllocError, Page, PageAllocator, PageAllocatorConfig};
use kernel_memory_addresses::PhysicalAddress;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;

const BASE: u64 = 0x4000_0000;

fn allocator(pages: usize, cpus: usize) -> PageAllocator<PhysArena> {
    let arena = PhysArena::new(PhysicalAddress::new(BASE), pages);
    let config = PageAllocatorConfig {
        cpus,
        cow_tracking: true,
    };
    PageAllocator::from_arena(arena, config).unwrap()
}

fn slot(page: Page) -> usize {
    page.index_from(PhysicalAddress::new(BASE)) as usize
}

#[test]
fn cpus_never_hand_out_the_same_page_twice() {
    const PAGES: usize = 64;
    const CPUS: usize = 4;
    const ROUNDS: usize = 5_000;

    let pages = allocator(PAGES, CPUS);
    let owned: Vec<AtomicBool> = (0..PAGES).map(|_| AtomicBool::new(false)).collect();

    thread::scope(|s| {
        for cpu in 0..CPUS {
            let (pages, owned) = (&pages, &owned);
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(cpu as u64);
                let mut mine: Vec<Page> = Vec::new();
                for _ in 0..ROUNDS {
                    if mine.is_empty() || (mine.len() < 24 && rng.random_bool(0.55)) {
                        match pages.allocate(cpu) {
                            Ok(page) => {
                                let was_owned = owned[slot(page)].swap(true, Ordering::SeqCst);
                                assert!(!was_owned, "page {page} handed out twice");
                                mine.push(page);
                            }
                            Err(AllocError::OutOfMemory) => {}
                        }
                    } else {
                        let page = mine.swap_remove(rng.random_range(0..mine.len()));
                        owned[slot(page)].store(false, Ordering::SeqCst);
                        // Free on a random CPU to keep pages migrating.
                        pages.free(rng.random_range(0..CPUS), page);
                    }
                }
                for page in mine {
                    owned[slot(page)].store(false, Ordering::SeqCst);
                    pages.free(cpu, page);
                }
            });
        }
    });

    assert_eq!(pages.total_free(), PAGES);
    pages.check_invariants().unwrap();
}

#[test]
fn concurrent_writers_each_get_a_private_copy() {
    const OWNERS: usize = 6;

    let pages = allocator(16, OWNERS);
    let page = pages.allocate(0).unwrap();
    let original = unsafe { &mut *pages.memory().page_ptr(page) };
    original.fill(0xC0);
    for _ in 1..OWNERS {
        pages.share(page);
    }

    let barrier = Barrier::new(OWNERS);
    let results: Vec<Page> = thread::scope(|s| {
        let handles: Vec<_> = (0..OWNERS)
            .map(|cpu| {
                let (pages, barrier) = (&pages, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    pages.prepare_for_write(cpu, page).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // At most the last writer keeps the original; everyone else copied.
    let distinct: HashSet<Page> = results.iter().copied().collect();
    assert_eq!(distinct.len(), OWNERS);
    for &result in &results {
        assert_eq!(pages.refcount(result), Some(1));
        let bytes = unsafe { *pages.memory().page_ptr(result) };
        assert!(bytes.iter().all(|&b| b == 0xC0));
    }
    if !results.contains(&page) {
        assert_eq!(pages.refcount(page), Some(0));
    }

    for (cpu, result) in results.into_iter().enumerate() {
        pages.free(cpu, result);
    }
    assert_eq!(pages.total_free(), 16);
    pages.check_invariants().unwrap();
}
