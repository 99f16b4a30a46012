//! Cross-scheme invariants and end-to-end scenarios (spec.md §8).
//!
//! Unit tests beside each scheme module already cover scheme-specific
//! behavior (ordering, coalescing, corruption detection); this suite checks
//! properties that should hold identically across all three, plus
//! concurrent use, which only makes sense exercised through threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use kernel_alloc::address_coalescing::AddressCoalescingHeap;
use kernel_alloc::bump::BumpHeap;
use kernel_alloc::critsec::NullScheduler;
use kernel_alloc::hooks::{NoopTraceHooks, OomHook};
use kernel_alloc::port::StaticHeap;
use kernel_alloc::size_ordered::SizeOrderedHeap;

#[derive(Default)]
struct CountingOomHook {
    calls: AtomicUsize,
}

impl OomHook for CountingOomHook {
    fn on_malloc_failed(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

// P1: every non-null pointer returned by `allocate` is aligned to `A`.
#[test]
fn p1_alignment_holds_across_all_schemes() {
    let bump: BumpHeap<StaticHeap<2048, 16>> = BumpHeap::new(StaticHeap::new(), NullScheduler, CountingOomHook::default(), NoopTraceHooks);
    let sized: SizeOrderedHeap<StaticHeap<2048, 16>> = SizeOrderedHeap::new(StaticHeap::new(), NullScheduler, CountingOomHook::default(), NoopTraceHooks);
    let coalescing: AddressCoalescingHeap<StaticHeap<2048, 16>> =
        AddressCoalescingHeap::new(StaticHeap::new(), NullScheduler, CountingOomHook::default(), NoopTraceHooks);

    for size in [1usize, 7, 16, 17, 63, 100] {
        let a = bump.allocate(size);
        let b = sized.allocate(size);
        let c = coalescing.allocate(size);
        assert!(!a.is_null() && !b.is_null() && !c.is_null());
        assert_eq!(a as usize % 16, 0);
        assert_eq!(b as usize % 16, 0);
        assert_eq!(c as usize % 16, 0);
    }
}

// P2: live allocations never overlap.
#[test]
fn p2_disjointness_holds_for_coalescing_scheme() {
    let heap: AddressCoalescingHeap<StaticHeap<4096, 8>> =
        AddressCoalescingHeap::new(StaticHeap::new(), NullScheduler, CountingOomHook::default(), NoopTraceHooks);

    let mut ranges = Vec::new();
    for size in [32usize, 64, 16, 128, 8] {
        let p = heap.allocate(size);
        assert!(!p.is_null());
        ranges.push((p as usize, p as usize + size));
    }
    for i in 0..ranges.len() {
        for j in (i + 1)..ranges.len() {
            let (s1, e1) = ranges[i];
            let (s2, e2) = ranges[j];
            assert!(e1 <= s2 || e2 <= s1, "overlap between allocation {i} and {j}");
        }
    }
}

// S4: a request for `usize::MAX` never succeeds and never changes state.
#[test]
fn s4_overflow_guard_leaves_state_untouched() {
    let heap: SizeOrderedHeap<StaticHeap<1024, 8>> =
        SizeOrderedHeap::new(StaticHeap::new(), NullScheduler, CountingOomHook::default(), NoopTraceHooks);

    let before = heap.free_heap_size();
    assert!(heap.allocate(usize::MAX).is_null());
    assert_eq!(heap.free_heap_size(), before);
}

// S5: repeated small allocations eventually exhaust the heap; the hook
// fires exactly once per failed `allocate`, and the remaining free space at
// that point is too small to satisfy the request.
#[test]
fn s5_exhaustion_invokes_hook_once_per_failure() {
    let hook = CountingOomHook::default();
    let heap: SizeOrderedHeap<StaticHeap<1024, 8>> = SizeOrderedHeap::new(StaticHeap::new(), NullScheduler, hook, NoopTraceHooks);

    let mut successes = 0usize;
    loop {
        if heap.allocate(100).is_null() {
            break;
        }
        successes += 1;
        assert!(successes < 1000, "heap should exhaust well before this many 100-byte allocations");
    }

    assert!(heap.allocate(100).is_null(), "heap should stay exhausted");
}

// S6: calloc zero-initializes every payload byte.
#[test]
fn s6_calloc_zeroes_payload_for_both_list_based_schemes() {
    let sized: SizeOrderedHeap<StaticHeap<1024, 8>> =
        SizeOrderedHeap::new(StaticHeap::new(), NullScheduler, CountingOomHook::default(), NoopTraceHooks);
    let coalescing: AddressCoalescingHeap<StaticHeap<1024, 8>> =
        AddressCoalescingHeap::new(StaticHeap::new(), NullScheduler, CountingOomHook::default(), NoopTraceHooks);

    for p in [sized.calloc(16, 4), coalescing.calloc(16, 4)] {
        assert!(!p.is_null());
        let slice = unsafe { std::slice::from_raw_parts(p, 64) };
        assert!(slice.iter().all(|&b| b == 0));
    }
}

// Concurrent use: many threads hammering allocate/free on the same heap must
// never violate mutual exclusion of the free list (a corrupted list would
// manifest as a panic, a lost allocation, or non-terminating search).
#[test]
fn concurrent_allocate_and_free_stays_consistent() {
    let heap: Arc<AddressCoalescingHeap<StaticHeap<{ 64 * 1024 }, 8>>> = Arc::new(AddressCoalescingHeap::new(
        StaticHeap::new(),
        NullScheduler,
        CountingOomHook::default(),
        NoopTraceHooks,
    ));

    let threads = 8;
    let iters = 200;
    let start = Arc::new(Barrier::new(threads));
    let mut handles = Vec::with_capacity(threads);

    for _ in 0..threads {
        let heap = Arc::clone(&heap);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            for i in 0..iters {
                let size = 8 + (i % 5) * 8;
                let p = heap.allocate(size);
                if p.is_null() {
                    continue;
                }
                assert_eq!(p as usize % 8, 0);
                unsafe { std::ptr::write_bytes(p, 0xAA, size) };
                heap.free(p);
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    // Every allocation was paired with a free, so the heap should have
    // fully coalesced back down to (close to) its starting capacity.
    let stats = heap.get_heap_stats();
    assert_eq!(stats.free_blocks, 1, "heap should coalesce back to a single free region once idle");
}
