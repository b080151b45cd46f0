//! End-to-end concurrency scenarios: overlapping batches in conflicting
//! orders, fairness across ticket ages, and cancellation under load.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use bresv_core::{
    AcquireClass, Fence, LruList, ReserveError, Resource, ValidateEntry, ValidateList, backoff,
    fence_and_release, reserve,
};
use bresv_e2e::{XorShift, pick_list, resource_pool};

#[test]
fn test_cross_order_batches_no_deadlock() {
    let class = Arc::new(AcquireClass::new());
    let lru = Arc::new(LruList::new());
    let pool = resource_pool(2);
    let (r1, r2) = (Arc::clone(&pool[0]), Arc::clone(&pool[1]));

    // Batch A wants [R1 excl, R2 shared], batch B wants [R2 excl, R1 excl];
    // B's ticket is allocated after A's. Opposite lock orders would
    // deadlock under naive hold-and-wait.
    let ticket_a = class.begin_batch(false);
    let ticket_b = class.begin_batch(false);

    let run = |mut list: ValidateList, ticket, fence, lru: Arc<LruList>| {
        thread::spawn(move || {
            let ticket = reserve(&mut list, Some(ticket), false, None).unwrap();
            // Protected operation stand-in: hold the batch briefly so the
            // two batches genuinely overlap.
            thread::sleep(Duration::from_millis(20));
            fence_and_release(&lru, &list, ticket, fence);
            list
        })
    };

    let a = run(
        pick_list(&pool, &[(0, 0), (1, 1)]),
        ticket_a,
        Fence::new(0xA),
        Arc::clone(&lru),
    );
    let b = run(
        pick_list(&pool, &[(1, 0), (0, 0)]),
        ticket_b,
        Fence::new(0xB),
        Arc::clone(&lru),
    );
    let list_a = a.join().unwrap();
    let list_b = b.join().unwrap();

    assert!(!r1.resv().lock().is_locked());
    assert!(!r2.resv().lock().is_locked());

    // Both batches need both resources, so one reserve strictly precedes
    // the other's fence. Both fence R1 exclusively: its marker names the
    // batch whose release sweep ran last, and the LRU tail must read in
    // that batch's list order (as reordered by its reserve retries).
    let last = r1.resv().exclusive_marker().unwrap();
    let last_list = match last {
        f if f == Fence::new(0xA) => &list_a,
        f if f == Fence::new(0xB) => &list_b,
        f => panic!("unexpected exclusive marker {f:?} on r1"),
    };
    let expected: Vec<_> = last_list.iter().map(|e| e.resource.id()).collect();
    assert_eq!(lru.order(), expected);

    // R2's markers also identify the winner: A fences it shared, B
    // exclusively, and an exclusive fence supersedes the shared ones.
    if last == Fence::new(0xA) {
        assert_eq!(r2.resv().shared_markers(), vec![Fence::new(0xA)]);
    } else {
        assert!(r2.resv().shared_markers().is_empty());
    }
    assert_eq!(r2.resv().exclusive_marker(), Some(Fence::new(0xB)));
}

#[test]
fn test_older_tickets_win_in_age_order() {
    let class = Arc::new(AcquireClass::new());
    let lru = Arc::new(LruList::new());
    let pool = resource_pool(1);
    let r = Arc::clone(&pool[0]);

    let mut holder_list = pick_list(&pool, &[(0, 0)]);
    let holder_ticket = reserve(&mut holder_list, Some(class.begin_batch(false)), false, None)
        .unwrap();

    // Tickets allocated in age order before any thread starts.
    let tickets: Vec<_> = (0..3).map(|_| class.begin_batch(false)).collect();
    let expected: Vec<_> = tickets.iter().map(|t| t.seq().raw()).collect();

    let completions = Arc::new(OrderLog::new());
    let mut handles = Vec::new();
    for ticket in tickets {
        let pool = pool.clone();
        let lru = Arc::clone(&lru);
        let completions = Arc::clone(&completions);
        handles.push(thread::spawn(move || {
            let seq = ticket.seq().raw();
            let mut list = pick_list(&pool, &[(0, 0)]);
            let ticket = reserve(&mut list, Some(ticket), false, None).unwrap();
            completions.push(seq);
            fence_and_release(&lru, &list, ticket, Fence::new(seq));
        }));
    }

    // Let every contender reach the wait queue before releasing.
    thread::sleep(Duration::from_millis(100));
    backoff(&lru, &holder_list, holder_ticket);

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(completions.snapshot(), expected);
    assert!(!r.resv().lock().is_locked());
}

#[test]
fn test_mutual_exclusion_under_overlapping_stress() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;
    const POOL: usize = 6;

    let class = Arc::new(AcquireClass::new());
    let lru = Arc::new(LruList::new());
    let pool = resource_pool(POOL);

    // One sentinel per resource; a CAS failure here means two batches held
    // the same resource at once.
    let sentinels: Arc<Vec<AtomicU64>> =
        Arc::new((0..POOL).map(|_| AtomicU64::new(0)).collect());
    let slot_of: Arc<HashMap<_, _>> = Arc::new(
        pool.iter()
            .enumerate()
            .map(|(i, r)| (r.id(), i))
            .collect(),
    );

    let mut handles = Vec::new();
    for tid in 0..THREADS {
        let class = Arc::clone(&class);
        let lru = Arc::clone(&lru);
        let pool = pool.clone();
        let sentinels = Arc::clone(&sentinels);
        let slot_of = Arc::clone(&slot_of);
        handles.push(thread::spawn(move || {
            let mut rng = XorShift::new(0x5eed + tid as u64);
            let me = tid as u64 + 1;
            for round in 0..ROUNDS {
                // 1-3 picks, duplicates allowed and diverted.
                let picks: Vec<(usize, usize)> = (0..1 + rng.pick(3))
                    .map(|_| (rng.pick(POOL), 0))
                    .collect();
                let mut list = pick_list(&pool, &picks);
                let mut dups = ValidateList::new();
                let ticket = class.begin_batch(false);
                let ticket = reserve(&mut list, Some(ticket), false, Some(&mut dups))
                    .unwrap();

                for entry in &list {
                    let slot = &sentinels[slot_of[&entry.resource.id()]];
                    assert_eq!(
                        slot.compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire),
                        Ok(0),
                        "mutual exclusion violated"
                    );
                }
                for entry in &list {
                    sentinels[slot_of[&entry.resource.id()]].store(0, Ordering::Release);
                }

                if round % 2 == 0 {
                    fence_and_release(&lru, &list, ticket, Fence::new(me << 32 | round as u64));
                } else {
                    backoff(&lru, &list, ticket);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for resource in &pool {
        assert!(!resource.resv().lock().is_locked());
    }
}

#[test]
fn test_cancellation_releases_everything() {
    let class = Arc::new(AcquireClass::new());
    let lru = Arc::new(LruList::new());
    let pool = resource_pool(2);
    let (r1, r2) = (Arc::clone(&pool[0]), Arc::clone(&pool[1]));

    let mut blocker = pick_list(&pool, &[(0, 0)]);
    let blocker_ticket =
        reserve(&mut blocker, Some(class.begin_batch(false)), false, None).unwrap();

    let ticket = class.begin_batch(true);
    let canceller = ticket.canceller();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let mut list = pick_list(&pool, &[(1, 1), (0, 0)]);
            reserve(&mut list, Some(ticket), true, None)
        })
    };

    thread::sleep(Duration::from_millis(50));
    canceller.cancel();
    assert_eq!(
        waiter.join().unwrap(),
        Err(ReserveError::Cancelled { resource: r1.id() })
    );

    // The cancelled batch holds nothing; the blocker still holds R1.
    assert!(!r2.resv().lock().is_locked());
    assert!(r1.resv().lock().is_locked());
    backoff(&lru, &blocker, blocker_ticket);
    assert!(!r1.resv().lock().is_locked());
    assert_eq!(lru.order(), vec![r1.id()]);
}

#[test]
fn test_repeated_shared_fences_bounded_by_quota() {
    const LIMIT: usize = 8;
    let class = AcquireClass::new();
    let lru = LruList::new();
    let r = Arc::new(Resource::with_slot_limit(LIMIT));

    let cycle = |shared_slots: usize, fence: u64| -> Result<(), ReserveError> {
        let mut list = vec![ValidateEntry::new(Arc::clone(&r), shared_slots)];
        let ticket = reserve(&mut list, Some(class.begin_batch(false)), false, None)?;
        fence_and_release(&lru, &list, ticket, Fence::new(fence));
        Ok(())
    };

    // Shared markers accumulate, one per cycle, until the quota is full.
    for fence in 0..LIMIT as u64 {
        cycle(1, fence).unwrap();
    }
    let err = cycle(1, 99).unwrap_err();
    assert!(matches!(err, ReserveError::Exhausted { .. }));
    assert!(!r.resv().lock().is_locked());

    // An exclusive fence supersedes them all and reclaims the quota.
    cycle(0, 100).unwrap();
    assert!(r.resv().shared_markers().is_empty());
    for fence in 0..LIMIT as u64 {
        cycle(1, fence).unwrap();
    }
    assert_eq!(r.resv().shared_markers().len(), LIMIT);
}

#[test]
fn test_duplicate_heavy_batch() {
    let class = AcquireClass::new();
    let lru = LruList::new();
    let pool = resource_pool(2);

    let mut list = pick_list(&pool, &[(0, 0), (1, 1), (0, 0), (1, 1), (0, 0)]);
    let mut dups = ValidateList::new();
    let ticket = reserve(
        &mut list,
        Some(class.begin_batch(false)),
        false,
        Some(&mut dups),
    )
    .unwrap();

    assert_eq!(list.len(), 2);
    assert_eq!(dups.len(), 3);
    fence_and_release(&lru, &list, ticket, Fence::new(9));
    for resource in &pool {
        assert!(!resource.resv().lock().is_locked());
    }
    assert_eq!(lru.order().len(), 2);
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Append-only completion log shared between contender threads.
struct OrderLog(std::sync::Mutex<Vec<u64>>);

impl OrderLog {
    fn new() -> Self {
        Self(std::sync::Mutex::new(Vec::new()))
    }

    fn push(&self, seq: u64) {
        self.0.lock().unwrap().push(seq);
    }

    fn snapshot(&self) -> Vec<u64> {
        self.0.lock().unwrap().clone()
    }
}
