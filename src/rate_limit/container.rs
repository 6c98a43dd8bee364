//! Bucket Container
//!
//! Concurrent table mapping routes to rate-limit buckets.
//!
//! Every slot has its own lock. The table itself sits behind a read-write
//! lock that is only ever write-locked to grow it; growth appends slots so
//! an index handed out in a [`Lease`] stays valid for the life of the
//! container.
//!
//! Structural changes (claiming a slot for a new route, moving a route to
//! the slot that already carries its bucket hash) are serialised by a
//! bookkeeping lock so a route or a hash can never end up in two live
//! slots. Token accounting only needs the slot lock and never waits on the
//! bookkeeping lock.
//!
//! Callers stall while the table grows or a slot lock is held. The first
//! lease on an unknown route, and a commit that changes a slot's hash,
//! also wait for the bookkeeping lock, which a concurrent rehash holds for
//! a scan of the whole table. Leases and commits on known routes with an
//! unchanged hash never touch it.
//!
//! Lock order: bookkeeping, then the table (read, or resize lock then
//! write), then slot locks in ascending index.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use tracing::{debug, info, trace};

use super::bucket::Bucket;
use super::error::RateLimitError;
use super::headers::RateLimitSnapshot;
use super::lease::{Lease, LeaseOutcome};
use super::stats::{ContainerStats, EntryView};
use crate::metrics;

/// Initial number of slots
pub const DEFAULT_CAPACITY: usize = 16;

type Result<T> = std::result::Result<T, RateLimitError>;
type SlotTable = Vec<Mutex<Slot>>;

/// Shared route → bucket registry
#[derive(Debug, Clone)]
pub struct BucketContainer {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    slots: RwLock<SlotTable>,
    resizing: AtomicBool,
    resize_lock: Mutex<()>,
    generation: AtomicU64,
    bookkeeping: Mutex<()>,
}

#[derive(Debug, Default)]
struct Slot {
    live: bool,
    /// `None` while pending the first response
    hash: Option<String>,
    routes: Vec<String>,
    /// Outstanding reservations per route. A route that migrated away
    /// stays listed until its last reservation here is finished.
    leased: HashMap<String, u32>,
    bucket: Bucket,
}

impl Slot {
    fn holds(&self, route: &str) -> bool {
        self.live && self.routes.iter().any(|r| r == route)
    }

    fn reserved_for(&self, route: &str) -> bool {
        self.live && self.leased.contains_key(route)
    }

    fn take(&mut self, route: &str) {
        *self.leased.entry(route.to_string()).or_default() += 1;
    }

    fn finish(&mut self, route: &str) {
        if let Some(count) = self.leased.get_mut(route) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.leased.remove(route);
            }
        }
    }

    fn claim(&mut self, route: &str) {
        *self = Slot {
            live: true,
            hash: None,
            routes: vec![route.to_string()],
            leased: HashMap::new(),
            bucket: Bucket::new(),
        };
    }

    fn retire(&mut self) {
        *self = Slot::default();
    }
}

enum Scan {
    Granted(usize),
    Refused(Option<DateTime<Utc>>),
    Missing,
}

impl Default for BucketContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketContainer {
    /// Create a container with [`DEFAULT_CAPACITY`] slots
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a container with `capacity` slots (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Mutex::default);
        metrics::CONTAINER_CAPACITY.set(capacity as i64);

        Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(slots),
                resizing: AtomicBool::new(false),
                resize_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
                bookkeeping: Mutex::new(()),
            }),
        }
    }

    /// Reserve a request on `route`.
    ///
    /// Refusal is an ordinary outcome: the caller waits until the reported
    /// reset and asks again. Errors are structural faults only.
    pub fn lease_or_create(&self, route: &str) -> Result<LeaseOutcome> {
        let now = Utc::now();

        {
            let slots = self.read_slots()?;
            if let Some(outcome) = self.settle_scan(scan_route(&slots, route, now)?, route) {
                return Ok(outcome);
            }
        }

        let _books = lock_bookkeeping(&self.inner)?;
        loop {
            let generation = self.inner.generation.load(Ordering::Acquire);
            {
                let slots = self.read_slots()?;

                // another caller may have created the route while we waited
                if let Some(outcome) = self.settle_scan(scan_route(&slots, route, now)?, route) {
                    return Ok(outcome);
                }

                for (index, slot) in slots.iter().enumerate() {
                    let mut slot = lock_slot(slot)?;
                    if slot.live {
                        continue;
                    }

                    slot.claim(route);
                    slot.bucket.admit_reservation_at(now);
                    slot.take(route);
                    metrics::LEASES_TOTAL.with_label_values(&["granted"]).inc();
                    debug!(route, index, "Claimed slot for new route");
                    return Ok(LeaseOutcome::Granted(Lease::new(self.clone(), index, route)));
                }
            }

            self.grow(generation)?;
        }
    }

    /// Commit a lease with the bucket state its response reported.
    ///
    /// If the response names a bucket hash another slot already carries,
    /// the route moves into that slot and the leased slot retires once it
    /// has no routes left.
    pub fn return_lease(
        &self,
        snapshot: &RateLimitSnapshot,
        route: &str,
        index: usize,
    ) -> Result<()> {
        {
            let slots = self.read_slots()?;
            let mut slot = lock_slot(slot_at(&slots, index)?)?;

            if slot.holds(route) && slot.hash.as_deref() == Some(snapshot.hash.as_str()) {
                slot.bucket.complete_reservation();
                slot.finish(route);
                slot.bucket.update(snapshot.maximum, snapshot.remaining, snapshot.reset);
                trace!(route, index, remaining = snapshot.remaining, "Committed lease");
                return Ok(());
            }
        }

        self.rehash(snapshot, route, index)
    }

    /// Release a lease whose request never reached the server
    pub fn cancel_lease(&self, route: &str, index: usize) -> Result<()> {
        let slots = self.read_slots()?;
        let mut slot = lock_slot(slot_at(&slots, index)?)?;

        if slot.reserved_for(route) {
            slot.bucket.cancel_reservation();
            slot.finish(route);
            trace!(route, index, "Cancelled lease");
        } else {
            debug!(route, index, "Cancelled lease no longer maps to its slot");
        }
        Ok(())
    }

    /// Number of slots in the table
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.read_slots()?.len())
    }

    /// Index of the live slot holding `route`
    pub fn slot_of(&self, route: &str) -> Result<Option<usize>> {
        let slots = self.read_slots()?;
        find_route(&slots, route)
    }

    /// Copy of the entry at `index`, `None` if the slot is dead
    pub fn entry(&self, index: usize) -> Result<Option<EntryView>> {
        let slots = self.read_slots()?;
        let slot = lock_slot(slot_at(&slots, index)?)?;
        Ok(slot.live.then(|| view(index, &slot)))
    }

    /// Point-in-time view of every slot
    pub fn stats(&self) -> Result<ContainerStats> {
        let slots = self.read_slots()?;
        let mut entries = Vec::new();
        for (index, slot) in slots.iter().enumerate() {
            let slot = lock_slot(slot)?;
            if slot.live {
                entries.push(view(index, &slot));
            }
        }

        Ok(ContainerStats::new(slots.len(), entries))
    }

    fn settle_scan(&self, scan: Scan, route: &str) -> Option<LeaseOutcome> {
        match scan {
            Scan::Granted(index) => {
                metrics::LEASES_TOTAL.with_label_values(&["granted"]).inc();
                Some(LeaseOutcome::Granted(Lease::new(self.clone(), index, route)))
            }
            Scan::Refused(reset) => {
                metrics::LEASES_TOTAL.with_label_values(&["refused"]).inc();
                trace!(route, ?reset, "Bucket exhausted");
                Some(LeaseOutcome::Refused {
                    route: route.to_string(),
                    reset,
                })
            }
            Scan::Missing => None,
        }
    }

    /// Slow path of [`BucketContainer::return_lease`]: the hash changed or
    /// the route moved since the lease was taken.
    fn rehash(&self, snapshot: &RateLimitSnapshot, route: &str, index: usize) -> Result<()> {
        let _books = lock_bookkeeping(&self.inner)?;
        let slots = self.read_slots()?;

        let leased_here = {
            let mut slot = lock_slot(slot_at(&slots, index)?)?;
            if slot.holds(route) {
                true
            } else {
                if slot.reserved_for(route) {
                    slot.bucket.complete_reservation();
                    slot.finish(route);
                }
                false
            }
        };

        let origin = if leased_here {
            index
        } else {
            match find_route(&slots, route)? {
                Some(origin) => origin,
                None => {
                    debug!(route, index, "Committed lease for a route that is no longer tracked");
                    return Ok(());
                }
            }
        };

        let Some(target) = find_hash(&slots, &snapshot.hash, origin)? else {
            let mut slot = lock_slot(&slots[origin])?;
            if leased_here {
                slot.bucket.complete_reservation();
                slot.finish(route);
            }
            if slot.hash.as_deref() != Some(snapshot.hash.as_str()) {
                debug!(route, index = origin, hash = %snapshot.hash, "Slot adopted bucket hash");
                slot.hash = Some(snapshot.hash.clone());
            }
            slot.bucket.update(snapshot.maximum, snapshot.remaining, snapshot.reset);
            return Ok(());
        };

        // two slots at once: always lower index first
        let (low, high) = (origin.min(target), origin.max(target));
        let mut low_slot = lock_slot(&slots[low])?;
        let mut high_slot = lock_slot(&slots[high])?;
        let (from, into) = if origin == low {
            (&mut *low_slot, &mut *high_slot)
        } else {
            (&mut *high_slot, &mut *low_slot)
        };

        if !into.routes.iter().any(|r| r == route) {
            into.routes.push(route.to_string());
        }
        into.bucket.update(snapshot.maximum, snapshot.remaining, snapshot.reset);

        if leased_here {
            from.bucket.cancel_reservation();
            from.finish(route);
        }
        from.routes.retain(|r| r != route);
        metrics::BUCKET_MIGRATIONS_TOTAL.inc();
        debug!(route, from = origin, into = target, hash = %snapshot.hash, "Migrated route to shared bucket");

        if from.routes.is_empty() {
            from.retire();
            metrics::SLOTS_RETIRED_TOTAL.inc();
            debug!(index = origin, "Retired slot");
        }

        Ok(())
    }

    /// Double the table unless another caller already grew it past
    /// `observed_generation`.
    fn grow(&self, observed_generation: u64) -> Result<()> {
        let _resize = self
            .inner
            .resize_lock
            .lock()
            .map_err(|_| RateLimitError::ResizeLock)?;

        if self.inner.generation.load(Ordering::Acquire) != observed_generation {
            return Ok(());
        }

        self.inner.resizing.store(true, Ordering::Release);
        let grown = self
            .inner
            .slots
            .write()
            .map(|mut slots| {
                let capacity = slots.len() * 2;
                slots.resize_with(capacity, Mutex::default);
                capacity
            })
            .map_err(|_| RateLimitError::LockPoisoned("slot table"));
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.resizing.store(false, Ordering::Release);

        let capacity = grown?;
        metrics::CONTAINER_RESIZES_TOTAL.inc();
        metrics::CONTAINER_CAPACITY.set(capacity as i64);
        info!(capacity, "Grew bucket container");
        Ok(())
    }

    fn read_slots(&self) -> Result<RwLockReadGuard<'_, SlotTable>> {
        while self.inner.resizing.load(Ordering::Acquire) {
            std::hint::spin_loop();
            std::thread::yield_now();
        }

        self.inner
            .slots
            .read()
            .map_err(|_| RateLimitError::LockPoisoned("slot table"))
    }
}

fn lock_bookkeeping(inner: &Inner) -> Result<MutexGuard<'_, ()>> {
    inner
        .bookkeeping
        .lock()
        .map_err(|_| RateLimitError::LockPoisoned("bookkeeping"))
}

fn lock_slot(slot: &Mutex<Slot>) -> Result<MutexGuard<'_, Slot>> {
    slot.lock().map_err(|_| RateLimitError::LockPoisoned("slot"))
}

fn slot_at(slots: &SlotTable, index: usize) -> Result<&Mutex<Slot>> {
    slots.get(index).ok_or(RateLimitError::InvalidSlot {
        index,
        capacity: slots.len(),
    })
}

fn scan_route(slots: &SlotTable, route: &str, now: DateTime<Utc>) -> Result<Scan> {
    for (index, slot) in slots.iter().enumerate() {
        let mut slot = lock_slot(slot)?;
        if !slot.holds(route) {
            continue;
        }

        return Ok(if slot.bucket.admit_reservation_at(now) {
            slot.take(route);
            Scan::Granted(index)
        } else {
            Scan::Refused(slot.bucket.reset)
        });
    }

    Ok(Scan::Missing)
}

fn find_route(slots: &SlotTable, route: &str) -> Result<Option<usize>> {
    for (index, slot) in slots.iter().enumerate() {
        if lock_slot(slot)?.holds(route) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn find_hash(slots: &SlotTable, hash: &str, skip: usize) -> Result<Option<usize>> {
    for (index, slot) in slots.iter().enumerate() {
        if index == skip {
            continue;
        }
        let slot = lock_slot(slot)?;
        if slot.live && slot.hash.as_deref() == Some(hash) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn view(index: usize, slot: &Slot) -> EntryView {
    EntryView {
        index,
        hash: slot.hash.clone(),
        routes: slot.routes.clone(),
        bucket: slot.bucket.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot(maximum: u32, remaining: u32, hash: &str) -> RateLimitSnapshot {
        RateLimitSnapshot::new(maximum, remaining, Utc::now() + Duration::seconds(30), hash)
    }

    fn granted(container: &BucketContainer, route: &str) -> Lease {
        container
            .lease_or_create(route)
            .unwrap()
            .into_lease()
            .expect("lease should be granted")
    }

    #[test]
    fn test_new_route_claims_first_slot() {
        let container = BucketContainer::new();
        let lease = granted(&container, "/channels/123/messages");

        assert_eq!(lease.index(), 0);
        let entry = container.entry(0).unwrap().unwrap();
        assert_eq!(entry.hash, None);
        assert_eq!(entry.routes, vec!["/channels/123/messages".to_string()]);
        assert_eq!(entry.bucket.reservations, 1);
        lease.cancel().unwrap();
    }

    #[test]
    fn test_pending_route_admits_single_request() {
        let container = BucketContainer::new();
        let first = granted(&container, "/guilds/1");

        let second = container.lease_or_create("/guilds/1").unwrap();
        assert!(!second.is_granted());

        first.commit(&snapshot(3, 2, "g")).unwrap();
        let third = granted(&container, "/guilds/1");
        assert_eq!(third.index(), 0);
        third.cancel().unwrap();
    }

    #[test]
    fn test_commit_same_hash_updates_in_place() {
        let container = BucketContainer::new();
        granted(&container, "/r").commit(&snapshot(5, 4, "h")).unwrap();

        let lease = granted(&container, "/r");
        lease.commit(&snapshot(5, 3, "h")).unwrap();

        let entry = container.entry(0).unwrap().unwrap();
        assert_eq!(entry.hash.as_deref(), Some("h"));
        assert_eq!(entry.bucket.remaining, 3);
        assert_eq!(entry.bucket.reservations, 0);
    }

    #[test]
    fn test_exhausted_bucket_refuses_with_reset() {
        let container = BucketContainer::new();
        let snap = snapshot(1, 0, "h");
        granted(&container, "/r").commit(&snap).unwrap();

        match container.lease_or_create("/r").unwrap() {
            LeaseOutcome::Refused { route, reset } => {
                assert_eq!(route, "/r");
                assert_eq!(reset, Some(snap.reset));
            }
            LeaseOutcome::Granted(lease) => {
                lease.cancel().unwrap();
                panic!("exhausted bucket granted a lease");
            }
        }
    }

    #[test]
    fn test_merge_into_existing_hash() {
        let container = BucketContainer::new();
        granted(&container, "/channels/123/messages")
            .commit(&snapshot(5, 4, "abc"))
            .unwrap();

        let lease = granted(&container, "/channels/456/messages");
        assert_eq!(lease.index(), 1);
        lease.commit(&snapshot(5, 3, "abc")).unwrap();

        let entry = container.entry(0).unwrap().unwrap();
        assert_eq!(
            entry.routes,
            vec![
                "/channels/123/messages".to_string(),
                "/channels/456/messages".to_string()
            ]
        );
        assert_eq!(entry.bucket.remaining, 3);
        assert!(container.entry(1).unwrap().is_none());
        assert_eq!(container.slot_of("/channels/456/messages").unwrap(), Some(0));
    }

    #[test]
    fn test_merge_into_lower_index_from_higher() {
        let container = BucketContainer::new();
        let a = granted(&container, "/a");
        let b = granted(&container, "/b");

        // b commits first, so slot 1 owns the hash and slot 0 must move up
        b.commit(&snapshot(2, 1, "shared")).unwrap();
        a.commit(&snapshot(2, 0, "shared")).unwrap();

        assert!(container.entry(0).unwrap().is_none());
        let entry = container.entry(1).unwrap().unwrap();
        assert_eq!(entry.routes, vec!["/b".to_string(), "/a".to_string()]);
        assert_eq!(entry.bucket.remaining, 0);
    }

    #[test]
    fn test_retired_slot_is_recycled() {
        let container = BucketContainer::new();
        granted(&container, "/a").commit(&snapshot(5, 4, "x")).unwrap();
        granted(&container, "/b").commit(&snapshot(5, 3, "x")).unwrap();
        assert!(container.entry(1).unwrap().is_none());

        let lease = granted(&container, "/c");
        assert_eq!(lease.index(), 1);
        lease.cancel().unwrap();
    }

    #[test]
    fn test_stale_lease_commits_to_current_slot() {
        let container = BucketContainer::new();
        granted(&container, "/a").commit(&snapshot(5, 5, "x")).unwrap();

        // /b is first learned on slot 1, then shares x and migrates away
        granted(&container, "/b").commit(&snapshot(9, 9, "y")).unwrap();
        let stale = granted(&container, "/b");
        let stale_index = stale.index();
        granted(&container, "/b").commit(&snapshot(5, 2, "x")).unwrap();
        assert_eq!(container.slot_of("/b").unwrap(), Some(0));

        stale.commit(&snapshot(5, 1, "x")).unwrap();
        let entry = container.entry(0).unwrap().unwrap();
        assert_eq!(entry.bucket.remaining, 1);
        assert!(container.entry(stale_index).unwrap().is_none());
    }

    #[test]
    fn test_departed_route_releases_reservation() {
        let container = BucketContainer::new();
        granted(&container, "/shared-1").commit(&snapshot(5, 5, "s")).unwrap();

        // slot 1 holds /a and /b under hash t
        granted(&container, "/a").commit(&snapshot(4, 4, "t")).unwrap();
        granted(&container, "/b").commit(&snapshot(4, 4, "t")).unwrap();
        assert_eq!(container.slot_of("/b").unwrap(), Some(1));

        let in_flight = granted(&container, "/a");
        // /a turns out to belong to s and moves to slot 0; slot 1 keeps /b
        granted(&container, "/a").commit(&snapshot(5, 3, "s")).unwrap();
        assert_eq!(container.slot_of("/a").unwrap(), Some(0));

        in_flight.cancel().unwrap();
        let entry = container.entry(1).unwrap().unwrap();
        assert_eq!(entry.routes, vec!["/b".to_string()]);
        assert_eq!(entry.bucket.reservations, 0);
    }

    fn leased_on(container: &BucketContainer, index: usize, route: &str) -> Option<u32> {
        let slots = container.inner.slots.read().unwrap();
        let slot = slots[index].lock().unwrap();
        slot.leased.get(route).copied()
    }

    #[test]
    fn test_departed_route_forgotten_after_last_reservation() {
        let container = BucketContainer::new();
        granted(&container, "/shared-1").commit(&snapshot(5, 5, "s")).unwrap();
        granted(&container, "/a").commit(&snapshot(4, 4, "t")).unwrap();
        granted(&container, "/b").commit(&snapshot(4, 4, "t")).unwrap();

        let first = granted(&container, "/a");
        let second = granted(&container, "/a");
        assert_eq!(leased_on(&container, 1, "/a"), Some(2));

        granted(&container, "/a").commit(&snapshot(5, 3, "s")).unwrap();
        assert_eq!(leased_on(&container, 1, "/a"), Some(2));

        first.commit(&snapshot(5, 2, "s")).unwrap();
        assert_eq!(leased_on(&container, 1, "/a"), Some(1));
        second.cancel().unwrap();
        assert_eq!(leased_on(&container, 1, "/a"), None);
        assert_eq!(container.entry(1).unwrap().unwrap().bucket.reservations, 0);

        // moving back and forth never lists a route twice
        granted(&container, "/a").commit(&snapshot(4, 4, "t")).unwrap();
        assert_eq!(container.slot_of("/a").unwrap(), Some(1));
        let lease = granted(&container, "/a");
        granted(&container, "/a").commit(&snapshot(5, 1, "s")).unwrap();
        assert_eq!(leased_on(&container, 1, "/a"), Some(1));
        lease.cancel().unwrap();
        assert_eq!(leased_on(&container, 1, "/a"), None);
    }

    #[test]
    fn test_growth_preserves_existing_slots() {
        let container = BucketContainer::with_capacity(16);
        for i in 0..16 {
            let route = format!("/route/{}", i);
            granted(&container, &route)
                .commit(&snapshot(10, 9 - (i % 5), &format!("hash-{}", i)))
                .unwrap();
        }
        let before: Vec<_> = (0..16)
            .map(|i| container.entry(i).unwrap().unwrap())
            .collect();

        let lease = granted(&container, "/route/16");
        assert_eq!(lease.index(), 16);
        assert_eq!(container.capacity().unwrap(), 32);

        for (i, entry) in before.into_iter().enumerate() {
            assert_eq!(container.entry(i).unwrap().unwrap(), entry);
        }
        lease.cancel().unwrap();
    }

    #[test]
    fn test_invalid_slot() {
        let container = BucketContainer::with_capacity(2);
        let err = container.cancel_lease("/x", 7).unwrap_err();
        assert!(matches!(
            err,
            RateLimitError::InvalidSlot {
                index: 7,
                capacity: 2
            }
        ));
    }

    #[test]
    fn test_stats() {
        let container = BucketContainer::with_capacity(4);
        granted(&container, "/a").commit(&snapshot(5, 4, "x")).unwrap();
        granted(&container, "/b").cancel().unwrap();

        let stats = container.stats().unwrap();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.live_slots, 2);
        assert_eq!(stats.dead_slots, 2);
        assert_eq!(stats.routes, 2);
    }
}
