use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::{mem, thread};

use tracing::debug;

use crate::{Bucket, DropPolicy, Result, SlotCoordinates, SlotState};

/// The append-only sequence of buckets that backs a pool.
///
/// There is always at least one bucket, reserved when the store is created. Only the last
/// bucket is ever a bump allocation target. Once a bucket can no longer fit another slot, a new
/// bucket is appended and the old one is never bumped again. Its slots can still be reused via
/// the pool's free list.
///
/// The store also counts how many slots hold live elements, so it can enforce the drop policy
/// when it is dropped.
#[derive(Debug)]
pub(crate) struct BucketStore {
    buckets: Vec<Bucket>,

    bucket_size: NonZero<usize>,
    slot_layout: Layout,

    /// Number of slots in [`SlotState::Occupied`] across all buckets.
    occupied: usize,

    drop_policy: DropPolicy,

    /// Whether buckets that still hold live elements are leaked instead of freed on drop.
    /// Required once elements may have been pinned.
    retain_occupied_buckets: bool,

    /// Type name of the elements, for diagnostics.
    item_type: &'static str,
}

impl BucketStore {
    /// Creates a store with one empty bucket.
    pub(crate) fn new(
        bucket_size: NonZero<usize>,
        slot_layout: Layout,
        drop_policy: DropPolicy,
        item_type: &'static str,
    ) -> Result<Self> {
        let first = Bucket::new(bucket_size, slot_layout)?;

        debug!(
            bucket_index = 0,
            bucket_size = bucket_size.get(),
            item_type,
            "reserved initial bucket"
        );

        Ok(Self {
            buckets: vec![first],
            bucket_size,
            slot_layout,
            occupied: 0,
            drop_policy,
            retain_occupied_buckets: false,
            item_type,
        })
    }

    #[must_use]
    pub(crate) fn bucket_size(&self) -> NonZero<usize> {
        self.bucket_size
    }

    /// The layout of the memory block behind each bucket.
    #[must_use]
    pub(crate) fn bucket_layout(&self) -> Layout {
        Bucket::layout_for(self.bucket_size, self.slot_layout)
    }

    #[must_use]
    pub(crate) fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// From now on, buckets that hold live elements when the store is dropped are leaked
    /// instead of freed, so the memory of a pinned element is never reused without its
    /// destructor having run.
    pub(crate) fn retain_occupied_buckets(&mut self) {
        self.retain_occupied_buckets = true;
    }

    #[must_use]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub(crate) fn occupied(&self) -> usize {
        self.occupied
    }

    /// Bump-allocates a fresh slot, appending a new bucket if the last one is exhausted.
    ///
    /// The slot starts out [`SlotState::Reserved`].
    pub(crate) fn next_slot(&mut self) -> Result<SlotCoordinates> {
        let last_index = self
            .buckets
            .len()
            .checked_sub(1)
            .expect("the store is never empty - one bucket is reserved on creation");

        let last = self
            .buckets
            .last_mut()
            .expect("the store is never empty - one bucket is reserved on creation");

        if let Some(offset) = last.try_bump() {
            return Ok(SlotCoordinates::from_parts(last_index, offset));
        }

        let mut bucket = Bucket::new(self.bucket_size, self.slot_layout)?;

        let offset = bucket
            .try_bump()
            .expect("a slot always fits into an empty bucket - checked when the pool is built");

        let bucket_index = self.buckets.len();
        self.buckets.push(bucket);

        debug!(
            bucket_index,
            bucket_size = self.bucket_size.get(),
            item_type = self.item_type,
            "created bucket"
        );

        Ok(SlotCoordinates::from_parts(bucket_index, offset))
    }

    /// Finds the slot that starts at `address` by scanning the byte ranges of all buckets.
    #[must_use]
    pub(crate) fn locate(&self, address: usize) -> Option<SlotCoordinates> {
        self.buckets
            .iter()
            .enumerate()
            .find(|(_, bucket)| bucket.contains_address(address))
            .and_then(|(bucket_index, bucket)| {
                bucket
                    .offset_of_address(address)
                    .map(|offset| SlotCoordinates::from_parts(bucket_index, offset))
            })
    }

    /// Whether `address` lies within the reserved byte range of any bucket.
    #[must_use]
    pub(crate) fn contains_address(&self, address: usize) -> bool {
        self.buckets
            .iter()
            .any(|bucket| bucket.contains_address(address))
    }

    /// # Panics
    ///
    /// Panics if the coordinates do not identify a bump-allocated slot.
    #[must_use]
    pub(crate) fn slot_ptr(&self, coordinates: SlotCoordinates) -> NonNull<u8> {
        self.bucket(coordinates).slot_ptr(coordinates.offset())
    }

    /// The state of the slot, or `None` if the coordinates do not identify a bump-allocated
    /// slot.
    #[must_use]
    pub(crate) fn state(&self, coordinates: SlotCoordinates) -> Option<SlotState> {
        self.buckets
            .get(coordinates.bucket_index())
            .and_then(|bucket| bucket.state(coordinates.offset()))
    }

    /// # Panics
    ///
    /// Panics if the coordinates do not identify a bump-allocated slot.
    pub(crate) fn set_state(&mut self, coordinates: SlotCoordinates, state: SlotState) {
        let previous = self
            .buckets
            .get_mut(coordinates.bucket_index())
            .unwrap_or_else(|| panic!("bucket {} does not exist", coordinates.bucket_index()))
            .set_state(coordinates.offset(), state);

        match (previous == SlotState::Occupied, state == SlotState::Occupied) {
            (false, true) => {
                self.occupied = self
                    .occupied
                    .checked_add(1)
                    .expect("cannot have more live slots than fit in virtual memory");
            }
            (true, false) => {
                self.occupied = self
                    .occupied
                    .checked_sub(1)
                    .expect("the slot was occupied so the count must be non-zero");
            }
            _ => {}
        }
    }

    /// Counts slots in the given state across all buckets.
    #[must_use]
    pub(crate) fn count_in_state(&self, state: SlotState) -> usize {
        self.buckets
            .iter()
            .map(|bucket| bucket.count_in_state(state))
            .sum()
    }

    /// Checks the bucket a slot lives in and the state of the slot itself.
    ///
    /// Unlike [`integrity_check()`][Self::integrity_check], this does not scan the store, so
    /// it is cheap enough to run on every operation.
    #[cfg(debug_assertions)]
    pub(crate) fn check_slot(&self, coordinates: SlotCoordinates, expected: SlotState) {
        self.bucket(coordinates).integrity_check();

        assert_eq!(
            self.state(coordinates),
            Some(expected),
            "slot at offset {} of bucket {} is in an unexpected state in store of {}",
            coordinates.offset(),
            coordinates.bucket_index(),
            self.item_type
        );
    }

    /// Frees the memory of all buckets, except for buckets that hold live elements if those
    /// must stay in place. Returns the number of buckets that were leaked.
    fn release_buckets(&mut self) -> usize {
        let mut leaked = 0_usize;

        for bucket in mem::take(&mut self.buckets) {
            if self.retain_occupied_buckets && bucket.count_in_state(SlotState::Occupied) > 0 {
                mem::forget(bucket);

                leaked = leaked
                    .checked_add(1)
                    .expect("cannot have more buckets than fit in virtual memory");
            }
        }

        leaked
    }

    fn bucket(&self, coordinates: SlotCoordinates) -> &Bucket {
        self.buckets
            .get(coordinates.bucket_index())
            .unwrap_or_else(|| panic!("bucket {} does not exist", coordinates.bucket_index()))
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        let observed_occupied = self.count_in_state(SlotState::Occupied);

        assert_eq!(
            self.occupied, observed_occupied,
            "occupied count {} does not match the observed occupied count {} in store of {}",
            self.occupied, observed_occupied, self.item_type
        );

        for (index, bucket) in self.buckets.iter().enumerate() {
            bucket.integrity_check();

            let is_last = index.checked_add(1) == Some(self.buckets.len());

            if !is_last {
                assert!(
                    bucket.remaining() < self.slot_layout.size(),
                    "bucket {index} was abandoned while it still had room for a slot in store of {}",
                    self.item_type
                );
            }
        }
    }
}

impl Drop for BucketStore {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if !thread::panicking() {
            self.integrity_check();
        }

        // Release the memory first, so we do not leak more than necessary if we panic below.
        let leaked_buckets = self.release_buckets();

        if self.occupied == 0 {
            return;
        }

        debug!(
            live = self.occupied,
            leaked_buckets,
            item_type = self.item_type,
            "dropping pool with live elements, their destructors will not run"
        );

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustNotDropItems && !thread::panicking() {
            panic!(
                "dropped a pool of {} with {} live elements and a policy that says it must be empty when dropped",
                self.item_type, self.occupied
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;

    fn store_of_u64(bucket_size: NonZero<usize>) -> BucketStore {
        BucketStore::new(
            bucket_size,
            Layout::new::<u64>(),
            DropPolicy::default(),
            "u64",
        )
        .unwrap()
    }

    #[test]
    fn starts_with_one_bucket() {
        let store = store_of_u64(nz!(64));

        assert_eq!(store.bucket_count(), 1);
        assert_eq!(store.occupied(), 0);
    }

    #[test]
    fn grows_by_one_bucket_when_last_is_full() {
        let mut store = store_of_u64(nz!(16));

        let a = store.next_slot().unwrap();
        let b = store.next_slot().unwrap();
        assert_eq!(store.bucket_count(), 1);
        assert_eq!((a.bucket_index(), a.offset()), (0, 0));
        assert_eq!((b.bucket_index(), b.offset()), (0, 8));

        let c = store.next_slot().unwrap();
        assert_eq!(store.bucket_count(), 2);
        assert_eq!((c.bucket_index(), c.offset()), (1, 0));

        #[cfg(debug_assertions)]
        store.integrity_check();
    }

    #[test]
    fn growth_does_not_move_existing_slots() {
        let mut store = store_of_u64(nz!(16));

        let first = store.next_slot().unwrap();
        let first_ptr = store.slot_ptr(first);

        for _ in 0..10 {
            _ = store.next_slot().unwrap();
        }

        assert_eq!(store.slot_ptr(first), first_ptr);
    }

    #[test]
    fn locate_finds_slots_in_any_bucket() {
        let mut store = store_of_u64(nz!(16));

        let slots: Vec<_> = (0..5).map(|_| store.next_slot().unwrap()).collect();

        for slot in slots {
            let address = store.slot_ptr(slot).addr().get();
            assert_eq!(store.locate(address), Some(slot));
            assert!(store.contains_address(address));
        }
    }

    #[test]
    fn locate_rejects_foreign_address() {
        let mut store = store_of_u64(nz!(16));
        _ = store.next_slot().unwrap();

        let outsider = 42_u64;
        let address = NonNull::from(&outsider).addr().get();

        assert_eq!(store.locate(address), None);
        assert!(!store.contains_address(address));
    }

    #[test]
    fn set_state_tracks_occupied_count() {
        let mut store = store_of_u64(nz!(64));

        let a = store.next_slot().unwrap();
        let b = store.next_slot().unwrap();

        store.set_state(a, SlotState::Occupied);
        store.set_state(b, SlotState::Occupied);
        assert_eq!(store.occupied(), 2);

        // Setting the same state twice does not double count.
        store.set_state(b, SlotState::Occupied);
        assert_eq!(store.occupied(), 2);

        store.set_state(a, SlotState::Reserved);
        store.set_state(a, SlotState::Vacant);
        assert_eq!(store.occupied(), 1);
        assert_eq!(store.count_in_state(SlotState::Vacant), 1);

        store.set_state(b, SlotState::Vacant);
        #[cfg(debug_assertions)]
        store.integrity_check();
    }

    #[test]
    fn state_of_missing_bucket_is_none() {
        let store = store_of_u64(nz!(64));

        assert_eq!(store.state(SlotCoordinates::from_parts(7, 0)), None);
    }

    #[test]
    fn drop_with_live_slots_under_leak_policy_does_not_panic() {
        let mut store = store_of_u64(nz!(64));

        let a = store.next_slot().unwrap();
        store.set_state(a, SlotState::Occupied);

        drop(store);
    }

    #[test]
    fn occupied_buckets_are_freed_by_default() {
        let mut store = store_of_u64(nz!(16));

        let a = store.next_slot().unwrap();
        store.set_state(a, SlotState::Occupied);

        assert_eq!(store.release_buckets(), 0);
        assert_eq!(store.bucket_count(), 0);

        // Nothing is live once the buckets are gone.
        store.occupied = 0;
    }

    #[test]
    #[cfg_attr(miri, ignore = "leaks a bucket on purpose")]
    fn retained_store_leaks_only_occupied_buckets() {
        let mut store = store_of_u64(nz!(16));
        store.retain_occupied_buckets();

        // Two slots per bucket. Only bucket 0 ends up with a live element.
        let a = store.next_slot().unwrap();
        store.set_state(a, SlotState::Occupied);
        let b = store.next_slot().unwrap();
        store.set_state(b, SlotState::Vacant);
        let c = store.next_slot().unwrap();
        store.set_state(c, SlotState::Vacant);
        _ = store.next_slot().unwrap();
        _ = store.next_slot().unwrap();
        assert_eq!(store.bucket_count(), 3);

        assert_eq!(store.release_buckets(), 1);
        assert_eq!(store.bucket_count(), 0);

        store.occupied = 0;
    }

    #[test]
    fn check_slot_accepts_expected_state() {
        let mut store = store_of_u64(nz!(64));

        let a = store.next_slot().unwrap();
        store.set_state(a, SlotState::Occupied);

        #[cfg(debug_assertions)]
        store.check_slot(a, SlotState::Occupied);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn check_slot_rejects_unexpected_state() {
        let mut store = store_of_u64(nz!(64));

        let a = store.next_slot().unwrap();

        store.check_slot(a, SlotState::Occupied);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_slots_under_must_not_drop_policy_panics() {
        let mut store = BucketStore::new(
            nz!(64),
            Layout::new::<u64>(),
            DropPolicy::MustNotDropItems,
            "u64",
        )
        .unwrap();

        let a = store.next_slot().unwrap();
        store.set_state(a, SlotState::Occupied);

        drop(store);
    }
}
