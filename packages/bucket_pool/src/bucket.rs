use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

use num_integer::Integer;

use crate::{Error, Result};

/// Lifecycle state of a slot that has been carved out of a bucket by bump allocation.
///
/// Slots beyond the fill offset have no state, as they have never been handed out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SlotState {
    /// Handed out without holding a live element. This is the state while an element is
    /// being constructed or destroyed. A slot whose construction failed stays here forever.
    Reserved,

    /// Holds a live element.
    Occupied,

    /// Released and waiting on the free list.
    Vacant,
}

/// A fixed-capacity region of memory that slots are bump-allocated from.
///
/// The backing memory is allocated once, in full, when the bucket is created and is only
/// released when the bucket is dropped. Pointers into the bucket therefore remain valid for
/// the entire lifetime of the bucket, regardless of what happens to the `Bucket` value itself
/// (e.g. being moved around inside a growing `Vec`).
///
/// The bucket never reads or writes slot memory and never drops elements. Element lifecycle
/// is the responsibility of the owner, which records it via [`SlotState`].
#[derive(Debug)]
pub(crate) struct Bucket {
    first_byte_ptr: NonNull<u8>,

    /// Size is the bucket capacity in bytes, alignment is that of the element.
    layout: Layout,

    /// The stride of the slots. A multiple of the layout alignment, so every slot starts
    /// suitably aligned for the element.
    slot_size: NonZero<usize>,

    /// Bytes consumed by bump allocation. Never exceeds the capacity.
    fill: usize,

    /// One entry per bump-allocated slot, indexed by `offset / slot_size`.
    slot_states: Vec<SlotState>,
}

impl Bucket {
    /// Allocates a new empty bucket with room for `capacity` bytes of slots
    /// described by `slot_layout`.
    ///
    /// # Panics
    ///
    /// Panics if a slot is zero-sized or does not fit into the capacity.
    pub(crate) fn new(capacity: NonZero<usize>, slot_layout: Layout) -> Result<Self> {
        let slot_size =
            NonZero::new(slot_layout.size()).expect("Bucket must have non-zero slot size");

        assert!(
            slot_size <= capacity,
            "a slot of {slot_size} bytes does not fit into a bucket of {capacity} bytes"
        );

        let layout = Self::layout_for(capacity, slot_layout);

        // SAFETY: The layout is not zero-sized because the capacity is non-zero.
        let ptr = unsafe { alloc(layout) };

        let first_byte_ptr = NonNull::new(ptr).ok_or(Error::BucketAllocation {
            bytes: capacity.get(),
        })?;

        Ok(Self {
            first_byte_ptr,
            layout,
            slot_size,
            fill: 0,
            slot_states: Vec::new(),
        })
    }

    /// The layout of the memory block that backs a bucket of the given capacity.
    #[must_use]
    pub(crate) fn layout_for(capacity: NonZero<usize>, slot_layout: Layout) -> Layout {
        Layout::from_size_align(capacity.get(), slot_layout.align())
            .expect("bucket capacity must not overflow isize when rounded up to the alignment")
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub(crate) fn fill(&self) -> usize {
        self.fill
    }

    #[must_use]
    pub(crate) fn remaining(&self) -> usize {
        self.capacity()
            .checked_sub(self.fill)
            .expect("fill offset can never exceed the capacity")
    }

    /// Carves the next slot off the unused tail of the bucket, returning its offset.
    ///
    /// The new slot starts out [`SlotState::Reserved`]. Returns `None` if the remaining space
    /// is too small for one more slot. That space is never used again.
    #[must_use]
    pub(crate) fn try_bump(&mut self) -> Option<usize> {
        if self.remaining() < self.slot_size.get() {
            return None;
        }

        let offset = self.fill;

        self.fill = self
            .fill
            .checked_add(self.slot_size.get())
            .expect("guarded by the remaining capacity check above");

        self.slot_states.push(SlotState::Reserved);

        Some(offset)
    }

    /// Whether `address` lies anywhere within the reserved byte range of this bucket.
    #[must_use]
    pub(crate) fn contains_address(&self, address: usize) -> bool {
        let start = self.first_byte_ptr.addr().get();

        // The allocator will never give us a block that wraps around the address space.
        let end = start
            .checked_add(self.capacity())
            .expect("an allocated block cannot extend past the end of the address space");

        (start..end).contains(&address)
    }

    /// Translates an address into the offset of the bump-allocated slot that starts there.
    ///
    /// Returns `None` for addresses outside the bucket, addresses pointing into the middle of
    /// a slot and addresses in the not yet allocated tail.
    #[must_use]
    pub(crate) fn offset_of_address(&self, address: usize) -> Option<usize> {
        if !self.contains_address(address) {
            return None;
        }

        let offset = address
            .checked_sub(self.first_byte_ptr.addr().get())
            .expect("guarded by the range check above");

        let (_, remainder) = offset.div_rem(&self.slot_size.get());

        (remainder == 0 && offset < self.fill).then_some(offset)
    }

    /// Pointer to the first byte of the slot at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the offset does not identify a bump-allocated slot.
    #[must_use]
    pub(crate) fn slot_ptr(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset < self.fill,
            "slot offset {offset} is beyond the fill offset {} of the bucket",
            self.fill
        );

        // SAFETY: The offset is within the allocated block, guarded by the assertion above
        // (the fill offset never exceeds the capacity).
        unsafe { self.first_byte_ptr.add(offset) }
    }

    /// The state of the slot at `offset`, or `None` if there is no slot there.
    #[must_use]
    pub(crate) fn state(&self, offset: usize) -> Option<SlotState> {
        let index = self.slot_index(offset)?;

        self.slot_states.get(index).copied()
    }

    /// Records a new state for the slot at `offset`, returning the previous state.
    ///
    /// # Panics
    ///
    /// Panics if there is no slot at `offset`.
    pub(crate) fn set_state(&mut self, offset: usize, state: SlotState) -> SlotState {
        let entry = self
            .slot_index(offset)
            .and_then(|index| self.slot_states.get_mut(index))
            .unwrap_or_else(|| panic!("no slot at offset {offset} of the bucket"));

        std::mem::replace(entry, state)
    }

    #[must_use]
    pub(crate) fn count_in_state(&self, state: SlotState) -> usize {
        self.slot_states.iter().filter(|s| **s == state).count()
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        assert!(
            self.fill <= self.capacity(),
            "bucket is filled to {} bytes beyond its capacity of {} bytes",
            self.fill,
            self.capacity()
        );

        let tracked_bytes = self
            .slot_states
            .len()
            .checked_mul(self.slot_size.get())
            .expect("tracked slots cannot exceed the bucket capacity");

        assert_eq!(
            tracked_bytes, self.fill,
            "bucket tracks {} slots of {} bytes but has been filled to {} bytes",
            self.slot_states.len(),
            self.slot_size,
            self.fill
        );
    }

    fn slot_index(&self, offset: usize) -> Option<usize> {
        let (index, remainder) = offset.div_rem(&self.slot_size.get());

        (remainder == 0).then_some(index)
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        // SAFETY: The layout must match between alloc and dealloc. It does.
        unsafe {
            dealloc(self.first_byte_ptr.as_ptr(), self.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::indexing_slicing,
        reason = "we do not need to worry about these things when writing test code"
    )]

    use new_zealand::nz;

    use super::*;

    fn bucket_of_u64(capacity: NonZero<usize>) -> Bucket {
        Bucket::new(capacity, Layout::new::<u64>()).unwrap()
    }

    #[test]
    fn bump_advances_by_slot_size() {
        let mut bucket = bucket_of_u64(nz!(32));

        assert_eq!(bucket.try_bump(), Some(0));
        assert_eq!(bucket.try_bump(), Some(8));
        assert_eq!(bucket.try_bump(), Some(16));
        assert_eq!(bucket.fill(), 24);
        assert_eq!(bucket.remaining(), 8);
    }

    #[test]
    fn bump_fills_exactly_to_capacity() {
        let mut bucket = bucket_of_u64(nz!(16));

        assert_eq!(bucket.try_bump(), Some(0));
        assert_eq!(bucket.try_bump(), Some(8));
        assert_eq!(bucket.try_bump(), None);
        assert_eq!(bucket.fill(), bucket.capacity());
    }

    #[test]
    fn slack_is_never_bumped() {
        // 20 bytes fit two 8-byte slots with 4 bytes of unusable slack.
        let mut bucket = bucket_of_u64(nz!(20));

        assert!(bucket.try_bump().is_some());
        assert!(bucket.try_bump().is_some());
        assert_eq!(bucket.try_bump(), None);
        assert_eq!(bucket.remaining(), 4);
    }

    #[test]
    fn slots_are_aligned_for_the_element() {
        let mut bucket = bucket_of_u64(nz!(64));

        while let Some(offset) = bucket.try_bump() {
            let ptr = bucket.slot_ptr(offset);
            assert!(ptr.cast::<u64>().is_aligned());
        }
    }

    #[test]
    fn new_slots_start_reserved() {
        let mut bucket = bucket_of_u64(nz!(16));

        let offset = bucket.try_bump().unwrap();
        assert_eq!(bucket.state(offset), Some(SlotState::Reserved));

        assert_eq!(bucket.set_state(offset, SlotState::Occupied), SlotState::Reserved);
        assert_eq!(bucket.state(offset), Some(SlotState::Occupied));
        assert_eq!(bucket.count_in_state(SlotState::Occupied), 1);
        assert_eq!(bucket.count_in_state(SlotState::Reserved), 0);
    }

    #[test]
    fn state_of_unallocated_or_misaligned_offset_is_none() {
        let mut bucket = bucket_of_u64(nz!(32));
        _ = bucket.try_bump();

        assert_eq!(bucket.state(8), None);
        assert_eq!(bucket.state(3), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    fn integrity_check_holds_from_empty_to_full() {
        let mut bucket = bucket_of_u64(nz!(24));
        bucket.integrity_check();

        while let Some(offset) = bucket.try_bump() {
            bucket.set_state(offset, SlotState::Occupied);
            bucket.integrity_check();
        }

        assert_eq!(bucket.remaining(), 0);
    }

    #[test]
    #[should_panic]
    fn set_state_beyond_fill_panics() {
        let mut bucket = bucket_of_u64(nz!(32));

        bucket.set_state(0, SlotState::Occupied);
    }

    #[test]
    #[should_panic]
    fn slot_ptr_beyond_fill_panics() {
        let bucket = bucket_of_u64(nz!(32));

        _ = bucket.slot_ptr(0);
    }

    #[test]
    fn offset_of_address_recognizes_slot_starts() {
        let mut bucket = bucket_of_u64(nz!(32));
        let first = bucket.try_bump().unwrap();
        let second = bucket.try_bump().unwrap();

        let first_address = bucket.slot_ptr(first).addr().get();
        let second_address = bucket.slot_ptr(second).addr().get();

        assert_eq!(bucket.offset_of_address(first_address), Some(first));
        assert_eq!(bucket.offset_of_address(second_address), Some(second));

        // Middle of a slot.
        assert_eq!(bucket.offset_of_address(first_address + 1), None);

        // Within the bucket but not yet allocated.
        assert!(bucket.contains_address(second_address + 8));
        assert_eq!(bucket.offset_of_address(second_address + 8), None);

        // Past the end of the bucket.
        assert!(!bucket.contains_address(first_address + 32));
    }

    #[test]
    #[should_panic]
    fn oversized_slot_panics() {
        _ = Bucket::new(nz!(4), Layout::new::<u64>());
    }
}
