use tracing::trace;

use crate::SlotCoordinates;

/// A stack of released slots, consulted before any new slot is bump-allocated.
///
/// Reuse is strictly LIFO, so the most recently released (and most likely still cached) slot
/// is the first to be handed out again.
///
/// The list only owns its own storage, never slot memory. With auto-free enabled, that
/// storage is opportunistically shrunk after a pop once occupancy drops to half the capacity.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    entries: Vec<SlotCoordinates>,

    auto_free: bool,
}

impl FreeList {
    #[must_use]
    pub(crate) fn new(auto_free: bool) -> Self {
        Self {
            entries: Vec::new(),
            auto_free,
        }
    }

    pub(crate) fn push(&mut self, coordinates: SlotCoordinates) {
        self.entries.push(coordinates);
    }

    /// Takes the most recently pushed slot, if any.
    #[must_use]
    pub(crate) fn pop(&mut self) -> Option<SlotCoordinates> {
        let coordinates = self.entries.pop()?;

        self.maybe_shrink();

        Some(coordinates)
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    #[must_use]
    pub(crate) fn auto_free(&self) -> bool {
        self.auto_free
    }

    pub(crate) fn set_auto_free(&mut self, enabled: bool) {
        self.auto_free = enabled;
    }

    /// Releases all storage capacity beyond the current occupancy.
    pub(crate) fn shrink_to_fit(&mut self) {
        let capacity_before = self.entries.capacity();

        self.entries.shrink_to_fit();

        trace!(
            len = self.entries.len(),
            capacity_before,
            capacity_after = self.entries.capacity(),
            "shrank free list"
        );
    }

    fn maybe_shrink(&mut self) {
        if !self.auto_free {
            return;
        }

        let len = self.entries.len();

        // Compared as `len * 2 <= capacity` to avoid rounding in the division.
        if len.saturating_mul(2) <= self.entries.capacity() {
            self.shrink_to_fit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinates(offset: usize) -> SlotCoordinates {
        SlotCoordinates::from_parts(0, offset)
    }

    #[test]
    fn pop_on_empty_is_none() {
        let mut list = FreeList::new(false);

        assert_eq!(list.pop(), None);
    }

    #[test]
    fn reuse_order_is_lifo() {
        let mut list = FreeList::new(false);

        list.push(coordinates(0));
        list.push(coordinates(8));
        list.push(coordinates(16));

        assert_eq!(list.pop(), Some(coordinates(16)));
        assert_eq!(list.pop(), Some(coordinates(8)));

        list.push(coordinates(24));

        assert_eq!(list.pop(), Some(coordinates(24)));
        assert_eq!(list.pop(), Some(coordinates(0)));
        assert_eq!(list.pop(), None);
    }

    #[test]
    fn capacity_is_kept_without_auto_free() {
        let mut list = FreeList::new(false);

        for offset in 0..64 {
            list.push(coordinates(offset));
        }

        let capacity = list.capacity();

        while list.pop().is_some() {}

        assert_eq!(list.capacity(), capacity);
    }

    #[test]
    fn auto_free_shrinks_at_half_occupancy() {
        let mut list = FreeList::new(true);

        for offset in 0..64 {
            list.push(coordinates(offset));
        }

        let capacity = list.capacity();
        assert!(capacity >= 64);

        while list.len() * 2 > capacity {
            _ = list.pop();
        }

        assert!(list.capacity() < capacity);
        assert!(list.capacity() >= list.len());
    }

    #[test]
    fn shrink_to_fit_releases_excess_capacity() {
        let mut list = FreeList::new(false);

        for offset in 0..64 {
            list.push(coordinates(offset));
        }

        while list.pop().is_some() {}

        list.shrink_to_fit();

        assert_eq!(list.capacity(), 0);
    }

    #[test]
    fn auto_free_can_be_toggled() {
        let mut list = FreeList::new(false);
        assert!(!list.auto_free());

        list.set_auto_free(true);
        assert!(list.auto_free());
    }
}
