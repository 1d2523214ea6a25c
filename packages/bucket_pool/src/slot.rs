use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

use crate::SlotCoordinates;

/// The raw handle to an element allocated from a [`PoolAllocator`][crate::PoolAllocator].
///
/// A `Slot<T>` is a plain value: it can be copied freely and does nothing when dropped. The
/// element stays alive until the slot is passed to
/// [`PoolAllocator::deallocate()`][crate::PoolAllocator::deallocate]. Use the
/// [`SmartPoolAllocator`][crate::SmartPoolAllocator] if you want the element to be released
/// automatically.
///
/// The element can be accessed through the pool via
/// [`PoolAllocator::get()`][crate::PoolAllocator::get] and
/// [`PoolAllocator::get_mut()`][crate::PoolAllocator::get_mut], which verify that the slot is
/// still live. Alternatively, [`ptr()`][Self::ptr] gives direct access for unsafe code.
///
/// # Example
///
/// ```rust
/// use bucket_pool::PoolAllocator;
///
/// let mut pool = PoolAllocator::<String>::new();
///
/// let slot = pool.allocate("hello".to_string());
/// let copy = slot;
///
/// assert_eq!(pool.get(copy), "hello");
///
/// pool.deallocate(slot);
/// ```
pub struct Slot<T> {
    coordinates: SlotCoordinates,
    ptr: NonNull<T>,
}

impl<T> Slot<T> {
    #[must_use]
    pub(crate) fn new(coordinates: SlotCoordinates, ptr: NonNull<T>) -> Self {
        Self { coordinates, ptr }
    }

    #[must_use]
    pub(crate) fn coordinates(&self) -> SlotCoordinates {
        self.coordinates
    }

    /// Returns a pointer to the element.
    ///
    /// The pointer is valid for reads and writes until the slot is deallocated or the pool is
    /// dropped. The pool itself does not hold any references to the element, so the caller
    /// decides how to alias it, as long as the usual Rust aliasing rules are respected.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::PoolAllocator;
    ///
    /// let mut pool = PoolAllocator::<u64>::new();
    /// let slot = pool.allocate(42);
    ///
    /// // SAFETY: The slot has not been deallocated and no references to it exist.
    /// unsafe { slot.ptr().write(43) };
    ///
    /// assert_eq!(*pool.get(slot), 43);
    /// # pool.deallocate(slot);
    /// ```
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> NonNull<T> {
        self.ptr
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.coordinates == other.coordinates
    }
}

impl<T> Eq for Slot<T> {}

impl<T> Hash for Slot<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
        self.coordinates.hash(state);
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("coordinates", &self.coordinates)
            .field("ptr", &self.ptr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(Slot<String>: Copy, Eq, Hash, fmt::Debug);
    assert_not_impl_any!(Slot<u32>: Send, Sync);

    #[test]
    fn copies_compare_equal() {
        let mut value = 5_u32;
        let slot = Slot::new(SlotCoordinates::from_parts(1, 8), NonNull::from(&mut value));
        let copy = slot;

        assert_eq!(slot, copy);
        assert_eq!(copy.coordinates().bucket_index(), 1);
        assert_eq!(copy.coordinates().offset(), 8);
    }

    #[test]
    fn debug_output_names_item_type() {
        let mut value = 5_u32;
        let slot = Slot::new(SlotCoordinates::from_parts(0, 0), NonNull::from(&mut value));

        let output = format!("{slot:?}");

        assert!(output.contains("u32"));
        assert!(output.contains("coordinates"));
    }
}
