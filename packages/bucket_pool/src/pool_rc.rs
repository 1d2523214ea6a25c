use std::fmt;
use std::ops::Deref;
use std::pin::Pin;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::{Slot, SmartPoolAllocator};

/// A shared, reference-counted handle to an element in a [`SmartPoolAllocator`].
///
/// Cloning the handle creates another reference to the same element. The element is destroyed
/// and its slot returned to the pool when the last clone is dropped.
///
/// Only shared access to the element is possible, as with [`Rc`]. Use interior mutability in
/// the element type if you need to mutate it through shared handles.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
///
/// use bucket_pool::{PoolRc, SmartPoolAllocator};
///
/// let allocator = SmartPoolAllocator::<Cell<u32>>::new();
///
/// let counter = allocator.allocate_shared(Cell::new(0));
/// let other = counter.clone();
///
/// other.set(other.get() + 1);
/// assert_eq!(counter.get(), 1);
///
/// drop(counter);
/// assert_eq!(allocator.len(), 1);
///
/// drop(other);
/// assert!(allocator.is_empty());
/// ```
pub struct PoolRc<'a, T> {
    inner: Rc<PoolRcInner<'a, T>>,
}

/// The shared control block. Releasing happens when this is dropped, which `Rc` guarantees to
/// happen exactly once.
struct PoolRcInner<'a, T> {
    slot: Slot<T>,
    allocator: &'a SmartPoolAllocator<T>,
}

impl<'a, T> PoolRc<'a, T> {
    #[must_use]
    pub(crate) fn new(slot: Slot<T>, allocator: &'a SmartPoolAllocator<T>) -> Self {
        Self {
            inner: Rc::new(PoolRcInner { slot, allocator }),
        }
    }

    /// Returns a pointer to the element.
    ///
    /// The pointer stays valid until the last clone of this handle is dropped.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> NonNull<T> {
        self.inner.slot.ptr()
    }

    /// Returns a pinned shared reference to the element.
    #[must_use]
    pub fn as_pin(&self) -> Pin<&T> {
        // SAFETY: The element never moves while it is live and shared handles offer no way to
        // move it out. If the handles are leaked, the allocator leaks the bucket on drop
        // instead of freeing it.
        unsafe { Pin::new_unchecked(&**self) }
    }

    /// The number of handles referring to the element, including this one.
    ///
    /// This is an associated function, so it does not shadow methods of the element.
    #[must_use]
    pub fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.inner)
    }

    /// Whether two handles refer to the same element.
    ///
    /// This is an associated function, so it does not shadow methods of the element.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::{PoolRc, SmartPoolAllocator};
    ///
    /// let allocator = SmartPoolAllocator::<u32>::new();
    ///
    /// let a = allocator.allocate_shared(1);
    /// let b = a.clone();
    /// let c = allocator.allocate_shared(1);
    ///
    /// assert!(PoolRc::ptr_eq(&a, &b));
    /// assert!(!PoolRc::ptr_eq(&a, &c));
    /// ```
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.inner, &other.inner)
    }
}

impl<T> Clone for PoolRc<'_, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Deref for PoolRc<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: The element stays live while any clone of this handle exists and the handles
        // only ever create shared references to it.
        unsafe { self.inner.slot.ptr().as_ref() }
    }
}

impl<T> Drop for PoolRcInner<'_, T> {
    fn drop(&mut self) {
        self.allocator.release(self.slot);
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolRc<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRc")
            .field("slot", &self.inner.slot)
            .field("strong_count", &Self::strong_count(self))
            .field("value", &**self)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(PoolRc<'static, String>: Clone, Deref, fmt::Debug);
    assert_not_impl_any!(PoolRc<'static, String>: Send, Sync);

    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    #[cfg_attr(miri, ignore = "the bucket of the leaked element is leaked on purpose")]
    fn leaked_shared_element_outlives_its_allocator() {
        let drops = Rc::new(Cell::new(0));

        let ptr = {
            let allocator = SmartPoolAllocator::<DropCounter>::new();

            let handle = allocator.allocate_shared(DropCounter {
                drops: Rc::clone(&drops),
            });
            let copy = handle.clone();

            let ptr = NonNull::from(&*handle.as_pin());

            std::mem::forget(copy);
            drop(handle);
            ptr
        };

        assert_eq!(drops.get(), 0);

        // SAFETY: The element was never dropped, so its memory must stay valid.
        let observed = unsafe { Rc::strong_count(&ptr.as_ref().drops) };
        assert_eq!(observed, 2);
    }

    #[test]
    fn copies_share_one_element() {
        let allocator = SmartPoolAllocator::<u64>::new();

        let a = allocator.allocate_shared(7);
        let b = a.clone();

        assert_eq!(a.ptr(), b.ptr());
        assert_eq!(*a, *b);
        assert_eq!(PoolRc::strong_count(&b), 2);
        assert_eq!(allocator.len(), 1);
    }

    #[test]
    fn destructor_runs_once_when_last_copy_drops() {
        let drops = Rc::new(Cell::new(0));
        let allocator = SmartPoolAllocator::<DropCounter>::new();

        let copies: Vec<_> = {
            let first = allocator.allocate_shared_with(|| DropCounter {
                drops: Rc::clone(&drops),
            });

            (0..5).map(|_| first.clone()).collect()
        };

        assert_eq!(copies.first().map(PoolRc::strong_count), Some(5));

        drop(copies);

        assert_eq!(drops.get(), 1);
        assert!(allocator.is_empty());
    }

    #[test]
    fn pinned_access_points_at_the_element() {
        let allocator = SmartPoolAllocator::<u64>::new();

        let handle = allocator.allocate_shared(5);

        assert_eq!(*handle.as_pin(), 5);
    }

    #[test]
    fn debug_output_includes_count_and_value() {
        let allocator = SmartPoolAllocator::<u64>::new();

        let handle = allocator.allocate_shared(4321);
        let _copy = handle.clone();

        let output = format!("{handle:?}");

        assert!(output.contains("4321"));
        assert!(output.contains("strong_count: 2"));
    }
}
