use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::ptr::NonNull;

use crate::{PoolRc, Slot, SmartPoolAllocator};

/// An exclusive handle to an element in a [`SmartPoolAllocator`].
///
/// The handle owns the element the way a [`Box`] would: it dereferences to the element, it
/// cannot be cloned and dropping it destroys the element and returns the slot to the pool.
///
/// The element never moves while it is live, and its memory is not reused before its destructor
/// has run, even if the handle is leaked and the allocator dropped. Pinned access is therefore
/// available through [`as_pin()`][Self::as_pin] and [`as_pin_mut()`][Self::as_pin_mut].
///
/// # Example
///
/// ```rust
/// use bucket_pool::SmartPoolAllocator;
///
/// let allocator = SmartPoolAllocator::<String>::new();
///
/// {
///     let mut greeting = allocator.allocate("Hello".to_string());
///     greeting.push_str(", World!");
///
///     assert_eq!(*greeting, "Hello, World!");
/// }
///
/// // The handle went out of scope, so the element was released.
/// assert!(allocator.is_empty());
/// ```
pub struct PoolBox<'a, T> {
    slot: Slot<T>,
    allocator: &'a SmartPoolAllocator<T>,
}

impl<'a, T> PoolBox<'a, T> {
    #[must_use]
    pub(crate) fn new(slot: Slot<T>, allocator: &'a SmartPoolAllocator<T>) -> Self {
        Self { slot, allocator }
    }

    /// Returns a pointer to the element.
    ///
    /// The pointer stays valid until the element is released, which happens no earlier than
    /// when this handle (or the shared handle it is converted into) is dropped.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> NonNull<T> {
        self.slot.ptr()
    }

    /// Returns a pinned shared reference to the element.
    #[must_use]
    pub fn as_pin(&self) -> Pin<&T> {
        // SAFETY: The element never moves while it is live. The only way to move it out is
        // `into_inner()`, which requires `T: Unpin`. If the handle is leaked, the allocator
        // leaks the bucket on drop instead of freeing it.
        unsafe { Pin::new_unchecked(&**self) }
    }

    /// Returns a pinned exclusive reference to the element.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::future::Future;
    /// use std::task::{Context, Poll, Waker};
    ///
    /// use bucket_pool::SmartPoolAllocator;
    ///
    /// let allocator = SmartPoolAllocator::new();
    /// let mut future = allocator.allocate(async { 42 });
    ///
    /// let mut cx = Context::from_waker(Waker::noop());
    /// assert_eq!(future.as_pin_mut().poll(&mut cx), Poll::Ready(42));
    /// ```
    #[must_use]
    pub fn as_pin_mut(&mut self) -> Pin<&mut T> {
        // SAFETY: The element never moves while it is live. The only way to move it out is
        // `into_inner()`, which requires `T: Unpin`. If the handle is leaked, the allocator
        // leaks the bucket on drop instead of freeing it.
        unsafe { Pin::new_unchecked(&mut **self) }
    }

    /// Converts the handle into a shared handle without releasing the element.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::SmartPoolAllocator;
    ///
    /// let allocator = SmartPoolAllocator::<u32>::new();
    ///
    /// let mut exclusive = allocator.allocate(1);
    /// *exclusive += 1;
    ///
    /// let shared = exclusive.into_shared();
    /// let copy = shared.clone();
    ///
    /// assert_eq!(*copy, 2);
    /// ```
    #[must_use]
    pub fn into_shared(self) -> PoolRc<'a, T> {
        let this = ManuallyDrop::new(self);

        PoolRc::new(this.slot, this.allocator)
    }

    /// Moves the element out of the pool, recycling the slot without dropping the element.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::SmartPoolAllocator;
    ///
    /// let allocator = SmartPoolAllocator::<String>::new();
    ///
    /// let handle = allocator.allocate("keep me".to_string());
    /// let value: String = handle.into_inner();
    ///
    /// assert_eq!(value, "keep me");
    /// assert!(allocator.is_empty());
    /// ```
    #[must_use]
    pub fn into_inner(self) -> T
    where
        T: Unpin,
    {
        let this = ManuallyDrop::new(self);

        this.allocator.release_into_inner(this.slot)
    }
}

impl<T> Deref for PoolBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: The element is live for as long as this handle exists and the handle is its
        // only owner, so shared access follows the borrow of the handle.
        unsafe { self.slot.ptr().as_ref() }
    }
}

impl<T> DerefMut for PoolBox<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: The element is live for as long as this handle exists and the handle is its
        // only owner, so exclusive access follows the exclusive borrow of the handle.
        unsafe { self.slot.ptr().as_mut() }
    }
}

impl<T> Drop for PoolBox<'_, T> {
    fn drop(&mut self) {
        self.allocator.release(self.slot);
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBox")
            .field("slot", &self.slot)
            .field("value", &**self)
            .finish()
    }
}
