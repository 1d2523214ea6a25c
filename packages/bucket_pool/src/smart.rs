use std::cell::RefCell;
use std::fmt;

use crate::{ConstructError, Error, PoolAllocator, PoolBox, PoolRc, Slot};

/// A [`PoolAllocator`] that hands out ownership-managed handles instead of raw slots.
///
/// * [`allocate()`][Self::allocate] returns a [`PoolBox`], an exclusive handle that releases
///   its element when dropped.
/// * [`allocate_shared()`][Self::allocate_shared] returns a [`PoolRc`], a reference-counted
///   handle that releases its element when the last clone is dropped.
///
/// Handles borrow the allocator, so the borrow checker guarantees that the allocator outlives
/// every handle it has issued:
///
/// ```rust,compile_fail
/// use bucket_pool::SmartPoolAllocator;
///
/// let allocator = SmartPoolAllocator::<u32>::new();
/// let handle = allocator.allocate(42);
///
/// drop(allocator); // error: cannot move out of `allocator` because it is borrowed
///
/// assert_eq!(*handle, 42);
/// ```
///
/// All methods take `&self`, so any number of handles can coexist with further allocations.
/// Elements are destroyed without the allocator being borrowed, which means an element may
/// itself own handles from the same allocator. Dropping such an element releases them, too.
///
/// # Teardown
///
/// A handle that is leaked (e.g. via [`mem::forget`][std::mem::forget] or an `Rc` cycle) ends
/// its borrow without releasing its element. When the allocator is later dropped, buckets that
/// still hold such live elements are leaked rather than freed, so a pinned element is never
/// left pointing at reused memory. [`DropPolicy::MustNotDropItems`][crate::DropPolicy] still
/// panics in that case.
///
/// # Thread safety
///
/// The allocator is single-threaded. It can be moved to another thread if `T` is [`Send`] and
/// no handles exist, but it is never [`Sync`]. Handles are neither [`Send`] nor [`Sync`].
///
/// # Example
///
/// ```rust
/// use bucket_pool::SmartPoolAllocator;
///
/// let allocator = SmartPoolAllocator::<String>::new();
///
/// let greeting = allocator.allocate("hello".to_string());
/// let shared = allocator.allocate_shared("world".to_string());
/// let shared_copy = shared.clone();
///
/// assert_eq!(allocator.len(), 2);
///
/// drop(greeting);
/// drop(shared);
/// assert_eq!(allocator.len(), 1);
///
/// drop(shared_copy);
/// assert!(allocator.is_empty());
/// ```
pub struct SmartPoolAllocator<T> {
    pool: RefCell<PoolAllocator<T>>,
}

impl<T> SmartPoolAllocator<T> {
    /// Creates a new allocator around a pool with the default configuration.
    ///
    /// To customize the pool, build a [`PoolAllocator`] and convert it via [`From`].
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or larger than the default bucket size.
    #[must_use]
    pub fn new() -> Self {
        Self::from(PoolAllocator::new())
    }

    /// Moves `value` into the pool and returns an exclusive handle to it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::SmartPoolAllocator;
    ///
    /// let allocator = SmartPoolAllocator::<Vec<u32>>::new();
    ///
    /// let mut numbers = allocator.allocate(vec![1, 2]);
    /// numbers.push(3);
    ///
    /// assert_eq!(*numbers, [1, 2, 3]);
    /// ```
    #[must_use]
    pub fn allocate(&self, value: T) -> PoolBox<'_, T> {
        PoolBox::new(self.allocate_slot_with(|| value), self)
    }

    /// Reserves a slot, constructs the element in it by calling `f` and returns an exclusive
    /// handle to it.
    ///
    /// The allocator is not borrowed while `f` runs, so `f` may allocate from the same
    /// allocator. If `f` panics, the reserved slot is lost.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::SmartPoolAllocator;
    ///
    /// let allocator = SmartPoolAllocator::<String>::new();
    ///
    /// let value = allocator.allocate_with(|| "constructed in place".to_string());
    ///
    /// assert_eq!(*value, "constructed in place");
    /// ```
    #[must_use]
    pub fn allocate_with(&self, f: impl FnOnce() -> T) -> PoolBox<'_, T> {
        PoolBox::new(self.allocate_slot_with(f), self)
    }

    /// Moves `value` into the pool and returns an exclusive handle to it, reporting failure to
    /// allocate a new bucket as an error.
    pub fn try_allocate(&self, value: T) -> Result<PoolBox<'_, T>, Error> {
        let coordinates = self.pool.borrow_mut().try_reserve_slot()?;
        let slot = self.pool.borrow_mut().occupy(coordinates, value);

        Ok(PoolBox::new(slot, self))
    }

    /// Reserves a slot and constructs the element in it by calling a fallible `f`, returning
    /// an exclusive handle to it.
    ///
    /// If `f` returns an error, the reserved slot is lost for the remaining lifetime of the
    /// pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::{ConstructError, SmartPoolAllocator};
    ///
    /// let allocator = SmartPoolAllocator::<u8>::new();
    ///
    /// let parsed = allocator.try_allocate_with(|| "7".parse::<u8>())?;
    /// assert_eq!(*parsed, 7);
    ///
    /// let failed = allocator.try_allocate_with(|| "700".parse::<u8>());
    /// assert!(matches!(failed, Err(ConstructError::Construct(_))));
    /// # Ok::<(), ConstructError<std::num::ParseIntError>>(())
    /// ```
    pub fn try_allocate_with<E>(
        &self,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<PoolBox<'_, T>, ConstructError<E>> {
        let coordinates = self.pool.borrow_mut().try_reserve_slot()?;

        match f() {
            Ok(value) => {
                let slot = self.pool.borrow_mut().occupy(coordinates, value);
                Ok(PoolBox::new(slot, self))
            }
            Err(error) => {
                PoolAllocator::<T>::log_lost_slot(coordinates);
                Err(ConstructError::Construct(error))
            }
        }
    }

    /// Moves `value` into the pool and returns a shared, reference-counted handle to it.
    ///
    /// The element is released when the last clone of the handle is dropped.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::{PoolRc, SmartPoolAllocator};
    ///
    /// let allocator = SmartPoolAllocator::<u64>::new();
    ///
    /// let first = allocator.allocate_shared(42);
    /// let second = first.clone();
    ///
    /// assert_eq!(PoolRc::strong_count(&first), 2);
    /// assert!(PoolRc::ptr_eq(&first, &second));
    /// ```
    #[must_use]
    pub fn allocate_shared(&self, value: T) -> PoolRc<'_, T> {
        PoolRc::new(self.allocate_slot_with(|| value), self)
    }

    /// Reserves a slot, constructs the element in it by calling `f` and returns a shared,
    /// reference-counted handle to it.
    #[must_use]
    pub fn allocate_shared_with(&self, f: impl FnOnce() -> T) -> PoolRc<'_, T> {
        PoolRc::new(self.allocate_slot_with(f), self)
    }

    /// Shrinks the free list storage to its current occupancy.
    ///
    /// See [`PoolAllocator::free_unused_memory()`].
    pub fn free_unused_memory(&self) {
        self.pool.borrow_mut().free_unused_memory();
    }

    /// Enables or disables opportunistic shrinking of the free list storage.
    ///
    /// See [`PoolAllocator::set_auto_free()`].
    pub fn set_auto_free(&self, enabled: bool) {
        self.pool.borrow_mut().set_auto_free(enabled);
    }

    /// Whether opportunistic shrinking of the free list storage is enabled.
    #[must_use]
    pub fn auto_free(&self) -> bool {
        self.pool.borrow().auto_free()
    }

    /// The number of live elements in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.borrow().len()
    }

    /// Whether the pool holds no live elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.borrow().is_empty()
    }

    /// The number of buckets the pool has reserved.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.pool.borrow().bucket_count()
    }

    /// The number of released slots waiting to be reused.
    #[must_use]
    pub fn free_list_len(&self) -> usize {
        self.pool.borrow().free_list_len()
    }

    /// The number of slots that were lost because constructing or destroying their element
    /// failed.
    #[must_use]
    pub fn leaked_slots(&self) -> usize {
        self.pool.borrow().leaked_slots()
    }

    /// Unwraps the underlying pool.
    ///
    /// This consumes the allocator, so it is only possible once no handles exist. The returned
    /// pool keeps leaking the buckets of live elements on drop, as leaked handles may have
    /// pinned them.
    #[must_use]
    pub fn into_inner(self) -> PoolAllocator<T> {
        self.pool.into_inner()
    }

    fn allocate_slot_with(&self, f: impl FnOnce() -> T) -> Slot<T> {
        // Each borrow ends with its statement, so `f` runs without the pool being borrowed.
        let coordinates = self.pool.borrow_mut().reserve_slot();
        let value = f();
        self.pool.borrow_mut().occupy(coordinates, value)
    }

    /// Drops the element in a slot issued by this allocator and recycles the slot.
    ///
    /// The element is dropped while the pool is not borrowed, so its destructor may release
    /// further slots of this allocator.
    pub(crate) fn release(&self, slot: Slot<T>) {
        let (coordinates, ptr) = self
            .pool
            .borrow_mut()
            .begin_release(slot)
            .unwrap_or_else(|e| panic!("handle pointed to a slot it does not own: {e}"));

        // SAFETY: `begin_release()` verified that the slot held a live element and moved it to
        // the reserved state. The handle that owned it is being consumed, so nothing else will
        // access or drop the element from now on.
        unsafe {
            ptr.drop_in_place();
        }

        self.pool.borrow_mut().finish_release(coordinates);
    }

    /// Moves the element out of a slot issued by this allocator and recycles the slot.
    pub(crate) fn release_into_inner(&self, slot: Slot<T>) -> T
    where
        T: Unpin,
    {
        self.pool.borrow_mut().take(slot)
    }
}

impl<T> Default for SmartPoolAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<PoolAllocator<T>> for SmartPoolAllocator<T> {
    /// Wraps an existing pool, e.g. one created with a custom configuration.
    ///
    /// The pool may already contain elements allocated through it directly. Those stay under
    /// manual management and are not released by any handle.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::{PoolAllocator, SmartPoolAllocator};
    /// use new_zealand::nz;
    ///
    /// let pool = PoolAllocator::<u64>::builder()
    ///     .bucket_size(nz!(4096))
    ///     .auto_free(true)
    ///     .build();
    ///
    /// let allocator = SmartPoolAllocator::from(pool);
    /// assert!(allocator.auto_free());
    /// ```
    fn from(mut pool: PoolAllocator<T>) -> Self {
        // Handles offer pinned access, so live elements must keep their memory.
        pool.retain_live_memory_on_drop();

        Self {
            pool: RefCell::new(pool),
        }
    }
}

impl<T> fmt::Debug for SmartPoolAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartPoolAllocator")
            .field("pool", &self.pool)
            .finish()
    }
}
