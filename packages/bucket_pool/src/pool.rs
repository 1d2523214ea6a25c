use std::alloc::{Layout, handle_alloc_error};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;
use std::ptr::NonNull;

use num_integer::Integer;
use tracing::debug;

use crate::{
    Bucket, BucketStore, ConstructError, DropPolicy, Error, FreeList, PoolAllocatorBuilder,
    Result, Slot, SlotCoordinates, SlotState, Validation,
};

/// A pooling allocator for elements of type `T`.
///
/// Memory is reserved in large fixed-size buckets. New elements are bump-allocated from the
/// most recent bucket; once it cannot fit another element, a new bucket is created. Released
/// slots are kept on a LIFO free list and handed out again before any new memory is used, so
/// the most recently released slot is always the first to be reused.
///
/// Elements never move: a [`Slot`] points at the same address from allocation until
/// deallocation. Bucket memory is only returned to the system when the pool is dropped.
///
/// This is the manual layer. Every [`allocate()`][Self::allocate] must be paired with a
/// [`deallocate()`][Self::deallocate]. For automatic release via handles, wrap the pool in a
/// [`SmartPoolAllocator`][crate::SmartPoolAllocator].
///
/// # Misuse detection
///
/// Releasing a slot twice is always detected and reported, because the pool tracks the state
/// of every slot. Releasing a slot that came from a different pool is detected when
/// [`Validation::Enabled`] is in effect (the default).
///
/// # Teardown
///
/// Dropping the pool releases all bucket memory but does not run the destructors of elements
/// that are still live. Use [`DropPolicy::MustNotDropItems`] to turn this into a panic.
///
/// Once the pool is wrapped in a [`SmartPoolAllocator`][crate::SmartPoolAllocator], buckets
/// that still hold live elements are leaked instead, because those elements may be pinned.
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) if `T` is, but not thread-safe ([`Sync`]). Share it
/// across threads only behind your own synchronization.
///
/// # Example
///
/// ```rust
/// use bucket_pool::PoolAllocator;
///
/// let mut pool = PoolAllocator::<String>::new();
///
/// let a = pool.allocate("a".to_string());
/// let b = pool.allocate("b".to_string());
///
/// pool.deallocate(a);
///
/// // The released slot is reused first.
/// let c = pool.allocate("c".to_string());
/// assert_eq!(c.ptr(), a.ptr());
/// assert_eq!(pool.get(c), "c");
///
/// pool.deallocate(b);
/// pool.deallocate(c);
/// assert!(pool.is_empty());
/// ```
pub struct PoolAllocator<T> {
    store: BucketStore,
    free_list: FreeList,
    validation: Validation,

    // We own values of type T but do not drop them when the pool is dropped, so we do not
    // want drop check to treat the pool as dropping T. This allows elements to borrow the
    // pool they live in (see `SmartPoolAllocator`).
    _item: PhantomData<fn() -> T>,
}

impl<T> PoolAllocator<T> {
    pub(crate) fn new_inner(
        bucket_size: NonZero<usize>,
        validation: Validation,
        drop_policy: DropPolicy,
        auto_free: bool,
    ) -> Result<Self> {
        assert!(
            size_of::<T>() > 0,
            "PoolAllocator must have non-zero item size"
        );

        assert!(
            size_of::<T>() <= bucket_size.get(),
            "an element of {} ({} bytes) does not fit into a bucket of {bucket_size} bytes",
            type_name::<T>(),
            size_of::<T>()
        );

        let store = BucketStore::new(
            bucket_size,
            Layout::new::<T>(),
            drop_policy,
            type_name::<T>(),
        )?;

        Ok(Self {
            store,
            free_list: FreeList::new(auto_free),
            validation,
            _item: PhantomData,
        })
    }

    /// Creates a new pool with the default configuration.
    ///
    /// One bucket of [`DEFAULT_BUCKET_SIZE`][crate::DEFAULT_BUCKET_SIZE] bytes is reserved
    /// immediately.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or larger than the default bucket size.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new pool.
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::PoolAllocator;
    /// use new_zealand::nz;
    ///
    /// let pool = PoolAllocator::<u64>::builder()
    ///     .bucket_size(nz!(1024))
    ///     .build();
    ///
    /// assert_eq!(pool.slots_per_bucket(), 128);
    /// ```
    pub fn builder() -> PoolAllocatorBuilder<T> {
        PoolAllocatorBuilder::new()
    }

    /// Moves `value` into a slot and returns the slot.
    ///
    /// The slot is taken from the free list if possible, otherwise it is bump-allocated,
    /// creating a new bucket if the current one is exhausted.
    ///
    /// Failure to allocate a new bucket is reported via [`handle_alloc_error()`]. Use
    /// [`try_allocate()`][Self::try_allocate] to handle this as an error instead.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::PoolAllocator;
    ///
    /// let mut pool = PoolAllocator::<u32>::new();
    ///
    /// let slot = pool.allocate(42);
    /// assert_eq!(*pool.get(slot), 42);
    /// # pool.deallocate(slot);
    /// ```
    #[must_use]
    pub fn allocate(&mut self, value: T) -> Slot<T> {
        let coordinates = self.reserve_slot();
        self.occupy(coordinates, value)
    }

    /// Reserves a slot and then constructs the element in it by calling `f`.
    ///
    /// If `f` panics, the reserved slot is lost for the remaining lifetime of the pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::PoolAllocator;
    ///
    /// let mut pool = PoolAllocator::<Vec<u8>>::new();
    ///
    /// let slot = pool.allocate_with(|| Vec::with_capacity(16));
    /// assert!(pool.get(slot).capacity() >= 16);
    /// # pool.deallocate(slot);
    /// ```
    #[must_use]
    pub fn allocate_with(&mut self, f: impl FnOnce() -> T) -> Slot<T> {
        let coordinates = self.reserve_slot();
        let value = f();
        self.occupy(coordinates, value)
    }

    /// Moves `value` into a slot and returns the slot, reporting failure to allocate a new
    /// bucket as an error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::PoolAllocator;
    ///
    /// let mut pool = PoolAllocator::<u32>::new();
    ///
    /// let slot = pool.try_allocate(42)?;
    /// assert_eq!(*pool.get(slot), 42);
    /// # pool.deallocate(slot);
    /// # Ok::<(), bucket_pool::Error>(())
    /// ```
    pub fn try_allocate(&mut self, value: T) -> Result<Slot<T>> {
        let coordinates = self.try_reserve_slot()?;
        Ok(self.occupy(coordinates, value))
    }

    /// Reserves a slot and then constructs the element in it by calling a fallible `f`.
    ///
    /// If `f` returns an error, the error is passed to the caller and the reserved slot is
    /// lost for the remaining lifetime of the pool. It is not returned to the free list.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::{ConstructError, PoolAllocator};
    ///
    /// let mut pool = PoolAllocator::<u32>::new();
    ///
    /// let result = pool.try_allocate_with(|| "not a number".parse::<u32>());
    ///
    /// assert!(matches!(result, Err(ConstructError::Construct(_))));
    /// assert_eq!(pool.leaked_slots(), 1);
    /// ```
    pub fn try_allocate_with<E>(
        &mut self,
        f: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<Slot<T>, ConstructError<E>> {
        let coordinates = self.try_reserve_slot()?;

        match f() {
            Ok(value) => Ok(self.occupy(coordinates, value)),
            Err(error) => {
                Self::log_lost_slot(coordinates);
                Err(ConstructError::Construct(error))
            }
        }
    }

    /// Drops the element in the slot and recycles the slot.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not hold a live element of this pool. See
    /// [`try_deallocate()`][Self::try_deallocate] for the exact conditions.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::PoolAllocator;
    ///
    /// let mut pool = PoolAllocator::<String>::new();
    ///
    /// let slot = pool.allocate("hello".to_string());
    /// assert_eq!(pool.len(), 1);
    ///
    /// pool.deallocate(slot);
    /// assert_eq!(pool.len(), 0);
    /// ```
    pub fn deallocate(&mut self, slot: Slot<T>) {
        if let Err(error) = self.try_deallocate(slot) {
            panic!("{error}");
        }
    }

    /// Drops the element in the slot and recycles the slot, reporting misuse as an error.
    ///
    /// The destructor of the element runs exactly once, before the slot is pushed onto the
    /// free list.
    ///
    /// # Errors
    ///
    /// * [`Error::ForeignPointer`] if validation is enabled and the slot does not belong to
    ///   this pool.
    /// * [`Error::SlotNotLive`] if the slot has already been deallocated or its element was
    ///   never successfully constructed.
    ///
    /// The pool is left unchanged when an error is returned.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::{Error, PoolAllocator};
    ///
    /// let mut pool = PoolAllocator::<u32>::new();
    ///
    /// let slot = pool.allocate(1);
    /// pool.try_deallocate(slot)?;
    ///
    /// // Releasing the same slot again is detected.
    /// assert!(matches!(
    ///     pool.try_deallocate(slot),
    ///     Err(Error::SlotNotLive { .. })
    /// ));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn try_deallocate(&mut self, slot: Slot<T>) -> Result<()> {
        let (coordinates, ptr) = self.begin_release(slot)?;

        // SAFETY: `begin_release()` verified that the slot held a live element and moved it to
        // the reserved state, so nothing else will access or drop the element from now on.
        unsafe {
            ptr.drop_in_place();
        }

        self.finish_release(coordinates);

        Ok(())
    }

    /// Moves the element out of the slot and recycles the slot without dropping the element.
    ///
    /// Requires `T: Unpin` because pooled elements may be pinned in place (e.g. via
    /// [`PoolBox::as_pin_mut()`][crate::PoolBox::as_pin_mut]).
    ///
    /// # Panics
    ///
    /// Panics if the slot does not hold a live element of this pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::PoolAllocator;
    ///
    /// let mut pool = PoolAllocator::<String>::new();
    ///
    /// let slot = pool.allocate("hello".to_string());
    /// let value = pool.take(slot);
    ///
    /// assert_eq!(value, "hello");
    /// assert!(pool.is_empty());
    /// ```
    #[must_use]
    pub fn take(&mut self, slot: Slot<T>) -> T
    where
        T: Unpin,
    {
        let (coordinates, ptr) = self.begin_release(slot).unwrap_or_else(|e| panic!("{e}"));

        // SAFETY: `begin_release()` verified that the slot held a live element and moved it to
        // the reserved state, so we are the only ones accessing it. Once recycled, the slot is
        // treated as uninitialized, so reading the value out does not result in a double drop.
        let value = unsafe { ptr.read() };

        self.finish_release(coordinates);

        value
    }

    /// Returns a shared reference to the element in the slot.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not hold a live element of this pool.
    #[must_use]
    pub fn get(&self, slot: Slot<T>) -> &T {
        let ptr = self.live_element_ptr(slot);

        // SAFETY: The element is live and we hand out references to it only under the borrow
        // rules of the pool itself.
        unsafe { ptr.as_ref() }
    }

    /// Returns an exclusive reference to the element in the slot.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not hold a live element of this pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bucket_pool::PoolAllocator;
    ///
    /// let mut pool = PoolAllocator::<String>::new();
    ///
    /// let slot = pool.allocate("Hello".to_string());
    /// pool.get_mut(slot).push_str(", World!");
    ///
    /// assert_eq!(pool.get(slot), "Hello, World!");
    /// # pool.deallocate(slot);
    /// ```
    #[must_use]
    pub fn get_mut(&mut self, slot: Slot<T>) -> &mut T {
        let mut ptr = self.live_element_ptr(slot);

        // SAFETY: The element is live and we hand out references to it only under the borrow
        // rules of the pool itself.
        unsafe { ptr.as_mut() }
    }

    /// Whether `ptr` points into the reserved memory of any bucket of this pool.
    ///
    /// This is the same ownership check that is applied to released slots when validation is
    /// enabled, without requiring the pointer to be the start of a live slot.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::ptr::NonNull;
    ///
    /// use bucket_pool::PoolAllocator;
    ///
    /// let mut pool = PoolAllocator::<u64>::new();
    /// let slot = pool.allocate(1);
    ///
    /// let outsider = 2_u64;
    ///
    /// assert!(pool.contains(slot.ptr()));
    /// assert!(!pool.contains(NonNull::from(&outsider)));
    /// # pool.deallocate(slot);
    /// ```
    #[must_use]
    pub fn contains(&self, ptr: NonNull<T>) -> bool {
        self.store.contains_address(ptr.addr().get())
    }

    /// Shrinks the free list storage to its current occupancy.
    ///
    /// This only affects the bookkeeping of released slots. Live elements and bucket memory
    /// are not touched.
    pub fn free_unused_memory(&mut self) {
        self.free_list.shrink_to_fit();
    }

    /// Enables or disables opportunistic shrinking of the free list storage.
    ///
    /// When enabled, the free list storage is shrunk whenever taking a slot from it leaves it
    /// at most half full. This keeps the bookkeeping small after a burst of releases, at the
    /// cost of reallocating the storage if the burst repeats.
    pub fn set_auto_free(&mut self, enabled: bool) {
        self.free_list.set_auto_free(enabled);
    }

    /// Whether opportunistic shrinking of the free list storage is enabled.
    #[must_use]
    pub fn auto_free(&self) -> bool {
        self.free_list.auto_free()
    }

    /// The number of live elements in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.occupied()
    }

    /// Whether the pool holds no live elements.
    ///
    /// An empty pool still holds on to all of its buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of buckets the pool has reserved. Never zero.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.store.bucket_count()
    }

    /// The capacity of each bucket, in bytes.
    #[must_use]
    pub fn bucket_size(&self) -> NonZero<usize> {
        self.store.bucket_size()
    }

    /// The number of elements that fit into one bucket.
    #[must_use]
    pub fn slots_per_bucket(&self) -> usize {
        let (slots, _) = self.bucket_size().get().div_rem(&size_of::<T>());
        slots
    }

    /// The number of released slots waiting to be reused.
    #[must_use]
    pub fn free_list_len(&self) -> usize {
        self.free_list.len()
    }

    /// The number of released slots the free list can hold without growing its storage.
    #[must_use]
    pub fn free_list_capacity(&self) -> usize {
        self.free_list.capacity()
    }

    /// The number of slots that were lost because constructing or destroying their element
    /// failed.
    ///
    /// This scans every slot of the pool, so it is intended for diagnostics, not hot paths.
    #[must_use]
    pub fn leaked_slots(&self) -> usize {
        self.store.count_in_state(SlotState::Reserved)
    }

    /// The validation mode of the pool.
    #[must_use]
    pub fn validation(&self) -> Validation {
        self.validation
    }

    /// The drop policy of the pool.
    #[must_use]
    pub fn drop_policy(&self) -> DropPolicy {
        self.store.drop_policy()
    }

    /// Takes a slot from the free list or bump-allocates a new one, leaving it reserved for an
    /// element that is yet to be constructed.
    pub(crate) fn try_reserve_slot(&mut self) -> Result<SlotCoordinates> {
        let coordinates = match self.free_list.pop() {
            Some(coordinates) => coordinates,
            None => self.store.next_slot()?,
        };

        self.store.set_state(coordinates, SlotState::Reserved);

        Ok(coordinates)
    }

    /// Like [`try_reserve_slot()`][Self::try_reserve_slot] but treats failure to allocate a
    /// bucket like any other out-of-memory condition.
    pub(crate) fn reserve_slot(&mut self) -> SlotCoordinates {
        match self.try_reserve_slot() {
            Ok(coordinates) => coordinates,
            Err(Error::BucketAllocation { .. }) => handle_alloc_error(self.store.bucket_layout()),
            Err(error) => panic!("{error}"),
        }
    }

    /// Moves a value into a reserved slot, making it live.
    pub(crate) fn occupy(&mut self, coordinates: SlotCoordinates, value: T) -> Slot<T> {
        debug_assert_eq!(
            self.store.state(coordinates),
            Some(SlotState::Reserved),
            "only reserved slots can be occupied"
        );

        let ptr = self.store.slot_ptr(coordinates).cast::<T>();

        // SAFETY: The slot is reserved, so it does not hold a live element that we would
        // overwrite. Slots are sized and aligned for T by construction.
        unsafe {
            ptr.write(value);
        }

        self.store.set_state(coordinates, SlotState::Occupied);

        #[cfg(debug_assertions)]
        self.store.check_slot(coordinates, SlotState::Occupied);

        Slot::new(coordinates, ptr)
    }

    /// Makes the pool leak, rather than free, the buckets that still hold live elements when
    /// it is dropped. Elements that may have been pinned must keep their memory until their
    /// destructor runs, which for a leaked handle is never.
    pub(crate) fn retain_live_memory_on_drop(&mut self) {
        self.store.retain_occupied_buckets();
    }

    /// Logs that a reserved slot will never receive an element because its constructor
    /// returned an error. The slot is already lost at this point, as it stays reserved.
    ///
    /// A constructor that panics loses its slot the same way but unwinds past this.
    pub(crate) fn log_lost_slot(coordinates: SlotCoordinates) {
        debug!(
            bucket_index = coordinates.bucket_index(),
            offset = coordinates.offset(),
            item_type = type_name::<T>(),
            "element construction failed, slot is lost"
        );
    }

    /// First half of releasing a slot: validates it and takes the element out of the live set.
    ///
    /// On success, the slot is reserved and the caller is responsible for disposing of the
    /// element behind the returned pointer, then calling
    /// [`finish_release()`][Self::finish_release]. The pool itself stays unborrowed while the
    /// element is being disposed of.
    pub(crate) fn begin_release(
        &mut self,
        slot: Slot<T>,
    ) -> Result<(SlotCoordinates, NonNull<T>)> {
        let coordinates = self.resolve(slot)?;

        if self.store.state(coordinates) != Some(SlotState::Occupied) {
            return Err(Error::SlotNotLive {
                bucket_index: coordinates.bucket_index(),
                offset: coordinates.offset(),
            });
        }

        self.store.set_state(coordinates, SlotState::Reserved);

        Ok((coordinates, self.store.slot_ptr(coordinates).cast()))
    }

    /// Second half of releasing a slot: makes it available for reuse.
    pub(crate) fn finish_release(&mut self, coordinates: SlotCoordinates) {
        self.store.set_state(coordinates, SlotState::Vacant);
        self.free_list.push(coordinates);
    }

    /// Determines which of our slots the caller means, applying the ownership check if
    /// validation is enabled.
    fn resolve(&self, slot: Slot<T>) -> Result<SlotCoordinates> {
        match self.validation {
            Validation::Disabled => Ok(slot.coordinates()),
            Validation::Enabled => {
                let address = slot.ptr().addr().get();

                match self.store.locate(address) {
                    Some(coordinates) if coordinates == slot.coordinates() => Ok(coordinates),
                    _ => Err(Error::ForeignPointer { address }),
                }
            }
        }
    }

    fn live_element_ptr(&self, slot: Slot<T>) -> NonNull<T> {
        let coordinates = self.resolve(slot).unwrap_or_else(|e| panic!("{e}"));

        assert!(
            self.store.state(coordinates) == Some(SlotState::Occupied),
            "{}",
            Error::SlotNotLive {
                bucket_index: coordinates.bucket_index(),
                offset: coordinates.offset(),
            }
        );

        self.store.slot_ptr(coordinates).cast()
    }

    pub(crate) fn bucket_layout_for(bucket_size: NonZero<usize>) -> Layout {
        Bucket::layout_for(bucket_size, Layout::new::<T>())
    }
}

impl<T> Default for PoolAllocator<T> {
    /// Creates a new pool with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or larger than the default bucket size.
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PoolAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("store", &self.store)
            .field("free_list", &self.free_list)
            .field("validation", &self.validation)
            .finish()
    }
}

// SAFETY: The raw pointers into bucket memory are owned exclusively by the pool and there is
// nothing thread-bound about them, so as long as T itself can move between threads, the pool
// can do so, too.
unsafe impl<T: Send> Send for PoolAllocator<T> {}
