use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{DropPolicy, Error, PoolAllocator, Validation};

/// The bucket size used when none is configured: 64 MiB.
///
/// Buckets reserve their full capacity up front, though memory that is never written to is
/// typically not backed by physical pages until first use.
#[cfg(not(miri))]
pub const DEFAULT_BUCKET_SIZE: NonZero<usize> = nz!(67_108_864);

/// The bucket size used when none is configured.
///
/// Miri test runtime scales by memory usage, so we use much smaller buckets under Miri.
#[cfg(miri)]
pub const DEFAULT_BUCKET_SIZE: NonZero<usize> = nz!(4_096);

/// Builder for creating an instance of [`PoolAllocator`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`PoolAllocator::new()`][1] is sufficient for most use
/// cases.
///
/// The bucket size trades footprint against growth frequency. Smaller buckets waste less
/// reserved memory but new buckets have to be created more often. Larger buckets are created
/// rarely but reserve more slack.
///
/// # Examples
///
/// ```
/// use bucket_pool::{DropPolicy, PoolAllocator, Validation};
/// use new_zealand::nz;
///
/// let pool = PoolAllocator::<u64>::builder()
///     .bucket_size(nz!(4096))
///     .validation(Validation::Enabled)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .auto_free(true)
///     .build();
///
/// assert_eq!(pool.slots_per_bucket(), 512);
/// ```
///
/// [1]: PoolAllocator::new
#[must_use]
pub struct PoolAllocatorBuilder<T> {
    bucket_size: NonZero<usize>,
    validation: Validation,
    drop_policy: DropPolicy,
    auto_free: bool,

    _item: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for PoolAllocatorBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocatorBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("bucket_size", &self.bucket_size)
            .field("validation", &self.validation)
            .field("drop_policy", &self.drop_policy)
            .field("auto_free", &self.auto_free)
            .finish()
    }
}

impl<T> PoolAllocatorBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            validation: Validation::default(),
            drop_policy: DropPolicy::default(),
            auto_free: false,
            _item: PhantomData,
        }
    }

    /// Sets the capacity of each bucket, in bytes.
    ///
    /// Must be at least the size of one element, which is checked when the pool is built.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucket_pool::PoolAllocator;
    /// use new_zealand::nz;
    ///
    /// let pool = PoolAllocator::<[u64; 2]>::builder()
    ///     .bucket_size(nz!(64))
    ///     .build();
    ///
    /// assert_eq!(pool.slots_per_bucket(), 4);
    /// ```
    pub fn bucket_size(mut self, bytes: NonZero<usize>) -> Self {
        self.bucket_size = bytes;
        self
    }

    /// Sets the [validation mode][Validation] used when slots are released.
    pub fn validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining elements in the pool when the pool is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Sets whether the free list storage is shrunk opportunistically.
    ///
    /// See [`PoolAllocator::set_auto_free()`].
    pub fn auto_free(mut self, enabled: bool) -> Self {
        self.auto_free = enabled;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or does not fit into one bucket.
    ///
    /// If the first bucket cannot be allocated, this is reported via
    /// [`std::alloc::handle_alloc_error()`]. Use [`try_build()`][Self::try_build]
    /// to handle this as an error instead.
    #[must_use]
    pub fn build(self) -> PoolAllocator<T> {
        let bucket_size = self.bucket_size;

        match self.try_build() {
            Ok(pool) => pool,
            Err(Error::BucketAllocation { .. }) => {
                std::alloc::handle_alloc_error(PoolAllocator::<T>::bucket_layout_for(bucket_size))
            }
            Err(error) => panic!("{error}"),
        }
    }

    /// Builds the pool with the specified configuration, reporting failure to allocate the
    /// first bucket as an error.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or does not fit into one bucket.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucket_pool::PoolAllocator;
    ///
    /// let pool = PoolAllocator::<u32>::builder().try_build()?;
    /// assert_eq!(pool.bucket_count(), 1);
    /// # Ok::<(), bucket_pool::Error>(())
    /// ```
    pub fn try_build(self) -> Result<PoolAllocator<T>, Error> {
        PoolAllocator::new_inner(
            self.bucket_size,
            self.validation,
            self.drop_policy,
            self.auto_free,
        )
    }
}
