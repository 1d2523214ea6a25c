use thiserror::Error;

/// Errors reported by a [`PoolAllocator`][crate::PoolAllocator].
///
/// The `try_` family of methods return these as values. The plain methods panic with the
/// same message, except for bucket allocation failure, which is routed to
/// [`std::alloc::handle_alloc_error()`] like any other out-of-memory condition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The released slot does not lie within any bucket owned by this pool, or does not start
    /// at a slot boundary of the bucket it points into.
    ///
    /// Only reported when [`Validation::Enabled`][crate::Validation::Enabled] is in effect.
    #[error("foreign pointer {address:#x} does not belong to any bucket of this pool")]
    ForeignPointer {
        /// The address of the rejected slot.
        address: usize,
    },

    /// The slot does not currently hold a live element.
    ///
    /// This is what a double release looks like. It is also reported for slots whose element
    /// failed to construct, as those slots are never made live.
    #[error("slot at offset {offset} of bucket {bucket_index} does not hold a live element")]
    SlotNotLive {
        /// Index of the bucket the slot lives in.
        bucket_index: usize,

        /// Byte offset of the slot from the start of its bucket.
        offset: usize,
    },

    /// The memory allocator could not provide storage for a new bucket.
    #[error("failed to allocate a bucket of {bytes} bytes")]
    BucketAllocation {
        /// The requested bucket capacity.
        bytes: usize,
    },
}

/// The error returned by fallible construction, e.g.
/// [`PoolAllocator::try_allocate_with()`][crate::PoolAllocator::try_allocate_with].
///
/// If construction fails, the slot that was reserved for the element is not returned to the
/// free list. It stays reserved for the remaining lifetime of the pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConstructError<E> {
    /// The pool could not provide a slot.
    #[error(transparent)]
    Pool(#[from] Error),

    /// The element constructor reported a failure.
    #[error("element construction failed")]
    Construct(#[source] E),
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
