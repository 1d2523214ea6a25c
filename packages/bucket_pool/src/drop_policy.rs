/// Determines what happens to elements that are still live when the pool is dropped.
///
/// Either way, the pool never runs the destructors of such elements. Their slot memory is
/// released together with the buckets, except in pools behind a
/// [`SmartPoolAllocator`][crate::SmartPoolAllocator], which leak the buckets of live elements.
///
/// # Examples
///
/// ```
/// use bucket_pool::{DropPolicy, PoolAllocator};
///
/// let pool = PoolAllocator::<u32>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Live elements are abandoned without running their destructors. This is the default.
    #[default]
    LeakItems,

    /// The pool will panic if it still contains live elements when it is dropped.
    ///
    /// This is a leak detector for code that is expected to release everything it allocates.
    MustNotDropItems,
}
