/// Whether the pool verifies that a released slot belongs to it.
///
/// With validation enabled, every release locates the slot's address among the pool's
/// buckets and rejects it with [`Error::ForeignPointer`][crate::Error::ForeignPointer] if it
/// is not found. This costs a scan over the buckets.
///
/// Liveness is checked regardless of this setting, so releasing the same slot twice is always
/// detected.
///
/// # Examples
///
/// ```
/// use bucket_pool::{PoolAllocator, Validation};
///
/// let pool = PoolAllocator::<u64>::builder()
///     .validation(Validation::Disabled)
///     .build();
///
/// assert_eq!(pool.validation(), Validation::Disabled);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum Validation {
    /// Released slots are checked against the bucket address ranges. This is the default.
    #[default]
    Enabled,

    /// Released slots are trusted to come from this pool and are resolved by the bucket index
    /// and offset they carry. Releasing a slot from a different pool is then unspecified, but
    /// never touches memory outside this pool.
    Disabled,
}
