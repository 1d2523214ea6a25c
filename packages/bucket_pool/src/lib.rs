//! A typed pooling allocator with stable addresses and LIFO slot reuse.
//!
//! This crate provides [`PoolAllocator`], which stores elements of one type `T` in large
//! fixed-size buckets. New elements are bump-allocated from the most recent bucket and released
//! slots are kept on a LIFO free list, which is always consulted first. This makes allocation
//! and release O(1) and keeps the most recently used memory hot in the cache.
//!
//! # Key Features
//!
//! - **Stable memory addresses**: elements never move once allocated
//! - **LIFO reuse**: the most recently released slot is the first to be reused
//! - **Lazy growth**: a new bucket is created only when the current one is exhausted
//! - **Misuse detection**: double release is always detected, foreign slots are detected when
//!   [`Validation::Enabled`] is in effect (the default)
//! - **Two layers**: a manual layer ([`PoolAllocator`] with raw [`Slot`]s) and a smart layer
//!   ([`SmartPoolAllocator`] with [`PoolBox`] and [`PoolRc`] handles)
//! - **Compact bookkeeping**: the free list can shrink its storage on demand or automatically
//!
//! # Memory model
//!
//! Bucket memory is reserved up front and only returned to the system when the pool is
//! dropped. Slack at the end of a bucket that cannot fit another element is never used. If
//! the pool is dropped while elements are still live, their destructors do not run (see
//! [`DropPolicy`]).
//!
//! # Examples
//!
//! ## Manual allocation
//!
//! ```rust
//! use bucket_pool::PoolAllocator;
//! use new_zealand::nz;
//!
//! // Four 16-byte elements fit into each 64-byte bucket.
//! let mut pool = PoolAllocator::<[u64; 2]>::builder()
//!     .bucket_size(nz!(64))
//!     .build();
//!
//! let slots: Vec<_> = (0..5).map(|i| pool.allocate([i, i])).collect();
//! assert_eq!(pool.bucket_count(), 2);
//!
//! for slot in slots {
//!     pool.deallocate(slot);
//! }
//!
//! assert!(pool.is_empty());
//! ```
//!
//! ## Automatic release via handles
//!
//! ```rust
//! use bucket_pool::SmartPoolAllocator;
//!
//! let allocator = SmartPoolAllocator::<String>::new();
//!
//! let exclusive = allocator.allocate("mine".to_string());
//! let shared = allocator.allocate_shared("ours".to_string());
//! let shared_copy = shared.clone();
//!
//! assert_eq!(*exclusive, "mine");
//! assert_eq!(*shared_copy, "ours");
//!
//! drop(exclusive);
//! drop(shared);
//! drop(shared_copy);
//!
//! assert!(allocator.is_empty());
//! ```
//!
//! # Logging
//!
//! The pool emits [`tracing`](https://docs.rs/tracing) events at the `debug` level when
//! buckets are created and when a pool is dropped with live elements, and at the `trace`
//! level when free list storage is shrunk. No subscriber is installed by this crate.

mod bucket;
mod bucket_store;
mod builder;
mod coordinates;
mod drop_policy;
mod error;
mod free_list;
mod pool;
mod pool_box;
mod pool_rc;
mod slot;
mod smart;
mod validation;

pub(crate) use bucket::*;
pub(crate) use bucket_store::*;
pub use builder::*;
pub(crate) use coordinates::*;
pub use drop_policy::*;
pub use error::{ConstructError, Error};
pub(crate) use error::Result;
pub(crate) use free_list::*;
pub use pool::PoolAllocator;
pub use pool_box::PoolBox;
pub use pool_rc::PoolRc;
pub use slot::Slot;
pub use smart::SmartPoolAllocator;
pub use validation::*;
