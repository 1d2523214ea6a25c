//! Basic usage of the `bucket_pool` crate:
//!
//! * Creating a pool.
//! * Allocating elements.
//! * Accessing elements.
//! * Releasing elements and reusing their slots.

use bucket_pool::PoolAllocator;

fn main() {
    let mut pool = PoolAllocator::<String>::new();

    // Allocating gives you a slot that you later pass back to release the element.
    let slots: Vec<_> = (0..10).map(|i| pool.allocate(i.to_string())).collect();

    println!(
        "Pool contains {} elements in {} bucket(s) of {} bytes",
        pool.len(),
        pool.bucket_count(),
        pool.bucket_size()
    );

    let (last, rest) = slots.split_last().expect("we allocated ten elements");

    println!("Last element: {}", pool.get(*last));
    pool.deallocate(*last);

    // The slot we just released is the first one to be reused.
    let reused = pool.allocate("reused".to_string());
    println!(
        "Reused the released slot: {}",
        reused.ptr() == last.ptr()
    );

    pool.get_mut(reused).push_str(" and modified");
    println!("Modified element: {}", pool.get(reused));

    for slot in rest {
        pool.deallocate(*slot);
    }

    // Elements that are never released are not dropped when the pool is dropped. Their
    // memory is returned together with the buckets.
    println!(
        "Dropping the pool with {} live element(s) whose destructors will not run",
        pool.len()
    );
}
