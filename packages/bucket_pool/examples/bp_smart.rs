//! Automatic release of pooled elements via the handles of `SmartPoolAllocator`:
//!
//! * Exclusive handles release their element at the end of their scope.
//! * Shared handles release their element when the last clone is dropped.
//! * Elements may own handles from the same allocator.

use bucket_pool::{PoolBox, SmartPoolAllocator};

struct Noisy(&'static str);

impl Drop for Noisy {
    fn drop(&mut self) {
        println!("Destroying {}", self.0);
    }
}

struct Node<'a> {
    name: &'static str,
    next: Option<PoolBox<'a, Node<'a>>>,
}

impl Drop for Node<'_> {
    fn drop(&mut self) {
        println!("Destroying node {}", self.name);
    }
}

fn main() {
    let allocator = SmartPoolAllocator::<Noisy>::new();

    let _outer = allocator.allocate(Noisy("outer"));

    {
        let _inner = allocator.allocate(Noisy("inner"));
        let shared = allocator.allocate_shared(Noisy("shared"));
        let _shared_copy = shared.clone();

        println!("{} elements are live inside the scope", allocator.len());
    }

    println!("{} element is live after the scope", allocator.len());

    let nodes = SmartPoolAllocator::<Node<'_>>::new();

    let tail = nodes.allocate(Node {
        name: "tail",
        next: None,
    });
    let head = nodes.allocate(Node {
        name: "head",
        next: Some(tail),
    });

    println!("Built a list of {} nodes", nodes.len());

    // Dropping the head releases the tail, too.
    drop(head);

    println!("{} nodes are live after dropping the head", nodes.len());
}
