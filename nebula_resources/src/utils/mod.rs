/// Utility types shared across the resource layer

pub mod slot_allocator;

pub use slot_allocator::SlotAllocator;
