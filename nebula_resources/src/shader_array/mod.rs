/// Shader array module - index allocation for bindless arrays

pub mod index_allocator;
pub mod texture_binding;

pub use index_allocator::{IndexAllocator, IndexHandle};
pub use texture_binding::BindlessTextureBinding;
