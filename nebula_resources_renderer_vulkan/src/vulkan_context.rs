/// GpuContext - Shared GPU objects for all Vulkan resources
///
/// Contains everything a resource needs to destroy itself:
/// - Device for Vulkan API calls
/// - Allocator for memory management

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

/// Shared GPU context for all Vulkan resources.
///
/// Shared (via `Arc`) by buffers, textures and pipelines so each of them can
/// free its own memory and handles when the last reference goes away.
///
/// Note: device and instance destruction is handled by `VulkanRenderer::drop()`,
/// after every resource holding this context is gone.
pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// GPU memory allocator (shared, requires mutex for thread safety)
    /// Wrapped in ManuallyDrop to ensure it's dropped BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Graphics queue, drained by `wait_idle`
    pub graphics_queue: vk::Queue,

    /// Graphics queue family index
    pub graphics_queue_family: u32,
}

impl GpuContext {
    pub fn new(
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        graphics_queue: vk::Queue,
        graphics_queue_family: u32,
    ) -> Self {
        Self {
            device,
            allocator: ManuallyDrop::new(allocator),
            graphics_queue,
            graphics_queue_family,
        }
    }

    /// Free an allocation, tolerating a poisoned allocator lock
    ///
    /// Called from `Drop` impls, which must release the Vulkan handle even
    /// when the allocation cannot be returned.
    pub(crate) fn free_allocation(&self, allocation: gpu_allocator::vulkan::Allocation) {
        if let Ok(mut allocator) = self.allocator.lock() {
            allocator.free(allocation).ok();
        }
    }
}
