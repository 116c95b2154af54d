/// Buffer - Vulkan implementation of the nebula Buffer trait

use nebula_resources::nebula::{
    Result,
    render::{Buffer as RendererBuffer, BufferUsage},
};
use nebula_resources::{engine_bail, engine_bail_invalid};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use std::any::Any;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// Host-visible Vulkan buffer
///
/// Allocated in `CpuToGpu` memory and persistently mapped, so `update`
/// is a plain copy into the mapping.
pub struct Buffer {
    /// Shared GPU context (device, allocator)
    ctx: Arc<GpuContext>,
    /// Vulkan buffer
    pub(crate) buffer: vk::Buffer,
    /// GPU memory allocation
    pub(crate) allocation: Option<Allocation>,
    /// Buffer size
    pub(crate) size: u64,
    /// Usage the buffer was created for
    pub(crate) usage: BufferUsage,
}

impl Buffer {
    pub fn new(
        ctx: Arc<GpuContext>,
        buffer: vk::Buffer,
        allocation: Allocation,
        size: u64,
        usage: BufferUsage,
    ) -> Self {
        Self {
            ctx,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        }
    }

    /// Raw Vulkan handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

/// Vulkan buffer usage flags for a nebula buffer usage
pub(crate) fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
    }
}

/// Whether `len` bytes at `offset` fit in a buffer of `size` bytes
pub(crate) fn write_fits(size: u64, offset: u64, len: usize) -> bool {
    offset
        .checked_add(len as u64)
        .is_some_and(|end| end <= size)
}

impl RendererBuffer for Buffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !write_fits(self.size, offset, data.len()) {
            engine_bail_invalid!("nebula::vulkan::Buffer",
                "Write of {} bytes at offset {} overflows buffer of {} bytes",
                data.len(), offset, self.size);
        }

        let Some(allocation) = &self.allocation else {
            engine_bail!("nebula::vulkan::Buffer", "Buffer update failed: no GPU allocation");
        };
        let Some(mapped) = allocation.mapped_ptr() else {
            engine_bail!("nebula::vulkan::Buffer", "Buffer is not CPU-accessible");
        };

        // SAFETY: the mapping covers `size` bytes and the range was checked above
        unsafe {
            let mapped_ptr = mapped.as_ptr() as *mut u8;
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                mapped_ptr.add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Free GPU memory first, then the handle
        if let Some(allocation) = self.allocation.take() {
            self.ctx.free_allocation(allocation);
        }
        unsafe {
            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}
