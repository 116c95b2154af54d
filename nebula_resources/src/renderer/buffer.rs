/// Buffer trait and buffer descriptor

use std::any::Any;
use std::sync::Arc;
use crate::config::FRAMES_IN_FLIGHT;
use crate::error::Result;
use crate::renderer::Renderer;

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Uniform/constant buffer
    Uniform,
    /// Storage buffer
    Storage,
}

/// Descriptor for creating a CPU-writable buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsage,
}

impl BufferDesc {
    /// Descriptor for `element_count` elements of `element_size` bytes
    pub fn array(usage: BufferUsage, element_size: u64, element_count: u64) -> Self {
        Self {
            size: element_size * element_count,
            usage,
        }
    }
}

/// Buffer resource trait
///
/// Implemented by backend-specific buffer types (e.g., VulkanBuffer).
/// The buffer is automatically destroyed when dropped.
pub trait Buffer: Send + Sync {
    /// Size in bytes
    fn size(&self) -> u64;

    /// Update buffer data
    ///
    /// # Arguments
    ///
    /// * `offset` - Offset into the buffer in bytes
    /// * `data` - Data to write
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Backend downcast hook
    fn as_any(&self) -> &dyn Any;
}

/// Allocate one buffer per frame in flight
///
/// The returned vector always holds `FRAMES_IN_FLIGHT` buffers.
pub(crate) fn create_frame_buffers(
    renderer: &dyn Renderer,
    desc: &BufferDesc,
) -> Result<Vec<Arc<dyn Buffer>>> {
    (0..FRAMES_IN_FLIGHT)
        .map(|_| renderer.create_buffer(desc.clone()))
        .collect()
}
