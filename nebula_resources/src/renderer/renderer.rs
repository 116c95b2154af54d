/// Renderer trait - the contract the resource layer needs from a backend

use std::any::Any;
use std::sync::Arc;
use parking_lot::ReentrantMutex;

use crate::error::{Error, Result};
use crate::renderer::{Buffer, BufferDesc, DescriptorRebinder, PipelineRegistry};

/// Render-wide resources lock
///
/// Re-entrant: a size-changed handler running under a `RenderPause` may take
/// its own pause on the same thread.
pub type RenderResourcesLock = ReentrantMutex<()>;

/// How a backend binds shader resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Persistent descriptor sets written ahead of time (Vulkan)
    DescriptorTable,
    /// Resources passed as root arguments at draw time
    RootArgument,
}

// ============================================================================
// Renderer trait
// ============================================================================

/// Backend renderer as seen by the resource layer
///
/// Shared as `Arc<dyn Renderer>`; every method takes `&self` and
/// implementations guard their own state.
pub trait Renderer: Send + Sync {
    /// Binding model of this backend
    fn backend_kind(&self) -> BackendKind;

    /// Allocate a CPU-writable GPU buffer
    fn create_buffer(&self, desc: BufferDesc) -> Result<Arc<dyn Buffer>>;

    /// Lock held while GPU-visible resources are replaced
    fn render_resources_lock(&self) -> &RenderResourcesLock;

    /// Block until the GPU finished all submitted work
    fn wait_idle(&self) -> Result<()>;

    /// Live pipelines grouped by type
    fn pipelines(&self) -> &PipelineRegistry;

    /// Backend strategy writing resources into pipeline descriptors
    fn descriptor_rebinder(&self) -> &dyn DescriptorRebinder;
}

/// Downcast a backend object to its concrete type
///
/// Returns `Error::InvalidResource` naming `expected` when the object
/// belongs to another backend.
pub fn downcast_backend<'a, T: 'static>(object: &'a dyn Any, expected: &str) -> Result<&'a T> {
    object.downcast_ref::<T>().ok_or_else(|| {
        Error::InvalidResource(format!("expected a {}, got an object of another backend", expected))
    })
}
