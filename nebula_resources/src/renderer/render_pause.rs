/// Scoped "pause rendering and wait for the GPU" guard

use parking_lot::ReentrantMutexGuard;
use crate::error::Result;
use crate::renderer::Renderer;

/// Holds the render-wide resources lock with the GPU idle
///
/// Every operation that replaces GPU buffers referenced by descriptors or
/// in-flight command buffers runs under a pause. Acquire it before any
/// array or manager lock; it is re-entrant on the owning thread.
///
/// Functions that need the guarantee take `&RenderPause` as a witness.
pub struct RenderPause<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl<'a> RenderPause<'a> {
    /// Lock render resources, then block until the GPU is idle
    pub fn new(renderer: &'a dyn Renderer) -> Result<Self> {
        let guard = renderer.render_resources_lock().lock();
        renderer
            .wait_idle()
            .map_err(|e| e.context("wait for GPU idle before resource update"))?;
        Ok(Self { _guard: guard })
    }
}

#[cfg(test)]
#[path = "render_pause_tests.rs"]
mod tests;
