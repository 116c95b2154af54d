/// Descriptor rebinding strategies
///
/// A rebinder points a named shader resource of a pipeline at new GPU
/// objects, for every frame in flight. Descriptor-table backends write
/// persistent descriptors; root-argument backends bind at draw time and
/// implement every operation as a no-op.

use std::sync::Arc;
use crate::error::Result;
use crate::renderer::{Buffer, Pipeline, Renderer, Texture};

/// Descriptor type a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer,
}

/// Backend strategy writing resources into pipeline bindings
pub trait DescriptorRebinder: Send + Sync {
    /// Bind `buffers[frame]` to `resource_name` in the descriptor set of each frame
    ///
    /// `buffers` holds one buffer per frame in flight.
    fn bind_buffers(
        &self,
        pipeline: &dyn Pipeline,
        resource_name: &str,
        buffers: &[Arc<dyn Buffer>],
        binding_type: BindingType,
    ) -> Result<()>;

    /// Write `texture` into element `array_element` of the `resource_name` array
    fn bind_texture(
        &self,
        pipeline: &dyn Pipeline,
        resource_name: &str,
        array_element: u32,
        texture: &dyn Texture,
    ) -> Result<()>;
}

/// Rebinder of root-argument backends: resources are bound per draw
#[derive(Debug, Default)]
pub struct RootArgumentRebinder;

impl DescriptorRebinder for RootArgumentRebinder {
    fn bind_buffers(
        &self,
        _pipeline: &dyn Pipeline,
        _resource_name: &str,
        _buffers: &[Arc<dyn Buffer>],
        _binding_type: BindingType,
    ) -> Result<()> {
        Ok(())
    }

    fn bind_texture(
        &self,
        _pipeline: &dyn Pipeline,
        _resource_name: &str,
        _array_element: u32,
        _texture: &dyn Texture,
    ) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Fan-out helpers
// ============================================================================

/// Rebind per-frame buffers in every pipeline declaring `resource_name`
pub fn rebind_buffers_in_all_pipelines(
    renderer: &dyn Renderer,
    resource_name: &str,
    buffers: &[Arc<dyn Buffer>],
    binding_type: BindingType,
) -> Result<()> {
    for pipeline in renderer.pipelines().declaring(resource_name) {
        rebind_buffers_in_pipeline(renderer, pipeline.as_ref(), resource_name, buffers, binding_type)?;
    }
    Ok(())
}

/// Rebind per-frame buffers in one pipeline; no-op if it does not declare `resource_name`
pub fn rebind_buffers_in_pipeline(
    renderer: &dyn Renderer,
    pipeline: &dyn Pipeline,
    resource_name: &str,
    buffers: &[Arc<dyn Buffer>],
    binding_type: BindingType,
) -> Result<()> {
    if pipeline.shader_resource_binding(resource_name).is_none() {
        return Ok(());
    }
    renderer
        .descriptor_rebinder()
        .bind_buffers(pipeline, resource_name, buffers, binding_type)
        .map_err(|e| {
            e.context(format!(
                "bind '{}' in pipeline '{}'",
                resource_name,
                pipeline.identifier()
            ))
        })
}

/// Write a texture array element in every pipeline declaring `resource_name`
pub fn rebind_texture_in_all_pipelines(
    renderer: &dyn Renderer,
    resource_name: &str,
    array_element: u32,
    texture: &dyn Texture,
) -> Result<()> {
    for pipeline in renderer.pipelines().declaring(resource_name) {
        rebind_texture_in_pipeline(renderer, pipeline.as_ref(), resource_name, array_element, texture)?;
    }
    Ok(())
}

/// Write a texture array element in one pipeline; no-op if it does not declare `resource_name`
pub fn rebind_texture_in_pipeline(
    renderer: &dyn Renderer,
    pipeline: &dyn Pipeline,
    resource_name: &str,
    array_element: u32,
    texture: &dyn Texture,
) -> Result<()> {
    if pipeline.shader_resource_binding(resource_name).is_none() {
        return Ok(());
    }
    renderer
        .descriptor_rebinder()
        .bind_texture(pipeline, resource_name, array_element, texture)
        .map_err(|e| {
            e.context(format!(
                "bind texture '{}' at element {} of '{}' in pipeline '{}'",
                texture.name(),
                array_element,
                resource_name,
                pipeline.identifier()
            ))
        })
}

#[cfg(test)]
#[path = "rebinder_tests.rs"]
mod tests;
