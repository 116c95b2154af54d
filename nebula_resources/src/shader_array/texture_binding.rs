/// Bindless texture binding
///
/// Owns one index of a bindless texture array and keeps the texture written
/// at that element in every pipeline declaring the array.

use std::sync::Arc;
use crate::engine_debug;
use crate::error::Result;
use crate::renderer::{
    rebind_texture_in_all_pipelines, rebind_texture_in_pipeline, Pipeline, RenderPause,
    Renderer, Texture,
};
use crate::shader_array::{IndexAllocator, IndexHandle};

pub struct BindlessTextureBinding {
    renderer: Arc<dyn Renderer>,
    resource_name: String,
    texture: Arc<dyn Texture>,
    index: IndexHandle,
}

impl BindlessTextureBinding {
    /// Reserve an index in `allocator` and write `texture` there in every pipeline
    ///
    /// The index is released again if the descriptor writes fail.
    pub fn new(
        renderer: Arc<dyn Renderer>,
        allocator: &IndexAllocator,
        resource_name: impl Into<String>,
        texture: Arc<dyn Texture>,
    ) -> Result<Self> {
        let binding = Self {
            renderer,
            resource_name: resource_name.into(),
            texture,
            index: allocator.reserve_index()?,
        };
        {
            let _pause = RenderPause::new(binding.renderer.as_ref())?;
            binding.rebind_all_pipelines()?;
        }
        engine_debug!(
            "nebula::BindlessTextureBinding",
            "Texture '{}' bound at '{}'[{}]",
            binding.texture.name(),
            binding.resource_name,
            binding.index.actual_index()
        );
        Ok(binding)
    }

    /// Index shaders use to sample this texture
    pub fn index(&self) -> u32 {
        self.index.actual_index()
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn texture(&self) -> &Arc<dyn Texture> {
        &self.texture
    }

    /// Re-write the texture in every pipeline, e.g. after descriptor sets were recreated
    ///
    /// The caller guarantees the descriptor sets are not in use by the GPU.
    pub fn rebind_all_pipelines(&self) -> Result<()> {
        rebind_texture_in_all_pipelines(
            self.renderer.as_ref(),
            &self.resource_name,
            self.index.actual_index(),
            self.texture.as_ref(),
        )
    }

    /// Re-write the texture in one pipeline
    pub fn rebind_pipeline(&self, pipeline: &dyn Pipeline) -> Result<()> {
        rebind_texture_in_pipeline(
            self.renderer.as_ref(),
            pipeline,
            &self.resource_name,
            self.index.actual_index(),
            self.texture.as_ref(),
        )
    }
}

#[cfg(test)]
#[path = "texture_binding_tests.rs"]
mod tests;
