/// General lighting uniform block - ambient light and per-type light counts

use std::sync::Arc;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use parking_lot::Mutex;

use crate::config::shader_resource_names;
use crate::error::Result;
use crate::gpu_array::growable_gpu_array::frame_buffer;
use crate::renderer::{
    create_frame_buffers, rebind_buffers_in_all_pipelines, rebind_buffers_in_pipeline,
    BindingType, Buffer, BufferDesc, BufferUsage, Pipeline, RenderPause, Renderer,
};
use crate::engine_debug;

const LOG_SOURCE: &str = "nebula::GeneralLighting";

/// Light source types with a light array each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightSourceType {
    Point,
    Directional,
    Spot,
}

impl LightSourceType {
    pub const ALL: [LightSourceType; 3] = [
        LightSourceType::Point,
        LightSourceType::Directional,
        LightSourceType::Spot,
    ];

    /// Shader resource name of the light array
    pub fn resource_name(self) -> &'static str {
        match self {
            LightSourceType::Point => shader_resource_names::POINT_LIGHTS,
            LightSourceType::Directional => shader_resource_names::DIRECTIONAL_LIGHTS,
            LightSourceType::Spot => shader_resource_names::SPOTLIGHTS,
        }
    }

    /// Shader resource name of the "lights in frustum" indices
    ///
    /// Directional lights reach everything and have none.
    pub fn frustum_resource_name(self) -> Option<&'static str> {
        match self {
            LightSourceType::Point => Some(shader_resource_names::POINT_LIGHTS_IN_FRUSTUM_INDICES),
            LightSourceType::Directional => None,
            LightSourceType::Spot => Some(shader_resource_names::SPOTLIGHTS_IN_FRUSTUM_INDICES),
        }
    }
}

/// GPU layout of `generalLightingData` (std140/std430 compatible)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GeneralLightingBlock {
    /// RGB ambient color, `w` unused
    pub ambient_light: Vec4,
    pub point_light_count: u32,
    pub directional_light_count: u32,
    pub spotlight_count: u32,
    pub _padding: u32,
}

impl GeneralLightingBlock {
    pub fn new(ambient_light: Vec3) -> Self {
        Self {
            ambient_light: ambient_light.extend(0.0),
            point_light_count: 0,
            directional_light_count: 0,
            spotlight_count: 0,
            _padding: 0,
        }
    }

    pub fn light_count(&self, kind: LightSourceType) -> u32 {
        match kind {
            LightSourceType::Point => self.point_light_count,
            LightSourceType::Directional => self.directional_light_count,
            LightSourceType::Spot => self.spotlight_count,
        }
    }

    fn light_count_mut(&mut self, kind: LightSourceType) -> &mut u32 {
        match kind {
            LightSourceType::Point => &mut self.point_light_count,
            LightSourceType::Directional => &mut self.directional_light_count,
            LightSourceType::Spot => &mut self.spotlight_count,
        }
    }
}

/// Per-frame uniform buffers holding a `GeneralLightingBlock`
pub struct GeneralLighting {
    renderer: Arc<dyn Renderer>,
    block: Mutex<GeneralLightingBlock>,
    buffers: Vec<Arc<dyn Buffer>>,
}

impl GeneralLighting {
    pub fn new(renderer: Arc<dyn Renderer>, ambient_light: Vec3) -> Result<Arc<Self>> {
        let block = GeneralLightingBlock::new(ambient_light);
        let buffers = {
            let _pause = RenderPause::new(renderer.as_ref())?;
            let desc = BufferDesc {
                size: std::mem::size_of::<GeneralLightingBlock>() as u64,
                usage: BufferUsage::Uniform,
            };
            let buffers = create_frame_buffers(renderer.as_ref(), &desc)
                .map_err(|e| e.context("allocate general lighting buffers"))?;
            for buffer in &buffers {
                buffer.update(0, bytemuck::bytes_of(&block))?;
            }
            rebind_buffers_in_all_pipelines(
                renderer.as_ref(),
                shader_resource_names::GENERAL_LIGHTING_DATA,
                &buffers,
                BindingType::UniformBuffer,
            )?;
            buffers
        };

        Ok(Arc::new(Self {
            renderer,
            block: Mutex::new(block),
            buffers,
        }))
    }

    /// Set the light count of one type and upload it to every frame
    ///
    /// Pauses rendering: counts must be visible to the next draw whatever
    /// frame it records.
    pub fn set_light_count(&self, kind: LightSourceType, count: usize) -> Result<()> {
        let _pause = RenderPause::new(self.renderer.as_ref())?;
        let mut block = self.block.lock();
        *block.light_count_mut(kind) = u32::try_from(count).unwrap_or(u32::MAX);
        for buffer in &self.buffers {
            buffer.update(0, bytemuck::bytes_of(&*block))?;
        }
        engine_debug!(LOG_SOURCE, "{:?} light count set to {}", kind, count);
        Ok(())
    }

    /// Change the ambient color; uploaded by the next `update` of each frame
    pub fn set_ambient_light(&self, color: Vec3) {
        self.block.lock().ambient_light = color.extend(0.0);
    }

    /// Copy the block into the buffer of `frame_index`
    pub fn update(&self, frame_index: usize) -> Result<()> {
        let block = *self.block.lock();
        let buffer = frame_buffer(
            &self.buffers,
            frame_index,
            shader_resource_names::GENERAL_LIGHTING_DATA,
        )?;
        buffer.update(0, bytemuck::bytes_of(&block))
    }

    pub fn block(&self) -> GeneralLightingBlock {
        *self.block.lock()
    }

    pub fn buffer(&self, frame_index: usize) -> Result<Arc<dyn Buffer>> {
        frame_buffer(
            &self.buffers,
            frame_index,
            shader_resource_names::GENERAL_LIGHTING_DATA,
        )
        .cloned()
    }

    pub fn buffers(&self) -> &[Arc<dyn Buffer>] {
        &self.buffers
    }

    pub fn rebind_all_pipelines(&self) -> Result<()> {
        rebind_buffers_in_all_pipelines(
            self.renderer.as_ref(),
            shader_resource_names::GENERAL_LIGHTING_DATA,
            &self.buffers,
            BindingType::UniformBuffer,
        )
    }

    pub fn rebind_pipeline(&self, pipeline: &dyn Pipeline) -> Result<()> {
        rebind_buffers_in_pipeline(
            self.renderer.as_ref(),
            pipeline,
            shader_resource_names::GENERAL_LIGHTING_DATA,
            &self.buffers,
            BindingType::UniformBuffer,
        )
    }
}

#[cfg(test)]
#[path = "general_lighting_tests.rs"]
mod tests;
