/*!
# Nebula Resources - Vulkan Backend

Vulkan implementation of the nebula_resources backend contracts.

This crate provides a headless Vulkan device implementing `Renderer`,
`Buffer`, `Texture`, `Pipeline` and `DescriptorRebinder` using the Ash
library for Vulkan bindings, gpu-allocator for memory management and spirq
for shader reflection.

```no_run
use std::sync::Arc;
use nebula_resources::nebula::{ResourcesConfig, lighting::LightingResourceManager};
use nebula_resources_renderer_vulkan::nebula::{VulkanConfig, VulkanRenderer};

let renderer = Arc::new(VulkanRenderer::new(VulkanConfig::default())?);
let lighting = LightingResourceManager::new(renderer, &ResourcesConfig::default())?;
# Ok::<(), nebula_resources::nebula::Error>(())
```
*/

mod vulkan_context;
mod vulkan_buffer;
mod vulkan_texture;
mod vulkan_pipeline;
mod vulkan_descriptor_rebinder;
mod vulkan_renderer;

pub mod nebula {
    pub use crate::vulkan_renderer::{VulkanConfig, VulkanRenderer};
    pub use crate::vulkan_buffer::Buffer as VulkanBuffer;
    pub use crate::vulkan_texture::{Texture as VulkanTexture, TextureDesc as VulkanTextureDesc};
    pub use crate::vulkan_pipeline::{
        Pipeline as VulkanPipeline, PipelineDesc as VulkanPipelineDesc, ShaderBinding,
        ShaderStageDesc,
    };
    pub use crate::vulkan_descriptor_rebinder::VulkanDescriptorRebinder;
}
