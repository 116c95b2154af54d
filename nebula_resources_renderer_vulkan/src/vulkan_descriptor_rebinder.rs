/// DescriptorRebinder - writes nebula resources into Vulkan descriptor sets
///
/// Every bind updates the descriptor set of each frame in flight while the
/// pipeline's descriptor sets are locked. Callers hold a `RenderPause`, so no
/// set being written is in use by the GPU.

use nebula_resources::nebula::{
    Result, FRAMES_IN_FLIGHT,
    render::{
        downcast_backend, BindingType, Buffer as RendererBuffer, DescriptorRebinder,
        Pipeline as RendererPipeline, Texture as RendererTexture,
    },
};
use nebula_resources::engine_bail_invalid;
#[cfg(feature = "trace-descriptor-writes")]
use nebula_resources::engine_trace;
use ash::vk;
use std::sync::Arc;

use crate::vulkan_buffer::Buffer;
use crate::vulkan_pipeline::{DescriptorSets, Pipeline, ShaderBinding};
use crate::vulkan_texture::Texture;

/// Convert BindingType to Vulkan descriptor type
pub(crate) fn binding_type_to_vk(binding_type: BindingType) -> vk::DescriptorType {
    match binding_type {
        BindingType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
    }
}

/// Whether a texture can be written into a binding of this descriptor type
pub(crate) fn is_image_descriptor(descriptor_type: vk::DescriptorType) -> bool {
    descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        || descriptor_type == vk::DescriptorType::SAMPLED_IMAGE
}

/// Descriptor rebinder of the Vulkan backend
pub struct VulkanDescriptorRebinder {
    device: ash::Device,
    /// Sampler paired with textures written into combined image samplers
    sampler: vk::Sampler,
}

impl VulkanDescriptorRebinder {
    pub(crate) fn new(device: ash::Device, sampler: vk::Sampler) -> Self {
        Self { device, sampler }
    }

    /// Look up a binding, rejecting pipelines whose layout lacks it
    fn resolve<'a>(pipeline: &'a Pipeline, resource_name: &str) -> Result<&'a ShaderBinding> {
        match pipeline.binding(resource_name) {
            Some(binding) => Ok(binding),
            None => {
                engine_bail_invalid!("nebula::vulkan::DescriptorRebinder",
                    "Pipeline '{}' does not declare shader resource '{}'",
                    pipeline.identifier(), resource_name);
            }
        }
    }

    fn frame_set(
        pipeline: &Pipeline,
        sets: &DescriptorSets,
        frame: usize,
        binding: &ShaderBinding,
    ) -> Result<vk::DescriptorSet> {
        match sets.get(frame, binding.set) {
            Some(set) => Ok(set),
            None => {
                engine_bail_invalid!("nebula::vulkan::DescriptorRebinder",
                    "Pipeline '{}' has no descriptor set {} for frame {}",
                    pipeline.identifier(), binding.set, frame);
            }
        }
    }
}

impl DescriptorRebinder for VulkanDescriptorRebinder {
    fn bind_buffers(
        &self,
        pipeline: &dyn RendererPipeline,
        resource_name: &str,
        buffers: &[Arc<dyn RendererBuffer>],
        binding_type: BindingType,
    ) -> Result<()> {
        let vk_pipeline = downcast_backend::<Pipeline>(pipeline.as_any(), "Vulkan pipeline")?;
        let binding = Self::resolve(vk_pipeline, resource_name)?;

        let descriptor_type = binding_type_to_vk(binding_type);
        if binding.descriptor_type != descriptor_type {
            engine_bail_invalid!("nebula::vulkan::DescriptorRebinder",
                "Shader resource '{}' is a {:?}, cannot bind it as {:?}",
                resource_name, binding.descriptor_type, descriptor_type);
        }
        if buffers.len() != FRAMES_IN_FLIGHT {
            engine_bail_invalid!("nebula::vulkan::DescriptorRebinder",
                "Expected {} buffers for '{}', got {}",
                FRAMES_IN_FLIGHT, resource_name, buffers.len());
        }

        // Buffer infos must outlive the write structs referencing them
        let mut buffer_infos = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for buffer in buffers {
            let vk_buffer = downcast_backend::<Buffer>(buffer.as_any(), "Vulkan buffer")?;
            buffer_infos.push(
                vk::DescriptorBufferInfo::default()
                    .buffer(vk_buffer.buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE),
            );
        }

        // Held until the writes are submitted
        let sets = vk_pipeline.lock_descriptor_sets()?;
        let mut writes = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for (frame, info) in buffer_infos.iter().enumerate() {
            let set = Self::frame_set(vk_pipeline, &sets, frame, binding)?;
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding.binding)
                    .dst_array_element(0)
                    .descriptor_type(descriptor_type)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }

        #[cfg(feature = "trace-descriptor-writes")]
        engine_trace!("nebula::vulkan::DescriptorRebinder",
            "'{}' <- {} buffer(s) at set {} binding {} in pipeline '{}'",
            resource_name, writes.len(), binding.set, binding.binding, vk_pipeline.identifier());

        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }
        drop(sets);
        Ok(())
    }

    fn bind_texture(
        &self,
        pipeline: &dyn RendererPipeline,
        resource_name: &str,
        array_element: u32,
        texture: &dyn RendererTexture,
    ) -> Result<()> {
        let vk_pipeline = downcast_backend::<Pipeline>(pipeline.as_any(), "Vulkan pipeline")?;
        let binding = Self::resolve(vk_pipeline, resource_name)?;

        if !is_image_descriptor(binding.descriptor_type) {
            engine_bail_invalid!("nebula::vulkan::DescriptorRebinder",
                "Shader resource '{}' is a {:?}, cannot bind texture '{}'",
                resource_name, binding.descriptor_type, texture.name());
        }
        let capacity = vk_pipeline.descriptor_count(binding);
        if array_element >= capacity {
            engine_bail_invalid!("nebula::vulkan::DescriptorRebinder",
                "Element {} out of range for '{}' ({} descriptors)",
                array_element, resource_name, capacity);
        }

        let vk_texture = downcast_backend::<Texture>(texture.as_any(), "Vulkan texture")?;
        let image_info = vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(vk_texture.view)
            .sampler(self.sampler);

        let sets = vk_pipeline.lock_descriptor_sets()?;
        let mut writes = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for frame in 0..FRAMES_IN_FLIGHT {
            let set = Self::frame_set(vk_pipeline, &sets, frame, binding)?;
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding.binding)
                    .dst_array_element(array_element)
                    .descriptor_type(binding.descriptor_type)
                    .image_info(std::slice::from_ref(&image_info)),
            );
        }

        #[cfg(feature = "trace-descriptor-writes")]
        engine_trace!("nebula::vulkan::DescriptorRebinder",
            "'{}'[{}] <- texture '{}' in pipeline '{}'",
            resource_name, array_element, texture.name(), vk_pipeline.identifier());

        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }
        drop(sets);
        Ok(())
    }
}

#[cfg(test)]
#[path = "vulkan_descriptor_rebinder_tests.rs"]
mod tests;
