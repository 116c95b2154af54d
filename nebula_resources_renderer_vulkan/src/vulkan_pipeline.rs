/// Pipeline - Vulkan implementation of the nebula Pipeline trait
///
/// Owns the pipeline layout reflected from SPIR-V and one descriptor set per
/// layout set and frame in flight. The resource layer resolves shader
/// resources by name through the reflected binding table.

use nebula_resources::nebula::{
    Result, Error, FRAMES_IN_FLIGHT,
    render::{BackendKind, Pipeline as RendererPipeline, PipelineType, RenderPause},
};
use nebula_resources::{engine_bail, engine_err, engine_error};
use ash::vk;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::vulkan_context::GpuContext;

/// One shader stage of a pipeline
#[derive(Debug, Clone)]
pub struct ShaderStageDesc {
    /// SPIR-V words
    pub code: Vec<u32>,
    pub stage: vk::ShaderStageFlags,
}

/// Descriptor for creating a pipeline
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    /// Stable identifier for diagnostics
    pub identifier: String,
    pub pipeline_type: PipelineType,
    pub stages: Vec<ShaderStageDesc>,
    /// Descriptor count used for runtime-sized arrays (`textures[]`)
    pub unbounded_array_size: u32,
}

/// A named descriptor binding reflected from SPIR-V
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBinding {
    pub set: u32,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    /// Array size; 0 for runtime-sized arrays
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// Parse SPIR-V bytecode and extract named descriptor bindings using spirq
pub(crate) fn reflect_shader(code: &[u32], stage_flags: vk::ShaderStageFlags)
    -> Result<Vec<(String, ShaderBinding)>>
{
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| engine_err!("nebula::vulkan",
            "SPIR-V reflection failed: {:?}", e))?;

    let mut bindings = Vec::new();
    for entry_point in &entry_points {
        for var in entry_point.vars.iter() {
            if let spirq::var::Variable::Descriptor { name, desc_bind, desc_ty, nbind, .. } = var {
                bindings.push((
                    descriptor_key(name.as_deref(), desc_bind.set(), desc_bind.bind()),
                    ShaderBinding {
                        set: desc_bind.set(),
                        binding: desc_bind.bind(),
                        descriptor_type: spirq_desc_type_to_vk(desc_ty)?,
                        count: *nbind,
                        stage_flags,
                    },
                ));
            }
        }
    }
    Ok(bindings)
}

/// Table key of a reflected descriptor
///
/// Unnamed descriptors still need a layout entry; they get a key no GLSL or
/// HLSL identifier can collide with, so they are never resolved by name.
pub(crate) fn descriptor_key(name: Option<&str>, set: u32, binding: u32) -> String {
    match name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("#{}.{}", set, binding),
    }
}

/// Convert a spirq descriptor type to the Vulkan descriptor type
fn spirq_desc_type_to_vk(desc_ty: &spirq::ty::DescriptorType) -> Result<vk::DescriptorType> {
    use spirq::ty::DescriptorType;
    match desc_ty {
        DescriptorType::UniformBuffer() => Ok(vk::DescriptorType::UNIFORM_BUFFER),
        DescriptorType::StorageBuffer(..) => Ok(vk::DescriptorType::STORAGE_BUFFER),
        DescriptorType::CombinedImageSampler() => Ok(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        DescriptorType::SampledImage() => Ok(vk::DescriptorType::SAMPLED_IMAGE),
        DescriptorType::Sampler() => Ok(vk::DescriptorType::SAMPLER),
        other => {
            engine_bail!("nebula::vulkan",
                "Unsupported SPIR-V descriptor type: {:?}", other);
        }
    }
}

/// Merge per-stage reflections into one binding table keyed by resource name
///
/// A name seen in several stages must agree on set, binding and type; the
/// stage flags are combined.
pub(crate) fn merge_bindings(
    stages: impl IntoIterator<Item = (String, ShaderBinding)>,
) -> Result<FxHashMap<String, ShaderBinding>> {
    let mut merged: FxHashMap<String, ShaderBinding> = FxHashMap::default();
    for (name, binding) in stages {
        match merged.get_mut(&name) {
            Some(existing) => {
                if (existing.set, existing.binding, existing.descriptor_type)
                    != (binding.set, binding.binding, binding.descriptor_type)
                {
                    engine_bail!("nebula::vulkan",
                        "Shader resource '{}' declared differently across stages ({:?} vs {:?})",
                        name, existing, binding);
                }
                existing.stage_flags |= binding.stage_flags;
            }
            None => {
                merged.insert(name, binding);
            }
        }
    }
    Ok(merged)
}

/// Descriptor count actually allocated for a binding
pub(crate) fn effective_count(binding: &ShaderBinding, unbounded_array_size: u32) -> u32 {
    if binding.count == 0 { unbounded_array_size.max(1) } else { binding.count }
}

/// Pool sizes for `sets_per_layout` copies of every binding
pub(crate) fn descriptor_pool_sizes(
    bindings: &FxHashMap<String, ShaderBinding>,
    unbounded_array_size: u32,
    sets_per_layout: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut counts: FxHashMap<vk::DescriptorType, u32> = FxHashMap::default();
    for binding in bindings.values() {
        *counts.entry(binding.descriptor_type).or_default() +=
            effective_count(binding, unbounded_array_size) * sets_per_layout;
    }
    let mut sizes: Vec<_> = counts
        .into_iter()
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect();
    sizes.sort_by_key(|size| size.ty.as_raw());
    sizes
}

/// Descriptor pool and the sets allocated from it
pub(crate) struct DescriptorSets {
    pool: vk::DescriptorPool,
    /// `sets[frame][set]`
    sets: Vec<Vec<vk::DescriptorSet>>,
}

impl DescriptorSets {
    /// Descriptor set `set` of frame `frame`
    pub(crate) fn get(&self, frame: usize, set: u32) -> Option<vk::DescriptorSet> {
        self.sets.get(frame).and_then(|sets| sets.get(set as usize)).copied()
    }
}

/// Vulkan pipeline resource interface
///
/// Set layouts and the pipeline layout live as long as the pipeline; the
/// descriptor sets can be recreated wholesale, after which every resource
/// manager rebinds its buffers.
pub struct Pipeline {
    ctx: Arc<GpuContext>,
    identifier: String,
    pipeline_type: PipelineType,
    bindings: FxHashMap<String, ShaderBinding>,
    unbounded_array_size: u32,
    /// One layout per set index, gaps filled with empty layouts
    set_layouts: Vec<vk::DescriptorSetLayout>,
    pipeline_layout: vk::PipelineLayout,
    descriptor_sets: Mutex<DescriptorSets>,
}

impl Pipeline {
    /// Reflect the shader stages and allocate per-frame descriptor sets
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: PipelineDesc) -> Result<Self> {
        let mut reflected = Vec::new();
        for stage in &desc.stages {
            if stage.code.is_empty() {
                engine_bail!("nebula::vulkan",
                    "Pipeline '{}': empty SPIR-V for stage {:?}", desc.identifier, stage.stage);
            }
            reflected.extend(reflect_shader(&stage.code, stage.stage)?);
        }
        let bindings = merge_bindings(reflected)?;

        let mut pipeline = Self {
            ctx,
            identifier: desc.identifier,
            pipeline_type: desc.pipeline_type,
            bindings,
            unbounded_array_size: desc.unbounded_array_size,
            set_layouts: Vec::new(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_sets: Mutex::new(DescriptorSets {
                pool: vk::DescriptorPool::null(),
                sets: Vec::new(),
            }),
        };
        // Drop releases whatever was created if a later step fails
        pipeline.create_layouts()?;
        pipeline.descriptor_sets = Mutex::new(pipeline.allocate_descriptor_sets()?);
        Ok(pipeline)
    }

    fn create_layouts(&mut self) -> Result<()> {
        let unbounded_array_size = self.unbounded_array_size;
        let set_count = self.bindings.values().map(|b| b.set + 1).max().unwrap_or(0);
        let device = &self.ctx.device;

        for set in 0..set_count {
            let mut layout_bindings = Vec::new();
            let mut binding_flags = Vec::new();
            for binding in self.bindings.values().filter(|b| b.set == set) {
                layout_bindings.push(
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(binding.binding)
                        .descriptor_type(binding.descriptor_type)
                        .descriptor_count(effective_count(binding, unbounded_array_size))
                        .stage_flags(binding.stage_flags),
                );
                // Bindless arrays are only partially written
                binding_flags.push(if binding.count != 1 {
                    vk::DescriptorBindingFlags::PARTIALLY_BOUND
                } else {
                    vk::DescriptorBindingFlags::empty()
                });
            }

            let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
                .binding_flags(&binding_flags);
            let info = vk::DescriptorSetLayoutCreateInfo::default()
                .bindings(&layout_bindings)
                .push_next(&mut flags_info);

            let layout = unsafe { device.create_descriptor_set_layout(&info, None) }
                .map_err(|e| engine_err!("nebula::vulkan",
                    "Pipeline '{}': failed to create descriptor set layout {}: {:?}",
                    self.identifier, set, e))?;
            self.set_layouts.push(layout);
        }

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&self.set_layouts);
        self.pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| engine_err!("nebula::vulkan",
                "Pipeline '{}': failed to create pipeline layout: {:?}", self.identifier, e))?;
        Ok(())
    }

    fn allocate_descriptor_sets(&self) -> Result<DescriptorSets> {
        if self.set_layouts.is_empty() {
            return Ok(DescriptorSets {
                pool: vk::DescriptorPool::null(),
                sets: vec![Vec::new(); FRAMES_IN_FLIGHT],
            });
        }
        let device = &self.ctx.device;
        let pool_sizes = descriptor_pool_sizes(
            &self.bindings,
            self.unbounded_array_size,
            FRAMES_IN_FLIGHT as u32,
        );
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets((self.set_layouts.len() * FRAMES_IN_FLIGHT) as u32);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| {
                engine_error!("nebula::vulkan",
                    "Pipeline '{}': failed to create descriptor pool: {:?}", self.identifier, e);
                Error::OutOfMemory
            })?;

        let mut sets = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            let allocate_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&self.set_layouts);
            match unsafe { device.allocate_descriptor_sets(&allocate_info) } {
                Ok(frame_sets) => sets.push(frame_sets),
                Err(e) => {
                    unsafe { device.destroy_descriptor_pool(pool, None) };
                    return Err(engine_err!("nebula::vulkan",
                        "Pipeline '{}': failed to allocate descriptor sets: {:?}", self.identifier, e));
                }
            }
        }
        Ok(DescriptorSets { pool, sets })
    }

    /// Replace every descriptor set with a fresh, unwritten one
    ///
    /// The new sets hold no resources until the resource managers rebind
    /// them through `bind_descriptors_to_recreated_pipeline_resources`.
    pub fn recreate_descriptor_sets(&self, _pause: &RenderPause) -> Result<()> {
        let fresh = self.allocate_descriptor_sets()?;
        let mut current = self.lock_descriptor_sets()?;
        let old = std::mem::replace(&mut *current, fresh);
        if old.pool != vk::DescriptorPool::null() {
            unsafe { self.ctx.device.destroy_descriptor_pool(old.pool, None) };
        }
        Ok(())
    }

    pub(crate) fn lock_descriptor_sets(&self) -> Result<MutexGuard<'_, DescriptorSets>> {
        self.descriptor_sets.lock().map_err(|_| self.poisoned())
    }

    fn poisoned(&self) -> Error {
        engine_err!("nebula::vulkan",
            "Pipeline '{}': descriptor set lock poisoned", self.identifier)
    }

    /// Reflected binding of a shader resource
    pub fn binding(&self, resource_name: &str) -> Option<&ShaderBinding> {
        self.bindings.get(resource_name)
    }

    /// Number of descriptors allocated for a binding
    pub fn descriptor_count(&self, binding: &ShaderBinding) -> u32 {
        effective_count(binding, self.unbounded_array_size)
    }

    /// Layout for building the graphics pipeline and binding descriptor sets
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Descriptor sets of one frame in flight, indexed by set number
    pub fn descriptor_sets(&self, frame_index: usize) -> Result<Vec<vk::DescriptorSet>> {
        let sets = self.lock_descriptor_sets()?;
        match sets.sets.get(frame_index) {
            Some(frame_sets) => Ok(frame_sets.clone()),
            None => Err(Error::InvalidResource(format!(
                "frame index {} out of range ({} frames in flight)",
                frame_index, FRAMES_IN_FLIGHT
            ))),
        }
    }
}

impl RendererPipeline for Pipeline {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::DescriptorTable
    }

    fn pipeline_type(&self) -> PipelineType {
        self.pipeline_type
    }

    fn shader_resource_binding(&self, resource_name: &str) -> Option<u32> {
        self.bindings.get(resource_name).map(|b| b.binding)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            let device = &self.ctx.device;
            // Destroying the pool frees its sets
            let pool = match self.descriptor_sets.get_mut() {
                Ok(sets) => sets.pool,
                Err(poisoned) => poisoned.into_inner().pool,
            };
            if pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(pool, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            for &layout in &self.set_layouts {
                device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

#[cfg(test)]
#[path = "vulkan_pipeline_tests.rs"]
mod tests;
