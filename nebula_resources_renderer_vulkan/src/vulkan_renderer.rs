/// VulkanRenderer - Vulkan implementation of the nebula Renderer trait
///
/// Headless device owning the allocator, the pipeline registry and the
/// descriptor rebinder. Presentation lives outside the resource layer.

use nebula_resources::nebula::{
    Result, Error,
    render::{
        downcast_backend, BackendKind, Buffer as RendererBuffer, BufferDesc, DescriptorRebinder,
        Pipeline as RendererPipeline, PipelineRegistry, RenderPause, RenderResourcesLock, Renderer,
    },
};
use nebula_resources::{engine_bail_invalid, engine_err, engine_error, engine_info};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use crate::vulkan_buffer::{buffer_usage_to_vk, Buffer};
use crate::vulkan_context::GpuContext;
use crate::vulkan_descriptor_rebinder::VulkanDescriptorRebinder;
use crate::vulkan_pipeline::{Pipeline, PipelineDesc};
use crate::vulkan_texture::{Texture, TextureDesc};

/// Vulkan device configuration
#[derive(Debug, Clone)]
pub struct VulkanConfig {
    pub application_name: String,
}

impl Default for VulkanConfig {
    fn default() -> Self {
        Self {
            application_name: "Nebula Application".to_string(),
        }
    }
}

/// Vulkan device implementation
pub struct VulkanRenderer {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,

    /// GPU memory allocator reference (also stored in GpuContext)
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Sampler used for every combined image sampler write
    default_sampler: vk::Sampler,

    resources_lock: RenderResourcesLock,
    pipelines: PipelineRegistry,
    rebinder: VulkanDescriptorRebinder,

    /// Shared GPU context for all resources
    gpu_context: Arc<GpuContext>,
}

impl VulkanRenderer {
    /// Create a headless Vulkan device
    pub fn new(config: VulkanConfig) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| {
                    engine_error!("nebula::vulkan", "Failed to load Vulkan library: {:?}", e);
                    Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
                })?;

            let app_name = CString::new(config.application_name.as_str())
                .map_err(|e| Error::InitializationFailed(format!("Invalid application name: {}", e)))?;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Nebula")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            #[cfg(feature = "vulkan-validation")]
            let layer_names = vec![c"VK_LAYER_KHRONOS_validation".as_ptr()];
            #[cfg(not(feature = "vulkan-validation"))]
            let layer_names: Vec<*const std::ffi::c_char> = Vec::new();

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names);

            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| {
                    engine_error!("nebula::vulkan", "Failed to create Vulkan instance: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
                })?;

            // Pick the first device with a graphics queue
            let physical_devices = instance
                .enumerate_physical_devices()
                .map_err(|e| {
                    engine_error!("nebula::vulkan", "Failed to enumerate physical devices: {:?}", e);
                    Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
                })?;

            let picked = physical_devices.into_iter().find_map(|physical_device| {
                instance
                    .get_physical_device_queue_family_properties(physical_device)
                    .iter()
                    .position(|qf| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .map(|family| (physical_device, family as u32))
            });
            let Some((physical_device, graphics_family_index)) = picked else {
                instance.destroy_instance(None);
                engine_error!("nebula::vulkan", "No Vulkan-capable GPU with a graphics queue found");
                return Err(Error::InitializationFailed("No Vulkan-capable GPU found".to_string()));
            };

            let queue_priorities = [1.0];
            let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_family_index)
                .queue_priorities(&queue_priorities)];

            // Bindless texture arrays are runtime-sized and partially written
            let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
                .descriptor_indexing(true)
                .runtime_descriptor_array(true)
                .descriptor_binding_partially_bound(true)
                .shader_sampled_image_array_non_uniform_indexing(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .push_next(&mut features12);

            let device = match instance.create_device(physical_device, &device_create_info, None) {
                Ok(device) => device,
                Err(e) => {
                    instance.destroy_instance(None);
                    engine_error!("nebula::vulkan", "Failed to create logical device: {:?}", e);
                    return Err(Error::InitializationFailed(format!("Failed to create device: {:?}", e)));
                }
            };

            let graphics_queue = device.get_device_queue(graphics_family_index, 0);

            let allocator = match Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            }) {
                Ok(allocator) => allocator,
                Err(e) => {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                    engine_error!("nebula::vulkan", "Failed to create GPU allocator: {:?}", e);
                    return Err(Error::InitializationFailed(format!("Failed to create allocator: {:?}", e)));
                }
            };

            let sampler_info = vk::SamplerCreateInfo::default()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .max_lod(vk::LOD_CLAMP_NONE);
            let default_sampler = match device.create_sampler(&sampler_info, None) {
                Ok(sampler) => sampler,
                Err(e) => {
                    drop(allocator);
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                    engine_error!("nebula::vulkan", "Failed to create default sampler: {:?}", e);
                    return Err(Error::InitializationFailed(format!("Failed to create sampler: {:?}", e)));
                }
            };

            let allocator_arc = Arc::new(Mutex::new(allocator));
            let gpu_context = Arc::new(GpuContext::new(
                device.clone(),
                Arc::clone(&allocator_arc),
                graphics_queue,
                graphics_family_index,
            ));

            let rebinder = VulkanDescriptorRebinder::new(device.clone(), default_sampler);

            engine_info!("nebula::vulkan",
                "Vulkan device ready (graphics queue family {})", graphics_family_index);

            Ok(Self {
                _entry: entry,
                instance,
                physical_device,
                device,
                allocator: ManuallyDrop::new(allocator_arc),
                default_sampler,
                resources_lock: RenderResourcesLock::new(()),
                pipelines: PipelineRegistry::new(),
                rebinder,
                gpu_context,
            })
        }
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Reflect and register a pipeline
    ///
    /// The new pipeline has empty descriptor sets; the resource managers fill
    /// them through `update_descriptors_for_pipeline_resource`.
    pub fn create_pipeline(&self, desc: PipelineDesc) -> Result<Arc<Pipeline>> {
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&self.gpu_context), desc)?);
        self.pipelines.register(pipeline.clone() as Arc<dyn RendererPipeline>);
        Ok(pipeline)
    }

    /// Remove a pipeline from the registry; returns whether it was registered
    pub fn destroy_pipeline(&self, identifier: &str) -> bool {
        self.pipelines.unregister(identifier)
    }

    /// Recreate the descriptor sets of every registered pipeline
    ///
    /// Run after render settings change. The sets come back empty: follow
    /// with `bind_descriptors_to_recreated_pipeline_resources` on each
    /// resource manager.
    pub fn recreate_pipeline_descriptor_sets(&self) -> Result<()> {
        let pause = RenderPause::new(self)?;
        for pipeline in self.pipelines.all() {
            let vk_pipeline = downcast_backend::<Pipeline>(pipeline.as_any(), "Vulkan pipeline")?;
            vk_pipeline
                .recreate_descriptor_sets(&pause)
                .map_err(|e| e.context(format!("recreate descriptor sets of '{}'", pipeline.identifier())))?;
        }
        engine_info!("nebula::vulkan",
            "Recreated descriptor sets of {} pipeline(s)", self.pipelines.len());
        Ok(())
    }

    /// Create a sampled 2D texture
    pub fn create_texture(&self, desc: TextureDesc) -> Result<Arc<Texture>> {
        if desc.width == 0 || desc.height == 0 {
            engine_bail_invalid!("nebula::vulkan",
                "Texture '{}' has zero extent ({}x{})", desc.name, desc.width, desc.height);
        }
        unsafe {
            let image_create_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(desc.format)
                .extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = self.device.create_image(&image_create_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create texture image: {:?}", e))?;

            let requirements = self.device.get_image_memory_requirements(image);
            let allocation = match self.allocate("texture", requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(e);
                }
            };

            if let Err(e) = self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                self.gpu_context.free_allocation(allocation);
                self.device.destroy_image(image, None);
                return Err(engine_err!("nebula::vulkan", "Failed to bind texture image memory: {:?}", e));
            }

            let view_create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(desc.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = match self.device.create_image_view(&view_create_info, None) {
                Ok(view) => view,
                Err(e) => {
                    self.gpu_context.free_allocation(allocation);
                    self.device.destroy_image(image, None);
                    return Err(engine_err!("nebula::vulkan", "Failed to create texture image view: {:?}", e));
                }
            };

            Ok(Arc::new(Texture::new(
                Arc::clone(&self.gpu_context),
                image,
                view,
                allocation,
                desc.name,
            )))
        }
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let mut allocator = self.allocator.lock()
            .map_err(|_| engine_err!("nebula::vulkan", "GPU allocator lock poisoned"))?;
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|_e| {
                let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                engine_error!("nebula::vulkan", "Out of GPU memory for {} (required: {:.2} MB)", name, size_mb);
                Error::OutOfMemory
            })
    }
}

impl Renderer for VulkanRenderer {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::DescriptorTable
    }

    fn create_buffer(&self, desc: BufferDesc) -> Result<Arc<dyn RendererBuffer>> {
        if desc.size == 0 {
            engine_bail_invalid!("nebula::vulkan", "Cannot create a zero-sized {:?} buffer", desc.usage);
        }
        unsafe {
            let buffer_create_info = vk::BufferCreateInfo::default()
                .size(desc.size)
                .usage(buffer_usage_to_vk(desc.usage) | vk::BufferUsageFlags::TRANSFER_DST)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = self.device.create_buffer(&buffer_create_info, None)
                .map_err(|e| engine_err!("nebula::vulkan",
                    "Failed to create buffer of size {} bytes: {:?}", desc.size, e))?;

            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let allocation = match self.allocate("buffer", requirements, MemoryLocation::CpuToGpu, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };

            if let Err(e) = self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                self.gpu_context.free_allocation(allocation);
                self.device.destroy_buffer(buffer, None);
                return Err(engine_err!("nebula::vulkan", "Failed to bind buffer memory: {:?}", e));
            }

            Ok(Arc::new(Buffer::new(
                Arc::clone(&self.gpu_context),
                buffer,
                allocation,
                desc.size,
                desc.usage,
            )))
        }
    }

    fn render_resources_lock(&self) -> &RenderResourcesLock {
        &self.resources_lock
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to wait idle: {:?}", e))
        }
    }

    fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    fn descriptor_rebinder(&self) -> &dyn DescriptorRebinder {
        &self.rebinder
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            // 1. Release registered pipelines while the device is alive
            for pipeline in self.pipelines.all() {
                self.pipelines.unregister(pipeline.identifier());
            }

            // 2. Destroy renderer-owned Vulkan objects
            self.device.destroy_sampler(self.default_sampler, None);

            // 3. Drop allocator: free VkDeviceMemory pages BEFORE destroying device.
            //    First drop VulkanRenderer's Arc, then GpuContext's ManuallyDrop Arc.
            ManuallyDrop::drop(&mut self.allocator);
            if let Some(ctx) = Arc::get_mut(&mut self.gpu_context) {
                ManuallyDrop::drop(&mut ctx.allocator);
            } else {
                engine_error!("nebula::vulkan",
                    "GPU resources outlive the renderer; their memory is leaked");
            }

            // 4. Destroy device and instance
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
