/// CPU-written shader resources
///
/// Per-object data (transforms, material constants) stored in a growable GPU
/// array. The owner marks the resource dirty; the manager copies it into one
/// frame buffer per `update_resources` pass until every frame in flight has
/// the new data.

use std::sync::{Arc, Weak};
use parking_lot::Mutex;

use crate::config::{ArrayGrowthPolicy, FRAMES_IN_FLIGHT};
use crate::engine_error;
use crate::error::Result;
use crate::gpu_array::{ArraySlotHandle, GpuArrayManager, SlotOwner};
use crate::renderer::{Pipeline, Renderer};
use crate::shader_data::{copy_from_source, ShaderDataSource};

/// Frames still holding stale data
///
/// `generation` moves on every mark; a copy only counts down when no mark
/// happened while it ran.
struct PendingFrames {
    state: Mutex<PendingState>,
}

#[derive(Clone, Copy)]
struct PendingState {
    frames_left: usize,
    generation: u64,
}

impl PendingFrames {
    fn new() -> Self {
        Self {
            state: Mutex::new(PendingState {
                frames_left: FRAMES_IN_FLIGHT,
                generation: 0,
            }),
        }
    }

    fn mark_all(&self) {
        let mut state = self.state.lock();
        state.frames_left = FRAMES_IN_FLIGHT;
        state.generation = state.generation.wrapping_add(1);
    }

    fn frames_left(&self) -> usize {
        self.state.lock().frames_left
    }

    /// Generation to copy against, `None` when every frame is current
    fn begin_copy(&self) -> Option<u64> {
        let state = *self.state.lock();
        (state.frames_left > 0).then_some(state.generation)
    }

    fn finish_copy(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.frames_left = state.frames_left.saturating_sub(1);
        }
    }
}

impl SlotOwner for PendingFrames {
    fn on_slot_relocated(&self) {
        self.mark_all();
    }
}

struct SharedResource {
    resource_name: String,
    element_size: u64,
    pending: Arc<PendingFrames>,
    source: Mutex<Box<dyn ShaderDataSource>>,
    slot: ArraySlotHandle,
}

impl SharedResource {
    fn update_frame(&self, frame_index: usize) -> Result<()> {
        let Some(generation) = self.pending.begin_copy() else {
            return Ok(());
        };
        let mut source = self.source.lock();
        copy_from_source(&mut **source, self.element_size, |data| {
            self.slot.update_data(frame_index, data)
        })?;
        self.pending.finish_copy(generation);
        Ok(())
    }
}

/// Handle of one CPU-written element; frees the element on drop
pub struct CpuWriteShaderResource {
    shared: Arc<SharedResource>,
}

impl CpuWriteShaderResource {
    /// Schedule a copy into every frame buffer
    pub fn mark_as_needs_update(&self) {
        self.shared.pending.mark_all();
    }

    /// Frame buffers that still hold stale data
    pub fn frames_left_to_update(&self) -> usize {
        self.shared.pending.frames_left()
    }

    /// Current element index in the array (changes on resize)
    pub fn index(&self) -> Result<u32> {
        self.shared.slot.index()
    }

    pub fn resource_name(&self) -> &str {
        &self.shared.resource_name
    }

    pub fn element_size(&self) -> u64 {
        self.shared.element_size
    }
}

/// Owner of the arrays backing CPU-written shader resources
pub struct CpuWriteResourceManager {
    arrays: GpuArrayManager,
    resources: Mutex<Vec<Weak<SharedResource>>>,
}

impl CpuWriteResourceManager {
    pub fn new(renderer: Arc<dyn Renderer>, policy: ArrayGrowthPolicy) -> Result<Self> {
        Ok(Self {
            arrays: GpuArrayManager::new(renderer, policy)?,
            resources: Mutex::new(Vec::new()),
        })
    }

    /// Reserve an element in the `resource_name` array, fed by `source`
    ///
    /// The new resource starts out needing an update in every frame.
    pub fn create(
        &self,
        resource_name: &str,
        element_size: u64,
        source: Box<dyn ShaderDataSource>,
    ) -> Result<CpuWriteShaderResource> {
        let pending = Arc::new(PendingFrames::new());
        let owner = Arc::downgrade(&pending) as Weak<dyn SlotOwner>;
        let slot = self.arrays.reserve_slot(resource_name, element_size, owner)?;

        let shared = Arc::new(SharedResource {
            resource_name: resource_name.to_string(),
            element_size,
            pending,
            source: Mutex::new(source),
            slot,
        });
        self.resources.lock().push(Arc::downgrade(&shared));
        Ok(CpuWriteShaderResource { shared })
    }

    /// Copy every resource that still needs it into the buffers of `frame_index`
    ///
    /// A failing resource does not stop the others; the first error is returned.
    pub fn update_resources(&self, frame_index: usize) -> Result<()> {
        let live: Vec<Arc<SharedResource>> = {
            let mut resources = self.resources.lock();
            resources.retain(|r| r.strong_count() > 0);
            resources.iter().filter_map(Weak::upgrade).collect()
        };

        let mut first_error = None;
        for resource in &live {
            if let Err(e) = resource.update_frame(frame_index) {
                engine_error!(
                    "nebula::CpuWriteResourceManager",
                    "Update of '{}' failed: {}",
                    resource.resource_name,
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rebind all arrays after the renderer recreated pipeline resources
    pub fn bind_descriptors_to_recreated_pipeline_resources(&self) -> Result<()> {
        self.arrays.rebind_all_pipelines()
    }

    /// Rebind all arrays in one recreated pipeline
    pub fn update_descriptors_for_pipeline_resource(&self, pipeline: &dyn Pipeline) -> Result<()> {
        self.arrays.rebind_pipeline(pipeline)
    }

    pub fn arrays(&self) -> &GpuArrayManager {
        &self.arrays
    }

    /// Resources still alive
    pub fn resource_count(&self) -> usize {
        self.resources.lock().iter().filter(|r| r.strong_count() > 0).count()
    }
}

#[cfg(test)]
#[path = "cpu_write_resource_tests.rs"]
mod tests;
