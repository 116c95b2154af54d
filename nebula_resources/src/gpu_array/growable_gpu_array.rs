/// Growable GPU array
///
/// A storage buffer of fixed-size elements, one buffer per frame in flight.
/// Capacity grows and shrinks in steps. Every resize re-creates the buffers,
/// packs live slots at `0..size` and rebinds the buffers in every pipeline
/// declaring the array's resource name.
///
/// Capacity state machine:
/// - `0` (empty): every frame buffer holds one placeholder element so
///   descriptors never point at nothing; no index is handed out from it.
/// - `k > 0`: buffers hold `k` elements, `size <= k`.
///
/// Growth happens when an insert finds `size == capacity`. Shrinking happens
/// when an erase leaves `capacity >= 2 * step` and
/// `size <= capacity - step - step / 2`; the band between the two triggers
/// keeps an insert/erase pair at a boundary from resizing twice.

use std::cell::RefCell;
use std::sync::{Arc, Weak};
use parking_lot::ReentrantMutex;
use slotmap::{new_key_type, SlotMap};

use crate::config::{ArrayGrowthPolicy, FRAMES_IN_FLIGHT};
use crate::error::{Error, Result};
use crate::gpu_array::ArraySlotHandle;
use crate::renderer::{
    create_frame_buffers, rebind_buffers_in_all_pipelines, rebind_buffers_in_pipeline,
    BindingType, Buffer, BufferDesc, BufferUsage, Pipeline, RenderPause, Renderer,
};
use crate::utils::SlotAllocator;
use crate::{engine_bail_invalid, engine_bail_state, engine_debug, engine_error};

const LOG_SOURCE: &str = "nebula::GrowableGpuArray";

new_key_type! {
    /// Key of an occupied slot inside a `GrowableGpuArray`
    pub struct ArraySlotKey;
}

/// Object owning a slot, told when a resize moved its data
pub trait SlotOwner: Send + Sync {
    /// The slot got a new index in freshly created buffers
    ///
    /// Runs on the resizing thread once the new layout is in place; the
    /// owner may read its slot or write to the array from here.
    fn on_slot_relocated(&self);
}

struct ActiveSlot {
    index: u32,
    owner: Weak<dyn SlotOwner>,
}

struct ArrayState {
    capacity: u32,
    indices: SlotAllocator,
    buffers: Vec<Arc<dyn Buffer>>,
    slots: SlotMap<ArraySlotKey, ActiveSlot>,
}

pub struct GrowableGpuArray {
    resource_name: String,
    element_size: u64,
    step_size: u32,
    renderer: Arc<dyn Renderer>,
    state: ReentrantMutex<RefCell<ArrayState>>,
    self_ref: Weak<GrowableGpuArray>,
}

impl GrowableGpuArray {
    /// Create an empty array and bind its placeholder buffers
    pub fn new(
        renderer: Arc<dyn Renderer>,
        resource_name: impl Into<String>,
        element_size: u64,
        policy: &ArrayGrowthPolicy,
    ) -> Result<Arc<Self>> {
        let resource_name = resource_name.into();
        if element_size == 0 {
            engine_bail_invalid!(LOG_SOURCE, "Array '{}' created with element size 0", resource_name);
        }
        policy.validate()?;

        let buffers = {
            let _pause = RenderPause::new(renderer.as_ref())?;
            allocate_and_bind(renderer.as_ref(), &resource_name, element_size, 0)?
        };

        let step_size = policy.step_size(element_size);
        engine_debug!(
            LOG_SOURCE,
            "Array '{}' created (element size {}, step {})",
            resource_name,
            element_size,
            step_size
        );

        Ok(Arc::new_cyclic(|self_ref| Self {
            resource_name,
            element_size,
            step_size,
            renderer,
            state: ReentrantMutex::new(RefCell::new(ArrayState {
                capacity: 0,
                indices: SlotAllocator::new(),
                buffers,
                slots: SlotMap::with_key(),
            })),
            self_ref: self_ref.clone(),
        }))
    }

    // ===== SLOT LIFECYCLE =====

    /// Occupy one element
    ///
    /// `element_size` must equal the array's element size; a mismatch means
    /// two resources share a name with different layouts.
    pub fn insert(&self, element_size: u64, owner: Weak<dyn SlotOwner>) -> Result<ArraySlotHandle> {
        if element_size != self.element_size {
            engine_bail_invalid!(
                LOG_SOURCE,
                "Array '{}' holds {}-byte elements, got a {}-byte element",
                self.resource_name,
                self.element_size,
                element_size
            );
        }

        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            if state.indices.len() < state.capacity {
                return self.occupy(&mut state, owner);
            }
        }

        let pause = RenderPause::new(self.renderer.as_ref())?;
        let guard = self.state.lock();
        let (handle, relocated) = {
            let mut state = guard.borrow_mut();
            let relocated = if state.indices.len() == state.capacity {
                self.expand(&pause, &mut state)?
            } else {
                Vec::new()
            };
            let handle = self.occupy(&mut state, owner)?;
            (handle, relocated)
        };
        notify_relocated(relocated);
        Ok(handle)
    }

    fn occupy(&self, state: &mut ArrayState, owner: Weak<dyn SlotOwner>) -> Result<ArraySlotHandle> {
        let Some(index) = state.indices.alloc() else {
            engine_bail_state!(LOG_SOURCE, "Array '{}' ran out of indices", self.resource_name);
        };
        let key = state.slots.insert(ActiveSlot { index, owner });
        Ok(ArraySlotHandle::new(self.self_ref.clone(), key))
    }

    /// Release a slot; called by `ArraySlotHandle::drop`
    pub(crate) fn erase(&self, key: ArraySlotKey) {
        let shrink_needed = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let Some(slot) = state.slots.remove(key) else {
                engine_error!(
                    LOG_SOURCE,
                    "Array '{}' asked to erase an unregistered slot",
                    self.resource_name
                );
                return;
            };
            state.indices.try_free(slot.index);
            self.shrink_allowed(&state)
        };
        if !shrink_needed {
            return;
        }

        let pause = match RenderPause::new(self.renderer.as_ref()) {
            Ok(pause) => pause,
            Err(e) => {
                engine_error!(
                    LOG_SOURCE,
                    "Array '{}' skipped shrinking: {}",
                    self.resource_name,
                    e
                );
                return;
            }
        };
        let guard = self.state.lock();
        let shrunk = {
            let mut state = guard.borrow_mut();
            let shrunk = if self.shrink_allowed(&state) {
                self.shrink(&pause, &mut state)
            } else {
                Ok(Vec::new())
            };
            shrunk
        };
        match shrunk {
            Ok(relocated) => notify_relocated(relocated),
            Err(e) => {
                engine_error!(LOG_SOURCE, "Array '{}' failed to shrink: {}", self.resource_name, e);
            }
        }
    }

    // ===== RESIZING =====

    fn expand(
        &self,
        pause: &RenderPause<'_>,
        state: &mut ArrayState,
    ) -> Result<Vec<Arc<dyn SlotOwner>>> {
        if state.indices.len() != state.capacity || state.indices.has_recycled() {
            engine_bail_state!(
                LOG_SOURCE,
                "Array '{}' expanded with size {} / capacity {} and {} free indices",
                self.resource_name,
                state.indices.len(),
                state.capacity,
                state.indices.recycled_count()
            );
        }
        let Some(new_capacity) = state.capacity.checked_add(self.step_size) else {
            engine_bail_state!(
                LOG_SOURCE,
                "Array '{}' capacity would overflow u32",
                self.resource_name
            );
        };
        self.create_array(pause, state, new_capacity)
    }

    fn shrink(
        &self,
        pause: &RenderPause<'_>,
        state: &mut ArrayState,
    ) -> Result<Vec<Arc<dyn SlotOwner>>> {
        if !self.shrink_allowed(state) {
            engine_bail_state!(
                LOG_SOURCE,
                "Array '{}' shrunk with size {} / capacity {} outside the shrink band",
                self.resource_name,
                state.indices.len(),
                state.capacity
            );
        }
        let new_capacity = state.capacity - self.step_size;
        self.create_array(pause, state, new_capacity)
    }

    fn shrink_allowed(&self, state: &ArrayState) -> bool {
        let capacity = state.capacity as u64;
        let step = self.step_size as u64;
        capacity >= 2 * step && (state.indices.len() as u64) <= capacity - step - step / 2
    }

    /// Replace the frame buffers with buffers of `capacity` elements
    ///
    /// Live slots are packed at `0..size` in their previous order. Returns
    /// the owners to notify once the state borrow is released.
    fn create_array(
        &self,
        _pause: &RenderPause<'_>,
        state: &mut ArrayState,
        capacity: u32,
    ) -> Result<Vec<Arc<dyn SlotOwner>>> {
        let buffers = allocate_and_bind(
            self.renderer.as_ref(),
            &self.resource_name,
            self.element_size,
            capacity,
        )?;

        let mut order: Vec<(u32, ArraySlotKey)> =
            state.slots.iter().map(|(key, slot)| (slot.index, key)).collect();
        order.sort_unstable_by_key(|&(index, _)| index);
        let mut relocated = Vec::with_capacity(order.len());
        for (new_index, &(_, key)) in order.iter().enumerate() {
            let slot = &mut state.slots[key];
            slot.index = new_index as u32;
            relocated.extend(slot.owner.upgrade());
        }

        engine_debug!(
            LOG_SOURCE,
            "Array '{}' resized {} -> {} ({} live)",
            self.resource_name,
            state.capacity,
            capacity,
            order.len()
        );
        state.indices.reset_to(order.len() as u32);
        state.capacity = capacity;
        state.buffers = buffers;
        Ok(relocated)
    }

    // ===== SLOT ACCESS =====

    fn slot_index(&self, state: &ArrayState, key: ArraySlotKey) -> Result<u32> {
        debug_assert!(
            state.slots.contains_key(key),
            "slot handle outlived its registration in '{}'",
            self.resource_name
        );
        state.slots.get(key).map(|slot| slot.index).ok_or_else(|| {
            Error::InvalidState(format!(
                "slot is not registered in array '{}'",
                self.resource_name
            ))
        })
    }

    pub(crate) fn index_of(&self, key: ArraySlotKey) -> Result<u32> {
        self.slot_index(&self.state.lock().borrow(), key)
    }

    /// Copy one element into the buffer of `frame_index`
    pub(crate) fn write_slot(&self, key: ArraySlotKey, frame_index: usize, data: &[u8]) -> Result<()> {
        if data.len() as u64 != self.element_size {
            engine_bail_invalid!(
                LOG_SOURCE,
                "Array '{}' got {} bytes for a {}-byte element",
                self.resource_name,
                data.len(),
                self.element_size
            );
        }
        let guard = self.state.lock();
        let state = guard.borrow();
        let index = self.slot_index(&state, key)?;
        let buffer = frame_buffer(&state.buffers, frame_index, &self.resource_name)?;
        buffer.update(index as u64 * self.element_size, data)
    }

    // ===== BINDING =====

    /// Re-point every pipeline declaring this array at the current buffers
    pub fn rebind_all_pipelines(&self) -> Result<()> {
        let _guard = self.state.lock();
        let buffers = self.buffers();
        rebind_buffers_in_all_pipelines(
            self.renderer.as_ref(),
            &self.resource_name,
            &buffers,
            BindingType::StorageBuffer,
        )
    }

    /// Re-point one pipeline at the current buffers
    pub fn rebind_pipeline(&self, pipeline: &dyn Pipeline) -> Result<()> {
        let _guard = self.state.lock();
        let buffers = self.buffers();
        rebind_buffers_in_pipeline(
            self.renderer.as_ref(),
            pipeline,
            &self.resource_name,
            &buffers,
            BindingType::StorageBuffer,
        )
    }

    // ===== ACCESSORS =====

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    /// Elements added or removed per resize
    pub fn step_size(&self) -> u32 {
        self.step_size
    }

    /// Elements usable before the next growth (0 for an empty array)
    pub fn capacity(&self) -> u32 {
        self.state.lock().borrow().capacity
    }

    /// Live slot count
    pub fn size(&self) -> u32 {
        self.state.lock().borrow().indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Buffer of one frame in flight
    pub fn buffer(&self, frame_index: usize) -> Result<Arc<dyn Buffer>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let buffer = frame_buffer(&state.buffers, frame_index, &self.resource_name)?;
        Ok(buffer.clone())
    }

    /// Buffers of every frame in flight
    pub fn buffers(&self) -> Vec<Arc<dyn Buffer>> {
        self.state.lock().borrow().buffers.clone()
    }
}

impl Drop for GrowableGpuArray {
    fn drop(&mut self) {
        let live = self.state.get_mut().get_mut().slots.len();
        if live != 0 {
            engine_error!(
                LOG_SOURCE,
                "Array '{}' destroyed with {} live slots",
                self.resource_name,
                live
            );
        }
    }
}

fn notify_relocated(owners: Vec<Arc<dyn SlotOwner>>) {
    for owner in owners {
        owner.on_slot_relocated();
    }
}

/// Allocate frame buffers for `capacity` elements and bind them everywhere
fn allocate_and_bind(
    renderer: &dyn Renderer,
    resource_name: &str,
    element_size: u64,
    capacity: u32,
) -> Result<Vec<Arc<dyn Buffer>>> {
    let desc = BufferDesc::array(BufferUsage::Storage, element_size, capacity.max(1) as u64);
    let buffers = create_frame_buffers(renderer, &desc)
        .map_err(|e| e.context(format!("allocate buffers of array '{}'", resource_name)))?;
    rebind_buffers_in_all_pipelines(renderer, resource_name, &buffers, BindingType::StorageBuffer)?;
    Ok(buffers)
}

pub(crate) fn frame_buffer<'a>(
    buffers: &'a [Arc<dyn Buffer>],
    frame_index: usize,
    resource_name: &str,
) -> Result<&'a Arc<dyn Buffer>> {
    buffers.get(frame_index).ok_or_else(|| {
        Error::InvalidResource(format!(
            "frame index {} out of range for '{}' ({} frames in flight)",
            frame_index, resource_name, FRAMES_IN_FLIGHT
        ))
    })
}

#[cfg(test)]
#[path = "growable_gpu_array_tests.rs"]
mod tests;
