/// Light array - shader-visible records of one light type
///
/// Unlike `GrowableGpuArray`, a light array is recreated with exactly
/// `max(1, size)` elements on every reservation and release, and the
/// recreation copies every light into every frame buffer immediately.
/// Lights change count rarely; they change data often, which goes through
/// the per-frame dirty sets.
///
/// With zero lights the last buffers stay alive, so bindings never point at
/// nothing.
///
/// An optional "lights in frustum" index buffer (`[count, indices...]` as
/// `u32`) is recreated together with the light buffers and bound under its
/// own resource name.

use std::cell::RefCell;
use std::sync::{Arc, Weak};
use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashSet;
use slotmap::{new_key_type, SlotMap};

use crate::config::FRAMES_IN_FLIGHT;
use crate::error::{Error, Result};
use crate::gpu_array::growable_gpu_array::frame_buffer;
use crate::renderer::{
    create_frame_buffers, rebind_buffers_in_all_pipelines, rebind_buffers_in_pipeline,
    BindingType, Buffer, BufferDesc, BufferUsage, Pipeline, RenderPause, Renderer,
};
use crate::shader_data::{copy_from_source, ShaderDataSource};
use crate::{engine_bail_invalid, engine_bail_state, engine_debug, engine_error};

const LOG_SOURCE: &str = "nebula::LightArray";

/// Element size of the buffers bound before the first reservation
const PLACEHOLDER_ELEMENT_SIZE: u64 = 16;

const INDEX_SIZE: u64 = std::mem::size_of::<u32>() as u64;

new_key_type! {
    /// Key of a light inside a `LightArray`
    pub struct LightSlotKey;
}

/// Scene node owning a light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// Called with the new light count after every reservation and release
pub type SizeChangedHandler = Box<dyn Fn(usize) -> Result<()> + Send + Sync>;

type SharedSource = Arc<Mutex<Box<dyn ShaderDataSource>>>;

struct LightEntry {
    index: u32,
    owner_node: NodeId,
    source: SharedSource,
}

struct FrustumIndices {
    resource_name: String,
    buffers: Vec<Arc<dyn Buffer>>,
    visible: Vec<u32>,
}

struct LightArrayState {
    element_size: Option<u64>,
    capacity: u32,
    buffers: Vec<Arc<dyn Buffer>>,
    slots: SlotMap<LightSlotKey, LightEntry>,
    dirty: [FxHashSet<LightSlotKey>; FRAMES_IN_FLIGHT],
    frustum: Option<FrustumIndices>,
}

pub struct LightArray {
    resource_name: String,
    renderer: Arc<dyn Renderer>,
    on_size_changed: Option<SizeChangedHandler>,
    state: ReentrantMutex<RefCell<LightArrayState>>,
    self_ref: Weak<LightArray>,
}

impl LightArray {
    /// Create an empty light array and bind its placeholder buffers
    ///
    /// `frustum_resource_name` enables the "lights in frustum" index buffer.
    pub fn new(
        renderer: Arc<dyn Renderer>,
        resource_name: impl Into<String>,
        frustum_resource_name: Option<&str>,
        on_size_changed: Option<SizeChangedHandler>,
    ) -> Result<Arc<Self>> {
        let resource_name = resource_name.into();

        let (buffers, frustum) = {
            let _pause = RenderPause::new(renderer.as_ref())?;
            let buffers = create_frame_buffers(
                renderer.as_ref(),
                &BufferDesc::array(BufferUsage::Storage, PLACEHOLDER_ELEMENT_SIZE, 1),
            )
            .map_err(|e| e.context(format!("allocate buffers of light array '{}'", resource_name)))?;
            rebind_buffers_in_all_pipelines(
                renderer.as_ref(),
                &resource_name,
                &buffers,
                BindingType::StorageBuffer,
            )?;

            let frustum = match frustum_resource_name {
                Some(name) => {
                    let buffers = create_index_buffers(renderer.as_ref(), 0)?;
                    rebind_buffers_in_all_pipelines(
                        renderer.as_ref(),
                        name,
                        &buffers,
                        BindingType::StorageBuffer,
                    )?;
                    Some(FrustumIndices {
                        resource_name: name.to_string(),
                        buffers,
                        visible: Vec::new(),
                    })
                }
                None => None,
            };
            (buffers, frustum)
        };

        engine_debug!(LOG_SOURCE, "Light array '{}' created", resource_name);

        Ok(Arc::new_cyclic(|self_ref| Self {
            resource_name,
            renderer,
            on_size_changed,
            state: ReentrantMutex::new(RefCell::new(LightArrayState {
                element_size: None,
                capacity: 1,
                buffers,
                slots: SlotMap::with_key(),
                dirty: std::array::from_fn(|_| FxHashSet::default()),
                frustum,
            })),
            self_ref: self_ref.clone(),
        }))
    }

    // ===== SLOT LIFECYCLE =====

    /// Add a light owned by `owner_node`, fed by `source`
    ///
    /// The first reservation fixes the element size; a different `data_size`
    /// later is rejected and leaves the array unchanged. Pauses rendering.
    pub fn reserve_new_slot(
        &self,
        owner_node: NodeId,
        data_size: u64,
        source: Box<dyn ShaderDataSource>,
    ) -> Result<LightArraySlot> {
        if data_size == 0 {
            engine_bail_invalid!(
                LOG_SOURCE,
                "Light array '{}' asked for a 0-byte element",
                self.resource_name
            );
        }

        let pause = RenderPause::new(self.renderer.as_ref())?;
        let (key, new_size) = {
            let guard = self.state.lock();
            let key = {
                let mut state = guard.borrow_mut();
                if let Some(element_size) = state.element_size {
                    if element_size != data_size {
                        engine_bail_invalid!(
                            LOG_SOURCE,
                            "Light array '{}' holds {}-byte lights, got a {}-byte light",
                            self.resource_name,
                            element_size,
                            data_size
                        );
                    }
                }
                let index = state.slots.len() as u32;
                state.slots.insert(LightEntry {
                    index,
                    owner_node,
                    source: Arc::new(Mutex::new(source)),
                })
            };

            if let Err(e) = self.recreate(&pause, &guard, data_size) {
                let removed = guard.borrow_mut().slots.remove(key);
                drop(removed);
                return Err(e.context(format!("add light to '{}'", self.resource_name)));
            }
            let mut state = guard.borrow_mut();
            state.element_size = Some(data_size);
            (key, state.slots.len())
        };

        let slot = LightArraySlot {
            array: self.self_ref.clone(),
            key,
        };
        self.notify_size_changed(new_size)?;
        Ok(slot)
    }

    /// Remove a light; called by `LightArraySlot::drop`
    fn free_slot(&self, key: LightSlotKey) {
        let pause = match RenderPause::new(self.renderer.as_ref()) {
            Ok(pause) => Some(pause),
            Err(e) => {
                engine_error!(
                    LOG_SOURCE,
                    "Light array '{}' released a light without pausing rendering: {}",
                    self.resource_name,
                    e
                );
                None
            }
        };

        let new_size = {
            let guard = self.state.lock();
            let (removed, element_size, remaining) = {
                let mut state = guard.borrow_mut();
                let removed = state.slots.remove(key);
                for dirty in &mut state.dirty {
                    dirty.remove(&key);
                }
                (removed, state.element_size, state.slots.len())
            };
            if removed.is_none() {
                engine_error!(
                    LOG_SOURCE,
                    "Light array '{}' asked to free an unregistered light",
                    self.resource_name
                );
                return;
            }
            drop(removed);

            match (&pause, element_size) {
                (Some(pause), Some(element_size)) if remaining > 0 => {
                    if let Err(e) = self.recreate(pause, &guard, element_size) {
                        engine_error!(
                            LOG_SOURCE,
                            "Light array '{}' failed to shrink: {}",
                            self.resource_name,
                            e
                        );
                    }
                }
                _ => {
                    let mut state = guard.borrow_mut();
                    if let Some(frustum) = &mut state.frustum {
                        frustum.visible.clear();
                    }
                    if pause.is_some() && state.slots.is_empty() {
                        if let Err(e) = self.clear_frustum_counts(&state) {
                            engine_error!(LOG_SOURCE, "{}", e);
                        }
                    }
                }
            }
            let remaining = guard.borrow().slots.len();
            remaining
        };

        if let Err(e) = self.notify_size_changed(new_size) {
            engine_error!(LOG_SOURCE, "{}", e);
        }
    }

    fn notify_size_changed(&self, new_size: usize) -> Result<()> {
        match &self.on_size_changed {
            Some(handler) => handler(new_size).map_err(|e| {
                e.context(format!(
                    "size change of '{}' to {}",
                    self.resource_name, new_size
                ))
            }),
            None => Ok(()),
        }
    }

    /// Replace every frame buffer with one of exactly `max(1, size)` elements
    ///
    /// Lights are packed at `0..size` in their previous order and copied into
    /// all frame buffers through their data sources, with the state borrow
    /// released. A light whose copy fails is marked dirty in every frame
    /// instead.
    fn recreate(
        &self,
        _pause: &RenderPause<'_>,
        cell: &RefCell<LightArrayState>,
        element_size: u64,
    ) -> Result<()> {
        let renderer = self.renderer.as_ref();
        let (count, has_frustum) = {
            let state = cell.borrow();
            (state.slots.len() as u32, state.frustum.is_some())
        };
        let capacity = count.max(1);

        let buffers = create_frame_buffers(
            renderer,
            &BufferDesc::array(BufferUsage::Storage, element_size, capacity as u64),
        )
        .map_err(|e| e.context(format!("allocate buffers of light array '{}'", self.resource_name)))?;
        let index_buffers = if has_frustum {
            Some(create_index_buffers(renderer, count)?)
        } else {
            None
        };

        let (copies, frustum_binding) = {
            let mut guard = cell.borrow_mut();
            let state = &mut *guard;
            let mut order: Vec<(u32, LightSlotKey)> =
                state.slots.iter().map(|(key, entry)| (entry.index, key)).collect();
            order.sort_unstable_by_key(|&(index, _)| index);

            let mut copies = Vec::with_capacity(order.len());
            for (new_index, &(_, key)) in order.iter().enumerate() {
                let entry = &mut state.slots[key];
                entry.index = new_index as u32;
                copies.push((key, new_index as u32, entry.source.clone()));
            }

            engine_debug!(
                LOG_SOURCE,
                "Light array '{}' recreated {} -> {} ({} lights)",
                self.resource_name,
                state.capacity,
                capacity,
                count
            );
            state.capacity = capacity;
            state.buffers = buffers.clone();

            let frustum_binding = match (&mut state.frustum, index_buffers) {
                (Some(frustum), Some(index_buffers)) => {
                    frustum.buffers = index_buffers;
                    frustum.visible.clear();
                    Some((frustum.resource_name.clone(), frustum.buffers.clone()))
                }
                _ => None,
            };
            (copies, frustum_binding)
        };

        for (key, index, source) in copies {
            let offset = index as u64 * element_size;
            let copied = copy_from_source(&mut **source.lock(), element_size, |data| {
                buffers.iter().try_for_each(|buffer| buffer.update(offset, data))
            });
            if let Err(e) = copied {
                engine_error!(
                    LOG_SOURCE,
                    "Light {} of '{}' not copied on resize: {}",
                    index,
                    self.resource_name,
                    e
                );
                let mut state = cell.borrow_mut();
                if state.slots.contains_key(key) {
                    for dirty in &mut state.dirty {
                        dirty.insert(key);
                    }
                }
            }
        }

        rebind_buffers_in_all_pipelines(
            renderer,
            &self.resource_name,
            &buffers,
            BindingType::StorageBuffer,
        )?;
        if let Some((resource_name, index_buffers)) = frustum_binding {
            rebind_buffers_in_all_pipelines(
                renderer,
                &resource_name,
                &index_buffers,
                BindingType::StorageBuffer,
            )?;
        }
        Ok(())
    }

    fn clear_frustum_counts(&self, state: &LightArrayState) -> Result<()> {
        if let Some(frustum) = &state.frustum {
            for buffer in &frustum.buffers {
                buffer.update(0, bytemuck::bytes_of(&0u32))?;
            }
        }
        Ok(())
    }

    // ===== DATA UPDATES =====

    /// Schedule a copy of `slot` into every frame buffer
    ///
    /// Marking an already dirty light again has no further effect.
    pub fn mark_slot_as_needs_update(&self, slot: &LightArraySlot) -> Result<()> {
        if !Weak::ptr_eq(&slot.array, &self.self_ref) {
            engine_bail_invalid!(
                LOG_SOURCE,
                "Light slot does not belong to array '{}'",
                self.resource_name
            );
        }
        self.mark_key(slot.key)
    }

    fn mark_key(&self, key: LightSlotKey) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if !state.slots.contains_key(key) {
            engine_bail_state!(
                LOG_SOURCE,
                "Light array '{}' has no light for this slot",
                self.resource_name
            );
        }
        for dirty in &mut state.dirty {
            dirty.insert(key);
        }
        Ok(())
    }

    /// Copy every light marked for `frame_index` into that frame's buffer
    ///
    /// Only this frame's dirty set is flushed and cleared; the sources of
    /// failing lights are still finished and the first error is returned.
    pub fn update_slots_marked_as_needs_update(&self, frame_index: usize) -> Result<()> {
        let guard = self.state.lock();
        let (keys, element_size, buffer) = {
            let mut state = guard.borrow_mut();
            let Some(dirty) = state.dirty.get_mut(frame_index) else {
                engine_bail_invalid!(
                    LOG_SOURCE,
                    "Frame index {} out of range for '{}'",
                    frame_index,
                    self.resource_name
                );
            };
            let keys = std::mem::take(dirty);
            let Some(element_size) = state.element_size else {
                return Ok(());
            };
            let buffer = frame_buffer(&state.buffers, frame_index, &self.resource_name)?.clone();
            (keys, element_size, buffer)
        };

        let mut first_error = None;
        for key in keys {
            let entry = guard
                .borrow()
                .slots
                .get(key)
                .map(|entry| (entry.index, entry.source.clone()));
            let Some((index, source)) = entry else {
                continue;
            };
            let offset = index as u64 * element_size;
            if let Err(e) = copy_from_source(&mut **source.lock(), element_size, |data| {
                buffer.update(offset, data)
            }) {
                engine_error!(
                    LOG_SOURCE,
                    "Light {} of '{}' not updated for frame {}: {}",
                    index,
                    self.resource_name,
                    frame_index,
                    e
                );
                first_error.get_or_insert(e);
            };
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Store and upload the array indices of lights whose owner is visible
    ///
    /// Writes `[count, indices...]` into the index buffer of `frame_index`.
    pub fn update_lights_in_frustum(
        &self,
        frame_index: usize,
        is_visible: &mut dyn FnMut(NodeId) -> bool,
    ) -> Result<()> {
        let guard = self.state.lock();
        let lights: Vec<(NodeId, u32)> = {
            let state = guard.borrow();
            if state.frustum.is_none() {
                engine_bail_state!(
                    LOG_SOURCE,
                    "Light array '{}' has no frustum index buffer",
                    self.resource_name
                );
            }
            state.slots.values().map(|entry| (entry.owner_node, entry.index)).collect()
        };

        let mut visible: Vec<u32> = lights
            .into_iter()
            .filter(|&(node, _)| is_visible(node))
            .map(|(_, index)| index)
            .collect();
        visible.sort_unstable();

        let mut words = Vec::with_capacity(visible.len() + 1);
        words.push(visible.len() as u32);
        words.extend_from_slice(&visible);

        let mut state = guard.borrow_mut();
        let Some(frustum) = &mut state.frustum else {
            engine_bail_state!(
                LOG_SOURCE,
                "Light array '{}' lost its frustum index buffer",
                self.resource_name
            );
        };
        let buffer = frame_buffer(&frustum.buffers, frame_index, &frustum.resource_name)?;
        buffer.update(0, bytemuck::cast_slice(&words))?;
        frustum.visible = visible;
        Ok(())
    }

    // ===== BINDING =====

    /// Re-point every pipeline declaring this array at the current buffers
    ///
    /// No-op on root-argument backends.
    pub fn update_bindings_in_all_pipelines(&self) -> Result<()> {
        let _guard = self.state.lock();
        let renderer = self.renderer.as_ref();
        let (buffers, frustum) = self.bound_buffers();
        rebind_buffers_in_all_pipelines(
            renderer,
            &self.resource_name,
            &buffers,
            BindingType::StorageBuffer,
        )?;
        if let Some((resource_name, index_buffers)) = frustum {
            rebind_buffers_in_all_pipelines(
                renderer,
                &resource_name,
                &index_buffers,
                BindingType::StorageBuffer,
            )?;
        }
        Ok(())
    }

    /// Re-point one pipeline at the current buffers
    pub fn update_pipeline_binding(&self, pipeline: &dyn Pipeline) -> Result<()> {
        let _guard = self.state.lock();
        let renderer = self.renderer.as_ref();
        let (buffers, frustum) = self.bound_buffers();
        rebind_buffers_in_pipeline(
            renderer,
            pipeline,
            &self.resource_name,
            &buffers,
            BindingType::StorageBuffer,
        )?;
        if let Some((resource_name, index_buffers)) = frustum {
            rebind_buffers_in_pipeline(
                renderer,
                pipeline,
                &resource_name,
                &index_buffers,
                BindingType::StorageBuffer,
            )?;
        }
        Ok(())
    }

    /// Light buffers, plus the frustum index buffers under their resource name
    fn bound_buffers(&self) -> (Vec<Arc<dyn Buffer>>, Option<(String, Vec<Arc<dyn Buffer>>)>) {
        let guard = self.state.lock();
        let state = guard.borrow();
        let frustum = state
            .frustum
            .as_ref()
            .map(|frustum| (frustum.resource_name.clone(), frustum.buffers.clone()));
        (state.buffers.clone(), frustum)
    }

    // ===== ACCESSORS =====

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Resource name of the frustum index buffer, if enabled
    pub fn frustum_resource_name(&self) -> Option<String> {
        self.state
            .lock()
            .borrow()
            .frustum
            .as_ref()
            .map(|frustum| frustum.resource_name.clone())
    }

    /// Light count
    pub fn size(&self) -> usize {
        self.state.lock().borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Elements in each frame buffer (at least 1)
    pub fn capacity(&self) -> u32 {
        self.state.lock().borrow().capacity
    }

    /// Light record size, fixed by the first reservation
    pub fn element_size(&self) -> Option<u64> {
        self.state.lock().borrow().element_size
    }

    /// Light buffer of one frame in flight
    pub fn buffer(&self, frame_index: usize) -> Result<Arc<dyn Buffer>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let buffer = frame_buffer(&state.buffers, frame_index, &self.resource_name)?;
        Ok(buffer.clone())
    }

    /// Light buffers of every frame in flight
    pub fn buffers(&self) -> Vec<Arc<dyn Buffer>> {
        self.state.lock().borrow().buffers.clone()
    }

    /// Frustum index buffer of one frame in flight
    pub fn frustum_index_buffer(&self, frame_index: usize) -> Result<Arc<dyn Buffer>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let Some(frustum) = &state.frustum else {
            return Err(Error::InvalidState(format!(
                "light array '{}' has no frustum index buffer",
                self.resource_name
            )));
        };
        let buffer = frame_buffer(&frustum.buffers, frame_index, &frustum.resource_name)?;
        Ok(buffer.clone())
    }

    /// Indices written by the last `update_lights_in_frustum`
    pub fn lights_in_frustum(&self) -> Vec<u32> {
        self.state
            .lock()
            .borrow()
            .frustum
            .as_ref()
            .map(|frustum| frustum.visible.clone())
            .unwrap_or_default()
    }

    fn slot_info(&self, key: LightSlotKey) -> Result<(u32, NodeId)> {
        let guard = self.state.lock();
        let state = guard.borrow();
        debug_assert!(
            state.slots.contains_key(key),
            "light slot outlived its registration in '{}'",
            self.resource_name
        );
        state
            .slots
            .get(key)
            .map(|entry| (entry.index, entry.owner_node))
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "light is not registered in array '{}'",
                    self.resource_name
                ))
            })
    }
}

impl Drop for LightArray {
    fn drop(&mut self) {
        let state = self.state.get_mut().get_mut();
        let live = state.slots.len();
        let dirty: usize = state.dirty.iter().map(FxHashSet::len).sum();
        if live != 0 || dirty != 0 {
            engine_error!(
                LOG_SOURCE,
                "Light array '{}' destroyed with {} live lights and {} pending updates",
                self.resource_name,
                live,
                dirty
            );
        }
    }
}

/// Frustum index buffers holding a count and `max(1, light_count)` indices
fn create_index_buffers(renderer: &dyn Renderer, light_count: u32) -> Result<Vec<Arc<dyn Buffer>>> {
    let buffers = create_frame_buffers(
        renderer,
        &BufferDesc::array(BufferUsage::Storage, INDEX_SIZE, 1 + light_count.max(1) as u64),
    )?;
    for buffer in &buffers {
        buffer.update(0, bytemuck::bytes_of(&0u32))?;
    }
    Ok(buffers)
}

// ============================================================================
// LightArraySlot
// ============================================================================

/// One light in a `LightArray`; removed from the array on drop
///
/// Must be dropped before the array it came from.
pub struct LightArraySlot {
    array: Weak<LightArray>,
    key: LightSlotKey,
}

impl LightArraySlot {
    fn live_array(&self) -> Result<Arc<LightArray>> {
        self.array.upgrade().ok_or_else(|| {
            Error::InvalidState("light slot used after its array was destroyed".to_string())
        })
    }

    /// Current index in the light array (changes when lights come and go)
    pub fn index(&self) -> Result<u32> {
        Ok(self.live_array()?.slot_info(self.key)?.0)
    }

    pub fn owner_node(&self) -> Result<NodeId> {
        Ok(self.live_array()?.slot_info(self.key)?.1)
    }

    /// Schedule a copy of this light into every frame buffer
    pub fn mark_as_needs_update(&self) -> Result<()> {
        self.live_array()?.mark_key(self.key)
    }

    /// Array this light lives in, if still alive
    pub fn array(&self) -> Option<Arc<LightArray>> {
        self.array.upgrade()
    }
}

impl Drop for LightArraySlot {
    fn drop(&mut self) {
        match self.array.upgrade() {
            Some(array) => array.free_slot(self.key),
            None => engine_error!(
                "nebula::LightArraySlot",
                "Light dropped after its array was destroyed"
            ),
        }
    }
}

#[cfg(test)]
#[path = "light_array_tests.rs"]
mod tests;
