/// Index allocator for fixed-capacity shader arrays
///
/// Hands out reusable `u32` indices into a bindless array declared in shader
/// code. Each index is owned by an `IndexHandle` that gives it back on drop.

use std::sync::{Arc, Weak};
use parking_lot::Mutex;
use crate::error::Result;
use crate::utils::SlotAllocator;
use crate::{engine_bail_state, engine_error, engine_warn};

const LOG_SOURCE: &str = "nebula::IndexAllocator";

/// Free-list allocator of shader array indices
///
/// Released indices are reused before new ones are minted. Reaching the
/// declared array size is a soft limit: a warning is logged and the
/// out-of-bounds index is still returned.
pub struct IndexAllocator {
    name: String,
    array_size: u32,
    slots: Mutex<SlotAllocator>,
    self_ref: Weak<IndexAllocator>,
}

impl IndexAllocator {
    /// Create an allocator for a shader array of `array_size` elements
    pub fn new(name: impl Into<String>, array_size: u32) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            name: name.into(),
            array_size,
            slots: Mutex::new(SlotAllocator::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Reserve an index
    ///
    /// Logs a warning when the index lands outside the declared array size.
    /// Fails once every `u32` index is outstanding.
    pub fn reserve_index(&self) -> Result<IndexHandle> {
        let mut slots = self.slots.lock();
        let Some(index) = slots.alloc() else {
            engine_bail_state!(
                LOG_SOURCE,
                "Allocator '{}' exhausted the u32 index range",
                self.name
            );
        };
        if index >= self.array_size {
            engine_warn!(
                LOG_SOURCE,
                "Allocator '{}' handed out index {} but the shader array holds {} elements",
                self.name,
                index,
                self.array_size
            );
        }
        Ok(IndexHandle {
            allocator: self.self_ref.clone(),
            index,
        })
    }

    fn release(&self, index: u32) {
        let mut slots = self.slots.lock();
        if slots.is_empty() {
            engine_error!(
                LOG_SOURCE,
                "Allocator '{}' released index {} with no index outstanding",
                self.name,
                index
            );
            return;
        }
        if !slots.try_free(index) {
            engine_error!(
                LOG_SOURCE,
                "Allocator '{}' released unknown index {}",
                self.name,
                index
            );
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared element count of the shader array
    pub fn array_size(&self) -> u32 {
        self.array_size
    }

    /// Number of indices currently held by handles
    pub fn outstanding_count(&self) -> u32 {
        self.slots.lock().len()
    }
}

impl Drop for IndexAllocator {
    fn drop(&mut self) {
        let outstanding = self.slots.get_mut().len();
        if outstanding != 0 {
            engine_error!(
                LOG_SOURCE,
                "Allocator '{}' destroyed with {} outstanding indices; their handles outlived it",
                self.name,
                outstanding
            );
        }
    }
}

/// Exclusive owner of one shader array index
///
/// Not `Clone`; the index returns to the allocator when the handle drops.
pub struct IndexHandle {
    allocator: Weak<IndexAllocator>,
    index: u32,
}

impl IndexHandle {
    pub fn actual_index(&self) -> u32 {
        self.index
    }
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle").field("index", &self.index).finish()
    }
}

impl Drop for IndexHandle {
    fn drop(&mut self) {
        match self.allocator.upgrade() {
            Some(allocator) => allocator.release(self.index),
            None => engine_error!(
                LOG_SOURCE,
                "Index {} dropped after its allocator was destroyed",
                self.index
            ),
        }
    }
}

#[cfg(test)]
#[path = "index_allocator_tests.rs"]
mod tests;
