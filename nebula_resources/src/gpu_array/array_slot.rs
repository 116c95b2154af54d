/// RAII handle of one occupied element of a `GrowableGpuArray`

use std::sync::{Arc, Weak};
use crate::engine_error;
use crate::error::{Error, Result};
use crate::gpu_array::{ArraySlotKey, GrowableGpuArray};

/// Occupied slot; erased from its array on drop
///
/// The index may change whenever the array resizes, so it is looked up on
/// every access instead of being cached.
pub struct ArraySlotHandle {
    array: Weak<GrowableGpuArray>,
    key: ArraySlotKey,
}

impl ArraySlotHandle {
    pub(crate) fn new(array: Weak<GrowableGpuArray>, key: ArraySlotKey) -> Self {
        Self { array, key }
    }

    fn live_array(&self) -> Result<Arc<GrowableGpuArray>> {
        self.array
            .upgrade()
            .ok_or_else(|| Error::InvalidState("slot used after its array was destroyed".to_string()))
    }

    /// Current element index
    pub fn index(&self) -> Result<u32> {
        self.live_array()?.index_of(self.key)
    }

    /// Copy `data` into this slot of the buffer of `frame_index` only
    ///
    /// Other frames keep their previous contents; callers that need every
    /// frame updated write once per frame.
    pub fn update_data(&self, frame_index: usize, data: &[u8]) -> Result<()> {
        self.live_array()?.write_slot(self.key, frame_index, data)
    }

    /// Array this slot lives in, if still alive
    pub fn array(&self) -> Option<Arc<GrowableGpuArray>> {
        self.array.upgrade()
    }
}

impl Drop for ArraySlotHandle {
    fn drop(&mut self) {
        match self.array.upgrade() {
            Some(array) => array.erase(self.key),
            None => engine_error!(
                "nebula::ArraySlotHandle",
                "Slot dropped after its array was destroyed"
            ),
        }
    }
}

#[cfg(test)]
#[path = "array_slot_tests.rs"]
mod tests;
