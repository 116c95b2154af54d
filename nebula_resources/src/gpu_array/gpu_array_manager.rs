/// One growable GPU array per shader resource name
///
/// Arrays are created on the first reservation under a name and dropped
/// again once they are empty.

use std::sync::{Arc, Weak};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::ArrayGrowthPolicy;
use crate::engine_debug;
use crate::error::Result;
use crate::gpu_array::{ArraySlotHandle, GrowableGpuArray, SlotOwner};
use crate::renderer::{Pipeline, Renderer};

pub struct GpuArrayManager {
    renderer: Arc<dyn Renderer>,
    policy: ArrayGrowthPolicy,
    arrays: Mutex<FxHashMap<String, Arc<GrowableGpuArray>>>,
}

impl GpuArrayManager {
    pub fn new(renderer: Arc<dyn Renderer>, policy: ArrayGrowthPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            renderer,
            policy,
            arrays: Mutex::new(FxHashMap::default()),
        })
    }

    /// Reserve an element in the array named `resource_name`
    ///
    /// The map lock is released before inserting: growth takes the render
    /// pause, which ranks above every manager lock.
    pub fn reserve_slot(
        &self,
        resource_name: &str,
        element_size: u64,
        owner: Weak<dyn SlotOwner>,
    ) -> Result<ArraySlotHandle> {
        self.prune_empty_arrays();

        let existing = self.arrays.lock().get(resource_name).cloned();
        let array = match existing {
            Some(array) => array,
            None => {
                let array = GrowableGpuArray::new(
                    self.renderer.clone(),
                    resource_name,
                    element_size,
                    &self.policy,
                )?;
                self.arrays
                    .lock()
                    .entry(resource_name.to_string())
                    .or_insert(array)
                    .clone()
            }
        };

        array
            .insert(element_size, owner)
            .map_err(|e| e.context(format!("reserve slot in '{}'", resource_name)))
    }

    /// Drop every array without live slots
    ///
    /// Arrays referenced outside the map (an insert in progress) are kept.
    pub fn prune_empty_arrays(&self) {
        self.arrays.lock().retain(|name, array| {
            let keep = !array.is_empty() || Arc::strong_count(array) > 1;
            if !keep {
                engine_debug!("nebula::GpuArrayManager", "Pruned empty array '{}'", name);
            }
            keep
        });
    }

    /// Array registered under `resource_name`, if any
    pub fn array(&self, resource_name: &str) -> Option<Arc<GrowableGpuArray>> {
        self.arrays.lock().get(resource_name).cloned()
    }

    pub fn array_count(&self) -> usize {
        self.arrays.lock().len()
    }

    fn snapshot(&self) -> Vec<Arc<GrowableGpuArray>> {
        self.arrays.lock().values().cloned().collect()
    }

    /// Re-point every pipeline at the current buffers of every array
    pub fn rebind_all_pipelines(&self) -> Result<()> {
        for array in self.snapshot() {
            array.rebind_all_pipelines()?;
        }
        Ok(())
    }

    /// Re-point one pipeline at the current buffers of every array it declares
    pub fn rebind_pipeline(&self, pipeline: &dyn Pipeline) -> Result<()> {
        for array in self.snapshot() {
            array.rebind_pipeline(pipeline)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "gpu_array_manager_tests.rs"]
mod tests;
