/// Two-phase data source protocol for GPU copies
///
/// The owner of shader-visible data (a light, a per-object constant block)
/// controls exclusion around every copy: `start_update` hands out the bytes,
/// typically after locking the owner's own data, and `finish_update` releases
/// whatever `start_update` acquired. The arrays never see the owner's lock type.

use crate::error::{Error, Result};

/// Provider of the bytes copied into one element of a GPU array
pub trait ShaderDataSource: Send {
    /// Begin a copy; the returned bytes stay valid until `finish_update`
    fn start_update(&mut self) -> &[u8];

    /// End the copy started by `start_update`
    fn finish_update(&mut self);
}

/// Closure pair implementing `ShaderDataSource`
///
/// `start` produces a fresh snapshot of the element; `finish` runs once the
/// snapshot has been copied.
///
/// # Example
///
/// ```
/// use nebula_resources::nebula::shader_data::{ShaderDataSource, UpdateCallbacks};
///
/// let mut source = UpdateCallbacks::new(|| vec![1u8, 2, 3, 4], || {});
/// assert_eq!(source.start_update(), &[1, 2, 3, 4]);
/// source.finish_update();
/// ```
pub struct UpdateCallbacks {
    start: Box<dyn FnMut() -> Vec<u8> + Send>,
    finish: Box<dyn FnMut() + Send>,
    staged: Vec<u8>,
}

impl UpdateCallbacks {
    pub fn new(
        start: impl FnMut() -> Vec<u8> + Send + 'static,
        finish: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            start: Box::new(start),
            finish: Box::new(finish),
            staged: Vec::new(),
        }
    }
}

impl ShaderDataSource for UpdateCallbacks {
    fn start_update(&mut self) -> &[u8] {
        self.staged = (self.start)();
        &self.staged
    }

    fn finish_update(&mut self) {
        (self.finish)();
    }
}

/// Run `start_update → write → finish_update` on a source
///
/// `finish_update` is always called, including when the size check or the
/// write fails.
pub(crate) fn copy_from_source(
    source: &mut dyn ShaderDataSource,
    element_size: u64,
    write: impl FnOnce(&[u8]) -> Result<()>,
) -> Result<()> {
    let result = {
        let data = source.start_update();
        if data.len() as u64 != element_size {
            Err(Error::InvalidResource(format!(
                "data source produced {} bytes, element size is {}",
                data.len(),
                element_size
            )))
        } else {
            write(data)
        }
    };
    source.finish_update();
    result
}

#[cfg(test)]
#[path = "shader_data_tests.rs"]
mod tests;
