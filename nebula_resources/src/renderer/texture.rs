/// Texture trait

use std::any::Any;

/// Sampled texture resource trait
///
/// Loading and uploading textures is the backend's business; the resource
/// layer only writes existing textures into bindless array elements.
pub trait Texture: Send + Sync {
    /// Debug name, used in log messages
    fn name(&self) -> &str;

    /// Backend downcast hook
    fn as_any(&self) -> &dyn Any;
}
