/*!
# Nebula Resources

Shader-resource binding and lighting-data layer of the Nebula renderer.

This crate connects CPU-side scene data to GPU shader inputs while the GPU
runs up to `FRAMES_IN_FLIGHT` frames behind. It is backend-agnostic: a
backend (Vulkan, or a root-argument style API) implements the `Renderer`,
`Buffer`, `Texture`, `Pipeline` and `DescriptorRebinder` traits.

## Architecture

- **IndexAllocator**: reusable indices into fixed-size bindless arrays
- **GrowableGpuArray**: per-frame storage buffers growing and shrinking in steps
- **CpuWriteResourceManager**: CPU-written per-object data in growable arrays
- **LightArray**: per-light-type records with per-frame dirty sets
- **LightingResourceManager**: light arrays plus the general lighting block
- **DescriptorRebinder**: backend strategy re-pointing pipeline bindings

Every operation that replaces buffers runs under a `RenderPause`: the
render-wide resources lock is taken and the GPU is drained first.
*/

// Internal modules
mod error;
mod engine;
mod config;
pub mod log;
pub mod renderer;
pub mod shader_data;
pub mod utils;
pub mod shader_array;
pub mod gpu_array;
pub mod lighting;

#[cfg(test)]
mod test_logger;

// Main nebula namespace module
pub mod nebula {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine singleton (logging)
    pub use crate::engine::Engine;

    // Configuration
    pub use crate::config::{
        shader_resource_names, ArrayGrowthPolicy, ResourcesConfig, FRAMES_IN_FLIGHT,
    };

    // Logging sub-module (types only, macros are exported at the crate root)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
    }

    // Render sub-module with the backend contracts
    pub mod render {
        pub use crate::renderer::*;
    }

    pub mod shader_data {
        pub use crate::shader_data::{ShaderDataSource, UpdateCallbacks};
    }

    pub mod shader_array {
        pub use crate::shader_array::*;
    }

    pub mod gpu_array {
        pub use crate::gpu_array::*;
    }

    pub mod lighting {
        pub use crate::lighting::*;
    }
}

// Re-export math library at crate root
pub use glam;
