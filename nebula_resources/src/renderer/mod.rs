/// Renderer module - backend contracts used by the resource layer

// Module declarations
pub mod renderer;
pub mod buffer;
pub mod texture;
pub mod pipeline;
pub mod rebinder;
pub mod render_pause;

#[cfg(test)]
pub(crate) mod mock_renderer;

// Re-export everything from renderer.rs
pub use renderer::*;

// Re-export from other modules
pub use buffer::{Buffer, BufferDesc, BufferUsage};
pub use texture::*;
pub use pipeline::*;
pub use rebinder::*;
pub use render_pause::*;

pub(crate) use buffer::create_frame_buffers;
