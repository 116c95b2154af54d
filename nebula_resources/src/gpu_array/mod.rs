/// GPU array module - growable storage arrays and CPU-written shader resources

pub mod growable_gpu_array;
pub mod array_slot;
pub mod gpu_array_manager;
pub mod cpu_write_resource;

pub use growable_gpu_array::{ArraySlotKey, GrowableGpuArray, SlotOwner};
pub use array_slot::ArraySlotHandle;
pub use gpu_array_manager::GpuArrayManager;
pub use cpu_write_resource::{CpuWriteResourceManager, CpuWriteShaderResource};
