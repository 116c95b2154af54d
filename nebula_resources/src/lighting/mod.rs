/// Lighting module - light arrays, general lighting block and their manager

pub mod light_array;
pub mod general_lighting;
pub mod frustum;
pub mod lighting_resource_manager;

pub use light_array::{LightArray, LightArraySlot, LightSlotKey, NodeId, SizeChangedHandler};
pub use general_lighting::{GeneralLighting, GeneralLightingBlock, LightSourceType};
pub use frustum::{BoundingSphere, Frustum};
pub use lighting_resource_manager::LightingResourceManager;
