/// Resource layer configuration
///
/// Compile-time frame count, growth policy for GPU arrays and the
/// shader-visible resource names the lighting layer binds under.

use glam::Vec3;
use crate::error::{Error, Result};

/// Number of frames the CPU may prepare while the GPU still processes earlier ones.
///
/// Every CPU-writable GPU buffer in this crate exists once per frame in flight.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Shader resource names declared by lighting shaders
pub mod shader_resource_names {
    /// Uniform block with ambient light and per-type light counts
    pub const GENERAL_LIGHTING_DATA: &str = "generalLightingData";
    pub const POINT_LIGHTS: &str = "pointLights";
    pub const DIRECTIONAL_LIGHTS: &str = "directionalLights";
    pub const SPOTLIGHTS: &str = "spotlights";
    /// `[count, indices...]` of point lights intersecting the camera frustum
    pub const POINT_LIGHTS_IN_FRUSTUM_INDICES: &str = "pointLightsInFrustumIndices";
    /// `[count, indices...]` of spotlights intersecting the camera frustum
    pub const SPOTLIGHTS_IN_FRUSTUM_INDICES: &str = "spotlightsInFrustumIndices";
}

// ============================================================================
// ArrayGrowthPolicy
// ============================================================================

/// Capacity step policy of a `GrowableGpuArray`
///
/// Small elements get large steps, large elements get small steps:
/// `budget_bytes / element_size`, clamped to `[min_step, max_step]`,
/// rounded up to an even count, then multiplied by `frame_multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayGrowthPolicy {
    /// Bytes one resize step aims to add per frame buffer
    pub budget_bytes: u64,
    /// Smallest step (elements), before frame multiplication
    pub min_step: u32,
    /// Largest step (elements), before frame multiplication
    pub max_step: u32,
    /// Multiplier in `[1, FRAMES_IN_FLIGHT]`
    pub frame_multiplier: u32,
}

impl Default for ArrayGrowthPolicy {
    fn default() -> Self {
        Self {
            budget_bytes: 1280,
            min_step: 2,
            max_step: 40,
            frame_multiplier: FRAMES_IN_FLIGHT as u32,
        }
    }
}

impl ArrayGrowthPolicy {
    /// Check that the policy produces even, non-zero steps
    pub fn validate(&self) -> Result<()> {
        if self.budget_bytes == 0 {
            return Err(Error::InitializationFailed(
                "growth policy budget_bytes must be > 0".to_string(),
            ));
        }
        if self.min_step == 0 || self.min_step > self.max_step {
            return Err(Error::InitializationFailed(format!(
                "growth policy step range [{}, {}] is invalid",
                self.min_step, self.max_step
            )));
        }
        if self.frame_multiplier == 0 || self.frame_multiplier as usize > FRAMES_IN_FLIGHT {
            return Err(Error::InitializationFailed(format!(
                "growth policy frame_multiplier {} is outside [1, {}]",
                self.frame_multiplier, FRAMES_IN_FLIGHT
            )));
        }
        Ok(())
    }

    /// Capacity step (elements) for an element of `element_size` bytes
    ///
    /// Always even and > 0 for a validated policy.
    pub fn step_size(&self, element_size: u64) -> u32 {
        let raw = self.budget_bytes / element_size.max(1);
        let clamped = raw.clamp(self.min_step as u64, self.max_step as u64) as u32;
        let even = clamped + clamped % 2;
        even * self.frame_multiplier
    }
}

// ============================================================================
// ResourcesConfig
// ============================================================================

/// Configuration of the resource managers
#[derive(Debug, Clone)]
pub struct ResourcesConfig {
    /// Step policy for every growable GPU array
    pub growth_policy: ArrayGrowthPolicy,
    /// Declared element count of bindless texture arrays
    pub bindless_texture_array_size: u32,
    /// Create "lights in frustum" index buffers for point lights and spotlights
    pub light_frustum_culling: bool,
    /// Initial ambient light color
    pub ambient_light: Vec3,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            growth_policy: ArrayGrowthPolicy::default(),
            bindless_texture_array_size: 4096,
            light_frustum_culling: true,
            ambient_light: Vec3::splat(0.05),
        }
    }
}

impl ResourcesConfig {
    pub fn validate(&self) -> Result<()> {
        self.growth_policy.validate()?;
        if self.bindless_texture_array_size == 0 {
            return Err(Error::InitializationFailed(
                "bindless_texture_array_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
