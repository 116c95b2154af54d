/// Lighting resource manager
///
/// Owns one light array per light type and the general lighting uniform
/// block. Light arrays report their size changes to the general block, which
/// uploads the new counts to every frame at once.

use std::sync::Arc;
use glam::Vec3;

use crate::config::ResourcesConfig;
use crate::error::Result;
use crate::lighting::{
    BoundingSphere, Frustum, GeneralLighting, GeneralLightingBlock, LightArray, LightArraySlot,
    LightSourceType, NodeId, SizeChangedHandler,
};
use crate::renderer::{Buffer, Pipeline, Renderer};
use crate::shader_data::ShaderDataSource;
use crate::{engine_error, engine_info};

const LOG_SOURCE: &str = "nebula::LightingResourceManager";

pub struct LightingResourceManager {
    // Light arrays drop before the general block they report to
    point_lights: Arc<LightArray>,
    directional_lights: Arc<LightArray>,
    spotlights: Arc<LightArray>,
    general: Arc<GeneralLighting>,
}

impl LightingResourceManager {
    /// Create the general lighting buffers and the three light arrays
    pub fn new(renderer: Arc<dyn Renderer>, config: &ResourcesConfig) -> Result<Self> {
        config.validate()?;
        let general = GeneralLighting::new(renderer.clone(), config.ambient_light)
            .map_err(|e| e.context("create general lighting"))?;

        let create_array = |kind: LightSourceType| -> Result<Arc<LightArray>> {
            let frustum_name = if config.light_frustum_culling {
                kind.frustum_resource_name()
            } else {
                None
            };
            let report_to = Arc::downgrade(&general);
            let on_size_changed: SizeChangedHandler = Box::new(move |size| {
                match report_to.upgrade() {
                    Some(general) => general.set_light_count(kind, size),
                    None => Ok(()),
                }
            });
            LightArray::new(
                renderer.clone(),
                kind.resource_name(),
                frustum_name,
                Some(on_size_changed),
            )
            .map_err(|e| e.context(format!("create {:?} light array", kind)))
        };

        let manager = Self {
            point_lights: create_array(LightSourceType::Point)?,
            directional_lights: create_array(LightSourceType::Directional)?,
            spotlights: create_array(LightSourceType::Spot)?,
            general,
        };
        engine_info!(
            LOG_SOURCE,
            "Lighting resources created (frustum culling: {})",
            config.light_frustum_culling
        );
        Ok(manager)
    }

    pub fn light_array(&self, kind: LightSourceType) -> &Arc<LightArray> {
        match kind {
            LightSourceType::Point => &self.point_lights,
            LightSourceType::Directional => &self.directional_lights,
            LightSourceType::Spot => &self.spotlights,
        }
    }

    fn light_arrays(&self) -> [&Arc<LightArray>; 3] {
        [&self.point_lights, &self.directional_lights, &self.spotlights]
    }

    /// Add a light of type `kind` owned by `owner_node`
    pub fn reserve_light_slot(
        &self,
        kind: LightSourceType,
        owner_node: NodeId,
        data_size: u64,
        source: Box<dyn ShaderDataSource>,
    ) -> Result<LightArraySlot> {
        self.light_array(kind).reserve_new_slot(owner_node, data_size, source)
    }

    /// Flush the dirty lights of `frame_index`, then upload the general block
    ///
    /// Every light array is flushed even when one fails; the first error is
    /// returned.
    pub fn update_resources(&self, frame_index: usize) -> Result<()> {
        let mut first_error = None;
        for array in self.light_arrays() {
            if let Err(e) = array.update_slots_marked_as_needs_update(frame_index) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.general.update(frame_index) {
            engine_error!(LOG_SOURCE, "General lighting upload failed: {}", e);
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Recompute the "lights in frustum" indices of point lights and spotlights
    ///
    /// `bounds` gives the area of influence of a light owner; lights without
    /// bounds count as visible.
    pub fn update_lights_in_frustum(
        &self,
        frame_index: usize,
        frustum: &Frustum,
        bounds: &dyn Fn(NodeId) -> Option<BoundingSphere>,
    ) -> Result<()> {
        let mut is_visible = |node: NodeId| match bounds(node) {
            Some(sphere) => frustum.intersects_sphere(&sphere),
            None => true,
        };
        for array in self.light_arrays() {
            if array.frustum_resource_name().is_some() {
                array.update_lights_in_frustum(frame_index, &mut is_visible)?;
            }
        }
        Ok(())
    }

    /// New ambient color, uploaded by the next `update_resources` of each frame
    pub fn set_ambient_light(&self, color: Vec3) {
        self.general.set_ambient_light(color);
    }

    pub fn general_lighting_block(&self) -> GeneralLightingBlock {
        self.general.block()
    }

    pub fn general_lighting_buffer(&self, frame_index: usize) -> Result<Arc<dyn Buffer>> {
        self.general.buffer(frame_index)
    }

    /// Rebind every lighting resource after the renderer recreated all
    /// pipeline descriptor sets
    pub fn bind_descriptors_to_recreated_pipeline_resources(&self) -> Result<()> {
        self.general.rebind_all_pipelines()?;
        for array in self.light_arrays() {
            array.update_bindings_in_all_pipelines()?;
        }
        Ok(())
    }

    /// Rebind every lighting resource declared by one recreated pipeline
    pub fn update_descriptors_for_pipeline_resource(&self, pipeline: &dyn Pipeline) -> Result<()> {
        self.general.rebind_pipeline(pipeline)?;
        for array in self.light_arrays() {
            array.update_pipeline_binding(pipeline)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "lighting_resource_manager_tests.rs"]
mod tests;
