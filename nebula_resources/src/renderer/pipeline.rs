/// Pipeline trait and the registry of live pipelines

use std::any::Any;
use std::sync::Arc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use crate::renderer::BackendKind;

/// Pipeline category, used to group live pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineType {
    /// Opaque geometry
    Opaque,
    /// Alpha-blended geometry
    Transparent,
    /// Shadow map rendering
    Shadow,
    /// Full-screen post-processing
    PostProcess,
}

impl PipelineType {
    pub const ALL: [PipelineType; 4] = [
        PipelineType::Opaque,
        PipelineType::Transparent,
        PipelineType::Shadow,
        PipelineType::PostProcess,
    ];
}

/// Opaque pipeline interface
///
/// Pipelines are created and destroyed by the renderer. The resource layer
/// only resolves binding indices by shader resource name and asks the
/// backend rebinder to write descriptors.
pub trait Pipeline: Send + Sync {
    /// Stable identifier for diagnostics
    fn identifier(&self) -> &str;

    /// Backend that created this pipeline
    fn backend_kind(&self) -> BackendKind;

    /// Category the pipeline is grouped under
    fn pipeline_type(&self) -> PipelineType;

    /// Binding index of a shader resource, `None` if the layout does not declare it
    fn shader_resource_binding(&self, resource_name: &str) -> Option<u32>;

    /// Backend downcast hook
    fn as_any(&self) -> &dyn Any;
}

/// Live graphics pipelines grouped by type
pub struct PipelineRegistry {
    pipelines: RwLock<FxHashMap<PipelineType, Vec<Arc<dyn Pipeline>>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self {
            pipelines: RwLock::new(FxHashMap::default()),
        }
    }

    /// Register a pipeline under its type
    pub fn register(&self, pipeline: Arc<dyn Pipeline>) {
        self.pipelines
            .write()
            .entry(pipeline.pipeline_type())
            .or_default()
            .push(pipeline);
    }

    /// Remove a pipeline by identifier; returns whether one was removed
    pub fn unregister(&self, identifier: &str) -> bool {
        let mut pipelines = self.pipelines.write();
        let mut removed = false;
        for group in pipelines.values_mut() {
            let before = group.len();
            group.retain(|p| p.identifier() != identifier);
            removed |= group.len() != before;
        }
        removed
    }

    /// Pipelines of one type
    pub fn of_type(&self, pipeline_type: PipelineType) -> Vec<Arc<dyn Pipeline>> {
        self.pipelines
            .read()
            .get(&pipeline_type)
            .cloned()
            .unwrap_or_default()
    }

    /// All live pipelines, ordered by type
    pub fn all(&self) -> Vec<Arc<dyn Pipeline>> {
        let pipelines = self.pipelines.read();
        PipelineType::ALL
            .iter()
            .filter_map(|t| pipelines.get(t))
            .flatten()
            .cloned()
            .collect()
    }

    /// All pipelines whose layout declares `resource_name`
    pub fn declaring(&self, resource_name: &str) -> Vec<Arc<dyn Pipeline>> {
        self.all()
            .into_iter()
            .filter(|p| p.shader_resource_binding(resource_name).is_some())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pipelines.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
