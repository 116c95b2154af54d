/// Mock Renderer for unit tests (no GPU required)
///
/// Buffers are plain byte vectors, `wait_idle` only counts calls and the
/// rebinder records every descriptor write so tests can check which buffer
/// a pipeline binding points at.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::engine_bail;
use crate::error::Result;
use crate::renderer::{
    BackendKind, BindingType, Buffer, BufferDesc, BufferUsage, DescriptorRebinder, Pipeline,
    PipelineRegistry, PipelineType, RenderResourcesLock, Renderer, RootArgumentRebinder, Texture,
    downcast_backend,
};

static NEXT_MOCK_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Mock Buffer
// ============================================================================

#[derive(Debug)]
pub struct MockBuffer {
    pub id: u64,
    pub usage: BufferUsage,
    data: Mutex<Vec<u8>>,
}

impl MockBuffer {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            id: next_id(),
            usage,
            data: Mutex::new(vec![0; size as usize]),
        }
    }

    pub fn read(&self, offset: u64, len: u64) -> Vec<u8> {
        let data = self.data.lock();
        data[offset as usize..(offset + len) as usize].to_vec()
    }

    pub fn read_u32s(&self) -> Vec<u32> {
        self.data
            .lock()
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

impl Buffer for MockBuffer {
    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn update(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let end = offset as usize + bytes.len();
        if end > data.len() {
            engine_bail!(
                "nebula::MockBuffer",
                "write of {} bytes at offset {} overflows buffer of {} bytes",
                bytes.len(),
                offset,
                data.len()
            );
        }
        data[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcast a buffer created by `MockRenderer`
pub fn mock_buffer(buffer: &Arc<dyn Buffer>) -> &MockBuffer {
    buffer.as_any().downcast_ref::<MockBuffer>().expect("not a MockBuffer")
}

// ============================================================================
// Mock Texture
// ============================================================================

#[derive(Debug)]
pub struct MockTexture {
    pub id: u64,
    pub name: String,
}

impl MockTexture {
    pub fn new(name: &str) -> Self {
        Self { id: next_id(), name: name.to_string() }
    }
}

impl Texture for MockTexture {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock Pipeline
// ============================================================================

#[derive(Debug)]
pub struct MockPipeline {
    pub identifier: String,
    pub pipeline_type: PipelineType,
    bindings: FxHashMap<String, u32>,
}

impl MockPipeline {
    /// Pipeline declaring `resources` at bindings 0, 1, 2...
    pub fn new(identifier: &str, resources: &[&str]) -> Self {
        Self::with_type(identifier, PipelineType::Opaque, resources)
    }

    pub fn with_type(identifier: &str, pipeline_type: PipelineType, resources: &[&str]) -> Self {
        Self {
            identifier: identifier.to_string(),
            pipeline_type,
            bindings: resources
                .iter()
                .enumerate()
                .map(|(i, name)| (name.to_string(), i as u32))
                .collect(),
        }
    }
}

impl Pipeline for MockPipeline {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::DescriptorTable
    }

    fn pipeline_type(&self) -> PipelineType {
        self.pipeline_type
    }

    fn shader_resource_binding(&self, resource_name: &str) -> Option<u32> {
        self.bindings.get(resource_name).copied()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Recording rebinder
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedWrite {
    Buffers {
        pipeline: String,
        resource_name: String,
        binding: u32,
        buffer_ids: Vec<u64>,
        binding_type: BindingType,
    },
    Texture {
        pipeline: String,
        resource_name: String,
        array_element: u32,
        texture_id: u64,
    },
}

#[derive(Default)]
pub struct MockRebinder {
    writes: Mutex<Vec<RecordedWrite>>,
    fail: AtomicBool,
}

impl DescriptorRebinder for MockRebinder {
    fn bind_buffers(
        &self,
        pipeline: &dyn Pipeline,
        resource_name: &str,
        buffers: &[Arc<dyn Buffer>],
        binding_type: BindingType,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            engine_bail!("nebula::MockRebinder", "descriptor write failure requested");
        }
        let Some(binding) = pipeline.shader_resource_binding(resource_name) else {
            engine_bail!("nebula::MockRebinder", "binding '{}' not found", resource_name);
        };
        let buffer_ids = buffers
            .iter()
            .map(|b| downcast_backend::<MockBuffer>(b.as_any(), "MockBuffer").map(|m| m.id))
            .collect::<Result<Vec<_>>>()?;
        self.writes.lock().push(RecordedWrite::Buffers {
            pipeline: pipeline.identifier().to_string(),
            resource_name: resource_name.to_string(),
            binding,
            buffer_ids,
            binding_type,
        });
        Ok(())
    }

    fn bind_texture(
        &self,
        pipeline: &dyn Pipeline,
        resource_name: &str,
        array_element: u32,
        texture: &dyn Texture,
    ) -> Result<()> {
        let texture = downcast_backend::<MockTexture>(texture.as_any(), "MockTexture")?;
        self.writes.lock().push(RecordedWrite::Texture {
            pipeline: pipeline.identifier().to_string(),
            resource_name: resource_name.to_string(),
            array_element,
            texture_id: texture.id,
        });
        Ok(())
    }
}

// ============================================================================
// Mock Renderer
// ============================================================================

pub struct MockRenderer {
    backend_kind: BackendKind,
    lock: RenderResourcesLock,
    registry: PipelineRegistry,
    rebinder: MockRebinder,
    root_rebinder: RootArgumentRebinder,
    wait_idle_count: AtomicUsize,
    buffers_created: AtomicUsize,
    fail_buffer_creation: AtomicBool,
}

impl MockRenderer {
    pub fn new() -> Arc<Self> {
        Self::with_backend(BackendKind::DescriptorTable)
    }

    pub fn with_backend(backend_kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            backend_kind,
            lock: RenderResourcesLock::new(()),
            registry: PipelineRegistry::new(),
            rebinder: MockRebinder::default(),
            root_rebinder: RootArgumentRebinder,
            wait_idle_count: AtomicUsize::new(0),
            buffers_created: AtomicUsize::new(0),
            fail_buffer_creation: AtomicBool::new(false),
        })
    }

    pub fn add_pipeline(&self, pipeline: MockPipeline) -> Arc<dyn Pipeline> {
        let pipeline: Arc<dyn Pipeline> = Arc::new(pipeline);
        self.registry.register(pipeline.clone());
        pipeline
    }

    pub fn wait_idle_count(&self) -> usize {
        self.wait_idle_count.load(Ordering::SeqCst)
    }

    pub fn buffers_created(&self) -> usize {
        self.buffers_created.load(Ordering::SeqCst)
    }

    pub fn set_fail_buffer_creation(&self, fail: bool) {
        self.fail_buffer_creation.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_descriptor_writes(&self, fail: bool) {
        self.rebinder.fail.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.rebinder.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.rebinder.writes.lock().clear();
    }

    /// Buffer ids most recently bound to `resource_name` in `pipeline`
    pub fn bound_buffer_ids(&self, pipeline: &str, resource_name: &str) -> Option<Vec<u64>> {
        self.writes().into_iter().rev().find_map(|w| match w {
            RecordedWrite::Buffers { pipeline: p, resource_name: r, buffer_ids, .. }
                if p == pipeline && r == resource_name =>
            {
                Some(buffer_ids)
            }
            _ => None,
        })
    }
}

impl Renderer for MockRenderer {
    fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    fn create_buffer(&self, desc: BufferDesc) -> Result<Arc<dyn Buffer>> {
        if self.fail_buffer_creation.load(Ordering::SeqCst) {
            return Err(crate::error::Error::OutOfMemory);
        }
        self.buffers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockBuffer::new(desc.size, desc.usage)))
    }

    fn render_resources_lock(&self) -> &RenderResourcesLock {
        &self.lock
    }

    fn wait_idle(&self) -> Result<()> {
        self.wait_idle_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pipelines(&self) -> &PipelineRegistry {
        &self.registry
    }

    fn descriptor_rebinder(&self) -> &dyn DescriptorRebinder {
        match self.backend_kind {
            BackendKind::DescriptorTable => &self.rebinder,
            BackendKind::RootArgument => &self.root_rebinder,
        }
    }
}

/// Ids of per-frame buffers
pub fn buffer_ids(buffers: &[Arc<dyn Buffer>]) -> Vec<u64> {
    buffers.iter().map(|b| mock_buffer(b).id).collect()
}

#[cfg(test)]
#[path = "mock_renderer_tests.rs"]
mod tests;
