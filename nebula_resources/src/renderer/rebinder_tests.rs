//! Unit tests for the rebinding strategies and fan-out helpers

use std::sync::Arc;
use crate::error::Error;
use crate::renderer::mock_renderer::{buffer_ids, MockPipeline, MockRenderer, MockTexture, RecordedWrite};
use crate::renderer::{
    create_frame_buffers, rebind_buffers_in_all_pipelines, rebind_buffers_in_pipeline,
    rebind_texture_in_all_pipelines, BackendKind, BindingType, BufferDesc, BufferUsage,
    Renderer,
};

// ============================================================================
// FAN-OUT TESTS
// ============================================================================

#[test]
fn test_rebind_buffers_only_touches_declaring_pipelines() {
    let renderer = MockRenderer::new();
    renderer.add_pipeline(MockPipeline::new("lit", &["objectData", "pointLights"]));
    renderer.add_pipeline(MockPipeline::new("unlit", &["objectData"]));
    let buffers = create_frame_buffers(
        renderer.as_ref(),
        &BufferDesc::array(BufferUsage::Storage, 16, 1),
    )
    .unwrap();

    rebind_buffers_in_all_pipelines(renderer.as_ref(), "pointLights", &buffers, BindingType::StorageBuffer)
        .unwrap();

    let writes = renderer.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0],
        RecordedWrite::Buffers {
            pipeline: "lit".to_string(),
            resource_name: "pointLights".to_string(),
            binding: 1,
            buffer_ids: buffer_ids(&buffers),
            binding_type: BindingType::StorageBuffer,
        }
    );
}

#[test]
fn test_rebind_single_pipeline_without_binding_is_noop() {
    let renderer = MockRenderer::new();
    let unlit = renderer.add_pipeline(MockPipeline::new("unlit", &["objectData"]));
    let buffers = create_frame_buffers(
        renderer.as_ref(),
        &BufferDesc::array(BufferUsage::Uniform, 32, 1),
    )
    .unwrap();

    rebind_buffers_in_pipeline(
        renderer.as_ref(),
        unlit.as_ref(),
        "generalLightingData",
        &buffers,
        BindingType::UniformBuffer,
    )
    .unwrap();

    assert!(renderer.writes().is_empty());
}

#[test]
fn test_rebind_failure_carries_pipeline_context() {
    let renderer = MockRenderer::new();
    renderer.add_pipeline(MockPipeline::new("lit", &["pointLights"]));
    renderer.set_fail_descriptor_writes(true);
    let buffers = create_frame_buffers(
        renderer.as_ref(),
        &BufferDesc::array(BufferUsage::Storage, 16, 1),
    )
    .unwrap();

    let err = rebind_buffers_in_all_pipelines(
        renderer.as_ref(),
        "pointLights",
        &buffers,
        BindingType::StorageBuffer,
    )
    .unwrap_err();

    assert!(matches!(err, Error::BackendError(ref m) if m.contains("pipeline 'lit'")));
}

#[test]
fn test_rebind_texture_writes_array_element() {
    let renderer = MockRenderer::new();
    renderer.add_pipeline(MockPipeline::new("sprites", &["textures"]));
    let texture = MockTexture::new("albedo");

    rebind_texture_in_all_pipelines(renderer.as_ref(), "textures", 7, &texture).unwrap();

    assert_eq!(
        renderer.writes(),
        vec![RecordedWrite::Texture {
            pipeline: "sprites".to_string(),
            resource_name: "textures".to_string(),
            array_element: 7,
            texture_id: texture.id,
        }]
    );
}

// ============================================================================
// ROOT ARGUMENT BACKEND TESTS
// ============================================================================

#[test]
fn test_root_argument_rebinder_is_noop() {
    let renderer = MockRenderer::with_backend(BackendKind::RootArgument);
    renderer.add_pipeline(MockPipeline::new("lit", &["pointLights", "textures"]));
    let buffers = create_frame_buffers(
        renderer.as_ref(),
        &BufferDesc::array(BufferUsage::Storage, 16, 1),
    )
    .unwrap();

    rebind_buffers_in_all_pipelines(renderer.as_ref(), "pointLights", &buffers, BindingType::StorageBuffer)
        .unwrap();
    rebind_texture_in_all_pipelines(renderer.as_ref(), "textures", 0, &MockTexture::new("t")).unwrap();

    assert!(renderer.writes().is_empty());
}

#[test]
fn test_create_frame_buffers_one_per_frame() {
    let renderer: Arc<MockRenderer> = MockRenderer::new();
    let buffers = create_frame_buffers(
        renderer.as_ref(),
        &BufferDesc::array(BufferUsage::Storage, 8, 3),
    )
    .unwrap();

    assert_eq!(buffers.len(), crate::config::FRAMES_IN_FLIGHT);
    assert!(buffers.iter().all(|b| b.size() == 24));
    assert_eq!(renderer.pipelines().len(), 0);
}
