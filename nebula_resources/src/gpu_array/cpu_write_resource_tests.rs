//! Unit tests for CpuWriteResourceManager

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use serial_test::serial;

use crate::config::{ArrayGrowthPolicy, FRAMES_IN_FLIGHT};
use crate::error::Error;
use crate::gpu_array::{CpuWriteResourceManager, CpuWriteShaderResource};
use crate::renderer::mock_renderer::{buffer_ids, mock_buffer, MockPipeline, MockRenderer};
use crate::shader_data::UpdateCallbacks;
use crate::test_logger::LogCapture;

const ELEMENT_SIZE: u64 = 8;

/// Source reading shared bytes and counting finished copies
struct TestSource {
    data: Arc<Mutex<Vec<u8>>>,
    finished: Arc<AtomicUsize>,
}

impl TestSource {
    fn new(value: u8) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![value; ELEMENT_SIZE as usize])),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn callbacks(&self) -> Box<UpdateCallbacks> {
        let data = self.data.clone();
        let finished = self.finished.clone();
        Box::new(UpdateCallbacks::new(
            move || data.lock().clone(),
            move || {
                finished.fetch_add(1, Ordering::SeqCst);
            },
        ))
    }
}

fn step_four_policy() -> ArrayGrowthPolicy {
    ArrayGrowthPolicy {
        budget_bytes: 1280,
        min_step: 2,
        max_step: 2,
        frame_multiplier: 2,
    }
}

fn setup() -> (Arc<MockRenderer>, CpuWriteResourceManager) {
    let renderer = MockRenderer::new();
    let manager = CpuWriteResourceManager::new(renderer.clone(), step_four_policy()).unwrap();
    (renderer, manager)
}

fn read_element(manager: &CpuWriteResourceManager, frame: usize, index: u32) -> Vec<u8> {
    let array = manager.arrays().array("objectData").unwrap();
    let buffer = array.buffer(frame).unwrap();
    mock_buffer(&buffer).read(index as u64 * ELEMENT_SIZE, ELEMENT_SIZE)
}

#[test]
fn test_new_resource_needs_every_frame() {
    let (_renderer, manager) = setup();
    let source = TestSource::new(1);

    let resource = manager.create("objectData", ELEMENT_SIZE, source.callbacks()).unwrap();

    assert_eq!(resource.frames_left_to_update(), FRAMES_IN_FLIGHT);
    assert_eq!(resource.resource_name(), "objectData");
    assert_eq!(resource.element_size(), ELEMENT_SIZE);
    assert_eq!(manager.resource_count(), 1);
}

#[test]
fn test_update_counts_down_one_frame_per_pass() {
    let (_renderer, manager) = setup();
    let source = TestSource::new(3);
    let resource = manager.create("objectData", ELEMENT_SIZE, source.callbacks()).unwrap();

    manager.update_resources(0).unwrap();
    assert_eq!(resource.frames_left_to_update(), FRAMES_IN_FLIGHT - 1);
    assert_eq!(read_element(&manager, 0, 0), vec![3u8; 8]);
    assert_eq!(read_element(&manager, 1, 0), vec![0u8; 8]);

    manager.update_resources(1).unwrap();
    assert_eq!(resource.frames_left_to_update(), 0);
    assert_eq!(read_element(&manager, 1, 0), vec![3u8; 8]);

    // Clean resources are not copied again
    manager.update_resources(0).unwrap();
    assert_eq!(source.finished.load(Ordering::SeqCst), FRAMES_IN_FLIGHT);
}

#[test]
fn test_mark_as_needs_update_rewrites_all_frames() {
    let (_renderer, manager) = setup();
    let source = TestSource::new(1);
    let resource = manager.create("objectData", ELEMENT_SIZE, source.callbacks()).unwrap();
    for frame in 0..FRAMES_IN_FLIGHT {
        manager.update_resources(frame).unwrap();
    }

    *source.data.lock() = vec![9u8; 8];
    resource.mark_as_needs_update();
    assert_eq!(resource.frames_left_to_update(), FRAMES_IN_FLIGHT);
    for frame in 0..FRAMES_IN_FLIGHT {
        manager.update_resources(frame).unwrap();
    }

    for frame in 0..FRAMES_IN_FLIGHT {
        assert_eq!(read_element(&manager, frame, 0), vec![9u8; 8]);
    }
}

#[test]
fn test_mark_during_copy_keeps_copied_frame_pending() {
    let (_renderer, manager) = setup();
    let data = Arc::new(Mutex::new(vec![1u8; 8]));
    let handle: Arc<Mutex<Option<Arc<CpuWriteShaderResource>>>> = Arc::new(Mutex::new(None));
    let finishes = Arc::new(AtomicUsize::new(0));

    let start_data = data.clone();
    let finish_data = data.clone();
    let finish_handle = handle.clone();
    let finish_count = finishes.clone();
    let callbacks = UpdateCallbacks::new(
        move || start_data.lock().clone(),
        move || {
            // The owner changes its data right after the first snapshot
            if finish_count.fetch_add(1, Ordering::SeqCst) == 0 {
                *finish_data.lock() = vec![9u8; 8];
                if let Some(resource) = finish_handle.lock().as_ref() {
                    resource.mark_as_needs_update();
                }
            }
        },
    );
    let resource = Arc::new(manager.create("objectData", ELEMENT_SIZE, Box::new(callbacks)).unwrap());
    *handle.lock() = Some(resource.clone());

    manager.update_resources(0).unwrap();
    assert_eq!(resource.frames_left_to_update(), FRAMES_IN_FLIGHT);

    for _ in 0..2 {
        for frame in 0..FRAMES_IN_FLIGHT {
            manager.update_resources(frame).unwrap();
        }
    }

    assert_eq!(resource.frames_left_to_update(), 0);
    let index = resource.index().unwrap();
    for frame in 0..FRAMES_IN_FLIGHT {
        assert_eq!(read_element(&manager, frame, index), vec![9u8; 8]);
    }
    let resource_handle = handle.lock().take();
    drop(resource_handle);
}

#[test]
fn test_relocation_marks_resource_dirty() {
    let (_renderer, manager) = setup();
    let sources: Vec<TestSource> = (0..5).map(|i| TestSource::new(i as u8 + 1)).collect();
    let mut resources: Vec<_> = sources
        .iter()
        .map(|p| manager.create("objectData", ELEMENT_SIZE, p.callbacks()).unwrap())
        .collect();
    for frame in 0..FRAMES_IN_FLIGHT {
        manager.update_resources(frame).unwrap();
    }
    assert!(resources.iter().all(|r| r.frames_left_to_update() == 0));

    // Capacity 8, step 4: dropping three of five shrinks to 4 and repacks
    resources.drain(0..3);
    let array = manager.arrays().array("objectData").unwrap();
    assert_eq!(array.capacity(), 4);
    assert!(resources.iter().all(|r| r.frames_left_to_update() == FRAMES_IN_FLIGHT));

    for frame in 0..FRAMES_IN_FLIGHT {
        manager.update_resources(frame).unwrap();
    }
    for (resource, value) in resources.iter().zip([4u8, 5]) {
        let index = resource.index().unwrap();
        for frame in 0..FRAMES_IN_FLIGHT {
            assert_eq!(read_element(&manager, frame, index), vec![value; 8]);
        }
    }
}

#[test]
#[serial]
fn test_failing_source_still_finishes_and_others_update() {
    let (_renderer, manager) = setup();
    let bad_finished = Arc::new(AtomicUsize::new(0));
    let counter = bad_finished.clone();
    let bad = manager
        .create(
            "objectData",
            ELEMENT_SIZE,
            Box::new(UpdateCallbacks::new(
                || vec![0u8; 3],
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )),
        )
        .unwrap();
    let source = TestSource::new(6);
    let good = manager.create("objectData", ELEMENT_SIZE, source.callbacks()).unwrap();
    let capture = LogCapture::install();

    let result = manager.update_resources(0);

    assert!(matches!(result, Err(Error::InvalidResource(_))));
    assert_eq!(capture.errors().len(), 1);
    assert_eq!(bad_finished.load(Ordering::SeqCst), 1);
    assert_eq!(bad.frames_left_to_update(), FRAMES_IN_FLIGHT);
    assert_eq!(good.frames_left_to_update(), FRAMES_IN_FLIGHT - 1);
    assert_eq!(read_element(&manager, 0, good.index().unwrap()), vec![6u8; 8]);
}

#[test]
fn test_dropped_resources_leave_the_manager() {
    let (_renderer, manager) = setup();
    let source = TestSource::new(1);
    let a = manager.create("objectData", ELEMENT_SIZE, source.callbacks()).unwrap();
    let b = manager.create("objectData", ELEMENT_SIZE, source.callbacks()).unwrap();

    drop(a);
    assert_eq!(manager.resource_count(), 1);
    manager.update_resources(0).unwrap();
    assert_eq!(b.index().unwrap(), 1);

    drop(b);
    assert_eq!(manager.resource_count(), 0);
    manager.arrays().prune_empty_arrays();
    assert_eq!(manager.arrays().array_count(), 0);
}

#[test]
fn test_rebind_after_pipeline_recreation() {
    let (renderer, manager) = setup();
    let source = TestSource::new(1);
    let _resource = manager.create("objectData", ELEMENT_SIZE, source.callbacks()).unwrap();
    let pipeline = renderer.add_pipeline(MockPipeline::new("forward", &["objectData"]));
    let array = manager.arrays().array("objectData").unwrap();

    manager.update_descriptors_for_pipeline_resource(pipeline.as_ref()).unwrap();
    assert_eq!(
        renderer.bound_buffer_ids("forward", "objectData"),
        Some(buffer_ids(&array.buffers()))
    );

    renderer.clear_writes();
    manager.bind_descriptors_to_recreated_pipeline_resources().unwrap();
    assert_eq!(renderer.writes().len(), 1);
}
