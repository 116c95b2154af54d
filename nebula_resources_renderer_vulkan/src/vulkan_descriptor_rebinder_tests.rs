use ash::vk;
use nebula_resources::nebula::render::{BindingType, BufferUsage};

use crate::vulkan_buffer::{buffer_usage_to_vk, write_fits};
use crate::vulkan_descriptor_rebinder::{binding_type_to_vk, is_image_descriptor};

#[test]
fn test_binding_type_to_vk() {
    assert_eq!(binding_type_to_vk(BindingType::UniformBuffer), vk::DescriptorType::UNIFORM_BUFFER);
    assert_eq!(binding_type_to_vk(BindingType::StorageBuffer), vk::DescriptorType::STORAGE_BUFFER);
}

#[test]
fn test_buffer_usage_matches_binding_type() {
    assert_eq!(buffer_usage_to_vk(BufferUsage::Uniform), vk::BufferUsageFlags::UNIFORM_BUFFER);
    assert_eq!(buffer_usage_to_vk(BufferUsage::Storage), vk::BufferUsageFlags::STORAGE_BUFFER);
}

#[test]
fn test_image_descriptors() {
    assert!(is_image_descriptor(vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
    assert!(is_image_descriptor(vk::DescriptorType::SAMPLED_IMAGE));
    assert!(!is_image_descriptor(vk::DescriptorType::STORAGE_BUFFER));
    assert!(!is_image_descriptor(vk::DescriptorType::SAMPLER));
}

#[test]
fn test_write_bounds() {
    assert!(write_fits(64, 0, 64));
    assert!(write_fits(64, 48, 16));
    assert!(write_fits(64, 64, 0));
    assert!(!write_fits(64, 49, 16));
    assert!(!write_fits(64, u64::MAX, 1));
}
