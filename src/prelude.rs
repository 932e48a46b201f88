pub use ash::vk;
pub use glam::{Mat4, Vec3};

pub use crate::core::device::{Device, ExtensionID};
pub use crate::core::error::Error;
pub use crate::core::extension::{ProcAddrResolver, RayTracingExtension, RayTracingFunctions};
pub use crate::core::settings::{AccelerationStructureSettings, SettingsBuilder};

pub use crate::allocator::traits::*;
pub use crate::allocator::default_allocator;
pub use crate::allocator::default_allocator::DefaultAllocator;
pub use crate::allocator::memory_type::MemoryType;

pub use crate::command_buffer::{CommandBuffer, CommandRecorder, PipelineStage};

pub use crate::resource::buffer::Buffer;
pub use crate::resource::raytracing::*;
pub use crate::resource::storage_image::{find_format, FormatSupport, ImageFunctions, StorageImage};

pub use crate::util::transform::TransformMatrix;
