//! Builds and maintains Vulkan ray tracing acceleration structures.
//!
//! Scenes are described as objects, each a batch of triangle meshes placed in the world by any number of
//! transforms. The [`AccelerationStructureManager`] turns them into one bottom level acceleration structure per
//! object and a top level structure instancing all of them, recorded into a command buffer the application
//! already started. All builds of one call share a single scratch buffer.
//!
//! Structures use the `VK_NV_ray_tracing` device extension. Its entry points are loaded once per device into a
//! [`RayTracingExtension`], which is passed to everything that records ray tracing commands.
//!
//! ```
//! use vk_accel::prelude::*;
//!
//! // Settings shared by all builds of a manager
//! let settings = SettingsBuilder::new()
//!     .allow_update(true)
//!     .top_level_flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD)
//!     .build();
//! assert_eq!(settings.instance_mask, 0xFF);
//! ```
//!
//! With a device that has the extension enabled, setting up a manager looks like
//! ```no_run
//! # use anyhow::Result;
//! use vk_accel::prelude::*;
//!
//! # fn setup(device: Device) -> Result<()> {
//! let fns = RayTracingExtension::load(&device)?;
//! let allocator = DefaultAllocator::new(device.clone())?;
//! let manager = AccelerationStructureManager::new(fns, allocator, AccelerationStructureSettings::default());
//! # Ok(())
//! # }
//! ```
//!
//! Memory is never released implicitly. Call `destroy` on the manager, and on every structure or
//! [`StorageImage`] created outside of it, before the device is destroyed.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

pub mod prelude;
pub use crate::prelude::*;

pub mod allocator;
pub mod command_buffer;
pub mod core;
pub mod resource;
pub mod util;

pub use glam;
