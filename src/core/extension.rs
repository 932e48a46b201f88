//! Loads the `VK_NV_ray_tracing` device functions.
//!
//! Instead of storing function pointers in global state, [`RayTracingExtension::load`] returns a capability
//! object that is handed to every acceleration structure operation. The capability is described by the
//! [`RayTracingFunctions`] trait so the structures can be driven by any implementation of it.
//!
//! # Example
//! ```
//! # use vk_accel::prelude::*;
//! # fn load_fns(device: &Device) -> anyhow::Result<()> {
//! let fns = RayTracingExtension::load(device)?;
//! # Ok(())
//! # }
//! ```

use std::ffi::{c_void, CStr, CString};

use anyhow::Result;
use ash::vk;

use crate::core::device::ExtensionID;
use crate::resource::raytracing::build_info::{AccelerationStructureInfo, BuildCommand};
use crate::{Device, Error};

/// Every device function of `VK_NV_ray_tracing`. All of them must resolve for [`RayTracingExtension::load_with`] to succeed.
pub const RAY_TRACING_ENTRY_POINTS: &[&str] = &[
    "vkCreateAccelerationStructureNV",
    "vkDestroyAccelerationStructureNV",
    "vkGetAccelerationStructureMemoryRequirementsNV",
    "vkBindAccelerationStructureMemoryNV",
    "vkCmdBuildAccelerationStructureNV",
    "vkCmdCopyAccelerationStructureNV",
    "vkCmdTraceRaysNV",
    "vkCreateRayTracingPipelinesNV",
    "vkGetRayTracingShaderGroupHandlesNV",
    "vkGetAccelerationStructureHandleNV",
    "vkCmdWriteAccelerationStructuresPropertiesNV",
    "vkCompileDeferredNV",
];

/// Resolves device function pointers by name. Equivalent of `vkGetDeviceProcAddr`.
pub trait ProcAddrResolver {
    /// The device functions are resolved for
    fn device(&self) -> vk::Device;
    /// Look up a device function, returns `None` if the function is not available.
    fn resolve(&self, name: &CStr) -> vk::PFN_vkVoidFunction;
}

/// The acceleration structure operations the bottom and top level structures are built with.
pub trait RayTracingFunctions: Send + Sync {
    /// Create an acceleration structure object. No memory is bound to it yet.
    fn create_acceleration_structure(&self, info: &AccelerationStructureInfo) -> Result<vk::AccelerationStructureNV>;
    /// Destroy an acceleration structure object. The memory bound to it is not freed.
    fn destroy_acceleration_structure(&self, handle: vk::AccelerationStructureNV);
    /// Query the memory requirements of the structure itself, or the scratch memory needed to build or update it.
    fn memory_requirements(
        &self,
        handle: vk::AccelerationStructureNV,
        ty: vk::AccelerationStructureMemoryRequirementsTypeNV,
    ) -> vk::MemoryRequirements;
    /// Bind backing memory to an acceleration structure.
    fn bind_memory(&self, handle: vk::AccelerationStructureNV, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> Result<()>;
    /// Record a build or update command into a command buffer that is in the recording state.
    fn cmd_build_acceleration_structure(&self, cmd: vk::CommandBuffer, build: &BuildCommand);
    /// Query the opaque 64-bit handle instances use to refer to a bottom level structure.
    fn acceleration_structure_handle(&self, handle: vk::AccelerationStructureNV) -> Result<u64>;
}

/// Function pointers for `VK_NV_ray_tracing`, valid for the lifetime of the device they were loaded from.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RayTracingExtension {
    device: vk::Device,
    #[derivative(Debug = "ignore")]
    fp: vk::NvRayTracingFn,
}

impl RayTracingExtension {
    /// Load all ray tracing functions for this device.
    /// # Errors
    /// * Fails if `VK_NV_ray_tracing` was not enabled on the device.
    /// * Fails if any entry point could not be resolved.
    pub fn load(device: &Device) -> Result<Self> {
        device.require_extension(ExtensionID::RayTracing)?;
        Self::load_with(device)
    }

    /// Load all ray tracing functions through a custom resolver. Fails on the first entry point that
    /// cannot be resolved, naming it in the returned [`Error::MissingEntryPoint`].
    pub fn load_with<R: ProcAddrResolver>(resolver: &R) -> Result<Self> {
        for name in RAY_TRACING_ENTRY_POINTS {
            let c_name = CString::new(*name).map_err(Error::from)?;
            if resolver.resolve(&c_name).is_none() {
                return Err(Error::MissingEntryPoint(name.to_string()).into());
            }
        }

        let fp = vk::NvRayTracingFn::load(|name| {
            resolver
                .resolve(name)
                .map(|f| f as *const c_void)
                .unwrap_or(std::ptr::null())
        });

        trace!("Loaded {} ray tracing entry points", RAY_TRACING_ENTRY_POINTS.len());

        Ok(Self {
            device: resolver.device(),
            fp,
        })
    }

    /// The device these functions were loaded for
    pub fn device(&self) -> vk::Device {
        self.device
    }

    /// Access the raw function table, for the functions not wrapped by [`RayTracingFunctions`].
    pub fn fp(&self) -> &vk::NvRayTracingFn {
        &self.fp
    }
}

impl RayTracingFunctions for RayTracingExtension {
    fn create_acceleration_structure(&self, info: &AccelerationStructureInfo) -> Result<vk::AccelerationStructureNV> {
        info.with_vulkan(|info| {
            let create_info = vk::AccelerationStructureCreateInfoNV {
                s_type: vk::StructureType::ACCELERATION_STRUCTURE_CREATE_INFO_NV,
                p_next: std::ptr::null(),
                compacted_size: 0,
                info: *info,
            };
            let mut handle = vk::AccelerationStructureNV::null();
            let result = unsafe { (self.fp.create_acceleration_structure_nv)(self.device, &create_info, std::ptr::null(), &mut handle) };
            Ok(result.result_with_success(handle)?)
        })
    }

    fn destroy_acceleration_structure(&self, handle: vk::AccelerationStructureNV) {
        unsafe { (self.fp.destroy_acceleration_structure_nv)(self.device, handle, std::ptr::null()) }
    }

    fn memory_requirements(
        &self,
        handle: vk::AccelerationStructureNV,
        ty: vk::AccelerationStructureMemoryRequirementsTypeNV,
    ) -> vk::MemoryRequirements {
        let info = vk::AccelerationStructureMemoryRequirementsInfoNV {
            s_type: vk::StructureType::ACCELERATION_STRUCTURE_MEMORY_REQUIREMENTS_INFO_NV,
            p_next: std::ptr::null(),
            ty,
            acceleration_structure: handle,
        };
        let mut requirements = vk::MemoryRequirements2KHR::default();
        unsafe { (self.fp.get_acceleration_structure_memory_requirements_nv)(self.device, &info, &mut requirements) };
        requirements.memory_requirements
    }

    fn bind_memory(&self, handle: vk::AccelerationStructureNV, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> Result<()> {
        let info = vk::BindAccelerationStructureMemoryInfoNV {
            s_type: vk::StructureType::BIND_ACCELERATION_STRUCTURE_MEMORY_INFO_NV,
            p_next: std::ptr::null(),
            acceleration_structure: handle,
            memory,
            memory_offset: offset,
            device_index_count: 0,
            p_device_indices: std::ptr::null(),
        };
        let result = unsafe { (self.fp.bind_acceleration_structure_memory_nv)(self.device, 1, &info) };
        Ok(result.result()?)
    }

    fn cmd_build_acceleration_structure(&self, cmd: vk::CommandBuffer, build: &BuildCommand) {
        build.info.with_vulkan(|info| unsafe {
            (self.fp.cmd_build_acceleration_structure_nv)(
                cmd,
                info,
                build.instance_data,
                build.instance_offset,
                if build.update { vk::TRUE } else { vk::FALSE },
                build.dst,
                build.src,
                build.scratch,
                build.scratch_offset,
            )
        })
    }

    fn acceleration_structure_handle(&self, handle: vk::AccelerationStructureNV) -> Result<u64> {
        if handle == vk::AccelerationStructureNV::null() {
            return Err(Error::NullAccelerationStructure.into());
        }
        let mut reference = 0u64;
        let result = unsafe {
            (self.fp.get_acceleration_structure_handle_nv)(
                self.device,
                handle,
                std::mem::size_of::<u64>(),
                &mut reference as *mut u64 as *mut c_void,
            )
        };
        Ok(result.result_with_success(reference)?)
    }
}
