use ash::vk;

use crate::util::to_vk::{AsVulkanType, IntoVulkanType};
use crate::{AccelerationStructureType, Geometry};

/// Describes the contents of an acceleration structure. This is frozen into the structure when it is created,
/// and every build of that structure must use the same description.
#[derive(Debug, Clone, PartialEq)]
pub struct AccelerationStructureInfo {
    /// Bottom or top level
    pub ty: AccelerationStructureType,
    /// Build flags
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    /// Number of instances, only used for top level structures
    pub instance_count: u32,
    /// Geometry, only used for bottom level structures
    pub geometries: Vec<Geometry>,
}

impl AccelerationStructureInfo {
    /// Describe a bottom level structure over the given geometry
    pub fn bottom_level(flags: vk::BuildAccelerationStructureFlagsKHR, geometries: Vec<Geometry>) -> Self {
        Self {
            ty: AccelerationStructureType::BottomLevel,
            flags,
            instance_count: 0,
            geometries,
        }
    }

    /// Describe a top level structure over `instance_count` instances
    pub fn top_level(flags: vk::BuildAccelerationStructureFlagsKHR, instance_count: u32) -> Self {
        Self {
            ty: AccelerationStructureType::TopLevel,
            flags,
            instance_count,
            geometries: vec![],
        }
    }

    /// Number of geometries in this structure
    pub fn geometry_count(&self) -> u32 {
        self.geometries.len() as u32
    }

    /// True if the structure can be updated in place
    pub fn allows_update(&self) -> bool {
        self.flags.contains(vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE)
    }

    /// Call `f` with the Vulkan representation of this info. The geometry array it points to only lives for the
    /// duration of the call.
    pub fn with_vulkan<R>(&self, f: impl FnOnce(&vk::AccelerationStructureInfoNV) -> R) -> R {
        let geometries = self.geometries.iter().map(|g| g.as_vulkan()).collect::<Vec<_>>();
        let info = vk::AccelerationStructureInfoNV {
            s_type: vk::StructureType::ACCELERATION_STRUCTURE_INFO_NV,
            p_next: std::ptr::null(),
            ty: self.ty.into_vulkan(),
            flags: self.flags,
            instance_count: self.instance_count,
            geometry_count: geometries.len() as u32,
            p_geometries: if geometries.is_empty() {
                std::ptr::null()
            } else {
                geometries.as_ptr()
            },
        };
        f(&info)
    }
}

/// All parameters of a single `vkCmdBuildAccelerationStructureNV` call
#[derive(Debug, Copy, Clone)]
pub struct BuildCommand<'a> {
    /// Description the destination was created with
    pub info: &'a AccelerationStructureInfo,
    /// Buffer with packed instance records, null for bottom level builds
    pub instance_data: vk::Buffer,
    /// Offset of the first instance record
    pub instance_offset: vk::DeviceSize,
    /// Refit the existing structure instead of building from scratch
    pub update: bool,
    /// Structure to build
    pub dst: vk::AccelerationStructureNV,
    /// Structure to update from, null for full builds
    pub src: vk::AccelerationStructureNV,
    /// Scratch buffer used during the build
    pub scratch: vk::Buffer,
    /// Offset into the scratch buffer
    pub scratch_offset: vk::DeviceSize,
}
