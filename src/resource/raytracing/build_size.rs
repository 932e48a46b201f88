//! Utilities for querying acceleration structure build sizes

use ash::vk;

use crate::RayTracingFunctions;

/// Holds the required sizes of the memory backing an acceleration structure and its scratch buffers
#[derive(Debug, Copy, Clone)]
pub struct AccelerationStructureBuildSize {
    /// Memory requirements of the acceleration structure itself
    pub requirements: vk::MemoryRequirements,
    /// Required size of the scratch buffer for build operations
    pub build_scratch_size: vk::DeviceSize,
    /// Required size of the scratch buffer for update operations
    pub update_scratch_size: vk::DeviceSize,
}

impl AccelerationStructureBuildSize {
    /// Required size of the acceleration structure
    pub fn size(&self) -> vk::DeviceSize {
        self.requirements.size
    }

    /// Scratch size that covers both builds and updates
    pub fn scratch_size(&self) -> vk::DeviceSize {
        self.build_scratch_size.max(self.update_scratch_size)
    }
}

/// Query the memory requirements of a created acceleration structure
pub fn query_build_size<F: RayTracingFunctions>(fns: &F, handle: vk::AccelerationStructureNV) -> AccelerationStructureBuildSize {
    let requirements = fns.memory_requirements(handle, vk::AccelerationStructureMemoryRequirementsTypeNV::OBJECT);
    let build = fns.memory_requirements(handle, vk::AccelerationStructureMemoryRequirementsTypeNV::BUILD_SCRATCH);
    let update = fns.memory_requirements(handle, vk::AccelerationStructureMemoryRequirementsTypeNV::UPDATE_SCRATCH);
    AccelerationStructureBuildSize {
        requirements,
        build_scratch_size: build.size,
        update_scratch_size: update.size,
    }
}
