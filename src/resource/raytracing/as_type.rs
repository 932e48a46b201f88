use ash::vk;

use crate::util::to_vk::IntoVulkanType;

/// Level of an acceleration structure in the two-level hierarchy
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub enum AccelerationStructureType {
    /// Indexes instances of bottom level structures
    TopLevel,
    /// Indexes triangle geometry
    BottomLevel,
}

impl IntoVulkanType for AccelerationStructureType {
    type Output = vk::AccelerationStructureTypeNV;

    fn into_vulkan(self) -> Self::Output {
        match self {
            AccelerationStructureType::TopLevel => vk::AccelerationStructureTypeNV::TOP_LEVEL,
            AccelerationStructureType::BottomLevel => vk::AccelerationStructureTypeNV::BOTTOM_LEVEL,
        }
    }
}
