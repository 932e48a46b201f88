//! Exposes the settings that control how acceleration structures are created and built.

use ash::vk;

/// Settings used by the [`AccelerationStructureManager`](crate::AccelerationStructureManager) when creating
/// and building structures.
///
/// # Example
/// ```
/// # use vk_accel::prelude::*;
/// let settings = SettingsBuilder::new()
///     .allow_update(false)
///     .bottom_level_flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD)
///     .build();
/// assert!(!settings.allow_update);
/// ```
#[derive(Debug, Clone)]
pub struct AccelerationStructureSettings {
    /// Build flags for every bottom level structure. `ALLOW_UPDATE` is added automatically when
    /// [`allow_update`](Self::allow_update) is set.
    pub bottom_level_flags: vk::BuildAccelerationStructureFlagsKHR,
    /// Build flags for the top level structure.
    pub top_level_flags: vk::BuildAccelerationStructureFlagsKHR,
    /// Whether structures can be refit in place after their first build.
    pub allow_update: bool,
    /// Visibility mask given to every instance.
    pub instance_mask: u8,
    /// Flags given to every instance.
    pub instance_flags: vk::GeometryInstanceFlagsKHR,
    /// Storage image formats in order of preference.
    pub storage_formats: Vec<vk::Format>,
}

impl Default for AccelerationStructureSettings {
    fn default() -> Self {
        Self {
            bottom_level_flags: vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            top_level_flags: vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            allow_update: true,
            instance_mask: 0xFF,
            instance_flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
            storage_formats: vec![
                vk::Format::R8G8B8A8_UNORM,
                vk::Format::B8G8R8A8_UNORM,
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::R32G32B32A32_SFLOAT,
            ],
        }
    }
}

/// Builder for [`AccelerationStructureSettings`]
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    inner: AccelerationStructureSettings,
}

impl SettingsBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the build flags of bottom level structures
    pub fn bottom_level_flags(mut self, flags: vk::BuildAccelerationStructureFlagsKHR) -> Self {
        self.inner.bottom_level_flags = flags;
        self
    }

    /// Set the build flags of the top level structure
    pub fn top_level_flags(mut self, flags: vk::BuildAccelerationStructureFlagsKHR) -> Self {
        self.inner.top_level_flags = flags;
        self
    }

    /// Enable or disable in-place updates
    pub fn allow_update(mut self, allow: bool) -> Self {
        self.inner.allow_update = allow;
        self
    }

    /// Set the visibility mask of every instance
    pub fn instance_mask(mut self, mask: u8) -> Self {
        self.inner.instance_mask = mask;
        self
    }

    /// Set the flags of every instance
    pub fn instance_flags(mut self, flags: vk::GeometryInstanceFlagsKHR) -> Self {
        self.inner.instance_flags = flags;
        self
    }

    /// Set the storage image format candidates, most preferred first
    pub fn storage_formats(mut self, formats: impl Into<Vec<vk::Format>>) -> Self {
        self.inner.storage_formats = formats.into();
        self
    }

    /// Build the settings
    pub fn build(self) -> AccelerationStructureSettings {
        self.inner
    }
}
