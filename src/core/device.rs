use std::collections::HashSet;
use std::ffi::CStr;
use std::fmt::Formatter;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::extension::ProcAddrResolver;
use crate::resource::storage_image::{FormatSupport, ImageFunctions};
use crate::Error;

/// Device extensions that the ray tracing subsystem can make use of.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub enum ExtensionID {
    /// `VK_NV_ray_tracing`
    RayTracing,
}

impl ExtensionID {
    /// Name of the Vulkan extension
    pub fn name(&self) -> &'static CStr {
        match self {
            ExtensionID::RayTracing => vk::NvRayTracingFn::name(),
        }
    }
}

impl std::fmt::Display for ExtensionID {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
struct DeviceInner {
    #[derivative(Debug = "ignore")]
    instance: ash::Instance,
    #[derivative(Debug = "ignore")]
    handle: ash::Device,
    physical_device: vk::PhysicalDevice,
    queue_families: Vec<u32>,
    extensions: HashSet<ExtensionID>,
}

/// Wrapper around a `VkDevice` created by the application. Internal state is wrapped in an
/// `Arc<DeviceInner>`, so this is safe to clone.
///
/// The device is not destroyed when the last copy is dropped, the application that created it
/// stays responsible for calling `vkDestroyDevice`.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Wrap an existing device. `extensions` lists the device extension names that were enabled
    /// when the device was created.
    pub fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        handle: ash::Device,
        queue_families: Vec<u32>,
        extensions: &[&CStr],
    ) -> Self {
        let enabled = [ExtensionID::RayTracing]
            .into_iter()
            .filter(|ext| extensions.contains(&ext.name()))
            .collect::<HashSet<_>>();
        if !enabled.contains(&ExtensionID::RayTracing) {
            info!(
                "Extension {} is not enabled on this device. Acceleration structures are unavailable.",
                ExtensionID::RayTracing.name().to_bytes().escape_ascii()
            );
        }

        Device {
            inner: Arc::new(DeviceInner {
                instance,
                handle,
                physical_device,
                queue_families,
                extensions: enabled,
            }),
        }
    }

    /// Get unsafe access to the underlying VkDevice handle
    /// # Safety
    /// * The caller should not call `vkDestroyDevice` on this.
    /// * This handle is valid as long as there is a copy of `self` alive.
    pub unsafe fn handle(&self) -> ash::Device {
        self.inner.handle.clone()
    }

    /// Get the instance this device was created from
    pub fn instance(&self) -> &ash::Instance {
        &self.inner.instance
    }

    /// Get the physical device this device was created from
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.inner.physical_device
    }

    /// Get the queue families requested on this device.
    pub fn queue_families(&self) -> &[u32] {
        self.inner.queue_families.as_slice()
    }

    /// True we only have a single queue family, and thus the sharing mode for resources is always EXCLUSIVE.
    pub fn is_single_queue(&self) -> bool {
        self.inner.queue_families.len() <= 1
    }

    /// Check if an extension is enabled.
    pub fn is_extension_enabled(&self, ext: ExtensionID) -> bool {
        self.inner.extensions.contains(&ext)
    }

    /// Fails with [`Error::ExtensionNotSupported`] if the extension is not enabled.
    pub fn require_extension(&self, ext: ExtensionID) -> Result<()> {
        if self.is_extension_enabled(ext) {
            Ok(())
        } else {
            Err(Error::ExtensionNotSupported(ext).into())
        }
    }
}

impl ProcAddrResolver for Device {
    fn device(&self) -> vk::Device {
        self.inner.handle.handle()
    }

    fn resolve(&self, name: &CStr) -> vk::PFN_vkVoidFunction {
        // SAFETY: The device handle is valid as long as self is alive, and name is a valid C string.
        unsafe {
            (self.inner.instance.fp_v1_0().get_device_proc_addr)(self.inner.handle.handle(), name.as_ptr())
        }
    }
}

impl FormatSupport for Device {
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.inner
                .instance
                .get_physical_device_format_properties(self.inner.physical_device, format)
        }
    }
}

impl ImageFunctions for Device {
    fn create_image(&self, info: &vk::ImageCreateInfo) -> Result<vk::Image> {
        Ok(unsafe { self.inner.handle.create_image(info, None)? })
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.inner.handle.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> Result<()> {
        unsafe { self.inner.handle.bind_image_memory(image, memory, offset)? };
        Ok(())
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView> {
        Ok(unsafe { self.inner.handle.create_image_view(info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.inner.handle.destroy_image_view(view, None) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.inner.handle.destroy_image(image, None) }
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.inner.handle
    }
}
