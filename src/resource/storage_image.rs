//! The image the ray tracing pass writes its output into.

use anyhow::Result;
use ash::vk;

use crate::command_buffer::CommandRecorder;
use crate::{AccelerationStructureSettings, Allocation, Allocator, DefaultAllocator, Device, Error, MemoryType};

/// Reports which features a format supports. Implemented by [`Device`].
pub trait FormatSupport {
    /// vkGetPhysicalDeviceFormatProperties
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;
}

/// Creation and destruction of image objects. Implemented by [`Device`].
pub trait ImageFunctions: FormatSupport {
    /// vkCreateImage
    fn create_image(&self, info: &vk::ImageCreateInfo) -> Result<vk::Image>;
    /// vkGetImageMemoryRequirements
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    /// vkBindImageMemory
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> Result<()>;
    /// vkCreateImageView
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView>;
    /// vkDestroyImageView
    fn destroy_image_view(&self, view: vk::ImageView);
    /// vkDestroyImage
    fn destroy_image(&self, image: vk::Image);
}

/// Find the first format in `candidates` that supports `features` with the given tiling.
/// # Errors
/// Fails with [`Error::NoSupportedFormat`] if no candidate matches.
pub fn find_format<S: FormatSupport + ?Sized>(
    support: &S,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|format| {
            let properties = support.format_properties(*format);
            match tiling {
                vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| Error::NoSupportedFormat(candidates.to_vec()).into())
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// A 2D storage image with its memory and a view over the whole image. The image is kept in the
/// [`GENERAL`](vk::ImageLayout::GENERAL) layout.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct StorageImage<A: Allocator = DefaultAllocator, D: ImageFunctions = Device> {
    #[derivative(Debug = "ignore")]
    device: D,
    image: vk::Image,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    layout: vk::ImageLayout,
    #[derivative(Debug = "ignore")]
    memory: A::Allocation,
}

impl<A: Allocator, D: ImageFunctions> StorageImage<A, D> {
    /// Create the image in the first of the settings' storage formats usable as an optimally tiled storage image,
    /// and record its transition to the general layout into `cmd`.
    /// # Errors
    /// * Fails with [`Error::NoSupportedFormat`] if none of the storage formats can be used.
    /// * Fails if the image, its memory or its view cannot be created. Objects created up to that point are destroyed.
    pub fn new(
        device: D,
        allocator: &mut A,
        settings: &AccelerationStructureSettings,
        extent: vk::Extent2D,
        cmd: &mut impl CommandRecorder,
    ) -> Result<Self> {
        let format = find_format(
            &device,
            &settings.storage_formats,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::STORAGE_IMAGE,
        )?;

        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();
        let image = device.create_image(&info)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new VkImage {image:p} ({format:?}, {}x{})", extent.width, extent.height);

        let requirements = device.image_memory_requirements(image);
        let memory = match allocator.allocate("storage_image", &requirements, MemoryType::GpuOnly) {
            Ok(memory) => memory,
            Err(err) => {
                device.destroy_image(image);
                return Err(err);
            }
        };
        let view = match Self::bind_and_view(&device, image, format, &memory) {
            Ok(view) => view,
            Err(err) => {
                device.destroy_image(image);
                if let Err(free_err) = allocator.free(memory) {
                    error!("Failed to free storage image memory: {free_err}");
                }
                return Err(err);
            }
        };

        cmd.image_barrier(
            image,
            color_range(),
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            vk::AccessFlags2::NONE,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
        );

        Ok(Self {
            device,
            image,
            view,
            format,
            extent,
            layout: vk::ImageLayout::GENERAL,
            memory,
        })
    }

    fn bind_and_view(device: &D, image: vk::Image, format: vk::Format, memory: &A::Allocation) -> Result<vk::ImageView> {
        device.bind_image_memory(image, unsafe { memory.memory() }, memory.offset())?;
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_range())
            .build();
        device.create_image_view(&info)
    }

    /// Destroy the view, then the image, then free the memory.
    pub fn destroy(self, allocator: &mut A) -> Result<()> {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkImage {:p}", self.image);
        self.device.destroy_image_view(self.view);
        self.device.destroy_image(self.image);
        allocator.free(self.memory)
    }

    /// Get unsafe access to the underlying `VkImage`.
    /// # Safety
    /// The image must not be destroyed while `self` is alive.
    pub unsafe fn image(&self) -> vk::Image {
        self.image
    }

    /// Get unsafe access to the view over the whole image.
    /// # Safety
    /// The view must not be destroyed while `self` is alive.
    pub unsafe fn view(&self) -> vk::ImageView {
        self.view
    }

    /// The chosen format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size of the image
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Current layout, always [`GENERAL`](vk::ImageLayout::GENERAL) after creation
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }
}
