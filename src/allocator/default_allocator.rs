//! Contains a default allocator type based on the [`gpu_allocator`] crate that is good for most needs.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan as vk_alloc;
use gpu_allocator::vulkan::AllocationScheme;

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits;
use crate::{Allocator, Buffer, Device, Error};

/// The default allocator. This calls into the `gpu_allocator` crate.
/// It's important to note that this allocator is `Clone`, `Send` and `Sync`. All its internal state is safely
/// wrapped inside an `Arc<Mutex<T>>`. This is to facilitate passing it around everywhere.
///
/// See also: [`Allocator`](traits::Allocator), [`Allocation`](traits::Allocation)
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct DefaultAllocator {
    #[derivative(Debug = "ignore")]
    device: Device,
    #[derivative(Debug = "ignore")]
    alloc: Arc<Mutex<vk_alloc::Allocator>>,
}

/// Allocation returned from the default allocator.
/// Can be obtained by calling [`DefaultAllocator::allocate()`], and must be released with [`DefaultAllocator::free()`].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Allocation {
    allocation: vk_alloc::Allocation,
}

impl DefaultAllocator {
    /// Create a new default allocator.
    /// # Errors
    /// * May fail if creating the internal `gpu_allocator` fails.
    pub fn new(device: Device) -> Result<Self> {
        let alloc = vk_alloc::Allocator::new(&vk_alloc::AllocatorCreateDesc {
            instance: device.instance().clone(),
            // SAFETY: The user passed in a valid Device reference.
            device: unsafe { device.handle() },
            physical_device: device.physical_device(),
            debug_settings: Default::default(),
            buffer_device_address: false,
        })?;
        Ok(Self {
            device,
            alloc: Arc::new(Mutex::new(alloc)),
        })
    }
}

impl Allocator for DefaultAllocator {
    /// The allocation type that is returned from calling [`DefaultAllocator::allocate()`]
    type Allocation = Allocation;

    /// Allocates raw memory of a specific memory type. The given name is used for internal tracking and
    /// debug logging.
    /// # Errors
    /// * May fail if the device is out of memory
    /// * May fail if no memory type satisfies the requirements.
    fn allocate(&mut self, name: &str, requirements: &vk::MemoryRequirements, ty: MemoryType) -> Result<Self::Allocation> {
        let mut alloc = self.alloc.lock().map_err(|_| Error::PoisonError)?;
        let allocation = alloc
            .allocate(&vk_alloc::AllocationCreateDesc {
                name,
                requirements: *requirements,
                location: gpu_allocator::MemoryLocation::from(ty),
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(Error::from)?;

        Ok(Allocation {
            allocation,
        })
    }

    fn free(&mut self, allocation: Self::Allocation) -> Result<()> {
        let mut alloc = self.alloc.lock().map_err(|_| Error::PoisonError)?;
        alloc.free(allocation.allocation).map_err(Error::from)?;
        Ok(())
    }

    fn create_buffer(&mut self, name: &str, size: vk::DeviceSize, usage: vk::BufferUsageFlags, ty: MemoryType) -> Result<Buffer<Self>> {
        let sharing_mode = if self.device.is_single_queue() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };
        let handle = unsafe {
            self.device.create_buffer(
                &vk::BufferCreateInfo {
                    s_type: vk::StructureType::BUFFER_CREATE_INFO,
                    p_next: std::ptr::null(),
                    flags: vk::BufferCreateFlags::empty(),
                    size,
                    usage,
                    sharing_mode,
                    queue_family_index_count: if sharing_mode == vk::SharingMode::CONCURRENT {
                        self.device.queue_families().len() as u32
                    } else {
                        0
                    },
                    p_queue_family_indices: if sharing_mode == vk::SharingMode::CONCURRENT {
                        self.device.queue_families().as_ptr()
                    } else {
                        std::ptr::null()
                    },
                },
                None,
            )?
        };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkBuffer {handle:p} (size = {size} bytes)");

        let requirements = unsafe { self.device.get_buffer_memory_requirements(handle) };
        let memory = match self.allocate(name, &requirements, ty) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_buffer(handle, None) };
                return Err(err);
            }
        };

        let bound = unsafe { self.device.bind_buffer_memory(handle, traits::Allocation::memory(&memory), traits::Allocation::offset(&memory)) };
        if let Err(err) = bound {
            unsafe { self.device.destroy_buffer(handle, None) };
            if let Err(free_err) = self.free(memory) {
                error!("Failed to free memory of buffer `{name}`: {free_err}");
            }
            return Err(Error::from(err).into());
        }

        Ok(Buffer::from_raw_parts(handle, memory, size, usage))
    }

    fn destroy_buffer(&mut self, buffer: Buffer<Self>) -> Result<()> {
        let (handle, memory) = buffer.into_raw_parts();
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkBuffer {:p}", handle);
        unsafe { self.device.destroy_buffer(handle, None) };
        self.free(memory)
    }

    fn copy_to_buffer(&mut self, buffer: &Buffer<Self>, data: &[u8]) -> Result<()> {
        let size = data.len() as vk::DeviceSize;
        if size > buffer.size() {
            return Err(Error::BufferOverflow {
                size,
                capacity: buffer.size(),
            }
            .into());
        }
        let pointer = traits::Allocation::mapped_ptr(buffer.memory()).ok_or(Error::UnmappableBuffer)?;
        // SAFETY: The mapped range covers at least `buffer.size()` bytes, which we checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), pointer.cast::<u8>().as_ptr(), data.len());
        }
        Ok(())
    }
}

impl traits::Allocation for Allocation {
    unsafe fn memory(&self) -> vk::DeviceMemory {
        self.allocation.memory()
    }

    fn offset(&self) -> vk::DeviceSize {
        self.allocation.offset()
    }

    fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        self.allocation.mapped_ptr()
    }
}
