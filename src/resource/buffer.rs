//! Wrapper for `VkBuffer` objects.
//!
//! Buffers are created and destroyed through an [`Allocator`], which couples the buffer with the memory
//! bound to it. A [`Buffer`] does not release anything when dropped, hand it back through
//! [`Allocator::destroy_buffer`].

use anyhow::Result;
use ash::vk;

use crate::{Allocator, DefaultAllocator, Error};

/// Wrapper around a [`VkBuffer`](vk::Buffer) and its memory.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Buffer<A: Allocator = DefaultAllocator> {
    handle: vk::Buffer,
    #[derivative(Debug = "ignore")]
    memory: A::Allocation,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
}

impl<A: Allocator> Buffer<A> {
    /// Assemble a buffer from a handle and the memory bound to it. Used by [`Allocator`] implementations.
    pub fn from_raw_parts(handle: vk::Buffer, memory: A::Allocation, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            handle,
            memory,
            size,
            usage,
        }
    }

    /// Split the buffer into its handle and memory. Used by [`Allocator`] implementations.
    pub fn into_raw_parts(self) -> (vk::Buffer, A::Allocation) {
        (self.handle, self.memory)
    }

    /// Obtain a handle to the raw vulkan buffer object.
    /// # Safety
    /// * The caller must make sure to not use this handle after the buffer is destroyed.
    /// * The caller must not call `vkDestroyBuffer` on this handle.
    pub unsafe fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Get the memory bound to this buffer
    pub fn memory(&self) -> &A::Allocation {
        &self.memory
    }

    /// Get the size of this buffer
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Get the usage flags this buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Check that a region of `size` bytes starting at `offset` lies within this buffer.
    /// # Errors
    /// Fails if `offset + size > self.size()`.
    pub fn check_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
        if offset + size > self.size {
            Err(Error::BufferOverflow {
                size: offset + size,
                capacity: self.size,
            }
            .into())
        } else {
            Ok(())
        }
    }
}
