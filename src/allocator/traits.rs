//! The memory capability used by acceleration structures, scratch buffers and instance buffers.

use std::ffi::c_void;
use std::ptr::NonNull;

use anyhow::Result;
use ash::vk;

use crate::allocator::memory_type::MemoryType;
use crate::Buffer;

/// Allocates device memory and buffers. Implement this to supply a custom allocator to all acceleration
/// structure operations. The [`DefaultAllocator`](crate::DefaultAllocator) is based on `gpu_allocator`.
///
/// Memory is never released implicitly. Every allocation and buffer must be handed back through
/// [`Allocator::free`] or [`Allocator::destroy_buffer`].
pub trait Allocator: Clone + Send + Sync {
    /// Allocation type returned by this allocator
    type Allocation: Allocation;

    /// Allocate raw memory satisfying `requirements` in memory of the given type.
    fn allocate(&mut self, name: &str, requirements: &vk::MemoryRequirements, ty: MemoryType) -> Result<Self::Allocation>;
    /// Free memory obtained from [`Allocator::allocate`].
    fn free(&mut self, allocation: Self::Allocation) -> Result<()>;
    /// Create a buffer and bind freshly allocated memory to it.
    fn create_buffer(&mut self, name: &str, size: vk::DeviceSize, usage: vk::BufferUsageFlags, ty: MemoryType) -> Result<Buffer<Self>>;
    /// Destroy a buffer and free its memory.
    fn destroy_buffer(&mut self, buffer: Buffer<Self>) -> Result<()>;
    /// Copy `data` to the start of a host-visible buffer.
    fn copy_to_buffer(&mut self, buffer: &Buffer<Self>, data: &[u8]) -> Result<()>;
}

/// A block of device memory
pub trait Allocation: Send {
    /// Get the underlying memory object. Always use together with [`Allocation::offset`].
    /// # Safety
    /// The caller must not free this memory or access a range outside of the allocation.
    unsafe fn memory(&self) -> vk::DeviceMemory;
    /// Offset of this allocation in its memory object
    fn offset(&self) -> vk::DeviceSize;
    /// Host pointer to the allocation, or `None` if it is not host visible.
    fn mapped_ptr(&self) -> Option<NonNull<c_void>>;
}
