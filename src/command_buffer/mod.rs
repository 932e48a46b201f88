//! The command capability. Acceleration structure builds are appended to a command buffer the application
//! has already started recording. Submission and waiting stay with the application.

use ash::vk;

use crate::Device;

/// Alias for pipeline stage flags used in barriers
pub type PipelineStage = vk::PipelineStageFlags2;

/// A command buffer in the recording state that build and barrier commands can be appended to.
pub trait CommandRecorder {
    /// Raw handle of the command buffer, used to record extension commands.
    fn handle(&self) -> vk::CommandBuffer;

    /// Record a global memory barrier.
    fn memory_barrier(&mut self, src_stage: PipelineStage, src_access: vk::AccessFlags2, dst_stage: PipelineStage, dst_access: vk::AccessFlags2);

    /// Record an image memory barrier, transitioning `image` from layout `from` to `to`.
    #[allow(clippy::too_many_arguments)]
    fn image_barrier(
        &mut self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        src_stage: PipelineStage,
        dst_stage: PipelineStage,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
        src_access: vk::AccessFlags2,
        dst_access: vk::AccessFlags2,
    );
}

/// Non-owning wrapper around a recording [`VkCommandBuffer`](vk::CommandBuffer). Barriers are recorded with
/// `VK_KHR_synchronization2`, which must be enabled on the device.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandBuffer {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Wrap a command buffer that is in the recording state.
    pub fn new(device: Device, handle: vk::CommandBuffer) -> Self {
        Self {
            device,
            handle,
        }
    }

    /// vkCmdPipelineBarrier2
    pub fn pipeline_barrier_2(&mut self, dependency: &vk::DependencyInfo) {
        unsafe {
            self.device.cmd_pipeline_barrier2(self.handle, dependency);
        }
    }
}

impl CommandRecorder for CommandBuffer {
    fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    fn memory_barrier(&mut self, src_stage: PipelineStage, src_access: vk::AccessFlags2, dst_stage: PipelineStage, dst_access: vk::AccessFlags2) {
        let barrier = vk::MemoryBarrier2 {
            s_type: vk::StructureType::MEMORY_BARRIER_2,
            p_next: std::ptr::null(),
            src_stage_mask: src_stage,
            src_access_mask: src_access,
            dst_stage_mask: dst_stage,
            dst_access_mask: dst_access,
        };
        let dependency = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            p_next: std::ptr::null(),
            dependency_flags: vk::DependencyFlags::empty(),
            memory_barrier_count: 1,
            p_memory_barriers: &barrier,
            buffer_memory_barrier_count: 0,
            p_buffer_memory_barriers: std::ptr::null(),
            image_memory_barrier_count: 0,
            p_image_memory_barriers: std::ptr::null(),
        };
        self.pipeline_barrier_2(&dependency);
    }

    fn image_barrier(
        &mut self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        src_stage: PipelineStage,
        dst_stage: PipelineStage,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
        src_access: vk::AccessFlags2,
        dst_access: vk::AccessFlags2,
    ) {
        let barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            p_next: std::ptr::null(),
            src_stage_mask: src_stage,
            src_access_mask: src_access,
            dst_stage_mask: dst_stage,
            dst_access_mask: dst_access,
            old_layout: from,
            new_layout: to,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: range,
        };
        let dependency = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            p_next: std::ptr::null(),
            dependency_flags: vk::DependencyFlags::BY_REGION,
            memory_barrier_count: 0,
            p_memory_barriers: std::ptr::null(),
            buffer_memory_barrier_count: 0,
            p_buffer_memory_barriers: std::ptr::null(),
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &barrier,
        };
        self.pipeline_barrier_2(&dependency);
    }
}
