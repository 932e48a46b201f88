//! The top level acceleration structure, indexing instances of bottom level structures.
//!
//! The lifecycle mirrors [`BottomLevelAccelerationStructure`](crate::BottomLevelAccelerationStructure). On top of that,
//! [`compute_buffer_sizes`](TopLevelAccelerationStructure::compute_buffer_sizes) creates the host visible instance buffer
//! and [`generate`](TopLevelAccelerationStructure::generate) fills it with one 64-byte record per instance.

use anyhow::Result;
use ash::vk;
use glam::Mat4;

use crate::command_buffer::CommandRecorder;
use crate::resource::raytracing::bottom_level::build_barrier;
use crate::{
    pack_instances, query_build_size, AccelerationStructureBuildSize, AccelerationStructureInfo, Allocation, Allocator, Buffer,
    BuildCommand, DefaultAllocator, Error, Instance, MemoryType, RayTracingFunctions, INSTANCE_DESCRIPTOR_SIZE,
};

/// A top level acceleration structure. Instances refer to bottom level structures by handle only, keeping those
/// alive is up to the caller.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TopLevelAccelerationStructure<A: Allocator = DefaultAllocator> {
    instances: Vec<Instance>,
    info: Option<AccelerationStructureInfo>,
    handle: vk::AccelerationStructureNV,
    #[derivative(Debug = "ignore")]
    memory: Option<A::Allocation>,
    #[derivative(Debug = "ignore")]
    instance_buffer: Option<Buffer<A>>,
    sizes: Option<AccelerationStructureBuildSize>,
    instance_descriptors_size: vk::DeviceSize,
    memory_bound: bool,
    built: bool,
}

impl<A: Allocator> Default for TopLevelAccelerationStructure<A> {
    fn default() -> Self {
        Self {
            instances: vec![],
            info: None,
            handle: vk::AccelerationStructureNV::null(),
            memory: None,
            instance_buffer: None,
            sizes: None,
            instance_descriptors_size: 0,
            memory_bound: false,
            built: false,
        }
    }
}

impl<A: Allocator> TopLevelAccelerationStructure<A> {
    /// Create an empty structure
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance with a full visibility mask and back-face culling disabled. The referenced structure
    /// is not validated here, that happens when the instance is packed in [`generate`](Self::generate).
    /// # Errors
    /// Fails with [`Error::GeometryFrozen`] if the structure was already created.
    pub fn add_instance(&mut self, blas: vk::AccelerationStructureNV, transform: Mat4, instance_id: u32, hit_group_id: u32) -> Result<()> {
        self.push_instance(Instance::new(blas, transform, instance_id, hit_group_id))
    }

    /// Add a fully specified instance.
    pub fn push_instance(&mut self, instance: Instance) -> Result<()> {
        if self.handle != vk::AccelerationStructureNV::null() {
            return Err(Error::GeometryFrozen.into());
        }
        self.instances.push(instance);
        Ok(())
    }

    /// Replace all instances. After creation the number of instances must stay the same, since only
    /// their contents can change during an update.
    pub fn set_instances(&mut self, instances: Vec<Instance>) -> Result<()> {
        if let Some(info) = &self.info {
            if info.instance_count != instances.len() as u32 {
                return Err(Error::InstanceCountMismatch {
                    built: info.instance_count,
                    requested: instances.len() as u32,
                }
                .into());
            }
        }
        self.instances = instances;
        Ok(())
    }

    /// All instances in this structure
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Number of instances in this structure
    pub fn num_instances(&self) -> u32 {
        self.instances.len() as u32
    }

    /// Create the acceleration structure object with room for the current instances. No memory is allocated yet.
    /// # Errors
    /// * Fails with [`Error::AlreadyCreated`] if the structure exists and was not destroyed.
    /// * Fails if the driver cannot create the structure.
    pub fn create<F: RayTracingFunctions>(&mut self, fns: &F, flags: vk::BuildAccelerationStructureFlagsKHR, allow_update: bool) -> Result<()> {
        if self.handle != vk::AccelerationStructureNV::null() {
            return Err(Error::AlreadyCreated.into());
        }
        let flags = if allow_update {
            flags | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE
        } else {
            flags & !vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE
        };
        let info = AccelerationStructureInfo::top_level(flags, self.num_instances());
        let handle = fns.create_acceleration_structure(&info)?;

        #[cfg(feature = "log-objects")]
        trace!("Created new top level VkAccelerationStructureNV {:p} ({} instances)", handle, info.instance_count);

        self.handle = handle;
        self.info = Some(info);
        self.built = false;
        Ok(())
    }

    /// Query the memory requirements of the structure, allocate device local memory for it and create the instance
    /// buffer. Returns the scratch size needed to both build and update the structure.
    /// # Errors
    /// * Fails with [`Error::NotCreated`] if [`create`](Self::create) was not called.
    /// * Fails if any memory cannot be allocated.
    pub fn compute_buffer_sizes<F: RayTracingFunctions>(&mut self, fns: &F, allocator: &mut A) -> Result<vk::DeviceSize> {
        let instance_count = self.info.as_ref().ok_or(Error::NotCreated)?.instance_count;
        self.instance_descriptors_size = instance_count as vk::DeviceSize * INSTANCE_DESCRIPTOR_SIZE as vk::DeviceSize;

        if !self.memory_bound {
            if let Some(memory) = self.memory.take() {
                allocator.free(memory)?;
            }
            let sizes = query_build_size(fns, self.handle);
            self.memory = Some(allocator.allocate("tlas", &sizes.requirements, MemoryType::GpuOnly)?);
            self.sizes = Some(sizes);
        }

        if self.instance_buffer.is_none() && self.instance_descriptors_size > 0 {
            self.instance_buffer = Some(allocator.create_buffer(
                "tlas_instances",
                self.instance_descriptors_size,
                vk::BufferUsageFlags::RAY_TRACING_NV,
                MemoryType::CpuToGpu,
            )?);
        }

        Ok(self.sizes.map(|s| s.scratch_size()).unwrap_or_default())
    }

    /// Pack every instance, upload the records to the instance buffer and record the build into `cmd`.
    /// # Errors
    /// * Fails with [`Error::NotCreated`] or [`Error::SizesNotComputed`] if the lifecycle steps before were skipped.
    /// * With `update_only`, fails with [`Error::UpdateNotAllowed`] or [`Error::NeverBuilt`] like bottom level structures do.
    /// * Fails if an instance refers to a bottom level structure that was not built or was destroyed. Nothing is recorded in that case.
    pub fn generate<F: RayTracingFunctions>(
        &mut self,
        fns: &F,
        allocator: &mut A,
        cmd: &mut impl CommandRecorder,
        scratch: &Buffer<A>,
        scratch_offset: vk::DeviceSize,
        update_only: bool,
    ) -> Result<()> {
        let info = self.info.as_ref().ok_or(Error::NotCreated)?;
        let sizes = match (&self.sizes, &self.memory) {
            (Some(sizes), Some(_)) if sizes.size() != 0 => *sizes,
            _ => return Err(Error::SizesNotComputed.into()),
        };
        if update_only {
            if !info.allows_update() {
                return Err(Error::UpdateNotAllowed.into());
            }
            if !self.built {
                return Err(Error::NeverBuilt.into());
            }
        }
        if info.instance_count != self.num_instances() {
            return Err(Error::InstanceCountMismatch {
                built: info.instance_count,
                requested: self.num_instances(),
            }
            .into());
        }
        let required = if update_only {
            sizes.update_scratch_size
        } else {
            sizes.build_scratch_size
        };
        scratch.check_range(scratch_offset, required)?;

        let data = pack_instances(fns, &self.instances)?;
        let instance_data = match &self.instance_buffer {
            Some(buffer) => {
                allocator.copy_to_buffer(buffer, &data)?;
                unsafe { buffer.handle() }
            }
            None => {
                warn!("Building a top level acceleration structure without instances");
                vk::Buffer::null()
            }
        };

        if !self.memory_bound {
            if let Some(memory) = &self.memory {
                fns.bind_memory(self.handle, unsafe { memory.memory() }, memory.offset())?;
            }
            self.memory_bound = true;
        }

        cmd.memory_barrier(
            vk::PipelineStageFlags2::HOST | vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::HOST_WRITE | vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR | vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        );

        fns.cmd_build_acceleration_structure(
            cmd.handle(),
            &BuildCommand {
                info,
                instance_data,
                instance_offset: 0,
                update: update_only,
                dst: self.handle,
                src: if update_only {
                    self.handle
                } else {
                    vk::AccelerationStructureNV::null()
                },
                scratch: unsafe { scratch.handle() },
                scratch_offset,
            },
        );
        build_barrier(cmd);

        self.built = true;
        Ok(())
    }

    /// Destroy the structure, free its memory and the instance buffer, and remove all instances.
    /// Does nothing if the structure does not exist.
    pub fn destroy<F: RayTracingFunctions>(&mut self, fns: &F, allocator: &mut A) -> Result<()> {
        if self.handle != vk::AccelerationStructureNV::null() {
            #[cfg(feature = "log-objects")]
            trace!("Destroying top level VkAccelerationStructureNV {:p}", self.handle);
            fns.destroy_acceleration_structure(self.handle);
            self.handle = vk::AccelerationStructureNV::null();
        }
        self.info = None;
        self.sizes = None;
        self.memory_bound = false;
        self.built = false;
        self.instance_descriptors_size = 0;
        self.instances.clear();
        if let Some(memory) = self.memory.take() {
            allocator.free(memory)?;
        }
        if let Some(buffer) = self.instance_buffer.take() {
            allocator.destroy_buffer(buffer)?;
        }
        Ok(())
    }

    /// Raw handle of the acceleration structure, null if it was not created.
    pub fn handle(&self) -> vk::AccelerationStructureNV {
        self.handle
    }

    /// The description frozen at creation
    pub fn info(&self) -> Option<&AccelerationStructureInfo> {
        self.info.as_ref()
    }

    /// Sizes queried by [`compute_buffer_sizes`](Self::compute_buffer_sizes)
    pub fn sizes(&self) -> Option<&AccelerationStructureBuildSize> {
        self.sizes.as_ref()
    }

    /// Size in bytes of the packed instance records, `num_instances() * 64`
    pub fn instance_descriptors_size(&self) -> vk::DeviceSize {
        self.instance_descriptors_size
    }

    /// The instance buffer, `None` before sizes were computed or if there are no instances
    pub fn instance_buffer(&self) -> Option<&Buffer<A>> {
        self.instance_buffer.as_ref()
    }

    /// True once a build was recorded
    pub fn is_built(&self) -> bool {
        self.built
    }
}
