//! Bottom level acceleration structures, indexing the triangles of one or more geometries.
//!
//! The lifecycle of a structure is
//! 1. [`add_object`](BottomLevelAccelerationStructure::add_object) for every mesh,
//! 2. [`create`](BottomLevelAccelerationStructure::create), which freezes the geometry,
//! 3. [`compute_buffer_sizes`](BottomLevelAccelerationStructure::compute_buffer_sizes), which allocates memory for the structure
//!    and reports the scratch size needed to build it,
//! 4. [`generate`](BottomLevelAccelerationStructure::generate), which records the build, and optionally again with `update_only` to refit,
//! 5. [`destroy`](BottomLevelAccelerationStructure::destroy).

use anyhow::Result;
use ash::vk;
use glam::Mat4;

use crate::command_buffer::CommandRecorder;
use crate::{
    query_build_size, AccelerationStructureBuildSize, AccelerationStructureInfo, Allocation, Allocator, Buffer, BuildCommand,
    DefaultAllocator, Error, Geometry, MemoryType, RayTracingFunctions, TriangleMesh,
};

/// A bottom level acceleration structure and the world transforms it is instanced with.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct BottomLevelAccelerationStructure<A: Allocator = DefaultAllocator> {
    geometries: Vec<Geometry>,
    transforms: Vec<Mat4>,
    hit_group: u32,
    info: Option<AccelerationStructureInfo>,
    handle: vk::AccelerationStructureNV,
    #[derivative(Debug = "ignore")]
    memory: Option<A::Allocation>,
    sizes: Option<AccelerationStructureBuildSize>,
    memory_bound: bool,
    built: bool,
}

impl<A: Allocator> Default for BottomLevelAccelerationStructure<A> {
    fn default() -> Self {
        Self {
            geometries: vec![],
            transforms: vec![],
            hit_group: 0,
            info: None,
            handle: vk::AccelerationStructureNV::null(),
            memory: None,
            sizes: None,
            memory_bound: false,
            built: false,
        }
    }
}

/// Records the barrier that makes a finished build visible to the next build or trace.
pub(crate) fn build_barrier(cmd: &mut impl CommandRecorder) {
    cmd.memory_barrier(
        vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
    );
}

impl<A: Allocator> BottomLevelAccelerationStructure<A> {
    /// Create an empty structure
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a mesh and add it to this structure.
    /// # Errors
    /// * Fails if the mesh has malformed buffer references.
    /// * Fails with [`Error::GeometryFrozen`] if the structure was already created.
    pub fn add_object(&mut self, mesh: &TriangleMesh) -> Result<()> {
        let geometry = Geometry::from_mesh(mesh)?;
        self.add_geometry(geometry)
    }

    /// Add already converted geometry to this structure.
    pub fn add_geometry(&mut self, geometry: Geometry) -> Result<()> {
        if self.handle != vk::AccelerationStructureNV::null() {
            return Err(Error::GeometryFrozen.into());
        }
        self.geometries.push(geometry);
        Ok(())
    }

    /// Add a world transform. Every transform becomes one instance in the top level structure.
    pub fn add_transform(&mut self, transform: Mat4) {
        self.transforms.push(transform);
    }

    /// All world transforms of this structure
    pub fn transforms(&self) -> &[Mat4] {
        &self.transforms
    }

    /// Mutable access to the world transforms, for moving instances before an update
    pub fn transforms_mut(&mut self) -> &mut [Mat4] {
        &mut self.transforms
    }

    /// Remove all world transforms
    pub fn clear_transforms(&mut self) {
        self.transforms.clear();
    }

    /// Hit group given to every instance of this structure
    pub fn hit_group(&self) -> u32 {
        self.hit_group
    }

    /// Set the hit group given to every instance of this structure. Takes effect on the next build or update.
    pub fn set_hit_group(&mut self, hit_group: u32) {
        self.hit_group = hit_group;
    }

    /// Geometry added to this structure
    pub fn geometries(&self) -> &[Geometry] {
        &self.geometries
    }

    /// Create the acceleration structure object. The geometry added so far is frozen into its description.
    /// No memory is allocated yet.
    /// # Errors
    /// * Fails with [`Error::AlreadyCreated`] if the structure exists and was not destroyed.
    /// * Fails if the driver cannot create the structure.
    pub fn create<F: RayTracingFunctions>(&mut self, fns: &F, flags: vk::BuildAccelerationStructureFlagsKHR, allow_update: bool) -> Result<()> {
        if self.handle != vk::AccelerationStructureNV::null() {
            return Err(Error::AlreadyCreated.into());
        }
        if self.geometries.is_empty() {
            warn!("Creating a bottom level acceleration structure without geometry");
        }

        let flags = if allow_update {
            flags | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE
        } else {
            flags & !vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE
        };
        let info = AccelerationStructureInfo::bottom_level(flags, self.geometries.clone());
        let handle = fns.create_acceleration_structure(&info)?;

        #[cfg(feature = "log-objects")]
        trace!("Created new bottom level VkAccelerationStructureNV {:p} ({} geometries)", handle, info.geometry_count());

        self.handle = handle;
        self.info = Some(info);
        self.built = false;
        Ok(())
    }

    /// Query the memory requirements of the structure and allocate device local memory for it.
    /// Returns the scratch size needed to both build and update the structure.
    /// # Errors
    /// * Fails with [`Error::NotCreated`] if [`create`](Self::create) was not called.
    /// * Fails if the memory cannot be allocated.
    pub fn compute_buffer_sizes<F: RayTracingFunctions>(&mut self, fns: &F, allocator: &mut A) -> Result<vk::DeviceSize> {
        if self.handle == vk::AccelerationStructureNV::null() {
            return Err(Error::NotCreated.into());
        }
        if self.memory_bound {
            // Memory can only be bound once, the existing allocation already satisfies the frozen description.
            return Ok(self.sizes.map(|s| s.scratch_size()).unwrap_or_default());
        }
        if let Some(memory) = self.memory.take() {
            allocator.free(memory)?;
        }

        let sizes = query_build_size(fns, self.handle);
        self.memory = Some(allocator.allocate("blas", &sizes.requirements, MemoryType::GpuOnly)?);
        self.sizes = Some(sizes);
        Ok(sizes.scratch_size())
    }

    /// Record the build of this structure into `cmd`, followed by a barrier so later builds sharing the same
    /// scratch memory only start once this build finished writing.
    /// # Errors
    /// * Fails with [`Error::NotCreated`] or [`Error::SizesNotComputed`] if the lifecycle steps before were skipped.
    /// * With `update_only`, fails with [`Error::UpdateNotAllowed`] if the structure was created without update support,
    ///   and with [`Error::NeverBuilt`] if no full build was recorded before.
    /// * Fails if the scratch region is too small.
    pub fn generate<F: RayTracingFunctions>(
        &mut self,
        fns: &F,
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
        let required = if update_only {
            sizes.update_scratch_size
        } else {
            sizes.build_scratch_size
        };
        scratch.check_range(scratch_offset, required)?;

        if !self.memory_bound {
            if let Some(memory) = &self.memory {
                fns.bind_memory(self.handle, unsafe { memory.memory() }, memory.offset())?;
            }
            self.memory_bound = true;
        }

        fns.cmd_build_acceleration_structure(
            cmd.handle(),
            &BuildCommand {
                info,
                instance_data: vk::Buffer::null(),
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

    /// Destroy the structure and free its memory. The geometry and transforms are kept, so the structure
    /// can be created again. Does nothing if the structure does not exist.
    pub fn destroy<F: RayTracingFunctions>(&mut self, fns: &F, allocator: &mut A) -> Result<()> {
        if self.handle != vk::AccelerationStructureNV::null() {
            #[cfg(feature = "log-objects")]
            trace!("Destroying bottom level VkAccelerationStructureNV {:p}", self.handle);
            fns.destroy_acceleration_structure(self.handle);
            self.handle = vk::AccelerationStructureNV::null();
        }
        self.info = None;
        self.sizes = None;
        self.memory_bound = false;
        self.built = false;
        if let Some(memory) = self.memory.take() {
            allocator.free(memory)?;
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

    /// True once a build was recorded
    pub fn is_built(&self) -> bool {
        self.built
    }
}
