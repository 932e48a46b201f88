//! The acceleration structure manager builds a complete scene: one bottom level structure per object batch and one
//! top level structure instancing all of them.
//!
//! All builds of one [`generate`](AccelerationStructureManager::generate) call share a single scratch buffer. It is
//! sized for the largest bottom level build, grown once if the top level build needs more, and destroyed before
//! `generate` returns. Builds reusing the scratch memory are ordered by the barrier recorded after every build.
//!
//! # Example
//! ```
//! # use anyhow::Result;
//! # use vk_accel::prelude::*;
//! # use vk_accel::{Allocator, RayTracingFunctions, CommandRecorder};
//! fn build_scene<F: RayTracingFunctions, A: Allocator, C: CommandRecorder>(
//!     fns: F,
//!     allocator: A,
//!     cmd: &mut C,
//!     mesh: &TriangleMesh,
//! ) -> Result<AccelerationStructureManager<F, A>> {
//!     let mut manager = AccelerationStructureManager::new(fns, allocator, AccelerationStructureSettings::default());
//!     let id = manager.add_object(mesh, 0)?;
//!     manager.add_transform(id, Mat4::IDENTITY)?;
//!     manager.add_transform(id, Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)))?;
//!     // The closure must submit the recorded commands and wait for them to finish.
//!     manager.generate(cmd, false, |_cmd| Ok(()))?;
//!     Ok(manager)
//! }
//! ```

use anyhow::Result;
use ash::vk;
use glam::Mat4;

use crate::command_buffer::CommandRecorder;
use crate::util::arena::{Arena, Handle};
use crate::{
    AccelerationStructureSettings, Allocator, BottomLevelAccelerationStructure, Buffer, DefaultAllocator, Error, Instance, MemoryType,
    RayTracingExtension, RayTracingFunctions, TopLevelAccelerationStructure, TriangleMesh,
};

/// Stable id of an object batch registered with the manager
pub type BlasId<A = DefaultAllocator> = Handle<BottomLevelAccelerationStructure<A>>;

/// Owns every acceleration structure of a scene and builds them in the right order.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct AccelerationStructureManager<F: RayTracingFunctions = RayTracingExtension, A: Allocator = DefaultAllocator> {
    #[derivative(Debug = "ignore")]
    fns: F,
    #[derivative(Debug = "ignore")]
    allocator: A,
    settings: AccelerationStructureSettings,
    blases: Arena<BottomLevelAccelerationStructure<A>>,
    tlas: TopLevelAccelerationStructure<A>,
    scratch_size: vk::DeviceSize,
}

impl<F: RayTracingFunctions, A: Allocator> AccelerationStructureManager<F, A> {
    /// Create an empty manager
    pub fn new(fns: F, allocator: A, settings: AccelerationStructureSettings) -> Self {
        Self {
            fns,
            allocator,
            settings,
            blases: Arena::new(),
            tlas: TopLevelAccelerationStructure::new(),
            scratch_size: 0,
        }
    }

    /// Register a single mesh as a new bottom level structure. Every instance of it uses `hit_group`.
    /// # Errors
    /// Fails if the mesh is malformed, in which case nothing is registered.
    pub fn add_object(&mut self, mesh: &TriangleMesh, hit_group: u32) -> Result<BlasId<A>> {
        self.add_objects(std::slice::from_ref(mesh), hit_group)
    }

    /// Register a batch of meshes as one new bottom level structure.
    /// # Errors
    /// Fails if the batch is empty or any mesh is malformed, in which case nothing is registered.
    pub fn add_objects(&mut self, meshes: &[TriangleMesh], hit_group: u32) -> Result<BlasId<A>> {
        if meshes.is_empty() {
            return Err(Error::InvalidGeometry("an object needs at least one mesh".to_owned()).into());
        }
        let mut blas = BottomLevelAccelerationStructure::new();
        for mesh in meshes {
            blas.add_object(mesh)?;
        }
        blas.set_hit_group(hit_group);
        Ok(self.blases.insert(blas))
    }

    /// Place another instance of an object in the scene.
    /// # Errors
    /// Fails with [`Error::StaleHandle`] if the object was removed.
    pub fn add_transform(&mut self, id: BlasId<A>, transform: Mat4) -> Result<()> {
        self.blas_mut(id)?.add_transform(transform);
        Ok(())
    }

    /// Change the hit group of every instance of an object.
    pub fn set_hit_group(&mut self, id: BlasId<A>, hit_group: u32) -> Result<()> {
        self.blas_mut(id)?.set_hit_group(hit_group);
        Ok(())
    }

    /// Access the bottom level structure of an object.
    pub fn blas(&self, id: BlasId<A>) -> Result<&BottomLevelAccelerationStructure<A>> {
        Ok(self.blases.get(id).ok_or(Error::StaleHandle)?)
    }

    /// Mutable access to the bottom level structure of an object, for example to move its instances before an update.
    pub fn blas_mut(&mut self, id: BlasId<A>) -> Result<&mut BottomLevelAccelerationStructure<A>> {
        Ok(self.blases.get_mut(id).ok_or(Error::StaleHandle)?)
    }

    /// Destroy the bottom level structure of an object and forget it. The top level structure keeps referring to it
    /// until the next full [`generate`](Self::generate).
    /// # Errors
    /// Fails with [`Error::StaleHandle`] if the object was already removed.
    pub fn remove_object(&mut self, id: BlasId<A>) -> Result<()> {
        let mut blas = self.blases.remove(id).ok_or(Error::StaleHandle)?;
        blas.destroy(&self.fns, &mut self.allocator)
    }

    /// Number of registered objects
    pub fn num_objects(&self) -> usize {
        self.blases.len()
    }

    /// Number of instances over all objects
    pub fn num_transforms(&self) -> usize {
        self.blases.iter().map(|(_, blas)| blas.transforms().len()).sum()
    }

    /// Record the builds of every structure into `cmd`.
    ///
    /// A full build (`update_only == false`) destroys the structures of a previous build, then creates and builds
    /// every bottom level structure and the top level structure. An update refits all structures in place from their
    /// current transforms. It requires a previous full build with update support and an unchanged number of instances.
    ///
    /// `submit` is called once all commands are recorded. It must submit `cmd` and wait for it to complete, since the
    /// scratch buffer is destroyed right after. It is not called if recording fails, `cmd` must be discarded then.
    /// # Errors
    /// Any failing step aborts the whole call. Structures built before the failure are left as they are.
    pub fn generate<C: CommandRecorder>(&mut self, cmd: &mut C, update_only: bool, submit: impl FnOnce(&mut C) -> Result<()>) -> Result<()> {
        let mut scratch = None;
        let recorded = if update_only {
            self.record_update(cmd, &mut scratch)
        } else {
            self.record_build(cmd, &mut scratch)
        };
        let result = recorded.and_then(|_| submit(cmd));

        let cleanup = match scratch {
            Some(buffer) => self.allocator.destroy_buffer(buffer),
            None => Ok(()),
        };
        result?;
        cleanup?;

        info!(
            "{} {} bottom level acceleration structure(s) and a top level structure with {} instance(s) using {} bytes of scratch memory",
            if update_only {
                "Updated"
            } else {
                "Built"
            },
            self.blases.len(),
            self.tlas.num_instances(),
            self.scratch_size
        );
        Ok(())
    }

    fn record_build<C: CommandRecorder>(&mut self, cmd: &mut C, scratch: &mut Option<Buffer<A>>) -> Result<()> {
        self.destroy_structures()?;

        let mut scratch_size = 0;
        for blas in self.blases.values_mut() {
            blas.create(&self.fns, self.settings.bottom_level_flags, self.settings.allow_update)?;
            scratch_size = scratch_size.max(blas.compute_buffer_sizes(&self.fns, &mut self.allocator)?);
        }
        if !self.blases.is_empty() {
            self.allocate_scratch(scratch, scratch_size)?;
            let buffer = scratch.as_ref().ok_or(Error::SizesNotComputed)?;
            for blas in self.blases.values_mut() {
                blas.generate(&self.fns, cmd, buffer, 0, false)?;
            }
        }

        let instances = self.collect_instances();
        self.tlas.set_instances(instances)?;
        self.tlas.create(&self.fns, self.settings.top_level_flags, self.settings.allow_update)?;
        let tlas_scratch_size = self.tlas.compute_buffer_sizes(&self.fns, &mut self.allocator)?;
        if scratch.is_none() || tlas_scratch_size > scratch_size {
            debug!("Top level acceleration structure needs {tlas_scratch_size} bytes of scratch memory, bottom level builds used {scratch_size} bytes");
            if let Some(buffer) = scratch.take() {
                self.allocator.destroy_buffer(buffer)?;
            }
            self.allocate_scratch(scratch, tlas_scratch_size)?;
        }

        let buffer = scratch.as_ref().ok_or(Error::SizesNotComputed)?;
        self.tlas.generate(&self.fns, &mut self.allocator, cmd, buffer, 0, false)
    }

    fn record_update<C: CommandRecorder>(&mut self, cmd: &mut C, scratch: &mut Option<Buffer<A>>) -> Result<()> {
        if !self.settings.allow_update {
            return Err(Error::UpdateNotAllowed.into());
        }
        if !self.tlas.is_built() {
            return Err(Error::NeverBuilt.into());
        }

        let instances = self.collect_instances();
        self.tlas.set_instances(instances)?;

        let scratch_size = self
            .blases
            .iter()
            .filter_map(|(_, blas)| blas.sizes())
            .chain(self.tlas.sizes())
            .map(|sizes| sizes.scratch_size())
            .max()
            .unwrap_or_default();
        self.allocate_scratch(scratch, scratch_size)?;
        let buffer = scratch.as_ref().ok_or(Error::SizesNotComputed)?;

        for blas in self.blases.values_mut() {
            blas.generate(&self.fns, cmd, buffer, 0, true)?;
        }
        self.tlas.generate(&self.fns, &mut self.allocator, cmd, buffer, 0, true)
    }

    /// Builds are recorded even if the driver reports no scratch memory, so the buffer is never empty.
    fn allocate_scratch(&mut self, scratch: &mut Option<Buffer<A>>, size: vk::DeviceSize) -> Result<()> {
        self.scratch_size = size;
        *scratch = Some(self.allocator.create_buffer(
            "scratch",
            size.max(1),
            vk::BufferUsageFlags::RAY_TRACING_NV,
            MemoryType::GpuOnly,
        )?);
        Ok(())
    }

    /// One instance per transform, with sequential instance ids in object order.
    fn collect_instances(&self) -> Vec<Instance> {
        self.blases
            .iter()
            .flat_map(|(_, blas)| {
                blas.transforms()
                    .iter()
                    .map(move |transform| (blas.handle(), blas.hit_group(), *transform))
            })
            .enumerate()
            .map(|(instance_id, (handle, hit_group, transform))| {
                Instance::new(handle, transform, instance_id as u32, hit_group)
                    .mask(self.settings.instance_mask)
                    .flags(self.settings.instance_flags)
            })
            .collect()
    }

    fn destroy_structures(&mut self) -> Result<()> {
        self.tlas.destroy(&self.fns, &mut self.allocator)?;
        for blas in self.blases.values_mut() {
            blas.destroy(&self.fns, &mut self.allocator)?;
        }
        Ok(())
    }

    /// Destroy the top level structure, then every bottom level structure, and forget all objects.
    pub fn destroy(&mut self) -> Result<()> {
        self.destroy_structures()?;
        self.blases.drain();
        self.scratch_size = 0;
        Ok(())
    }

    /// Raw handle of the top level structure, to be written into the descriptor set of the ray tracing pipeline.
    /// Null before the first build.
    pub fn get_tlas(&self) -> vk::AccelerationStructureNV {
        self.tlas.handle()
    }

    /// The top level structure
    pub fn tlas(&self) -> &TopLevelAccelerationStructure<A> {
        &self.tlas
    }

    /// Size of the scratch buffer used by the last call to [`generate`](Self::generate)
    pub fn scratch_size(&self) -> vk::DeviceSize {
        self.scratch_size
    }

    /// Settings used for every build
    pub fn settings(&self) -> &AccelerationStructureSettings {
        &self.settings
    }

    /// The device functions used by this manager
    pub fn functions(&self) -> &F {
        &self.fns
    }

    /// The allocator used by this manager
    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}
