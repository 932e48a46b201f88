#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::ffi::{c_void, CStr};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};

use anyhow::{bail, Result};
use ash::vk;
use ash::vk::Handle;

use vk_accel::{
    AccelerationStructureInfo, AccelerationStructureType, Allocation, Allocator, BottomLevelAccelerationStructure, Buffer, BuildCommand,
    CommandRecorder, Error, FormatSupport, ImageFunctions, IndexData, MemoryType, PipelineStage, ProcAddrResolver, RayTracingFunctions, TriangleMesh,
    VertexData,
};

/// Everything the mocks observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateStructure {
        handle: u64,
        ty: AccelerationStructureType,
        geometry_count: u32,
        instance_count: u32,
        allow_update: bool,
    },
    DestroyStructure(u64),
    BindMemory {
        handle: u64,
        memory: u64,
    },
    Build {
        dst: u64,
        src: u64,
        update: bool,
        instance_data: u64,
        instance_count: u32,
        scratch: u64,
        scratch_offset: u64,
    },
    MemoryBarrier {
        src_stage: PipelineStage,
        src_access: vk::AccessFlags2,
        dst_stage: PipelineStage,
        dst_access: vk::AccessFlags2,
    },
    ImageBarrier {
        image: u64,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
    Allocate {
        id: u64,
        name: String,
        size: u64,
        ty: MemoryType,
    },
    Free(u64),
    CreateBuffer {
        handle: u64,
        name: String,
        size: u64,
        ty: MemoryType,
    },
    DestroyBuffer(u64),
    CopyToBuffer {
        handle: u64,
        data: Vec<u8>,
    },
    CreateImage {
        handle: u64,
        format: vk::Format,
        width: u32,
        height: u32,
        usage: vk::ImageUsageFlags,
    },
    BindImageMemory {
        image: u64,
        memory: u64,
    },
    CreateImageView {
        handle: u64,
        image: u64,
    },
    DestroyImageView(u64),
    DestroyImage(u64),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

static LOGGER: Once = Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = pretty_env_logger::try_init();
    });
}

/// Shared state of one mocked device
#[derive(Clone, Default)]
pub struct Context {
    pub log: EventLog,
    pub ids: Arc<AtomicU64>,
    pub fns: MockFunctions,
    pub allocator: MockAllocator,
    pub cmd: MockRecorder,
}

pub fn make_context() -> Context {
    init_logging();
    let log = EventLog::default();
    let ids = Arc::new(AtomicU64::new(1));
    Context {
        fns: MockFunctions::new(log.clone(), ids.clone()),
        allocator: MockAllocator::new(log.clone(), ids.clone()),
        cmd: MockRecorder::new(log.clone()),
        ids,
        log,
    }
}

impl Context {
    pub fn events(&self) -> Vec<Event> {
        self.log.lock().expect("Event log is not poisoned").clone()
    }

    pub fn clear_events(&self) {
        self.log.lock().expect("Event log is not poisoned").clear();
    }

    pub fn builds(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Build { .. }))
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

#[derive(Debug, Clone)]
struct StructureState {
    ty: AccelerationStructureType,
    primitives: u64,
    geometries: u64,
    built: bool,
    bound: bool,
}

/// Fake `VK_NV_ray_tracing` driver. Sizes are derived from the structure contents:
/// * bottom level: 1024 bytes per geometry, build scratch given by [`MockFunctions::set_blas_scratch`] per triangle
///   (256 bytes by default), update scratch of half that.
/// * top level: 4096 bytes, scratch given by [`MockFunctions::set_tlas_scratch`] (128 bytes by default).
#[derive(Clone)]
pub struct MockFunctions {
    log: EventLog,
    ids: Arc<AtomicU64>,
    structures: Arc<Mutex<HashMap<u64, StructureState>>>,
    tlas_scratch: Arc<AtomicU64>,
    blas_scratch: Arc<AtomicU64>,
}

impl Default for MockFunctions {
    fn default() -> Self {
        Self::new(EventLog::default(), Arc::new(AtomicU64::new(1)))
    }
}

impl MockFunctions {
    pub fn new(log: EventLog, ids: Arc<AtomicU64>) -> Self {
        Self {
            log,
            ids,
            structures: Default::default(),
            tlas_scratch: Arc::new(AtomicU64::new(128)),
            blas_scratch: Arc::new(AtomicU64::new(256)),
        }
    }

    pub fn set_tlas_scratch(&self, size: u64) {
        self.tlas_scratch.store(size, Ordering::SeqCst);
    }

    pub fn set_blas_scratch(&self, per_triangle: u64) {
        self.blas_scratch.store(per_triangle, Ordering::SeqCst);
    }

    /// Handles of every structure that was created and not yet destroyed
    pub fn live_structures(&self) -> Vec<u64> {
        self.structures.lock().expect("Not poisoned").keys().copied().collect()
    }

    /// The opaque reference the driver hands out for a structure
    pub fn reference_of(handle: vk::AccelerationStructureNV) -> u64 {
        0xA5A5_0000_0000_0000 | handle.as_raw()
    }

    fn push(&self, event: Event) {
        self.log.lock().expect("Not poisoned").push(event);
    }
}

impl RayTracingFunctions for MockFunctions {
    fn create_acceleration_structure(&self, info: &AccelerationStructureInfo) -> Result<vk::AccelerationStructureNV> {
        let raw = self.ids.fetch_add(1, Ordering::SeqCst);
        let primitives = info.geometries.iter().map(|g| g.primitive_count() as u64).sum();
        self.structures.lock().expect("Not poisoned").insert(
            raw,
            StructureState {
                ty: info.ty,
                primitives,
                geometries: info.geometries.len() as u64,
                built: false,
                bound: false,
            },
        );
        self.push(Event::CreateStructure {
            handle: raw,
            ty: info.ty,
            geometry_count: info.geometry_count(),
            instance_count: info.instance_count,
            allow_update: info.allows_update(),
        });
        Ok(vk::AccelerationStructureNV::from_raw(raw))
    }

    fn destroy_acceleration_structure(&self, handle: vk::AccelerationStructureNV) {
        self.structures.lock().expect("Not poisoned").remove(&handle.as_raw());
        self.push(Event::DestroyStructure(handle.as_raw()));
    }

    fn memory_requirements(&self, handle: vk::AccelerationStructureNV, ty: vk::AccelerationStructureMemoryRequirementsTypeNV) -> vk::MemoryRequirements {
        let blas_scratch = self.blas_scratch.load(Ordering::SeqCst);
        let structures = self.structures.lock().expect("Not poisoned");
        let state = structures.get(&handle.as_raw()).expect("Memory requirements of a live structure");
        let size = match (state.ty, ty) {
            (AccelerationStructureType::BottomLevel, vk::AccelerationStructureMemoryRequirementsTypeNV::OBJECT) => 1024 * state.geometries.max(1),
            (AccelerationStructureType::BottomLevel, vk::AccelerationStructureMemoryRequirementsTypeNV::BUILD_SCRATCH) => blas_scratch * state.primitives,
            (AccelerationStructureType::BottomLevel, _) => blas_scratch / 2 * state.primitives,
            (AccelerationStructureType::TopLevel, vk::AccelerationStructureMemoryRequirementsTypeNV::OBJECT) => 4096,
            (AccelerationStructureType::TopLevel, _) => self.tlas_scratch.load(Ordering::SeqCst),
        };
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: 1,
        }
    }

    fn bind_memory(&self, handle: vk::AccelerationStructureNV, memory: vk::DeviceMemory, _offset: vk::DeviceSize) -> Result<()> {
        let mut structures = self.structures.lock().expect("Not poisoned");
        let Some(state) = structures.get_mut(&handle.as_raw()) else {
            bail!(Error::VkError(vk::Result::ERROR_INITIALIZATION_FAILED));
        };
        if state.bound {
            bail!("memory bound twice to {:#x}", handle.as_raw());
        }
        state.bound = true;
        drop(structures);
        self.push(Event::BindMemory {
            handle: handle.as_raw(),
            memory: memory.as_raw(),
        });
        Ok(())
    }

    fn cmd_build_acceleration_structure(&self, _cmd: vk::CommandBuffer, build: &BuildCommand) {
        if let Some(state) = self.structures.lock().expect("Not poisoned").get_mut(&build.dst.as_raw()) {
            state.built = true;
        }
        self.push(Event::Build {
            dst: build.dst.as_raw(),
            src: build.src.as_raw(),
            update: build.update,
            instance_data: build.instance_data.as_raw(),
            instance_count: build.info.instance_count,
            scratch: build.scratch.as_raw(),
            scratch_offset: build.scratch_offset,
        });
    }

    fn acceleration_structure_handle(&self, handle: vk::AccelerationStructureNV) -> Result<u64> {
        if handle == vk::AccelerationStructureNV::null() {
            bail!(Error::NullAccelerationStructure);
        }
        match self.structures.lock().expect("Not poisoned").get(&handle.as_raw()) {
            Some(state) if state.built => Ok(Self::reference_of(handle)),
            _ => bail!(Error::VkError(vk::Result::ERROR_INITIALIZATION_FAILED)),
        }
    }
}

#[derive(Debug)]
pub struct MockAllocation {
    id: u64,
    size: u64,
}

impl Allocation for MockAllocation {
    unsafe fn memory(&self) -> vk::DeviceMemory {
        vk::DeviceMemory::from_raw(self.id)
    }

    fn offset(&self) -> vk::DeviceSize {
        0
    }

    fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        None
    }
}

/// Allocator that hands out fake memory and keeps track of what is still alive.
#[derive(Clone)]
pub struct MockAllocator {
    log: EventLog,
    ids: Arc<AtomicU64>,
    live_memory: Arc<Mutex<HashSet<u64>>>,
    live_buffers: Arc<Mutex<HashSet<u64>>>,
}

impl Default for MockAllocator {
    fn default() -> Self {
        Self::new(EventLog::default(), Arc::new(AtomicU64::new(1)))
    }
}

impl MockAllocator {
    pub fn new(log: EventLog, ids: Arc<AtomicU64>) -> Self {
        Self {
            log,
            ids,
            live_memory: Default::default(),
            live_buffers: Default::default(),
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.live_memory.lock().expect("Not poisoned").len()
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.lock().expect("Not poisoned").len()
    }

    fn push(&self, event: Event) {
        self.log.lock().expect("Not poisoned").push(event);
    }
}

impl Allocator for MockAllocator {
    type Allocation = MockAllocation;

    fn allocate(&mut self, name: &str, requirements: &vk::MemoryRequirements, ty: MemoryType) -> Result<Self::Allocation> {
        if requirements.size == 0 {
            bail!("zero sized allocation `{name}`");
        }
        let id = self.ids.fetch_add(1, Ordering::SeqCst);
        self.live_memory.lock().expect("Not poisoned").insert(id);
        self.push(Event::Allocate {
            id,
            name: name.to_owned(),
            size: requirements.size,
            ty,
        });
        Ok(MockAllocation {
            id,
            size: requirements.size,
        })
    }

    fn free(&mut self, allocation: Self::Allocation) -> Result<()> {
        if !self.live_memory.lock().expect("Not poisoned").remove(&allocation.id) {
            bail!("double free of allocation {}", allocation.id);
        }
        self.push(Event::Free(allocation.id));
        Ok(())
    }

    fn create_buffer(&mut self, name: &str, size: vk::DeviceSize, usage: vk::BufferUsageFlags, ty: MemoryType) -> Result<Buffer<Self>> {
        if size == 0 {
            bail!("zero sized buffer `{name}`");
        }
        let memory = self.allocate(
            name,
            &vk::MemoryRequirements {
                size,
                alignment: 1,
                memory_type_bits: 1,
            },
            ty,
        )?;
        let handle = self.ids.fetch_add(1, Ordering::SeqCst);
        self.live_buffers.lock().expect("Not poisoned").insert(handle);
        self.push(Event::CreateBuffer {
            handle,
            name: name.to_owned(),
            size,
            ty,
        });
        Ok(Buffer::from_raw_parts(vk::Buffer::from_raw(handle), memory, size, usage))
    }

    fn destroy_buffer(&mut self, buffer: Buffer<Self>) -> Result<()> {
        let (handle, memory) = buffer.into_raw_parts();
        if !self.live_buffers.lock().expect("Not poisoned").remove(&handle.as_raw()) {
            bail!("double destroy of buffer {}", handle.as_raw());
        }
        self.push(Event::DestroyBuffer(handle.as_raw()));
        self.free(memory)
    }

    fn copy_to_buffer(&mut self, buffer: &Buffer<Self>, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            bail!("zero sized copy");
        }
        buffer.check_range(0, data.len() as u64)?;
        self.push(Event::CopyToBuffer {
            handle: unsafe { buffer.handle().as_raw() },
            data: data.to_vec(),
        });
        Ok(())
    }
}

/// Command buffer that only records barriers. Build commands are recorded by [`MockFunctions`] into the same log.
#[derive(Clone, Default)]
pub struct MockRecorder {
    log: EventLog,
}

impl MockRecorder {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
        }
    }
}

impl CommandRecorder for MockRecorder {
    fn handle(&self) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(0xC0FFEE)
    }

    fn memory_barrier(&mut self, src_stage: PipelineStage, src_access: vk::AccessFlags2, dst_stage: PipelineStage, dst_access: vk::AccessFlags2) {
        self.log.lock().expect("Not poisoned").push(Event::MemoryBarrier {
            src_stage,
            src_access,
            dst_stage,
            dst_access,
        });
    }

    fn image_barrier(
        &mut self,
        image: vk::Image,
        _range: vk::ImageSubresourceRange,
        _src_stage: PipelineStage,
        _dst_stage: PipelineStage,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
        _src_access: vk::AccessFlags2,
        _dst_access: vk::AccessFlags2,
    ) {
        self.log.lock().expect("Not poisoned").push(Event::ImageBarrier {
            image: image.as_raw(),
            from,
            to,
        });
    }
}

/// Resolves every name except the ones listed
pub struct MockResolver {
    pub missing: Vec<&'static str>,
}

unsafe extern "system" fn noop() {}

impl ProcAddrResolver for MockResolver {
    fn device(&self) -> vk::Device {
        vk::Device::from_raw(0xD)
    }

    fn resolve(&self, name: &CStr) -> vk::PFN_vkVoidFunction {
        let name = name.to_str().ok()?;
        if self.missing.contains(&name) {
            None
        } else {
            Some(noop)
        }
    }
}

/// Reports fixed features per format
#[derive(Clone, Default)]
pub struct MockFormats {
    pub supported: HashMap<vk::Format, vk::FormatProperties>,
}

impl FormatSupport for MockFormats {
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        self.supported.get(&format).copied().unwrap_or_default()
    }
}

/// Fake image functions. Image memory is 4 bytes per texel.
#[derive(Clone)]
pub struct MockImages {
    log: EventLog,
    ids: Arc<AtomicU64>,
    formats: MockFormats,
    live_images: Arc<Mutex<HashSet<u64>>>,
    live_views: Arc<Mutex<HashSet<u64>>>,
    pub fail_view: bool,
}

impl MockImages {
    pub fn new(ctx: &Context, formats: MockFormats) -> Self {
        Self {
            log: ctx.log.clone(),
            ids: ctx.ids.clone(),
            formats,
            live_images: Default::default(),
            live_views: Default::default(),
            fail_view: false,
        }
    }

    pub fn live_images(&self) -> usize {
        self.live_images.lock().expect("Not poisoned").len()
    }

    pub fn live_views(&self) -> usize {
        self.live_views.lock().expect("Not poisoned").len()
    }

    fn push(&self, event: Event) {
        self.log.lock().expect("Not poisoned").push(event);
    }
}

impl FormatSupport for MockImages {
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        self.formats.format_properties(format)
    }
}

impl ImageFunctions for MockImages {
    fn create_image(&self, info: &vk::ImageCreateInfo) -> Result<vk::Image> {
        let handle = self.ids.fetch_add(1, Ordering::SeqCst);
        self.live_images.lock().expect("Not poisoned").insert(handle);
        self.push(Event::CreateImage {
            handle,
            format: info.format,
            width: info.extent.width,
            height: info.extent.height,
            usage: info.usage,
        });
        Ok(vk::Image::from_raw(handle))
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        let size = self
            .log
            .lock()
            .expect("Not poisoned")
            .iter()
            .rev()
            .find_map(|e| match e {
                Event::CreateImage { width, height, .. } => Some(*width as u64 * *height as u64 * 4),
                _ => None,
            })
            .unwrap_or_default();
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: 1,
        }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, _offset: vk::DeviceSize) -> Result<()> {
        self.push(Event::BindImageMemory {
            image: image.as_raw(),
            memory: memory.as_raw(),
        });
        Ok(())
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView> {
        if self.fail_view {
            bail!(Error::VkError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let handle = self.ids.fetch_add(1, Ordering::SeqCst);
        self.live_views.lock().expect("Not poisoned").insert(handle);
        self.push(Event::CreateImageView {
            handle,
            image: info.image.as_raw(),
        });
        Ok(vk::ImageView::from_raw(handle))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.live_views.lock().expect("Not poisoned").remove(&view.as_raw());
        self.push(Event::DestroyImageView(view.as_raw()));
    }

    fn destroy_image(&self, image: vk::Image) {
        self.live_images.lock().expect("Not poisoned").remove(&image.as_raw());
        self.push(Event::DestroyImage(image.as_raw()));
    }
}

/// An unindexed mesh of `triangles` triangles in a fake vertex buffer
pub fn triangles(triangles: u32) -> TriangleMesh {
    TriangleMesh {
        vertices: VertexData {
            buffer: vk::Buffer::from_raw(0xBEEF),
            offset: 0,
            count: triangles * 3,
            stride: 12,
            format: vk::Format::R32G32B32_SFLOAT,
        },
        indices: None,
        opaque: true,
    }
}

/// An indexed mesh with `triangles` triangles and 16-bit indices
pub fn indexed(triangles: u32) -> TriangleMesh {
    TriangleMesh {
        vertices: VertexData {
            buffer: vk::Buffer::from_raw(0xBEEF),
            offset: 0,
            count: 4,
            stride: 16,
            format: vk::Format::R32G32B32_SFLOAT,
        },
        indices: Some(IndexData {
            buffer: vk::Buffer::from_raw(0xFEED),
            offset: 0,
            count: triangles * 3,
            ty: vk::IndexType::UINT16,
        }),
        opaque: false,
    }
}

/// Extract the typed error from an `anyhow` error
pub fn error_of<T: std::fmt::Debug>(result: Result<T>) -> Error {
    let err = result.expect_err("Operation should fail");
    match err.downcast::<Error>() {
        Ok(err) => err,
        Err(err) => panic!("Expected a vk_accel::Error, got {err:?}"),
    }
}

/// A bottom level structure over one mesh of `count` triangles that went through its full build.
/// The scratch buffer used for the build is destroyed again.
pub fn built_blas(ctx: &mut Context, count: u32) -> Result<BottomLevelAccelerationStructure<MockAllocator>> {
    let mut blas = BottomLevelAccelerationStructure::new();
    blas.add_object(&triangles(count))?;
    blas.create(&ctx.fns, vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE, true)?;
    let size = blas.compute_buffer_sizes(&ctx.fns, &mut ctx.allocator)?;
    let scratch = ctx
        .allocator
        .create_buffer("scratch", size, vk::BufferUsageFlags::RAY_TRACING_NV, MemoryType::GpuOnly)?;
    blas.generate(&ctx.fns, &mut ctx.cmd, &scratch, 0, false)?;
    ctx.allocator.destroy_buffer(scratch)?;
    Ok(blas)
}

pub fn scratch_buffer(ctx: &mut Context, size: u64) -> Result<Buffer<MockAllocator>> {
    ctx.allocator
        .create_buffer("scratch", size, vk::BufferUsageFlags::RAY_TRACING_NV, MemoryType::GpuOnly)
}
