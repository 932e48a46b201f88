//! Exposes the error type returned by all acceleration structure operations

use std::ffi::NulError;
use std::sync::PoisonError;

use ash::vk;
use gpu_allocator::AllocationError;
use thiserror::Error;

use crate::core::device::ExtensionID;

/// Error type that can be returned. Functions return an [`anyhow::Result`], use
/// `err.downcast_ref::<Error>()` to inspect the reason of a failure.
#[derive(Error, Debug)]
pub enum Error {
    /// Could not convert rust string to C-String because it has null bytes
    #[error("Invalid C string")]
    InvalidString(NulError),
    /// Generic Vulkan error type.
    #[error("Vulkan error: `{0}`")]
    VkError(vk::Result),
    /// Vulkan allocation error.
    #[error("Vulkan allocation error: `{0}`")]
    AllocationError(AllocationError),
    /// Poisoned mutex
    #[error("Poisoned mutex")]
    PoisonError,
    /// Mappable buffer expected
    #[error("Requested mappable buffer, but buffer does not have a memory map")]
    UnmappableBuffer,
    /// Tried to write more data into a buffer than it can hold.
    #[error("Cannot write {size} bytes into a buffer of {capacity} bytes")]
    BufferOverflow {
        /// Number of bytes that were written
        size: vk::DeviceSize,
        /// Size of the buffer
        capacity: vk::DeviceSize,
    },
    /// Function call requires extension to be enabled, but this extension was not requested or not available.
    #[error("Extension {0} required for this feature, but not enabled.")]
    ExtensionNotSupported(ExtensionID),
    /// A device entry point could not be resolved.
    #[error("Device function `{0}` could not be loaded.")]
    MissingEntryPoint(String),
    /// None of the candidate formats support the requested usage.
    #[error("None of the formats {0:?} support the requested usage.")]
    NoSupportedFormat(Vec<vk::Format>),
    /// Geometry could not be converted to an acceleration structure geometry.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
    /// Geometry or instances were added to an acceleration structure after its creation.
    #[error("Cannot add geometry or instances to an acceleration structure that was already created.")]
    GeometryFrozen,
    /// `create()` was called twice without a `destroy()` in between.
    #[error("Acceleration structure was already created.")]
    AlreadyCreated,
    /// Operation requires a created acceleration structure.
    #[error("Acceleration structure was not created yet.")]
    NotCreated,
    /// `generate()` was called before the buffer sizes were computed.
    #[error("Buffer sizes must be computed before generating the acceleration structure.")]
    SizesNotComputed,
    /// Update requested on an acceleration structure created without update support.
    #[error("Acceleration structure was not created with update support.")]
    UpdateNotAllowed,
    /// Update requested on an acceleration structure that was never built.
    #[error("Cannot update an acceleration structure that was never built.")]
    NeverBuilt,
    /// Update requested with a different instance count than the last build.
    #[error("Instance count changed from {built} to {requested}, a full rebuild is required.")]
    InstanceCountMismatch {
        /// Instance count of the last full build
        built: u32,
        /// Instance count of the update
        requested: u32,
    },
    /// Instance refers to an acceleration structure that was not built or was destroyed.
    #[error("Instance refers to a null acceleration structure handle.")]
    NullAccelerationStructure,
    /// Handle refers to an object that was removed.
    #[error("Handle refers to an object that no longer exists.")]
    StaleHandle,
}

impl From<NulError> for Error {
    fn from(value: NulError) -> Self {
        Error::InvalidString(value)
    }
}

impl From<vk::Result> for Error {
    fn from(value: vk::Result) -> Self {
        Error::VkError(value)
    }
}

impl From<AllocationError> for Error {
    fn from(value: AllocationError) -> Self {
        Error::AllocationError(value)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}
