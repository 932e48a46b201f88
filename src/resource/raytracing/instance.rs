//! Instances of bottom level structures and their packed 64-byte records.
//!
//! The record layout is consumed directly by the device, so it is written field by field into a byte
//! array instead of relying on the layout of a Rust struct:
//!
//! | bytes   | contents                                                  |
//! |---------|-----------------------------------------------------------|
//! | 0..48   | 3x4 row-major transform, 12 little-endian `f32`            |
//! | 48..52  | instance id (bits 0..24), mask (bits 24..32)               |
//! | 52..56  | hit group id (bits 0..24), instance flags (bits 24..32)    |
//! | 56..64  | handle of the referenced bottom level structure            |

use anyhow::Result;
use ash::vk;
use glam::Mat4;

use crate::util::transform::TransformMatrix;
use crate::RayTracingFunctions;

/// Size in bytes of a packed instance record
pub const INSTANCE_DESCRIPTOR_SIZE: usize = 64;

const_assert_eq!(std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(), INSTANCE_DESCRIPTOR_SIZE);

const MAX_24_BIT: u32 = 0x00FF_FFFF;

/// A placed reference to a bottom level acceleration structure. The referenced structure is not owned,
/// its handle is resolved when the instance is packed.
#[derive(Debug, Copy, Clone)]
pub struct Instance {
    /// Referenced bottom level structure
    pub blas: vk::AccelerationStructureNV,
    /// World transform
    pub transform: Mat4,
    /// Custom index visible to shaders, 24 bits
    pub instance_id: u32,
    /// Hit group offset into the shader binding table, 24 bits
    pub hit_group_id: u32,
    /// Visibility mask
    pub mask: u8,
    /// Instance flags
    pub flags: vk::GeometryInstanceFlagsKHR,
}

impl Instance {
    /// Create an instance with a full visibility mask and back-face culling disabled
    pub fn new(blas: vk::AccelerationStructureNV, transform: Mat4, instance_id: u32, hit_group_id: u32) -> Self {
        Self {
            blas,
            transform,
            instance_id,
            hit_group_id,
            mask: 0xFF,
            flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
        }
    }

    /// Set the visibility mask
    pub fn mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    /// Set the instance flags
    pub fn flags(mut self, flags: vk::GeometryInstanceFlagsKHR) -> Self {
        self.flags = flags;
        self
    }
}

/// An instance of nothing yet: null structure handle, identity transform, id and hit group 0.
impl Default for Instance {
    fn default() -> Self {
        Self::new(vk::AccelerationStructureNV::null(), Mat4::IDENTITY, 0, 0)
    }
}

/// The decoded contents of a packed instance record
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct InstanceDescriptor {
    /// Top three rows of the transform, row-major
    pub transform: [f32; 12],
    /// Custom index, 24 bits
    pub instance_id: u32,
    /// Visibility mask
    pub mask: u8,
    /// Hit group offset, 24 bits
    pub hit_group_id: u32,
    /// Instance flags
    pub flags: u8,
    /// Opaque handle of the referenced bottom level structure
    pub acceleration_structure_handle: u64,
}

fn pack_24_8(low: u32, high: u8) -> u32 {
    (low & MAX_24_BIT) | ((high as u32) << 24)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

impl InstanceDescriptor {
    /// Resolve the handle of the referenced structure and build the record for an instance.
    /// # Errors
    /// Fails if the referenced structure was never built or was destroyed.
    pub fn pack<F: RayTracingFunctions>(fns: &F, instance: &Instance) -> Result<Self> {
        if instance.instance_id > MAX_24_BIT || instance.hit_group_id > MAX_24_BIT {
            warn!(
                "Instance id {} or hit group {} exceeds 24 bits and will be truncated",
                instance.instance_id, instance.hit_group_id
            );
        }
        let acceleration_structure_handle = fns.acceleration_structure_handle(instance.blas)?;
        Ok(Self {
            transform: *TransformMatrix::from_mat4(&instance.transform).elements(),
            instance_id: instance.instance_id & MAX_24_BIT,
            mask: instance.mask,
            hit_group_id: instance.hit_group_id & MAX_24_BIT,
            flags: instance.flags.as_raw() as u8,
            acceleration_structure_handle,
        })
    }

    /// Encode the record in the layout the device reads
    pub fn to_bytes(&self) -> [u8; INSTANCE_DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; INSTANCE_DESCRIPTOR_SIZE];
        for (i, value) in self.transform.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        bytes[48..52].copy_from_slice(&pack_24_8(self.instance_id, self.mask).to_le_bytes());
        bytes[52..56].copy_from_slice(&pack_24_8(self.hit_group_id, self.flags).to_le_bytes());
        bytes[56..64].copy_from_slice(&self.acceleration_structure_handle.to_le_bytes());
        bytes
    }

    /// Decode a record
    pub fn from_bytes(bytes: &[u8; INSTANCE_DESCRIPTOR_SIZE]) -> Self {
        let mut transform = [0.0f32; 12];
        for (i, value) in transform.iter_mut().enumerate() {
            *value = f32::from_bits(read_u32(bytes, i * 4));
        }
        let id_and_mask = read_u32(bytes, 48);
        let hit_group_and_flags = read_u32(bytes, 52);
        let mut handle = [0u8; 8];
        handle.copy_from_slice(&bytes[56..64]);
        Self {
            transform,
            instance_id: id_and_mask & MAX_24_BIT,
            mask: (id_and_mask >> 24) as u8,
            hit_group_id: hit_group_and_flags & MAX_24_BIT,
            flags: (hit_group_and_flags >> 24) as u8,
            acceleration_structure_handle: u64::from_le_bytes(handle),
        }
    }
}

/// Pack all instances into one contiguous byte array of `instances.len() * 64` bytes.
pub fn pack_instances<F: RayTracingFunctions>(fns: &F, instances: &[Instance]) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(instances.len() * INSTANCE_DESCRIPTOR_SIZE);
    for instance in instances {
        data.extend_from_slice(&InstanceDescriptor::pack(fns, instance)?.to_bytes());
    }
    Ok(data)
}
