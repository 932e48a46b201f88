//! Converts application meshes into acceleration structure geometry.
//!
//! # Example
//! ```
//! # use vk_accel::prelude::*;
//! # fn convert(vertex_buffer: vk::Buffer) -> anyhow::Result<()> {
//! let mesh = TriangleMesh {
//!     vertices: VertexData {
//!         buffer: vertex_buffer,
//!         offset: 0,
//!         count: 3,
//!         stride: 12,
//!         format: vk::Format::R32G32B32_SFLOAT,
//!     },
//!     indices: None,
//!     opaque: true,
//! };
//! let geometry = Geometry::from_mesh(&mesh)?;
//! assert_eq!(geometry.primitive_count(), 1);
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use ash::vk;

use crate::util::to_vk::AsVulkanType;
use crate::Error;

/// Vertex positions of a mesh
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VertexData {
    /// Buffer holding the vertices
    pub buffer: vk::Buffer,
    /// Byte offset of the first vertex
    pub offset: vk::DeviceSize,
    /// Number of vertices
    pub count: u32,
    /// Distance in bytes between two vertices
    pub stride: vk::DeviceSize,
    /// Format of the position attribute
    pub format: vk::Format,
}

/// Index buffer of a mesh
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IndexData {
    /// Buffer holding the indices
    pub buffer: vk::Buffer,
    /// Byte offset of the first index
    pub offset: vk::DeviceSize,
    /// Number of indices
    pub count: u32,
    /// Width of a single index
    pub ty: vk::IndexType,
}

/// A triangle mesh as supplied by the application
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TriangleMesh {
    /// Vertex buffer
    pub vertices: VertexData,
    /// Optional index buffer. Without one, every three consecutive vertices form a triangle.
    pub indices: Option<IndexData>,
    /// Opaque geometry never invokes any-hit shaders
    pub opaque: bool,
}

/// Triangle geometry ready to be placed in a bottom level acceleration structure. Immutable once created.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    vertices: VertexData,
    indices: Option<IndexData>,
    flags: vk::GeometryFlagsKHR,
}

/// Size in bytes of a vertex position format, or `None` if the format cannot be used for acceleration structure geometry.
fn position_format_size(format: vk::Format) -> Option<vk::DeviceSize> {
    match format {
        vk::Format::R32G32B32_SFLOAT => Some(12),
        vk::Format::R32G32_SFLOAT => Some(8),
        vk::Format::R16G16B16_SFLOAT | vk::Format::R16G16B16_SNORM => Some(6),
        vk::Format::R16G16_SFLOAT | vk::Format::R16G16_SNORM => Some(4),
        _ => None,
    }
}

fn index_size(ty: vk::IndexType) -> Option<vk::DeviceSize> {
    match ty {
        vk::IndexType::UINT16 => Some(2),
        vk::IndexType::UINT32 => Some(4),
        _ => None,
    }
}

fn invalid(reason: impl Into<String>) -> anyhow::Error {
    Error::InvalidGeometry(reason.into()).into()
}

impl Geometry {
    /// Validate a mesh and convert it into geometry.
    /// # Errors
    /// Fails with [`Error::InvalidGeometry`] if the buffer references are malformed.
    pub fn from_mesh(mesh: &TriangleMesh) -> Result<Self> {
        let vertices = &mesh.vertices;
        if vertices.buffer == vk::Buffer::null() {
            return Err(invalid("vertex buffer is null"));
        }
        if vertices.count == 0 {
            return Err(invalid("vertex count is zero"));
        }
        let format_size = position_format_size(vertices.format)
            .ok_or_else(|| invalid(format!("unsupported vertex format {:?}", vertices.format)))?;
        if vertices.stride < format_size {
            return Err(invalid(format!(
                "vertex stride {} is smaller than the {} byte position format",
                vertices.stride, format_size
            )));
        }

        match &mesh.indices {
            Some(indices) => {
                if indices.buffer == vk::Buffer::null() {
                    return Err(invalid("index buffer is null"));
                }
                let size = index_size(indices.ty).ok_or_else(|| invalid(format!("unsupported index type {:?}", indices.ty)))?;
                if indices.count == 0 || indices.count % 3 != 0 {
                    return Err(invalid(format!("index count {} is not a non-zero multiple of three", indices.count)));
                }
                if indices.offset % size != 0 {
                    return Err(invalid(format!("index offset {} is not aligned to the index size", indices.offset)));
                }
            }
            None => {
                if vertices.count % 3 != 0 {
                    return Err(invalid(format!(
                        "unindexed vertex count {} is not a multiple of three",
                        vertices.count
                    )));
                }
            }
        }

        Ok(Self {
            vertices: *vertices,
            indices: mesh.indices,
            flags: if mesh.opaque {
                vk::GeometryFlagsKHR::OPAQUE
            } else {
                vk::GeometryFlagsKHR::empty()
            },
        })
    }

    /// Number of triangles in this geometry
    pub fn primitive_count(&self) -> u32 {
        match &self.indices {
            Some(indices) => indices.count / 3,
            None => self.vertices.count / 3,
        }
    }

    /// True if this geometry does not invoke any-hit shaders
    pub fn is_opaque(&self) -> bool {
        self.flags.contains(vk::GeometryFlagsKHR::OPAQUE)
    }

    /// Vertex data of this geometry
    pub fn vertices(&self) -> &VertexData {
        &self.vertices
    }

    /// Index data of this geometry, if it is indexed
    pub fn indices(&self) -> Option<&IndexData> {
        self.indices.as_ref()
    }
}

impl TryFrom<&TriangleMesh> for Geometry {
    type Error = anyhow::Error;

    fn try_from(value: &TriangleMesh) -> Result<Self> {
        Self::from_mesh(value)
    }
}

impl AsVulkanType for Geometry {
    type Output = vk::GeometryNV;

    fn as_vulkan(&self) -> Self::Output {
        let (index_data, index_offset, index_count, index_type) = match &self.indices {
            Some(indices) => (indices.buffer, indices.offset, indices.count, indices.ty),
            None => (vk::Buffer::null(), 0, 0, vk::IndexType::NONE_KHR),
        };
        vk::GeometryNV {
            s_type: vk::StructureType::GEOMETRY_NV,
            p_next: std::ptr::null(),
            geometry_type: vk::GeometryTypeNV::TRIANGLES,
            geometry: vk::GeometryDataNV {
                triangles: vk::GeometryTrianglesNV {
                    s_type: vk::StructureType::GEOMETRY_TRIANGLES_NV,
                    p_next: std::ptr::null(),
                    vertex_data: self.vertices.buffer,
                    vertex_offset: self.vertices.offset,
                    vertex_count: self.vertices.count,
                    vertex_stride: self.vertices.stride,
                    vertex_format: self.vertices.format,
                    index_data,
                    index_offset,
                    index_count,
                    index_type,
                    transform_data: vk::Buffer::null(),
                    transform_offset: 0,
                },
                aabbs: vk::GeometryAABBNV::default(),
            },
            flags: self.flags,
        }
    }
}
