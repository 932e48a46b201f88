//! Wrapper around `VkTransformMatrixKHR` for easy usage

use ash::vk;
use glam::Mat4;

/// Represents a row-major affine transformation matrix, the layout instance records store transforms in.
#[derive(Copy, Clone)]
#[repr(transparent)]
pub struct TransformMatrix(vk::TransformMatrixKHR);

impl TransformMatrix {
    /// Build a 3x4 transform matrix from 3 rows of 4 elements.
    pub fn from_rows(rows: &[[f32; 4]; 3]) -> Self {
        Self(vk::TransformMatrixKHR {
            matrix: [
                rows[0][0], rows[0][1], rows[0][2], rows[0][3], rows[1][0], rows[1][1], rows[1][2],
                rows[1][3], rows[2][0], rows[2][1], rows[2][2], rows[2][3],
            ],
        })
    }

    /// Take the top three rows of a column-major 4x4 matrix. The bottom row of an affine transform is
    /// always `(0, 0, 0, 1)` and is dropped.
    pub fn from_mat4(matrix: &Mat4) -> Self {
        Self::from_rows(&[matrix.row(0).to_array(), matrix.row(1).to_array(), matrix.row(2).to_array()])
    }

    /// The 12 elements in row-major order
    pub fn elements(&self) -> &[f32; 12] {
        &self.0.matrix
    }
}

// `vk::TransformMatrixKHR` does not implement `Debug`, so it cannot be derived.
impl std::fmt::Debug for TransformMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TransformMatrix").field(&self.0.matrix).finish()
    }
}

impl From<Mat4> for TransformMatrix {
    fn from(value: Mat4) -> Self {
        Self::from_mat4(&value)
    }
}
