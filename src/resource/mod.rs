//! Exposes the resources used for ray tracing: buffers, the storage image and acceleration structures.

pub mod buffer;
pub mod raytracing;
pub mod storage_image;
