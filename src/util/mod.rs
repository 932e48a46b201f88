//! Various utilities

pub mod arena;
pub mod to_vk;
pub mod transform;
