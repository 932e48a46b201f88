//! Exposes all relevant abstractions for raytracing resources

pub use as_type::*;
pub use bottom_level::*;
pub use build_info::*;
pub use build_size::*;
pub use geometry::*;
pub use instance::*;
pub use manager::*;
pub use top_level::*;

pub mod as_type;
pub mod bottom_level;
pub mod build_info;
pub mod build_size;
pub mod geometry;
pub mod instance;
pub mod manager;
pub mod top_level;
