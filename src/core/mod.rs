//! The core module holds the device wrapper, the error type, settings and the ray tracing extension loader.

pub mod device;
pub mod error;
pub mod extension;
pub mod settings;
