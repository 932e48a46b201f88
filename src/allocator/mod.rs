//! The allocator module exposes the memory capability
//! <br>
//! <br>
//! # Allocator traits
//! These are defined in [`traits`], and can be implemented to supply a custom allocator type to all functions.
//! # Default allocator
//! A default allocator based on the `gpu_allocator` crate is implemented in [`default_allocator`]. Most types that take a generic allocator
//! parameter default to this allocator.

pub mod default_allocator;
pub mod memory_type;
pub mod traits;
