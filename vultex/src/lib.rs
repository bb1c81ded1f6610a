//! Vulkan bootstrap: capability negotiation, GPU scoring and selection, and
//! the RAII wrappers that own the resulting instance and device.
//!
//! # Object hierarchy
//!
//! ```text
//! Bootstrap
//! ├── Device (graphics queue)
//! └── Instance (optional debug messenger)
//! ```
//!
//! `Device` holds its `Instance` via `Arc`, so the instance cannot be
//! destroyed while the device is alive.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod bootstrap;
pub mod capability;
pub mod device;
pub mod instance;
pub mod log;
pub mod physical;

pub use ash;
