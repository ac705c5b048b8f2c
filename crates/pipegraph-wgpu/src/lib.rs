//! wgpu backend for pipegraph
//!
//! Turns resolved pipe descriptors into `wgpu::Texture` and `wgpu::Buffer` objects.
//! Stages running on this backend record their work into the frame's
//! `wgpu::CommandEncoder`.

mod backend;

pub use backend::{WgpuBackend, WgpuResource};
