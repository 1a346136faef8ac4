//! Hardware abstraction layer for the PICA200 GPU command processor.
//!
//! [`gpu::GraphicsContext`] records pipeline state and resources, and turns
//! what changed into register writes right before each draw. Everything the
//! console provides (DMA memory, command submission, transfers, fills and
//! event waits) sits behind [`platform::Platform`]; [`headless`] implements
//! it in software.

pub mod command_buffer;
pub mod config;
pub mod error;
pub mod gpu;
pub mod headless;
pub mod platform;
pub mod protocol;
pub mod screenshot;
pub mod transform;
