//! Fleet Control Plane Module
//!
//! Drives the hypervisor control plane for a numbered fleet of nodes:
//! the orchestrator, the control plane adapters, the libvirt document
//! renderer and progress observers.

pub mod backends;
pub mod orchestrator;
pub mod progress;
pub mod render;

pub use backends::*;
pub use orchestrator::*;
pub use progress::*;
