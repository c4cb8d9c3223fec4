//! Domain layer - Core lifecycle types and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles, and the per-node lifecycle
//! records the orchestrator produces.

pub mod lifecycle;
pub mod ports;

pub use lifecycle::*;
pub use ports::*;
