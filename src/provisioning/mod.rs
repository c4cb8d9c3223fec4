//! Node Provisioning
//!
//! Per-node building blocks driven by the orchestrator:
//! - Storage: pool, volumes and backing directory
//! - Domain: virtual machine registration

pub mod domain;
pub mod storage;

pub use domain::*;
pub use storage::*;
