//! Control Plane Adapters
//!
//! Provides adapters for the hypervisor control plane:
//! - Virsh: libvirt through the `virsh` client
//! - Memory: in-process simulation for tests and rehearsals

pub mod memory;
pub mod virsh;

pub use memory::*;
pub use virsh::*;

use crate::config::{BackendKind, ConnectionConfig};
use crate::domain::ports::ControlPlaneRef;
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// Factory for opening control plane connections
pub struct BackendFactory;

impl BackendFactory {
    /// Open the connection described by `config`
    ///
    /// Fails with `ControlPlaneConnection` when the control plane cannot be
    /// reached; no node work must start in that case.
    pub fn connect(config: &ConnectionConfig) -> Result<ControlPlaneRef> {
        info!("Connecting to control plane: {:?} {}", config.backend, config.uri);

        match config.backend {
            BackendKind::Virsh => Ok(Arc::new(VirshControlPlane::connect(config)?)),
            BackendKind::Memory => Ok(Arc::new(MemoryControlPlane::with_uri(config.uri.clone()))),
        }
    }
}
