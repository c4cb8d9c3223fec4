//! Domain Ports - Core trait definitions for the node manager
//!
//! These traits define the boundaries between the lifecycle logic and the
//! hypervisor control plane and progress reporting. Adapters implement these
//! traits to provide concrete functionality.

use crate::config::{DomainTemplate, NetworkBinding, VolumeFormat};
use crate::domain::lifecycle::{BatchReport, NodeReport, Operation};
use crate::error::Result;
use crate::fleet::{MacAddress, NodeRange};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

// =============================================================================
// Resource Definitions
// =============================================================================

/// Ownership and mode applied to pool directories and volume files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePermissions {
    pub mode: u32,
    pub owner: u32,
    pub group: u32,
}

impl FilePermissions {
    pub const POOL_DIRECTORY: FilePermissions = FilePermissions {
        mode: 0o755,
        owner: 0,
        group: 0,
    };

    pub const VOLUME_FILE: FilePermissions = FilePermissions {
        mode: 0o644,
        owner: 0,
        group: 0,
    };
}

/// Directory-backed storage pool owned by one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDefinition {
    /// Pool name (the node identity)
    pub name: String,
    /// Backing directory
    pub path: PathBuf,
    pub permissions: FilePermissions,
}

/// Sparse disk volume inside a node pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDefinition {
    /// Volume name (`{identity}-d{N}.img`)
    pub name: String,
    /// Image file path
    pub path: PathBuf,
    /// Capacity ceiling in GiB; nothing is allocated up front
    pub capacity_gib: u64,
    pub format: VolumeFormat,
    pub permissions: FilePermissions,
}

/// One disk attached to a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDevice {
    /// Image file path
    pub path: PathBuf,
    pub format: VolumeFormat,
    /// Guest device name (sda, sdb, ...)
    pub target: String,
    /// Unit on the SCSI controller, equal to the disk position
    pub unit: u32,
}

/// One network interface attached to a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub mac: MacAddress,
    pub binding: NetworkBinding,
    /// NIC device model (virtio, e1000, ...)
    pub model: String,
}

/// Rendered configuration of one node, handed to the control plane and
/// then discarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    /// Domain name (the node identity)
    pub name: String,
    /// Memory in KiB, the control plane's unit
    pub memory_kib: u64,
    pub vcpus: u32,
    /// Disks in device order
    pub disks: Vec<DiskDevice>,
    pub interfaces: Vec<NetworkInterface>,
    pub template: DomainTemplate,
}

// =============================================================================
// Handles
// =============================================================================

/// Reference to a defined storage pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    pub name: String,
}

/// Reference to a volume inside a pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeHandle {
    pub pool: String,
    pub name: String,
    pub path: PathBuf,
}

/// Reference to a defined domain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainHandle {
    pub name: String,
}

// =============================================================================
// Control Plane Port
// =============================================================================

/// Port for the hypervisor control plane
///
/// Calls are synchronous and blocking. A connection is not assumed safe for
/// concurrent structural mutation, so callers issue one call at a time.
/// Lookups return `Ok(None)` for absent resources; `Err` is reserved for
/// failed calls.
pub trait ControlPlane: Send + Sync {
    /// Connection URI, for logging
    fn uri(&self) -> &str;

    /// Release the connection
    fn close(&self) -> Result<()>;

    /// Define a persistent storage pool
    fn define_pool(&self, definition: &PoolDefinition) -> Result<PoolHandle>;

    /// Build the pool's backing storage
    fn build_pool(&self, pool: &PoolHandle) -> Result<()>;

    /// Start (activate) the pool
    fn activate_pool(&self, pool: &PoolHandle) -> Result<()>;

    /// Toggle pool autostart
    fn set_pool_autostart(&self, pool: &PoolHandle, autostart: bool) -> Result<()>;

    /// Look up a pool by name
    fn lookup_pool(&self, name: &str) -> Result<Option<PoolHandle>>;

    /// Names of volumes currently listed in the pool
    fn list_volume_names(&self, pool: &PoolHandle) -> Result<Vec<String>>;

    /// Rescan the pool so new volumes become visible
    fn refresh_pool(&self, pool: &PoolHandle) -> Result<()>;

    /// Deactivate the pool
    fn destroy_pool(&self, pool: &PoolHandle) -> Result<()>;

    /// Remove the pool definition
    fn undefine_pool(&self, pool: &PoolHandle) -> Result<()>;

    /// Create a volume inside a pool
    fn create_volume(&self, pool: &PoolHandle, definition: &VolumeDefinition)
        -> Result<VolumeHandle>;

    /// Look up a volume by name
    fn lookup_volume(&self, pool: &PoolHandle, name: &str) -> Result<Option<VolumeHandle>>;

    /// Delete a volume and its backing file
    fn delete_volume(&self, volume: &VolumeHandle) -> Result<()>;

    /// Register a domain without starting it
    fn define_domain(&self, spec: &DomainSpec) -> Result<DomainHandle>;

    /// Look up a domain by name
    fn lookup_domain(&self, name: &str) -> Result<Option<DomainHandle>>;

    /// Whether the domain is running
    fn is_domain_active(&self, domain: &DomainHandle) -> Result<bool>;

    /// Forcibly stop a running domain
    fn stop_domain(&self, domain: &DomainHandle) -> Result<()>;

    /// Remove the domain registration
    fn undefine_domain(&self, domain: &DomainHandle) -> Result<()>;
}

// =============================================================================
// Progress Port
// =============================================================================

/// Observer notified as a batch advances
///
/// The orchestrator calls it synchronously after each node; implementations
/// must not block for long.
pub trait ProgressObserver: Send + Sync {
    /// A batch is about to start
    fn batch_started(&self, _operation: Operation, _range: &NodeRange) {}

    /// A node reached `done` or failed at a named step
    fn node_finished(&self, _report: &NodeReport) {}

    /// The batch is over
    fn batch_finished(&self, _report: &BatchReport) {}
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ControlPlaneRef = Arc<dyn ControlPlane>;
pub type ProgressObserverRef = Arc<dyn ProgressObserver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_permissions() {
        assert_eq!(FilePermissions::POOL_DIRECTORY.mode, 0o755);
        assert_eq!(FilePermissions::VOLUME_FILE.mode, 0o644);
        assert_eq!(FilePermissions::VOLUME_FILE.owner, 0);
    }

    #[test]
    fn test_domain_spec_serializes_macs_as_text() {
        let spec = DomainSpec {
            name: "maas-node-01".into(),
            memory_kib: 1024 * 1024,
            vcpus: 1,
            disks: vec![],
            interfaces: vec![NetworkInterface {
                mac: MacAddress::new([0x02, 0, 0, 0, 0, 1]),
                binding: NetworkBinding::network("maas"),
                model: "virtio".into(),
            }],
            template: DomainTemplate::default(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["interfaces"][0]["mac"], "02:00:00:00:00:01");
    }
}
