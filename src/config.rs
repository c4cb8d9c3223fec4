//! Fleet Configuration
//!
//! Every deployment constant (naming prefix, storage root, disk layout,
//! domain sizing, control plane connection) lives in [`FleetConfig`] and is
//! handed to the orchestrator at construction. Values can be loaded from a
//! YAML file and overridden from the command line.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on nodes handled by a single invocation
pub const MAX_NODE_COUNT: u32 = 5000;

// =============================================================================
// Disk Layout
// =============================================================================

/// On-disk format of node volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeFormat {
    Qcow2,
    Raw,
}

impl std::fmt::Display for VolumeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeFormat::Qcow2 => write!(f, "qcow2"),
            VolumeFormat::Raw => write!(f, "raw"),
        }
    }
}

impl std::str::FromStr for VolumeFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "qcow2" => Ok(VolumeFormat::Qcow2),
            "raw" => Ok(VolumeFormat::Raw),
            other => Err(Error::Configuration(format!("unknown volume format: {}", other))),
        }
    }
}

/// Ordered disk sizes (GiB) given to every node of a deployment
///
/// Position in the list decides the volume suffix (`-d1`, `-d2`, ...) and the
/// device slot inside the domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiskSpec {
    sizes_gib: Vec<u64>,
}

impl DiskSpec {
    pub fn new(sizes_gib: Vec<u64>) -> Self {
        Self { sizes_gib }
    }

    /// Sizes in device order
    pub fn sizes(&self) -> &[u64] {
        &self.sizes_gib
    }

    pub fn len(&self) -> usize {
        self.sizes_gib.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes_gib.is_empty()
    }

    /// Total ceiling across all disks of one node
    pub fn total_gib(&self) -> u64 {
        self.sizes_gib.iter().sum()
    }
}

impl Default for DiskSpec {
    fn default() -> Self {
        Self::new(vec![40, 100, 100])
    }
}

// =============================================================================
// Network Binding
// =============================================================================

/// Kind of host-side attachment for node interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Libvirt managed network
    Network,
    /// Host bridge device
    Bridge,
}

/// Network or bridge every node interface is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBinding {
    pub kind: NetworkKind,
    pub name: String,
}

impl NetworkBinding {
    pub fn network(name: impl Into<String>) -> Self {
        Self {
            kind: NetworkKind::Network,
            name: name.into(),
        }
    }

    pub fn bridge(name: impl Into<String>) -> Self {
        Self {
            kind: NetworkKind::Bridge,
            name: name.into(),
        }
    }
}

impl Default for NetworkBinding {
    fn default() -> Self {
        Self::network("maas")
    }
}

impl std::fmt::Display for NetworkBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            NetworkKind::Network => write!(f, "network:{}", self.name),
            NetworkKind::Bridge => write!(f, "bridge:{}", self.name),
        }
    }
}

// =============================================================================
// Domain Template Knobs
// =============================================================================

/// Host-specific values substituted into every domain document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainTemplate {
    /// Emulator binary
    pub emulator: String,
    /// Machine type (e.g. pc, q35)
    pub machine: String,
    /// Guest architecture
    pub arch: String,
}

impl Default for DomainTemplate {
    fn default() -> Self {
        Self {
            emulator: "/usr/bin/qemu-system-x86_64".to_string(),
            machine: "pc".to_string(),
            arch: "x86_64".to_string(),
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Which control plane adapter to connect through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The `virsh` client against a libvirt URI
    Virsh,
    /// In-process simulation, nothing touches the hypervisor
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "virsh" | "libvirt" => Ok(BackendKind::Virsh),
            "memory" => Ok(BackendKind::Memory),
            other => Err(Error::Configuration(format!("unknown backend: {}", other))),
        }
    }
}

/// Control plane connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub backend: BackendKind,
    /// Libvirt connection URI
    pub uri: String,
    /// Connection attempts before giving up
    pub connect_retries: u32,
    /// Path or name of the virsh binary
    pub virsh_binary: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Virsh,
            uri: "qemu:///system".to_string(),
            connect_retries: 3,
            virsh_binary: "virsh".to_string(),
        }
    }
}

// =============================================================================
// Fleet Configuration
// =============================================================================

/// Complete deployment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Node name prefix
    pub prefix: String,
    /// Directory holding one subdirectory per node
    pub storage_root: PathBuf,
    /// Disk sizes per node
    pub disks: DiskSpec,
    /// Volume format
    pub volume_format: VolumeFormat,
    /// Memory per node in MiB
    pub memory_mib: u64,
    /// vCPUs per node
    pub vcpus: u32,
    /// Network binding for node interfaces
    pub network: NetworkBinding,
    /// NIC device model
    pub nic_model: String,
    /// Interfaces per node
    pub interfaces: u32,
    /// Pause after each domain definition, in milliseconds
    pub define_delay_ms: u64,
    /// Domain template knobs
    pub domain: DomainTemplate,
    /// Control plane connection
    pub connection: ConnectionConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            prefix: "maas-node".to_string(),
            storage_root: PathBuf::from("/storage/images/maas"),
            disks: DiskSpec::default(),
            volume_format: VolumeFormat::Qcow2,
            memory_mib: 1024,
            vcpus: 1,
            network: NetworkBinding::default(),
            nic_model: "virtio".to_string(),
            interfaces: 1,
            define_delay_ms: 100,
            domain: DomainTemplate::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Parse a YAML document; missing fields keep their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: FleetConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Reject configurations that cannot produce a usable node
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(Error::Configuration("node prefix must not be empty".into()));
        }
        if self.prefix.contains('/') {
            return Err(Error::Configuration(format!(
                "node prefix must not contain '/': {}",
                self.prefix
            )));
        }
        if self.disks.is_empty() {
            return Err(Error::Configuration("at least one disk is required".into()));
        }
        if let Some(pos) = self.disks.sizes().iter().position(|&size| size == 0) {
            return Err(Error::Configuration(format!(
                "disk {} has zero capacity",
                pos + 1
            )));
        }
        if self.memory_mib == 0 {
            return Err(Error::Configuration("memory must be greater than zero".into()));
        }
        if self.vcpus == 0 {
            return Err(Error::Configuration("vcpu count must be greater than zero".into()));
        }
        if self.interfaces == 0 {
            return Err(Error::Configuration("at least one interface is required".into()));
        }
        if self.network.name.trim().is_empty() {
            return Err(Error::Configuration("network name must not be empty".into()));
        }
        Ok(())
    }

    /// Delay inserted after each domain definition
    pub fn define_delay(&self) -> Duration {
        Duration::from_millis(self.define_delay_ms)
    }

    /// Backing directory of a node's storage pool
    pub fn pool_path(&self, identity: &str) -> PathBuf {
        self.storage_root.join(identity)
    }
}
