//! MAAS Node Manager - Fleet Lifecycle Orchestrator
//!
//! Provisions and tears down a numbered fleet of libvirt virtual machines
//! that network-boot into MAAS. Each node owns one storage pool, a fixed set
//! of sparse disk volumes and one domain definition, all named after the
//! node's zero-padded index.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            Fleet Orchestrator                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Range Planner  │  │  Name Resolver  │  │     Progress Observers      │  │
//! │  │ (start/count/end)│ │  (zero padding) │  │   (log / bar / recording)   │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │              ┌─────────────────┴─────────────────┐                           │
//! │  ┌───────────┴─────────┐             ┌───────────┴─────────┐                 │
//! │  │ Storage Provisioner │             │ Domain Provisioner  │                 │
//! │  │  (pool + volumes)   │             │  (define / remove)  │                 │
//! │  └───────────┬─────────┘             └───────────┬─────────┘                 │
//! ├──────────────┴───────────────────────────────────┴───────────────────────────┤
//! │                        Control Plane Adapters                                │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │   Virsh (libvirt, XML)      │  │   Memory (tests and rehearsals)     │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`fleet`]: Range planning, node naming and MAC addresses
//! - [`provisioning`]: Per-node storage and domain provisioners
//! - [`controlplane`]: Orchestrator, adapters, renderer and progress
//! - [`domain`]: Lifecycle types and port definitions
//! - [`config`]: Deployment configuration
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod fleet;
pub mod provisioning;

// Re-export commonly used types
pub use config::{
    BackendKind, ConnectionConfig, DiskSpec, DomainTemplate, FleetConfig, NetworkBinding,
    NetworkKind, VolumeFormat, MAX_NODE_COUNT,
};

pub use controlplane::{
    BackendFactory, BarProgress, LoggingProgress, MemoryControlPlane, NoopProgress,
    Orchestrator, RecordingProgress, VirshControlPlane,
};

pub use domain::lifecycle::{
    BatchReport, NodeOutcome, NodeReport, Operation, Stage, Step, StepOutcome,
};

pub use domain::ports::{ControlPlane, ControlPlaneRef, ProgressObserver, ProgressObserverRef};

pub use error::{Error, ErrorScope, Result};

pub use fleet::{plan, plan_detailed, MacAddress, NameResolver, NodeIdentity, NodeRange};

pub use provisioning::{DomainProvisioner, StorageProvisioner, StoragePool};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
