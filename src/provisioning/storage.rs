//! Storage Provisioner
//!
//! Creates and tears down the per-node storage pool and its fixed set of
//! sparse disk volumes. Creation is node-scoped: any failure other than
//! autostart aborts the node with `StorageProvision`. Teardown never fails;
//! each sub-step reports a [`StepOutcome`] instead.

use crate::config::{DiskSpec, FleetConfig, VolumeFormat};
use crate::domain::lifecycle::{StepOutcome, StorageTeardown, VolumeTeardown};
use crate::domain::ports::{
    ControlPlaneRef, FilePermissions, PoolDefinition, PoolHandle, VolumeDefinition,
};
use crate::error::{Error, Result};
use crate::fleet::NodeIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// =============================================================================
// Provisioned Storage
// =============================================================================

/// Volume owned by a node pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub path: PathBuf,
    pub capacity_gib: u64,
    pub format: VolumeFormat,
}

/// Pool owned by exactly one node, with its volumes in disk order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePool {
    pub name: String,
    pub path: PathBuf,
    pub volumes: Vec<Volume>,
}

impl StoragePool {
    /// Volume paths in device order
    pub fn volume_paths(&self) -> Vec<PathBuf> {
        self.volumes.iter().map(|v| v.path.clone()).collect()
    }

    pub fn total_capacity_gib(&self) -> u64 {
        self.volumes.iter().map(|v| v.capacity_gib).sum()
    }
}

// =============================================================================
// Storage Provisioner
// =============================================================================

/// Creates and destroys node pools through the control plane
pub struct StorageProvisioner {
    control_plane: ControlPlaneRef,
    storage_root: PathBuf,
    disks: DiskSpec,
    format: VolumeFormat,
}

impl StorageProvisioner {
    pub fn new(control_plane: ControlPlaneRef, config: &FleetConfig) -> Self {
        Self {
            control_plane,
            storage_root: config.storage_root.clone(),
            disks: config.disks.clone(),
            format: config.volume_format,
        }
    }

    /// Backing directory of a node pool
    pub fn pool_path(&self, identity: &NodeIdentity) -> PathBuf {
        self.storage_root.join(identity.as_str())
    }

    /// Volume definitions for a node, in disk order
    pub fn volume_definitions(&self, identity: &NodeIdentity) -> Vec<VolumeDefinition> {
        let pool_path = self.pool_path(identity);
        self.disks
            .sizes()
            .iter()
            .enumerate()
            .map(|(i, &capacity_gib)| {
                let name = identity.volume_name(i + 1);
                VolumeDefinition {
                    path: pool_path.join(&name),
                    name,
                    capacity_gib,
                    format: self.format,
                    permissions: FilePermissions::VOLUME_FILE,
                }
            })
            .collect()
    }

    /// Create the node's pool and volumes
    pub fn provision_storage(&self, identity: &NodeIdentity) -> Result<StoragePool> {
        let failed = |e: Error| Error::StorageProvision {
            identity: identity.to_string(),
            reason: e.to_string(),
        };

        let path = self.pool_path(identity);
        let definition = PoolDefinition {
            name: identity.to_string(),
            path: path.clone(),
            permissions: FilePermissions::POOL_DIRECTORY,
        };

        let pool = self.control_plane.define_pool(&definition).map_err(failed)?;
        std::fs::create_dir_all(&path).map_err(|e| failed(e.into()))?;
        self.control_plane.build_pool(&pool).map_err(failed)?;
        self.control_plane.activate_pool(&pool).map_err(failed)?;

        if let Err(e) = self.control_plane.set_pool_autostart(&pool, true) {
            warn!("Pool {} will not autostart: {}", identity, e);
        }

        let definitions = self.volume_definitions(identity);
        for volume in &definitions {
            debug!(
                "Creating volume {} ({} GiB, {})",
                volume.name, volume.capacity_gib, volume.format
            );
            self.control_plane
                .create_volume(&pool, volume)
                .map_err(failed)?;
        }

        self.control_plane.refresh_pool(&pool).map_err(failed)?;

        let mut volumes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let handle = self
                .control_plane
                .lookup_volume(&pool, &definition.name)
                .map_err(failed)?
                .ok_or_else(|| Error::StorageProvision {
                    identity: identity.to_string(),
                    reason: format!("volume {} not visible after refresh", definition.name),
                })?;
            volumes.push(Volume {
                name: handle.name,
                path: handle.path,
                capacity_gib: definition.capacity_gib,
                format: definition.format,
            });
        }

        info!(
            "Provisioned storage for {}: {} volumes, {} GiB ceiling",
            identity,
            volumes.len(),
            self.disks.total_gib()
        );

        Ok(StoragePool {
            name: pool.name,
            path,
            volumes,
        })
    }

    /// Tear down the node's pool, volumes and directory, best effort
    pub fn destroy_storage(&self, identity: &NodeIdentity) -> StorageTeardown {
        let path = self.pool_path(identity);

        let pool = match self.control_plane.lookup_pool(identity.as_str()) {
            Ok(Some(pool)) => pool,
            Ok(None) => {
                debug!("No storage pool for {}, nothing to destroy", identity);
                return StorageTeardown::absent(remove_directory(&path));
            }
            Err(e) => {
                warn!("Cannot look up storage pool {}: {}", identity, e);
                return StorageTeardown {
                    volumes: Vec::new(),
                    deactivate: StepOutcome::Skipped,
                    undefine: StepOutcome::Failed(e.to_string()),
                    directory: StepOutcome::Skipped,
                };
            }
        };

        let volumes = self
            .list_volumes(&pool)
            .into_iter()
            .map(|name| {
                let outcome = self.delete_volume(&pool, &name);
                VolumeTeardown { name, outcome }
            })
            .collect();

        let deactivate = match self.control_plane.destroy_pool(&pool) {
            Ok(()) => StepOutcome::Done,
            Err(e) => {
                warn!("Cannot deactivate storage pool {}: {}", identity, e);
                StepOutcome::Failed(e.to_string())
            }
        };

        let undefine = match self.control_plane.undefine_pool(&pool) {
            Ok(()) => StepOutcome::Done,
            Err(e) => {
                warn!("Cannot undefine storage pool {}: {}", identity, e);
                StepOutcome::Failed(e.to_string())
            }
        };

        StorageTeardown {
            volumes,
            deactivate,
            undefine,
            directory: remove_directory(&path),
        }
    }

    /// Volume names in the pool after a refresh, so images written since the
    /// last refresh are included; an inactive pool is started once first
    fn list_volumes(&self, pool: &PoolHandle) -> Vec<String> {
        let refreshed = self.control_plane.refresh_pool(pool).or_else(|first| {
            debug!("Refreshing {} failed ({}), starting pool", pool.name, first);
            self.control_plane
                .activate_pool(pool)
                .and_then(|_| self.control_plane.refresh_pool(pool))
        });

        match refreshed.and_then(|_| self.control_plane.list_volume_names(pool)) {
            Ok(names) => names,
            Err(e) => {
                warn!("Cannot list volumes of {}: {}", pool.name, e);
                Vec::new()
            }
        }
    }

    fn delete_volume(&self, pool: &PoolHandle, name: &str) -> StepOutcome {
        let volume = match self.control_plane.lookup_volume(pool, name) {
            Ok(Some(volume)) => volume,
            Ok(None) => return StepOutcome::Absent,
            Err(e) => {
                warn!("Cannot look up volume {}: {}", name, e);
                return StepOutcome::Failed(e.to_string());
            }
        };

        match self.control_plane.delete_volume(&volume) {
            Ok(()) => {
                debug!("Deleted volume {}", name);
                StepOutcome::Done
            }
            Err(e) => {
                warn!("Cannot delete volume {}: {}", name, e);
                StepOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Remove a pool directory if it is empty
fn remove_directory(path: &Path) -> StepOutcome {
    match std::fs::remove_dir(path) {
        Ok(()) => StepOutcome::Done,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepOutcome::Absent,
        Err(e) => {
            debug!("Leaving directory {} in place: {}", path.display(), e);
            StepOutcome::Failed(e.to_string())
        }
    }
}
