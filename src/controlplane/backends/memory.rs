//! In-Memory Control Plane
//!
//! Simulates a libvirt connection inside the process. Pools, volumes and
//! domains live in a lock-protected state table with libvirt-like rules:
//! definitions collide by name, volumes only show up in listings after a pool
//! refresh, inactive pools cannot be destroyed and running domains cannot be
//! undefined. Pool directories and volume files are materialised on disk so
//! filesystem effects can be observed.
//!
//! Faults can be injected per operation and target name, and every call is
//! counted.

use crate::controlplane::render;
use crate::domain::ports::{
    ControlPlane, DomainHandle, DomainSpec, PoolDefinition, PoolHandle, VolumeDefinition,
    VolumeHandle,
};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

// =============================================================================
// Fault Injection
// =============================================================================

/// Operation a fault can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    DefinePool,
    BuildPool,
    ActivatePool,
    PoolAutostart,
    ListVolumes,
    CreateVolume,
    DeleteVolume,
    DestroyPool,
    UndefinePool,
    DefineDomain,
    StopDomain,
    UndefineDomain,
}

impl std::fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultPoint::DefinePool => "pool-define",
            FaultPoint::BuildPool => "pool-build",
            FaultPoint::ActivatePool => "pool-start",
            FaultPoint::PoolAutostart => "pool-autostart",
            FaultPoint::ListVolumes => "vol-list",
            FaultPoint::CreateVolume => "vol-create",
            FaultPoint::DeleteVolume => "vol-delete",
            FaultPoint::DestroyPool => "pool-destroy",
            FaultPoint::UndefinePool => "pool-undefine",
            FaultPoint::DefineDomain => "define",
            FaultPoint::StopDomain => "destroy",
            FaultPoint::UndefineDomain => "undefine",
        };
        f.write_str(name)
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone)]
struct VolumeState {
    definition: VolumeDefinition,
    /// Visible to listings and lookups (set by refresh)
    listed: bool,
}

#[derive(Debug, Clone)]
struct PoolState {
    definition: PoolDefinition,
    built: bool,
    active: bool,
    autostart: bool,
    volumes: IndexMap<String, VolumeState>,
}

#[derive(Debug, Clone)]
struct DomainState {
    spec: DomainSpec,
    xml: String,
    active: bool,
}

#[derive(Debug, Default)]
struct State {
    pools: BTreeMap<String, PoolState>,
    domains: BTreeMap<String, DomainState>,
    closed: bool,
}

// =============================================================================
// Memory Control Plane
// =============================================================================

/// In-process control plane
pub struct MemoryControlPlane {
    uri: String,
    state: RwLock<State>,
    faults: Mutex<HashSet<(FaultPoint, String)>>,
    calls: AtomicU64,
}

impl MemoryControlPlane {
    /// Create a new, empty control plane
    pub fn new() -> Self {
        Self::with_uri("memory:///fleet")
    }

    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            state: RwLock::new(State::default()),
            faults: Mutex::new(HashSet::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Make `point` fail whenever it targets `target`
    pub fn inject_fault(&self, point: FaultPoint, target: impl Into<String>) {
        self.faults.lock().insert((point, target.into()));
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Control plane calls issued so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.state.read().pools.keys().cloned().collect()
    }

    pub fn domain_names(&self) -> Vec<String> {
        self.state.read().domains.keys().cloned().collect()
    }

    /// Record a domain was defined with
    pub fn domain_spec(&self, name: &str) -> Option<DomainSpec> {
        self.state.read().domains.get(name).map(|d| d.spec.clone())
    }

    /// Rendered document a domain was defined with
    pub fn domain_xml(&self, name: &str) -> Option<String> {
        self.state.read().domains.get(name).map(|d| d.xml.clone())
    }

    /// Every volume in a pool, listed or not, in creation order
    pub fn volume_definitions(&self, pool: &str) -> Vec<VolumeDefinition> {
        self.state
            .read()
            .pools
            .get(pool)
            .map(|p| p.volumes.values().map(|v| v.definition.clone()).collect())
            .unwrap_or_default()
    }

    /// (built, active, autostart) flags of a pool
    pub fn pool_flags(&self, name: &str) -> Option<(bool, bool, bool)> {
        self.state
            .read()
            .pools
            .get(name)
            .map(|p| (p.built, p.active, p.autostart))
    }

    /// Start or stop a domain out of band
    pub fn set_domain_active(&self, name: &str, active: bool) -> Result<()> {
        let mut state = self.state.write();
        let domain = state.domains.get_mut(name).ok_or_else(|| Error::ResourceNotFound {
            kind: "Domain".into(),
            name: name.into(),
        })?;
        domain.active = active;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Count the call, then fail if closed or a fault matches
    fn enter(&self, point: Option<FaultPoint>, operation: &str, target: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        debug!("memory control plane: {} {}", operation, target);

        if self.state.read().closed {
            return Err(Error::control_plane(operation, target, "connection is closed"));
        }
        if let Some(point) = point {
            if self.faults.lock().contains(&(point, target.to_string())) {
                return Err(Error::control_plane(operation, target, "injected fault"));
            }
        }
        Ok(())
    }
}

impl Default for MemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

fn pool_not_found(name: &str) -> Error {
    Error::ResourceNotFound {
        kind: "StoragePool".into(),
        name: name.into(),
    }
}

fn domain_not_found(name: &str) -> Error {
    Error::ResourceNotFound {
        kind: "Domain".into(),
        name: name.into(),
    }
}

impl ControlPlane for MemoryControlPlane {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn close(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.state.write().closed = true;
        Ok(())
    }

    fn define_pool(&self, definition: &PoolDefinition) -> Result<PoolHandle> {
        self.enter(Some(FaultPoint::DefinePool), "pool-define", &definition.name)?;

        let mut state = self.state.write();
        if state.pools.contains_key(&definition.name) {
            return Err(Error::ResourceExists {
                kind: "StoragePool".into(),
                name: definition.name.clone(),
            });
        }
        state.pools.insert(
            definition.name.clone(),
            PoolState {
                definition: definition.clone(),
                built: false,
                active: false,
                autostart: false,
                volumes: IndexMap::new(),
            },
        );
        Ok(PoolHandle {
            name: definition.name.clone(),
        })
    }

    fn build_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.enter(Some(FaultPoint::BuildPool), "pool-build", &pool.name)?;

        let mut state = self.state.write();
        let entry = state
            .pools
            .get_mut(&pool.name)
            .ok_or_else(|| pool_not_found(&pool.name))?;
        std::fs::create_dir_all(&entry.definition.path)
            .map_err(|e| Error::control_plane("pool-build", &pool.name, e))?;
        entry.built = true;
        Ok(())
    }

    fn activate_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.enter(Some(FaultPoint::ActivatePool), "pool-start", &pool.name)?;

        let mut state = self.state.write();
        let entry = state
            .pools
            .get_mut(&pool.name)
            .ok_or_else(|| pool_not_found(&pool.name))?;
        if entry.active {
            return Err(Error::control_plane("pool-start", &pool.name, "pool is already active"));
        }
        if !entry.definition.path.is_dir() {
            return Err(Error::control_plane(
                "pool-start",
                &pool.name,
                format!("cannot open directory {}", entry.definition.path.display()),
            ));
        }
        entry.active = true;
        Ok(())
    }

    fn set_pool_autostart(&self, pool: &PoolHandle, autostart: bool) -> Result<()> {
        self.enter(Some(FaultPoint::PoolAutostart), "pool-autostart", &pool.name)?;

        let mut state = self.state.write();
        let entry = state
            .pools
            .get_mut(&pool.name)
            .ok_or_else(|| pool_not_found(&pool.name))?;
        entry.autostart = autostart;
        Ok(())
    }

    fn lookup_pool(&self, name: &str) -> Result<Option<PoolHandle>> {
        self.enter(None, "pool-info", name)?;

        Ok(self.state.read().pools.get(name).map(|_| PoolHandle {
            name: name.to_string(),
        }))
    }

    fn list_volume_names(&self, pool: &PoolHandle) -> Result<Vec<String>> {
        self.enter(Some(FaultPoint::ListVolumes), "vol-list", &pool.name)?;

        let state = self.state.read();
        let entry = state
            .pools
            .get(&pool.name)
            .ok_or_else(|| pool_not_found(&pool.name))?;
        if !entry.active {
            return Err(Error::control_plane("vol-list", &pool.name, "storage pool is not active"));
        }
        Ok(entry
            .volumes
            .iter()
            .filter(|(_, v)| v.listed)
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn refresh_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.enter(None, "pool-refresh", &pool.name)?;

        let mut state = self.state.write();
        let entry = state
            .pools
            .get_mut(&pool.name)
            .ok_or_else(|| pool_not_found(&pool.name))?;
        if !entry.active {
            return Err(Error::control_plane("pool-refresh", &pool.name, "storage pool is not active"));
        }
        for volume in entry.volumes.values_mut() {
            volume.listed = true;
        }
        Ok(())
    }

    fn destroy_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.enter(Some(FaultPoint::DestroyPool), "pool-destroy", &pool.name)?;

        let mut state = self.state.write();
        let entry = state
            .pools
            .get_mut(&pool.name)
            .ok_or_else(|| pool_not_found(&pool.name))?;
        if !entry.active {
            return Err(Error::control_plane("pool-destroy", &pool.name, "storage pool is not active"));
        }
        entry.active = false;
        Ok(())
    }

    fn undefine_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.enter(Some(FaultPoint::UndefinePool), "pool-undefine", &pool.name)?;

        let mut state = self.state.write();
        let entry = state
            .pools
            .get(&pool.name)
            .ok_or_else(|| pool_not_found(&pool.name))?;
        if entry.active {
            return Err(Error::control_plane("pool-undefine", &pool.name, "storage pool is still active"));
        }
        state.pools.remove(&pool.name);
        Ok(())
    }

    fn create_volume(
        &self,
        pool: &PoolHandle,
        definition: &VolumeDefinition,
    ) -> Result<VolumeHandle> {
        self.enter(Some(FaultPoint::CreateVolume), "vol-create", &definition.name)?;

        let mut state = self.state.write();
        let entry = state
            .pools
            .get_mut(&pool.name)
            .ok_or_else(|| pool_not_found(&pool.name))?;
        if !entry.active {
            return Err(Error::control_plane("vol-create", &definition.name, "storage pool is not active"));
        }
        if entry.volumes.contains_key(&definition.name) {
            return Err(Error::ResourceExists {
                kind: "StorageVolume".into(),
                name: definition.name.clone(),
            });
        }

        // Sparse: the file exists but nothing is allocated
        std::fs::File::create(&definition.path)
            .map_err(|e| Error::control_plane("vol-create", &definition.name, e))?;

        entry.volumes.insert(
            definition.name.clone(),
            VolumeState {
                definition: definition.clone(),
                listed: false,
            },
        );
        Ok(VolumeHandle {
            pool: pool.name.clone(),
            name: definition.name.clone(),
            path: definition.path.clone(),
        })
    }

    fn lookup_volume(&self, pool: &PoolHandle, name: &str) -> Result<Option<VolumeHandle>> {
        self.enter(None, "vol-info", name)?;

        let state = self.state.read();
        let entry = state
            .pools
            .get(&pool.name)
            .ok_or_else(|| pool_not_found(&pool.name))?;
        Ok(entry
            .volumes
            .get(name)
            .filter(|v| v.listed)
            .map(|v| VolumeHandle {
                pool: pool.name.clone(),
                name: name.to_string(),
                path: v.definition.path.clone(),
            }))
    }

    fn delete_volume(&self, volume: &VolumeHandle) -> Result<()> {
        self.enter(Some(FaultPoint::DeleteVolume), "vol-delete", &volume.name)?;

        let mut state = self.state.write();
        let entry = state
            .pools
            .get_mut(&volume.pool)
            .ok_or_else(|| pool_not_found(&volume.pool))?;
        if entry.volumes.shift_remove(&volume.name).is_none() {
            return Err(Error::ResourceNotFound {
                kind: "StorageVolume".into(),
                name: volume.name.clone(),
            });
        }
        match std::fs::remove_file(&volume.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::control_plane("vol-delete", &volume.name, e)),
        }
    }

    fn define_domain(&self, spec: &DomainSpec) -> Result<DomainHandle> {
        self.enter(Some(FaultPoint::DefineDomain), "define", &spec.name)?;

        let mut state = self.state.write();
        if state.domains.contains_key(&spec.name) {
            return Err(Error::ResourceExists {
                kind: "Domain".into(),
                name: spec.name.clone(),
            });
        }
        if let Some(missing) = spec.disks.iter().find(|disk| !disk.path.exists()) {
            return Err(Error::control_plane(
                "define",
                &spec.name,
                format!("cannot access storage file {}", missing.path.display()),
            ));
        }

        state.domains.insert(
            spec.name.clone(),
            DomainState {
                spec: spec.clone(),
                xml: render::domain_xml(spec),
                active: false,
            },
        );
        Ok(DomainHandle {
            name: spec.name.clone(),
        })
    }

    fn lookup_domain(&self, name: &str) -> Result<Option<DomainHandle>> {
        self.enter(None, "dominfo", name)?;

        Ok(self.state.read().domains.get(name).map(|_| DomainHandle {
            name: name.to_string(),
        }))
    }

    fn is_domain_active(&self, domain: &DomainHandle) -> Result<bool> {
        self.enter(None, "domstate", &domain.name)?;

        self.state
            .read()
            .domains
            .get(&domain.name)
            .map(|d| d.active)
            .ok_or_else(|| domain_not_found(&domain.name))
    }

    fn stop_domain(&self, domain: &DomainHandle) -> Result<()> {
        self.enter(Some(FaultPoint::StopDomain), "destroy", &domain.name)?;

        let mut state = self.state.write();
        let entry = state
            .domains
            .get_mut(&domain.name)
            .ok_or_else(|| domain_not_found(&domain.name))?;
        if !entry.active {
            return Err(Error::control_plane("destroy", &domain.name, "domain is not running"));
        }
        entry.active = false;
        Ok(())
    }

    fn undefine_domain(&self, domain: &DomainHandle) -> Result<()> {
        self.enter(Some(FaultPoint::UndefineDomain), "undefine", &domain.name)?;

        let mut state = self.state.write();
        let entry = state
            .domains
            .get(&domain.name)
            .ok_or_else(|| domain_not_found(&domain.name))?;
        if entry.active {
            return Err(Error::control_plane("undefine", &domain.name, "domain is running"));
        }
        state.domains.remove(&domain.name);
        Ok(())
    }
}
