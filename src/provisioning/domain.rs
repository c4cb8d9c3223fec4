//! Domain Provisioner
//!
//! Registers a node's virtual machine (network boot first, then disk) without
//! starting it, and removes it again on destroy.

use crate::config::{DomainTemplate, FleetConfig, NetworkBinding, VolumeFormat};
use crate::controlplane::render::disk_target;
use crate::domain::lifecycle::{DomainTeardown, StepOutcome};
use crate::domain::ports::{ControlPlaneRef, DiskDevice, DomainHandle, DomainSpec, NetworkInterface};
use crate::error::{Error, Result};
use crate::fleet::{MacAddress, NodeIdentity};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Defines and removes node domains through the control plane
pub struct DomainProvisioner {
    control_plane: ControlPlaneRef,
    nic_model: String,
    interfaces: usize,
    format: VolumeFormat,
    template: DomainTemplate,
    rng: Mutex<StdRng>,
}

impl DomainProvisioner {
    pub fn new(control_plane: ControlPlaneRef, config: &FleetConfig) -> Self {
        Self::with_rng(control_plane, config, StdRng::from_entropy())
    }

    /// Deterministic MAC generation, for tests and reproducible rehearsals
    pub fn with_seed(control_plane: ControlPlaneRef, config: &FleetConfig, seed: u64) -> Self {
        Self::with_rng(control_plane, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(control_plane: ControlPlaneRef, config: &FleetConfig, rng: StdRng) -> Self {
        Self {
            control_plane,
            nic_model: config.nic_model.clone(),
            interfaces: config.interfaces.max(1) as usize,
            format: config.volume_format,
            template: config.domain.clone(),
            rng: Mutex::new(rng),
        }
    }

    /// Domain description for a node
    ///
    /// Memory is given in MiB and stored in KiB. Disks keep the order of
    /// `volume_paths`; every interface gets a fresh locally administered MAC.
    pub fn build_spec(
        &self,
        identity: &NodeIdentity,
        memory_mib: u64,
        vcpus: u32,
        network: &NetworkBinding,
        volume_paths: &[PathBuf],
    ) -> Result<DomainSpec> {
        let memory_kib = memory_mib.checked_mul(1024).ok_or_else(|| {
            Error::Configuration(format!("memory of {} MiB is out of range", memory_mib))
        })?;

        let disks = volume_paths
            .iter()
            .enumerate()
            .map(|(i, path)| DiskDevice {
                path: path.clone(),
                format: self.format,
                target: disk_target(i),
                unit: i as u32,
            })
            .collect();

        let macs = MacAddress::random_local_set(&mut *self.rng.lock(), self.interfaces);
        let interfaces = macs
            .into_iter()
            .map(|mac| NetworkInterface {
                mac,
                binding: network.clone(),
                model: self.nic_model.clone(),
            })
            .collect();

        Ok(DomainSpec {
            name: identity.to_string(),
            memory_kib,
            vcpus,
            disks,
            interfaces,
            template: self.template.clone(),
        })
    }

    /// Register the node's domain; it is left stopped
    pub fn define_domain(
        &self,
        identity: &NodeIdentity,
        memory_mib: u64,
        vcpus: u32,
        network: &NetworkBinding,
        volume_paths: &[PathBuf],
    ) -> Result<DomainHandle> {
        let failed = |e: Error| Error::DomainDefine {
            identity: identity.to_string(),
            reason: e.to_string(),
        };

        let spec = self
            .build_spec(identity, memory_mib, vcpus, network, volume_paths)
            .map_err(failed)?;
        let handle = self.control_plane.define_domain(&spec).map_err(failed)?;

        info!(
            "Defined domain {} ({} MiB, {} vCPU, {} disks, {})",
            identity,
            memory_mib,
            vcpus,
            spec.disks.len(),
            network
        );
        Ok(handle)
    }

    /// Stop the node's domain if running, then remove its registration
    pub fn remove_domain(&self, identity: &NodeIdentity) -> DomainTeardown {
        let domain = match self.control_plane.lookup_domain(identity.as_str()) {
            Ok(Some(domain)) => domain,
            Ok(None) => {
                info!("Domain {} is already gone", identity);
                return DomainTeardown::absent();
            }
            Err(e) => {
                warn!("Cannot look up domain {}: {}", identity, e);
                return DomainTeardown {
                    stop: StepOutcome::Skipped,
                    undefine: StepOutcome::Failed(e.to_string()),
                };
            }
        };

        let stop = match self.control_plane.is_domain_active(&domain) {
            Ok(false) => StepOutcome::Skipped,
            Ok(true) => match self.control_plane.stop_domain(&domain) {
                Ok(()) => {
                    debug!("Stopped domain {}", identity);
                    StepOutcome::Done
                }
                Err(e) => {
                    warn!("Cannot stop domain {}: {}", identity, e);
                    StepOutcome::Failed(e.to_string())
                }
            },
            Err(e) => {
                warn!("Cannot read state of domain {}: {}", identity, e);
                StepOutcome::Failed(e.to_string())
            }
        };

        let undefine = match self.control_plane.undefine_domain(&domain) {
            Ok(()) => {
                info!("Removed domain {}", identity);
                StepOutcome::Done
            }
            Err(e) => {
                warn!("Cannot undefine domain {}: {}", identity, e);
                StepOutcome::Failed(e.to_string())
            }
        };

        DomainTeardown { stop, undefine }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{FaultPoint, MemoryControlPlane};
    use crate::fleet::resolve;
    use assert_matches::assert_matches;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn disk_files(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        (1..=count)
            .map(|i| {
                let path = dir.path().join(format!("maas-node-01-d{}.img", i));
                std::fs::write(&path, b"").unwrap();
                path
            })
            .collect()
    }

    fn provisioner(interfaces: u32) -> (Arc<MemoryControlPlane>, DomainProvisioner) {
        let config = FleetConfig {
            interfaces,
            ..Default::default()
        };
        let plane = Arc::new(MemoryControlPlane::new());
        let provisioner = DomainProvisioner::with_seed(plane.clone(), &config, 7);
        (plane, provisioner)
    }

    #[test]
    fn test_spec_layout() {
        let dir = TempDir::new().unwrap();
        let (_plane, provisioner) = provisioner(2);
        let identity = resolve(1, 3, "maas-node");
        let paths = disk_files(&dir, 3);

        let spec = provisioner
            .build_spec(&identity, 1024, 2, &NetworkBinding::network("maas"), &paths)
            .unwrap();

        assert_eq!(spec.name, "maas-node-01");
        assert_eq!(spec.memory_kib, 1_048_576);
        assert_eq!(spec.vcpus, 2);
        let targets: Vec<&str> = spec.disks.iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, vec!["sda", "sdb", "sdc"]);
        assert_eq!(spec.disks[2].path, paths[2]);
        assert_eq!(spec.disks[2].unit, 2);

        assert_eq!(spec.interfaces.len(), 2);
        assert_ne!(spec.interfaces[0].mac, spec.interfaces[1].mac);
        assert!(spec.interfaces.iter().all(|i| i.mac.is_local() && i.mac.is_unicast()));
        assert!(spec.interfaces.iter().all(|i| i.binding.name == "maas"));
    }

    #[test]
    fn test_macs_are_fresh_per_node() {
        let (_plane, provisioner) = provisioner(1);
        let network = NetworkBinding::network("maas");
        let macs: HashSet<MacAddress> = (1..=20)
            .map(|i| {
                let identity = resolve(i, 20, "maas-node");
                provisioner.build_spec(&identity, 512, 1, &network, &[]).unwrap().interfaces[0].mac
            })
            .collect();
        assert_eq!(macs.len(), 20);
    }

    #[test]
    fn test_memory_overflow_rejected() {
        let (_plane, provisioner) = provisioner(1);
        let identity = resolve(1, 1, "maas-node");
        assert_matches!(
            provisioner.build_spec(&identity, u64::MAX, 1, &NetworkBinding::network("maas"), &[]),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_define_leaves_domain_stopped() {
        let dir = TempDir::new().unwrap();
        let (plane, provisioner) = provisioner(1);
        let identity = resolve(1, 3, "maas-node");
        let paths = disk_files(&dir, 3);

        let handle = provisioner
            .define_domain(&identity, 1024, 1, &NetworkBinding::bridge("br0"), &paths)
            .unwrap();

        assert_eq!(handle.name, "maas-node-01");
        assert_eq!(plane.domain_names(), vec!["maas-node-01".to_string()]);
        let xml = plane.domain_xml("maas-node-01").unwrap();
        assert!(xml.contains("<boot dev=\"network\"/>"));
        assert!(xml.contains("<source bridge=\"br0\"/>"));
        assert!(!plane.is_closed());
    }

    #[test]
    fn test_define_failure_names_node() {
        let (plane, provisioner) = provisioner(1);
        plane.inject_fault(FaultPoint::DefineDomain, "maas-node-02");
        let identity = resolve(2, 3, "maas-node");

        assert_matches!(
            provisioner.define_domain(&identity, 1024, 1, &NetworkBinding::network("maas"), &[]),
            Err(Error::DomainDefine { identity, .. }) if identity == "maas-node-02"
        );
    }

    #[test]
    fn test_remove_running_domain() {
        let (plane, provisioner) = provisioner(1);
        let identity = resolve(1, 1, "maas-node");
        provisioner
            .define_domain(&identity, 1024, 1, &NetworkBinding::network("maas"), &[])
            .unwrap();
        plane.set_domain_active("maas-node-01", true).unwrap();

        let teardown = provisioner.remove_domain(&identity);

        assert_eq!(teardown.stop, StepOutcome::Done);
        assert_eq!(teardown.undefine, StepOutcome::Done);
        assert!(plane.domain_names().is_empty());
    }

    #[test]
    fn test_remove_stopped_and_absent_domains() {
        let (plane, provisioner) = provisioner(1);
        let identity = resolve(1, 1, "maas-node");
        provisioner
            .define_domain(&identity, 1024, 1, &NetworkBinding::network("maas"), &[])
            .unwrap();

        let first = provisioner.remove_domain(&identity);
        assert_eq!(first.stop, StepOutcome::Skipped);
        assert!(first.removed());

        let second = provisioner.remove_domain(&identity);
        assert_eq!(second, DomainTeardown::absent());
        assert!(!second.changed_state());
        assert!(plane.domain_names().is_empty());
    }

    #[test]
    fn test_stop_failure_still_attempts_undefine() {
        let (plane, provisioner) = provisioner(1);
        let identity = resolve(1, 1, "maas-node");
        provisioner
            .define_domain(&identity, 1024, 1, &NetworkBinding::network("maas"), &[])
            .unwrap();
        plane.set_domain_active("maas-node-01", true).unwrap();
        plane.inject_fault(FaultPoint::StopDomain, "maas-node-01");

        let teardown = provisioner.remove_domain(&identity);

        assert!(teardown.stop.is_failed());
        // a running domain cannot be undefined
        assert!(teardown.undefine.is_failed());
        assert!(!teardown.removed());
    }
}
