//! Fleet Orchestrator
//!
//! Runs one create or destroy pass over a planned range:
//! - Create: provision storage, then define the domain
//! - Destroy: remove the domain, then destroy storage
//!
//! Nodes are processed one at a time in ascending index order. A node that
//! fails at a step is reported and skipped; the batch never rolls back.

use crate::config::FleetConfig;
use crate::controlplane::progress::NoopProgress;
use crate::domain::lifecycle::{
    BatchReport, NodeOutcome, NodeReport, Operation, Stage, Step,
};
use crate::domain::ports::{ControlPlaneRef, ProgressObserverRef};
use crate::error::Result;
use crate::fleet::{plan_detailed, NameResolver, NodeIdentity, NodeRange};
use crate::provisioning::{DomainProvisioner, StorageProvisioner};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives the per-node flows over one shared control plane connection
pub struct Orchestrator {
    config: FleetConfig,
    control_plane: ControlPlaneRef,
    storage: StorageProvisioner,
    domains: DomainProvisioner,
    observer: ProgressObserverRef,
}

impl Orchestrator {
    /// Create a new orchestrator over an open connection
    pub fn new(control_plane: ControlPlaneRef, config: FleetConfig) -> Self {
        Self {
            storage: StorageProvisioner::new(control_plane.clone(), &config),
            domains: DomainProvisioner::new(control_plane.clone(), &config),
            observer: Arc::new(NoopProgress),
            control_plane,
            config,
        }
    }

    /// Report progress to `observer`
    pub fn with_observer(mut self, observer: ProgressObserverRef) -> Self {
        self.observer = observer;
        self
    }

    /// Seed MAC generation
    pub fn with_mac_seed(mut self, seed: u64) -> Self {
        self.domains = DomainProvisioner::with_seed(self.control_plane.clone(), &self.config, seed);
        self
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn control_plane(&self) -> &ControlPlaneRef {
        &self.control_plane
    }

    /// Plan a range and run `operation` over it
    ///
    /// An invalid range is returned before any control plane call is made.
    pub fn execute(
        &self,
        operation: Operation,
        start: u32,
        count: u32,
        end: Option<u32>,
    ) -> Result<BatchReport> {
        let planned = plan_detailed(start, count, end)?;
        Ok(self.run(operation, planned.range))
    }

    pub fn create(&self, range: NodeRange) -> BatchReport {
        self.run(Operation::Create, range)
    }

    pub fn destroy(&self, range: NodeRange) -> BatchReport {
        self.run(Operation::Destroy, range)
    }

    /// Run one pass over every index of `range`
    pub fn run(&self, operation: Operation, range: NodeRange) -> BatchReport {
        info!(
            "Running {} over {} ({} nodes, prefix {}) on {}",
            operation,
            range,
            range.count(),
            self.config.prefix,
            self.control_plane.uri()
        );
        self.observer.batch_started(operation, &range);

        let started_at = Utc::now();
        let resolver = NameResolver::new(self.config.prefix.clone(), range);
        let delay = self.config.define_delay();

        let mut nodes = Vec::with_capacity(range.count() as usize);
        let mut succeeded = 0u32;

        for (index, identity) in resolver.identities() {
            let report = match operation {
                Operation::Create => self.create_node(index, identity),
                Operation::Destroy => self.destroy_node(index, identity),
            };

            if report.is_done() {
                succeeded += 1;
            }
            self.observer.node_finished(&report);
            nodes.push(report);

            if operation == Operation::Create && index < range.end() && !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }

        let report = BatchReport {
            operation,
            range,
            attempted: nodes.len() as u32,
            succeeded,
            nodes,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            "{} finished: {} of {} nodes succeeded",
            operation, report.succeeded, report.attempted
        );
        self.observer.batch_finished(&report);
        report
    }

    /// Release the control plane connection
    pub fn close(&self) -> Result<()> {
        self.control_plane.close()
    }

    fn create_node(&self, index: u32, identity: NodeIdentity) -> NodeReport {
        info!("Creating node {}", identity);
        let mut node = NodeReport::pending(index, identity, Operation::Create);

        let pool = match self.storage.provision_storage(&node.identity) {
            Ok(pool) => pool,
            Err(e) => return node.fail(Step::ProvisionStorage, e.to_string()),
        };
        node.advance(Step::ProvisionStorage);

        let defined = self.domains.define_domain(
            &node.identity,
            self.config.memory_mib,
            self.config.vcpus,
            &self.config.network,
            &pool.volume_paths(),
        );
        if let Err(e) = defined {
            return node.fail(Step::DefineDomain, e.to_string());
        }
        node.advance(Step::DefineDomain);

        node.finish()
    }

    fn destroy_node(&self, index: u32, identity: NodeIdentity) -> NodeReport {
        info!("Destroying node {}", identity);
        let mut node = NodeReport::pending(index, identity, Operation::Destroy);

        let domain = self.domains.remove_domain(&node.identity);
        let domain_failure = domain.undefine.failure_reason().map(str::to_string);
        node.domain_teardown = Some(domain);
        if let Some(reason) = domain_failure {
            // storage stays while a domain may still reference it
            return node.fail(Step::RemoveDomain, reason);
        }
        node.advance(Step::RemoveDomain);

        let storage = self.storage.destroy_storage(&node.identity);
        let storage_failure = storage.undefine.failure_reason().map(str::to_string);
        if storage.best_effort_failures() > 0 {
            debug!(
                "{} cleanup steps for {} were left behind",
                storage.best_effort_failures(),
                node.identity
            );
        }
        node.storage_teardown = Some(storage);
        if let Some(reason) = storage_failure {
            return node.fail(Step::DestroyStorage, reason);
        }
        node.advance(Step::DestroyStorage);

        node.finish()
    }
}

// =============================================================================
// Node Report Transitions
// =============================================================================

impl NodeReport {
    fn pending(index: u32, identity: NodeIdentity, operation: Operation) -> Self {
        Self {
            index,
            identity,
            operation,
            stage: Stage::Pending,
            outcome: NodeOutcome::Done,
            domain_teardown: None,
            storage_teardown: None,
        }
    }

    fn advance(&mut self, step: Step) {
        self.stage = step.completes();
        debug!("{} reached {}", self.identity, self.stage);
    }

    fn fail(mut self, step: Step, reason: String) -> Self {
        error!("Node {} failed at {}: {}", self.identity, step, reason);
        self.outcome = NodeOutcome::Failed { step, reason };
        self
    }

    fn finish(mut self) -> Self {
        self.stage = Stage::Done;
        info!("Node {} done", self.identity);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{FaultPoint, MemoryControlPlane};
    use crate::controlplane::progress::{ProgressEvent, RecordingProgress};
    use crate::domain::lifecycle::{DomainTeardown, StepOutcome};
    use crate::domain::ports::{ControlPlane, FilePermissions, PoolDefinition};
    use crate::error::Error;
    use crate::fleet::plan;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    struct Fleet {
        dir: TempDir,
        plane: Arc<MemoryControlPlane>,
        orchestrator: Orchestrator,
    }

    fn fleet() -> Fleet {
        let dir = TempDir::new().unwrap();
        let config = FleetConfig {
            storage_root: dir.path().to_path_buf(),
            define_delay_ms: 0,
            ..Default::default()
        };
        let plane = Arc::new(MemoryControlPlane::new());
        let orchestrator = Orchestrator::new(plane.clone(), config).with_mac_seed(42);
        Fleet {
            dir,
            plane,
            orchestrator,
        }
    }

    fn subdirectories(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_create_three_nodes() {
        let fleet = fleet();
        let report = fleet.orchestrator.create(plan(1, 3, None).unwrap());

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 3);
        assert!(report.is_complete());
        assert!(report.nodes.iter().all(|n| n.stage == Stage::Done));
        assert_eq!(
            fleet.plane.domain_names(),
            vec!["maas-node-01", "maas-node-02", "maas-node-03"]
        );
        assert_eq!(
            subdirectories(&fleet.dir),
            vec!["maas-node-01", "maas-node-02", "maas-node-03"]
        );

        let spec = fleet.plane.domain_spec("maas-node-02").unwrap();
        assert_eq!(spec.memory_kib, 1024 * 1024);
        assert_eq!(spec.disks.len(), 3);
        assert!(spec.disks[0]
            .path
            .ends_with("maas-node-02/maas-node-02-d1.img"));
    }

    #[test]
    fn test_create_then_destroy_round_trip() {
        let fleet = fleet();
        let range = plan(1, 3, None).unwrap();
        fleet.orchestrator.create(range);

        let report = fleet.orchestrator.destroy(range);

        assert_eq!(report.succeeded, 3);
        assert!(subdirectories(&fleet.dir).is_empty());
        for index in range.indices() {
            let identity = crate::fleet::resolve(index, range.end(), "maas-node");
            assert!(fleet.plane.lookup_domain(identity.as_str()).unwrap().is_none());
            assert!(fleet.plane.lookup_pool(identity.as_str()).unwrap().is_none());
        }
    }

    #[test]
    fn test_destroy_twice_is_idempotent() {
        let fleet = fleet();
        let range = plan(1, 2, None).unwrap();
        fleet.orchestrator.create(range);
        fleet.orchestrator.destroy(range);

        let second = fleet.orchestrator.destroy(range);

        assert!(second.is_complete());
        for node in &second.nodes {
            assert_eq!(node.domain_teardown, Some(DomainTeardown::absent()));
            let storage = node.storage_teardown.as_ref().unwrap();
            assert!(!storage.changed_state());
            assert_eq!(storage.directory, StepOutcome::Absent);
        }
    }

    #[test]
    fn test_colliding_pool_isolates_failure() {
        let fleet = fleet();
        fleet
            .plane
            .define_pool(&PoolDefinition {
                name: "maas-node-02".into(),
                path: fleet.dir.path().join("foreign"),
                permissions: FilePermissions::POOL_DIRECTORY,
            })
            .unwrap();

        let report = fleet.orchestrator.create(plan(1, 4, None).unwrap());

        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed(), 1);
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].identity.as_str(), "maas-node-02");
        assert_eq!(failed[0].failed_step(), Some(Step::ProvisionStorage));
        assert_eq!(failed[0].stage, Stage::Pending);
        assert_eq!(
            fleet.plane.domain_names(),
            vec!["maas-node-01", "maas-node-03", "maas-node-04"]
        );
        assert_eq!(
            subdirectories(&fleet.dir),
            vec!["maas-node-01", "maas-node-03", "maas-node-04"]
        );
    }

    #[test]
    fn test_destroy_cleans_partially_created_storage() {
        let fleet = fleet();
        fleet
            .plane
            .inject_fault(FaultPoint::CreateVolume, "maas-node-01-d2.img");

        let report = fleet.orchestrator.create(plan(1, 1, None).unwrap());
        assert_eq!(report.nodes[0].failed_step(), Some(Step::ProvisionStorage));
        assert_eq!(subdirectories(&fleet.dir), vec!["maas-node-01"]);
        fleet.plane.clear_faults();

        let report = fleet.orchestrator.destroy(plan(1, 1, None).unwrap());

        assert!(report.is_complete());
        let teardown = report.nodes[0].storage_teardown.as_ref().unwrap();
        assert_eq!(teardown.volumes.len(), 1);
        assert_eq!(teardown.directory, StepOutcome::Done);
        assert!(subdirectories(&fleet.dir).is_empty());
        assert!(fleet.plane.pool_names().is_empty());
    }

    #[test]
    fn test_define_failure_keeps_storage_for_cleanup() {
        let fleet = fleet();
        fleet.plane.inject_fault(FaultPoint::DefineDomain, "maas-node-01");
        let range = plan(1, 2, None).unwrap();

        let report = fleet.orchestrator.create(range);
        assert_eq!(report.nodes[0].failed_step(), Some(Step::DefineDomain));
        assert_eq!(report.nodes[0].stage, Stage::StorageProvisioned);
        assert!(report.nodes[1].is_done());
        assert!(fleet.plane.lookup_pool("maas-node-01").unwrap().is_some());

        let cleanup = fleet.orchestrator.destroy(range);
        assert!(cleanup.is_complete());
        assert!(subdirectories(&fleet.dir).is_empty());
    }

    #[test]
    fn test_rerun_create_reports_collisions() {
        let fleet = fleet();
        let range = plan(1, 2, None).unwrap();
        fleet.orchestrator.create(range);

        let again = fleet.orchestrator.create(range);
        assert_eq!(again.attempted, 2);
        assert_eq!(again.succeeded, 0);
        assert!(again
            .nodes
            .iter()
            .all(|n| n.failed_step() == Some(Step::ProvisionStorage)));
    }

    #[test]
    fn test_invalid_range_touches_nothing() {
        let fleet = fleet();

        let result = fleet.orchestrator.execute(Operation::Create, 3, 1, Some(2));

        assert_matches!(result, Err(Error::InvalidRange { start: 3, end: 2 }));
        assert_eq!(fleet.plane.call_count(), 0);
        assert!(subdirectories(&fleet.dir).is_empty());
    }

    #[test]
    fn test_execute_clamps_end() {
        let fleet = fleet();
        let report = fleet
            .orchestrator
            .execute(Operation::Create, 5, 3, Some(100))
            .unwrap();

        assert_eq!(report.range, NodeRange::new(5, 7).unwrap());
        assert_eq!(report.total(), 3);
        assert_eq!(
            fleet.plane.domain_names(),
            vec!["maas-node-05", "maas-node-06", "maas-node-07"]
        );
    }

    #[test]
    fn test_destroy_stops_running_domain() {
        let fleet = fleet();
        let range = plan(1, 1, None).unwrap();
        fleet.orchestrator.create(range);
        fleet.plane.set_domain_active("maas-node-01", true).unwrap();

        let report = fleet.orchestrator.destroy(range);

        assert!(report.is_complete());
        let teardown = report.nodes[0].domain_teardown.as_ref().unwrap();
        assert_eq!(teardown.stop, StepOutcome::Done);
        assert!(fleet.plane.domain_names().is_empty());
    }

    #[test]
    fn test_domain_removal_failure_keeps_storage() {
        let fleet = fleet();
        let range = plan(1, 2, None).unwrap();
        fleet.orchestrator.create(range);
        fleet.plane.inject_fault(FaultPoint::UndefineDomain, "maas-node-01");

        let report = fleet.orchestrator.destroy(range);

        assert_eq!(report.nodes[0].failed_step(), Some(Step::RemoveDomain));
        assert!(report.nodes[0].storage_teardown.is_none());
        assert!(report.nodes[1].is_done());
        assert!(fleet.plane.lookup_pool("maas-node-01").unwrap().is_some());
        assert_eq!(subdirectories(&fleet.dir), vec!["maas-node-01"]);
    }

    #[test]
    fn test_observer_sees_every_node() {
        let fleet = fleet();
        let recorder = Arc::new(RecordingProgress::new());
        let orchestrator = fleet.orchestrator.with_observer(recorder.clone());

        orchestrator.create(plan(1, 3, None).unwrap());

        assert_eq!(
            recorder.finished_nodes(),
            vec!["maas-node-01", "maas-node-02", "maas-node-03"]
        );
        let events = recorder.events();
        assert_matches!(events.first(), Some(ProgressEvent::BatchStarted { .. }));
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::BatchFinished {
                attempted: 3,
                succeeded: 3
            })
        );
    }

    #[test]
    fn test_close_releases_connection() {
        let fleet = fleet();
        fleet.orchestrator.close().unwrap();
        assert!(fleet.plane.is_closed());
    }
}
