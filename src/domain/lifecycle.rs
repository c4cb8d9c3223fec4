//! Node Lifecycle Types
//!
//! Per-node stages, named steps, best-effort sub-step outcomes and the
//! batch report assembled by the orchestrator.

use crate::fleet::{NodeIdentity, NodeRange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Operation / Step / Stage
// =============================================================================

/// Pass performed over a range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Destroy,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Destroy => write!(f, "destroy"),
        }
    }
}

/// Named step of a node flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    ProvisionStorage,
    DefineDomain,
    RemoveDomain,
    DestroyStorage,
}

impl Step {
    /// Stage a node reaches when this step succeeds
    pub fn completes(&self) -> Stage {
        match self {
            Step::ProvisionStorage => Stage::StorageProvisioned,
            Step::DefineDomain => Stage::DomainDefined,
            Step::RemoveDomain => Stage::DomainRemoved,
            Step::DestroyStorage => Stage::StorageDestroyed,
        }
    }

    /// Ordered steps of an operation
    pub fn flow(operation: Operation) -> [Step; 2] {
        match operation {
            Operation::Create => [Step::ProvisionStorage, Step::DefineDomain],
            Operation::Destroy => [Step::RemoveDomain, Step::DestroyStorage],
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::ProvisionStorage => write!(f, "provision-storage"),
            Step::DefineDomain => write!(f, "define-domain"),
            Step::RemoveDomain => write!(f, "remove-domain"),
            Step::DestroyStorage => write!(f, "destroy-storage"),
        }
    }
}

/// Last stage a node reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Pending,
    StorageProvisioned,
    DomainDefined,
    DomainRemoved,
    StorageDestroyed,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Pending => write!(f, "pending"),
            Stage::StorageProvisioned => write!(f, "storage-provisioned"),
            Stage::DomainDefined => write!(f, "domain-defined"),
            Stage::DomainRemoved => write!(f, "domain-removed"),
            Stage::StorageDestroyed => write!(f, "storage-destroyed"),
            Stage::Done => write!(f, "done"),
        }
    }
}

// =============================================================================
// Best-Effort Outcomes
// =============================================================================

/// Result of one cleanup sub-step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "reason")]
pub enum StepOutcome {
    /// The sub-step changed state
    Done,
    /// Nothing to act on
    Absent,
    /// Not needed (e.g. stopping a domain that is not running)
    Skipped,
    /// The sub-step failed; the reason was logged
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            StepOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Deletion outcome of a single volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTeardown {
    pub name: String,
    pub outcome: StepOutcome,
}

/// Sub-step outcomes of tearing down one node's storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTeardown {
    pub volumes: Vec<VolumeTeardown>,
    pub deactivate: StepOutcome,
    pub undefine: StepOutcome,
    pub directory: StepOutcome,
}

impl StorageTeardown {
    /// No pool was defined under this identity
    pub fn absent(directory: StepOutcome) -> Self {
        Self {
            volumes: Vec::new(),
            deactivate: StepOutcome::Absent,
            undefine: StepOutcome::Absent,
            directory,
        }
    }

    /// Pool definition is gone (or never existed)
    pub fn pool_removed(&self) -> bool {
        !self.undefine.is_failed()
    }

    /// Whether anything existed to tear down
    pub fn changed_state(&self) -> bool {
        self.undefine.is_done()
            || self.directory.is_done()
            || self.volumes.iter().any(|v| v.outcome.is_done())
    }

    /// Failed sub-steps that are tolerated
    pub fn best_effort_failures(&self) -> usize {
        self.volumes.iter().filter(|v| v.outcome.is_failed()).count()
            + usize::from(self.deactivate.is_failed())
            + usize::from(self.directory.is_failed())
    }
}

/// Sub-step outcomes of removing one node's domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTeardown {
    pub stop: StepOutcome,
    pub undefine: StepOutcome,
}

impl DomainTeardown {
    /// No domain was registered under this identity
    pub fn absent() -> Self {
        Self {
            stop: StepOutcome::Absent,
            undefine: StepOutcome::Absent,
        }
    }

    /// Registration is gone (or never existed)
    pub fn removed(&self) -> bool {
        !self.undefine.is_failed()
    }

    pub fn changed_state(&self) -> bool {
        self.stop.is_done() || self.undefine.is_done()
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Terminal state of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum NodeOutcome {
    Done,
    Failed { step: Step, reason: String },
}

/// What happened to one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub index: u32,
    pub identity: NodeIdentity,
    pub operation: Operation,
    /// Last stage reached
    pub stage: Stage,
    pub outcome: NodeOutcome,
    /// Sub-step detail of a destroy pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_teardown: Option<DomainTeardown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_teardown: Option<StorageTeardown>,
}

impl NodeReport {
    pub fn is_done(&self) -> bool {
        self.outcome == NodeOutcome::Done
    }

    /// Step the node failed at, if any
    pub fn failed_step(&self) -> Option<Step> {
        match &self.outcome {
            NodeOutcome::Done => None,
            NodeOutcome::Failed { step, .. } => Some(*step),
        }
    }
}

/// Aggregate result of one create or destroy pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub operation: Operation,
    pub range: NodeRange,
    pub attempted: u32,
    pub succeeded: u32,
    pub nodes: Vec<NodeReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    /// Nodes in the resolved range, `end - start + 1`
    pub fn total(&self) -> u32 {
        self.range.count()
    }

    pub fn failed(&self) -> u32 {
        self.attempted - self.succeeded
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|node| !node.is_done())
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded == self.total()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_flows() {
        assert_eq!(
            Step::flow(Operation::Create),
            [Step::ProvisionStorage, Step::DefineDomain]
        );
        assert_eq!(
            Step::flow(Operation::Destroy),
            [Step::RemoveDomain, Step::DestroyStorage]
        );
        assert_eq!(Step::DefineDomain.completes(), Stage::DomainDefined);
        assert_eq!(Step::RemoveDomain.to_string(), "remove-domain");
    }

    #[test]
    fn test_storage_teardown_accounting() {
        let teardown = StorageTeardown {
            volumes: vec![
                VolumeTeardown {
                    name: "a".into(),
                    outcome: StepOutcome::Done,
                },
                VolumeTeardown {
                    name: "b".into(),
                    outcome: StepOutcome::Failed("busy".into()),
                },
            ],
            deactivate: StepOutcome::Done,
            undefine: StepOutcome::Done,
            directory: StepOutcome::Failed("not empty".into()),
        };
        assert!(teardown.pool_removed());
        assert!(teardown.changed_state());
        assert_eq!(teardown.best_effort_failures(), 2);

        let absent = StorageTeardown::absent(StepOutcome::Absent);
        assert!(absent.pool_removed());
        assert!(!absent.changed_state());
        assert_eq!(absent.best_effort_failures(), 0);
    }

    #[test]
    fn test_step_outcome_serialization() {
        let json = serde_json::to_value(StepOutcome::Failed("busy".into())).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "busy");
        assert_eq!(StepOutcome::Failed("x".into()).failure_reason(), Some("x"));
        assert_eq!(StepOutcome::Absent.failure_reason(), None);
    }

    #[test]
    fn test_domain_teardown() {
        assert!(DomainTeardown::absent().removed());
        assert!(!DomainTeardown::absent().changed_state());

        let failed = DomainTeardown {
            stop: StepOutcome::Failed("timeout".into()),
            undefine: StepOutcome::Failed("still running".into()),
        };
        assert!(!failed.removed());
    }
}
