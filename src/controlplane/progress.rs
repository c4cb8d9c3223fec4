//! Progress Observers
//!
//! Implementations of [`ProgressObserver`]:
//! - Noop: ignores every event
//! - Logging: tracing events per batch and node
//! - Bar: terminal progress bar
//! - Recording: keeps every event, for tests and embedding callers

use crate::domain::lifecycle::{BatchReport, NodeOutcome, NodeReport, Operation};
use crate::domain::ports::ProgressObserver;
use crate::fleet::NodeRange;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {}

/// Observer that logs batch and node events
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProgress;

impl ProgressObserver for LoggingProgress {
    fn batch_started(&self, operation: Operation, range: &NodeRange) {
        info!("Starting {} of {} nodes {}", operation, range.count(), range);
    }

    fn node_finished(&self, report: &NodeReport) {
        match &report.outcome {
            NodeOutcome::Done => debug!("{} {}: done", report.operation, report.identity),
            NodeOutcome::Failed { step, reason } => {
                warn!("{} {}: failed at {}: {}", report.operation, report.identity, step, reason)
            }
        }
    }

    fn batch_finished(&self, report: &BatchReport) {
        info!(
            "Finished {}: {} attempted, {} succeeded, {} failed in {}ms",
            report.operation,
            report.attempted,
            report.succeeded,
            report.failed(),
            report.duration().num_milliseconds()
        );
    }
}

/// Observer that drives a terminal progress bar
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    const TEMPLATE: &'static str =
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template(Self::TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        Self { bar }
    }

    /// Bar that never draws, for non-interactive output
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarProgress {
    fn batch_started(&self, operation: Operation, range: &NodeRange) {
        self.bar.set_length(u64::from(range.count()));
        self.bar.set_position(0);
        self.bar.set_message(format!("{} {}", operation, range));
    }

    fn node_finished(&self, report: &NodeReport) {
        if let NodeOutcome::Failed { step, .. } = &report.outcome {
            self.bar
                .println(format!("{} failed at {}", report.identity, step));
        }
        self.bar.set_message(report.identity.to_string());
        self.bar.inc(1);
    }

    fn batch_finished(&self, report: &BatchReport) {
        self.bar.finish_with_message(format!(
            "{} {}/{} nodes",
            report.operation, report.succeeded, report.attempted
        ));
    }
}

// =============================================================================
// Recording
// =============================================================================

/// Event seen by [`RecordingProgress`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    BatchStarted { operation: Operation, range: NodeRange },
    NodeFinished(NodeReport),
    BatchFinished { attempted: u32, succeeded: u32 },
}

/// Observer that keeps every event in order
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Identities of finished nodes, in order
    pub fn finished_nodes(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::NodeFinished(report) => Some(report.identity.to_string()),
                _ => None,
            })
            .collect()
    }
}

impl ProgressObserver for RecordingProgress {
    fn batch_started(&self, operation: Operation, range: &NodeRange) {
        self.events.lock().push(ProgressEvent::BatchStarted {
            operation,
            range: *range,
        });
    }

    fn node_finished(&self, report: &NodeReport) {
        self.events
            .lock()
            .push(ProgressEvent::NodeFinished(report.clone()));
    }

    fn batch_finished(&self, report: &BatchReport) {
        self.events.lock().push(ProgressEvent::BatchFinished {
            attempted: report.attempted,
            succeeded: report.succeeded,
        });
    }
}
