//! Error types for the MAAS node manager
//!
//! Provides structured error types for range planning, control plane
//! access, and per-node storage and domain provisioning.

use thiserror::Error;

/// Unified error type for the node manager
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Planning Errors
    // =========================================================================
    #[error("Invalid node range: end {end} is before start {start}")]
    InvalidRange { start: u32, end: u32 },

    // =========================================================================
    // Control Plane Errors
    // =========================================================================
    #[error("Control plane connection to {uri} failed: {reason}")]
    ControlPlaneConnection { uri: String, reason: String },

    #[error("Control plane operation failed: {operation} {target}: {reason}")]
    ControlPlane {
        operation: String,
        target: String,
        reason: String,
    },

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Storage provisioning failed for {identity}: {reason}")]
    StorageProvision { identity: String, reason: String },

    #[error("Domain definition failed for {identity}: {reason}")]
    DomainDefine { identity: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How far an error reaches when it surfaces during a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Abort the whole invocation before (or instead of) processing nodes
    Run,
    /// Abort the current node, continue with the next index
    Node,
    /// Best-effort sub-step; logged and never escalated
    Step,
}

impl Error {
    /// Determine how far this error propagates
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::InvalidRange { .. }
            | Error::ControlPlaneConnection { .. }
            | Error::Configuration(_)
            | Error::YamlParse(_)
            | Error::Internal(_) => ErrorScope::Run,

            Error::StorageProvision { .. } | Error::DomainDefine { .. } => ErrorScope::Node,

            // Raw control plane and filesystem failures are folded into the
            // step that issued them
            Error::ControlPlane { .. }
            | Error::ResourceNotFound { .. }
            | Error::ResourceExists { .. }
            | Error::JsonParse(_)
            | Error::Io(_) => ErrorScope::Step,
        }
    }

    /// Check if this error must abort the invocation
    pub fn is_fatal(&self) -> bool {
        self.scope() == ErrorScope::Run
    }

    /// An empty range means "nothing to do", not a crash
    pub fn is_empty_range(&self) -> bool {
        matches!(self, Error::InvalidRange { .. })
    }

    /// Helper for control plane call failures
    pub fn control_plane(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Error::ControlPlane {
            operation: operation.into(),
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the node manager
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_scopes() {
        let err = Error::InvalidRange { start: 3, end: 2 };
        assert_eq!(err.scope(), ErrorScope::Run);
        assert!(err.is_fatal());
        assert!(err.is_empty_range());

        let err = Error::StorageProvision {
            identity: "maas-node-01".into(),
            reason: "pool exists".into(),
        };
        assert_eq!(err.scope(), ErrorScope::Node);
        assert!(!err.is_fatal());

        let err = Error::control_plane("vol-delete", "maas-node-01-d1.img", "busy");
        assert_eq!(err.scope(), ErrorScope::Step);
    }

    #[test]
    fn test_connection_error_is_fatal() {
        let err = Error::ControlPlaneConnection {
            uri: "qemu:///system".into(),
            reason: "permission denied".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_empty_range());
        assert!(err.to_string().contains("qemu:///system"));
    }
}
