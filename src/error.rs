// Harness Error Taxonomy
//
// Per-scenario errors are always converted into a RecoveryResult by the
// orchestrator; only control-plane failures abort an entire run, since no
// scenario result is trustworthy when the cluster API itself is down.

use thiserror::Error;

use crate::cluster::ClusterError;

/// Errors surfaced while driving a fault scenario.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The role holder for a fault could not be identified before injection.
    /// Reported as SKIPPED, never FAILED: a missing target is a precondition
    /// failure, not a test failure.
    #[error("no target found: {0}")]
    TargetNotFound(String),

    /// The destructive action itself could not be performed. Reported as
    /// FAILED immediately; recovery measurement is not attempted.
    #[error("fault injection failed: {0}")]
    InjectionFailed(String),

    /// The cluster control plane cannot be reached at all. Fatal: aborts the
    /// run after best-effort cleanup.
    #[error("control plane unreachable: {0}")]
    ControlPlane(String),
}

impl From<ClusterError> for HarnessError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Unreachable(msg) => HarnessError::ControlPlane(msg),
            other => HarnessError::InjectionFailed(other.to_string()),
        }
    }
}

impl HarnessError {
    /// Whether this error invalidates the whole run rather than one scenario.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarnessError::ControlPlane(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_plane_is_fatal() {
        assert!(HarnessError::ControlPlane("connection refused".into()).is_fatal());
        assert!(!HarnessError::TargetNotFound("no primary".into()).is_fatal());
        assert!(!HarnessError::InjectionFailed("forbidden".into()).is_fatal());
    }

    #[test]
    fn test_cluster_error_mapping() {
        let fatal: HarnessError = ClusterError::Unreachable("refused".into()).into();
        assert!(fatal.is_fatal());

        let scoped: HarnessError = ClusterError::CommandFailed {
            command: "kubectl delete pod web-0".into(),
            stderr: "pods \"web-0\" is forbidden".into(),
        }
        .into();
        assert!(!scoped.is_fatal());
    }
}
