// ABOUTME: Deployment lifecycle states and the legal transition table.
// ABOUTME: Runtime-checked transitions with always-open hatches to Error and Idle.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Idle,
    Configuring,
    Provisioning,
    Starting,
    Healthy,
    Stopped,
    Error,
    Restarting,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 8] = [
        DeploymentStatus::Idle,
        DeploymentStatus::Configuring,
        DeploymentStatus::Provisioning,
        DeploymentStatus::Starting,
        DeploymentStatus::Healthy,
        DeploymentStatus::Stopped,
        DeploymentStatus::Error,
        DeploymentStatus::Restarting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Idle => "idle",
            DeploymentStatus::Configuring => "configuring",
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::Starting => "starting",
            DeploymentStatus::Healthy => "healthy",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Error => "error",
            DeploymentStatus::Restarting => "restarting",
        }
    }

    /// States in which the deployment must hold a container and a port.
    pub fn requires_container(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Healthy | DeploymentStatus::Starting | DeploymentStatus::Restarting
        )
    }

    /// States whose transitions clear the container and port references.
    pub fn clears_container(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Stopped | DeploymentStatus::Error | DeploymentStatus::Idle
        )
    }

    /// States that count against the running-fleet capacity gate.
    pub fn counts_as_running(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Healthy
                | DeploymentStatus::Starting
                | DeploymentStatus::Provisioning
                | DeploymentStatus::Configuring
                | DeploymentStatus::Restarting
        )
    }

    /// Whether `self -> to` appears in the transition table.
    ///
    /// Self-transitions are always legal. The hatches to `Error` and `Idle`
    /// are handled by [`transition`], not here.
    fn table_allows(&self, to: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        if *self == to {
            return true;
        }
        match self {
            Idle => matches!(to, Configuring | Provisioning | Error),
            Configuring => matches!(to, Provisioning | Error),
            Provisioning => matches!(to, Starting | Error),
            Starting => matches!(to, Healthy | Error),
            Healthy => matches!(to, Stopped | Error | Restarting),
            Stopped => matches!(to, Idle | Configuring | Starting | Error),
            Restarting => matches!(to, Starting | Healthy | Error),
            Error => matches!(to, Idle | Configuring | Stopped | Restarting),
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal deployment state transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: DeploymentStatus,
    pub to: DeploymentStatus,
}

/// Check a state transition against the table.
///
/// Any state may move to `Error` or `Idle` regardless of the table; cleanup
/// paths rely on this. Hatch uses outside the table are logged prominently so
/// frequent use shows up as the bug signal it is.
pub fn transition(
    from: DeploymentStatus,
    to: DeploymentStatus,
) -> Result<DeploymentStatus, TransitionError> {
    if from.table_allows(to) {
        return Ok(to);
    }

    if matches!(to, DeploymentStatus::Error | DeploymentStatus::Idle) {
        tracing::warn!(%from, %to, "state transition used the escape hatch");
        return Ok(to);
    }

    Err(TransitionError { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::*;

    #[test]
    fn self_transitions_always_legal() {
        for s in DeploymentStatus::ALL {
            assert_eq!(transition(s, s), Ok(s));
        }
    }

    #[test]
    fn hatches_always_legal() {
        for s in DeploymentStatus::ALL {
            assert_eq!(transition(s, Error), Ok(Error));
            assert_eq!(transition(s, Idle), Ok(Idle));
        }
    }

    #[test]
    fn table_closure() {
        // Every pair not in the table and not a hatch must fail.
        let legal: &[(DeploymentStatus, DeploymentStatus)] = &[
            (Idle, Configuring),
            (Idle, Provisioning),
            (Configuring, Provisioning),
            (Provisioning, Starting),
            (Starting, Healthy),
            (Healthy, Stopped),
            (Healthy, Restarting),
            (Stopped, Configuring),
            (Stopped, Starting),
            (Restarting, Starting),
            (Restarting, Healthy),
            (Error, Configuring),
            (Error, Stopped),
            (Error, Restarting),
        ];

        for from in DeploymentStatus::ALL {
            for to in DeploymentStatus::ALL {
                let expected_ok = from == to
                    || matches!(to, Error | Idle)
                    || legal.contains(&(from, to));
                assert_eq!(
                    transition(from, to).is_ok(),
                    expected_ok,
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn spawn_entry_states() {
        assert!(transition(Idle, Configuring).is_ok());
        assert!(transition(Stopped, Configuring).is_ok());
        assert!(transition(Error, Configuring).is_ok());
        assert!(transition(Healthy, Configuring).is_err());
    }

    #[test]
    fn capacity_states_match_fleet_gate() {
        for s in [Healthy, Starting, Provisioning, Configuring, Restarting] {
            assert!(s.counts_as_running());
        }
        for s in [Idle, Stopped, Error] {
            assert!(!s.counts_as_running());
            assert!(s.clears_container());
        }
    }
}
