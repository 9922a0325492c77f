use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a VM.
///
/// ```text
/// Creating -> Booting -> Running -> Stopping -> Stopped
///     \          \          \          \           \
///      `----------`----------`----------`-----------`--> Destroyed
/// Creating | Booting | Running | Stopping --> Failed --> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    /// Registered; state directory and subprocess are being set up.
    Creating,
    /// Subprocess spawned; waiting for the control socket and boot.
    Booting,
    /// Guest booted.
    Running,
    /// Subprocess is being terminated.
    Stopping,
    /// Subprocess exited; the name stays reserved until destroyed.
    Stopped,
    /// Torn down and removed from the registry.
    Destroyed,
    /// Subprocess crashed or the control socket stopped answering.
    Failed,
}

impl VmStatus {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use VmStatus::{Booting, Creating, Destroyed, Failed, Running, Stopped, Stopping};
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed)
            | (Creating, Booting)
            | (Booting, Running)
            | (Running, Stopping)
            | (Stopping, Stopped)
            | (Creating | Booting | Running | Stopping, Failed) => true,
            _ => false,
        }
    }

    /// Returns `true` for every state a registered VM can be in.
    #[must_use]
    pub fn is_live(self) -> bool {
        self != Self::Destroyed
    }

    /// Upper-case label used by the CLI.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Booting => "BOOTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Destroyed => "DESTROYED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Booting => "booting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
