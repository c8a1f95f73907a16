use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use tokio_util::sync::CancellationToken;

/// Progress value reported for a cancelled transfer.
pub const CANCELLED_PROGRESS: f64 = -1.0;

/// Per-file transfer state.
///
/// `Idle -> Transferring -> {Completed | Cancelled | Failed}`. The three terminal
/// states are final.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferState {
    Idle,
    Transferring { percent: f64 },
    Completed,
    Cancelled,
    Failed { reason: String },
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Cancelled | TransferState::Failed { .. }
        )
    }

    /// Progress in percent, or [`CANCELLED_PROGRESS`] for a cancelled transfer.
    pub fn progress(&self) -> f64 {
        match self {
            TransferState::Idle | TransferState::Failed { .. } => 0.0,
            TransferState::Transferring { percent } => *percent,
            TransferState::Completed => 100.0,
            TransferState::Cancelled => CANCELLED_PROGRESS,
        }
    }
}

impl Display for TransferState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TransferState::Idle => write!(f, "idle"),
            TransferState::Transferring { percent } => write!(f, "transferring ({:.0}%)", percent),
            TransferState::Completed => write!(f, "completed"),
            TransferState::Cancelled => write!(f, "cancelled"),
            TransferState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Abort capability for one in-flight transfer.
///
/// Invoking it only requests the abort; the transfer's own transition to
/// [`TransferState::Cancelled`] is the authoritative signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation. Returns `false` if the handle was already invoked.
    pub fn invoke(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_invoked(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token the transfer task waits on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
