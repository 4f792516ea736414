use tracing::{debug, warn};

use super::conflict::Verdict;
use super::EngineError;

/// Where a booking request stands.
///
/// `Received → Validated → Committed` on success, `Received → Rejected` on any
/// failure. A validated request whose store write fails also ends `Rejected`;
/// in both cases the store is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Committed,
    Rejected,
}

impl Stage {
    pub fn on_verdict(self, verdict: &Verdict) -> Stage {
        match (self, verdict) {
            (Stage::Received, Verdict::Accept) => Stage::Validated,
            (Stage::Received, Verdict::Reject(_)) => Stage::Rejected,
            (other, _) => other,
        }
    }

    pub fn on_commit(self) -> Stage {
        match self {
            Stage::Validated => Stage::Committed,
            other => other,
        }
    }

    /// Request failed before or at the write. Terminal stages stay put.
    pub fn on_failure(self) -> Stage {
        match self {
            Stage::Received | Stage::Validated => Stage::Rejected,
            other => other,
        }
    }

    #[cfg(test)]
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Committed | Stage::Rejected)
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Committed => "committed",
            Stage::Rejected => "rejected",
        }
    }
}

/// Booking mutation kind, for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Close out a request: failures move it to `Rejected`, then the terminal
/// stage is logged and counted.
pub(super) fn conclude<T>(op: Operation, stage: Stage, result: &Result<T, EngineError>) -> Stage {
    let stage = match result {
        Ok(_) => stage,
        Err(_) => stage.on_failure(),
    };
    match result {
        Ok(_) => debug!(operation = op.label(), stage = stage.label(), "booking request done"),
        Err(e) if e.is_rejection() => {
            debug!(operation = op.label(), stage = stage.label(), "booking request rejected: {e}")
        }
        Err(e) => {
            warn!(operation = op.label(), stage = stage.label(), "booking request failed: {e}")
        }
    }
    metrics::counter!(
        crate::observability::BOOKING_DECISIONS_TOTAL,
        "operation" => op.label(),
        "stage" => stage.label()
    )
    .increment(1);
    stage
}
