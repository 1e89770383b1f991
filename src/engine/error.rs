use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::Minute;

/// Every expected booking outcome other than success is a variant here; callers
/// receive them as values. `Invariant` is the one variant that signals a bug.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
    #[error("invalid time: {0:?}")]
    InvalidTime(String),
    #[error("invalid shift: {0}")]
    InvalidShift(&'static str),
    #[error("staff {staff_id} is not on shift on {date} at minute {minute}")]
    OutsideShift {
        staff_id: Ulid,
        date: NaiveDate,
        minute: Minute,
    },
    #[error("staff {staff_id} is busy: overlaps appointment {appointment_id}")]
    StaffBusy { staff_id: Ulid, appointment_id: Ulid },
    #[error("conflict with appointment: {0}")]
    Conflict(Ulid),
    #[error("no staff available")]
    NoStaffAvailable,
    #[error("staff {staff_id} is not qualified for service {service_id}")]
    NotQualified { staff_id: Ulid, service_id: Ulid },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{entity} {id} does not belong to branch {branch_id}")]
    BranchMismatch {
        entity: &'static str,
        id: Ulid,
        branch_id: Ulid,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("busy: lock wait exceeded, retry later")]
    Busy,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    pub fn not_found(entity: &str, id: Ulid) -> Self {
        EngineError::NotFound(format!("{entity} {id}"))
    }

    /// Build an invariant violation, logging it loudly at the point it is raised.
    pub fn invariant(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(target: "staffslot::invariant", "{msg}");
        EngineError::Invariant(msg)
    }

    /// Whether the same request may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::PersistenceFailure(_) | EngineError::Busy)
    }

    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidDuration(_) => "INVALID_DURATION",
            EngineError::InvalidTime(_) => "INVALID_TIME",
            EngineError::InvalidShift(_) => "INVALID_SHIFT",
            EngineError::OutsideShift { .. } => "OUTSIDE_SHIFT",
            EngineError::StaffBusy { .. } => "STAFF_BUSY",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::NoStaffAvailable => "NO_STAFF_AVAILABLE",
            EngineError::NotQualified { .. } => "NOT_QUALIFIED",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::BranchMismatch { .. } => "BRANCH_MISMATCH",
            EngineError::InvalidRequest(_) => "INVALID_REQUEST",
            EngineError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            EngineError::Busy => "BUSY",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::Invariant(_) => "INTERNAL",
        }
    }
}
