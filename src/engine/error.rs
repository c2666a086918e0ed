use chrono::NaiveDate;
use strum::Display;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingId, EmployeeId, TimeSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Employee,
    LeaveRequest,
    Device,
    DeviceRequest,
    Room,
    Booking,
}

/// The active booking a new reservation collided with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDetail {
    pub booking_id: BookingId,
    pub owner_id: EmployeeId,
    pub owner_name: String,
    pub date: NaiveDate,
    pub span: TimeSpan,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Ulid },

    /// The operation is not defined from the record's current status.
    #[error("invalid state: operation not allowed from {current}")]
    InvalidState { current: String },

    #[error("not authorized: {0}")]
    NotAuthorized(&'static str),

    #[error("requester cannot review their own request")]
    SelfApproval,

    #[error("invalid date range: end date precedes start date")]
    InvalidDateRange,

    #[error("invalid interval: start must be before end")]
    InvalidInterval,

    #[error("invalid leave category: {0}")]
    InvalidCategory(String),

    #[error("a non-empty reason is required")]
    ReasonRequired,

    #[error("device {0} has no available units")]
    ResourceUnavailable(Ulid),

    #[error(
        "room already booked {} {}-{} by {} (booking {})",
        .0.date,
        .0.span.start.format("%H:%M"),
        .0.span.end.format("%H:%M"),
        .0.owner_name,
        .0.booking_id
    )]
    BookingConflict(Box<ConflictDetail>),

    #[error("requester already holds active booking {0}")]
    BookingLimitExceeded(BookingId),

    #[error("capacity {requested} is below the {outstanding} units currently checked out")]
    CapacityBelowOutstanding { outstanding: u32, requested: u32 },

    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(&'static str),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// Persistence failure. Opaque to callers; retry or escalate.
    #[error("journal error: {0}")]
    Journal(String),
}

impl WorkflowError {
    pub(crate) fn not_found(kind: EntityKind, id: Ulid) -> Self {
        WorkflowError::NotFound { kind, id }
    }

    pub(crate) fn invalid_state(current: impl ToString) -> Self {
        WorkflowError::InvalidState {
            current: current.to_string(),
        }
    }

    /// True for persistence failures, false for every business rejection.
    pub fn is_internal(&self) -> bool {
        matches!(self, WorkflowError::Journal(_))
    }

    /// Short machine-readable kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "not_found",
            WorkflowError::InvalidState { .. } => "invalid_state",
            WorkflowError::NotAuthorized(_) => "not_authorized",
            WorkflowError::SelfApproval => "self_approval",
            WorkflowError::InvalidDateRange => "invalid_date_range",
            WorkflowError::InvalidInterval => "invalid_interval",
            WorkflowError::InvalidCategory(_) => "invalid_category",
            WorkflowError::ReasonRequired => "reason_required",
            WorkflowError::ResourceUnavailable(_) => "resource_unavailable",
            WorkflowError::BookingConflict(_) => "booking_conflict",
            WorkflowError::BookingLimitExceeded(_) => "booking_limit_exceeded",
            WorkflowError::CapacityBelowOutstanding { .. } => "capacity_below_outstanding",
            WorkflowError::InvalidHierarchy(_) => "invalid_hierarchy",
            WorkflowError::LimitExceeded(_) => "limit_exceeded",
            WorkflowError::Journal(_) => "journal",
        }
    }
}
