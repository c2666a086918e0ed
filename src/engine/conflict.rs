use chrono::{NaiveDate, NaiveTime};

use crate::model::*;

use super::hierarchy::Directory;
use super::{ConflictDetail, WorkflowError};

pub(crate) fn validate_interval(start: NaiveTime, end: NaiveTime) -> Result<TimeSpan, WorkflowError> {
    TimeSpan::checked(start, end).ok_or(WorkflowError::InvalidInterval)
}

/// First active booking on `date` overlapping `span` (half-open, so
/// back-to-back bookings never collide).
pub(crate) fn find_conflict<'a>(rs: &'a RoomState, date: NaiveDate, span: &TimeSpan) -> Option<&'a Booking> {
    rs.overlapping(date, span).find(|b| b.is_active())
}

/// Caller holds the room lock, so the answer stays true until it is released.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    date: NaiveDate,
    span: &TimeSpan,
    directory: &Directory,
) -> Result<(), WorkflowError> {
    let Some(existing) = find_conflict(rs, date, span) else {
        return Ok(());
    };
    Err(WorkflowError::BookingConflict(Box::new(ConflictDetail {
        booking_id: existing.id,
        owner_id: existing.requester_id,
        owner_name: directory
            .name_of(&existing.requester_id)
            .unwrap_or_else(|| existing.requester_id.to_string()),
        date: existing.date,
        span: existing.span,
    })))
}
