use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use ulid::Ulid;

use crate::access::{Caller, Permission};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_interval};
use super::{EntityKind, Engine, WorkflowError, record_outcome};

impl Engine {
    pub async fn add_room(
        &self,
        caller: &Caller,
        name: &str,
        capacity: u32,
        location: Option<&str>,
    ) -> Result<MeetingRoom, WorkflowError> {
        caller.require(Permission::ManageRooms)?;
        if name.trim().is_empty() {
            return Err(WorkflowError::LimitExceeded("room name is empty"));
        }
        if name.len() > MAX_NAME_LEN || location.is_some_and(|l| l.len() > MAX_NAME_LEN) {
            return Err(WorkflowError::LimitExceeded("room name too long"));
        }
        let room = MeetingRoom {
            id: Ulid::new(),
            name: name.trim().to_string(),
            capacity,
            location: location.map(str::to_string),
        };
        let _journal = self.journal_gate.read().await;
        let event = Event::RoomAdded { room: room.clone() };
        self.wal_append(&event).await?;
        self.apply_top_level(&event);
        Ok(room)
    }

    fn booking_gate(&self, requester: EmployeeId) -> Arc<Mutex<()>> {
        self.booking_gates.entry(requester).or_default().value().clone()
    }

    /// Reserve `[start, end)` of `room` on `date` for the caller.
    ///
    /// Lock order: the caller's booking gate, then the room. The gate makes
    /// the one-active-booking check and the insert atomic per requester; the
    /// room lock does the same for the overlap scan and the insert.
    pub async fn create_booking(
        &self,
        caller: &Caller,
        room_id: RoomId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Booking, WorkflowError> {
        let result = self.create_booking_inner(caller, room_id, date, start, end).await;
        if matches!(result, Err(WorkflowError::BookingConflict(_))) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        }
        record_outcome("booking", "create", &result);
        result
    }

    async fn create_booking_inner(
        &self,
        caller: &Caller,
        room_id: RoomId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Booking, WorkflowError> {
        caller.require(Permission::BookRoom)?;
        let slot = self.room_slot(&room_id)?;
        let span = validate_interval(start, end)?;
        self.require_employee(&caller.id)?;

        let _journal = self.journal_gate.read().await;
        let gate = self.booking_gate(caller.id);
        let _held = gate.lock().await;
        if let Some(existing) = self.active_bookings.get(&caller.id) {
            return Err(WorkflowError::BookingLimitExceeded(*existing.value()));
        }

        let mut guard = slot.write().await;
        if guard.active_on(date).count() >= MAX_ACTIVE_BOOKINGS_PER_ROOM_DAY {
            return Err(WorkflowError::LimitExceeded("too many bookings on room for that day"));
        }
        check_no_conflict(&guard, date, &span, &self.directory)?;

        let now = Utc::now();
        let booking = Booking {
            id: Ulid::new(),
            room_id,
            requester_id: caller.id,
            date,
            span,
            status: BookingStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_to_room(&mut guard, &event);
        debug!(booking = %booking.id, room = %room_id, %date, requester = %caller.id, "booking created");
        Ok(booking)
    }

    pub async fn complete_booking(&self, caller: &Caller, id: BookingId) -> Result<Booking, WorkflowError> {
        let result = self.close_booking(caller, id, BookingStatus::Completed).await;
        record_outcome("booking", "complete", &result);
        result
    }

    /// The interval becomes bookable again as soon as this commits.
    pub async fn cancel_booking(&self, caller: &Caller, id: BookingId) -> Result<Booking, WorkflowError> {
        let result = self.close_booking(caller, id, BookingStatus::Cancelled).await;
        record_outcome("booking", "cancel", &result);
        result
    }

    async fn close_booking(
        &self,
        caller: &Caller,
        id: BookingId,
        to: BookingStatus,
    ) -> Result<Booking, WorkflowError> {
        let _journal = self.journal_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(id)
            .ok_or(WorkflowError::not_found(EntityKind::Booking, id))?;
        if booking.requester_id != caller.id {
            return Err(WorkflowError::NotAuthorized("only the booking owner may do this"));
        }
        if !booking.is_active() {
            return Err(WorkflowError::invalid_state(booking.status));
        }
        let room_id = booking.room_id;

        let event = Event::BookingClosed {
            id,
            room_id,
            status: to,
            at: Utc::now(),
        };
        self.wal_append(&event).await?;
        self.apply_to_room(&mut guard, &event);
        debug!(booking = %id, room = %room_id, status = %to, "booking closed");
        guard
            .booking(id)
            .cloned()
            .ok_or(WorkflowError::not_found(EntityKind::Booking, id))
    }
}
