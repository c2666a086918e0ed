use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use ulid::Ulid;

use crate::access::Role;

pub type EmployeeId = Ulid;
pub type LeaveId = Ulid;
pub type DeviceId = Ulid;
pub type DeviceRequestId = Ulid;
pub type RoomId = Ulid;
pub type BookingId = Ulid;

pub type Timestamp = DateTime<Utc>;

/// Half-open time-of-day interval `[start, end)` within a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSpan {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeSpan start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn checked(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

// ── Enumerations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LeaveCategory {
    Annual,
    Sick,
    Personal,
    Marriage,
    Maternity,
    Bereavement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl LeaveStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LeaveStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceRequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Collected,
    ReturnPending,
    Returned,
}

impl DeviceRequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeviceRequestStatus::Rejected | DeviceRequestStatus::Cancelled | DeviceRequestStatus::Returned
        )
    }

    /// The request currently holds a physical unit.
    pub fn holds_unit(self) -> bool {
        matches!(self, DeviceRequestStatus::Collected | DeviceRequestStatus::ReturnPending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum BookingStatus {
    Active,
    Completed,
    Cancelled,
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub role: Role,
    pub supervisor_id: Option<EmployeeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: LeaveId,
    pub requester_id: EmployeeId,
    pub category: LeaveCategory,
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    pub reason: String,
    pub status: LeaveStatus,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<EmployeeId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl LeaveRequest {
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub category: String,
    pub total_quantity: u32,
    pub available_quantity: u32,
    pub description: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub id: DeviceRequestId,
    pub device_id: DeviceId,
    pub requester_id: EmployeeId,
    pub status: DeviceRequestStatus,
    pub rejection_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRoom {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    pub requester_id: EmployeeId,
    pub date: NaiveDate,
    pub span: TimeSpan,
    pub status: BookingStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }
}

// ── Lock-guarded aggregates ──────────────────────────────────────

/// A device together with every request against it. Counters and request
/// statuses live behind the same lock so they move together.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub device: Device,
    pub requests: HashMap<DeviceRequestId, DeviceRequest>,
}

impl DeviceState {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            requests: HashMap::new(),
        }
    }

    /// Requests currently holding a unit (collected or awaiting return confirmation).
    pub fn outstanding(&self) -> u32 {
        self.requests.values().filter(|r| r.status.holds_unit()).count() as u32
    }

    pub fn is_consistent(&self) -> bool {
        let outstanding = self.outstanding();
        self.device.available_quantity <= self.device.total_quantity
            && self.device.total_quantity.checked_sub(outstanding) == Some(self.device.available_quantity)
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: MeetingRoom,
    /// All bookings (any status), sorted by `(date, span.start)`.
    pub bookings: Vec<Booking>,
    /// Sort key of every booking in `bookings`.
    keys: HashMap<BookingId, (NaiveDate, NaiveTime)>,
}

impl RoomState {
    pub fn new(room: MeetingRoom) -> Self {
        Self {
            room,
            bookings: Vec::new(),
            keys: HashMap::new(),
        }
    }

    /// Insert maintaining sort order by `(date, span.start)`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.span.start);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.date, b.span.start))
            .unwrap_or_else(|e| e);
        self.keys.insert(booking.id, key);
        self.bookings.insert(pos, booking);
    }

    /// Position of `id` in `bookings`: its sort key bounds the search to the
    /// few bookings sharing that key.
    fn position(&self, id: BookingId) -> Option<usize> {
        let key = *self.keys.get(&id)?;
        let from = self.bookings.partition_point(|b| (b.date, b.span.start) < key);
        self.bookings[from..]
            .iter()
            .take_while(|b| (b.date, b.span.start) == key)
            .position(|b| b.id == id)
            .map(|offset| from + offset)
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.position(id).map(|i| &self.bookings[i])
    }

    pub fn booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.position(id).map(|i| &mut self.bookings[i])
    }

    /// Bookings on `date` whose span overlaps `query`, any status.
    /// Binary search bounds the scan to that date and to starts before `query.end`.
    pub fn overlapping(&self, date: NaiveDate, query: &TimeSpan) -> impl Iterator<Item = &Booking> {
        let left = self.bookings.partition_point(|b| b.date < date);
        let right = self
            .bookings
            .partition_point(|b| (b.date, b.span.start) < (date, query.end));
        self.bookings[left..right.max(left)]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn active_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        let left = self.bookings.partition_point(|b| b.date < date);
        let right = self.bookings.partition_point(|b| b.date <= date);
        self.bookings[left..right].iter().filter(|b| b.is_active())
    }
}

// ── Journal records ──────────────────────────────────────────────

/// Flat event records. One record per committed transition; this is the WAL format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    EmployeeRegistered {
        id: EmployeeId,
        name: String,
        role: Role,
        supervisor_id: Option<EmployeeId>,
    },
    SupervisorAssigned {
        id: EmployeeId,
        supervisor_id: Option<EmployeeId>,
    },
    LeaveSubmitted {
        request: LeaveRequest,
    },
    LeaveTransitioned {
        id: LeaveId,
        status: LeaveStatus,
        actor_id: EmployeeId,
        rejection_reason: Option<String>,
        at: Timestamp,
    },
    DeviceAdded {
        device: Device,
    },
    DeviceDetailsUpdated {
        id: DeviceId,
        name: String,
        category: String,
        description: Option<String>,
    },
    /// Absolute post-adjustment counters, so replay never re-derives them.
    DeviceCapacityAdjusted {
        id: DeviceId,
        total_quantity: u32,
        available_quantity: u32,
    },
    DeviceRequested {
        request: DeviceRequest,
    },
    /// Entering `Collected` decrements the device's available count and
    /// entering `Returned` increments it, in the same record.
    DeviceRequestTransitioned {
        id: DeviceRequestId,
        device_id: DeviceId,
        status: DeviceRequestStatus,
        rejection_reason: Option<String>,
        at: Timestamp,
    },
    RoomAdded {
        room: MeetingRoom,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingClosed {
        id: BookingId,
        room_id: RoomId,
        status: BookingStatus,
        at: Timestamp,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn booking(date: NaiveDate, start: NaiveTime, end: NaiveTime, status: BookingStatus) -> Booking {
        let now = Utc::now();
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            requester_id: Ulid::new(),
            date,
            span: TimeSpan::new(start, end),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    fn room() -> RoomState {
        RoomState::new(MeetingRoom {
            id: Ulid::new(),
            name: "Aquarium".into(),
            capacity: 6,
            location: None,
        })
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = TimeSpan::new(t(9, 0), t(10, 0));
        let b = TimeSpan::new(t(9, 30), t(10, 30));
        let c = TimeSpan::new(t(10, 0), t(11, 0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back
        assert_eq!(a.minutes(), 60);
    }

    #[test]
    fn checked_span_rejects_empty_and_inverted() {
        assert!(TimeSpan::checked(t(9, 0), t(9, 0)).is_none());
        assert!(TimeSpan::checked(t(10, 0), t(9, 0)).is_none());
        assert!(TimeSpan::checked(t(9, 0), t(9, 1)).is_some());
    }

    #[test]
    fn leave_category_parses_case_insensitively() {
        assert_eq!("annual".parse::<LeaveCategory>().unwrap(), LeaveCategory::Annual);
        assert_eq!("Bereavement".parse::<LeaveCategory>().unwrap(), LeaveCategory::Bereavement);
        assert!("sabbatical".parse::<LeaveCategory>().is_err());
        assert_eq!(LeaveCategory::Maternity.to_string(), "maternity");
    }

    #[test]
    fn device_status_classification() {
        assert!(DeviceRequestStatus::Returned.is_terminal());
        assert!(!DeviceRequestStatus::ReturnPending.is_terminal());
        assert!(DeviceRequestStatus::ReturnPending.holds_unit());
        assert!(!DeviceRequestStatus::Approved.holds_unit());
        assert_eq!(DeviceRequestStatus::ReturnPending.to_string(), "return_pending");
    }

    #[test]
    fn bookings_kept_sorted_by_date_then_start() {
        let mut rs = room();
        rs.insert_booking(booking(day(2), t(9, 0), t(10, 0), BookingStatus::Active));
        rs.insert_booking(booking(day(1), t(14, 0), t(15, 0), BookingStatus::Active));
        rs.insert_booking(booking(day(1), t(8, 0), t(9, 0), BookingStatus::Active));
        let keys: Vec<_> = rs.bookings.iter().map(|b| (b.date, b.span.start)).collect();
        assert_eq!(keys, vec![(day(1), t(8, 0)), (day(1), t(14, 0)), (day(2), t(9, 0))]);
    }

    #[test]
    fn overlapping_stays_within_date() {
        let mut rs = room();
        rs.insert_booking(booking(day(1), t(9, 0), t(10, 0), BookingStatus::Active));
        rs.insert_booking(booking(day(2), t(9, 0), t(10, 0), BookingStatus::Active));
        let hits: Vec<_> = rs.overlapping(day(2), &TimeSpan::new(t(9, 30), t(9, 45))).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].date, day(2));
    }

    #[test]
    fn overlapping_skips_adjacent_and_later() {
        let mut rs = room();
        rs.insert_booking(booking(day(1), t(8, 0), t(9, 0), BookingStatus::Active));
        rs.insert_booking(booking(day(1), t(11, 0), t(12, 0), BookingStatus::Active));
        let hits: Vec<_> = rs.overlapping(day(1), &TimeSpan::new(t(9, 0), t(11, 0))).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_catches_long_booking_spanning_query() {
        let mut rs = room();
        rs.insert_booking(booking(day(1), t(8, 0), t(18, 0), BookingStatus::Active));
        let hits: Vec<_> = rs.overlapping(day(1), &TimeSpan::new(t(12, 0), t(13, 0))).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn active_on_ignores_closed_bookings() {
        let mut rs = room();
        rs.insert_booking(booking(day(1), t(8, 0), t(9, 0), BookingStatus::Cancelled));
        rs.insert_booking(booking(day(1), t(9, 0), t(10, 0), BookingStatus::Active));
        rs.insert_booking(booking(day(1), t(10, 0), t(11, 0), BookingStatus::Completed));
        assert_eq!(rs.active_on(day(1)).count(), 1);
        assert_eq!(rs.active_on(day(2)).count(), 0);
    }

    #[test]
    fn booking_lookup_finds_each_of_a_shared_key() {
        let mut rs = room();
        let cancelled = booking(day(1), t(9, 0), t(10, 0), BookingStatus::Cancelled);
        let active = booking(day(1), t(9, 0), t(9, 30), BookingStatus::Active);
        let later = booking(day(3), t(7, 0), t(8, 0), BookingStatus::Active);
        for b in [&later, &cancelled, &active] {
            rs.insert_booking(b.clone());
        }
        assert_eq!(rs.booking(cancelled.id), Some(&cancelled));
        assert_eq!(rs.booking(active.id), Some(&active));
        assert_eq!(rs.booking(later.id), Some(&later));
        assert!(rs.booking(Ulid::new()).is_none());

        rs.booking_mut(active.id).unwrap().status = BookingStatus::Completed;
        assert_eq!(rs.booking(active.id).unwrap().status, BookingStatus::Completed);
    }

    #[test]
    fn device_consistency_counts_held_units() {
        let now = Utc::now();
        let device_id = Ulid::new();
        let mut ds = DeviceState::new(Device {
            id: device_id,
            name: "Laptop".into(),
            category: "computer".into(),
            total_quantity: 3,
            available_quantity: 2,
            description: None,
            created_at: now,
        });
        assert!(!ds.is_consistent());
        let id = Ulid::new();
        ds.requests.insert(
            id,
            DeviceRequest {
                id,
                device_id,
                requester_id: Ulid::new(),
                status: DeviceRequestStatus::ReturnPending,
                rejection_reason: None,
                created_at: now,
                updated_at: now,
            },
        );
        assert_eq!(ds.outstanding(), 1);
        assert!(ds.is_consistent());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking(day(1), t(9, 0), t(10, 0), BookingStatus::Active),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
