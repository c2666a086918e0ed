use std::collections::HashSet;

use chrono::NaiveDate;

use crate::access::Caller;
use crate::model::*;

use super::availability::free_within;
use super::hierarchy::EmployeeHierarchy;
use super::{Engine, SharedDeviceState, SharedLeave, WorkflowError};

impl Engine {
    pub fn employee(&self, id: &EmployeeId) -> Option<Employee> {
        self.directory.get(id)
    }

    // ── Leave ────────────────────────────────────────────────

    pub async fn leave(&self, id: &LeaveId) -> Option<LeaveRequest> {
        let slot = self.leaves.get(id).map(|e| e.value().clone())?;
        let guard = slot.read().await;
        Some(guard.clone())
    }

    /// Snapshot every leave request matching `keep`, newest first.
    async fn collect_leaves(&self, keep: impl Fn(&LeaveRequest) -> bool) -> Vec<LeaveRequest> {
        // Clone the Arcs out first; never hold a DashMap guard across an await.
        let slots: Vec<SharedLeave> = self.leaves.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for slot in slots {
            let guard = slot.read().await;
            if keep(&guard) {
                out.push(guard.clone());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn leaves_for_requester(&self, requester: EmployeeId) -> Vec<LeaveRequest> {
        self.collect_leaves(|lr| lr.requester_id == requester).await
    }

    /// Pending requests `reviewer` may act on: those of direct subordinates,
    /// plus those of unsupervised employees when the reviewer is top-level
    /// and the fallback applies.
    pub async fn pending_leaves_for_reviewer(&self, reviewer: &Caller) -> Vec<LeaveRequest> {
        let subordinates: HashSet<EmployeeId> = self.directory.subordinates_of(reviewer.id).into_iter().collect();
        let fallback = self.policy.top_level_fallback && reviewer.role.is_top_level();
        self.collect_leaves(|lr| {
            if lr.status != LeaveStatus::Pending || lr.requester_id == reviewer.id {
                return false;
            }
            subordinates.contains(&lr.requester_id)
                || (fallback && self.directory.supervisor_of(lr.requester_id).is_none())
        })
        .await
    }

    // ── Devices ──────────────────────────────────────────────

    pub async fn device(&self, id: &DeviceId) -> Option<Device> {
        let slot = self.devices.get(id).map(|e| e.value().clone())?;
        let guard = slot.read().await;
        Some(guard.device.clone())
    }

    pub(super) fn device_slots(&self) -> Vec<SharedDeviceState> {
        self.devices.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn list_devices(&self) -> Vec<Device> {
        let mut out = Vec::with_capacity(self.devices.len());
        for slot in self.device_slots() {
            out.push(slot.read().await.device.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn device_request(&self, id: &DeviceRequestId) -> Option<DeviceRequest> {
        let device_id = self.request_to_device.get(id).map(|e| *e.value())?;
        let slot = self.devices.get(&device_id).map(|e| e.value().clone())?;
        let guard = slot.read().await;
        guard.requests.get(id).cloned()
    }

    pub async fn device_requests_for_device(&self, device_id: &DeviceId) -> Result<Vec<DeviceRequest>, WorkflowError> {
        let slot = self.device_slot(device_id)?;
        let guard = slot.read().await;
        let mut out: Vec<DeviceRequest> = guard.requests.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub async fn device_requests_for_requester(&self, requester: EmployeeId) -> Vec<DeviceRequest> {
        let mut out = Vec::new();
        for slot in self.device_slots() {
            let guard = slot.read().await;
            out.extend(guard.requests.values().filter(|r| r.requester_id == requester).cloned());
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn room(&self, id: &RoomId) -> Option<MeetingRoom> {
        let slot = self.rooms.get(id).map(|e| e.value().clone())?;
        let guard = slot.read().await;
        Some(guard.room.clone())
    }

    pub async fn list_rooms(&self) -> Vec<MeetingRoom> {
        let slots: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.read().await.room.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Active bookings on one room-day, ordered by start time.
    pub async fn bookings_for_room_day(&self, room_id: &RoomId, date: NaiveDate) -> Result<Vec<Booking>, WorkflowError> {
        let slot = self.room_slot(room_id)?;
        let guard = slot.read().await;
        Ok(guard.active_on(date).cloned().collect())
    }

    pub async fn active_booking_for(&self, requester: &EmployeeId) -> Option<Booking> {
        let booking_id = self.active_bookings.get(requester).map(|e| *e.value())?;
        let room_id = self.booking_to_room.get(&booking_id).map(|e| *e.value())?;
        let slot = self.rooms.get(&room_id).map(|e| e.value().clone())?;
        let guard = slot.read().await;
        guard.booking(booking_id).filter(|b| b.is_active()).cloned()
    }

    /// Parts of `window` on `date` not taken by an active booking.
    pub async fn free_slots(
        &self,
        room_id: &RoomId,
        date: NaiveDate,
        window: TimeSpan,
    ) -> Result<Vec<TimeSpan>, WorkflowError> {
        let slot = self.room_slot(room_id)?;
        let guard = slot.read().await;
        let busy: Vec<TimeSpan> = guard.active_on(date).map(|b| b.span).collect();
        Ok(free_within(&window, &busy))
    }
}
