mod availability;
mod booking;
mod conflict;
mod error;
pub mod hierarchy;
mod inventory;
mod leave;
mod queries;
mod snapshot;

pub use availability::{free_within, merge_overlapping, subtract_spans};
pub use error::{ConflictDetail, EntityKind, WorkflowError};
pub use hierarchy::{Directory, EmployeeHierarchy, authorize_review};
pub use leave::LeavePolicy;
pub use snapshot::InventoryDrift;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{error, info};

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedLeave = Arc<RwLock<LeaveRequest>>;
pub type SharedDeviceState = Arc<RwLock<DeviceState>>;
pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Takes the first pending append, drains whatever else is
/// already queued, then fsyncs once for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        // Compaction must observe every append acknowledged before it.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// A batch is all-or-nothing: on any failure the journal is cut back to its
/// last synced length, so no refused record can be replayed later.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        error!(records = batch.len(), "journal flush failed: {e}");
        if let Err(rollback) = wal.rollback() {
            error!("journal rollback failed: {rollback}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.swap_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The workflow engine: every leave request, device and room, each behind its
/// own lock, plus the indexes that map child records to their owning lock.
pub struct Engine {
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) policy: LeavePolicy,
    pub directory: Directory,
    /// Serializes directory writes so cycle checks see a stable chain.
    pub(super) directory_gate: Mutex<()>,
    /// Every mutation holds this shared from before its first record lock
    /// until its event is applied; compaction holds it exclusively.
    pub(super) journal_gate: RwLock<()>,
    pub(super) leaves: DashMap<LeaveId, SharedLeave>,
    pub(super) devices: DashMap<DeviceId, SharedDeviceState>,
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    /// Reverse lookup: device request id → device id
    pub(super) request_to_device: DashMap<DeviceRequestId, DeviceId>,
    /// Reverse lookup: booking id → room id
    pub(super) booking_to_room: DashMap<BookingId, RoomId>,
    /// Each requester's single active booking.
    pub(super) active_bookings: DashMap<EmployeeId, BookingId>,
    /// Per-requester mutex serializing booking creation for the same requester.
    pub(super) booking_gates: DashMap<EmployeeId, Arc<Mutex<()>>>,
}

/// Mutable access to a lock nobody else can see yet (startup replay only).
fn unshared<T>(slot: &mut Arc<RwLock<T>>) -> Option<&mut T> {
    Arc::get_mut(slot).map(RwLock::get_mut)
}

impl Engine {
    pub fn new(wal_path: PathBuf, policy: LeavePolicy) -> io::Result<Self> {
        let (wal, replay) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            wal_tx,
            policy,
            directory: Directory::new(),
            directory_gate: Mutex::new(()),
            journal_gate: RwLock::new(()),
            leaves: DashMap::new(),
            devices: DashMap::new(),
            rooms: DashMap::new(),
            request_to_device: DashMap::new(),
            booking_to_room: DashMap::new(),
            active_bookings: DashMap::new(),
            booking_gates: DashMap::new(),
        };

        for event in &replay.events {
            engine.replay_event(event);
        }
        info!(
            events = replay.events.len(),
            employees = engine.directory.len(),
            leaves = engine.leaves.len(),
            devices = engine.devices.len(),
            rooms = engine.rooms.len(),
            "engine state restored from journal"
        );
        Ok(engine)
    }

    pub fn policy(&self) -> LeavePolicy {
        self.policy
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::LeaveTransitioned { id, .. } => {
                if let Some(mut slot) = self.leaves.get_mut(id)
                    && let Some(lr) = unshared(slot.value_mut())
                {
                    apply_to_leave(lr, event);
                }
            }
            Event::DeviceDetailsUpdated { id: device_id, .. }
            | Event::DeviceCapacityAdjusted { id: device_id, .. }
            | Event::DeviceRequested {
                request: DeviceRequest { device_id, .. },
            }
            | Event::DeviceRequestTransitioned { device_id, .. } => {
                if let Some(mut slot) = self.devices.get_mut(device_id)
                    && let Some(ds) = unshared(slot.value_mut())
                {
                    self.apply_to_device(ds, event);
                }
            }
            Event::BookingCreated {
                booking: Booking { room_id, .. },
            }
            | Event::BookingClosed { room_id, .. } => {
                if let Some(mut slot) = self.rooms.get_mut(room_id)
                    && let Some(rs) = unshared(slot.value_mut())
                {
                    self.apply_to_room(rs, event);
                }
            }
            _ => self.apply_top_level(event),
        }
    }

    /// Events that create a record or touch the directory; these act on the
    /// indexes themselves rather than on a locked record.
    pub(super) fn apply_top_level(&self, event: &Event) {
        match event {
            Event::EmployeeRegistered {
                id,
                name,
                role,
                supervisor_id,
            } => self.directory.insert(*id, name.clone(), *role, *supervisor_id),
            Event::SupervisorAssigned { id, supervisor_id } => {
                self.directory.set_supervisor(*id, *supervisor_id)
            }
            Event::LeaveSubmitted { request } => {
                self.leaves
                    .insert(request.id, Arc::new(RwLock::new(request.clone())));
            }
            Event::DeviceAdded { device } => {
                self.devices
                    .insert(device.id, Arc::new(RwLock::new(DeviceState::new(device.clone()))));
            }
            Event::RoomAdded { room } => {
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            _ => {}
        }
    }

    /// Apply a device-scoped event. Caller holds the device write lock.
    pub(super) fn apply_to_device(&self, ds: &mut DeviceState, event: &Event) {
        match event {
            Event::DeviceDetailsUpdated {
                name,
                category,
                description,
                ..
            } => {
                ds.device.name = name.clone();
                ds.device.category = category.clone();
                ds.device.description = description.clone();
            }
            Event::DeviceCapacityAdjusted {
                total_quantity,
                available_quantity,
                ..
            } => {
                ds.device.total_quantity = *total_quantity;
                ds.device.available_quantity = *available_quantity;
            }
            Event::DeviceRequested { request } => {
                self.request_to_device.insert(request.id, request.device_id);
                ds.requests.insert(request.id, request.clone());
            }
            Event::DeviceRequestTransitioned {
                id,
                status,
                rejection_reason,
                at,
                ..
            } => {
                let Some(request) = ds.requests.get_mut(id) else {
                    return;
                };
                request.status = *status;
                request.updated_at = *at;
                if rejection_reason.is_some() {
                    request.rejection_reason = rejection_reason.clone();
                }
                match status {
                    DeviceRequestStatus::Collected => {
                        ds.device.available_quantity = ds.device.available_quantity.saturating_sub(1)
                    }
                    DeviceRequestStatus::Returned => ds.device.available_quantity += 1,
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Apply a room-scoped event. Caller holds the room write lock.
    pub(super) fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                self.booking_to_room.insert(booking.id, booking.room_id);
                if booking.is_active() {
                    self.active_bookings.insert(booking.requester_id, booking.id);
                }
                rs.insert_booking(booking.clone());
            }
            Event::BookingClosed { id, status, at, .. } => {
                let Some(booking) = rs.booking_mut(*id) else {
                    return;
                };
                booking.status = *status;
                booking.updated_at = *at;
                let owner = booking.requester_id;
                self.active_bookings.remove_if(&owner, |_, active| active == id);
            }
            _ => {}
        }
    }

    /// Append one event through the group-commit writer and wait for fsync.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), WorkflowError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| WorkflowError::Journal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| WorkflowError::Journal("WAL writer dropped response".into()))?
            .map_err(|e| WorkflowError::Journal(e.to_string()))
    }

    pub(super) fn leave_slot(&self, id: &LeaveId) -> Result<SharedLeave, WorkflowError> {
        self.leaves
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(WorkflowError::not_found(EntityKind::LeaveRequest, *id))
    }

    pub(super) fn device_slot(&self, id: &DeviceId) -> Result<SharedDeviceState, WorkflowError> {
        self.devices
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(WorkflowError::not_found(EntityKind::Device, *id))
    }

    pub(super) fn room_slot(&self, id: &RoomId) -> Result<SharedRoomState, WorkflowError> {
        self.rooms
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(WorkflowError::not_found(EntityKind::Room, *id))
    }

    /// Lookup request → device, acquire the device write lock.
    pub(super) async fn resolve_request_write(
        &self,
        request_id: &DeviceRequestId,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<DeviceState>, WorkflowError> {
        let device_id = self
            .request_to_device
            .get(request_id)
            .map(|e| *e.value())
            .ok_or(WorkflowError::not_found(EntityKind::DeviceRequest, *request_id))?;
        Ok(self.device_slot(&device_id)?.write_owned().await)
    }

    /// Lookup booking → room, acquire the room write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &BookingId,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RoomState>, WorkflowError> {
        let room_id = self
            .booking_to_room
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(WorkflowError::not_found(EntityKind::Booking, *booking_id))?;
        Ok(self.room_slot(&room_id)?.write_owned().await)
    }

    pub(super) fn require_employee(&self, id: &EmployeeId) -> Result<Employee, WorkflowError> {
        self.directory
            .get(id)
            .ok_or(WorkflowError::not_found(EntityKind::Employee, *id))
    }
}

/// Apply a leave transition. Caller holds the request's write lock.
pub(super) fn apply_to_leave(lr: &mut LeaveRequest, event: &Event) {
    if let Event::LeaveTransitioned {
        status,
        actor_id,
        rejection_reason,
        at,
        ..
    } = event
    {
        lr.status = *status;
        lr.updated_at = *at;
        if *actor_id != lr.requester_id {
            lr.reviewed_by = Some(*actor_id);
        }
        if rejection_reason.is_some() {
            lr.rejection_reason = rejection_reason.clone();
        }
    }
}

/// Record an accepted or refused operation for the transition metrics.
pub(super) fn record_outcome<T>(
    workflow: &'static str,
    op: &'static str,
    result: &Result<T, WorkflowError>,
) {
    match result {
        Ok(_) => metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "workflow" => workflow,
            "op" => op
        )
        .increment(1),
        Err(e) => metrics::counter!(
            observability::REJECTIONS_TOTAL,
            "workflow" => workflow,
            "op" => op,
            "kind" => e.kind()
        )
        .increment(1),
    }
}
