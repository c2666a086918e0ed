use tokio::sync::oneshot;
use tracing::info;

use crate::model::*;
use crate::observability;

use super::{Engine, WalCommand, WorkflowError};

/// A device whose counters disagree with its outstanding requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryDrift {
    pub device_id: DeviceId,
    pub total: u32,
    pub available: u32,
    pub outstanding: u32,
}

impl Engine {
    /// Rewrite the journal as the minimal event list reproducing current state.
    ///
    /// Holds the journal gate exclusively, so no mutation is between its
    /// append and its apply while the snapshot is taken.
    pub async fn compact_wal(&self) -> Result<(), WorkflowError> {
        let _exclusive = self.journal_gate.write().await;
        let mut events = Vec::new();

        for employee in self.directory.all() {
            events.push(Event::EmployeeRegistered {
                id: employee.id,
                name: employee.name,
                role: employee.role,
                supervisor_id: employee.supervisor_id,
            });
        }

        let leaves: Vec<_> = self.leaves.iter().map(|e| e.value().clone()).collect();
        for slot in leaves {
            let request = slot.read().await.clone();
            events.push(Event::LeaveSubmitted { request });
        }

        for slot in self.device_slots() {
            let guard = slot.read().await;
            events.push(Event::DeviceAdded {
                device: guard.device.clone(),
            });
            for request in guard.requests.values() {
                events.push(Event::DeviceRequested {
                    request: request.clone(),
                });
            }
        }

        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for slot in rooms {
            let guard = slot.read().await;
            events.push(Event::RoomAdded {
                room: guard.room.clone(),
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| WorkflowError::Journal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| WorkflowError::Journal("WAL writer dropped response".into()))?
            .map_err(|e| WorkflowError::Journal(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "journal compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Devices violating `available = total - outstanding`.
    pub async fn audit_inventory(&self) -> Vec<InventoryDrift> {
        let mut drift = Vec::new();
        for slot in self.device_slots() {
            let guard = slot.read().await;
            if !guard.is_consistent() {
                drift.push(InventoryDrift {
                    device_id: guard.device.id,
                    total: guard.device.total_quantity,
                    available: guard.device.available_quantity,
                    outstanding: guard.outstanding(),
                });
            }
        }
        metrics::gauge!(observability::INVENTORY_DRIFT_DEVICES).set(drift.len() as f64);
        drift
    }
}
