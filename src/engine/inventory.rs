use chrono::Utc;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::access::{Caller, Permission};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{EntityKind, Engine, WorkflowError, record_outcome};

fn validate_details(name: &str, category: &str, description: Option<&str>) -> Result<(), WorkflowError> {
    if name.trim().is_empty() {
        return Err(WorkflowError::LimitExceeded("device name is empty"));
    }
    if name.len() > MAX_NAME_LEN || category.len() > MAX_NAME_LEN {
        return Err(WorkflowError::LimitExceeded("device name too long"));
    }
    if description.is_some_and(|d| d.len() > MAX_REASON_LEN) {
        return Err(WorkflowError::LimitExceeded("description too long"));
    }
    Ok(())
}

/// Counters after moving total to `new_total`: available shifts by the same
/// delta, floored at zero.
fn recompute_available(device: &Device, new_total: u32) -> u32 {
    let delta = i64::from(new_total) - i64::from(device.total_quantity);
    (i64::from(device.available_quantity) + delta).max(0) as u32
}

impl Engine {
    // ── Inventory administration ─────────────────────────────

    pub async fn add_device(
        &self,
        caller: &Caller,
        name: &str,
        category: &str,
        total_quantity: u32,
        description: Option<&str>,
    ) -> Result<Device, WorkflowError> {
        caller.require(Permission::ManageInventory)?;
        validate_details(name, category, description)?;
        if total_quantity > MAX_DEVICE_UNITS {
            return Err(WorkflowError::LimitExceeded("too many units"));
        }
        let _journal = self.journal_gate.read().await;
        let device = Device {
            id: Ulid::new(),
            name: name.trim().to_string(),
            category: category.trim().to_string(),
            total_quantity,
            available_quantity: total_quantity,
            description: description.map(str::to_string),
            created_at: Utc::now(),
        };
        let event = Event::DeviceAdded { device: device.clone() };
        self.wal_append(&event).await?;
        self.apply_top_level(&event);
        debug!(device = %device.id, total = total_quantity, "device added");
        Ok(device)
    }

    /// Edits descriptive fields only; counters are untouched.
    pub async fn update_device_details(
        &self,
        caller: &Caller,
        id: DeviceId,
        name: &str,
        category: &str,
        description: Option<&str>,
    ) -> Result<Device, WorkflowError> {
        caller.require(Permission::ManageInventory)?;
        validate_details(name, category, description)?;
        let slot = self.device_slot(&id)?;
        let _journal = self.journal_gate.read().await;
        let mut guard = slot.write().await;
        let event = Event::DeviceDetailsUpdated {
            id,
            name: name.trim().to_string(),
            category: category.trim().to_string(),
            description: description.map(str::to_string),
        };
        self.wal_append(&event).await?;
        self.apply_to_device(&mut guard, &event);
        Ok(guard.device.clone())
    }

    /// Single read-modify-write of both counters under the device lock.
    pub async fn adjust_capacity(
        &self,
        caller: &Caller,
        id: DeviceId,
        new_total: u32,
    ) -> Result<Device, WorkflowError> {
        let result = self.adjust_capacity_inner(caller, id, new_total).await;
        record_outcome("inventory", "adjust_capacity", &result);
        result
    }

    async fn adjust_capacity_inner(
        &self,
        caller: &Caller,
        id: DeviceId,
        new_total: u32,
    ) -> Result<Device, WorkflowError> {
        caller.require(Permission::ManageInventory)?;
        if new_total > MAX_DEVICE_UNITS {
            return Err(WorkflowError::LimitExceeded("too many units"));
        }
        let slot = self.device_slot(&id)?;
        let _journal = self.journal_gate.read().await;
        let mut guard = slot.write().await;

        let outstanding = guard.outstanding();
        if new_total < outstanding {
            return Err(WorkflowError::CapacityBelowOutstanding {
                outstanding,
                requested: new_total,
            });
        }
        let available = recompute_available(&guard.device, new_total);
        if i64::from(guard.device.available_quantity) + i64::from(new_total) < i64::from(guard.device.total_quantity) {
            warn!(device = %id, total = new_total, "available count clamped at zero");
        }
        let event = Event::DeviceCapacityAdjusted {
            id,
            total_quantity: new_total,
            available_quantity: available,
        };
        self.wal_append(&event).await?;
        self.apply_to_device(&mut guard, &event);
        debug!(device = %id, total = new_total, available, "capacity adjusted");
        Ok(guard.device.clone())
    }

    // ── Checkout workflow ────────────────────────────────────

    /// Availability here is an early check only; the unit is claimed at collect.
    pub async fn create_device_request(
        &self,
        caller: &Caller,
        device_id: DeviceId,
    ) -> Result<DeviceRequest, WorkflowError> {
        let result = self.create_device_request_inner(caller, device_id).await;
        record_outcome("device", "create", &result);
        result
    }

    async fn create_device_request_inner(
        &self,
        caller: &Caller,
        device_id: DeviceId,
    ) -> Result<DeviceRequest, WorkflowError> {
        caller.require(Permission::RequestDevice)?;
        self.require_employee(&caller.id)?;
        let slot = self.device_slot(&device_id)?;
        let _journal = self.journal_gate.read().await;
        let mut guard = slot.write().await;
        if guard.device.available_quantity == 0 {
            return Err(WorkflowError::ResourceUnavailable(device_id));
        }

        let now = Utc::now();
        let request = DeviceRequest {
            id: Ulid::new(),
            device_id,
            requester_id: caller.id,
            status: DeviceRequestStatus::Pending,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::DeviceRequested {
            request: request.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_to_device(&mut guard, &event);
        debug!(request = %request.id, device = %device_id, requester = %caller.id, "device requested");
        Ok(request)
    }

    pub async fn approve_device_request(
        &self,
        caller: &Caller,
        id: DeviceRequestId,
    ) -> Result<DeviceRequest, WorkflowError> {
        let result = self
            .transition_device_request(caller, id, DeviceRequestStatus::Approved, None)
            .await;
        record_outcome("device", "approve", &result);
        result
    }

    pub async fn reject_device_request(
        &self,
        caller: &Caller,
        id: DeviceRequestId,
        reason: &str,
    ) -> Result<DeviceRequest, WorkflowError> {
        let reason = reason.trim();
        let result = if reason.is_empty() {
            Err(WorkflowError::ReasonRequired)
        } else if reason.len() > MAX_REASON_LEN {
            Err(WorkflowError::LimitExceeded("reason too long"))
        } else {
            self.transition_device_request(caller, id, DeviceRequestStatus::Rejected, Some(reason.to_string()))
                .await
        };
        record_outcome("device", "reject", &result);
        result
    }

    /// Guarded decrement: claims one unit only while one is available.
    pub async fn collect_device(
        &self,
        caller: &Caller,
        id: DeviceRequestId,
    ) -> Result<DeviceRequest, WorkflowError> {
        let result = self
            .transition_device_request(caller, id, DeviceRequestStatus::Collected, None)
            .await;
        if let Err(WorkflowError::ResourceUnavailable(device)) = &result {
            warn!(request = %id, %device, "collect lost the race for the last unit");
            metrics::counter!(observability::COLLECT_UNAVAILABLE_TOTAL).increment(1);
        }
        record_outcome("device", "collect", &result);
        result
    }

    pub async fn initiate_return(
        &self,
        caller: &Caller,
        id: DeviceRequestId,
    ) -> Result<DeviceRequest, WorkflowError> {
        let result = self
            .transition_device_request(caller, id, DeviceRequestStatus::ReturnPending, None)
            .await;
        record_outcome("device", "initiate_return", &result);
        result
    }

    pub async fn confirm_return(
        &self,
        caller: &Caller,
        id: DeviceRequestId,
    ) -> Result<DeviceRequest, WorkflowError> {
        let result = self
            .transition_device_request(caller, id, DeviceRequestStatus::Returned, None)
            .await;
        record_outcome("device", "confirm_return", &result);
        result
    }

    pub async fn cancel_device_request(
        &self,
        caller: &Caller,
        id: DeviceRequestId,
    ) -> Result<DeviceRequest, WorkflowError> {
        let result = self
            .transition_device_request(caller, id, DeviceRequestStatus::Cancelled, None)
            .await;
        record_outcome("device", "cancel", &result);
        result
    }

    /// One state machine step. Status check, counter guard and the write all
    /// happen under the device lock, and the counter change rides in the same
    /// journal record as the status change.
    async fn transition_device_request(
        &self,
        caller: &Caller,
        id: DeviceRequestId,
        to: DeviceRequestStatus,
        rejection_reason: Option<String>,
    ) -> Result<DeviceRequest, WorkflowError> {
        use DeviceRequestStatus::*;

        let _journal = self.journal_gate.read().await;
        let mut guard = self.resolve_request_write(&id).await?;
        let request = guard
            .requests
            .get(&id)
            .ok_or(WorkflowError::not_found(EntityKind::DeviceRequest, id))?;
        let owner = request.requester_id;
        let current = request.status;
        let device_id = request.device_id;

        let is_owner = caller.id == owner;
        let is_reviewer = caller.can(Permission::ReviewDeviceRequests);
        let (allowed, from) = match to {
            Approved | Rejected => (is_reviewer, Pending),
            Cancelled => (is_owner || is_reviewer, Pending),
            Collected => (is_owner, Approved),
            ReturnPending => (is_owner, Collected),
            Returned => (is_reviewer, ReturnPending),
            Pending => return Err(WorkflowError::invalid_state(current)),
        };
        if !allowed {
            return Err(WorkflowError::NotAuthorized(match to {
                Collected | ReturnPending => "only the requester may do this",
                _ => "device administrator required",
            }));
        }
        if current != from {
            return Err(WorkflowError::invalid_state(current));
        }
        if to == Collected && guard.device.available_quantity == 0 {
            return Err(WorkflowError::ResourceUnavailable(device_id));
        }

        let event = Event::DeviceRequestTransitioned {
            id,
            device_id,
            status: to,
            rejection_reason,
            at: Utc::now(),
        };
        self.wal_append(&event).await?;
        self.apply_to_device(&mut guard, &event);
        debug!(
            request = %id,
            device = %device_id,
            status = %to,
            available = guard.device.available_quantity,
            "device request transitioned"
        );
        guard
            .requests
            .get(&id)
            .cloned()
            .ok_or(WorkflowError::not_found(EntityKind::DeviceRequest, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(total: u32, available: u32) -> Device {
        Device {
            id: Ulid::new(),
            name: "Projector".into(),
            category: "av".into(),
            total_quantity: total,
            available_quantity: available,
            description: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn recompute_shifts_by_delta() {
        assert_eq!(recompute_available(&device(5, 3), 7), 5);
        assert_eq!(recompute_available(&device(5, 3), 4), 2);
        assert_eq!(recompute_available(&device(5, 3), 5), 3);
    }

    #[test]
    fn recompute_floors_at_zero() {
        assert_eq!(recompute_available(&device(5, 1), 2), 0);
        assert_eq!(recompute_available(&device(5, 0), 0), 0);
    }

    #[test]
    fn details_validation() {
        assert!(validate_details("Laptop", "computer", None).is_ok());
        assert!(validate_details("  ", "computer", None).is_err());
        assert!(validate_details(&"x".repeat(MAX_NAME_LEN + 1), "computer", None).is_err());
        let long = "d".repeat(MAX_REASON_LEN + 1);
        assert!(validate_details("Laptop", "computer", Some(&long)).is_err());
    }
}
