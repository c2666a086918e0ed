use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::engine::WorkflowError;
use crate::model::EmployeeId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Employee,
    Manager,
    /// Resource administrator: devices and meeting rooms.
    Administrator,
    /// Top-level administrative role.
    Director,
}

impl Role {
    pub fn is_top_level(self) -> bool {
        matches!(self, Role::Director)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Permission {
    SubmitLeave,
    RequestDevice,
    BookRoom,
    ManageInventory,
    ReviewDeviceRequests,
    ManageRooms,
    ManageEmployees,
    ViewAllRecords,
}

pub type PermissionSet = HashSet<Permission>;

fn build_permissions(role: Role) -> PermissionSet {
    use Permission::*;
    let self_service = [SubmitLeave, RequestDevice, BookRoom];
    match role {
        Role::Employee | Role::Manager => self_service.into_iter().collect(),
        Role::Administrator => self_service
            .into_iter()
            .chain([ManageInventory, ReviewDeviceRequests, ManageRooms, ViewAllRecords])
            .collect(),
        Role::Director => Permission::iter().collect(),
    }
}

static PERMISSIONS: Lazy<HashMap<Role, PermissionSet>> =
    Lazy::new(|| Role::iter().map(|r| (r, build_permissions(r))).collect());

/// Immutable role → permission table, built once on first use.
pub fn permissions_for(role: Role) -> &'static PermissionSet {
    &PERMISSIONS[&role]
}

/// Verified identity handed over by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: EmployeeId,
    pub role: Role,
}

impl Caller {
    pub fn new(id: EmployeeId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn can(&self, permission: Permission) -> bool {
        permissions_for(self.role).contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), WorkflowError> {
        if self.can(permission) {
            Ok(())
        } else {
            Err(WorkflowError::NotAuthorized("missing permission"))
        }
    }
}
