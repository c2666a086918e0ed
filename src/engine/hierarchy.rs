use dashmap::DashMap;
use tracing::debug;
use ulid::Ulid;

use crate::access::{Caller, Permission, Role};
use crate::limits::{MAX_HIERARCHY_DEPTH, MAX_NAME_LEN};
use crate::model::{Employee, EmployeeId, Event};

use super::{Engine, WorkflowError};

/// Read-only supervision lookups used by review authorization.
pub trait EmployeeHierarchy {
    fn supervisor_of(&self, employee: EmployeeId) -> Option<EmployeeId>;
    fn subordinates_of(&self, employee: EmployeeId) -> Vec<EmployeeId>;
}

/// Employee registry with a supervisor → subordinates index.
#[derive(Default)]
pub struct Directory {
    employees: DashMap<EmployeeId, Employee>,
    subordinates: DashMap<EmployeeId, Vec<EmployeeId>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &EmployeeId) -> Option<Employee> {
        self.employees.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &EmployeeId) -> bool {
        self.employees.contains_key(id)
    }

    pub fn name_of(&self, id: &EmployeeId) -> Option<String> {
        self.employees.get(id).map(|e| e.name.clone())
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }

    pub fn all(&self) -> Vec<Employee> {
        self.employees.iter().map(|e| e.value().clone()).collect()
    }

    pub(super) fn insert(&self, id: EmployeeId, name: String, role: Role, supervisor_id: Option<EmployeeId>) {
        if let Some(sid) = supervisor_id {
            self.subordinates.entry(sid).or_default().push(id);
        }
        self.employees.insert(
            id,
            Employee {
                id,
                name,
                role,
                supervisor_id,
            },
        );
    }

    pub(super) fn set_supervisor(&self, id: EmployeeId, supervisor_id: Option<EmployeeId>) {
        let previous = match self.employees.get_mut(&id) {
            Some(mut e) => std::mem::replace(&mut e.supervisor_id, supervisor_id),
            None => return,
        };
        if let Some(old) = previous
            && let Some(mut kids) = self.subordinates.get_mut(&old)
        {
            kids.retain(|k| *k != id);
        }
        if let Some(new) = supervisor_id {
            self.subordinates.entry(new).or_default().push(id);
        }
    }

    /// Rejects a supervisor assignment that would make `employee` report to
    /// itself, directly or through the chain.
    pub(super) fn check_assignment(
        &self,
        employee: EmployeeId,
        supervisor: EmployeeId,
    ) -> Result<(), WorkflowError> {
        let mut current = Some(supervisor);
        let mut depth = 0usize;
        while let Some(id) = current {
            if id == employee {
                return Err(WorkflowError::InvalidHierarchy("supervision cycle"));
            }
            depth += 1;
            if depth > MAX_HIERARCHY_DEPTH {
                return Err(WorkflowError::LimitExceeded("hierarchy too deep"));
            }
            current = self.supervisor_of(id);
        }
        Ok(())
    }
}

impl EmployeeHierarchy for Directory {
    fn supervisor_of(&self, employee: EmployeeId) -> Option<EmployeeId> {
        self.employees.get(&employee).and_then(|e| e.supervisor_id)
    }

    fn subordinates_of(&self, employee: EmployeeId) -> Vec<EmployeeId> {
        self.subordinates
            .get(&employee)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

/// Who may approve, reject or cancel on behalf of a reviewer.
///
/// Only the requester's direct supervisor. A requester without a supervisor
/// can be reviewed by the top-level role when `top_level_fallback` is set.
pub fn authorize_review(
    hierarchy: &impl EmployeeHierarchy,
    actor: &Caller,
    requester: EmployeeId,
    top_level_fallback: bool,
) -> Result<(), WorkflowError> {
    if actor.id == requester {
        return Err(WorkflowError::SelfApproval);
    }
    match hierarchy.supervisor_of(requester) {
        Some(supervisor) if supervisor == actor.id => Ok(()),
        Some(_) => Err(WorkflowError::NotAuthorized("not the direct supervisor")),
        None if top_level_fallback && actor.role.is_top_level() => Ok(()),
        None => Err(WorkflowError::NotAuthorized("requester has no supervisor")),
    }
}

impl Engine {
    pub async fn register_employee(
        &self,
        caller: &Caller,
        name: &str,
        role: Role,
        supervisor_id: Option<EmployeeId>,
    ) -> Result<Employee, WorkflowError> {
        caller.require(Permission::ManageEmployees)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(WorkflowError::LimitExceeded("employee name is empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(WorkflowError::LimitExceeded("employee name too long"));
        }

        let _journal = self.journal_gate.read().await;
        let _held = self.directory_gate.lock().await;
        if let Some(sid) = supervisor_id {
            self.require_employee(&sid)?;
            // A fresh id cannot appear in any chain, only the depth can fail.
            self.directory.check_assignment(Ulid::new(), sid)?;
        }
        let id = Ulid::new();
        let event = Event::EmployeeRegistered {
            id,
            name: name.to_string(),
            role,
            supervisor_id,
        };
        self.wal_append(&event).await?;
        self.apply_top_level(&event);
        debug!(employee = %id, %role, "employee registered");
        self.require_employee(&id)
    }

    /// Moves `employee` under `supervisor`, or detaches it with `None`.
    pub async fn assign_supervisor(
        &self,
        caller: &Caller,
        employee: EmployeeId,
        supervisor: Option<EmployeeId>,
    ) -> Result<Employee, WorkflowError> {
        caller.require(Permission::ManageEmployees)?;
        let _journal = self.journal_gate.read().await;
        let _held = self.directory_gate.lock().await;
        self.require_employee(&employee)?;
        if let Some(sid) = supervisor {
            self.require_employee(&sid)?;
            self.directory.check_assignment(employee, sid)?;
        }
        let event = Event::SupervisorAssigned {
            id: employee,
            supervisor_id: supervisor,
        };
        self.wal_append(&event).await?;
        self.apply_top_level(&event);
        debug!(%employee, supervisor = ?supervisor, "supervisor assigned");
        self.require_employee(&employee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> (Directory, EmployeeId, EmployeeId, EmployeeId) {
        let dir = Directory::new();
        let boss = Ulid::new();
        let lead = Ulid::new();
        let dev = Ulid::new();
        dir.insert(boss, "Boss".into(), Role::Director, None);
        dir.insert(lead, "Lead".into(), Role::Manager, Some(boss));
        dir.insert(dev, "Dev".into(), Role::Employee, Some(lead));
        (dir, boss, lead, dev)
    }

    #[test]
    fn lookups_follow_registration() {
        let (dir, boss, lead, dev) = org();
        assert_eq!(dir.supervisor_of(dev), Some(lead));
        assert_eq!(dir.supervisor_of(boss), None);
        assert_eq!(dir.subordinates_of(boss), vec![lead]);
        assert!(dir.subordinates_of(dev).is_empty());
    }

    #[test]
    fn reassignment_moves_subordinate() {
        let (dir, boss, lead, dev) = org();
        dir.set_supervisor(dev, Some(boss));
        assert!(dir.subordinates_of(lead).is_empty());
        assert_eq!(dir.subordinates_of(boss).len(), 2);
        dir.set_supervisor(dev, None);
        assert_eq!(dir.supervisor_of(dev), None);
        assert_eq!(dir.subordinates_of(boss), vec![lead]);
    }

    #[test]
    fn cycle_detected() {
        let (dir, boss, _lead, dev) = org();
        assert!(matches!(
            dir.check_assignment(boss, dev),
            Err(WorkflowError::InvalidHierarchy(_))
        ));
        assert!(matches!(
            dir.check_assignment(dev, dev),
            Err(WorkflowError::InvalidHierarchy(_))
        ));
        assert!(dir.check_assignment(dev, boss).is_ok());
    }

    #[test]
    fn only_direct_supervisor_reviews() {
        let (dir, boss, lead, dev) = org();
        let lead_caller = Caller::new(lead, Role::Manager);
        let boss_caller = Caller::new(boss, Role::Director);
        assert!(authorize_review(&dir, &lead_caller, dev, true).is_ok());
        // Skip-level reviews are refused even for the top-level role.
        assert!(matches!(
            authorize_review(&dir, &boss_caller, dev, true),
            Err(WorkflowError::NotAuthorized(_))
        ));
    }

    #[test]
    fn self_review_refused_first() {
        let (dir, boss, _, _) = org();
        let boss_caller = Caller::new(boss, Role::Director);
        assert!(matches!(
            authorize_review(&dir, &boss_caller, boss, true),
            Err(WorkflowError::SelfApproval)
        ));
    }

    #[test]
    fn unsupervised_requester_falls_back_to_top_level() {
        let dir = Directory::new();
        let loner = Ulid::new();
        let director = Ulid::new();
        let admin = Ulid::new();
        dir.insert(loner, "Loner".into(), Role::Employee, None);
        let director_caller = Caller::new(director, Role::Director);
        let admin_caller = Caller::new(admin, Role::Administrator);
        assert!(authorize_review(&dir, &director_caller, loner, true).is_ok());
        assert!(authorize_review(&dir, &admin_caller, loner, true).is_err());
        assert!(authorize_review(&dir, &director_caller, loner, false).is_err());
    }
}
