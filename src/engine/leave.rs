use chrono::{NaiveDate, Utc};
use tracing::debug;
use ulid::Ulid;

use crate::access::{Caller, Permission};
use crate::limits::*;
use crate::model::*;

use super::hierarchy::authorize_review;
use super::{Engine, WorkflowError, apply_to_leave, record_outcome};

/// How the top-level role participates in leave review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeavePolicy {
    /// Submissions by the top-level role start out approved.
    pub auto_approve_top_level: bool,
    /// The top-level role reviews requests from employees without a supervisor.
    pub top_level_fallback: bool,
}

impl Default for LeavePolicy {
    fn default() -> Self {
        Self {
            auto_approve_top_level: true,
            top_level_fallback: true,
        }
    }
}

fn check_reason(reason: &str) -> Result<(), WorkflowError> {
    if reason.len() > MAX_REASON_LEN {
        return Err(WorkflowError::LimitExceeded("reason too long"));
    }
    Ok(())
}

fn required_reason(reason: &str) -> Result<String, WorkflowError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::ReasonRequired);
    }
    check_reason(trimmed)?;
    Ok(trimmed.to_string())
}

impl Engine {
    pub async fn submit_leave(
        &self,
        caller: &Caller,
        category: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: &str,
    ) -> Result<LeaveRequest, WorkflowError> {
        let result = self
            .submit_leave_inner(caller, category, start_date, end_date, reason)
            .await;
        record_outcome("leave", "submit", &result);
        result
    }

    async fn submit_leave_inner(
        &self,
        caller: &Caller,
        category: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: &str,
    ) -> Result<LeaveRequest, WorkflowError> {
        caller.require(Permission::SubmitLeave)?;
        let _journal = self.journal_gate.read().await;
        let category: LeaveCategory = category
            .trim()
            .parse()
            .map_err(|_| WorkflowError::InvalidCategory(category.to_string()))?;
        if end_date < start_date {
            return Err(WorkflowError::InvalidDateRange);
        }
        if (end_date - start_date).num_days() + 1 > MAX_LEAVE_DAYS {
            return Err(WorkflowError::LimitExceeded("leave spans too many days"));
        }
        check_reason(reason)?;
        self.require_employee(&caller.id)?;

        let status = if self.policy.auto_approve_top_level && caller.role.is_top_level() {
            LeaveStatus::Approved
        } else {
            LeaveStatus::Pending
        };
        let now = Utc::now();
        let request = LeaveRequest {
            id: Ulid::new(),
            requester_id: caller.id,
            category,
            start_date,
            end_date,
            reason: reason.to_string(),
            status,
            rejection_reason: None,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::LeaveSubmitted {
            request: request.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_top_level(&event);
        debug!(leave = %request.id, requester = %caller.id, %status, "leave submitted");
        Ok(request)
    }

    pub async fn approve_leave(&self, caller: &Caller, id: LeaveId) -> Result<LeaveRequest, WorkflowError> {
        let result = self.review_leave(caller, id, LeaveStatus::Approved, None).await;
        record_outcome("leave", "approve", &result);
        result
    }

    pub async fn reject_leave(
        &self,
        caller: &Caller,
        id: LeaveId,
        reason: &str,
    ) -> Result<LeaveRequest, WorkflowError> {
        let result = match required_reason(reason) {
            Ok(reason) => {
                self.review_leave(caller, id, LeaveStatus::Rejected, Some(reason))
                    .await
            }
            Err(e) => Err(e),
        };
        record_outcome("leave", "reject", &result);
        result
    }

    /// Requester, or anyone allowed to review the request.
    pub async fn cancel_leave(&self, caller: &Caller, id: LeaveId) -> Result<LeaveRequest, WorkflowError> {
        let result = self.transition_leave(caller, id, LeaveStatus::Cancelled, None, true).await;
        record_outcome("leave", "cancel", &result);
        result
    }

    async fn review_leave(
        &self,
        caller: &Caller,
        id: LeaveId,
        to: LeaveStatus,
        rejection_reason: Option<String>,
    ) -> Result<LeaveRequest, WorkflowError> {
        self.transition_leave(caller, id, to, rejection_reason, false).await
    }

    /// Compare-and-set `pending → to` under the request's write lock.
    async fn transition_leave(
        &self,
        caller: &Caller,
        id: LeaveId,
        to: LeaveStatus,
        rejection_reason: Option<String>,
        requester_may_act: bool,
    ) -> Result<LeaveRequest, WorkflowError> {
        let slot = self.leave_slot(&id)?;
        let _journal = self.journal_gate.read().await;
        let mut guard = slot.write().await;

        if !(requester_may_act && caller.id == guard.requester_id) {
            authorize_review(&self.directory, caller, guard.requester_id, self.policy.top_level_fallback)?;
        }
        if guard.status != LeaveStatus::Pending {
            return Err(WorkflowError::invalid_state(guard.status));
        }

        let event = Event::LeaveTransitioned {
            id,
            status: to,
            actor_id: caller.id,
            rejection_reason,
            at: Utc::now(),
        };
        self.wal_append(&event).await?;
        apply_to_leave(&mut guard, &event);
        debug!(leave = %id, actor = %caller.id, status = %to, "leave transitioned");
        Ok(guard.clone())
    }
}
