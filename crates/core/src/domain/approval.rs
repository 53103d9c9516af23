use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::actor::UserId;
use crate::domain::expense::{ExpenseId, ExpenseStatus};
use crate::errors::DomainError;

pub const MAX_NOTES_CHARS: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn target_status(&self) -> ExpenseStatus {
        match self {
            Self::Approved => ExpenseStatus::Approved,
            Self::Rejected => ExpenseStatus::Rejected,
        }
    }
}

/// A manager's decision on an expense. Written once, never updated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub decision: ApprovalDecision,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Approval {
    pub fn record(
        expense_id: ExpenseId,
        approver_id: UserId,
        decision: ApprovalDecision,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId(Uuid::new_v4().to_string()),
            expense_id,
            approver_id,
            decision,
            notes,
            created_at: now,
        }
    }
}

/// Trims reviewer notes; blank notes become `None`.
pub fn normalize_notes(notes: Option<&str>) -> Result<Option<String>, DomainError> {
    let Some(notes) = notes.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if notes.chars().count() > MAX_NOTES_CHARS {
        return Err(DomainError::NotesTooLong { max: MAX_NOTES_CHARS });
    }
    Ok(Some(notes.to_string()))
}
