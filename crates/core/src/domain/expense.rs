use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::actor::UserId;
use crate::errors::DomainError;

pub const DEFAULT_APPROVAL_THRESHOLD: i64 = 1_000_000;
pub const DEFAULT_MIN_AMOUNT: i64 = 10_000;
pub const DEFAULT_MAX_AMOUNT: i64 = 50_000_000;
pub const MAX_DESCRIPTION_CHARS: usize = 255;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl ExpenseId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    AwaitingApproval,
    Approved,
    Rejected,
    AutoApproved,
    Completed,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AutoApproved => "auto_approved",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "auto_approved" => Some(Self::AutoApproved),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Parses a caller-supplied list filter, accepting the short aliases
    /// `pending` and `auto-approved`. Blank input means "no filter".
    pub fn parse_filter(value: &str) -> Result<Option<Self>, DomainError> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" => Ok(None),
            "pending" => Ok(Some(Self::AwaitingApproval)),
            "auto-approved" => Ok(Some(Self::AutoApproved)),
            other => Self::parse(other)
                .map(Some)
                .ok_or_else(|| DomainError::UnknownStatusFilter(value.trim().to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed)
    }

    /// Statuses from which a settlement may complete the expense.
    pub fn is_settleable(&self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }

    pub fn can_transition_to(&self, next: ExpenseStatus) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingApproval, Self::Approved)
                | (Self::AwaitingApproval, Self::Rejected)
                | (Self::Approved, Self::Completed)
                | (Self::AutoApproved, Self::Completed)
        )
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, Self::AwaitingApproval | Self::AutoApproved)
    }
}

impl std::fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount bounds and the approval threshold, in integer minor currency units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpensePolicy {
    pub approval_threshold: i64,
    pub min_amount: i64,
    pub max_amount: i64,
}

impl Default for ExpensePolicy {
    fn default() -> Self {
        Self {
            approval_threshold: DEFAULT_APPROVAL_THRESHOLD,
            min_amount: DEFAULT_MIN_AMOUNT,
            max_amount: DEFAULT_MAX_AMOUNT,
        }
    }
}

impl ExpensePolicy {
    pub fn validate_amount(&self, amount: i64) -> Result<(), DomainError> {
        if amount <= 0 || amount < self.min_amount || amount > self.max_amount {
            return Err(DomainError::AmountOutOfRange {
                amount,
                min: self.min_amount,
                max: self.max_amount,
            });
        }
        Ok(())
    }

    pub fn requires_approval(&self, amount: i64) -> bool {
        amount >= self.approval_threshold
    }

    pub fn initial_status(&self, amount: i64) -> ExpenseStatus {
        if self.requires_approval(amount) {
            ExpenseStatus::AwaitingApproval
        } else {
            ExpenseStatus::AutoApproved
        }
    }
}

/// A status change applied to an expense; `from` is `None` only for the
/// creation record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseTransition {
    pub from: Option<ExpenseStatus>,
    pub to: ExpenseStatus,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub owner_id: UserId,
    pub amount: i64,
    pub description: String,
    pub receipt_url: Option<String>,
    pub status: ExpenseStatus,
    pub submitted_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    /// Builds a freshly submitted expense after validating its inputs against
    /// `policy`. The initial status follows the approval threshold.
    pub fn submit(
        owner_id: UserId,
        amount: i64,
        description: &str,
        receipt_url: Option<&str>,
        policy: &ExpensePolicy,
        now: DateTime<Utc>,
    ) -> Result<(Self, ExpenseTransition), DomainError> {
        policy.validate_amount(amount)?;

        let description = description.trim();
        if description.is_empty() {
            return Err(DomainError::EmptyDescription);
        }
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(DomainError::DescriptionTooLong { max: MAX_DESCRIPTION_CHARS });
        }

        let receipt_url =
            receipt_url.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string);
        let status = policy.initial_status(amount);

        let expense = Self {
            id: ExpenseId::generate(),
            owner_id,
            amount,
            description: description.to_string(),
            receipt_url,
            status,
            submitted_at: now,
            processed_at: None,
            updated_at: now,
        };

        Ok((expense, ExpenseTransition { from: None, to: status, at: now }))
    }

    pub fn transition_to(
        &mut self,
        next: ExpenseStatus,
        now: DateTime<Utc>,
    ) -> Result<ExpenseTransition, DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition { from: self.status, to: next });
        }

        let from = self.status;
        self.status = next;
        self.updated_at = now;
        if next == ExpenseStatus::Completed {
            // processed_at never precedes submission, even under clock skew
            self.processed_at = Some(now.max(self.submitted_at));
        }

        Ok(ExpenseTransition { from: Some(from), to: next, at: now })
    }

    pub fn is_settled(&self) -> bool {
        self.status == ExpenseStatus::Completed || self.processed_at.is_some()
    }
}
