use serde::{Deserialize, Serialize};

use crate::domain::expense::{Expense, ExpenseId};

/// External identifier submitted to the payment gateway. Derived from the
/// expense id alone, so every retry and every re-enqueue of the same expense
/// presents the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn for_expense(expense_id: &ExpenseId) -> Self {
        Self(expense_id.0.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Work item handed to the settlement worker. Lives only in memory between
/// enqueue and dequeue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementJob {
    pub expense_id: ExpenseId,
    pub amount: i64,
    pub idempotency_key: IdempotencyKey,
}

impl SettlementJob {
    pub fn for_expense(expense: &Expense) -> Self {
        Self {
            expense_id: expense.id.clone(),
            amount: expense.amount,
            idempotency_key: IdempotencyKey::for_expense(&expense.id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Attempting,
    FailedRetryable,
    Succeeded,
    Abandoned,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Attempting => "attempting",
            Self::FailedRetryable => "failed_retryable",
            Self::Succeeded => "succeeded",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Abandoned)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Attempting)
                | (Self::Attempting, Self::Succeeded)
                | (Self::Attempting, Self::FailedRetryable)
                | (Self::Attempting, Self::Abandoned)
                | (Self::FailedRetryable, Self::Pending)
        )
    }
}

/// What a settlement call did to the expense.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Completed,
    AlreadySettled,
    NotEligible,
}
