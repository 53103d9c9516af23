use async_trait::async_trait;
use thiserror::Error;

use reimburse_core::domain::actor::UserId;
use reimburse_core::domain::approval::Approval;
use reimburse_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use reimburse_core::domain::history::StatusHistory;

pub mod expense;
pub mod memory;

pub use expense::SqlExpenseStore;
pub use memory::InMemoryExpenseStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("unit of work is already committed or rolled back")]
    Finished,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpenseFilter {
    pub owner_id: Option<UserId>,
    pub status: Option<ExpenseStatus>,
}

impl ExpenseFilter {
    pub fn matches(&self, expense: &Expense) -> bool {
        self.owner_id.as_ref().map_or(true, |owner| &expense.owner_id == owner)
            && self.status.map_or(true, |status| expense.status == status)
    }
}

/// Entry point to the transactional store. Every read and write made by the
/// workflow goes through a unit of work obtained here.
#[async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ExpenseUnitOfWork>, RepositoryError>;
}

/// One atomic unit. Writes become visible only after `commit`; dropping a
/// unit without committing discards them. Any method called after `commit`
/// or `rollback` fails with [`RepositoryError::Finished`].
#[async_trait]
pub trait ExpenseUnitOfWork: Send {
    async fn find_expense(&mut self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError>;

    /// Reads the expense and holds its write lock until the unit finishes,
    /// so concurrent decisions on the same expense serialize.
    async fn find_expense_for_update(
        &mut self,
        id: &ExpenseId,
    ) -> Result<Option<Expense>, RepositoryError>;

    async fn insert_expense(&mut self, expense: &Expense) -> Result<(), RepositoryError>;

    /// Conditional write: applies only if the stored row is still in
    /// `expected` status and unsettled. Returns whether a row changed.
    async fn update_expense(
        &mut self,
        expense: &Expense,
        expected: ExpenseStatus,
    ) -> Result<bool, RepositoryError>;

    /// Newest first, plus the total matching count.
    async fn list_expenses(
        &mut self,
        filter: &ExpenseFilter,
        offset: u64,
        limit: u32,
    ) -> Result<(Vec<Expense>, u64), RepositoryError>;

    /// Approved or auto-approved expenses with no `processed_at`, oldest first.
    async fn list_unsettled(&mut self, limit: u32) -> Result<Vec<Expense>, RepositoryError>;

    async fn insert_approval(&mut self, approval: &Approval) -> Result<(), RepositoryError>;

    async fn list_approvals(
        &mut self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<Approval>, RepositoryError>;

    async fn append_history(&mut self, record: &StatusHistory) -> Result<(), RepositoryError>;

    /// In append order.
    async fn list_history(
        &mut self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<StatusHistory>, RepositoryError>;

    async fn commit(&mut self) -> Result<(), RepositoryError>;

    async fn rollback(&mut self) -> Result<(), RepositoryError>;
}
