use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use reimburse_core::domain::approval::Approval;
use reimburse_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use reimburse_core::domain::history::StatusHistory;

use super::{ExpenseFilter, ExpenseStore, ExpenseUnitOfWork, RepositoryError};

#[derive(Clone, Default)]
struct MemoryState {
    expenses: HashMap<String, Expense>,
    approvals: Vec<Approval>,
    history: Vec<StatusHistory>,
}

/// Store double with serializable units: a unit owns the state lock for its
/// whole lifetime and works on a private copy that replaces the shared state
/// on commit.
#[derive(Clone, Default)]
pub struct InMemoryExpenseStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryExpenseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail; its writes are discarded.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub async fn expense(&self, id: &ExpenseId) -> Option<Expense> {
        self.state.lock().await.expenses.get(&id.0).cloned()
    }

    pub async fn history(&self, id: &ExpenseId) -> Vec<StatusHistory> {
        let state = self.state.lock().await;
        state.history.iter().filter(|record| record.expense_id == *id).cloned().collect()
    }

    pub async fn approvals(&self, id: &ExpenseId) -> Vec<Approval> {
        let state = self.state.lock().await;
        state.approvals.iter().filter(|approval| approval.expense_id == *id).cloned().collect()
    }
}

#[async_trait::async_trait]
impl ExpenseStore for InMemoryExpenseStore {
    async fn begin(&self) -> Result<Box<dyn ExpenseUnitOfWork>, RepositoryError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard: Some(guard),
            working,
            fail_next_commit: self.fail_next_commit.clone(),
        }))
    }
}

struct InMemoryUnitOfWork {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    working: MemoryState,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryUnitOfWork {
    fn state(&mut self) -> Result<&mut MemoryState, RepositoryError> {
        if self.guard.is_none() {
            return Err(RepositoryError::Finished);
        }
        Ok(&mut self.working)
    }
}

#[async_trait::async_trait]
impl ExpenseUnitOfWork for InMemoryUnitOfWork {
    async fn find_expense(&mut self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        Ok(self.state()?.expenses.get(&id.0).cloned())
    }

    async fn find_expense_for_update(
        &mut self,
        id: &ExpenseId,
    ) -> Result<Option<Expense>, RepositoryError> {
        // the unit already holds the only lock
        self.find_expense(id).await
    }

    async fn insert_expense(&mut self, expense: &Expense) -> Result<(), RepositoryError> {
        let state = self.state()?;
        if state.expenses.contains_key(&expense.id.0) {
            return Err(RepositoryError::Constraint(format!(
                "expense `{}` already exists",
                expense.id
            )));
        }
        state.expenses.insert(expense.id.0.clone(), expense.clone());
        Ok(())
    }

    async fn update_expense(
        &mut self,
        expense: &Expense,
        expected: ExpenseStatus,
    ) -> Result<bool, RepositoryError> {
        let state = self.state()?;
        let Some(stored) = state.expenses.get_mut(&expense.id.0) else {
            return Ok(false);
        };
        if stored.status != expected || stored.processed_at.is_some() {
            return Ok(false);
        }

        stored.status = expense.status;
        stored.processed_at = expense.processed_at;
        stored.updated_at = expense.updated_at;
        Ok(true)
    }

    async fn list_expenses(
        &mut self,
        filter: &ExpenseFilter,
        offset: u64,
        limit: u32,
    ) -> Result<(Vec<Expense>, u64), RepositoryError> {
        let state = self.state()?;
        let mut matching: Vec<&Expense> =
            state.expenses.values().filter(|expense| filter.matches(expense)).collect();
        matching.sort_by(|left, right| {
            right.submitted_at.cmp(&left.submitted_at).then_with(|| right.id.0.cmp(&left.id.0))
        });

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn list_unsettled(&mut self, limit: u32) -> Result<Vec<Expense>, RepositoryError> {
        let state = self.state()?;
        let mut unsettled: Vec<&Expense> = state
            .expenses
            .values()
            .filter(|expense| expense.status.is_settleable() && expense.processed_at.is_none())
            .collect();
        unsettled.sort_by(|left, right| {
            left.submitted_at.cmp(&right.submitted_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(unsettled.into_iter().take(limit as usize).cloned().collect())
    }

    async fn insert_approval(&mut self, approval: &Approval) -> Result<(), RepositoryError> {
        let state = self.state()?;
        if !state.expenses.contains_key(&approval.expense_id.0) {
            return Err(RepositoryError::Constraint(format!(
                "approval references unknown expense `{}`",
                approval.expense_id
            )));
        }
        if state.approvals.iter().any(|existing| existing.expense_id == approval.expense_id) {
            return Err(RepositoryError::Constraint(format!(
                "expense `{}` already has a decision",
                approval.expense_id
            )));
        }
        state.approvals.push(approval.clone());
        Ok(())
    }

    async fn list_approvals(
        &mut self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .approvals
            .iter()
            .filter(|approval| approval.expense_id == *expense_id)
            .cloned()
            .collect())
    }

    async fn append_history(&mut self, record: &StatusHistory) -> Result<(), RepositoryError> {
        let state = self.state()?;
        if !state.expenses.contains_key(&record.expense_id.0) {
            return Err(RepositoryError::Constraint(format!(
                "history references unknown expense `{}`",
                record.expense_id
            )));
        }
        state.history.push(record.clone());
        Ok(())
    }

    async fn list_history(
        &mut self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<StatusHistory>, RepositoryError> {
        let state = self.state()?;
        Ok(state.history.iter().filter(|record| record.expense_id == *expense_id).cloned().collect())
    }

    async fn commit(&mut self) -> Result<(), RepositoryError> {
        let mut guard = self.guard.take().ok_or(RepositoryError::Finished)?;
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("injected commit failure".to_string()));
        }
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), RepositoryError> {
        self.guard.take().ok_or(RepositoryError::Finished)?;
        self.working = MemoryState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reimburse_core::chrono::Utc;
    use reimburse_core::domain::actor::UserId;
    use reimburse_core::domain::approval::{Approval, ApprovalDecision};
    use reimburse_core::domain::expense::{Expense, ExpensePolicy, ExpenseStatus};
    use reimburse_core::record_transition;

    use crate::repositories::{
        ExpenseFilter, ExpenseStore, InMemoryExpenseStore, RepositoryError,
    };

    fn sample_expense(owner: &str, amount: i64) -> Expense {
        let (expense, _) = Expense::submit(
            UserId(owner.to_string()),
            amount,
            "Train ticket",
            None,
            &ExpensePolicy::default(),
            Utc::now(),
        )
        .expect("valid expense");
        expense
    }

    #[tokio::test]
    async fn committed_units_become_visible() {
        let store = InMemoryExpenseStore::new();
        let expense = sample_expense("u-1", 50_000);

        let mut unit = store.begin().await.expect("begin");
        unit.insert_expense(&expense).await.expect("insert");
        unit.commit().await.expect("commit");

        assert_eq!(store.expense(&expense.id).await, Some(expense));
    }

    #[tokio::test]
    async fn dropped_and_failed_units_leave_no_trace() {
        let store = InMemoryExpenseStore::new();
        let expense = sample_expense("u-1", 50_000);

        {
            let mut unit = store.begin().await.expect("begin");
            unit.insert_expense(&expense).await.expect("insert");
        }
        assert_eq!(store.expense(&expense.id).await, None);

        store.fail_next_commit();
        let mut unit = store.begin().await.expect("begin");
        unit.insert_expense(&expense).await.expect("insert");
        let error = unit.commit().await.expect_err("injected failure");
        assert!(matches!(error, RepositoryError::Unavailable(_)));
        assert_eq!(store.expense(&expense.id).await, None);

        let error = unit.find_expense(&expense.id).await.expect_err("finished");
        assert!(matches!(error, RepositoryError::Finished));
    }

    #[tokio::test]
    async fn conditional_update_and_single_decision_are_enforced() {
        let store = InMemoryExpenseStore::new();
        let mut expense = sample_expense("u-1", 2_000_000);

        let mut unit = store.begin().await.expect("begin");
        unit.insert_expense(&expense).await.expect("insert");

        expense.transition_to(ExpenseStatus::Approved, Utc::now()).expect("approve");
        assert!(!unit.update_expense(&expense, ExpenseStatus::AutoApproved).await.expect("cas"));
        assert!(unit.update_expense(&expense, ExpenseStatus::AwaitingApproval).await.expect("cas"));

        let approval = Approval::record(
            expense.id.clone(),
            UserId("m-1".to_string()),
            ApprovalDecision::Approved,
            None,
            Utc::now(),
        );
        unit.insert_approval(&approval).await.expect("first decision");
        let error = unit.insert_approval(&approval).await.expect_err("second decision");
        assert!(matches!(error, RepositoryError::Constraint(_)));
        unit.commit().await.expect("commit");

        assert_eq!(store.approvals(&expense.id).await, vec![approval]);
    }

    #[tokio::test]
    async fn listing_matches_sql_ordering_and_filters() {
        let store = InMemoryExpenseStore::new();
        let first = sample_expense("u-1", 50_000);
        let second = sample_expense("u-1", 2_000_000);
        let foreign = sample_expense("u-2", 60_000);

        let mut unit = store.begin().await.expect("begin");
        for expense in [&first, &second, &foreign] {
            unit.insert_expense(expense).await.expect("insert");
            let creation = reimburse_core::ExpenseTransition {
                from: None,
                to: expense.status,
                at: expense.submitted_at,
            };
            let record = record_transition(&expense.id, Some(&expense.owner_id), &creation, None);
            unit.append_history(&record).await.expect("history");
        }
        unit.commit().await.expect("commit");

        let mut unit = store.begin().await.expect("begin");
        let filter = ExpenseFilter { owner_id: Some(UserId("u-1".to_string())), status: None };
        let (page, total) = unit.list_expenses(&filter, 0, 10).await.expect("list");
        assert_eq!(total, 2);
        assert!(page.iter().all(|expense| expense.owner_id.0 == "u-1"));
        assert!(page[0].submitted_at >= page[1].submitted_at);

        let unsettled = unit.list_unsettled(10).await.expect("unsettled");
        assert_eq!(unsettled.len(), 2, "both auto-approved expenses await settlement");
        assert!(unsettled.iter().all(|expense| expense.status == ExpenseStatus::AutoApproved));
        unit.rollback().await.expect("rollback");

        assert_eq!(store.history(&second.id).await.len(), 1);
    }
}
