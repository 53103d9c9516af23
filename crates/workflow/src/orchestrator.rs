//! Transactional workflow over the expense store. Every mutation runs in one
//! unit of work together with its status-history record; settlement jobs are
//! only handed to the worker after the unit commits.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use reimburse_core::domain::approval::normalize_notes;
use reimburse_core::domain::timestamp_now;
use reimburse_core::{
    reconstruct_path, record_transition, Actor, Approval, ApprovalDecision, ApprovalView, Expense,
    ExpenseDetail, ExpenseError, ExpenseId, ExpensePolicy, ExpenseStatus, ExpenseView, Page,
    PageMetadata, PageRequest, PaymentGateway, PaymentRequest, SettlementJob, SettlementOutcome,
    StatusHistoryView,
};
use reimburse_db::{ExpenseFilter, ExpenseStore, ExpenseUnitOfWork, RepositoryError};

use crate::worker::{EnqueueOutcome, SettlementHandler, SettlementQueue};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewExpense {
    pub amount: i64,
    pub description: String,
    pub receipt_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpenseQuery {
    /// Accepts the aliases understood by [`ExpenseStatus::parse_filter`].
    pub status: Option<String>,
    pub page: i64,
    pub size: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequeueSummary {
    pub scanned: usize,
    pub enqueued: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct ExpenseWorkflow {
    store: Arc<dyn ExpenseStore>,
    gateway: Arc<dyn PaymentGateway>,
    queue: Arc<dyn SettlementQueue>,
    policy: ExpensePolicy,
}

impl ExpenseWorkflow {
    pub fn new(
        store: Arc<dyn ExpenseStore>,
        gateway: Arc<dyn PaymentGateway>,
        queue: Arc<dyn SettlementQueue>,
        policy: ExpensePolicy,
    ) -> Self {
        Self { store, gateway, queue, policy }
    }

    pub fn policy(&self) -> &ExpensePolicy {
        &self.policy
    }

    pub async fn create(
        &self,
        actor: &Actor,
        input: NewExpense,
    ) -> Result<ExpenseView, ExpenseError> {
        let (expense, transition) = Expense::submit(
            actor.user_id.clone(),
            input.amount,
            &input.description,
            input.receipt_url.as_deref(),
            &self.policy,
            timestamp_now(),
        )?;
        let record = record_transition(&expense.id, Some(&actor.user_id), &transition, None);

        let mut unit = self.begin().await?;
        unit.insert_expense(&expense).await.map_err(transaction_failure)?;
        unit.append_history(&record).await.map_err(transaction_failure)?;
        commit(unit.as_mut(), "create", &expense.id).await?;

        info!(
            event_name = "expense.created",
            expense_id = %expense.id,
            owner_id = %expense.owner_id,
            amount = expense.amount,
            status = expense.status.as_str(),
            "expense submitted"
        );

        if expense.status == ExpenseStatus::AutoApproved {
            self.enqueue_settlement(&expense);
        }

        Ok(ExpenseView::project(&expense, &self.policy, actor))
    }

    /// Managers see every expense; everyone else only their own.
    pub async fn list(
        &self,
        actor: &Actor,
        query: &ExpenseQuery,
    ) -> Result<Page<ExpenseView>, ExpenseError> {
        let status = match query.status.as_deref() {
            Some(value) => ExpenseStatus::parse_filter(value)?,
            None => None,
        };
        let filter = ExpenseFilter {
            owner_id: (!actor.is_approver()).then(|| actor.user_id.clone()),
            status,
        };
        let request = PageRequest::new(query.page, query.size);

        let mut unit = self.begin().await?;
        let (expenses, total) = unit
            .list_expenses(&filter, request.offset(), request.limit())
            .await
            .map_err(transaction_failure)?;
        release(unit.as_mut()).await;

        Ok(Page {
            items: expenses
                .iter()
                .map(|expense| ExpenseView::project(expense, &self.policy, actor))
                .collect(),
            paging: PageMetadata::new(request, total),
        })
    }

    pub async fn get(
        &self,
        actor: &Actor,
        expense_id: &ExpenseId,
    ) -> Result<ExpenseDetail, ExpenseError> {
        let mut unit = self.begin().await?;
        let expense = unit
            .find_expense(expense_id)
            .await
            .map_err(transaction_failure)?
            .ok_or_else(|| not_found(expense_id))?;
        ensure_visible(actor, &expense)?;
        let approvals = unit.list_approvals(expense_id).await.map_err(transaction_failure)?;
        release(unit.as_mut()).await;

        Ok(ExpenseDetail {
            expense: ExpenseView::project(&expense, &self.policy, actor),
            approvals: approvals.iter().map(ApprovalView::from).collect(),
        })
    }

    pub async fn history(
        &self,
        actor: &Actor,
        expense_id: &ExpenseId,
    ) -> Result<Vec<StatusHistoryView>, ExpenseError> {
        let mut unit = self.begin().await?;
        let expense = unit
            .find_expense(expense_id)
            .await
            .map_err(transaction_failure)?
            .ok_or_else(|| not_found(expense_id))?;
        ensure_visible(actor, &expense)?;
        let records = unit.list_history(expense_id).await.map_err(transaction_failure)?;
        release(unit.as_mut()).await;

        if let Err(error) = reconstruct_path(&records) {
            warn!(
                event_name = "expense.history.inconsistent",
                expense_id = %expense_id,
                error = %error,
                "status history does not replay cleanly"
            );
        }

        Ok(records.iter().map(StatusHistoryView::from).collect())
    }

    pub async fn approve(
        &self,
        actor: &Actor,
        expense_id: &ExpenseId,
        notes: Option<&str>,
    ) -> Result<ExpenseView, ExpenseError> {
        self.decide(actor, expense_id, ApprovalDecision::Approved, notes).await
    }

    pub async fn reject(
        &self,
        actor: &Actor,
        expense_id: &ExpenseId,
        notes: Option<&str>,
    ) -> Result<ExpenseView, ExpenseError> {
        self.decide(actor, expense_id, ApprovalDecision::Rejected, notes).await
    }

    async fn decide(
        &self,
        actor: &Actor,
        expense_id: &ExpenseId,
        decision: ApprovalDecision,
        notes: Option<&str>,
    ) -> Result<ExpenseView, ExpenseError> {
        if !actor.is_approver() {
            return Err(ExpenseError::Permission(format!(
                "user `{}` may not record a decision on expenses",
                actor.user_id
            )));
        }
        let notes = normalize_notes(notes)?;

        let mut unit = self.begin().await?;
        let mut expense = unit
            .find_expense_for_update(expense_id)
            .await
            .map_err(transaction_failure)?
            .ok_or_else(|| not_found(expense_id))?;
        if expense.status != ExpenseStatus::AwaitingApproval {
            return Err(already_decided(&expense));
        }

        let now = timestamp_now();
        let expected = expense.status;
        let transition = expense.transition_to(decision.target_status(), now)?;
        if !unit.update_expense(&expense, expected).await.map_err(transaction_failure)? {
            return Err(already_decided(&expense));
        }

        let approval =
            Approval::record(expense.id.clone(), actor.user_id.clone(), decision, notes, now);
        unit.insert_approval(&approval).await.map_err(transaction_failure)?;
        let record = record_transition(
            &expense.id,
            Some(&actor.user_id),
            &transition,
            approval.notes.as_deref(),
        );
        unit.append_history(&record).await.map_err(transaction_failure)?;
        commit(unit.as_mut(), decision.as_str(), &expense.id).await?;

        info!(
            event_name = "expense.decided",
            expense_id = %expense.id,
            approver_id = %actor.user_id,
            decision = decision.as_str(),
            "expense decision recorded"
        );

        if decision == ApprovalDecision::Approved {
            self.enqueue_settlement(&expense);
        }

        Ok(ExpenseView::project(&expense, &self.policy, actor))
    }

    /// Pays an eligible expense and marks it completed. The gateway is called
    /// between two units so no store lock is held across the network; the
    /// idempotency key keeps a repeated call from charging twice.
    pub async fn settle_payment(
        &self,
        job: &SettlementJob,
    ) -> Result<SettlementOutcome, ExpenseError> {
        let mut unit = self.begin().await?;
        let expense =
            unit.find_expense(&job.expense_id).await.map_err(transaction_failure)?;
        release(unit.as_mut()).await;

        let Some(expense) = expense else {
            warn!(
                event_name = "settlement.expense.missing",
                expense_id = %job.expense_id,
                "settlement job references an unknown expense; dropped"
            );
            return Err(not_found(&job.expense_id));
        };
        if let Some(outcome) = settlement_guard(&expense) {
            debug!(
                event_name = "settlement.skipped",
                expense_id = %expense.id,
                status = expense.status.as_str(),
                outcome = ?outcome,
                "settlement not needed"
            );
            return Ok(outcome);
        }

        let request = PaymentRequest {
            amount: job.amount,
            external_id: job.idempotency_key.clone(),
        };
        let receipt = self
            .gateway
            .process(request)
            .await
            .map_err(|error| ExpenseError::Settlement(error.to_string()))?;

        let mut unit = self.begin().await?;
        let mut expense = unit
            .find_expense_for_update(&job.expense_id)
            .await
            .map_err(transaction_failure)?
            .ok_or_else(|| not_found(&job.expense_id))?;
        // a concurrent settlement may have completed it meanwhile
        if let Some(outcome) = settlement_guard(&expense) {
            return Ok(outcome);
        }

        let expected = expense.status;
        let transition = expense.transition_to(ExpenseStatus::Completed, timestamp_now())?;
        if !unit.update_expense(&expense, expected).await.map_err(transaction_failure)? {
            return Ok(SettlementOutcome::AlreadySettled);
        }
        let record = record_transition(&expense.id, None, &transition, None);
        unit.append_history(&record).await.map_err(transaction_failure)?;
        commit(unit.as_mut(), "settle", &expense.id).await?;

        info!(
            event_name = "settlement.completed",
            expense_id = %expense.id,
            transaction_id = %receipt.transaction_id,
            payment_status = receipt.status.as_str(),
            amount = job.amount,
            "expense settled"
        );
        Ok(SettlementOutcome::Completed)
    }

    /// Re-admits approved or auto-approved expenses that were never settled,
    /// oldest first. Jobs the queue refuses are counted, not retried.
    pub async fn requeue_unsettled(&self, limit: u32) -> Result<RequeueSummary, ExpenseError> {
        let mut unit = self.begin().await?;
        let unsettled = unit.list_unsettled(limit).await.map_err(transaction_failure)?;
        release(unit.as_mut()).await;

        let mut summary = RequeueSummary { scanned: unsettled.len(), ..RequeueSummary::default() };
        for expense in &unsettled {
            if self.enqueue_settlement(expense).is_accepted() {
                summary.enqueued += 1;
            } else {
                summary.dropped += 1;
            }
        }

        info!(
            event_name = "settlement.requeue.completed",
            scanned = summary.scanned,
            enqueued = summary.enqueued,
            dropped = summary.dropped,
            "unsettled expenses re-queued"
        );
        Ok(summary)
    }

    fn enqueue_settlement(&self, expense: &Expense) -> EnqueueOutcome {
        self.queue.enqueue(SettlementJob::for_expense(expense))
    }

    async fn begin(&self) -> Result<Box<dyn ExpenseUnitOfWork>, ExpenseError> {
        self.store.begin().await.map_err(transaction_failure)
    }
}

#[async_trait]
impl SettlementHandler for ExpenseWorkflow {
    async fn settle(&self, job: &SettlementJob) -> Result<SettlementOutcome, ExpenseError> {
        self.settle_payment(job).await
    }
}

fn settlement_guard(expense: &Expense) -> Option<SettlementOutcome> {
    if expense.is_settled() || expense.status == ExpenseStatus::Rejected {
        Some(SettlementOutcome::AlreadySettled)
    } else if !expense.status.is_settleable() {
        Some(SettlementOutcome::NotEligible)
    } else {
        None
    }
}

fn ensure_visible(actor: &Actor, expense: &Expense) -> Result<(), ExpenseError> {
    if actor.can_view(&expense.owner_id) {
        Ok(())
    } else {
        Err(ExpenseError::Permission(format!(
            "user `{}` may not view expense `{}`",
            actor.user_id, expense.id
        )))
    }
}

fn not_found(expense_id: &ExpenseId) -> ExpenseError {
    ExpenseError::NotFound(format!("expense `{expense_id}` does not exist"))
}

fn already_decided(expense: &Expense) -> ExpenseError {
    ExpenseError::Conflict(format!(
        "expense `{}` is {}, not awaiting approval",
        expense.id, expense.status
    ))
}

fn transaction_failure(error: RepositoryError) -> ExpenseError {
    ExpenseError::Transaction(error.to_string())
}

async fn commit(
    unit: &mut dyn ExpenseUnitOfWork,
    operation: &'static str,
    expense_id: &ExpenseId,
) -> Result<(), ExpenseError> {
    unit.commit().await.map_err(|error| {
        warn!(
            event_name = "expense.commit.failed",
            operation,
            expense_id = %expense_id,
            error = %error,
            "commit failed; changes rolled back"
        );
        transaction_failure(error)
    })
}

/// Ends a read-only unit. Nothing was written, so a failure here is only logged.
async fn release(unit: &mut dyn ExpenseUnitOfWork) {
    if let Err(error) = unit.rollback().await {
        debug!(event_name = "expense.unit.release_failed", error = %error, "read unit release failed");
    }
}
