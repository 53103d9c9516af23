use reimburse_core::chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::{Row, Transaction};

use reimburse_core::domain::actor::UserId;
use reimburse_core::domain::approval::{Approval, ApprovalDecision, ApprovalId};
use reimburse_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use reimburse_core::domain::history::{StatusHistory, StatusHistoryId};

use super::{ExpenseFilter, ExpenseStore, ExpenseUnitOfWork, RepositoryError};
use crate::DbPool;

pub struct SqlExpenseStore {
    pool: DbPool,
}

impl SqlExpenseStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl ExpenseStore for SqlExpenseStore {
    async fn begin(&self) -> Result<Box<dyn ExpenseUnitOfWork>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqlUnitOfWork { tx: Some(tx) }))
    }
}

/// Unit of work backed by a SQLite transaction. Dropping it unfinished rolls
/// the transaction back.
pub struct SqlUnitOfWork {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqlUnitOfWork {
    fn conn(&mut self) -> Result<&mut SqliteConnection, RepositoryError> {
        self.tx.as_deref_mut().ok_or(RepositoryError::Finished)
    }
}

#[async_trait::async_trait]
impl ExpenseUnitOfWork for SqlUnitOfWork {
    async fn find_expense(&mut self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                owner_id,
                amount,
                description,
                receipt_url,
                status,
                submitted_at,
                processed_at,
                updated_at
             FROM expense
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(self.conn()?)
        .await?;

        row.map(expense_from_row).transpose()
    }

    async fn find_expense_for_update(
        &mut self,
        id: &ExpenseId,
    ) -> Result<Option<Expense>, RepositoryError> {
        // SQLite has no row locks; a no-op write takes the database write lock
        // before the read so the snapshot cannot go stale.
        sqlx::query("UPDATE expense SET updated_at = updated_at WHERE id = ?")
            .bind(&id.0)
            .execute(self.conn()?)
            .await?;

        self.find_expense(id).await
    }

    async fn insert_expense(&mut self, expense: &Expense) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO expense (
                id,
                owner_id,
                amount,
                description,
                receipt_url,
                status,
                submitted_at,
                processed_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&expense.id.0)
        .bind(&expense.owner_id.0)
        .bind(expense.amount)
        .bind(&expense.description)
        .bind(expense.receipt_url.as_deref())
        .bind(expense.status.as_str())
        .bind(format_timestamp(&expense.submitted_at))
        .bind(expense.processed_at.as_ref().map(format_timestamp))
        .bind(format_timestamp(&expense.updated_at))
        .execute(self.conn()?)
        .await?;

        Ok(())
    }

    async fn update_expense(
        &mut self,
        expense: &Expense,
        expected: ExpenseStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE expense
             SET status = ?, processed_at = ?, updated_at = ?
             WHERE id = ? AND status = ? AND processed_at IS NULL",
        )
        .bind(expense.status.as_str())
        .bind(expense.processed_at.as_ref().map(format_timestamp))
        .bind(format_timestamp(&expense.updated_at))
        .bind(&expense.id.0)
        .bind(expected.as_str())
        .execute(self.conn()?)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_expenses(
        &mut self,
        filter: &ExpenseFilter,
        offset: u64,
        limit: u32,
    ) -> Result<(Vec<Expense>, u64), RepositoryError> {
        let owner = filter.owner_id.as_ref().map(|owner| owner.0.as_str());
        let status = filter.status.map(|status| status.as_str());
        let conn = self.conn()?;

        let total = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM expense
             WHERE (? IS NULL OR owner_id = ?) AND (? IS NULL OR status = ?)",
        )
        .bind(owner)
        .bind(owner)
        .bind(status)
        .bind(status)
        .fetch_one(&mut *conn)
        .await?
        .try_get::<i64, _>("count")?;

        let rows = sqlx::query(
            "SELECT
                id,
                owner_id,
                amount,
                description,
                receipt_url,
                status,
                submitted_at,
                processed_at,
                updated_at
             FROM expense
             WHERE (? IS NULL OR owner_id = ?) AND (? IS NULL OR status = ?)
             ORDER BY submitted_at DESC, id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(owner)
        .bind(owner)
        .bind(status)
        .bind(status)
        .bind(i64::from(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&mut *conn)
        .await?;

        let expenses = rows.into_iter().map(expense_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((expenses, parse_count("count", total)?))
    }

    async fn list_unsettled(&mut self, limit: u32) -> Result<Vec<Expense>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                owner_id,
                amount,
                description,
                receipt_url,
                status,
                submitted_at,
                processed_at,
                updated_at
             FROM expense
             WHERE status IN ('approved', 'auto_approved') AND processed_at IS NULL
             ORDER BY submitted_at ASC, id ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(self.conn()?)
        .await?;

        rows.into_iter().map(expense_from_row).collect()
    }

    async fn insert_approval(&mut self, approval: &Approval) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval (id, expense_id, approver_id, decision, notes, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approval.expense_id.0)
        .bind(&approval.approver_id.0)
        .bind(approval.decision.as_str())
        .bind(approval.notes.as_deref())
        .bind(format_timestamp(&approval.created_at))
        .execute(self.conn()?)
        .await?;

        Ok(())
    }

    async fn list_approvals(
        &mut self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, expense_id, approver_id, decision, notes, created_at
             FROM approval
             WHERE expense_id = ?
             ORDER BY created_at ASC",
        )
        .bind(&expense_id.0)
        .fetch_all(self.conn()?)
        .await?;

        rows.into_iter().map(approval_from_row).collect()
    }

    async fn append_history(&mut self, record: &StatusHistory) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO expense_status_history (
                id,
                expense_id,
                actor_id,
                previous_status,
                new_status,
                notes,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.expense_id.0)
        .bind(record.actor_id.as_ref().map(|actor| actor.0.as_str()))
        .bind(record.previous_status.map(|status| status.as_str()))
        .bind(record.new_status.as_str())
        .bind(record.notes.as_deref())
        .bind(format_timestamp(&record.created_at))
        .execute(self.conn()?)
        .await?;

        Ok(())
    }

    async fn list_history(
        &mut self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<StatusHistory>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, expense_id, actor_id, previous_status, new_status, notes, created_at
             FROM expense_status_history
             WHERE expense_id = ?
             ORDER BY seq ASC",
        )
        .bind(&expense_id.0)
        .fetch_all(self.conn()?)
        .await?;

        rows.into_iter().map(history_from_row).collect()
    }

    async fn commit(&mut self) -> Result<(), RepositoryError> {
        let tx = self.tx.take().ok_or(RepositoryError::Finished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), RepositoryError> {
        let tx = self.tx.take().ok_or(RepositoryError::Finished)?;
        tx.rollback().await?;
        Ok(())
    }
}

fn expense_from_row(row: SqliteRow) -> Result<Expense, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;

    Ok(Expense {
        id: ExpenseId(row.try_get("id")?),
        owner_id: UserId(row.try_get("owner_id")?),
        amount: row.try_get("amount")?,
        description: row.try_get("description")?,
        receipt_url: row.try_get("receipt_url")?,
        status: parse_status("status", &status_raw)?,
        submitted_at: parse_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        processed_at: parse_optional_timestamp("processed_at", row.try_get("processed_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn approval_from_row(row: SqliteRow) -> Result<Approval, RepositoryError> {
    let decision_raw = row.try_get::<String, _>("decision")?;
    let decision = ApprovalDecision::parse(&decision_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approval decision `{decision_raw}`"))
    })?;

    Ok(Approval {
        id: ApprovalId(row.try_get("id")?),
        expense_id: ExpenseId(row.try_get("expense_id")?),
        approver_id: UserId(row.try_get("approver_id")?),
        decision,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn history_from_row(row: SqliteRow) -> Result<StatusHistory, RepositoryError> {
    let previous_status = row
        .try_get::<Option<String>, _>("previous_status")?
        .map(|value| parse_status("previous_status", &value))
        .transpose()?;
    let new_status_raw = row.try_get::<String, _>("new_status")?;

    Ok(StatusHistory {
        id: StatusHistoryId(row.try_get("id")?),
        expense_id: ExpenseId(row.try_get("expense_id")?),
        actor_id: row.try_get::<Option<String>, _>("actor_id")?.map(UserId),
        previous_status,
        new_status: parse_status("new_status", &new_status_raw)?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_status(column: &str, value: &str) -> Result<ExpenseStatus, RepositoryError> {
    ExpenseStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status in `{column}`: `{value}`")))
}

fn parse_count(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `{column}` (expected non-negative): {value}"))
    })
}

// Fixed-width UTC timestamps keep lexicographic and chronological order equal.
fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
