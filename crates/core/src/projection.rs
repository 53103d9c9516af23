//! Caller-facing shapes returned by the workflow. Raw entities never leave
//! the orchestrator; these views decide what a caller may see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::Actor;
use crate::domain::approval::Approval;
use crate::domain::expense::{Expense, ExpensePolicy, ExpenseStatus};
use crate::domain::history::StatusHistory;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub amount: i64,
    pub amount_formatted: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    pub status: ExpenseStatus,
    pub requires_approval: bool,
    pub auto_approved: bool,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl ExpenseView {
    /// Owner ids are only disclosed to approvers.
    pub fn project(expense: &Expense, policy: &ExpensePolicy, viewer: &Actor) -> Self {
        let requires_approval = policy.requires_approval(expense.amount);
        Self {
            id: expense.id.0.clone(),
            owner_id: viewer.is_approver().then(|| expense.owner_id.0.clone()),
            amount: expense.amount,
            amount_formatted: format_idr(expense.amount),
            description: expense.description.clone(),
            receipt_url: expense.receipt_url.clone(),
            status: expense.status,
            requires_approval,
            auto_approved: !requires_approval
                && expense.status != ExpenseStatus::AwaitingApproval,
            submitted_at: expense.submitted_at,
            processed_at: expense.processed_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalView {
    pub id: String,
    pub expense_id: String,
    pub approver_id: String,
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Approval> for ApprovalView {
    fn from(approval: &Approval) -> Self {
        Self {
            id: approval.id.0.clone(),
            expense_id: approval.expense_id.0.clone(),
            approver_id: approval.approver_id.0.clone(),
            decision: approval.decision.as_str().to_string(),
            notes: approval.notes.clone(),
            created_at: approval.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseDetail {
    #[serde(flatten)]
    pub expense: ExpenseView,
    pub approvals: Vec<ApprovalView>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryView {
    pub id: String,
    pub expense_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<ExpenseStatus>,
    pub new_status: ExpenseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&StatusHistory> for StatusHistoryView {
    fn from(record: &StatusHistory) -> Self {
        Self {
            id: record.id.0.clone(),
            expense_id: record.expense_id.0.clone(),
            actor_id: record.actor_id.as_ref().map(|id| id.0.clone()),
            previous_status: record.previous_status,
            new_status: record.new_status,
            notes: record.notes.clone(),
            created_at: record.created_at,
        }
    }
}

/// One-based page request. Out-of-range values are clamped, not rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: i64, size: i64) -> Self {
        let page = if page < 1 { 1 } else { page.min(u32::MAX as i64) as u32 };
        let size = if size < 1 { DEFAULT_PAGE_SIZE } else { size.min(u32::MAX as i64) as u32 };
        Self { page, size }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.size)
    }

    pub fn limit(&self) -> u32 {
        self.size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, size: DEFAULT_PAGE_SIZE }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub current_page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PageMetadata {
    pub fn new(request: PageRequest, total_items: u64) -> Self {
        let size = u64::from(request.size.max(1));
        let total_pages = total_items.div_ceil(size);
        Self {
            current_page: request.page,
            page_size: request.size,
            total_items,
            total_pages,
            has_next: u64::from(request.page) < total_pages,
            has_previous: request.page > 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub paging: PageMetadata,
}

/// Formats an amount with rupiah-style thousands grouping, e.g. `Rp 1.500.000`.
pub fn format_idr(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    if amount < 0 {
        format!("Rp -{grouped}")
    } else {
        format!("Rp {grouped}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{format_idr, ExpenseDetail, ExpenseView, PageMetadata, PageRequest};
    use crate::domain::actor::{Actor, UserId};
    use crate::domain::expense::{Expense, ExpensePolicy, ExpenseStatus};

    #[test]
    fn formats_rupiah_grouping() {
        assert_eq!(format_idr(0), "Rp 0");
        assert_eq!(format_idr(999), "Rp 999");
        assert_eq!(format_idr(1_000), "Rp 1.000");
        assert_eq!(format_idr(1_500_000), "Rp 1.500.000");
        assert_eq!(format_idr(50_000_000), "Rp 50.000.000");
        assert_eq!(format_idr(-25_000), "Rp -25.000");
    }

    #[test]
    fn page_request_clamps_out_of_range_input() {
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, size: 10 });
        assert_eq!(PageRequest::new(-3, 25), PageRequest { page: 1, size: 25 });
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }

    #[test]
    fn page_metadata_counts_partial_last_page() {
        let paging = PageMetadata::new(PageRequest::new(2, 10), 21);
        assert_eq!(paging.total_pages, 3);
        assert!(paging.has_next);
        assert!(paging.has_previous);

        let empty = PageMetadata::new(PageRequest::default(), 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_previous);
    }

    #[test]
    fn owner_id_is_only_shown_to_managers() {
        let policy = ExpensePolicy::default();
        let (expense, _) = Expense::submit(
            UserId("u-1".to_owned()),
            2_000_000,
            "Flight",
            None,
            &policy,
            Utc::now(),
        )
        .expect("valid expense");

        let as_owner = ExpenseView::project(&expense, &policy, &Actor::employee("u-1"));
        assert_eq!(as_owner.owner_id, None);
        assert!(as_owner.requires_approval);
        assert!(!as_owner.auto_approved);
        assert_eq!(as_owner.status, ExpenseStatus::AwaitingApproval);
        assert_eq!(as_owner.amount_formatted, "Rp 2.000.000");

        let as_manager = ExpenseView::project(&expense, &policy, &Actor::manager("m-1"));
        assert_eq!(as_manager.owner_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn detail_serializes_flat_with_snake_case_status() {
        let policy = ExpensePolicy::default();
        let (expense, _) = Expense::submit(
            UserId("u-1".to_owned()),
            75_000,
            "Parking",
            None,
            &policy,
            Utc::now(),
        )
        .expect("valid expense");
        let detail = ExpenseDetail {
            expense: ExpenseView::project(&expense, &policy, &Actor::employee("u-1")),
            approvals: Vec::new(),
        };

        let json = serde_json::to_value(&detail).expect("serialize");
        assert_eq!(json["status"], "auto_approved");
        assert_eq!(json["amount_formatted"], "Rp 75.000");
        assert!(json.get("owner_id").is_none());
        assert!(json.get("processed_at").is_none());
        assert_eq!(json["approvals"], serde_json::json!([]));
    }
}
