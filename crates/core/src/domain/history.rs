use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::UserId;
use crate::domain::expense::{ExpenseId, ExpenseStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusHistoryId(pub String);

/// One append-only row per expense status change. `actor_id` is `None` for
/// system-triggered transitions such as settlement; `previous_status` is
/// `None` only on the creation record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistory {
    pub id: StatusHistoryId,
    pub expense_id: ExpenseId,
    pub actor_id: Option<UserId>,
    pub previous_status: Option<ExpenseStatus>,
    pub new_status: ExpenseStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}
