pub mod actor;
pub mod approval;
pub mod expense;
pub mod history;
pub mod settlement;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time truncated to microseconds, the precision the store keeps.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
