use thiserror::Error;
use uuid::Uuid;

use crate::domain::actor::UserId;
use crate::domain::expense::{ExpenseId, ExpenseStatus, ExpenseTransition};
use crate::domain::history::{StatusHistory, StatusHistoryId};

/// Builds the history row that must accompany `transition` in the same unit
/// of work. A `None` actor marks a system-triggered change.
pub fn record_transition(
    expense_id: &ExpenseId,
    actor_id: Option<&UserId>,
    transition: &ExpenseTransition,
    notes: Option<&str>,
) -> StatusHistory {
    StatusHistory {
        id: StatusHistoryId(Uuid::new_v4().to_string()),
        expense_id: expense_id.clone(),
        actor_id: actor_id.cloned(),
        previous_status: transition.from,
        new_status: transition.to,
        notes: notes.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string),
        created_at: transition.at,
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HistoryPathError {
    #[error("expense has no history records")]
    Empty,
    #[error("first record must be a creation into an initial status, found {previous:?} -> {new}")]
    InvalidCreation { previous: Option<ExpenseStatus>, new: ExpenseStatus },
    #[error("record {index} starts from {found:?} but the expense was {expected}")]
    Gap { index: usize, expected: ExpenseStatus, found: Option<ExpenseStatus> },
    #[error("record {index} applies illegal transition {from} -> {to}")]
    IllegalEdge { index: usize, from: ExpenseStatus, to: ExpenseStatus },
    #[error("record {index} belongs to another expense")]
    ForeignRecord { index: usize },
}

/// Replays ordered history records and returns the status path they describe,
/// failing on the first gap or illegal edge.
pub fn reconstruct_path(records: &[StatusHistory]) -> Result<Vec<ExpenseStatus>, HistoryPathError> {
    let first = records.first().ok_or(HistoryPathError::Empty)?;
    if first.previous_status.is_some() || !first.new_status.is_initial() {
        return Err(HistoryPathError::InvalidCreation {
            previous: first.previous_status,
            new: first.new_status,
        });
    }

    let mut path = vec![first.new_status];
    for (index, record) in records.iter().enumerate().skip(1) {
        if record.expense_id != first.expense_id {
            return Err(HistoryPathError::ForeignRecord { index });
        }

        let current = path[path.len() - 1];
        if record.previous_status != Some(current) {
            return Err(HistoryPathError::Gap {
                index,
                expected: current,
                found: record.previous_status,
            });
        }
        if !current.can_transition_to(record.new_status) {
            return Err(HistoryPathError::IllegalEdge {
                index,
                from: current,
                to: record.new_status,
            });
        }
        path.push(record.new_status);
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{reconstruct_path, record_transition, HistoryPathError};
    use crate::domain::actor::UserId;
    use crate::domain::expense::{ExpenseId, ExpenseStatus, ExpenseTransition};
    use crate::domain::history::StatusHistory;

    fn record(from: Option<ExpenseStatus>, to: ExpenseStatus) -> StatusHistory {
        record_transition(
            &ExpenseId("E-1".to_owned()),
            Some(&UserId("u-1".to_owned())),
            &ExpenseTransition { from, to, at: Utc::now() },
            Some("  "),
        )
    }

    #[test]
    fn recorder_copies_transition_and_drops_blank_notes() {
        let history = record(Some(ExpenseStatus::AwaitingApproval), ExpenseStatus::Approved);
        assert_eq!(history.previous_status, Some(ExpenseStatus::AwaitingApproval));
        assert_eq!(history.new_status, ExpenseStatus::Approved);
        assert_eq!(history.actor_id.as_ref().map(|id| id.0.as_str()), Some("u-1"));
        assert_eq!(history.notes, None);
    }

    #[test]
    fn reconstructs_manager_approval_path() {
        let records = vec![
            record(None, ExpenseStatus::AwaitingApproval),
            record(Some(ExpenseStatus::AwaitingApproval), ExpenseStatus::Approved),
            record(Some(ExpenseStatus::Approved), ExpenseStatus::Completed),
        ];

        let path = reconstruct_path(&records).expect("valid path");
        assert_eq!(
            path,
            vec![ExpenseStatus::AwaitingApproval, ExpenseStatus::Approved, ExpenseStatus::Completed]
        );
    }

    #[test]
    fn detects_gaps_and_illegal_edges() {
        let gap = vec![
            record(None, ExpenseStatus::AwaitingApproval),
            record(Some(ExpenseStatus::Approved), ExpenseStatus::Completed),
        ];
        assert!(matches!(reconstruct_path(&gap), Err(HistoryPathError::Gap { index: 1, .. })));

        let illegal = vec![
            record(None, ExpenseStatus::AutoApproved),
            record(Some(ExpenseStatus::AutoApproved), ExpenseStatus::Rejected),
        ];
        assert!(matches!(
            reconstruct_path(&illegal),
            Err(HistoryPathError::IllegalEdge { index: 1, .. })
        ));

        assert_eq!(reconstruct_path(&[]), Err(HistoryPathError::Empty));
        assert!(matches!(
            reconstruct_path(&[record(None, ExpenseStatus::Completed)]),
            Err(HistoryPathError::InvalidCreation { .. })
        ));
    }
}
