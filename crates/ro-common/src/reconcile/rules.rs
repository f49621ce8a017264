use crate::models::{KanbanColumn, ObservedObjectives, status_keys};

/// Ordered objective → status mapping; the first matching rule wins, so the
/// most advanced status is always preferred.
pub fn target_status(observed: &ObservedObjectives) -> Option<&'static str> {
    let yes = |flag: Option<bool>| flag == Some(true);

    if yes(observed.started_work) || yes(observed.hired) {
        Some(status_keys::STARTED_WORK)
    } else if yes(observed.interview_scheduled) {
        Some(status_keys::INTERVIEW)
    } else if yes(observed.interested) {
        Some(status_keys::INTERESTED)
    } else if yes(observed.rejected) || yes(observed.not_interested) {
        Some(status_keys::REJECTED)
    } else {
        None
    }
}

/// Whether a candidate sitting in `status` counts toward the job's hired
/// total.
pub fn counts_as_hired(status: &str, columns: &[KanbanColumn]) -> bool {
    status == status_keys::HIRED
        || columns
            .iter()
            .any(|column| column.status_key == status && column.counts_as_hired())
}

/// Hired-counter adjustment for moving a candidate from `from` to `to`.
pub fn hired_delta(from: &str, to: &str, columns: &[KanbanColumn]) -> i32 {
    i32::from(counts_as_hired(to, columns)) - i32::from(counts_as_hired(from, columns))
}

pub fn is_known_status(status: &str, columns: &[KanbanColumn]) -> bool {
    if columns.is_empty() {
        return matches!(
            status,
            status_keys::STARTED_WORK
                | status_keys::INTERVIEW
                | status_keys::INTERESTED
                | status_keys::REJECTED
                | status_keys::HIRED
        );
    }
    columns.iter().any(|column| column.status_key == status)
}
