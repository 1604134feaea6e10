//! Job and item statuses, and the pure derivation of one from the other.

use serde::{Deserialize, Serialize};

/// Aggregate job status.
///
/// Always computed from item state (see [`derive_status`] and
/// [`resolve_status`]); a persisted copy is only a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    PartialSuccess,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Statuses reached by a worker run that finished normally.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::PartialSuccess | JobStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::PartialSuccess => "partial_success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "in_progress" => JobStatus::InProgress,
            "completed" => JobStatus::Completed,
            "partial_success" => JobStatus::PartialSuccess,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobItemStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Canceled,
}

impl JobItemStatus {
    /// Terminal items are immutable until an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobItemStatus::Success | JobItemStatus::Failed | JobItemStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobItemStatus::Pending => "pending",
            JobItemStatus::InProgress => "in_progress",
            JobItemStatus::Success => "success",
            JobItemStatus::Failed => "failed",
            JobItemStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobItemStatus::Pending,
            "in_progress" => JobItemStatus::InProgress,
            "success" => JobItemStatus::Success,
            "failed" => JobItemStatus::Failed,
            "canceled" => JobItemStatus::Canceled,
            _ => return None,
        })
    }
}

impl std::fmt::Display for JobItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    total: usize,
    pending: usize,
    in_progress: usize,
    success: usize,
    canceled: usize,
}

impl Tally {
    fn count<I: IntoIterator<Item = JobItemStatus>>(statuses: I) -> Self {
        let mut t = Tally::default();
        for s in statuses {
            t.total += 1;
            match s {
                JobItemStatus::Pending => t.pending += 1,
                JobItemStatus::InProgress => t.in_progress += 1,
                JobItemStatus::Success => t.success += 1,
                JobItemStatus::Failed => {}
                JobItemStatus::Canceled => t.canceled += 1,
            }
        }
        t
    }

    fn derive(&self) -> JobStatus {
        if self.total == 0 || self.pending == self.total {
            return JobStatus::Pending;
        }
        if self.pending == 0 && self.in_progress == 0 {
            return if self.canceled == 0 {
                JobStatus::Completed
            } else {
                JobStatus::Cancelled
            };
        }
        JobStatus::InProgress
    }
}

/// Derive the aggregate status from the item-status multiset alone.
///
/// | items                                   | status       |
/// |-----------------------------------------|--------------|
/// | none                                    | `Pending`    |
/// | all `Pending`                           | `Pending`    |
/// | all `Success`/`Failed`                  | `Completed`  |
/// | all terminal, at least one `Canceled`   | `Cancelled`  |
/// | anything else                           | `InProgress` |
pub fn derive_status<I>(statuses: I) -> JobStatus
where
    I: IntoIterator<Item = JobItemStatus>,
{
    Tally::count(statuses).derive()
}

/// Where the worker's run of a job stands, as recorded by its run markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run has started.
    Idle,
    /// `started_at` is set and the job is not yet closed out.
    Running,
    /// The run closed out normally (`completed_at` is set).
    Finalised,
    /// The run was closed out without attempting its items, e.g. no handler
    /// was registered for the job type.
    Aborted,
}

/// The status reported to callers: [`derive_status`] refined by the run state.
///
/// - `Running`: an all-`Pending` or all-finished job reads `InProgress` until
///   the worker closes it out.
/// - `Finalised`: unless cancelled, the outcome is `Completed` when every item
///   succeeded (or there are none), `Failed` when none did, and
///   `PartialSuccess` otherwise.
/// - `Aborted`: `Failed` unless cancelled, whatever the item counts.
pub fn resolve_status<I>(statuses: I, run: RunState) -> JobStatus
where
    I: IntoIterator<Item = JobItemStatus>,
{
    let tally = Tally::count(statuses);
    let base = tally.derive();

    match run {
        RunState::Aborted if base == JobStatus::Cancelled => JobStatus::Cancelled,
        RunState::Aborted => JobStatus::Failed,
        RunState::Finalised if base == JobStatus::Cancelled => JobStatus::Cancelled,
        RunState::Finalised if tally.success == tally.total => JobStatus::Completed,
        RunState::Finalised if tally.success == 0 => JobStatus::Failed,
        RunState::Finalised => JobStatus::PartialSuccess,
        RunState::Running
            if tally.total > 0 && matches!(base, JobStatus::Pending | JobStatus::Completed) =>
        {
            JobStatus::InProgress
        }
        RunState::Running | RunState::Idle => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use JobItemStatus::*;

    const NONE: [JobItemStatus; 0] = [];

    #[test]
    fn derivation_table() {
        assert_eq!(derive_status(NONE), JobStatus::Pending);
        assert_eq!(derive_status([Pending, Pending]), JobStatus::Pending);
        assert_eq!(derive_status([Success, Failed]), JobStatus::Completed);
        assert_eq!(derive_status([Success, Success]), JobStatus::Completed);
        assert_eq!(derive_status([Success, Canceled]), JobStatus::Cancelled);
        assert_eq!(derive_status([Canceled]), JobStatus::Cancelled);
        assert_eq!(derive_status([Success, Pending]), JobStatus::InProgress);
        assert_eq!(derive_status([InProgress]), JobStatus::InProgress);
        assert_eq!(derive_status([Canceled, Pending]), JobStatus::InProgress);
    }

    #[test]
    fn finalised_outcomes() {
        use RunState::Finalised;
        assert_eq!(resolve_status(NONE, Finalised), JobStatus::Completed);
        assert_eq!(resolve_status([Success, Success], Finalised), JobStatus::Completed);
        assert_eq!(resolve_status([Failed, Failed], Finalised), JobStatus::Failed);
        assert_eq!(
            resolve_status([Success, Failed, Success], Finalised),
            JobStatus::PartialSuccess
        );
        assert_eq!(resolve_status([Success, Canceled], Finalised), JobStatus::Cancelled);
    }

    #[test]
    fn aborted_run_reads_failed_whatever_the_items() {
        use RunState::Aborted;
        assert_eq!(resolve_status(NONE, Aborted), JobStatus::Failed);
        assert_eq!(resolve_status([Pending, Pending], Aborted), JobStatus::Failed);
        assert_eq!(resolve_status([Success, Pending], Aborted), JobStatus::Failed);
        assert_eq!(resolve_status([Success, Success], Aborted), JobStatus::Failed);
        assert_eq!(resolve_status([Success, Canceled], Aborted), JobStatus::Cancelled);
    }

    #[test]
    fn started_job_with_untouched_items_reads_in_progress() {
        assert_eq!(resolve_status([Pending], RunState::Running), JobStatus::InProgress);
        assert_eq!(resolve_status(NONE, RunState::Running), JobStatus::Pending);
        assert_eq!(resolve_status([Pending], RunState::Idle), JobStatus::Pending);
    }

    #[test]
    fn started_run_stays_in_progress_until_finalised() {
        assert_eq!(resolve_status([Success, Failed], RunState::Running), JobStatus::InProgress);
        assert_eq!(resolve_status([Success, Canceled], RunState::Running), JobStatus::Cancelled);
        assert_eq!(
            resolve_status([Success, Failed], RunState::Finalised),
            JobStatus::PartialSuccess
        );
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::PartialSuccess,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobItemStatus::parse("canceled"), Some(Canceled));
        assert_eq!(JobItemStatus::parse("cancelled"), None);
    }

    fn item_status() -> impl Strategy<Value = JobItemStatus> {
        prop_oneof![
            Just(Pending),
            Just(InProgress),
            Just(Success),
            Just(Failed),
            Just(Canceled),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Derivation is deterministic and order-insensitive.
        #[test]
        fn derivation_ignores_item_order(
            mut statuses in prop::collection::vec(item_status(), 0..40)
        ) {
            let first = derive_status(statuses.iter().copied());
            prop_assert_eq!(first, derive_status(statuses.iter().copied()));

            statuses.reverse();
            prop_assert_eq!(first, derive_status(statuses.iter().copied()));
        }

        /// A job only reads Completed/Cancelled once nothing is left to run.
        #[test]
        fn terminal_aggregate_implies_terminal_items(
            statuses in prop::collection::vec(item_status(), 1..40)
        ) {
            let status = derive_status(statuses.iter().copied());
            if matches!(status, JobStatus::Completed | JobStatus::Cancelled) {
                prop_assert!(statuses.iter().all(|s| s.is_terminal()));
            }
            if status == JobStatus::Cancelled {
                prop_assert!(statuses.contains(&Canceled));
            }
        }

        /// Before any run, resolution is exactly the derivation.
        #[test]
        fn unmarked_resolution_matches_derivation(
            statuses in prop::collection::vec(item_status(), 0..40)
        ) {
            prop_assert_eq!(
                resolve_status(statuses.iter().copied(), RunState::Idle),
                derive_status(statuses.iter().copied())
            );
        }
    }
}
