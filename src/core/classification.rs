// src/core/classification.rs

//! The classification engine (§4.7): pure functions computing
//! flaky/fixed/regression/new labels from a test case's current status and
//! its recent per-group history. Never mutates index or run-state.

use crate::core::errors::IngestError;
use crate::core::index::Index;
use crate::core::protocol::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Flaky,
    Fixed,
    Regression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassFail {
    Pass,
    Fail,
}

fn project(status: Status) -> Option<PassFail> {
    match status {
        Status::Passed => Some(PassFail::Pass),
        Status::Failed | Status::Error => Some(PassFail::Fail),
        Status::Skipped | Status::Running | Status::Aborted => None,
    }
}

/// Classifies a test case given its current status and recent history
/// (newest first, already scoped to the same `tc_full_name`/`group_hash`,
/// excluding the current run and any later run — §4.7).
pub fn classify(current: Status, history: &[Status]) -> Option<Classification> {
    let current = project(current)?;
    let relevant: Vec<PassFail> = history.iter().filter_map(|s| project(*s)).collect();

    let series: Vec<PassFail> = std::iter::once(current).chain(relevant.iter().copied()).collect();
    let transitions = series.windows(2).filter(|w| w[0] != w[1]).count();
    if transitions > 4 {
        return Some(Classification::Flaky);
    }

    let last_five: Vec<PassFail> = relevant.iter().take(5).copied().collect();
    if last_five.len() == 5 {
        if current == PassFail::Pass && last_five.iter().all(|s| *s == PassFail::Fail) {
            return Some(Classification::Fixed);
        }
        if current == PassFail::Fail && last_five.iter().all(|s| *s == PassFail::Pass) {
            return Some(Classification::Regression);
        }
    }

    None
}

/// Fetches a test case's recent per-group history (already bounded to the
/// 10 most recent occurrences by the query, §4.7) and classifies `current`
/// against it. `run_id`/`before` exclude the run being classified and any
/// later run from its own history.
pub async fn classify_test_case(
    index: &Index,
    tc_full_name: &str,
    group_hash: Option<&str>,
    run_id: &str,
    run_start_time: i64,
    current: Status,
) -> Result<Option<Classification>, IngestError> {
    let history = index
        .test_case_history(
            tc_full_name.to_string(),
            group_hash.map(str::to_string),
            Some(run_id.to_string()),
            Some(run_start_time),
        )
        .await?;
    let statuses: Vec<Status> = history
        .iter()
        .filter_map(|row| Status::from_str_loose(&row.status))
        .collect();
    Ok(classify(current, &statuses))
}

/// True iff the run has a `group_hash`, the previous run in that group had
/// non-empty test cases, and `tc_full_name` is not among them (§4.7).
pub fn is_new(
    group_hash: Option<&str>,
    previous_run_test_case_names: Option<&[String]>,
    tc_full_name: &str,
) -> bool {
    let Some(_) = group_hash else { return false };
    let Some(previous_names) = previous_run_test_case_names else {
        return false;
    };
    if previous_names.is_empty() {
        return false;
    }
    !previous_names.iter().any(|n| n == tc_full_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(statuses: &[&str]) -> Vec<Status> {
        statuses
            .iter()
            .map(|s| Status::from_str_loose(s).unwrap())
            .collect()
    }

    #[test]
    fn scenario_e_flaky() {
        let history = s(&["pass", "fail", "pass", "fail", "pass", "fail", "pass"]);
        assert_eq!(classify(Status::Failed, &history), Some(Classification::Flaky));
    }

    #[test]
    fn scenario_e_fixed() {
        let history = s(&["fail", "fail", "fail", "fail", "fail"]);
        assert_eq!(classify(Status::Passed, &history), Some(Classification::Fixed));
    }

    #[test]
    fn scenario_e_regression() {
        let history = s(&["pass", "pass", "pass", "pass", "pass"]);
        assert_eq!(classify(Status::Failed, &history), Some(Classification::Regression));
    }

    #[test]
    fn no_label_with_insufficient_history() {
        let history = s(&["pass", "pass"]);
        assert_eq!(classify(Status::Failed, &history), None);
    }

    #[test]
    fn skipped_and_running_are_excluded_from_projection() {
        let history = s(&["skipped", "running", "aborted", "pass", "pass", "pass", "pass", "pass"]);
        assert_eq!(classify(Status::Failed, &history), Some(Classification::Regression));
    }

    #[tokio::test]
    async fn classify_test_case_only_considers_the_10_most_recent_runs() {
        use crate::core::index::{Index, NewRun, NewTestCase};

        let index = Index::open_in_memory().unwrap();

        // Newest-first statuses for the 12 prior occurrences of "T" in
        // group "g1". The first 10 have exactly 4 transitions against a
        // failing current run; items 11/12 add 2 more transitions each
        // that must be excluded by the 10-most-recent window.
        let statuses = [
            "failed", "failed", "failed", "passed", "passed", "failed", "failed", "passed", "passed", "failed",
            "passed", "failed",
        ];
        for (i, status) in statuses.iter().enumerate() {
            let run_id = format!("hist-{i}");
            let start_time = 1000 - (i as i64 + 1) * 10;
            index
                .insert_run(NewRun {
                    run_id: run_id.clone(),
                    status: "finished".to_string(),
                    start_time,
                    retention_days: None,
                    local_run: false,
                    dut: None,
                    run_name: run_id.clone(),
                    group_name: Some("g1".to_string()),
                    group_hash: Some("g1".to_string()),
                    created_at: start_time,
                })
                .await
                .unwrap();
            index
                .upsert_test_case(NewTestCase {
                    run_id,
                    tc_full_name: "T".to_string(),
                    tc_id: format!("tc-{i}"),
                    status: status.to_string(),
                    start_time,
                    end_time: Some(start_time),
                    now: start_time,
                })
                .await
                .unwrap();
        }

        let label = classify_test_case(&index, "T", Some("g1"), "current-run", 1000, Status::Failed)
            .await
            .unwrap();
        assert_eq!(label, None, "transitions beyond the 10-most-recent window must not count");
    }

    #[test]
    fn is_new_requires_group_and_nonempty_previous_run() {
        assert!(!is_new(None, Some(&["T1".to_string()]), "T2"));
        assert!(!is_new(Some("abc"), None, "T2"));
        assert!(!is_new(Some("abc"), Some(&[]), "T2"));
        assert!(is_new(Some("abc"), Some(&["T1".to_string()]), "T2"));
        assert!(!is_new(Some("abc"), Some(&["T1".to_string()]), "T1"));
    }
}
