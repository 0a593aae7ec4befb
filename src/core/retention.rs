// src/core/retention.rs

//! Retention eligibility and the deletion primitive (§5 "Retention").
//! The sweep schedule itself is an external collaborator's concern; this
//! module only answers "is this run eligible" and "delete its on-disk
//! artifacts".

use tracing::{info, warn};

use crate::core::errors::IngestError;
use crate::core::index::Index;
use crate::core::metrics;
use crate::core::storage::DiskLogStore;

/// A run is eligible for on-disk deletion when `retention_days` is set and
/// `now - start_time > retention_days` (§5). Index rows are never deleted
/// here; deleting on-disk artifacts never touches them.
pub fn is_eligible(retention_days: Option<i64>, start_time_ms: i64, now_ms: i64) -> bool {
    match retention_days {
        Some(days) => (now_ms - start_time_ms) > days * 86_400_000,
        None => false,
    }
}

/// Deletes the on-disk directory for every run the index reports eligible,
/// leaving index rows intact (§5, §3 "Lifecycle"). Returns the number of
/// runs deleted.
pub async fn sweep(index: &Index, store: &DiskLogStore, now_ms: i64) -> Result<usize, IngestError> {
    metrics::RETENTION_SWEEP_IN_PROGRESS.set(1.0);
    let run_ids = index.retention_eligible_run_ids(now_ms).await?;
    let mut deleted = 0;
    for run_id in run_ids {
        match store.delete_run_dir(&run_id).await {
            Ok(()) => {
                deleted += 1;
                metrics::RUNS_RETAINED_DELETED_TOTAL.inc();
                info!(run_id, "deleted run directory past retention");
            }
            Err(e) => warn!(run_id, error = %e, "failed to delete run directory past retention"),
        }
    }
    metrics::RETENTION_SWEEP_IN_PROGRESS.set(0.0);
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligible_once_past_retention_window() {
        let day = 86_400_000;
        assert!(!is_eligible(Some(1), 0, day));
        assert!(is_eligible(Some(1), 0, day + 1));
        assert!(!is_eligible(None, 0, day * 10));
    }
}
