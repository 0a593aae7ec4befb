// src/core/index/mod.rs

//! The relational index (§4.4): transactional tables for runs, test cases,
//! and run/group metadata, plus every derived query surface the API layer
//! needs (§4.8).
//!
//! `rusqlite` is synchronous; every call takes the connection mutex inside
//! a `spawn_blocking` so the async runtime's worker threads never block on
//! disk I/O (mirrors the teacher's use of `spawn_blocking` for blocking
//! syscalls elsewhere in the server).

mod queries;
mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::core::errors::IngestError;

pub use queries::{
    FailureRow, GroupDetails, MetadataMap, NewRun, NewTestCase, RunFilter, RunRow,
    RunsOverTimeRow, StatusCounts, SymptomFailureRow, TestCaseHistoryRow, TestCaseRow,
    TopFailureRow,
};

#[derive(Clone)]
pub struct Index {
    conn: Arc<Mutex<Connection>>,
}

impl Index {
    /// Opens (creating if absent) the index database at `path`, applying
    /// idempotent schema creation and additive-only column migration
    /// (§4.4 "Open-time migration").
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, IngestError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the connection on a blocking
    /// thread, mapping panics/join errors to `IngestError::Internal`.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, IngestError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, IngestError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("index connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| IngestError::Internal(format!("index task join error: {e}")))?
    }

    pub async fn insert_run(&self, row: queries::NewRun) -> Result<(), IngestError> {
        self.with_conn(move |c| queries::insert_run(c, &row)).await
    }

    pub async fn update_run_status(
        &self,
        run_id: String,
        status: &'static str,
        end_time: Option<i64>,
        abort_reason: Option<String>,
    ) -> Result<(), IngestError> {
        self.with_conn(move |c| {
            queries::update_run_status(c, &run_id, status, end_time, abort_reason.as_deref())
        })
        .await
    }

    pub async fn upsert_test_case(&self, row: queries::NewTestCase) -> Result<(), IngestError> {
        self.with_conn(move |c| queries::upsert_test_case(c, &row))
            .await
    }

    pub async fn update_test_case_symptom(
        &self,
        run_id: String,
        tc_id: String,
        symptom: String,
    ) -> Result<(), IngestError> {
        self.with_conn(move |c| queries::update_test_case_symptom(c, &run_id, &tc_id, &symptom))
            .await
    }

    pub async fn insert_user_metadata(
        &self,
        run_id: String,
        metadata: Vec<(String, String, Option<String>)>,
    ) -> Result<(), IngestError> {
        self.with_conn(move |c| queries::insert_metadata(c, "user_metadata", &run_id, &metadata))
            .await
    }

    pub async fn insert_group_metadata(
        &self,
        run_id: String,
        metadata: Vec<(String, String, Option<String>)>,
    ) -> Result<(), IngestError> {
        self.with_conn(move |c| queries::insert_metadata(c, "group_metadata", &run_id, &metadata))
            .await
    }

    pub async fn run_exists(&self, run_id: String) -> Result<bool, IngestError> {
        self.with_conn(move |c| queries::run_exists(c, &run_id)).await
    }

    pub async fn list_runs(&self, filter: queries::RunFilter) -> Result<Vec<RunRow>, IngestError> {
        self.with_conn(move |c| queries::list_runs(c, &filter)).await
    }

    pub async fn run_by_id(&self, run_id: String) -> Result<Option<RunRow>, IngestError> {
        self.with_conn(move |c| queries::run_by_id(c, &run_id)).await
    }

    pub async fn test_cases_for_run(&self, run_id: String) -> Result<Vec<TestCaseRow>, IngestError> {
        self.with_conn(move |c| queries::test_cases_for_runs(c, &[run_id]))
            .await
    }

    pub async fn test_cases_for_runs(
        &self,
        run_ids: Vec<String>,
    ) -> Result<Vec<TestCaseRow>, IngestError> {
        self.with_conn(move |c| queries::test_cases_for_runs(c, &run_ids))
            .await
    }

    pub async fn run_metadata(&self, run_id: String) -> Result<MetadataMap, IngestError> {
        self.with_conn(move |c| queries::run_metadata(c, "user_metadata", &run_id))
            .await
    }

    pub async fn group_metadata(&self, run_id: String) -> Result<MetadataMap, IngestError> {
        self.with_conn(move |c| queries::run_metadata(c, "group_metadata", &run_id))
            .await
    }

    pub async fn runs_over_time(
        &self,
        filter: queries::RunFilter,
    ) -> Result<Vec<RunsOverTimeRow>, IngestError> {
        self.with_conn(move |c| queries::runs_over_time(c, &filter))
            .await
    }

    pub async fn test_case_history(
        &self,
        tc_full_name: String,
        group_hash: Option<String>,
        exclude_run_id: Option<String>,
        before: Option<i64>,
    ) -> Result<Vec<TestCaseHistoryRow>, IngestError> {
        self.with_conn(move |c| {
            queries::test_case_history(
                c,
                &tc_full_name,
                group_hash.as_deref(),
                exclude_run_id.as_deref(),
                before,
            )
        })
        .await
    }

    pub async fn recent_failures(
        &self,
        window_start: i64,
        filter: queries::RunFilter,
        limit: i64,
    ) -> Result<Vec<FailureRow>, IngestError> {
        self.with_conn(move |c| queries::recent_failures(c, window_start, &filter, limit))
            .await
    }

    pub async fn top_failures(
        &self,
        window_start: i64,
        filter: queries::RunFilter,
        limit: i64,
    ) -> Result<Vec<TopFailureRow>, IngestError> {
        self.with_conn(move |c| queries::top_failures(c, window_start, &filter, limit))
            .await
    }

    pub async fn top_failures_by_symptom(
        &self,
        window_start: i64,
        filter: queries::RunFilter,
        limit: i64,
    ) -> Result<Vec<queries::SymptomFailureRow>, IngestError> {
        self.with_conn(move |c| queries::top_failures_by_symptom(c, window_start, &filter, limit))
            .await
    }

    pub async fn previous_run_in_group(
        &self,
        group_hash: String,
        before_start_time: i64,
    ) -> Result<Option<RunRow>, IngestError> {
        self.with_conn(move |c| queries::previous_run_in_group(c, &group_hash, before_start_time))
            .await
    }

    pub async fn run_names_with_prefix(
        &self,
        group_hash: Option<String>,
        base_name: String,
    ) -> Result<Vec<String>, IngestError> {
        self.with_conn(move |c| {
            queries::run_names_with_prefix(c, group_hash.as_deref(), &base_name)
        })
        .await
    }

    pub async fn metadata_keys(&self) -> Result<Vec<String>, IngestError> {
        self.with_conn(queries::metadata_keys).await
    }

    pub async fn metadata_values(&self, key: String) -> Result<Vec<String>, IngestError> {
        self.with_conn(move |c| queries::metadata_values(c, &key)).await
    }

    pub async fn group_details(&self, group_hash: String) -> Result<Option<GroupDetails>, IngestError> {
        self.with_conn(move |c| queries::group_details(c, &group_hash))
            .await
    }

    /// Sweeps runs left `running`/`aborted` from a prior process lifetime,
    /// marking their still-running cases aborted and recording the run's
    /// end_time as the latest case event time (§5 "Startup/shutdown
    /// behavior"). Returns the swept `run_id`s.
    pub async fn sweep_abandoned_runs(&self) -> Result<Vec<String>, IngestError> {
        self.with_conn(queries::sweep_abandoned_runs).await
    }

    /// Runs retaining `run_id`s whose `start_time` predates the retention
    /// cutoff and have a non-null `retention_days` (§5 "Retention").
    pub async fn retention_eligible_run_ids(&self, now_ms: i64) -> Result<Vec<String>, IngestError> {
        self.with_conn(move |c| queries::retention_eligible_run_ids(c, now_ms))
            .await
    }
}
