// src/core/ingest/mod.rs

//! The ingest session state machine (§4.5): one per runner connection,
//! sole mutator of exactly one `Run` from `run_started` to terminal.
//!
//! This module holds the *effects* of each message type — run-state
//! mutation, disk append, index write, broadcast — in the fixed order the
//! spec requires: (a) run-state, (b) disk, (c) index, (d) broadcast. The
//! connection layer owns framing and the watchdog timer and calls into
//! `IngestSession::apply` per decoded frame.

mod validate;

use std::sync::Arc;
use std::time::Instant;

use rmpv::Value;
use tracing::warn;

use crate::core::errors::IngestError;
use crate::core::group;
use crate::core::index::{self, Index};
use crate::core::metrics;
use crate::core::protocol::outbound::{self, StatusCounts, UiEvent};
use crate::core::protocol::{entry, BatchEvent, Frame, MetaValue, RunStatus, Status};
use crate::core::pubsub::UiBroadcast;
use crate::core::state::{now_ms, Run, ServerState, TestCase};
use crate::core::storage::DiskLogStore;

pub use validate::{generate_run_id, html_entity_normalize, validate_run_id, validate_tc_id};

/// One runner connection's session. Owns at most one `Run` for its
/// lifetime.
pub struct IngestSession {
    state: Arc<ServerState>,
    store: Arc<DiskLogStore>,
    run_id: Option<String>,
    pub last_activity: Instant,
}

impl IngestSession {
    pub fn new(state: Arc<ServerState>, store: Arc<DiskLogStore>) -> Self {
        Self {
            state,
            store,
            run_id: None,
            last_activity: Instant::now(),
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Applies one decoded frame, returning an outbound reply if the
    /// message type produces one (`run_started` only). Errors that are
    /// validation failures on `run_started` are turned into an error
    /// reply instead of propagating; malformed-frame and persistence
    /// errors are logged and swallowed here (§7).
    pub async fn apply(&mut self, frame: Frame) -> Option<Value> {
        self.last_activity = Instant::now();
        if !matches!(frame, Frame::Heartbeat { .. }) {
            metrics::EVENTS_INGESTED_TOTAL.inc();
        }
        match frame {
            Frame::RunStarted {
                run_id,
                run_name,
                group,
                retention_days,
                local_run,
                user_metadata,
            } => {
                match self
                    .handle_run_started(run_id, run_name, group, retention_days, local_run, user_metadata)
                    .await
                {
                    Ok(reply) => Some(reply),
                    Err(e) => Some(outbound::run_started_error(&e.to_string())),
                }
            }
            Frame::TestCaseStarted { run_id, tc_full_name, tc_id, status, ts } => {
                self.log_err("test_case_started", &run_id, Some(&tc_id), self
                    .handle_test_case_started(&run_id, tc_full_name, tc_id.clone(), status, ts)
                    .await);
                None
            }
            Frame::LogBatch { run_id, tc_id, entries } => {
                self.handle_log_batch(&run_id, &tc_id, entries).await;
                None
            }
            Frame::Exception { run_id, tc_id, message, exception_type, stack_trace, is_error, ts } => {
                self.handle_exception(&run_id, &tc_id, ts, message, exception_type, stack_trace, is_error)
                    .await;
                None
            }
            Frame::TestCaseFinished { run_id, tc_id, status, ts } => {
                self.log_err("test_case_finished", &run_id, Some(&tc_id), self
                    .handle_test_case_finished(&run_id, &tc_id, status, ts)
                    .await);
                None
            }
            Frame::RunFinished { run_id, status, ts } => {
                self.log_err("run_finished", &run_id, None, self.handle_run_finished(&run_id, status, ts).await);
                None
            }
            Frame::Batch { run_id, events } => {
                for event in events {
                    self.handle_batch_event(&run_id, event).await;
                }
                None
            }
            Frame::Heartbeat { .. } => None,
            Frame::Metrics { run_id, sample } => {
                self.handle_metrics(&run_id, sample).await;
                None
            }
        }
    }

    fn log_err(&self, event: &str, run_id: &str, tc_id: Option<&str>, result: Result<(), IngestError>) {
        if let Err(e) = result {
            warn!(event, run_id, tc_id, error = %e, "ingest event failed");
        }
    }

    async fn handle_batch_event(&mut self, run_id: &str, event: BatchEvent) {
        match event {
            BatchEvent::TestCaseStarted { tc_full_name, tc_id, status, ts } => {
                self.log_err("batch:test_case_started", run_id, Some(&tc_id), self
                    .handle_test_case_started(run_id, tc_full_name, tc_id.clone(), status, ts)
                    .await);
            }
            BatchEvent::LogBatch { tc_id, entries } => {
                self.handle_log_batch(run_id, &tc_id, entries).await;
            }
            BatchEvent::Exception { tc_id, message, exception_type, stack_trace, is_error, ts } => {
                self.handle_exception(run_id, &tc_id, ts, message, exception_type, stack_trace, is_error)
                    .await;
            }
            BatchEvent::TestCaseFinished { tc_id, status, ts } => {
                self.log_err("batch:test_case_finished", run_id, Some(&tc_id), self
                    .handle_test_case_finished(run_id, &tc_id, status, ts)
                    .await);
            }
        }
    }

    async fn handle_run_started(
        &mut self,
        run_id: Option<String>,
        run_name: Option<String>,
        group_payload: Option<crate::core::protocol::GroupPayload>,
        retention_days: Option<u32>,
        local_run: bool,
        user_metadata: Vec<(String, MetaValue)>,
    ) -> Result<Value, IngestError> {
        let run_id = match run_id {
            Some(id) => {
                validate_run_id(&id)?;
                if self.state.runs.contains(&id).await || self.state.index.run_exists(id.clone()).await? {
                    return Err(IngestError::RunIdDuplicate(id));
                }
                id
            }
            None => generate_run_id(),
        };

        let (group, group_hash) = match &group_payload {
            Some(payload) => {
                let normalized = group::normalize(payload);
                let hash = group::compute_group_hash(&normalized);
                (Some(normalized), Some(hash))
            }
            None => (None, None),
        };

        let base_name = run_name.unwrap_or_else(|| run_id.clone());
        let run_name = uniquify_run_name(&self.state.index, group_hash.as_deref(), base_name).await?;

        let start_time = now_ms();
        let deletes_at = retention_days.map(|d| start_time + d as i64 * 86_400_000);

        let mut run = Run::new(run_id.clone(), run_name.clone(), start_time);
        run.retention_days = retention_days;
        run.local_run = local_run;
        run.user_metadata = user_metadata.clone();
        run.group = group.clone();
        run.group_hash = group_hash.clone();
        run.deletes_at = deletes_at;

        self.store.create_run_dir(&run_id).await?;
        self.store.write_sidecar(&run).await?;

        self.state
            .index
            .insert_run(index::NewRun {
                run_id: run_id.clone(),
                status: RunStatus::Running.as_str().to_string(),
                start_time,
                retention_days: retention_days.map(i64::from),
                local_run,
                dut: None,
                run_name: run_name.clone(),
                group_name: group.as_ref().map(|g| g.name.clone()),
                group_hash: group_hash.clone(),
                created_at: start_time,
            })
            .await?;

        if !user_metadata.is_empty() {
            self.state
                .index
                .insert_user_metadata(
                    run_id.clone(),
                    user_metadata
                        .iter()
                        .map(|(k, v)| (k.clone(), v.value.clone(), v.url.clone()))
                        .collect(),
                )
                .await?;
        }
        if let Some(group) = &group {
            if !group.metadata.is_empty() {
                self.state
                    .index
                    .insert_group_metadata(
                        run_id.clone(),
                        group
                            .metadata
                            .iter()
                            .map(|(k, v)| (k.clone(), v.value.clone(), v.url.clone()))
                            .collect(),
                    )
                    .await?;
            }
        }

        self.state.runs.insert(run).await;
        self.run_id = Some(run_id.clone());

        self.state.ui_broadcast.publish(&UiEvent::RunStarted {
            run_id: run_id.clone(),
            run_name: run_name.clone(),
        });

        Ok(outbound::run_started_response(
            &run_id,
            &run_name,
            &format!("/testRun/{run_id}/index.html"),
            group_hash.as_deref(),
            group_hash.as_deref().map(|h| format!("/group/{h}")).as_deref(),
        ))
    }

    async fn active_run(&self, run_id: &str) -> Result<Arc<tokio::sync::RwLock<Run>>, IngestError> {
        self.state
            .runs
            .get(run_id)
            .await
            .ok_or_else(|| IngestError::Internal(format!("run {run_id} is not active")))
    }

    async fn handle_test_case_started(
        &mut self,
        run_id: &str,
        tc_full_name: String,
        tc_id: String,
        status: Status,
        ts: i64,
    ) -> Result<(), IngestError> {
        validate_tc_id(&tc_id)?;
        let tc_full_name = html_entity_normalize(&tc_full_name);
        let run_lock = self.active_run(run_id).await?;

        {
            let mut run = run_lock.write().await;
            run.insert_test_case(TestCase::new(tc_full_name.clone(), tc_id.clone(), status, ts));
        }

        self.store.touch_case_files(run_id, &tc_id).await?;

        self.state
            .index
            .upsert_test_case(index::NewTestCase {
                run_id: run_id.to_string(),
                tc_full_name: tc_full_name.clone(),
                tc_id: tc_id.clone(),
                status: status.as_str().to_string(),
                start_time: ts,
                end_time: None,
                now: now_ms(),
            })
            .await?;

        let counts = {
            let run = run_lock.read().await;
            self.store.write_sidecar(&run).await.ok();
            run.counts()
        };

        self.state.ui_broadcast.publish(&UiEvent::TestCaseStarted {
            run_id: run_id.to_string(),
            tc_id,
            tc_full_name,
            counts,
        });
        Ok(())
    }

    async fn handle_log_batch(&mut self, run_id: &str, tc_id: &str, entries: Vec<Value>) {
        let Ok(run_lock) = self.active_run(run_id).await else {
            return;
        };
        for raw in entries {
            let Some(map) = raw.as_map() else { continue };
            if !map.iter().any(|(k, _)| k.as_str() == Some("ts")) {
                warn!(run_id, tc_id, "dropping log entry without 'ts'");
                continue;
            }
            self.store.append_log_entry(run_id, tc_id, &raw).await;
            let mut run = run_lock.write().await;
            entry::intern_inline_refs(&raw, &mut run.string_table);
            if let Some(tc) = run.test_case_by_id_mut(tc_id) {
                tc.publish(&raw);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_exception(
        &mut self,
        run_id: &str,
        tc_id: &str,
        ts: i64,
        message: String,
        exception_type: String,
        stack_trace: Vec<String>,
        is_error: bool,
    ) {
        let Ok(run_lock) = self.active_run(run_id).await else {
            return;
        };
        let record = entry::encode_exception_record(ts, &message, &exception_type, &stack_trace, is_error);
        self.store.append_stack_entry(run_id, tc_id, &record).await;

        let symptom = stack_trace
            .iter()
            .map(String::as_str)
            .find(|line| !line.trim().is_empty())
            .or_else(|| message.lines().next())
            .unwrap_or(&message);
        if !symptom.is_empty() {
            self.state
                .index
                .update_test_case_symptom(run_id.to_string(), tc_id.to_string(), symptom.to_string())
                .await
                .ok();
        }

        // Reload from disk so the stack list stays authoritative (§4.5):
        // broadcast the record as persisted, not the in-memory value.
        let reloaded = self.store.read_case_stack(run_id, tc_id).await.unwrap_or_default();
        let viewer_payload = reloaded
            .last()
            .map(entry::exception_viewer_payload)
            .unwrap_or_else(|| entry::exception_viewer_payload(&record));

        {
            let mut run = run_lock.write().await;
            if let Some(tc) = run.test_case_by_id_mut(tc_id) {
                tc.publish(&viewer_payload);
            }
        }
        let run = run_lock.read().await;
        self.store.write_sidecar(&run).await.ok();
    }

    /// Records the latest out-of-band resource sample for a run (§B).
    /// In-memory only: dropped silently if the run is closed or terminal,
    /// never persisted or broadcast.
    async fn handle_metrics(&mut self, run_id: &str, sample: crate::core::protocol::MetricSample) {
        let Ok(run_lock) = self.active_run(run_id).await else {
            return;
        };
        run_lock.write().await.latest_metric_sample = Some(sample);
    }

    async fn handle_test_case_finished(
        &mut self,
        run_id: &str,
        tc_id: &str,
        status: Status,
        ts: i64,
    ) -> Result<(), IngestError> {
        let run_lock = self.active_run(run_id).await?;
        let (tc_full_name, counts) = {
            let mut run = run_lock.write().await;
            let Some(tc) = run.test_case_by_id_mut(tc_id) else {
                return Err(IngestError::Internal(format!("unknown tc_id {tc_id}")));
            };
            tc.status = status;
            tc.end_time = Some(ts);
            let tc_full_name = tc.tc_full_name.clone();
            self.store.write_sidecar(&run).await.ok();
            (tc_full_name, run.counts())
        };

        self.state
            .index
            .upsert_test_case(index::NewTestCase {
                run_id: run_id.to_string(),
                tc_full_name,
                tc_id: tc_id.to_string(),
                status: status.as_str().to_string(),
                start_time: ts,
                end_time: Some(ts),
                now: now_ms(),
            })
            .await?;

        self.state.ui_broadcast.publish(&UiEvent::TestCaseFinished {
            run_id: run_id.to_string(),
            tc_id: tc_id.to_string(),
            status: status.as_str(),
            counts: counts,
        });
        Ok(())
    }

    async fn handle_run_finished(&mut self, run_id: &str, status: RunStatus, ts: i64) -> Result<(), IngestError> {
        self.finish_run(run_id, status, ts, None).await
    }

    /// Aborts the session's run (watchdog timeout or liveness failure,
    /// §4.5 "Abort semantics"). Idempotent: a run already terminal is a
    /// no-op.
    pub async fn abort(&mut self, reason: &str) {
        let Some(run_id) = self.run_id.clone() else { return };
        let now = now_ms();
        if let Err(e) = self.finish_run(&run_id, RunStatus::Aborted, now, Some(reason.to_string())).await {
            warn!(run_id, error = %e, "failed to abort run");
        }
    }

    /// On clean channel close while the run is still running: abort if any
    /// case is still running, otherwise promote to finished (§4.5 "On
    /// clean channel close").
    pub async fn on_clean_close(&mut self) {
        let Some(run_id) = self.run_id.clone() else { return };
        let Ok(run_lock) = self.active_run(&run_id).await else { return };
        let has_running = run_lock.read().await.test_cases.values().any(|tc| !tc.is_terminal());
        if has_running {
            self.abort("Connection closed").await;
        } else {
            let now = now_ms();
            if let Err(e) = self.finish_run(&run_id, RunStatus::Finished, now, None).await {
                warn!(run_id, error = %e, "failed to promote run to finished on clean close");
            }
        }
    }

    async fn finish_run(
        &mut self,
        run_id: &str,
        status: RunStatus,
        ts: i64,
        abort_reason: Option<String>,
    ) -> Result<(), IngestError> {
        let run_lock = self.active_run(run_id).await?;

        let aborted_case_ids = {
            let mut run = run_lock.write().await;
            if run.status != RunStatus::Running {
                return Ok(());
            }
            let aborted = run.abort_running_cases(ts);
            run.status = status;
            run.end_time = Some(ts);
            run.abort_reason = abort_reason.clone();
            aborted
        };

        for tc_id in &aborted_case_ids {
            let counts = run_lock.read().await.counts();
            self.state.ui_broadcast.publish(&UiEvent::TestCaseFinished {
                run_id: run_id.to_string(),
                tc_id: tc_id.clone(),
                status: Status::Aborted.as_str(),
                counts: counts,
            });
            self.state
                .index
                .upsert_test_case(index::NewTestCase {
                    run_id: run_id.to_string(),
                    tc_full_name: run_lock
                        .read()
                        .await
                        .test_case_by_id(tc_id)
                        .map(|tc| tc.tc_full_name.clone())
                        .unwrap_or_default(),
                    tc_id: tc_id.clone(),
                    status: Status::Aborted.as_str().to_string(),
                    start_time: ts,
                    end_time: Some(ts),
                    now: now_ms(),
                })
                .await?;
        }

        {
            let run = run_lock.read().await;
            let offsets = self.store.merge_to_archive(&run).await?;
            drop(run);
            let mut run = run_lock.write().await;
            for (tc_id, offset, log_count, stack_count) in offsets {
                if let Some(tc) = run.test_case_by_id_mut(&tc_id) {
                    tc.log_offset = Some(offset);
                    tc.log_count = Some(log_count);
                    tc.stack_count = Some(stack_count);
                }
            }
            self.store.write_sidecar(&run).await.ok();
        }

        self.state
            .index
            .update_run_status(run_id.to_string(), status.as_str(), Some(ts), abort_reason)
            .await?;

        self.state.ui_broadcast.publish(&UiEvent::RunFinished {
            run_id: run_id.to_string(),
            status: status.as_str(),
        });

        self.state.runs.remove(run_id).await;
        Ok(())
    }
}

async fn uniquify_run_name(
    index: &Index,
    group_hash: Option<&str>,
    base_name: String,
) -> Result<String, IngestError> {
    let existing = index
        .run_names_with_prefix(group_hash.map(str::to_string), base_name.clone())
        .await?;
    if !existing.iter().any(|n| n == &base_name) {
        return Ok(base_name);
    }
    let mut suffix = 1;
    loop {
        let candidate = format!("{base_name} {suffix}");
        if !existing.iter().any(|n| n == &candidate) {
            return Ok(candidate);
        }
        suffix += 1;
    }
}
