// src/core/state/mod.rs

//! The in-memory run-state store (§4.2): `run_id → Run`, each Run owning
//! its test cases by full name and by opaque id, its string table, and its
//! live subscriber queues.
//!
//! Contract: only the owning ingest session mutates a `Run` or its test
//! cases. Everything else — query surface, viewer connect, broadcasters —
//! takes a read lock for the duration of a snapshot and never holds one
//! across an await point that depends on ingest making progress.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use rmpv::Value;
use tokio::sync::{mpsc, RwLock};

use crate::core::group::NormalizedGroup;
use crate::core::metrics;
use crate::core::protocol::{MetaValue, MetricSample, RunStatus, Status, StringTable};
use crate::core::pubsub::UiBroadcast;

/// One test case's execution within a run (§3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TestCase {
    pub tc_full_name: String,
    pub tc_id: String,
    pub status: Status,
    pub start_time: i64,
    pub end_time: Option<i64>,
    /// Byte offset, record count, and stack-record count in the merged
    /// archive; populated only after the owning run finishes (§4.3).
    pub log_offset: Option<u64>,
    pub log_count: Option<u64>,
    pub stack_count: Option<u64>,
    /// Live subscriber queues (§4.6), each tagged with an id so a departing
    /// viewer can remove exactly its own queue. Never serialized into the
    /// sidecar — subscribers are ephemeral, owned by their viewer connection.
    #[serde(skip)]
    pub subscribers: Vec<(u64, mpsc::UnboundedSender<Value>)>,
    #[serde(skip)]
    next_subscriber_id: u64,
}

impl TestCase {
    pub fn new(tc_full_name: String, tc_id: String, status: Status, start_time: i64) -> Self {
        Self {
            tc_full_name,
            tc_id,
            status,
            start_time,
            end_time: None,
            log_offset: None,
            log_count: None,
            stack_count: None,
            subscribers: Vec::new(),
            next_subscriber_id: 0,
        }
    }

    /// Registers a new subscriber queue, returning its id (for later
    /// removal) and the receiving half (§4.6).
    pub fn subscribe(&mut self) -> (u64, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.push((id, tx));
        (id, rx)
    }

    /// Removes a subscriber by id on viewer disconnect (§4.6 "on exit").
    pub fn unsubscribe(&mut self, id: u64) {
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Publishes one entry to every current subscriber, dropping any whose
    /// send fails. Ingest never blocks on a slow or dead viewer (§4.6, §5).
    pub fn publish(&mut self, item: &Value) {
        self.subscribers.retain(|(_, tx)| tx.send(item.clone()).is_ok());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A single execution batch (§3). Owns its test cases; mutated only by its
/// ingest session (§4.2, §5 "session as actor").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Run {
    pub run_id: String,
    pub run_name: String,
    pub status: RunStatus,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub retention_days: Option<u32>,
    pub local_run: bool,
    pub dut: Option<String>,
    pub user_metadata: Vec<(String, MetaValue)>,
    pub group: Option<NormalizedGroup>,
    pub group_hash: Option<String>,
    pub abort_reason: Option<String>,
    pub deletes_at: Option<i64>,
    /// `tc_full_name → TestCase`; iteration order is merge order (§4.3).
    pub test_cases: IndexMap<String, TestCase>,
    /// `tc_id → tc_full_name`, kept in lockstep with `test_cases` (§3
    /// invariant 2). Indirection instead of a second owning map, since a
    /// `TestCase` has exactly one owner.
    pub test_cases_by_id: HashMap<String, String>,
    pub string_table: StringTable,
    /// Latest out-of-band resource sample (§B). In-memory only, never
    /// written to the sidecar, the disk log store, or the relational
    /// index, and never broadcast to UI viewers.
    #[serde(skip)]
    pub latest_metric_sample: Option<MetricSample>,
}

impl Run {
    pub fn new(run_id: String, run_name: String, start_time: i64) -> Self {
        Self {
            run_id,
            run_name,
            status: RunStatus::Running,
            start_time,
            end_time: None,
            retention_days: None,
            local_run: false,
            dut: None,
            user_metadata: Vec::new(),
            group: None,
            group_hash: None,
            abort_reason: None,
            deletes_at: None,
            test_cases: IndexMap::new(),
            test_cases_by_id: HashMap::new(),
            string_table: StringTable::new(),
            latest_metric_sample: None,
        }
    }

    pub fn insert_test_case(&mut self, tc: TestCase) {
        self.test_cases_by_id
            .insert(tc.tc_id.clone(), tc.tc_full_name.clone());
        self.test_cases.insert(tc.tc_full_name.clone(), tc);
    }

    pub fn test_case_by_id(&self, tc_id: &str) -> Option<&TestCase> {
        let name = self.test_cases_by_id.get(tc_id)?;
        self.test_cases.get(name)
    }

    pub fn test_case_by_id_mut(&mut self, tc_id: &str) -> Option<&mut TestCase> {
        let name = self.test_cases_by_id.get(tc_id)?.clone();
        self.test_cases.get_mut(&name)
    }

    pub fn counts(&self) -> crate::core::protocol::outbound::StatusCounts {
        let mut counts = crate::core::protocol::outbound::StatusCounts::default();
        for tc in self.test_cases.values() {
            match tc.status {
                Status::Passed => counts.passed += 1,
                Status::Failed | Status::Error => counts.failed += 1,
                Status::Skipped => counts.skipped += 1,
                Status::Aborted => counts.aborted += 1,
                Status::Running => {}
            }
        }
        counts
    }

    /// Transitions every still-running case to `aborted`, returning the
    /// `tc_id`s that changed so the caller can emit per-case broadcasts
    /// (§4.5 "run_finished", "Abort semantics").
    pub fn abort_running_cases(&mut self, ts: i64) -> Vec<String> {
        let mut changed = Vec::new();
        for tc in self.test_cases.values_mut() {
            if !tc.is_terminal() {
                tc.status = Status::Aborted;
                tc.end_time = Some(ts);
                changed.push(tc.tc_id.clone());
            }
        }
        changed
    }
}

/// Server-wide active-run registry plus the collaborators every ingest
/// session and query needs a handle to.
pub struct RunRegistry {
    runs: RwLock<HashMap<String, Arc<RwLock<Run>>>>,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn contains(&self, run_id: &str) -> bool {
        self.runs.read().await.contains_key(run_id)
    }

    pub async fn insert(&self, run: Run) -> Arc<RwLock<Run>> {
        let handle = Arc::new(RwLock::new(run));
        let run_id = handle.read().await.run_id.clone();
        self.runs.write().await.insert(run_id, handle.clone());
        metrics::ACTIVE_RUNS.set(self.runs.read().await.len() as i64);
        handle
    }

    pub async fn get(&self, run_id: &str) -> Option<Arc<RwLock<Run>>> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// Removes a run once its session has observed it become terminal
    /// (§4.2 "a Run leaves this store exactly once").
    pub async fn remove(&self, run_id: &str) -> Option<Arc<RwLock<Run>>> {
        let removed = self.runs.write().await.remove(run_id);
        metrics::ACTIVE_RUNS.set(self.runs.read().await.len() as i64);
        removed
    }

    pub async fn active_run_ids(&self) -> Vec<String> {
        self.runs.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

/// Shared server state handed to every connection and background task.
pub struct ServerState {
    pub config: crate::config::Config,
    pub runs: RunRegistry,
    pub ui_broadcast: UiBroadcast,
    pub index: crate::core::index::Index,
    /// Lets the log level be changed without a restart. Not yet wired to an
    /// admin command; held here so that surface can be added later without
    /// threading a new parameter through every call site.
    pub log_reload_handle: Arc<tracing_subscriber::reload::Handle<tracing_subscriber::EnvFilter, tracing_subscriber::Registry>>,
}

impl ServerState {
    pub fn new(
        config: crate::config::Config,
        index: crate::core::index::Index,
        log_reload_handle: Arc<tracing_subscriber::reload::Handle<tracing_subscriber::EnvFilter, tracing_subscriber::Registry>>,
    ) -> Self {
        Self {
            config,
            runs: RunRegistry::new(),
            ui_broadcast: UiBroadcast::new(),
            index,
            log_reload_handle,
        }
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
