// tests/scenarios.rs

//! End-to-end scenarios exercising `IngestSession` against a real disk
//! store and a real (file-backed) index, without any wire decoding.

use std::sync::Arc;

use rmpv::Value;
use tempfile::TempDir;
use tracing_subscriber::{filter::EnvFilter, reload, Registry};

use runtrace::config::Config;
use runtrace::core::index::Index;
use runtrace::core::ingest::IngestSession;
use runtrace::core::protocol::{
    decode_log_entry, BatchEvent, Direction, Frame, GroupPayload, MetaValue, RunStatus,
    StringTable,
};
use runtrace::core::protocol::compact::Status;
use runtrace::core::state::ServerState;
use runtrace::core::storage::DiskLogStore;

fn test_state(dir: &TempDir) -> (Arc<ServerState>, Arc<DiskLogStore>) {
    let data_dir = dir.path().join("data");
    let index_path = dir.path().join("index.sqlite3");

    let mut config = Config::default();
    config.data_dir = data_dir.to_string_lossy().to_string();
    config.index_path = index_path.to_string_lossy().to_string();

    let index = Index::open(&index_path).expect("open index");
    let (_filter, reload_handle) = reload::Layer::new(EnvFilter::new("off"));
    let reload_handle: Arc<reload::Handle<EnvFilter, Registry>> = Arc::new(reload_handle);

    let state = Arc::new(ServerState::new(config, index, reload_handle));
    let store = Arc::new(DiskLogStore::new(data_dir));
    (state, store)
}

fn log_entry(ts: i64, m: &str) -> Value {
    Value::Map(vec![(Value::from("ts"), Value::from(ts)), (Value::from("m"), Value::from(m))])
}

fn map_str(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .and_then(|(_, v)| v.as_str().map(str::to_string)),
        _ => None,
    }
}

/// Scenario A: minimal happy path (§8).
#[tokio::test]
async fn minimal_happy_path() {
    let dir = TempDir::new().unwrap();
    let (state, store) = test_state(&dir);
    let mut session = IngestSession::new(state.clone(), store.clone());

    let reply = session
        .apply(Frame::RunStarted {
            run_id: None,
            run_name: None,
            group: None,
            retention_days: Some(1),
            local_run: false,
            user_metadata: Vec::new(),
        })
        .await
        .expect("run_started produces a reply");

    let run_id = map_str(&reply, "run_id").expect("run_id present");
    assert!(map_str(&reply, "err").is_none(), "no error on a fresh run_id");
    assert_eq!(run_id.len(), 12, "generated run_id is 12 hex chars");
    assert!(run_id.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(map_str(&reply, "run_url").unwrap().contains(&run_id));

    session
        .apply(Frame::TestCaseStarted {
            run_id: run_id.clone(),
            tc_full_name: "Ns.T1".into(),
            tc_id: "0-1".into(),
            status: Status::Running,
            ts: 1,
        })
        .await;

    session
        .apply(Frame::LogBatch {
            run_id: run_id.clone(),
            tc_id: "0-1".into(),
            entries: vec![log_entry(1_737_820_282_736, "hello")],
        })
        .await;

    session
        .apply(Frame::TestCaseFinished {
            run_id: run_id.clone(),
            tc_id: "0-1".into(),
            status: Status::Passed,
            ts: 2,
        })
        .await;

    session
        .apply(Frame::RunFinished { run_id: run_id.clone(), status: RunStatus::Finished, ts: 3 })
        .await;

    let rows = state.index.list_runs(Default::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.run_id, run_id);
    assert_eq!(row.counts.passed, 1);
    assert_eq!(row.counts.failed, 0);

    let run = store.read_sidecar(&run_id).await.unwrap();
    let tc = run.test_case_by_id("0-1").unwrap();
    let (offset, log_count, stack_count) =
        (tc.log_offset.unwrap(), tc.log_count.unwrap(), tc.stack_count.unwrap());
    assert_eq!(log_count, 1);
    assert_eq!(stack_count, 0);

    let (logs, stacks) = store.read_archive_slice(&run_id, offset, log_count, stack_count).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(stacks.len(), 0);

    assert!(!state.runs.contains(&run_id).await, "finished run leaves the active registry");
}

/// Scenario B: direction & interning (§8).
#[tokio::test]
async fn direction_and_interning() {
    let dir = TempDir::new().unwrap();
    let (state, store) = test_state(&dir);
    let mut session = IngestSession::new(state.clone(), store.clone());

    let reply = session
        .apply(Frame::RunStarted {
            run_id: None,
            run_name: None,
            group: None,
            retention_days: None,
            local_run: true,
            user_metadata: Vec::new(),
        })
        .await
        .unwrap();
    let run_id = map_str(&reply, "run_id").unwrap();

    session
        .apply(Frame::TestCaseStarted {
            run_id: run_id.clone(),
            tc_full_name: "Ns.T2".into(),
            tc_id: "0-2".into(),
            status: Status::Running,
            ts: 1,
        })
        .await;

    let first = Value::Map(vec![
        (Value::from("ts"), Value::from(10)),
        (Value::from("m"), Value::from("AT")),
        (Value::from("c"), Value::Array(vec![Value::from(1u32), Value::from("Dev")])),
        (Value::from("ch"), Value::Array(vec![Value::from(2u32), Value::from("COM")])),
        (Value::from("d"), Value::from(Direction::Tx.code())),
    ]);
    let second = Value::Map(vec![
        (Value::from("ts"), Value::from(20)),
        (Value::from("m"), Value::from("OK")),
        (Value::from("c"), Value::from(1u32)),
        (Value::from("ch"), Value::from(2u32)),
        (Value::from("d"), Value::from(Direction::Rx.code())),
    ]);

    session
        .apply(Frame::LogBatch { run_id: run_id.clone(), tc_id: "0-2".into(), entries: vec![first, second] })
        .await;

    // A viewer connecting after both entries persisted replays the raw
    // compact records and resolves them against its own string table,
    // exactly as it would after receiving the string_table snapshot frame.
    let records = store.read_case_log(&run_id, "0-2").await.unwrap();
    assert_eq!(records.len(), 2);

    let mut table = StringTable::new();
    let decoded_first = decode_log_entry(&records[0], &mut table).unwrap().unwrap();
    assert_eq!(decoded_first.component.as_deref(), Some("Dev"));
    assert_eq!(decoded_first.channel.as_deref(), Some("COM"));
    assert_eq!(decoded_first.dir, Some(Direction::Tx));

    let decoded_second = decode_log_entry(&records[1], &mut table).unwrap().unwrap();
    assert_eq!(decoded_second.component.as_deref(), Some("Dev"));
    assert_eq!(decoded_second.channel.as_deref(), Some("COM"));
    assert_eq!(decoded_second.dir, Some(Direction::Rx));
}

/// Scenario C: abort on idle (§8). The real 35s watchdog wait lives in the
/// connection handler's select loop; this exercises the effect it triggers.
#[tokio::test]
async fn abort_on_idle() {
    let dir = TempDir::new().unwrap();
    let (state, store) = test_state(&dir);
    let mut session = IngestSession::new(state.clone(), store.clone());

    let reply = session
        .apply(Frame::RunStarted {
            run_id: None,
            run_name: None,
            group: None,
            retention_days: None,
            local_run: false,
            user_metadata: Vec::new(),
        })
        .await
        .unwrap();
    let run_id = map_str(&reply, "run_id").unwrap();

    session
        .apply(Frame::TestCaseStarted {
            run_id: run_id.clone(),
            tc_full_name: "Ns.T3".into(),
            tc_id: "0-3".into(),
            status: Status::Running,
            ts: 1,
        })
        .await;

    session.abort("Connection timeout").await;

    let row = state.index.run_by_id(run_id.clone()).await.unwrap().expect("run indexed");
    assert_eq!(row.status, "aborted");
    assert_eq!(row.abort_reason.as_deref(), Some("Connection timeout"));

    let cases = state.index.test_cases_for_run(run_id.clone()).await.unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].status, "aborted");

    assert!(!state.runs.contains(&run_id).await);

    // Aborting an already-terminal run is a no-op (idempotent).
    session.abort("Connection timeout").await;
    let row_again = state.index.run_by_id(run_id).await.unwrap().unwrap();
    assert_eq!(row_again.status, "aborted");
}

/// Scenario D: duplicate run_id (§8).
#[tokio::test]
async fn duplicate_run_id_rejected() {
    let dir = TempDir::new().unwrap();
    let (state, store) = test_state(&dir);

    // First session claims "run-a" and finishes cleanly.
    let mut first = IngestSession::new(state.clone(), store.clone());
    first
        .apply(Frame::RunStarted {
            run_id: Some("run-a".into()),
            run_name: Some("Run A".into()),
            group: None,
            retention_days: None,
            local_run: false,
            user_metadata: Vec::new(),
        })
        .await
        .unwrap();
    first.apply(Frame::RunFinished { run_id: "run-a".into(), status: RunStatus::Finished, ts: 1 }).await;

    // A second session reusing the same run_id gets an error reply and the
    // session itself stays usable for a retry.
    let mut second = IngestSession::new(state.clone(), store.clone());
    let reply = second
        .apply(Frame::RunStarted {
            run_id: Some("run-a".into()),
            run_name: Some("Run A again".into()),
            group: None,
            retention_days: None,
            local_run: false,
            user_metadata: Vec::new(),
        })
        .await
        .unwrap();

    assert!(map_str(&reply, "err").is_some(), "duplicate run_id yields an error reply");
    assert!(second.run_id().is_none(), "the rejected attempt never claims a run");

    let rows = state.index.list_runs(Default::default()).await.unwrap();
    assert_eq!(rows.len(), 1, "no second row was inserted for the rejected run_id");

    // The session can still retry with a fresh id.
    let retry = second
        .apply(Frame::RunStarted {
            run_id: Some("run-b".into()),
            run_name: None,
            group: None,
            retention_days: None,
            local_run: false,
            user_metadata: Vec::new(),
        })
        .await
        .unwrap();
    assert!(map_str(&retry, "err").is_none());
    assert_eq!(second.run_id(), Some("run-b"));
}

/// Scenario F: merge-on-finish (§8).
#[tokio::test]
async fn merge_on_finish() {
    let dir = TempDir::new().unwrap();
    let (state, store) = test_state(&dir);
    let mut session = IngestSession::new(state.clone(), store.clone());

    let reply = session
        .apply(Frame::RunStarted {
            run_id: None,
            run_name: None,
            group: Some(GroupPayload { name: "nightly".into(), metadata: Vec::new() }),
            retention_days: Some(7),
            local_run: false,
            user_metadata: vec![("build".to_string(), MetaValue { value: "123".into(), url: None })],
        })
        .await
        .unwrap();
    let run_id = map_str(&reply, "run_id").unwrap();

    for (tc_id, name) in [("0-1", "Ns.A"), ("0-2", "Ns.B")] {
        session
            .apply(Frame::TestCaseStarted {
                run_id: run_id.clone(),
                tc_full_name: name.into(),
                tc_id: tc_id.into(),
                status: Status::Running,
                ts: 1,
            })
            .await;
        session
            .apply(Frame::Batch {
                run_id: run_id.clone(),
                events: vec![
                    BatchEvent::LogBatch { tc_id: tc_id.into(), entries: vec![log_entry(2, "a"), log_entry(3, "b")] },
                    BatchEvent::Exception {
                        tc_id: tc_id.into(),
                        message: "boom".into(),
                        exception_type: "RuntimeError".into(),
                        stack_trace: vec!["frame1".into()],
                        is_error: true,
                        ts: 4,
                    },
                ],
            })
            .await;
        session
            .apply(Frame::TestCaseFinished { run_id: run_id.clone(), tc_id: tc_id.into(), status: Status::Failed, ts: 5 })
            .await;
    }

    session.apply(Frame::RunFinished { run_id: run_id.clone(), status: RunStatus::Finished, ts: 6 }).await;

    assert!(!store.run_dir(&run_id).join("cases").join("0-1_log.bin").exists());
    assert!(!store.run_dir(&run_id).join("cases").join("0-2_stack.bin").exists());
    assert!(store.run_dir(&run_id).join("logs.bin").exists());

    let run = store.read_sidecar(&run_id).await.unwrap();
    let mut concatenated = Vec::new();
    for tc_id in ["0-1", "0-2"] {
        let tc = run.test_case_by_id(tc_id).unwrap();
        assert_eq!(tc.log_count, Some(2));
        assert_eq!(tc.stack_count, Some(1));
        let (logs, stacks) = store
            .read_archive_slice(&run_id, tc.log_offset.unwrap(), tc.log_count.unwrap(), tc.stack_count.unwrap())
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(stacks.len(), 1);
        concatenated.push((tc_id, logs, stacks));
    }
    assert_eq!(concatenated.len(), 2);

    let rows = state.index.list_runs(Default::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].counts.failed, 2);
}
