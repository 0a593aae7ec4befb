// src/core/storage/mod.rs

//! The disk log store (§4.3): per-run directory, per-case append-only log
//! and stack files while the run is live, sidecar metadata, and the
//! merged archive produced at `run_finished`.

use std::path::{Path, PathBuf};

use rmpv::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::core::errors::IngestError;
use crate::core::metrics;
use crate::core::protocol::codec::{decode_records, encode_record};
use crate::core::state::Run;

const SIDECAR_FILE: &str = "sidecar.json";
const CASES_DIR: &str = "cases";
const ARCHIVE_FILE: &str = "logs.bin";
const LOG_SUFFIX: &str = "_log.bin";
const STACK_SUFFIX: &str = "_stack.bin";

#[derive(Clone)]
pub struct DiskLogStore {
    data_dir: PathBuf,
}

impl DiskLogStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.data_dir.join(run_id)
    }

    fn cases_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(CASES_DIR)
    }

    fn log_path(&self, run_id: &str, tc_id: &str) -> PathBuf {
        self.cases_dir(run_id).join(format!("{tc_id}{LOG_SUFFIX}"))
    }

    fn stack_path(&self, run_id: &str, tc_id: &str) -> PathBuf {
        self.cases_dir(run_id).join(format!("{tc_id}{STACK_SUFFIX}"))
    }

    fn sidecar_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(SIDECAR_FILE)
    }

    fn archive_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(ARCHIVE_FILE)
    }

    /// Creates the run directory and its `cases/` subdirectory (§4.5 `run_started`).
    pub async fn create_run_dir(&self, run_id: &str) -> Result<(), IngestError> {
        fs::create_dir_all(self.cases_dir(run_id)).await?;
        Ok(())
    }

    /// Touches an empty per-case log file so later appends have somewhere
    /// to go (§4.5 `test_case_started`).
    pub async fn touch_case_files(&self, run_id: &str, tc_id: &str) -> Result<(), IngestError> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(run_id, tc_id))
            .await?;
        Ok(())
    }

    /// Writes (overwrites) the sidecar metadata file with the run's current
    /// canonical state (§4.3, §4.5 "rewrite sidecar").
    pub async fn write_sidecar(&self, run: &Run) -> Result<(), IngestError> {
        let json = serde_json::to_vec_pretty(run)?;
        let path = self.sidecar_path(&run.run_id);
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn read_sidecar(&self, run_id: &str) -> Result<Run, IngestError> {
        let bytes = fs::read(self.sidecar_path(run_id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn sidecar_exists(&self, run_id: &str) -> bool {
        fs::metadata(self.sidecar_path(run_id)).await.is_ok()
    }

    pub async fn run_dir_exists(&self, run_id: &str) -> bool {
        fs::metadata(self.run_dir(run_id)).await.is_ok()
    }

    /// Appends one compact-form record to a case's log file. Failures are
    /// logged and swallowed (§4.3 "failure semantics", §7): the index
    /// update for the same event is still attempted by the caller.
    pub async fn append_log_entry(&self, run_id: &str, tc_id: &str, entry: &Value) {
        if let Err(e) = self.append(self.log_path(run_id, tc_id), entry).await {
            metrics::DISK_APPEND_ERRORS_TOTAL.inc();
            warn!(run_id, tc_id, error = %e, "failed to append log entry");
        }
    }

    pub async fn append_stack_entry(&self, run_id: &str, tc_id: &str, entry: &Value) {
        if let Err(e) = self.append(self.stack_path(run_id, tc_id), entry).await {
            metrics::DISK_APPEND_ERRORS_TOTAL.inc();
            warn!(run_id, tc_id, error = %e, "failed to append stack entry");
        }
    }

    async fn append(&self, path: PathBuf, entry: &Value) -> Result<(), IngestError> {
        let record = encode_record(entry)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&record).await?;
        Ok(())
    }

    /// Reads every record currently in a case's log/stack files, in file
    /// order. Used for "reload the stack list from disk so it remains
    /// authoritative" (§4.5 `exception`) and for viewer replay (§4.6).
    pub async fn read_case_log(&self, run_id: &str, tc_id: &str) -> Result<Vec<Value>, IngestError> {
        read_records_if_exists(&self.log_path(run_id, tc_id)).await
    }

    pub async fn read_case_stack(&self, run_id: &str, tc_id: &str) -> Result<Vec<Value>, IngestError> {
        read_records_if_exists(&self.stack_path(run_id, tc_id)).await
    }

    /// Merges every test case's log and stack records, in `test_cases`
    /// iteration order, into the single archive file, returning
    /// `(tc_id, offset, log_count, stack_count)` per case (§4.3, §4.5
    /// `run_finished`). Removes the per-case files afterward, preserving
    /// any attachment subdirectories.
    pub async fn merge_to_archive(
        &self,
        run: &Run,
    ) -> Result<Vec<(String, u64, u64, u64)>, IngestError> {
        let archive_path = self.archive_path(&run.run_id);
        let mut archive = fs::File::create(&archive_path).await?;
        let mut offsets = Vec::with_capacity(run.test_cases.len());
        let mut cursor: u64 = 0;

        for tc in run.test_cases.values() {
            let log_records = self.read_case_log(&run.run_id, &tc.tc_id).await?;
            let stack_records = self.read_case_stack(&run.run_id, &tc.tc_id).await?;
            let offset = cursor;

            for record in log_records.iter().chain(stack_records.iter()) {
                let bytes = encode_record(record)?;
                cursor += bytes.len() as u64;
                archive.write_all(&bytes).await?;
            }

            offsets.push((
                tc.tc_id.clone(),
                offset,
                log_records.len() as u64,
                stack_records.len() as u64,
            ));
        }
        archive.flush().await?;

        self.remove_case_files(&run.run_id).await?;
        Ok(offsets)
    }

    /// Removes `cases/*_log.bin` / `*_stack.bin`, leaving any other entry
    /// (attachment subdirectories) untouched (§4.3 "contract").
    async fn remove_case_files(&self, run_id: &str) -> Result<(), IngestError> {
        let dir = self.cases_dir(run_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(LOG_SUFFIX) || name.ends_with(STACK_SUFFIX) {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    /// Reads exactly `log_count + stack_count` records for a finished case,
    /// starting at `offset` in the merged archive (§4.3 "contract", §8
    /// round-trip law 5).
    pub async fn read_archive_slice(
        &self,
        run_id: &str,
        offset: u64,
        log_count: u64,
        stack_count: u64,
    ) -> Result<(Vec<Value>, Vec<Value>), IngestError> {
        let mut file = fs::File::open(self.archive_path(run_id)).await?;
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let total = (log_count + stack_count) as usize;
        let mut records = Vec::with_capacity(total);
        let mut len_buf = [0u8; 4];
        for _ in 0..total {
            file.read_exact(&mut len_buf).await?;
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            file.read_exact(&mut payload).await?;
            let mut framed = Vec::with_capacity(4 + len);
            framed.extend_from_slice(&len_buf);
            framed.extend_from_slice(&payload);
            let mut decoded = decode_records(&framed)?;
            records.append(&mut decoded);
        }

        let logs = records.drain(..log_count as usize).collect();
        let stacks = records;
        Ok((logs, stacks))
    }

    /// Deletes an entire run directory (retention sweep, §5 "Retention").
    pub async fn delete_run_dir(&self, run_id: &str) -> Result<(), IngestError> {
        let dir = self.run_dir(run_id);
        if fs::metadata(&dir).await.is_ok() {
            fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }
}

async fn read_records_if_exists(path: &Path) -> Result<Vec<Value>, IngestError> {
    match fs::read(path).await {
        Ok(bytes) => decode_records(&bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::compact::Status;
    use crate::core::state::TestCase;

    fn entry(ts: i64, m: &str) -> Value {
        Value::Map(vec![
            (Value::from("ts"), Value::from(ts)),
            (Value::from("m"), Value::from(m)),
        ])
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskLogStore::new(dir.path());
        store.create_run_dir("run-1").await.unwrap();
        store.append_log_entry("run-1", "tc-1", &entry(1, "a")).await;
        store.append_log_entry("run-1", "tc-1", &entry(2, "b")).await;

        let records = store.read_case_log("run-1", "tc-1").await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn merge_removes_case_files_and_preserves_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskLogStore::new(dir.path());
        store.create_run_dir("run-1").await.unwrap();
        store.append_log_entry("run-1", "tc-1", &entry(1, "a")).await;
        store
            .append_stack_entry(
                "run-1",
                "tc-1",
                &crate::core::protocol::encode_exception_record(1, "boom", "RuntimeError", &[], true),
            )
            .await;

        let attach_dir = store.cases_dir("run-1").join("attachments");
        fs::create_dir_all(&attach_dir).await.unwrap();
        fs::write(attach_dir.join("x.bin"), b"data").await.unwrap();

        let mut run = Run::new("run-1".into(), "Run 1".into(), 0);
        run.insert_test_case(TestCase::new("T1".into(), "tc-1".into(), Status::Passed, 0));

        let offsets = store.merge_to_archive(&run).await.unwrap();
        assert_eq!(offsets, vec![("tc-1".to_string(), 0, 1, 1)]);

        assert!(!store.log_path("run-1", "tc-1").exists());
        assert!(!store.stack_path("run-1", "tc-1").exists());
        assert!(attach_dir.join("x.bin").exists());
    }

    /// §8 round-trip law 2: sidecar write then reopen yields an equal
    /// `Run` value, including test-case offsets recorded after merge.
    #[tokio::test]
    async fn sidecar_round_trips_including_post_merge_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskLogStore::new(dir.path());
        store.create_run_dir("run-1").await.unwrap();
        store.append_log_entry("run-1", "tc-1", &entry(1, "a")).await;

        let mut run = Run::new("run-1".into(), "Run 1".into(), 0);
        run.retention_days = Some(3);
        run.insert_test_case(TestCase::new("T1".into(), "tc-1".into(), Status::Passed, 0));
        let offsets = store.merge_to_archive(&run).await.unwrap();
        for (tc_id, offset, log_count, stack_count) in offsets {
            let tc = run.test_case_by_id_mut(&tc_id).unwrap();
            tc.log_offset = Some(offset);
            tc.log_count = Some(log_count);
            tc.stack_count = Some(stack_count);
        }
        store.write_sidecar(&run).await.unwrap();

        let reloaded = store.read_sidecar("run-1").await.unwrap();
        assert_eq!(
            serde_json::to_value(&run).unwrap(),
            serde_json::to_value(&reloaded).unwrap()
        );
    }

    #[tokio::test]
    async fn archive_slice_reads_exactly_log_plus_stack_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskLogStore::new(dir.path());
        store.create_run_dir("run-1").await.unwrap();
        store.append_log_entry("run-1", "tc-1", &entry(1, "a")).await;
        store.append_log_entry("run-1", "tc-1", &entry(2, "b")).await;

        let mut run = Run::new("run-1".into(), "Run 1".into(), 0);
        run.insert_test_case(TestCase::new("T1".into(), "tc-1".into(), Status::Passed, 0));
        let offsets = store.merge_to_archive(&run).await.unwrap();
        let (_, offset, log_count, stack_count) = offsets[0].clone();

        let (logs, stacks) = store
            .read_archive_slice("run-1", offset, log_count, stack_count)
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(stacks.len(), 0);
    }
}
