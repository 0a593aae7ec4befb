// src/core/protocol/compact.rs

//! Compact (wire/on-disk) representations and their canonical counterparts.
//!
//! The compact form uses integer enumerations for message type, status,
//! direction and phase, int64-millisecond timestamps, and lets
//! component/channel be either a bare interned id or a first-occurrence
//! `[id, string]` pair. The canonical form uses full names, ISO-8601 `Z`
//! timestamps, and lower-case strings.

use crate::core::errors::IngestError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Wire message type tag (`t` field of a frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    RunStarted,
    RunStartedResponse,
    TestCaseStarted,
    LogBatch,
    Exception,
    TestCaseFinished,
    RunFinished,
    Batch,
    Heartbeat,
    StringTableFrame,
    Metrics,
}

impl MsgType {
    pub fn from_code(code: i64) -> Result<Self, IngestError> {
        Ok(match code {
            1 => MsgType::RunStarted,
            2 => MsgType::RunStartedResponse,
            3 => MsgType::TestCaseStarted,
            4 => MsgType::LogBatch,
            5 => MsgType::Exception,
            6 => MsgType::TestCaseFinished,
            7 => MsgType::RunFinished,
            8 => MsgType::Batch,
            9 => MsgType::Heartbeat,
            10 => MsgType::StringTableFrame,
            11 => MsgType::Metrics,
            other => return Err(IngestError::MalformedFrame(format!("unknown message type {other}"))),
        })
    }

    pub fn code(self) -> i64 {
        match self {
            MsgType::RunStarted => 1,
            MsgType::RunStartedResponse => 2,
            MsgType::TestCaseStarted => 3,
            MsgType::LogBatch => 4,
            MsgType::Exception => 5,
            MsgType::TestCaseFinished => 6,
            MsgType::RunFinished => 7,
            MsgType::Batch => 8,
            MsgType::Heartbeat => 9,
            MsgType::StringTableFrame => 10,
            MsgType::Metrics => 11,
        }
    }
}

/// Test-case / run terminal and transient status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Passed,
    Failed,
    Skipped,
    Aborted,
    Error,
}

impl Status {
    pub fn from_code(code: i64) -> Result<Self, IngestError> {
        Ok(match code {
            0 => Status::Running,
            1 => Status::Passed,
            2 => Status::Failed,
            3 => Status::Skipped,
            4 => Status::Aborted,
            5 => Status::Error,
            other => return Err(IngestError::InvalidStatus(format!("unknown status code {other}"))),
        })
    }

    pub fn code(self) -> i64 {
        match self {
            Status::Running => 0,
            Status::Passed => 1,
            Status::Failed => 2,
            Status::Skipped => 3,
            Status::Aborted => 4,
            Status::Error => 5,
        }
    }

    pub fn from_str_loose(s: &str) -> Result<Self, IngestError> {
        Ok(match s {
            "running" => Status::Running,
            "passed" => Status::Passed,
            "failed" => Status::Failed,
            "skipped" => Status::Skipped,
            "aborted" => Status::Aborted,
            "error" => Status::Error,
            other => return Err(IngestError::InvalidStatus(other.to_string())),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Aborted => "aborted",
            Status::Error => "error",
        }
    }

    /// Terminal statuses a test case can end in (§3, §4.5).
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Running)
    }
}

/// Run-level terminal status (§3 invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// Direction of a log entry (`d` field: 1=tx, 2=rx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    pub fn from_code(code: i64) -> Result<Self, IngestError> {
        match code {
            1 => Ok(Direction::Tx),
            2 => Ok(Direction::Rx),
            other => Err(IngestError::MalformedFrame(format!("unknown direction code {other}"))),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Direction::Tx => 1,
            Direction::Rx => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Tx => "tx",
            Direction::Rx => "rx",
        }
    }
}

/// Phase annotation of a log entry (`p` field: 1=teardown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Teardown,
}

impl Phase {
    pub fn from_code(code: i64) -> Result<Self, IngestError> {
        match code {
            1 => Ok(Phase::Teardown),
            other => Err(IngestError::MalformedFrame(format!("unknown phase code {other}"))),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Phase::Teardown => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Teardown => "teardown",
        }
    }
}

/// A component/channel reference: either a bare interned id, or a
/// first-occurrence `[id, string]` pair that also defines the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternedRef {
    Id(u32),
    Define(u32, String),
}

/// Canonical, fully-resolved log entry (internal representation, used by
/// the live-log replay path and by read-back from the merged archive).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalLogEntry {
    /// ISO-8601 UTC timestamp ending in `Z`.
    pub timestamp: String,
    pub message: String,
    pub component: Option<String>,
    pub channel: Option<String>,
    pub dir: Option<Direction>,
    pub phase: Option<Phase>,
}

/// Canonical exception/stack-trace entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalException {
    pub timestamp: String,
    pub message: String,
    pub exception_type: String,
    pub stack_trace: Vec<String>,
    pub is_error: bool,
}

pub fn ms_to_iso8601(ms: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(|| Utc::now());
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
