// src/core/protocol/inbound.rs

//! Decodes a raw wire frame (`rmpv::Value`) into a dispatch-ready `Frame`.
//!
//! `log_batch` and `exception` entries are kept in their raw compact form
//! (see §9, "two representations, one source of truth") and validated only
//! for the minimum the ingest session needs before it can act: presence of
//! a timestamp for log entries, and the fixed field set for exceptions.

use rmpv::Value;

use super::compact::{MsgType, RunStatus, Status};
use crate::core::errors::IngestError;

#[derive(Debug, Clone)]
pub struct GroupPayload {
    pub name: String,
    pub metadata: Vec<(String, MetaValue)>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MetaValue {
    pub value: String,
    pub url: Option<String>,
}

/// A single point-in-time resource sample (§B, in-memory only, never
/// persisted or broadcast to UI viewers).
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub ts: i64,
    pub cpu: Option<f64>,
    pub mem: Option<f64>,
    pub net: Option<f64>,
    pub net_interfaces: Vec<(String, f64)>,
}

#[derive(Debug, Clone)]
pub enum BatchEvent {
    TestCaseStarted {
        tc_full_name: String,
        tc_id: String,
        status: Status,
        ts: i64,
    },
    LogBatch {
        tc_id: String,
        entries: Vec<Value>,
    },
    Exception {
        tc_id: String,
        message: String,
        exception_type: String,
        stack_trace: Vec<String>,
        is_error: bool,
        ts: i64,
    },
    TestCaseFinished {
        tc_id: String,
        status: Status,
        ts: i64,
    },
}

#[derive(Debug, Clone)]
pub enum Frame {
    RunStarted {
        run_id: Option<String>,
        run_name: Option<String>,
        group: Option<GroupPayload>,
        retention_days: Option<u32>,
        local_run: bool,
        user_metadata: Vec<(String, MetaValue)>,
    },
    TestCaseStarted {
        run_id: String,
        tc_full_name: String,
        tc_id: String,
        status: Status,
        ts: i64,
    },
    LogBatch {
        run_id: String,
        tc_id: String,
        entries: Vec<Value>,
    },
    Exception {
        run_id: String,
        tc_id: String,
        message: String,
        exception_type: String,
        stack_trace: Vec<String>,
        is_error: bool,
        ts: i64,
    },
    TestCaseFinished {
        run_id: String,
        tc_id: String,
        status: Status,
        ts: i64,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        ts: i64,
    },
    Batch {
        run_id: String,
        events: Vec<BatchEvent>,
    },
    Heartbeat {
        run_id: String,
    },
    Metrics {
        run_id: String,
        sample: MetricSample,
    },
}

fn as_map(value: &Value) -> Result<&Vec<(Value, Value)>, IngestError> {
    value
        .as_map()
        .ok_or_else(|| IngestError::MalformedFrame("frame is not a map".into()))
}

fn field<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

fn req_str(map: &[(Value, Value)], key: &str) -> Result<String, IngestError> {
    field(map, key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MalformedFrame(format!("missing required field '{key}'")))
}

fn opt_str(map: &[(Value, Value)], key: &str) -> Option<String> {
    field(map, key).and_then(|v| v.as_str()).map(str::to_string)
}

fn req_int(map: &[(Value, Value)], key: &str) -> Result<i64, IngestError> {
    field(map, key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| IngestError::MalformedFrame(format!("missing required field '{key}'")))
}

fn opt_bool(map: &[(Value, Value)], key: &str) -> Option<bool> {
    field(map, key).and_then(|v| v.as_bool())
}

fn opt_u32(map: &[(Value, Value)], key: &str) -> Option<u32> {
    field(map, key).and_then(|v| v.as_u64()).map(|v| v as u32)
}

fn req_status(map: &[(Value, Value)], key: &str) -> Result<Status, IngestError> {
    match field(map, key) {
        Some(Value::Integer(i)) => Status::from_code(i.as_i64().unwrap_or(-1)),
        Some(Value::String(s)) => Status::from_str_loose(s.as_str().unwrap_or_default()),
        _ => Err(IngestError::MalformedFrame(format!(
            "missing required field '{key}'"
        ))),
    }
}

fn req_run_status(map: &[(Value, Value)], key: &str) -> Result<RunStatus, IngestError> {
    let s = match field(map, key) {
        Some(Value::String(s)) => s.as_str().unwrap_or_default().to_string(),
        Some(Value::Integer(i)) => match i.as_i64() {
            Some(0) => "running".to_string(),
            Some(1) => "finished".to_string(),
            Some(2) => "aborted".to_string(),
            _ => return Err(IngestError::InvalidStatus("unknown run status code".into())),
        },
        _ => return Err(IngestError::MalformedFrame(format!("missing required field '{key}'"))),
    };
    match s.as_str() {
        "running" => Ok(RunStatus::Running),
        "finished" => Ok(RunStatus::Finished),
        "aborted" => Ok(RunStatus::Aborted),
        other => Err(IngestError::InvalidStatus(other.to_string())),
    }
}

fn parse_metadata(value: Option<&Value>) -> Vec<(String, MetaValue)> {
    let Some(map) = value.and_then(|v| v.as_map()) else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?.to_string();
            let meta = match v {
                Value::Map(inner) => MetaValue {
                    value: field(inner, "value")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    url: field(inner, "url").and_then(|v| v.as_str()).map(str::to_string),
                },
                other => MetaValue {
                    value: other.as_str().unwrap_or_default().to_string(),
                    url: None,
                },
            };
            Some((key, meta))
        })
        .collect()
}

fn parse_net_interfaces(value: Option<&Value>) -> Vec<(String, f64)> {
    let Some(map) = value.and_then(|v| v.as_map()) else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_f64()?)))
        .collect()
}

fn parse_metric_sample(map: &[(Value, Value)]) -> Result<MetricSample, IngestError> {
    Ok(MetricSample {
        ts: req_int(map, "ts")?,
        cpu: field(map, "cpu").and_then(|v| v.as_f64()),
        mem: field(map, "mem").and_then(|v| v.as_f64()),
        net: field(map, "net").and_then(|v| v.as_f64()),
        net_interfaces: parse_net_interfaces(field(map, "net_interfaces")),
    })
}

fn parse_group(value: Option<&Value>) -> Option<GroupPayload> {
    let map = value?.as_map()?;
    let name = field(map, "name").and_then(|v| v.as_str())?.to_string();
    let metadata = parse_metadata(field(map, "metadata"));
    Some(GroupPayload { name, metadata })
}

fn parse_stack_trace(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_batch_event(value: &Value) -> Result<BatchEvent, IngestError> {
    let map = as_map(value)?;
    let event_type = req_int(map, "event_type")?;
    match MsgType::from_code(event_type)? {
        MsgType::TestCaseStarted => Ok(BatchEvent::TestCaseStarted {
            tc_full_name: req_str(map, "tc_full_name")?,
            tc_id: req_str(map, "tc_id")?,
            status: req_status(map, "status")?,
            ts: req_int(map, "ts")?,
        }),
        MsgType::LogBatch => Ok(BatchEvent::LogBatch {
            tc_id: req_str(map, "tc_id")?,
            entries: field(map, "entries")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
        }),
        MsgType::Exception => Ok(BatchEvent::Exception {
            tc_id: req_str(map, "tc_id")?,
            message: req_str(map, "message")?,
            exception_type: req_str(map, "exception_type")?,
            stack_trace: parse_stack_trace(field(map, "stack_trace")),
            is_error: opt_bool(map, "is_error").unwrap_or(false),
            ts: req_int(map, "ts")?,
        }),
        MsgType::TestCaseFinished => Ok(BatchEvent::TestCaseFinished {
            tc_id: req_str(map, "tc_id")?,
            status: req_status(map, "status")?,
            ts: req_int(map, "ts")?,
        }),
        other => Err(IngestError::MalformedFrame(format!(
            "event type {other:?} is not valid inside a batch"
        ))),
    }
}

/// Decodes a raw wire value into a dispatch-ready `Frame`.
pub fn decode_frame(value: &Value) -> Result<Frame, IngestError> {
    let map = as_map(value)?;
    let t = req_int(map, "t")?;
    match MsgType::from_code(t)? {
        MsgType::RunStarted => Ok(Frame::RunStarted {
            run_id: opt_str(map, "run_id"),
            run_name: opt_str(map, "run_name"),
            group: parse_group(field(map, "group")),
            retention_days: opt_u32(map, "retention_days"),
            local_run: opt_bool(map, "local_run").unwrap_or(false),
            user_metadata: parse_metadata(field(map, "user_metadata")),
        }),
        MsgType::TestCaseStarted => Ok(Frame::TestCaseStarted {
            run_id: req_str(map, "run_id")?,
            tc_full_name: req_str(map, "tc_full_name")?,
            tc_id: req_str(map, "tc_id")?,
            status: req_status(map, "status")?,
            ts: req_int(map, "ts")?,
        }),
        MsgType::LogBatch => Ok(Frame::LogBatch {
            run_id: req_str(map, "run_id")?,
            tc_id: req_str(map, "tc_id")?,
            entries: field(map, "entries")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
        }),
        MsgType::Exception => Ok(Frame::Exception {
            run_id: req_str(map, "run_id")?,
            tc_id: req_str(map, "tc_id")?,
            message: req_str(map, "message")?,
            exception_type: req_str(map, "exception_type")?,
            stack_trace: parse_stack_trace(field(map, "stack_trace")),
            is_error: opt_bool(map, "is_error").unwrap_or(false),
            ts: req_int(map, "ts")?,
        }),
        MsgType::TestCaseFinished => Ok(Frame::TestCaseFinished {
            run_id: req_str(map, "run_id")?,
            tc_id: req_str(map, "tc_id")?,
            status: req_status(map, "status")?,
            ts: req_int(map, "ts")?,
        }),
        MsgType::RunFinished => Ok(Frame::RunFinished {
            run_id: req_str(map, "run_id")?,
            status: req_run_status(map, "status")?,
            ts: req_int(map, "ts")?,
        }),
        MsgType::Batch => {
            let run_id = req_str(map, "run_id")?;
            let events = field(map, "events")
                .and_then(|v| v.as_array())
                .ok_or_else(|| IngestError::MalformedFrame("batch missing 'events'".into()))?
                .iter()
                .map(parse_batch_event)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Frame::Batch { run_id, events })
        }
        MsgType::Heartbeat => Ok(Frame::Heartbeat {
            run_id: req_str(map, "run_id")?,
        }),
        MsgType::Metrics => Ok(Frame::Metrics {
            run_id: req_str(map, "run_id")?,
            sample: parse_metric_sample(map)?,
        }),
        other => Err(IngestError::MalformedFrame(format!(
            "{other:?} is not a valid inbound message type"
        ))),
    }
}
