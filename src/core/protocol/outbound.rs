// src/core/protocol/outbound.rs

//! Encodes messages the server sends: the `run_started` reply, UI
//! broadcasts (§4.6, §6 "UI broadcast interface"), and the `string_table`
//! frame sent to viewers on connect (§4.6, §6).

use rmpv::Value;
use std::collections::BTreeMap;

use super::compact::MsgType;

/// Per-status counts attached to broadcasts (§6).
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub aborted: u32,
}

impl StatusCounts {
    fn to_value(self) -> Value {
        Value::Map(vec![
            (Value::from("passed"), Value::from(self.passed)),
            (Value::from("failed"), Value::from(self.failed)),
            (Value::from("skipped"), Value::from(self.skipped)),
            (Value::from("aborted"), Value::from(self.aborted)),
        ])
    }
}

fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

fn opt(value: Option<String>) -> Value {
    value.map(Value::from).unwrap_or(Value::Nil)
}

/// Reply to a `run_started` frame (§4.5, §6).
pub fn run_started_response(
    run_id: &str,
    run_name: &str,
    run_url: &str,
    group_hash: Option<&str>,
    group_url: Option<&str>,
) -> Value {
    map(vec![
        ("t", Value::from(MsgType::RunStartedResponse.code())),
        ("run_id", Value::from(run_id)),
        ("run_name", Value::from(run_name)),
        ("run_url", Value::from(run_url)),
        ("group_hash", opt(group_hash.map(str::to_string))),
        ("group_url", opt(group_url.map(str::to_string))),
    ])
}

/// An error reply to `run_started` when validation fails (§4.5, §7): the
/// session stays open so the client can retry.
pub fn run_started_error(err: &str) -> Value {
    map(vec![
        ("t", Value::from(MsgType::RunStartedResponse.code())),
        ("err", Value::from(err)),
    ])
}

/// The `string_table` frame sent to a viewer on connect (§4.6, §6).
pub fn string_table_frame(strings: &BTreeMap<u32, String>) -> Value {
    let entries = strings
        .iter()
        .map(|(id, s)| (Value::from(*id), Value::from(s.as_str())))
        .collect();
    map(vec![
        ("t", Value::from(MsgType::StringTableFrame.code())),
        ("strings", Value::Map(entries)),
    ])
}

/// A UI broadcast: `run_started`, `test_case_started`, `test_case_finished`,
/// `test_case_updated`, or `run_finished` (§4.6, §6).
#[derive(Debug, Clone)]
pub enum UiEvent {
    RunStarted {
        run_id: String,
        run_name: String,
    },
    TestCaseStarted {
        run_id: String,
        tc_id: String,
        tc_full_name: String,
        counts: StatusCounts,
    },
    TestCaseUpdated {
        run_id: String,
        tc_id: String,
        counts: StatusCounts,
    },
    TestCaseFinished {
        run_id: String,
        tc_id: String,
        status: &'static str,
        counts: StatusCounts,
    },
    RunFinished {
        run_id: String,
        status: &'static str,
    },
}

impl UiEvent {
    fn type_name(&self) -> &'static str {
        match self {
            UiEvent::RunStarted { .. } => "run_started",
            UiEvent::TestCaseStarted { .. } => "test_case_started",
            UiEvent::TestCaseUpdated { .. } => "test_case_updated",
            UiEvent::TestCaseFinished { .. } => "test_case_finished",
            UiEvent::RunFinished { .. } => "run_finished",
        }
    }

    pub fn to_value(&self) -> Value {
        let mut entries = vec![("type", Value::from(self.type_name()))];
        match self {
            UiEvent::RunStarted { run_id, run_name } => {
                entries.push(("run_id", Value::from(run_id.as_str())));
                entries.push(("run_name", Value::from(run_name.as_str())));
            }
            UiEvent::TestCaseStarted {
                run_id,
                tc_id,
                tc_full_name,
                counts,
            } => {
                entries.push(("run_id", Value::from(run_id.as_str())));
                entries.push(("tc_id", Value::from(tc_id.as_str())));
                entries.push(("tc_full_name", Value::from(tc_full_name.as_str())));
                entries.push(("counts", counts.to_value()));
            }
            UiEvent::TestCaseUpdated {
                run_id,
                tc_id,
                counts,
            } => {
                entries.push(("run_id", Value::from(run_id.as_str())));
                entries.push(("tc_id", Value::from(tc_id.as_str())));
                entries.push(("counts", counts.to_value()));
            }
            UiEvent::TestCaseFinished {
                run_id,
                tc_id,
                status,
                counts,
            } => {
                entries.push(("run_id", Value::from(run_id.as_str())));
                entries.push(("tc_id", Value::from(tc_id.as_str())));
                entries.push(("status", Value::from(*status)));
                entries.push(("counts", counts.to_value()));
            }
            UiEvent::RunFinished { run_id, status } => {
                entries.push(("run_id", Value::from(run_id.as_str())));
                entries.push(("status", Value::from(*status)));
            }
        }
        map(entries)
    }
}

/// The error a live-log viewer receives when the target run is not active
/// in memory (§6, "Live-log viewer interface").
pub fn viewer_error(message: &str) -> Value {
    map(vec![("type", Value::from("error")), ("message", Value::from(message))])
}
