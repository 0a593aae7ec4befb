// src/core/protocol/entry.rs

//! Compact → canonical translation for individual log entries and
//! exceptions (§4.1). Log entries missing a timestamp are dropped by the
//! caller (§4.5, §6); this module reports that by returning `Ok(None)`.

use rmpv::Value;

use super::compact::{ms_to_iso8601, CanonicalException, CanonicalLogEntry, Direction, Phase};
use super::string_table::StringTable;
use crate::core::errors::IngestError;
use crate::core::protocol::InternedRef;

fn interned_ref(value: &Value) -> Result<InternedRef, IngestError> {
    match value {
        Value::Integer(i) => Ok(InternedRef::Id(
            i.as_u64()
                .ok_or_else(|| IngestError::MalformedFrame("negative interned id".into()))? as u32,
        )),
        Value::Array(items) if items.len() == 2 => {
            let id = items[0]
                .as_u64()
                .ok_or_else(|| IngestError::MalformedFrame("invalid interned id pair".into()))?
                as u32;
            let s = items[1]
                .as_str()
                .ok_or_else(|| IngestError::MalformedFrame("invalid interned string pair".into()))?
                .to_string();
            Ok(InternedRef::Define(id, s))
        }
        other => Err(IngestError::MalformedFrame(format!(
            "invalid interned reference: {other:?}"
        ))),
    }
}

fn field<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

/// Records any `[id, string]` component/channel definitions carried inline
/// on a raw compact record into the run's string table, without decoding
/// the rest of the entry (§4.1, §4.6: the viewer's connect-time snapshot
/// must reflect strings defined before it subscribed). Bare id references
/// and malformed fields are ignored here; decoding still happens
/// client-side off the replayed/broadcast raw records.
pub fn intern_inline_refs(value: &Value, table: &mut StringTable) {
    let Some(map) = value.as_map() else { return };
    for key in ["c", "ch"] {
        if let Some(v) = field(map, key) {
            if let Ok(reference) = interned_ref(v) {
                if let InternedRef::Define(id, s) = reference {
                    table.resolve(&InternedRef::Define(id, s)).ok();
                }
            }
        }
    }
}

/// Decodes a single raw compact log-entry record into its canonical form,
/// resolving (and possibly extending) the run's string table. Returns
/// `Ok(None)` when the entry has no `ts` field, per spec: such entries are
/// dropped with a warning by the caller.
pub fn decode_log_entry(
    value: &Value,
    table: &mut StringTable,
) -> Result<Option<CanonicalLogEntry>, IngestError> {
    let Some(map) = value.as_map() else {
        return Err(IngestError::MalformedFrame("log entry is not a map".into()));
    };

    let Some(ts) = field(map, "ts").and_then(|v| v.as_i64()) else {
        return Ok(None);
    };

    let message = field(map, "m")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let component = match field(map, "c") {
        Some(v) => Some(table.resolve(&interned_ref(v)?)?),
        None => None,
    };
    let channel = match field(map, "ch") {
        Some(v) => Some(table.resolve(&interned_ref(v)?)?),
        None => None,
    };
    let dir = match field(map, "d").and_then(|v| v.as_i64()) {
        Some(code) => Some(Direction::from_code(code)?),
        None => None,
    };
    let phase = match field(map, "p").and_then(|v| v.as_i64()) {
        Some(code) => Some(Phase::from_code(code)?),
        None => None,
    };

    Ok(Some(CanonicalLogEntry {
        timestamp: ms_to_iso8601(ts),
        message,
        component,
        channel,
        dir,
        phase,
    }))
}

/// Decodes a stored exception/stack-trace record. Used both for the
/// compact wire form of `exception` frames and for reading stack records
/// back out of the on-disk files/archive.
pub fn decode_exception_record(value: &Value) -> Result<CanonicalException, IngestError> {
    let map = value
        .as_map()
        .ok_or_else(|| IngestError::MalformedFrame("exception record is not a map".into()))?;

    let ts = field(map, "ts")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| IngestError::MalformedFrame("exception record missing 'ts'".into()))?;
    let message = field(map, "message")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let exception_type = field(map, "exception_type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let stack_trace = field(map, "stack_trace")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let is_error = field(map, "is_error").and_then(|v| v.as_bool()).unwrap_or(false);

    Ok(CanonicalException {
        timestamp: ms_to_iso8601(ts),
        message,
        exception_type,
        stack_trace,
        is_error,
    })
}

/// Builds the raw compact-form record persisted for an `exception` frame
/// (so the on-disk stack file holds the same shape that `log_batch`
/// entries do, for uniform record decoding on read).
pub fn encode_exception_record(
    ts: i64,
    message: &str,
    exception_type: &str,
    stack_trace: &[String],
    is_error: bool,
) -> Value {
    Value::Map(vec![
        (Value::from("ts"), Value::from(ts)),
        (Value::from("message"), Value::from(message)),
        (Value::from("exception_type"), Value::from(exception_type)),
        (
            Value::from("stack_trace"),
            Value::Array(stack_trace.iter().map(|s| Value::from(s.as_str())).collect()),
        ),
        (Value::from("is_error"), Value::from(is_error)),
    ])
}

/// Turns a stored exception record into the `{type: exception, ...}` shape
/// sent to subscribers, live or on viewer-connect replay (§4.5, §4.6).
pub fn exception_viewer_payload(record: &Value) -> Value {
    let mut entries = vec![(Value::from("type"), Value::from("exception"))];
    if let Some(map) = record.as_map() {
        entries.extend(map.iter().cloned());
    }
    Value::Map(entries)
}

/// Extracts the `ts` field used to order replay batches chronologically
/// (§4.6). Entries without one sort first.
pub fn record_ts(value: &Value) -> i64 {
    value
        .as_map()
        .and_then(|map| field(map, "ts"))
        .and_then(|v| v.as_i64())
        .unwrap_or(i64::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8 round-trip law 1: a fully-populated compact log entry decodes to
    /// the canonical entry it represents.
    #[test]
    fn decode_log_entry_with_fully_populated_string_table() {
        let raw = Value::Map(vec![
            (Value::from("ts"), Value::from(1_700_000_000_000i64)),
            (Value::from("m"), Value::from("connected")),
            (Value::from("c"), Value::Array(vec![Value::from(1u32), Value::from("Dev")])),
            (Value::from("ch"), Value::Array(vec![Value::from(2u32), Value::from("COM")])),
            (Value::from("d"), Value::from(Direction::Tx.code())),
            (Value::from("p"), Value::from(Phase::Teardown.code())),
        ]);
        let mut table = StringTable::new();
        let decoded = decode_log_entry(&raw, &mut table).unwrap().unwrap();

        assert_eq!(
            decoded,
            CanonicalLogEntry {
                timestamp: ms_to_iso8601(1_700_000_000_000),
                message: "connected".to_string(),
                component: Some("Dev".to_string()),
                channel: Some("COM".to_string()),
                dir: Some(Direction::Tx),
                phase: Some(Phase::Teardown),
            }
        );
    }

    #[test]
    fn entry_without_ts_is_dropped() {
        let raw = Value::Map(vec![(Value::from("m"), Value::from("no timestamp"))]);
        let mut table = StringTable::new();
        assert_eq!(decode_log_entry(&raw, &mut table).unwrap(), None);
    }

    #[test]
    fn bare_interned_id_referenced_before_definition_errors() {
        let raw = Value::Map(vec![
            (Value::from("ts"), Value::from(1)),
            (Value::from("m"), Value::from("x")),
            (Value::from("c"), Value::from(99u32)),
        ]);
        let mut table = StringTable::new();
        assert!(decode_log_entry(&raw, &mut table).is_err());
    }
}
