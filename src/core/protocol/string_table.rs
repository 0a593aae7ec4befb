// src/core/protocol/string_table.rs

//! Per-run/per-session string interning table for `component`/`channel`
//! values (§4.1, §4.2, GLOSSARY "String interning").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::compact::InternedRef;
use crate::core::errors::IngestError;

/// Maps interned integer ids to their string value. Mutated only by the
/// owning ingest session; viewers read a snapshot at connect time and then
/// receive new `[id, string]` pairs inline (§5, shared-resource policy).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StringTable {
    entries: BTreeMap<u32, String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves an incoming wire reference, recording a `Define` as a new
    /// entry. Fails with `MalformedFrame` if a bare id is referenced before
    /// it has ever been defined (§4.1).
    pub fn resolve(&mut self, reference: &InternedRef) -> Result<String, IngestError> {
        match reference {
            InternedRef::Id(id) => self.entries.get(id).cloned().ok_or_else(|| {
                IngestError::MalformedFrame(format!("interned id {id} referenced before definition"))
            }),
            InternedRef::Define(id, value) => {
                self.entries.insert(*id, value.clone());
                Ok(value.clone())
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(|s| s.as_str())
    }

    pub fn snapshot(&self) -> BTreeMap<u32, String> {
        self.entries.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
