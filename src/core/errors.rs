// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid run_id: {0}")]
    RunIdInvalid(String),

    #[error("run_id already in use: {0}")]
    RunIdDuplicate(String),

    #[error("invalid tc_id: {0}")]
    TestCaseIdInvalid(String),

    #[error("invalid group_hash: {0}")]
    GroupHashInvalid(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("relational index error: {0}")]
    Index(String),

    #[error("internal error: {0}")]
    Internal(String),
}

// `std::io::Error` is not `Clone`; wrap it in an `Arc` so `IngestError` can be.
impl Clone for IngestError {
    fn clone(&self) -> Self {
        match self {
            IngestError::Io(e) => IngestError::Io(Arc::clone(e)),
            IngestError::IncompleteData => IngestError::IncompleteData,
            IngestError::MalformedFrame(s) => IngestError::MalformedFrame(s.clone()),
            IngestError::RunIdInvalid(s) => IngestError::RunIdInvalid(s.clone()),
            IngestError::RunIdDuplicate(s) => IngestError::RunIdDuplicate(s.clone()),
            IngestError::TestCaseIdInvalid(s) => IngestError::TestCaseIdInvalid(s.clone()),
            IngestError::GroupHashInvalid(s) => IngestError::GroupHashInvalid(s.clone()),
            IngestError::InvalidStatus(s) => IngestError::InvalidStatus(s.clone()),
            IngestError::ValidationError(s) => IngestError::ValidationError(s.clone()),
            IngestError::Index(s) => IngestError::Index(s.clone()),
            IngestError::Internal(s) => IngestError::Internal(s.clone()),
        }
    }
}

impl PartialEq for IngestError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (IngestError::Io(e1), IngestError::Io(e2)) => e1.to_string() == e2.to_string(),
            (IngestError::MalformedFrame(s1), IngestError::MalformedFrame(s2)) => s1 == s2,
            (IngestError::RunIdInvalid(s1), IngestError::RunIdInvalid(s2)) => s1 == s2,
            (IngestError::RunIdDuplicate(s1), IngestError::RunIdDuplicate(s2)) => s1 == s2,
            (IngestError::TestCaseIdInvalid(s1), IngestError::TestCaseIdInvalid(s2)) => s1 == s2,
            (IngestError::GroupHashInvalid(s1), IngestError::GroupHashInvalid(s2)) => s1 == s2,
            (IngestError::InvalidStatus(s1), IngestError::InvalidStatus(s2)) => s1 == s2,
            (IngestError::ValidationError(s1), IngestError::ValidationError(s2)) => s1 == s2,
            (IngestError::Index(s1), IngestError::Index(s2)) => s1 == s2,
            (IngestError::Internal(s1), IngestError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::Internal(format!("JSON serialization error: {e}"))
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        IngestError::Index(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for IngestError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IngestError::MalformedFrame(format!("encode: {e}"))
    }
}

impl From<rmp_serde::decode::Error> for IngestError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        IngestError::MalformedFrame(format!("decode: {e}"))
    }
}

impl From<std::num::ParseIntError> for IngestError {
    fn from(e: std::num::ParseIntError) -> Self {
        IngestError::ValidationError(e.to_string())
    }
}
