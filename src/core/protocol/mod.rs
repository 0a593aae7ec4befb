// src/core/protocol/mod.rs

//! The binary wire protocol: frame codec, compact/canonical representations,
//! and per-session string interning (§4.1).

pub mod codec;
pub mod compact;
pub mod entry;
pub mod inbound;
pub mod outbound;
pub mod string_table;

pub use codec::FrameCodec;
pub use compact::{
    CanonicalException, CanonicalLogEntry, Direction, InternedRef, MsgType, Phase, RunStatus,
    Status,
};
pub use entry::{
    decode_exception_record, decode_log_entry, encode_exception_record, exception_viewer_payload,
    record_ts,
};
pub use inbound::{decode_frame, BatchEvent, Frame, GroupPayload, MetaValue, MetricSample};
pub use string_table::StringTable;
