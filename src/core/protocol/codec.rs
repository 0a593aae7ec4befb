// src/core/protocol/codec.rs

//! Length-delimited framing for the binary wire protocol: a 4-byte
//! big-endian length prefix followed by a MessagePack-encoded map (§4.1,
//! §6). Also used, with the same framing, for on-disk per-record log/stack
//! persistence (§4.3).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rmpv::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::errors::IngestError;

const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
const LEN_PREFIX_BYTES: usize = 4;

/// Decodes/encodes length-prefixed MessagePack frames off the wire.
///
/// Decoding yields the raw [`rmpv::Value`] tree; higher layers (see
/// `inbound.rs`) turn that into a dispatch-ready `Frame`. This mirrors the
/// frame codec's job of separating "is there a complete frame yet" from
/// "what does this frame mean".
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Value;
    type Error = IngestError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX_BYTES {
            return Ok(None);
        }

        let mut len_bytes = &src[..LEN_PREFIX_BYTES];
        let len = len_bytes.get_u32() as usize;

        if len > MAX_FRAME_LEN {
            return Err(IngestError::MalformedFrame(format!(
                "frame length {len} exceeds maximum {MAX_FRAME_LEN}"
            )));
        }

        if src.len() < LEN_PREFIX_BYTES + len {
            src.reserve(LEN_PREFIX_BYTES + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX_BYTES);
        let payload = src.split_to(len);

        let value = rmpv::decode::read_value(&mut &payload[..])
            .map_err(|e| IngestError::MalformedFrame(format!("invalid msgpack payload: {e}")))?;
        Ok(Some(value))
    }
}

impl Encoder<Value> for FrameCodec {
    type Error = IngestError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut payload = Vec::new();
        rmpv::encode::write_value(&mut payload, &item)
            .map_err(|e| IngestError::MalformedFrame(format!("failed to encode frame: {e}")))?;

        if payload.len() > MAX_FRAME_LEN {
            return Err(IngestError::MalformedFrame(format!(
                "encoded frame length {} exceeds maximum {}",
                payload.len(),
                MAX_FRAME_LEN
            )));
        }

        dst.reserve(LEN_PREFIX_BYTES + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

/// Encodes a single opaque record (a raw compact-form map) into its
/// length-prefixed on-disk representation. Used by the disk log store to
/// append `log_batch`/`exception` entries verbatim (§4.3, §9 "Two
/// representations, one source of truth").
pub fn encode_record(value: &Value) -> Result<Bytes, IngestError> {
    let mut payload = Vec::new();
    rmpv::encode::write_value(&mut payload, value)
        .map_err(|e| IngestError::MalformedFrame(format!("failed to encode record: {e}")))?;

    let mut buf = BytesMut::with_capacity(LEN_PREFIX_BYTES + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decodes every length-prefixed record out of a contiguous byte slice
/// (a merged-archive case slice, or a full per-case file read while live).
pub fn decode_records(mut data: &[u8]) -> Result<Vec<Value>, IngestError> {
    let mut out = Vec::new();
    while !data.is_empty() {
        if data.len() < LEN_PREFIX_BYTES {
            return Err(IngestError::MalformedFrame(
                "truncated record length prefix".into(),
            ));
        }
        let len = u32::from_be_bytes(data[..LEN_PREFIX_BYTES].try_into().unwrap()) as usize;
        data = &data[LEN_PREFIX_BYTES..];
        if data.len() < len {
            return Err(IngestError::MalformedFrame("truncated record payload".into()));
        }
        let (record, rest) = data.split_at(len);
        let value = rmpv::decode::read_value(&mut &record[..])
            .map_err(|e| IngestError::MalformedFrame(format!("invalid stored record: {e}")))?;
        out.push(value);
        data = rest;
    }
    Ok(out)
}
