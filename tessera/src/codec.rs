//! Versioned session envelope.
//!
//! Layout before base64: `b"TSES"`, one version byte, a big-endian `u32`
//! body length, then the JSON body. The base64 text is carried in the cache
//! payload under `serialized`. Decoding never produces anything but plain
//! JSON values, so a tampered or foreign payload can only ever fail with a
//! [`CodecError`].

use crate::domain::Payload;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const MAGIC: &[u8; 4] = b"TSES";
const VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1 + 4;
const PAYLOAD_FIELD: &str = "serialized";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload has no 'serialized' string field")]
    MissingField,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("envelope too short ({0} bytes)")]
    Truncated(usize),
    #[error("bad envelope magic")]
    BadMagic,
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    #[error("declared body length {declared} does not match actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("body too large to encode ({0} bytes)")]
    TooLarge(usize),
    #[error("invalid body: {0}")]
    Json(#[from] serde_json::Error),
}

/// What a session looks like once decoded from the cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub permanent: bool,
    pub values: BTreeMap<String, Value>,
}

pub fn encode(record: &SessionRecord) -> Result<Payload, CodecError> {
    let body = serde_json::to_vec(record)?;
    let body_len = u32::try_from(body.len()).map_err(|_| CodecError::TooLarge(body.len()))?;

    let mut envelope = Vec::with_capacity(HEADER_LEN + body.len());
    envelope.extend_from_slice(MAGIC);
    envelope.push(VERSION);
    envelope.extend_from_slice(&body_len.to_be_bytes());
    envelope.extend_from_slice(&body);

    let mut payload = Payload::new();
    payload.insert(PAYLOAD_FIELD.to_string(), Value::String(STANDARD.encode(envelope)));
    Ok(payload)
}

pub fn decode(payload: &Payload) -> Result<SessionRecord, CodecError> {
    let text = payload
        .get(PAYLOAD_FIELD)
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingField)?;
    let envelope = STANDARD.decode(text)?;

    if envelope.len() < HEADER_LEN {
        return Err(CodecError::Truncated(envelope.len()));
    }
    let (header, body) = envelope.split_at(HEADER_LEN);
    if &header[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = header[MAGIC.len()];
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[MAGIC.len() + 1..]);
    let declared = u32::from_be_bytes(len_bytes) as usize;
    if declared != body.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    Ok(serde_json::from_slice(body)?)
}
