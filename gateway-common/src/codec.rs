//! Wire representation of stream records.
//!
//! Records travel as JSON. Push-delivered records wrap the JSON bytes in base64 text.
//! Decoding is schema-agnostic: any JSON value comes back as a `Payload`, and only the
//! optional top-level `"category"` field is read to route the record.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CodecError;
use crate::record::{DataEncoding, Payload, RawRecord};

/// Top-level payload field declaring the record's category.
pub const CATEGORY_FIELD: &str = "category";

/// Category of payloads that do not declare one.
pub const DEFAULT_CATEGORY: &str = "default";

pub fn encode(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(payload)?)
}

pub fn decode(data: &[u8]) -> Result<Payload, CodecError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(CodecError::Empty);
    }

    Ok(serde_json::from_slice(data)?)
}

pub fn encode_base64(payload: &Payload) -> Result<String, CodecError> {
    Ok(STANDARD.encode(encode(payload)?))
}

pub fn decode_base64(data: &[u8]) -> Result<Payload, CodecError> {
    // Triggers may line-wrap the base64 text.
    let compact: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(CodecError::Empty);
    }

    decode(&STANDARD.decode(compact)?)
}

/// Decode a record as delivered by a transport, honouring its encoding.
pub fn decode_raw(record: &RawRecord) -> Result<Payload, CodecError> {
    match record.encoding {
        DataEncoding::Json => decode(&record.data),
        DataEncoding::Base64Json => decode_base64(&record.data),
    }
}

/// The category a decoded payload declares, or `DEFAULT_CATEGORY`.
pub fn category_of(payload: &Payload) -> &str {
    payload
        .get(CATEGORY_FIELD)
        .and_then(Payload::as_str)
        .unwrap_or(DEFAULT_CATEGORY)
}
