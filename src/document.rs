//! Document interchange: download naming and payload decoding.

use crate::error::AppletError;
use base64::Engine;
use bytes::Bytes;

/// Name of the downloaded file for a save request.
///
/// Blank or missing names fall back to `default_stem`; the extension is appended unless the
/// name already carries it.
pub fn resolve_download_name(requested: Option<&str>, default_stem: &str, extension: &str) -> String {
    let stem = requested
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_stem);
    let suffix = format!(".{extension}");
    if stem.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()) {
        stem.to_string()
    } else {
        format!("{stem}{suffix}")
    }
}

/// Decode the runtime's base64 document into raw file bytes.
pub fn decode_payload(encoded: &str) -> Result<Bytes, AppletError> {
    // Runtimes sometimes hand back a data URL rather than the bare payload.
    let body = match encoded.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => encoded,
    };
    base64::engine::general_purpose::STANDARD
        .decode(body.trim())
        .map(Bytes::from)
        .map_err(|e| AppletError::SerializationFailure {
            reason: format!("invalid base64 payload: {e}"),
        })
}

pub fn encode_payload(raw: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(raw)
}
