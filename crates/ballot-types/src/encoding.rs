//! Artifact codec: how pipeline artifacts are turned into stored bytes.
//!
//! The default encoding is deterministic CBOR, which keeps content-derived
//! keys stable. JSON is available where a human may need to read the stored
//! value back (process metadata). Decoding with a non-default format falls
//! back to CBOR once, so a node reconfigured from CBOR to JSON can still
//! read its old records.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a content-derived storage key, in bytes.
///
/// Fixed so index entries stay small and artifact identity never leaks into
/// long keys.
pub const DERIVED_KEY_LENGTH: usize = 12;

/// Selectable artifact encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingFormat {
    /// Deterministic binary CBOR. The default, and the only format content
    /// hashing is defined over.
    #[default]
    Cbor,
    /// Textual JSON, for records a human may inspect in place.
    Json,
}

/// Failure to serialize an artifact.
#[derive(Debug, Error)]
#[error("artifact encode ({format:?}): {message}")]
pub struct EncodeError {
    format: EncodingFormat,
    message: String,
}

/// Failure to deserialize an artifact, after any fallback attempt.
#[derive(Debug, Error)]
#[error("artifact decode ({format:?}): {message}")]
pub struct DecodeError {
    format: EncodingFormat,
    message: String,
}

impl DecodeError {
    /// A decode failure detected outside the serde codecs, e.g. an invalid
    /// discriminant in a hand-encoded record.
    pub fn custom(message: impl Into<String>) -> Self {
        Self {
            format: EncodingFormat::Cbor,
            message: message.into(),
        }
    }
}

/// Encodes `value` with the given format.
pub fn encode_artifact<T: Serialize>(
    format: EncodingFormat,
    value: &T,
) -> Result<Vec<u8>, EncodeError> {
    match format {
        EncodingFormat::Cbor => {
            let mut out = Vec::new();
            ciborium::ser::into_writer(value, &mut out).map_err(|e| EncodeError {
                format,
                message: e.to_string(),
            })?;
            Ok(out)
        }
        EncodingFormat::Json => serde_json::to_vec(value).map_err(|e| EncodeError {
            format,
            message: e.to_string(),
        }),
    }
}

/// Decodes `bytes` with the given format.
///
/// When `format` is not CBOR and the decode fails, one fallback attempt with
/// CBOR is made and logged; records written before an encoding switch stay
/// readable.
pub fn decode_artifact<T: DeserializeOwned>(
    format: EncodingFormat,
    bytes: &[u8],
) -> Result<T, DecodeError> {
    match try_decode(format, bytes) {
        Ok(value) => Ok(value),
        Err(err) => {
            if format != EncodingFormat::Cbor {
                if let Ok(value) = try_decode(EncodingFormat::Cbor, bytes) {
                    tracing::warn!(
                        configured = ?format,
                        "artifact decoded with cbor fallback"
                    );
                    return Ok(value);
                }
            }
            Err(err)
        }
    }
}

fn try_decode<T: DeserializeOwned>(
    format: EncodingFormat,
    bytes: &[u8],
) -> Result<T, DecodeError> {
    match format {
        EncodingFormat::Cbor => ciborium::de::from_reader(bytes).map_err(|e| DecodeError {
            format,
            message: e.to_string(),
        }),
        EncodingFormat::Json => serde_json::from_slice(bytes).map_err(|e| DecodeError {
            format,
            message: e.to_string(),
        }),
    }
}

/// Derives a storage key from already-encoded value bytes: SHA-256 truncated
/// to [`DERIVED_KEY_LENGTH`] bytes.
pub fn derive_key(encoded: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(encoded);
    digest[..DERIVED_KEY_LENGTH].to_vec()
}
