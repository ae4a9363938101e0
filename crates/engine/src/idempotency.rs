//! Idempotency keys: deterministic fingerprints of a notification request.
//!
//! Two requests with the same user, channel, title, content and metadata map to
//! the same key no matter in which order the metadata pairs were supplied, so a
//! retried submission collides with the live notification it duplicates.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use herald_common::types::Meta;

#[derive(Serialize)]
struct KeyMaterial<'a> {
    user_id: Uuid,
    channel_name: &'a str,
    title: &'a str,
    content: &'a str,
    meta: &'a Meta,
}

/// SHA-256 (hex) over the canonical JSON encoding of the request fields.
pub fn idempotency_key(
    user_id: Uuid,
    channel_name: &str,
    title: &str,
    content: &str,
    meta: &Meta,
) -> Result<String, serde_json::Error> {
    let material = KeyMaterial {
        user_id,
        channel_name,
        title,
        content,
        meta,
    };
    let bytes = serde_json::to_vec(&material)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
