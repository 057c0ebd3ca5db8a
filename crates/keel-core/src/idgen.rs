//! Issue id generation.
//!
//! Ids look like `{prefix}-{6 lowercase hex}` and come from a SHA-256 digest
//! of the title, creation timestamp, and a collision nonce. The engine
//! retries with increasing nonces on collision; after [`MAX_ATTEMPTS`]
//! collisions it widens to [`FALLBACK_HEX_LEN`] characters.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Normal hex suffix length.
pub const DEFAULT_HEX_LEN: usize = 6;

/// Suffix length after collision-retry exhaustion.
pub const FALLBACK_HEX_LEN: usize = 10;

/// Collision attempts at the default length before widening.
pub const MAX_ATTEMPTS: u32 = 10;

/// Generates an id of the form `{prefix}-{hex}`.
///
/// Deterministic for fixed inputs; the nonce exists so that a caller that
/// observes a collision can try again without changing the content.
pub fn generate_id(
    prefix: &str,
    title: &str,
    timestamp: DateTime<Utc>,
    nonce: u32,
    hex_len: usize,
) -> String {
    let content = format!(
        "{}|{}|{}",
        title,
        timestamp.timestamp_nanos_opt().unwrap_or(0),
        nonce
    );
    let digest = Sha256::digest(content.as_bytes());

    // Two hex chars per byte; round the byte count up.
    let num_bytes = hex_len.div_ceil(2);
    let mut hex = String::with_capacity(num_bytes * 2);
    for byte in &digest[..num_bytes] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(hex_len);

    format!("{prefix}-{hex}")
}

/// Returns `true` if `id` has the shape `{prefix}-{hex}` for the given
/// prefix, at either the default or the fallback length.
pub fn is_well_formed(id: &str, prefix: &str) -> bool {
    let Some(suffix) = id
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };
    (suffix.len() == DEFAULT_HEX_LEN || suffix.len() == FALLBACK_HEX_LEN)
        && suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}
