use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Builds an invalidation tag from a prefix and the values it depends on.
///
/// Without values the tag is just `prefix`. Otherwise the values are serialized as one JSON
/// array, hashed with SHA-256 and appended as URL-safe base64, so that any change to the values
/// yields a different tag and thereby invalidates previously persisted snapshots.
pub fn build_cache_tag<T: Serialize>(prefix: &str, values: &[T]) -> Result<String, serde_json::Error> {
    if values.is_empty() {
        return Ok(prefix.to_owned());
    }

    let payload = serde_json::to_vec(values)?;
    let digest = Sha256::digest(&payload);
    Ok(format!("{prefix}.{}", URL_SAFE.encode(digest)))
}
