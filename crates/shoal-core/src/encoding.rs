//! Collision-free encodings for storage keys and key lists
//!
//! Composite keys are written as a sequence of length-prefixed parts,
//! `<byte length>:<part>`, so `("a:b", "c")` and `("a", "b:c")` produce
//! different keys whatever characters the parts contain. Lists of keys are
//! stored as postcard-encoded `Vec<String>`, which is length-prefixed as well.

use crate::error::ShoalError;

/// Join parts into one key
pub fn encode_key<S: AsRef<str>>(parts: &[S]) -> String {
    let mut key = String::new();
    for part in parts {
        let part = part.as_ref();
        key.push_str(&part.len().to_string());
        key.push(':');
        key.push_str(part);
    }
    key
}

/// Split a key produced by [`encode_key`] back into its parts
pub fn decode_key(key: &str) -> Result<Vec<String>, ShoalError> {
    let mut parts = Vec::new();
    let mut rest = key;

    while !rest.is_empty() {
        let colon = rest
            .find(':')
            .ok_or_else(|| malformed(key, "missing length separator"))?;
        let len: usize = rest[..colon]
            .parse()
            .map_err(|_| malformed(key, "invalid length prefix"))?;
        let start = colon + 1;
        let part = rest
            .get(start..start + len)
            .ok_or_else(|| malformed(key, "part shorter than its length prefix"))?;
        parts.push(part.to_string());
        rest = &rest[start + len..];
    }

    Ok(parts)
}

/// Encode a list of names as one record
pub fn encode_list(items: &[String]) -> Result<Vec<u8>, ShoalError> {
    Ok(postcard::to_allocvec(items)?)
}

/// Decode a record produced by [`encode_list`]
pub fn decode_list(bytes: &[u8]) -> Result<Vec<String>, ShoalError> {
    Ok(postcard::from_bytes(bytes)?)
}

fn malformed(key: &str, reason: &str) -> ShoalError {
    ShoalError::Serialization(format!("malformed key {:?}: {}", key, reason))
}
