use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a UTF-8 string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Hash of the canonical JSON rendering of a value.
///
/// Canonical form is sorted object keys with compact separators, which is
/// what the remote authority hashes on its side. `serde_json::Value` objects
/// already keep keys sorted, so `to_string` yields the canonical text.
pub fn canonical_json_hash(value: &serde_json::Value) -> String {
    sha256_hex(&value.to_string())
}
