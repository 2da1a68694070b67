use std::io;
use std::path::Path;

/// Length of the truncated digest used as a transform cache key.
pub const SHORT_HASH_LEN: usize = 16;

/// Hex-encoded BLAKE3 digest of a byte slice.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// First 16 hex characters of the BLAKE3 digest of `data`.
///
/// Short enough to keep cache keys cheap, long enough that two different
/// revisions of the same file never share a key in practice.
#[must_use]
pub fn content_hash16(data: &[u8]) -> String {
    let mut hex = blake3_bytes(data);
    hex.truncate(SHORT_HASH_LEN);
    hex
}

/// Combined digest over several optional files, in order.
///
/// Each file contributes its name and contents; a missing file contributes a
/// fixed marker so that creating or deleting a lockfile changes the result.
///
/// # Errors
/// Returns an error if a file exists but cannot be read.
pub fn blake3_files(paths: &[&Path]) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    for path in paths {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        match std::fs::read(path) {
            Ok(bytes) => {
                hasher.update(&bytes);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                hasher.update(b"<missing>");
            }
            Err(e) => return Err(e),
        }
        hasher.update(b"\0");
    }
    Ok(hasher.finalize().to_hex().to_string())
}
