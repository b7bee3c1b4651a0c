//! Derivation of filesystem-safe filenames from cache keys.

use std::path::Path;

use sha2::{Digest, Sha256};

/// The escape character used by [`filename_for_key`].
const ESCAPE: char = '%';

/// Most common filesystems cap file names at 255 bytes.
const MAX_FILENAME_LEN: usize = 255;

/// Derives a filename for `key`.
///
/// Characters that are unsafe in file names (NUL, `:`, `/` and the
/// escape character itself) are percent-escaped, keeping the name
/// reversible and mostly human-readable. Keys whose escaped form would
/// exceed the maximum filename length fall back to a SHA-256 hash of
/// the key, preserving the original file extension if there is one, so
/// the name stays bounded and collision-resistant.
pub fn filename_for_key(key: &str) -> String {
    let escaped = escape(key);
    if escaped.len() <= MAX_FILENAME_LEN {
        return escaped;
    }

    let hash = Sha256::digest(key.as_bytes());
    let mut name = hash.iter().fold(String::new(), |mut out, b| {
        out.push_str(&format!("{b:02x}"));
        out
    });
    if let Some(ext) = Path::new(key).extension().and_then(|e| e.to_str()) {
        // a pathological "extension" could blow the limit right back
        if name.len() + ext.len() + 1 <= MAX_FILENAME_LEN {
            name.push('.');
            name.push_str(ext);
        }
    }
    name
}

fn escape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '\0' | ':' | '/' | ESCAPE => {
                for b in c.to_string().as_bytes() {
                    out.push(ESCAPE);
                    out.push_str(&format!("{b:02X}"));
                }
            }
            _ => out.push(c),
        }
    }
    out
}
