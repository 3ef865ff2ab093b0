//! SS-012: BLAKE3 digests for desired state and deployment archives.
//!
//! Every digest is rendered as `blake3:<hex>` so lock files stay
//! self-describing.

use std::io::Read;
use std::path::Path;

pub const DIGEST_PREFIX: &str = "blake3:";

fn tagged(hash: blake3::Hash) -> String {
    format!("{}{}", DIGEST_PREFIX, hash.to_hex())
}

/// Digest everything a reader yields.
pub fn hash_reader<R: Read>(reader: R) -> std::io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(reader)?;
    Ok(tagged(hasher.finalize()))
}

/// Digest a deployment archive on disk.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let file = std::fs::File::open(path)
        .map_err(|e| format!("cannot open archive {}: {}", path.display(), e))?;
    hash_reader(file).map_err(|e| format!("cannot read archive {}: {}", path.display(), e))
}

pub fn hash_string(s: &str) -> String {
    tagged(blake3::hash(s.as_bytes()))
}

/// Digest ordered components. A NUL follows each one, so `["ab", "c"]`
/// and `["a", "bc"]` differ.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in components {
        hasher.update(part.as_bytes()).update(b"\0");
    }
    tagged(hasher.finalize())
}
