//! Content hashing for cache-busting URL tokens.
//!
//! Static assets hash their raw bytes; stylesheets hash the rendered CSS.
//! The digests back the `?statichash=<digest>` query tokens that the
//! long-lived cache-control path recognizes.

use std::path::Path;

use crate::error::Result;

const HASH_READ_CHUNK: usize = 64 * 1024;

/// A recorded content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    /// Hex digest of the content.
    pub digest: String,
    pub kind: HashKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// Raw bytes of a static asset.
    Static,
    /// Rendered output of a stylesheet source.
    Stylesheet,
}

/// Hex digest of a byte buffer.
pub fn digest_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Hex digest of a file's contents, read in chunks so large assets don't
/// get buffered whole.
pub async fn digest_file(path: &Path) -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_READ_CHUNK];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
