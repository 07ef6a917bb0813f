//! # Checksum Values
//!
//! SHA-1 hash values as carried by repository `.sha1` side-files, plus
//! helpers for hashing staged downloads.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::io::AsyncReadExt;

const SHA1_LEN: usize = 20;

/// A parsed SHA-1 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashValue(Vec<u8>);

impl HashValue {
    /// Parse the content of a checksum side-file.
    ///
    /// Accepts raw hex (upper or lower case, surrounding whitespace) and
    /// `sha1sum`-style output where the digest is followed by a file name.
    /// Returns `None` for anything else; callers treat that as "checksum
    /// unavailable" and fall back to a full fetch.
    pub fn parse(text: &str) -> Option<HashValue> {
        let token = text.split_whitespace().next()?;
        if token.len() != SHA1_LEN * 2 {
            return None;
        }
        hex::decode(token).ok().map(HashValue)
    }

    /// Hash a byte slice
    pub fn sha1_of(data: &[u8]) -> HashValue {
        let mut hasher = Sha1::new();
        hasher.update(data);
        HashValue(hasher.finalize().to_vec())
    }

    /// Hash a file on disk, streaming its content
    pub async fn sha1_of_file(path: &Path) -> std::io::Result<HashValue> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(HashValue(hasher.finalize().to_vec()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
