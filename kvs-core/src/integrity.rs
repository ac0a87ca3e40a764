/*!
Integrity hashing for data files.

Every data file is paired with a `.hash` file holding the SHA-256 digest of
the data file's bytes as 64 lowercase hex characters.
*/

use sha2::{Digest as _, Sha256};
use std::fmt;
use std::path::Path;

use crate::{KvsError, Result};

const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 digest of a serialized store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest(String);

impl Digest {
    /// Hex form as written to the hash file.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Parse the contents of a hash file
    ///
    /// Surrounding whitespace is ignored; anything other than 64 hex
    /// characters yields [`KvsError::MalformedHash`].
    pub fn parse(raw: &[u8], path: &Path) -> Result<Self> {
        let malformed = || KvsError::MalformedHash {
            path: path.to_path_buf(),
        };
        let text = std::str::from_utf8(raw).map_err(|_| malformed())?.trim();
        if text.len() != DIGEST_HEX_LEN || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        Ok(Self(text.to_ascii_lowercase()))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the digest of `data`.
pub fn hash(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest(format!("{:x}", hasher.finalize()))
}

/// Check `data` against `digest`.
pub fn verify(data: &[u8], digest: &Digest) -> bool {
    hash(data) == *digest
}

/// Verify `data` read from `path` against its stored digest
///
/// # Returns
/// Ok(()) if the hash matches, Err(KvsError::Corruption) otherwise
pub fn ensure_valid(data: &[u8], expected: &Digest, path: &Path) -> Result<()> {
    let actual = hash(data);
    if actual == *expected {
        Ok(())
    } else {
        Err(KvsError::Corruption {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
