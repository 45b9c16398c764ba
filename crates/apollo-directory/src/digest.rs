//! SIP digest credentials.
//!
//! Line secrets are stored as `HEX(H(extension:realm:password))` for each
//! enabled digest family. The site-wide selection comes from a free-text
//! `server.algorithm` token.

use std::fmt;

use md5::Md5;
use sha2::{Digest, Sha256};

/// Which digest families are enabled for new credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestAlgorithms {
    pub md5: bool,
    pub sha256: bool,
}

impl Default for DigestAlgorithms {
    fn default() -> Self {
        Self::SHA256
    }
}

impl DigestAlgorithms {
    pub const SHA256: Self = Self {
        md5: false,
        sha256: true,
    };
    pub const MD5: Self = Self {
        md5: true,
        sha256: false,
    };
    pub const BOTH: Self = Self {
        md5: true,
        sha256: true,
    };

    /// Parse a user-supplied token. Mentioning both families enables both,
    /// otherwise whichever is mentioned; anything else means SHA-256 only.
    pub fn normalize(token: &str) -> Self {
        let token = token.to_uppercase();
        match (token.contains("MD5"), token.contains("SHA")) {
            (true, true) => Self::BOTH,
            (true, false) => Self::MD5,
            _ => Self::SHA256,
        }
    }

    /// Credential digests for `id` with only the enabled families populated.
    pub fn credentials(&self, id: &str, realm: &str, password: &str) -> Credentials {
        Credentials {
            md5: self.md5.then(|| md5_secret(id, realm, password)),
            sha256: self.sha256.then(|| sha256_secret(id, realm, password)),
        }
    }
}

impl fmt::Display for DigestAlgorithms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.md5, self.sha256) {
            (true, true) => f.write_str("SHA-256, MD5"),
            (true, false) => f.write_str("MD5"),
            _ => f.write_str("SHA-256"),
        }
    }
}

/// Computed digests; `None` for disabled families.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub md5: Option<String>,
    pub sha256: Option<String>,
}

pub fn md5_secret(username: &str, realm: &str, password: &str) -> String {
    let mut digest = Md5::new();
    digest.update(format!("{}:{}:{}", username, realm, password).as_bytes());
    hex::encode(digest.finalize())
}

pub fn sha256_secret(username: &str, realm: &str, password: &str) -> String {
    let mut digest = Sha256::new();
    digest.update(format!("{}:{}:{}", username, realm, password).as_bytes());
    hex::encode(digest.finalize())
}

/// Web administrator credential, stored as `server.webpass`.
pub fn admin_digest(user: &str, password: &str) -> String {
    let mut digest = Sha256::new();
    digest.update(format!("{}:{}", password, user).as_bytes());
    hex::encode(digest.finalize())
}
