use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DomainError;

/// SHA-256 hex of an SSH public key body — the stable name under which a key
/// is registered vendor-side. Persisted exclusively in this form; the legacy
/// vendor MD5-colon format is accepted only when parsing data written by an
/// older release, never produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a public key's wire body (the base64 blob,
    /// not the `ssh-ed25519 ... comment` line verbatim).
    pub fn of(public_key_body: &[u8]) -> Self {
        let digest = Sha256::digest(public_key_body);
        Fingerprint(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a fingerprint value read from persisted state, which may still
    /// carry the legacy vendor MD5-colon form (`aa:bb:cc:...`, 16 octets).
    /// Legacy values are accepted as-is here; normalization to SHA-256 hex
    /// happens only by recomputing from the actual key material on next
    /// write, never by reformatting the legacy string itself.
    pub fn parse_legacy(s: &str) -> Result<Self, DomainError> {
        let is_sha256_hex = s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit());
        let is_md5_colon = s.split(':').count() == 16
            && s.split(':').all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()));
        if is_sha256_hex || is_md5_colon {
            Ok(Fingerprint(s.to_ascii_lowercase()))
        } else {
            Err(DomainError::InvalidFingerprint(s.to_string()))
        }
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_is_deterministic_and_hex() {
        let fp = Fingerprint::of(b"fake-key-body");
        assert_eq!(fp.as_str().len(), 64);
        assert_eq!(fp, Fingerprint::of(b"fake-key-body"));
    }

    #[test]
    fn parse_legacy_accepts_sha256_hex() {
        let fp = Fingerprint::of(b"x");
        let parsed = Fingerprint::parse_legacy(fp.as_str()).unwrap();
        assert_eq!(parsed, fp);
    }

    #[test]
    fn parse_legacy_accepts_md5_colon() {
        let legacy = "aa:bb:cc:dd:ee:ff:00:11:22:33:44:55:66:77:88:99";
        assert!(Fingerprint::parse_legacy(legacy).is_ok());
    }

    #[test]
    fn parse_legacy_rejects_garbage() {
        assert!(Fingerprint::parse_legacy("not-a-fingerprint").is_err());
    }
}
