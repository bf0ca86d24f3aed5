//! Report key derivation.
//!
//! The report key identifies a coverage artifact by its source revision and
//! job metadata. It is computed as the SHA-256 hex digest of the RFC 8785
//! (JCS) canonicalization of the key inputs, so two runs with identical
//! metadata always derive the same key.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::CoverageError;

/// The canonical, key-affecting inputs
#[derive(Debug, Serialize)]
struct KeyInputs<'a> {
    commit: &'a str,
    flags: &'a [String],
    name: &'a str,
    env: &'a [String],
}

/// A derived coverage report key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportKey(String);

impl ReportKey {
    /// Compute the key from revision + job metadata
    pub fn compute(
        commit: &str,
        flags: &[String],
        name: &str,
        env: &[String],
    ) -> Result<Self, CoverageError> {
        let inputs = KeyInputs {
            commit,
            flags,
            name,
            env,
        };
        let jcs_bytes = serde_json_canonicalizer::to_vec(&inputs)
            .map_err(|e| CoverageError::Canonicalization(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// The hex digest as a string slice
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Consume into the hex digest
    pub fn into_hex(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ReportKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> Vec<String> {
        vec!["gpu".to_string(), "pytest".to_string()]
    }

    fn env_tags() -> Vec<String> {
        vec!["linux".to_string(), "azure".to_string()]
    }

    #[test]
    fn test_key_is_sha256_hex() {
        let key = ReportKey::compute("abc", &flags(), "GPU-coverage", &env_tags()).unwrap();
        assert_eq!(key.as_hex().len(), 64);
        assert!(key.as_hex().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_deterministic() {
        let a = ReportKey::compute("abc", &flags(), "GPU-coverage", &env_tags()).unwrap();
        let b = ReportKey::compute("abc", &flags(), "GPU-coverage", &env_tags()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_varies_with_commit() {
        let a = ReportKey::compute("abc", &flags(), "GPU-coverage", &env_tags()).unwrap();
        let b = ReportKey::compute("abd", &flags(), "GPU-coverage", &env_tags()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_varies_with_flags() {
        let a = ReportKey::compute("abc", &flags(), "GPU-coverage", &env_tags()).unwrap();
        let b = ReportKey::compute(
            "abc",
            &["cpu".to_string()],
            "GPU-coverage",
            &env_tags(),
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_flag_order_matters() {
        // Flags are an ordered list, not a set; the canonicalization
        // preserves array order.
        let reversed = vec!["pytest".to_string(), "gpu".to_string()];
        let a = ReportKey::compute("abc", &flags(), "n", &env_tags()).unwrap();
        let b = ReportKey::compute("abc", &reversed, "n", &env_tags()).unwrap();
        assert_ne!(a, b);
    }
}
