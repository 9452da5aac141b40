//! Decryption and verification options threaded through the pipeline.

use std::fmt;
use std::sync::Arc;

use pgp::types::{Fingerprint, KeyId};
use pgp::{SignedPublicKey, SignedSecretKey, StandaloneSignature};

use crate::buffer::{MemoryBuffer, MultiPass};

/// How many nested layers (compression, encryption, inline signatures) a
/// message may contain before it is rejected.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Produces a secret key passphrase on demand.
///
/// The closure is invoked once per decryption attempt, so the passphrase
/// itself does not have to sit in memory for the lifetime of the pipeline.
#[derive(Clone)]
pub struct Passphrase(Arc<dyn Fn() -> String + Send + Sync>);

impl Passphrase {
    pub fn new(provider: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Passphrase(Arc::new(provider))
    }

    /// For keys without passphrase protection.
    pub fn empty() -> Self {
        Self::new(String::new)
    }

    pub(crate) fn provide(&self) -> String {
        (self.0)()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(..)")
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        value.to_string().into()
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self::new(move || value.clone())
    }
}

/// The secret keys and message passwords offered for decryption.
#[derive(Debug, Default)]
pub struct DecryptionKeys {
    pub(crate) keys: Vec<(SignedSecretKey, Passphrase)>,
    pub(crate) passwords: Vec<Passphrase>,
}

impl DecryptionKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret key that is not passphrase protected.
    pub fn key(self, key: SignedSecretKey) -> Self {
        self.key_with_passphrase(key, Passphrase::empty())
    }

    pub fn key_with_passphrase(mut self, key: SignedSecretKey, pw: impl Into<Passphrase>) -> Self {
        self.keys.push((key, pw.into()));
        self
    }

    /// Adds a password for symmetrically encrypted session keys.
    pub fn password(mut self, pw: impl Into<Passphrase>) -> Self {
        self.passwords.push(pw.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.passwords.is_empty()
    }
}

/// Called when a signature references a key no supplied certificate contains.
/// Returning a certificate retries the lookup with it.
pub type MissingCertCallback = Box<dyn FnMut(&KeyId) -> Option<SignedPublicKey> + Send>;

/// The assembled configuration of one pipeline run.
pub struct Options {
    pub(crate) keys: Vec<(SignedSecretKey, Passphrase)>,
    pub(crate) passwords: Vec<Passphrase>,
    pub(crate) decrypt: bool,
    pub(crate) certificates: Vec<SignedPublicKey>,
    pub(crate) detached_signatures: Vec<StandaloneSignature>,
    pub(crate) trusted_fingerprints: Option<Vec<Fingerprint>>,
    pub(crate) missing_cert_callback: Option<MissingCertCallback>,
    pub(crate) buffer: Box<dyn MultiPass>,
    pub(crate) max_nesting: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            keys: Vec::new(),
            passwords: Vec::new(),
            decrypt: false,
            certificates: Vec::new(),
            detached_signatures: Vec::new(),
            trusted_fingerprints: None,
            missing_cert_callback: None,
            buffer: Box::new(MemoryBuffer::new()),
            max_nesting: MAX_NESTING_DEPTH,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("keys", &self.keys.len())
            .field("passwords", &self.passwords.len())
            .field("decrypt", &self.decrypt)
            .field("certificates", &self.certificates.len())
            .field("detached_signatures", &self.detached_signatures.len())
            .field("trusted_fingerprints", &self.trusted_fingerprints)
            .field(
                "missing_cert_callback",
                &self.missing_cert_callback.is_some(),
            )
            .field("buffer", &self.buffer)
            .field("max_nesting", &self.max_nesting)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passphrase_provides_value() {
        let pw: Passphrase = "hunter2".into();
        assert_eq!(pw.provide(), "hunter2");
        assert_eq!(pw.clone().provide(), "hunter2");
        assert_eq!(Passphrase::empty().provide(), "");
    }

    #[test]
    fn passphrase_debug_is_redacted() {
        let pw: Passphrase = "hunter2".into();
        assert_eq!(format!("{pw:?}"), "Passphrase(..)");
    }

    #[test]
    fn decryption_keys_emptiness() {
        assert!(DecryptionKeys::new().is_empty());
        assert!(!DecryptionKeys::new().password("abc").is_empty());
    }
}
