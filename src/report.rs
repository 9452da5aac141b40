//! Verification results, assembled when the decoding stream is closed.

use chrono::{DateTime, Utc};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::{CompressionAlgorithm, Fingerprint, KeyId};

/// Whether the literal data was stored in binary or text mode.
///
/// Text mode signatures are checked over line-ending normalized content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Binary,
    Text,
}

/// Outcome of checking a single signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureOutcome {
    /// Cryptographically valid, made by the key with this fingerprint.
    Valid { by: Fingerprint },
    /// The referenced key is available, but the signature does not check out.
    Invalid,
    /// No supplied certificate contains the referenced key, or the stream was
    /// closed before the signed content was fully read.
    CertificateUnavailable,
}

/// One record per signature the message carried, in order of appearance.
#[derive(Debug, Clone)]
pub struct SignatureRecord {
    pub(crate) issuer: Option<KeyId>,
    pub(crate) issuer_fingerprint: Option<Fingerprint>,
    pub(crate) created: Option<DateTime<Utc>>,
    pub(crate) hash_alg: HashAlgorithm,
    pub(crate) outcome: SignatureOutcome,
}

impl SignatureRecord {
    /// Key id the signature claims to come from, if it said.
    pub fn issuer(&self) -> Option<&KeyId> {
        self.issuer.as_ref()
    }

    pub fn issuer_fingerprint(&self) -> Option<&Fingerprint> {
        self.issuer_fingerprint.as_ref()
    }

    /// Claimed signature creation time.
    pub fn created(&self) -> Option<&DateTime<Utc>> {
        self.created.as_ref()
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_alg
    }

    pub fn outcome(&self) -> &SignatureOutcome {
        &self.outcome
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.outcome, SignatureOutcome::Valid { .. })
    }
}

/// Everything the pipeline learned about a message.
#[derive(Debug)]
pub struct VerificationReport {
    pub(crate) records: Vec<SignatureRecord>,
    pub(crate) trusted_fingerprints: Option<Vec<Fingerprint>>,
    pub(crate) encrypted: bool,
    pub(crate) sym_algorithm: Option<SymmetricKeyAlgorithm>,
    pub(crate) compression: Option<CompressionAlgorithm>,
    pub(crate) encoding: ContentEncoding,
    pub(crate) file_name: Option<String>,
    pub(crate) modified: Option<DateTime<Utc>>,
}

impl VerificationReport {
    pub fn records(&self) -> &[SignatureRecord] {
        &self.records
    }

    /// Whether the message carries at least one valid signature, made by a
    /// trusted key if an allow-list was configured.
    pub fn is_verified(&self) -> bool {
        self.records.iter().any(|record| match &record.outcome {
            SignatureOutcome::Valid { by } => match &self.trusted_fingerprints {
                Some(trusted) => trusted.contains(by),
                None => true,
            },
            _ => false,
        })
    }

    /// Whether an encryption layer was removed.
    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    /// Symmetric algorithm of the encryption layer, when it could be
    /// determined from a password protected session key.
    pub fn sym_algorithm(&self) -> Option<SymmetricKeyAlgorithm> {
        self.sym_algorithm
    }

    /// Algorithm of the outermost compression layer, if the message was
    /// compressed.
    pub fn compression(&self) -> Option<CompressionAlgorithm> {
        self.compression
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// File name stored in the literal data packet, if non-empty.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Modification time stored in the literal data packet.
    pub fn modified(&self) -> Option<&DateTime<Utc>> {
        self.modified.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: SignatureOutcome) -> SignatureRecord {
        SignatureRecord {
            issuer: None,
            issuer_fingerprint: None,
            created: None,
            hash_alg: HashAlgorithm::default(),
            outcome,
        }
    }

    fn report(records: Vec<SignatureRecord>, trusted: Option<Vec<Fingerprint>>) -> VerificationReport {
        VerificationReport {
            records,
            trusted_fingerprints: trusted,
            encrypted: false,
            sym_algorithm: None,
            compression: None,
            encoding: ContentEncoding::Binary,
            file_name: None,
            modified: None,
        }
    }

    #[test]
    fn unsigned_message_is_not_verified() {
        assert!(!report(vec![], None).is_verified());
    }

    #[test]
    fn one_valid_signature_suffices() {
        let by = Fingerprint::V4([1u8; 20]);
        let records = vec![
            record(SignatureOutcome::Invalid),
            record(SignatureOutcome::Valid { by }),
            record(SignatureOutcome::CertificateUnavailable),
        ];
        assert!(report(records, None).is_verified());
    }

    #[test]
    fn allow_list_gates_valid_signatures() {
        let signer = Fingerprint::V4([1u8; 20]);
        let other = Fingerprint::V4([2u8; 20]);
        let records = vec![record(SignatureOutcome::Valid { by: signer.clone() })];

        assert!(report(records.clone(), Some(vec![signer.clone()])).is_verified());
        assert!(!report(records, Some(vec![other])).is_verified());
        // an empty allow-list trusts nobody
        let records = vec![record(SignatureOutcome::Valid { by: signer })];
        assert!(!report(records, Some(vec![])).is_verified());
    }
}
