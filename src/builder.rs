//! Staged construction of a [`DecryptionStream`].
//!
//! The stages force every caller to make the security relevant choices
//! explicit before a stream exists: whether to decrypt and with what, whether
//! to verify and against which certificates, and what to do about signatures
//! whose certificate is missing.
//!
//! ```no_run
//! use pgp_pipeline::{DecryptionKeys, Pipeline};
//!
//! # fn main() -> pgp_pipeline::errors::Result<()> {
//! # let (secret_key, sender_cert) = unimplemented!();
//! let mut stream = Pipeline::from_file("message.asc")?
//!     .decrypt_with(DecryptionKeys::new().key(secret_key))
//!     .verify_with([sender_cert])
//!     .ignore_missing_certs()
//!     .build()?;
//! # Ok(()) }
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::Path;

use bytes::Bytes;
use pgp::types::{Fingerprint, KeyId};
use pgp::{SignedPublicKey, StandaloneSignature};

use crate::buffer::MultiPass;
use crate::errors::Result;
use crate::options::{DecryptionKeys, Options};
use crate::stream::DecryptionStream;

/// Entry point of the staged builder.
#[derive(Debug)]
pub struct Pipeline;

impl Pipeline {
    pub fn from_reader<R: Read>(source: R) -> InputStage<BufReader<R>> {
        InputStage {
            source: BufReader::new(source),
            opts: Options::default(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> InputStage<Cursor<Bytes>> {
        InputStage {
            source: Cursor::new(bytes.into()),
            opts: Options::default(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<InputStage<BufReader<File>>> {
        Ok(InputStage {
            source: BufReader::new(File::open(path)?),
            opts: Options::default(),
        })
    }
}

/// Input selected. Decide whether to decrypt.
#[derive(Debug)]
pub struct InputStage<R> {
    source: R,
    opts: Options,
}

impl<R: BufRead> InputStage<R> {
    /// Replaces the default in-memory multi-pass buffer, e.g. with a
    /// [`SpoolBuffer`](crate::SpoolBuffer) for large cleartext messages.
    pub fn buffer(mut self, buffer: impl MultiPass + 'static) -> Self {
        self.opts.buffer = Box::new(buffer);
        self
    }

    /// Overrides the nesting limit of
    /// [`MAX_NESTING_DEPTH`](crate::options::MAX_NESTING_DEPTH) layers.
    pub fn max_nesting(mut self, limit: usize) -> Self {
        self.opts.max_nesting = limit;
        self
    }

    /// Offers secret keys and message passwords for encrypted layers.
    pub fn decrypt_with(mut self, keys: DecryptionKeys) -> DecryptStage<R> {
        self.opts.decrypt = true;
        self.opts.keys = keys.keys;
        self.opts.passwords = keys.passwords;
        DecryptStage {
            source: self.source,
            opts: self.opts,
        }
    }

    /// Declines decryption. Building fails on encrypted messages.
    pub fn no_decryption(self) -> DecryptStage<R> {
        DecryptStage {
            source: self.source,
            opts: self.opts,
        }
    }
}

/// Decryption decided. Decide whether to verify.
#[derive(Debug)]
pub struct DecryptStage<R> {
    source: R,
    opts: Options,
}

impl<R: BufRead> DecryptStage<R> {
    /// Verifies signatures against these certificates.
    pub fn verify_with(mut self, certs: impl IntoIterator<Item = SignedPublicKey>) -> VerifyStage<R> {
        self.opts.certificates.extend(certs);
        VerifyStage {
            source: self.source,
            opts: self.opts,
        }
    }

    /// Verifies the content against detached signatures.
    pub fn verify_detached(
        mut self,
        signatures: impl IntoIterator<Item = StandaloneSignature>,
    ) -> VerifyStage<R> {
        self.opts.detached_signatures.extend(signatures);
        VerifyStage {
            source: self.source,
            opts: self.opts,
        }
    }

    /// Skips verification. Signatures the message carries are still listed
    /// in the report, but no certificates are available to check them.
    pub fn no_verification(self) -> BuildStage<R> {
        BuildStage {
            source: self.source,
            opts: self.opts,
        }
    }
}

/// Verification elected. Decide how to treat missing certificates.
#[derive(Debug)]
pub struct VerifyStage<R> {
    source: R,
    opts: Options,
}

impl<R: BufRead> VerifyStage<R> {
    /// Adds further certificates.
    pub fn and_verify_with(mut self, certs: impl IntoIterator<Item = SignedPublicKey>) -> Self {
        self.opts.certificates.extend(certs);
        self
    }

    /// Adds detached signatures to check the content against.
    pub fn verify_detached(
        mut self,
        signatures: impl IntoIterator<Item = StandaloneSignature>,
    ) -> Self {
        self.opts.detached_signatures.extend(signatures);
        self
    }

    /// Only signatures by these keys count towards
    /// [`is_verified`](crate::VerificationReport::is_verified).
    pub fn trusted_fingerprints(
        mut self,
        fingerprints: impl IntoIterator<Item = Fingerprint>,
    ) -> Self {
        self.opts
            .trusted_fingerprints
            .get_or_insert_with(Vec::new)
            .extend(fingerprints);
        self
    }

    /// Consults `callback` for certificates no supplied one matched.
    pub fn resolve_missing_with(
        mut self,
        callback: impl FnMut(&KeyId) -> Option<SignedPublicKey> + Send + 'static,
    ) -> BuildStage<R> {
        self.opts.missing_cert_callback = Some(Box::new(callback));
        BuildStage {
            source: self.source,
            opts: self.opts,
        }
    }

    /// Leaves signatures without a matching certificate unresolved.
    pub fn ignore_missing_certs(self) -> BuildStage<R> {
        BuildStage {
            source: self.source,
            opts: self.opts,
        }
    }
}

/// All choices made. Build the stream.
#[derive(Debug)]
pub struct BuildStage<R> {
    source: R,
    opts: Options,
}

impl<R: BufRead> BuildStage<R> {
    /// Decodes the message structure and returns the plaintext stream.
    ///
    /// Structural problems surface here: unparseable input, an encrypted
    /// message without elected decryption, failed decryption, or excessive
    /// nesting.
    pub fn build(self) -> Result<DecryptionStream> {
        DecryptionStream::new(self.source, self.opts)
    }
}
