//! The decoding and verification stream.
//!
//! [`DecryptionStream`] is produced by the [builder](crate::builder). On
//! construction the message structure is walked from the outside in: armor is
//! removed, encryption layers are decrypted, compression is undone and inline
//! signatures are collected, until the literal content is reached. The caller
//! then reads the plaintext through [`std::io::Read`], closes the stream and
//! picks up the [`VerificationReport`].
//!
//! Signatures are only checked once the content has been read to the end.
//! Closing early leaves them unresolved, so a partial read can never be
//! mistaken for verified content.

use std::borrow::Cow;
use std::io::{self, BufRead, Cursor, Read};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::line_writer::LineBreak;
use pgp::normalize_lines::Normalized;
use pgp::packet::{CompressedData, LiteralData, PublicKey, PublicSubkey, Signature, SignatureType};
use pgp::ser::Serialize;
use pgp::types::{CompressionAlgorithm, Fingerprint, KeyId, PublicKeyTrait};
use pgp::{Deserializable, Esk, Message, SignedPublicKey};

use crate::buffer::MultiPass;
use crate::cleartext::{split_cleartext, HEADER_LINE};
use crate::errors::{
    DecryptionFailedSnafu, DecryptionFailure, Error, ExcessiveNestingSnafu, NoDecryptionMethodSnafu,
    Result,
};
use crate::options::{MissingCertCallback, Options, Passphrase};
use crate::report::{ContentEncoding, SignatureOutcome, SignatureRecord, VerificationReport};

/// Where the recovered plaintext is read from.
enum Source {
    /// Literal data recovered from a (possibly encrypted) packet message.
    Literal(Cursor<Bytes>),
    /// Second pass over a multi-pass buffer, for cleartext signed messages.
    /// Consumed bytes are retained for signature checking.
    Replay {
        buffer: Box<dyn MultiPass>,
        collected: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
struct Meta {
    encrypted: bool,
    sym_algorithm: Option<SymmetricKeyAlgorithm>,
    compression: Option<CompressionAlgorithm>,
    encoding: ContentEncoding,
    file_name: Option<String>,
    modified: Option<DateTime<Utc>>,
}

/// Readable plaintext of a structurally decoded message.
///
/// Reading yields the literal content. [`close`](Self::close) resolves the
/// collected signatures and makes [`report`](Self::report) available.
pub struct DecryptionStream {
    source: Source,
    pending: Vec<Signature>,
    certificates: Vec<SignedPublicKey>,
    trusted_fingerprints: Option<Vec<Fingerprint>>,
    missing_cert_callback: Option<MissingCertCallback>,
    meta: Meta,
    cleartext: bool,
    fully_read: bool,
    report: Option<VerificationReport>,
}

impl DecryptionStream {
    /// Decodes the message structure down to its literal content.
    pub(crate) fn new<R: BufRead>(mut input: R, opts: Options) -> Result<Self> {
        let mut prefix = [0u8; 64];
        let filled = read_prefix(&mut input, &mut prefix)?;
        if filled == 0 {
            return Err(Error::malformed("empty input"));
        }
        let head = prefix[..filled].to_vec();
        let is_cleartext = head.starts_with(HEADER_LINE.as_bytes());
        let is_binary = head[0] & 0x80 != 0;
        let input = Cursor::new(head).chain(input);

        if is_cleartext {
            Self::from_cleartext(input, opts)
        } else if is_binary {
            let message =
                Message::from_bytes(input).map_err(|err| Error::malformed(err.to_string()))?;
            Self::from_message(message, opts)
        } else {
            let (message, _headers) = Message::from_armor_single(input)
                .map_err(|err| Error::malformed(err.to_string()))?;
            Self::from_message(message, opts)
        }
    }

    /// Normalizes a cleartext signed message into the multi-pass buffer and
    /// queues its trailing signatures.
    fn from_cleartext<R: BufRead>(input: R, mut opts: Options) -> Result<Self> {
        let split = split_cleartext(input, opts.buffer.as_mut())?;

        let mut pending: Vec<Signature> = split
            .signatures
            .into_iter()
            .map(|sig| sig.signature)
            .collect();
        pending.extend(
            opts.detached_signatures
                .drain(..)
                .map(|sig| sig.signature),
        );

        Ok(DecryptionStream {
            source: Source::Replay {
                buffer: opts.buffer,
                collected: Vec::new(),
            },
            pending,
            certificates: opts.certificates,
            trusted_fingerprints: opts.trusted_fingerprints,
            missing_cert_callback: opts.missing_cert_callback,
            meta: Meta {
                encrypted: false,
                sym_algorithm: None,
                compression: None,
                encoding: ContentEncoding::Text,
                file_name: None,
                modified: None,
            },
            cleartext: true,
            fully_read: false,
            report: None,
        })
    }

    /// Peels the packet layers of `message` until the literal data is
    /// reached, decrypting and decompressing along the way.
    fn from_message(mut message: Message, mut opts: Options) -> Result<Self> {
        let mut pending: Vec<Signature> = opts
            .detached_signatures
            .drain(..)
            .map(|sig| sig.signature)
            .collect();

        let mut encrypted = false;
        let mut sym_algorithm = None;
        let mut compression = None;

        let mut depth = 0;
        let literal = loop {
            snafu::ensure!(
                depth < opts.max_nesting,
                ExcessiveNestingSnafu {
                    limit: opts.max_nesting
                }
            );
            depth += 1;

            message = match message {
                Message::Literal(literal) => break literal,
                Message::Compressed(data) => {
                    if compression.is_none() {
                        compression = Some(compression_of(&data)?);
                    }
                    Message::Compressed(data).decompress()?
                }
                Message::Signed {
                    message: inner,
                    one_pass_signature: _,
                    signature,
                } => {
                    debug!("inline signature by {:?}", signature.issuer());
                    pending.push(signature);
                    match inner {
                        Some(inner) => *inner,
                        None => return Err(Error::malformed("signed layer without content")),
                    }
                }
                layer @ Message::Encrypted { .. } => {
                    encrypted = true;
                    snafu::ensure!(opts.decrypt, NoDecryptionMethodSnafu);
                    if sym_algorithm.is_none() {
                        sym_algorithm = sym_algorithm_hint(&layer);
                    }
                    decrypt_any(&layer, &opts.keys, &opts.passwords)?
                }
            };
        };

        let encoding = if literal.is_binary() {
            ContentEncoding::Binary
        } else {
            ContentEncoding::Text
        };
        let (file_name, modified) = literal_metadata(&literal)?;
        let data = Bytes::from(literal.data().to_vec());

        Ok(DecryptionStream {
            source: Source::Literal(Cursor::new(data)),
            pending,
            certificates: opts.certificates,
            trusted_fingerprints: opts.trusted_fingerprints,
            missing_cert_callback: opts.missing_cert_callback,
            meta: Meta {
                encrypted,
                sym_algorithm,
                compression,
                encoding,
                file_name,
                modified,
            },
            cleartext: false,
            fully_read: false,
            report: None,
        })
    }

    /// Resolves the collected signatures and seals the stream.
    ///
    /// Signatures are only checked when the content was read to the end;
    /// otherwise they are reported as unresolved, with a warning. Closing an
    /// already closed stream is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.report.is_some() {
            return Ok(());
        }

        let records = if self.fully_read {
            let content = match &self.source {
                Source::Literal(cursor) => cursor.get_ref().clone(),
                Source::Replay { collected, .. } => Bytes::from(collected.clone()),
            };
            self.pending
                .drain(..)
                .map(|sig| {
                    check_signature(
                        sig,
                        &mut self.certificates,
                        &mut self.missing_cert_callback,
                        &content,
                        self.cleartext,
                    )
                })
                .collect()
        } else {
            if !self.pending.is_empty() {
                warn!(
                    "stream closed before the content was fully read, {} signatures left unresolved",
                    self.pending.len()
                );
            }
            self.pending
                .drain(..)
                .map(|sig| signature_record(&sig, SignatureOutcome::CertificateUnavailable))
                .collect()
        };

        self.report = Some(VerificationReport {
            records,
            trusted_fingerprints: self.trusted_fingerprints.take(),
            encrypted: self.meta.encrypted,
            sym_algorithm: self.meta.sym_algorithm,
            compression: self.meta.compression,
            encoding: self.meta.encoding,
            file_name: self.meta.file_name.take(),
            modified: self.meta.modified,
        });
        Ok(())
    }

    /// The verification report. Only available once the stream was closed.
    pub fn report(&self) -> Result<&VerificationReport> {
        self.report.as_ref().ok_or(Error::StreamNotClosed)
    }

    /// Closes the stream and hands the report over.
    pub fn into_report(mut self) -> Result<VerificationReport> {
        self.close()?;
        Ok(self.report.expect("closed above"))
    }
}

impl Read for DecryptionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // an empty buffer reads nothing and says nothing about exhaustion
        if buf.is_empty() || self.report.is_some() {
            return Ok(0);
        }
        let read = match &mut self.source {
            Source::Literal(cursor) => {
                let read = cursor.read(buf)?;
                if cursor.position() >= cursor.get_ref().len() as u64 {
                    self.fully_read = true;
                }
                read
            }
            Source::Replay { buffer, collected } => {
                let read = buffer.read(buf).map_err(io::Error::other)?;
                collected.extend_from_slice(&buf[..read]);
                read
            }
        };
        if read == 0 {
            self.fully_read = true;
        }
        Ok(read)
    }
}

impl std::fmt::Debug for DecryptionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionStream")
            .field("pending", &self.pending.len())
            .field("certificates", &self.certificates.len())
            .field("fully_read", &self.fully_read)
            .field("closed", &self.report.is_some())
            .finish()
    }
}

fn read_prefix<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = input.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

/// The symmetric algorithm is only recoverable without decrypting when a
/// password protected session key announces it.
fn sym_algorithm_hint(message: &Message) -> Option<SymmetricKeyAlgorithm> {
    let Message::Encrypted { esk, .. } = message else {
        return None;
    };
    esk.iter().find_map(|esk| match esk {
        Esk::SymKeyEncryptedSessionKey(skesk) => Some(skesk.sym_algorithm()),
        _ => None,
    })
}

/// Captures the first bytes written through it and discards the rest. Lets
/// the packet serializer reveal header fields that have no accessors.
struct HeadCapture {
    head: Vec<u8>,
    limit: usize,
}

impl HeadCapture {
    fn new(limit: usize) -> Self {
        HeadCapture {
            head: Vec::with_capacity(limit),
            limit,
        }
    }
}

impl io::Write for HeadCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.limit - self.head.len();
        if room > 0 {
            let take = room.min(buf.len());
            self.head.extend_from_slice(&buf[..take]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The compression algorithm, read from the first octet of the serialized
/// packet body.
fn compression_of(data: &CompressedData) -> Result<CompressionAlgorithm> {
    let mut capture = HeadCapture::new(1);
    data.to_writer(&mut capture)?;
    let alg = capture
        .head
        .first()
        .copied()
        .ok_or_else(|| Error::malformed("empty compressed packet"))?;
    Ok(CompressionAlgorithm::from(alg))
}

/// File name and modification time of a literal data packet, read from its
/// serialized header: one mode octet, a length prefixed file name and a four
/// octet timestamp.
fn literal_metadata(literal: &LiteralData) -> Result<(Option<String>, Option<DateTime<Utc>>)> {
    const MAX_HEADER: usize = 2 + u8::MAX as usize + 4;
    let mut capture = HeadCapture::new(MAX_HEADER);
    literal.to_writer(&mut capture)?;
    let head = &capture.head;

    if head.len() < 2 {
        return Err(Error::malformed("truncated literal packet"));
    }
    let name_len = head[1] as usize;
    if head.len() < 2 + name_len + 4 {
        return Err(Error::malformed("truncated literal packet"));
    }
    let name = &head[2..2 + name_len];
    let mut timestamp = [0u8; 4];
    timestamp.copy_from_slice(&head[2 + name_len..2 + name_len + 4]);
    let timestamp = u32::from_be_bytes(timestamp);

    let file_name = (!name.is_empty()).then(|| String::from_utf8_lossy(name).into_owned());
    let modified = if timestamp != 0 {
        DateTime::from_timestamp(i64::from(timestamp), 0)
    } else {
        None
    };
    Ok((file_name, modified))
}

/// The signed text of a cleartext message: every line stripped of trailing
/// spaces and tabs, line endings normalized to CRLF.
fn trim_signed_text(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());
    for (i, line) in content.split(|&b| b == b'\n').enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\r\n");
        }
        let end = line
            .iter()
            .rposition(|&b| b != b' ' && b != b'\t' && b != b'\r')
            .map_or(0, |pos| pos + 1);
        out.extend_from_slice(&line[..end]);
    }
    out
}

/// Tries every supplied secret key, then every message password.
fn decrypt_any(
    message: &Message,
    keys: &[(pgp::SignedSecretKey, Passphrase)],
    passwords: &[Passphrase],
) -> Result<Message> {
    if keys.is_empty() && passwords.is_empty() {
        return DecryptionFailedSnafu {
            reason: DecryptionFailure::NoCredentials,
        }
        .fail();
    }

    for (key, pw) in keys {
        let pw = pw.clone();
        match message.decrypt(move || pw.provide(), &[key]) {
            Ok((inner, _session_key_ids)) => return Ok(inner),
            Err(err) => debug!("secret key did not unlock the message: {err}"),
        }
    }
    for pw in passwords {
        let pw = pw.clone();
        match message.decrypt_with_password(move || pw.provide()) {
            Ok(inner) => return Ok(inner),
            Err(err) => debug!("message password rejected: {err}"),
        }
    }

    DecryptionFailedSnafu {
        reason: DecryptionFailure::AllCredentialsRejected,
    }
    .fail()
}

#[derive(Clone, Copy)]
enum SignerKey<'a> {
    Primary(&'a PublicKey),
    Subkey(&'a PublicSubkey),
}

impl SignerKey<'_> {
    fn fingerprint(&self) -> Fingerprint {
        match self {
            SignerKey::Primary(key) => key.fingerprint(),
            SignerKey::Subkey(key) => key.fingerprint(),
        }
    }

    fn verify(&self, sig: &Signature, content: &[u8]) -> pgp::errors::Result<()> {
        match *self {
            SignerKey::Primary(key) => sig.verify(key, content),
            SignerKey::Subkey(key) => sig.verify(key, content),
        }
    }
}

fn key_matches(key: &impl PublicKeyTrait, ids: &[KeyId], fps: &[Fingerprint]) -> bool {
    fps.iter().any(|fp| &key.fingerprint() == fp) || ids.iter().any(|id| &key.key_id() == id)
}

/// All keys the signature may have been made with. Without issuer
/// information every key is a candidate.
fn candidate_keys<'a>(
    certificates: &'a [SignedPublicKey],
    ids: &[KeyId],
    fps: &[Fingerprint],
) -> Vec<SignerKey<'a>> {
    let unconstrained = ids.is_empty() && fps.is_empty();
    let mut candidates = Vec::new();
    for cert in certificates {
        if unconstrained || key_matches(&cert.primary_key, ids, fps) {
            candidates.push(SignerKey::Primary(&cert.primary_key));
        }
        for subkey in &cert.public_subkeys {
            if unconstrained || key_matches(&subkey.key, ids, fps) {
                candidates.push(SignerKey::Subkey(&subkey.key));
            }
        }
    }
    candidates
}

fn signature_record(sig: &Signature, outcome: SignatureOutcome) -> SignatureRecord {
    SignatureRecord {
        issuer: sig.issuer().first().map(|id| (*id).clone()),
        issuer_fingerprint: sig.issuer_fingerprint().first().map(|fp| (*fp).clone()),
        created: sig.created().cloned(),
        hash_alg: sig.config.hash_alg,
        outcome,
    }
}

fn check_signature(
    sig: Signature,
    certificates: &mut Vec<SignedPublicKey>,
    callback: &mut Option<MissingCertCallback>,
    content: &[u8],
    cleartext: bool,
) -> SignatureRecord {
    let ids: Vec<KeyId> = sig.issuer().into_iter().cloned().collect();
    let fps: Vec<Fingerprint> = sig.issuer_fingerprint().into_iter().cloned().collect();

    if let Some(id) = ids.first() {
        debug!("checking signature by key id {}", hex::encode(id));
    }

    // Give the caller a chance to supply the certificate we do not have.
    if candidate_keys(certificates, &ids, &fps).is_empty() {
        if let (Some(callback), Some(id)) = (callback.as_mut(), ids.first()) {
            if let Some(cert) = callback(id) {
                debug!("certificate for {id:?} supplied on demand");
                certificates.push(cert);
            }
        }
    }

    let candidates = candidate_keys(certificates, &ids, &fps);
    if candidates.is_empty() {
        return signature_record(&sig, SignatureOutcome::CertificateUnavailable);
    }

    // Text mode signatures are made over line-ending normalized content.
    // Normalizing is idempotent, so it is safe to do here in any case. For
    // cleartext signed messages trailing spaces and tabs are not part of the
    // signed text either (RFC 9580, section 7.1), while the plaintext handed
    // to the caller keeps them.
    let content: Cow<'_, [u8]> = if sig.config.typ == SignatureType::Text {
        if cleartext {
            trim_signed_text(content).into()
        } else {
            Normalized::new(content.iter().copied(), LineBreak::Crlf)
                .collect::<Vec<u8>>()
                .into()
        }
    } else {
        content.into()
    };

    for key in candidates {
        match key.verify(&sig, &content) {
            Ok(()) => {
                return signature_record(
                    &sig,
                    SignatureOutcome::Valid {
                        by: key.fingerprint(),
                    },
                );
            }
            Err(err) => debug!("signature did not verify: {err}"),
        }
    }
    signature_record(&sig, SignatureOutcome::Invalid)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn signed_text_trimming() {
        assert_eq!(trim_signed_text(b"plain\r\nlines\r\n"), b"plain\r\nlines\r\n");
        assert_eq!(trim_signed_text(b"spaces   \ntab\t\nkeep"), b"spaces\r\ntab\r\nkeep");
        assert_eq!(trim_signed_text(b"inner   space\n"), b"inner   space\r\n");
        assert_eq!(trim_signed_text(b"end   "), b"end");
        assert_eq!(trim_signed_text(b""), b"");
    }

    #[test]
    fn literal_header_recovery() {
        let literal = LiteralData::from_bytes("notes.txt".into(), b"content");
        let (file_name, _modified) = literal_metadata(&literal).unwrap();
        assert_eq!(file_name.as_deref(), Some("notes.txt"));

        let literal = LiteralData::from_bytes("".into(), b"content");
        let (file_name, _modified) = literal_metadata(&literal).unwrap();
        assert_eq!(file_name, None);
    }
}
