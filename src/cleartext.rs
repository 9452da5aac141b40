//! Cleartext signature framework (RFC 9580, section 7) normalization.
//!
//! A cleartext signed message carries the human readable text and its
//! signatures in one document:
//!
//! ```text
//! -----BEGIN PGP SIGNED MESSAGE-----
//! Hash: SHA256
//!
//! <dash-escaped text>
//! -----BEGIN PGP SIGNATURE-----
//! ...
//! -----END PGP SIGNATURE-----
//! ```
//!
//! [`split_cleartext`] strips the framing, undoes the dash-escaping and
//! captures the exact signed text in a multi-pass buffer, so the caller can
//! read it back while the trailing signatures are checked against it.

use std::io::{BufRead, Cursor};

use log::debug;
use pgp::{Deserializable, StandaloneSignature};

use crate::buffer::MultiPass;
use crate::errors::{Error, Result};

pub(crate) const HEADER_LINE: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const SIGNATURE_LINE: &str = "-----BEGIN PGP SIGNATURE-----";

/// The signatures and headers recovered from a cleartext signed message.
#[derive(Debug)]
pub struct CleartextSplit {
    /// Signatures from the trailing armor block, in order of appearance.
    pub signatures: Vec<StandaloneSignature>,
    /// Hash algorithm names announced in the `Hash:` headers.
    pub hash_headers: Vec<String>,
}

/// Splits a cleartext signed message into its text body and trailing
/// signatures.
///
/// The dash-unescaped body is written to `sink` byte for byte, preserving
/// the original line endings. The terminator of the last body line separates
/// the text from the armor and is not part of the signed content, so it is
/// not written. The sink is sealed before returning.
pub fn split_cleartext<R: BufRead>(
    mut input: R,
    sink: &mut dyn MultiPass,
) -> Result<CleartextSplit> {
    let Some(first) = read_line(&mut input)? else {
        return Err(Error::malformed_cleartext("empty input"));
    };
    if trim_line_end(&first) != HEADER_LINE.as_bytes() {
        return Err(Error::malformed_cleartext("missing signed message header"));
    }

    let hash_headers = read_hash_headers(&mut input)?;

    // Body lines, up to the start of the signature armor. The terminator of
    // each line is only written once the next line turns out to be body too.
    let mut terminator: Option<Vec<u8>> = None;
    let signature_line = loop {
        let Some(raw) = read_line(&mut input)? else {
            return Err(Error::malformed_cleartext("missing signature block"));
        };
        let content = trim_line_end(&raw);
        if content == SIGNATURE_LINE.as_bytes() {
            break raw;
        }
        let unescaped = dash_unescape(content)?;
        if let Some(pending) = terminator.take() {
            sink.write_all(&pending)?;
        }
        sink.write_all(unescaped)?;
        terminator = Some(raw[content.len()..].to_vec());
    };
    sink.seal()?;

    // The dearmorer wants the whole block up front, so buffer the remainder
    // behind the already consumed armor header line.
    let mut block = signature_line;
    input.read_to_end(&mut block)?;
    let (iter, _headers) = StandaloneSignature::from_armor_many(Cursor::new(block))
        .map_err(|err| Error::malformed_cleartext(format!("invalid signature block: {err}")))?;
    let signatures = iter
        .collect::<pgp::errors::Result<Vec<_>>>()
        .map_err(|err| Error::malformed_cleartext(format!("invalid signature block: {err}")))?;

    debug!(
        "cleartext message with {} signatures ({:?})",
        signatures.len(),
        hash_headers
    );

    Ok(CleartextSplit {
        signatures,
        hash_headers,
    })
}

fn read_hash_headers<R: BufRead>(input: &mut R) -> Result<Vec<String>> {
    let mut hashes = Vec::new();
    loop {
        let Some(raw) = read_line(input)? else {
            return Err(Error::malformed_cleartext("unexpected end of headers"));
        };
        let content = trim_line_end(&raw);
        if content.is_empty() {
            return Ok(hashes);
        }
        let line = std::str::from_utf8(content)
            .map_err(|_| Error::malformed_cleartext("header is not valid utf-8"))?;
        // "Hash" is the only header the framework defines.
        let Some(values) = line.strip_prefix("Hash:") else {
            return Err(Error::malformed_cleartext(format!(
                "unsupported header: {line:?}"
            )));
        };
        for value in values.split(',') {
            hashes.push(value.trim().to_string());
        }
    }
}

/// Undoes one line of dash-escaping.
///
/// Anything still starting with a dash after unescaping would be ambiguous
/// with the armor framing and is rejected.
fn dash_unescape(line: &[u8]) -> Result<&[u8]> {
    if let Some(rest) = line.strip_prefix(b"- ") {
        return Ok(rest);
    }
    if line.first() == Some(&b'-') {
        return Err(Error::malformed_cleartext(
            "line starts with an unescaped dash",
        ));
    }
    Ok(line)
}

fn read_line<R: BufRead>(input: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let read = input.read_until(b'\n', &mut line)?;
    if read == 0 {
        Ok(None)
    } else {
        Ok(Some(line))
    }
}

/// Strips one trailing `\n` or `\r\n`.
fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::buffer::MemoryBuffer;

    fn split(input: &str) -> Result<CleartextSplit> {
        let mut sink = MemoryBuffer::new();
        split_cleartext(Cursor::new(input.as_bytes()), &mut sink)
    }

    #[test]
    fn rejects_missing_header() {
        let err = split("hello\n").unwrap_err();
        assert!(matches!(err, Error::MalformedCleartextMessage { .. }));
    }

    #[test]
    fn rejects_unknown_armor_headers() {
        let err = split("-----BEGIN PGP SIGNED MESSAGE-----\nCharset: utf-8\n\n").unwrap_err();
        assert!(matches!(err, Error::MalformedCleartextMessage { .. }));
    }

    #[test]
    fn rejects_unescaped_dash() {
        let err = split("-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\n--not escaped\n")
            .unwrap_err();
        assert!(matches!(err, Error::MalformedCleartextMessage { .. }));
    }

    #[test]
    fn rejects_truncated_message() {
        let err =
            split("-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\nbody text\n").unwrap_err();
        assert!(matches!(err, Error::MalformedCleartextMessage { .. }));
    }

    #[test]
    fn unescape_rules() {
        assert_eq!(dash_unescape(b"- - dashed").unwrap(), b"- dashed");
        assert_eq!(dash_unescape(b"plain").unwrap(), b"plain");
        assert_eq!(dash_unescape(b"").unwrap(), b"");
        assert!(dash_unescape(b"-solo").is_err());
    }

    #[test]
    fn line_end_trimming() {
        assert_eq!(trim_line_end(b"a\r\n"), b"a");
        assert_eq!(trim_line_end(b"a\n"), b"a");
        assert_eq!(trim_line_end(b"a"), b"a");
        assert_eq!(trim_line_end(b"\n"), b"");
    }

    #[test]
    fn hash_header_lists() {
        let mut input = Cursor::new(&b"Hash: SHA256, SHA512\nHash: SHA384\n\n"[..]);
        let hashes = read_hash_headers(&mut input).unwrap();
        assert_eq!(hashes, ["SHA256", "SHA512", "SHA384"]);
    }
}
