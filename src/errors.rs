use snafu::{Backtrace, Snafu};

use crate::buffer::Phase;

pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// Why an elected decryption could not be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionFailure {
    /// Decryption was elected, but neither keys nor passwords were supplied.
    NoCredentials,
    /// Every supplied key and password was tried, none produced a session key.
    AllCredentialsRejected,
}

/// Error types
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("malformed message: {message}"))]
    MalformedMessage { message: String },
    #[snafu(display("malformed cleartext message: {message}"))]
    MalformedCleartextMessage { message: String },
    #[snafu(display("decryption failed: {reason:?}"))]
    DecryptionFailed { reason: DecryptionFailure },
    #[snafu(display("message is encrypted, but no decryption method was elected"))]
    NoDecryptionMethod,
    #[snafu(display("message nesting exceeds the limit of {limit} layers"))]
    ExcessiveNesting { limit: usize },
    #[snafu(display("buffer is in phase {actual:?}, operation requires {expected:?}"))]
    BufferPhase { expected: Phase, actual: Phase },
    #[snafu(display("verification report is not available before the stream is closed"))]
    StreamNotClosed,
    #[snafu(transparent)]
    Pgp { source: pgp::errors::Error },
    #[snafu(transparent)]
    IO {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedMessage {
            message: message.into(),
        }
    }

    pub(crate) fn malformed_cleartext(message: impl Into<String>) -> Self {
        Error::MalformedCleartextMessage {
            message: message.into(),
        }
    }
}
