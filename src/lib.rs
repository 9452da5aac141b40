//! A staged decryption and verification pipeline for OpenPGP messages,
//! built on top of [rPGP](https://crates.io/crates/pgp).
//!
//! The pipeline consumes a message in any of its transport forms: binary
//! packets, ASCII armor, or the cleartext signature framework. It removes
//! encryption and compression layers, collects every signature it passes,
//! and hands the literal content back as a readable stream. Signatures are
//! resolved when the stream is closed, so content can never look verified
//! before it was read in full.
//!
//! ```no_run
//! use std::io::Read;
//!
//! use pgp_pipeline::{DecryptionKeys, Pipeline};
//!
//! # fn main() -> pgp_pipeline::Result<()> {
//! # let (secret_key, sender_cert) = unimplemented!();
//! let mut stream = Pipeline::from_file("message.asc")?
//!     .decrypt_with(DecryptionKeys::new().key(secret_key))
//!     .verify_with([sender_cert])
//!     .ignore_missing_certs()
//!     .build()?;
//!
//! let mut plaintext = Vec::new();
//! stream.read_to_end(&mut plaintext)?;
//! stream.close()?;
//!
//! if stream.report()?.is_verified() {
//!     // plaintext is authentic
//! }
//! # Ok(()) }
//! ```

pub mod buffer;
pub mod builder;
pub mod cleartext;
pub mod errors;
pub mod options;
pub mod report;
pub mod stream;

pub use crate::buffer::{MemoryBuffer, MultiPass, SpoolBuffer};
pub use crate::builder::Pipeline;
pub use crate::errors::{DecryptionFailure, Error, Result};
pub use crate::options::{DecryptionKeys, MissingCertCallback, Options, Passphrase};
pub use crate::report::{
    ContentEncoding, SignatureOutcome, SignatureRecord, VerificationReport,
};
pub use crate::stream::DecryptionStream;

// The key and signature types in the public API are rPGP's.
pub use pgp;
