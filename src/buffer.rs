//! Multi-pass content buffers.
//!
//! Cleartext signed messages have to be traversed twice: once to strip the
//! dash-escaping and collect the trailing signatures, and once to hand the
//! recovered text back to the caller. The buffer captures the text during the
//! first pass and replays it during the second.

use std::fmt::Debug;
use std::io::{Read, Seek, SeekFrom, Write};

use tempfile::SpooledTempFile;

use crate::errors::{BufferPhaseSnafu, Result};

/// Default number of bytes a [`SpoolBuffer`] keeps in memory before
/// spilling to a temporary file.
pub const DEFAULT_SPOOL_THRESHOLD: usize = 1024 * 1024;

/// Lifecycle phase of a multi-pass buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting writes from the first pass.
    Writing,
    /// First pass complete, rewound, no bytes consumed yet.
    Sealed,
    /// Second pass in progress.
    Reading,
}

/// Captures one pass worth of content and replays it exactly once.
///
/// Writes are only legal before [`seal`](MultiPass::seal), reads only after.
/// [`reset`](MultiPass::reset) discards all content and returns the buffer to
/// the writing phase, so a single buffer can be reused across messages.
pub trait MultiPass: Debug + Send {
    /// Current lifecycle phase.
    fn phase(&self) -> Phase;

    /// Appends `data` to the captured content. Fails unless writing.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Ends the writing phase and rewinds for replay.
    fn seal(&mut self) -> Result<()>;

    /// Reads the next chunk of the captured content. Fails while writing.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Discards all content and starts a fresh writing phase.
    fn reset(&mut self) -> Result<()>;
}

fn ensure_phase(expected: Phase, actual: Phase) -> Result<()> {
    snafu::ensure!(expected == actual, BufferPhaseSnafu { expected, actual });
    Ok(())
}

/// Keeps the whole first pass in memory.
#[derive(Debug)]
pub struct MemoryBuffer {
    data: Vec<u8>,
    pos: usize,
    phase: Phase,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        MemoryBuffer {
            data: Vec::new(),
            pos: 0,
            phase: Phase::Writing,
        }
    }
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiPass for MemoryBuffer {
    fn phase(&self) -> Phase {
        self.phase
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        ensure_phase(Phase::Writing, self.phase)?;
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn seal(&mut self) -> Result<()> {
        ensure_phase(Phase::Writing, self.phase)?;
        self.pos = 0;
        self.phase = Phase::Sealed;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.phase == Phase::Writing {
            return BufferPhaseSnafu {
                expected: Phase::Sealed,
                actual: Phase::Writing,
            }
            .fail();
        }
        self.phase = Phase::Reading;
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn reset(&mut self) -> Result<()> {
        self.data.clear();
        self.pos = 0;
        self.phase = Phase::Writing;
        Ok(())
    }
}

/// Buffers in memory up to a threshold, then spills to an unnamed
/// temporary file. Suitable for inputs larger than available memory.
pub struct SpoolBuffer {
    spool: SpooledTempFile,
    threshold: usize,
    phase: Phase,
}

impl SpoolBuffer {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_SPOOL_THRESHOLD)
    }

    /// Spills to disk once more than `threshold` bytes have been written.
    pub fn with_threshold(threshold: usize) -> Self {
        SpoolBuffer {
            spool: SpooledTempFile::new(threshold),
            threshold,
            phase: Phase::Writing,
        }
    }
}

impl Default for SpoolBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SpoolBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoolBuffer")
            .field("threshold", &self.threshold)
            .field("phase", &self.phase)
            .finish()
    }
}

impl MultiPass for SpoolBuffer {
    fn phase(&self) -> Phase {
        self.phase
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        ensure_phase(Phase::Writing, self.phase)?;
        self.spool.write_all(data)?;
        Ok(())
    }

    fn seal(&mut self) -> Result<()> {
        ensure_phase(Phase::Writing, self.phase)?;
        self.spool.flush()?;
        self.spool.seek(SeekFrom::Start(0))?;
        self.phase = Phase::Sealed;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.phase == Phase::Writing {
            return BufferPhaseSnafu {
                expected: Phase::Sealed,
                actual: Phase::Writing,
            }
            .fail();
        }
        self.phase = Phase::Reading;
        let n = Read::read(&mut self.spool, buf)?;
        Ok(n)
    }

    fn reset(&mut self) -> Result<()> {
        self.spool = SpooledTempFile::new(self.threshold);
        self.phase = Phase::Writing;
        Ok(())
    }
}
