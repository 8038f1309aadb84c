//! Firmware image ingestion
//!
//! Both writers stream the image in 1 KiB windows through
//! [`FlashTarget::program_flash`] (or [`FlashTarget::verify_flash`] in
//! verify-only mode) and report each window to an [`ImageProgress`].

mod binary;
mod hex;

use std::time::{Duration, Instant};

pub use binary::write_binary;
pub use hex::{write_hex, HexChunk, HexChunks};

use crate::error::{Error, Result};
use crate::flash::FlashTarget;

/// Bytes handed to the flash target per call
pub const BLOCK_SIZE: usize = 1024;

/// What to do with each chunk of the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageMode {
    /// Write and (optionally) read back
    #[default]
    Program,
    /// Only compare the image against flash
    VerifyOnly,
}

/// Options shared by both image writers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    /// Program or verify only
    pub mode: ImageMode,
    /// Read back each chunk after programming it
    pub verify: bool,
    /// Reject HEX records whose length or checksum is off instead of
    /// decoding them by their byte count
    pub strict_hex: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            mode: ImageMode::Program,
            verify: true,
            strict_hex: false,
        }
    }
}

/// Progress of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    /// 0-based chunk index
    pub index: usize,
    /// Chunk start address
    pub addr: u32,
    /// Bytes in the chunk
    pub len: usize,
    /// Time spent on this chunk
    pub elapsed: Duration,
}

/// Summary of a finished image transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageStats {
    /// Chunks processed
    pub chunks: usize,
    /// Bytes processed
    pub bytes: usize,
    /// Total time
    pub elapsed: Duration,
}

/// Callback for progress reporting during image transfers
pub trait ImageProgress {
    /// Called once before the first chunk
    fn started(&mut self, mode: ImageMode);

    /// Called after each chunk completes
    fn chunk(&mut self, progress: &ChunkProgress);

    /// Called when the whole image is done
    fn finished(&mut self, stats: &ImageStats);
}

/// A no-op progress reporter
pub struct NoProgress;

impl ImageProgress for NoProgress {
    fn started(&mut self, _mode: ImageMode) {}
    fn chunk(&mut self, _progress: &ChunkProgress) {}
    fn finished(&mut self, _stats: &ImageStats) {}
}

/// Drives chunks into a target and keeps the running totals
struct ChunkSink<'t, 'p, T: ?Sized, R: ?Sized> {
    target: &'t mut T,
    progress: &'p mut R,
    options: ImageOptions,
    stats: ImageStats,
    started: Instant,
}

impl<'t, 'p, T, R> ChunkSink<'t, 'p, T, R>
where
    T: FlashTarget + ?Sized,
    R: ImageProgress + ?Sized,
{
    fn new(target: &'t mut T, progress: &'p mut R, options: ImageOptions) -> Self {
        progress.started(options.mode);
        Self {
            target,
            progress,
            options,
            stats: ImageStats::default(),
            started: Instant::now(),
        }
    }

    fn push(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let start = Instant::now();
        let result = match self.options.mode {
            ImageMode::Program => self.target.program_flash(addr, data, self.options.verify),
            ImageMode::VerifyOnly => self.target.verify_flash(addr, data),
        };
        result.map_err(|e| Error::ChunkFailed {
            addr,
            source: Box::new(e),
        })?;

        self.progress.chunk(&ChunkProgress {
            index: self.stats.chunks,
            addr,
            len: data.len(),
            elapsed: start.elapsed(),
        });
        self.stats.chunks += 1;
        self.stats.bytes += data.len();
        Ok(())
    }

    fn finish(mut self) -> ImageStats {
        self.stats.elapsed = self.started.elapsed();
        self.progress.finished(&self.stats);
        self.stats
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Flash target double shared by the image writer tests

    use super::*;
    use crate::device::DeviceInfo;
    use crate::family::Family;
    use crate::flash::{compare, TargetState};

    /// Records every program call into a sparse 64 KiB memory
    pub struct RecordingTarget {
        pub memory: Vec<u8>,
        pub programmed: Vec<(u32, Vec<u8>)>,
        pub verified: Vec<u32>,
        /// program_flash fails at this address
        pub fail_at: Option<u32>,
    }

    impl RecordingTarget {
        pub fn new() -> Self {
            Self {
                memory: vec![0xFF; 0x10000],
                programmed: Vec::new(),
                verified: Vec::new(),
                fail_at: None,
            }
        }
    }

    impl FlashTarget for RecordingTarget {
        fn family(&self) -> Family {
            Family::Nrf5x
        }
        fn state(&self) -> TargetState {
            TargetState::Selected
        }
        fn device(&self) -> Option<&DeviceInfo> {
            None
        }
        fn target_connect(&mut self, _clock_hz: u32) -> Result<()> {
            Ok(())
        }
        fn select(&mut self) -> Result<Option<DeviceInfo>> {
            Ok(None)
        }
        fn deselect(&mut self) -> Result<()> {
            Ok(())
        }
        fn erase(&mut self) -> Result<()> {
            Ok(())
        }
        fn program_start(&mut self, offset: u32, _size: u32) -> Result<u32> {
            Ok(offset)
        }
        fn program_flash(&mut self, addr: u32, buf: &[u8], _verify: bool) -> Result<()> {
            if self.fail_at == Some(addr) {
                return Err(Error::Timeout {
                    operation: "NVM ready",
                    addr: 0x4001_E400,
                });
            }
            let start = addr as usize;
            self.memory[start..start + buf.len()].copy_from_slice(buf);
            self.programmed.push((addr, buf.to_vec()));
            Ok(())
        }
        fn read_flash(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
            let start = addr as usize;
            Ok(self.memory[start..start + len].to_vec())
        }
        fn verify_flash(&mut self, addr: u32, expected: &[u8]) -> Result<()> {
            self.verified.push(addr);
            let actual = self.read_flash(addr, expected.len())?;
            compare(addr, expected, &actual)
        }
    }
}
