//! Shared chunked programming policy

use std::borrow::Cow;

use log::trace;

use crate::dap::WORD_SIZE;
use crate::error::{Error, Result};

/// Value of an erased flash byte
pub const ERASED: u8 = 0xFF;

/// Controller primitives a family supplies to [`program_chunks`]
pub trait ChunkProgrammer {
    /// Size in bytes of one program unit (page, row or write block)
    fn program_unit(&self) -> usize;

    /// Start writing one full program unit at `addr`
    fn write_chunk(&mut self, addr: u32, chunk: &[u8]) -> Result<()>;

    /// Block until the controller has finished the write at `addr`
    fn wait_ready(&mut self, addr: u32) -> Result<()>;

    /// Read `len` bytes back from `addr`
    fn read_back(&mut self, addr: u32, len: usize) -> Result<Vec<u8>>;
}

/// Outcome of a [`program_chunks`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramStats {
    /// Chunks written to the bus
    pub written: usize,
    /// Blank chunks that were skipped
    pub skipped: usize,
}

/// True if every byte reads as erased flash
pub fn is_erased(data: &[u8]) -> bool {
    data.iter().all(|&b| b == ERASED)
}

/// Right-pad `chunk` with erased bytes to `unit` bytes
pub fn pad_chunk(chunk: &[u8], unit: usize) -> Cow<'_, [u8]> {
    if chunk.len() >= unit {
        Cow::Borrowed(chunk)
    } else {
        let mut padded = chunk.to_vec();
        padded.resize(unit, ERASED);
        Cow::Owned(padded)
    }
}

/// Fail unless `addr` is a multiple of `align`
pub fn check_aligned(addr: u32, align: u32) -> Result<()> {
    if addr % align != 0 {
        return Err(Error::Misaligned { addr, align });
    }
    Ok(())
}

/// Compare `expected` against `found`, reporting the first mismatch
///
/// Only the first `expected.len()` bytes of `found` are examined.
pub fn compare(addr: u32, expected: &[u8], found: &[u8]) -> Result<()> {
    for (i, &want) in expected.iter().enumerate() {
        let got = found.get(i).copied();
        if got != Some(want) {
            return Err(Error::Verify {
                addr: addr.wrapping_add(i as u32),
                expected: want,
                found: got.unwrap_or(ERASED),
            });
        }
    }
    Ok(())
}

/// Program `buf` at `addr` one program unit at a time
///
/// The final chunk is padded with 0xFF, chunks that are entirely 0xFF are
/// skipped, and every written chunk is waited on and optionally read back
/// before the next one starts. `addr` must be word aligned; a misaligned
/// address fails before any bus traffic.
pub fn program_chunks<C>(target: &mut C, addr: u32, buf: &[u8], verify: bool) -> Result<ProgramStats>
where
    C: ChunkProgrammer + ?Sized,
{
    check_aligned(addr, WORD_SIZE)?;

    let unit = target.program_unit();
    let mut stats = ProgramStats::default();

    for (index, chunk) in buf.chunks(unit).enumerate() {
        let chunk_addr = addr.wrapping_add((index * unit) as u32);
        let data = pad_chunk(chunk, unit);

        if is_erased(&data) {
            trace!("chunk 0x{:08X} is blank, skipping", chunk_addr);
            stats.skipped += 1;
            continue;
        }

        target.write_chunk(chunk_addr, &data)?;
        target.wait_ready(chunk_addr)?;

        if verify {
            let readback = target.read_back(chunk_addr, unit)?;
            compare(chunk_addr, &data, &readback)?;
        }
        stats.written += 1;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory programmer that records every primitive call
    struct MockProgrammer {
        unit: usize,
        memory: Vec<u8>,
        writes: Vec<(u32, Vec<u8>)>,
        waits: Vec<u32>,
        reads: Vec<u32>,
        /// Bit mask ANDed into every byte written, to model a stuck bit
        stuck_mask: u8,
        /// Controller never reports ready
        never_ready: bool,
    }

    impl MockProgrammer {
        fn new(unit: usize, size: usize) -> Self {
            Self {
                unit,
                memory: vec![ERASED; size],
                writes: Vec::new(),
                waits: Vec::new(),
                reads: Vec::new(),
                stuck_mask: 0xFF,
                never_ready: false,
            }
        }
    }

    impl ChunkProgrammer for MockProgrammer {
        fn program_unit(&self) -> usize {
            self.unit
        }

        fn write_chunk(&mut self, addr: u32, chunk: &[u8]) -> Result<()> {
            let start = addr as usize;
            for (dst, src) in self.memory[start..start + chunk.len()].iter_mut().zip(chunk) {
                *dst &= *src & self.stuck_mask;
            }
            self.writes.push((addr, chunk.to_vec()));
            Ok(())
        }

        fn wait_ready(&mut self, addr: u32) -> Result<()> {
            self.waits.push(addr);
            if self.never_ready {
                return Err(Error::Timeout {
                    operation: "flash ready",
                    addr,
                });
            }
            Ok(())
        }

        fn read_back(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
            self.reads.push(addr);
            let start = addr as usize;
            Ok(self.memory[start..start + len].to_vec())
        }
    }

    #[test]
    fn test_final_chunk_padded_with_erased_bytes() {
        for unit in [64usize, 256, 512, 1024] {
            let mut mock = MockProgrammer::new(unit, 4 * unit);
            let buf: Vec<u8> = (0..unit + 5).map(|i| (i % 251) as u8).collect();

            program_chunks(&mut mock, 0, &buf, true).unwrap();

            assert_eq!(mock.writes.len(), 2);
            let (addr, last) = &mock.writes[1];
            assert_eq!(*addr as usize, unit);
            assert_eq!(last.len(), unit);
            assert_eq!(&last[..5], &buf[unit..]);
            assert!(last[5..].iter().all(|&b| b == ERASED));
        }
    }

    #[test]
    fn test_blank_chunks_skipped() {
        let mut mock = MockProgrammer::new(256, 1024);
        let mut buf = vec![ERASED; 768];
        buf[600] = 0x00;

        let stats = program_chunks(&mut mock, 0, &buf, true).unwrap();

        assert_eq!(stats, ProgramStats { written: 1, skipped: 2 });
        assert_eq!(mock.writes.len(), 1);
        assert_eq!(mock.writes[0].0, 512);
        assert_eq!(mock.waits, vec![512]);
    }

    #[test]
    fn test_round_trip_matches_padded_buffer() {
        let mut mock = MockProgrammer::new(256, 2048);
        let buf: Vec<u8> = (0..700u32).map(|i| (i * 7) as u8).collect();

        program_chunks(&mut mock, 0x400, &buf, true).unwrap();

        assert_eq!(&mock.memory[0x400..0x400 + buf.len()], &buf[..]);
        assert!(mock.memory[0x400 + buf.len()..0x400 + 768]
            .iter()
            .all(|&b| b == ERASED));
        assert_eq!(mock.reads, vec![0x400, 0x500, 0x600]);
    }

    #[test]
    fn test_misaligned_address_rejected_before_writes() {
        let mut mock = MockProgrammer::new(64, 256);
        let result = program_chunks(&mut mock, 2, &[0u8; 8], true);
        assert!(matches!(result, Err(Error::Misaligned { addr: 2, align: 4 })));
        assert!(mock.writes.is_empty());
    }

    #[test]
    fn test_verify_mismatch_reports_address() {
        let mut mock = MockProgrammer::new(64, 256);
        mock.stuck_mask = 0xFE;
        let buf = vec![0x55u8; 64];

        match program_chunks(&mut mock, 64, &buf, true) {
            Err(Error::Verify {
                addr,
                expected,
                found,
            }) => {
                assert_eq!(addr, 64);
                assert_eq!(expected, 0x55);
                assert_eq!(found, 0x54);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_ready_timeout_stops_after_first_chunk() {
        let mut mock = MockProgrammer::new(64, 256);
        mock.never_ready = true;

        let result = program_chunks(&mut mock, 0, &[0u8; 192], true);

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(mock.writes.len(), 1);
        assert_eq!(mock.waits, vec![0]);
        assert!(mock.reads.is_empty());
    }

    #[test]
    fn test_no_readback_without_verify() {
        let mut mock = MockProgrammer::new(64, 256);
        program_chunks(&mut mock, 0, &[0u8; 128], false).unwrap();
        assert!(mock.reads.is_empty());
        assert_eq!(mock.waits, vec![0, 64]);
    }

    #[test]
    fn test_compare_short_read() {
        assert!(compare(0, &[1, 2], &[1, 2, 3]).is_ok());
        assert!(matches!(
            compare(0x10, &[1, 2], &[1]),
            Err(Error::Verify { addr: 0x11, .. })
        ));
    }
}
