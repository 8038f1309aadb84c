//! Intel HEX decoder and writer
//!
//! Records are gathered into a 0xFF-filled window aligned to
//! [`BLOCK_SIZE`]. Whenever a data record lands outside the current window
//! the window is flushed as one [`HexChunk`] and a new window is started
//! at the record's address. Records that straddle a window boundary are
//! split across both windows.

use std::collections::VecDeque;
use std::io::{self, BufRead};

use ihex::Record;
use log::{debug, trace, warn};

use super::{ChunkSink, ImageOptions, ImageProgress, ImageStats, BLOCK_SIZE};
use crate::error::{ImageError, Result};
use crate::flash::{FlashTarget, ERASED};

/// A window of image data ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexChunk {
    /// Window start address (aligned to [`BLOCK_SIZE`])
    pub addr: u32,
    /// Window contents, 0xFF where no record supplied data
    pub data: Vec<u8>,
}

/// Accumulation window
struct HexWindow {
    base: u32,
    data: Vec<u8>,
    dirty: bool,
}

impl HexWindow {
    fn new() -> Self {
        Self {
            base: 0,
            data: vec![ERASED; BLOCK_SIZE],
            dirty: false,
        }
    }

    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < BLOCK_SIZE as u32
    }

    /// Take the window contents if anything was written to it
    fn take(&mut self) -> Option<HexChunk> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let data = std::mem::replace(&mut self.data, vec![ERASED; BLOCK_SIZE]);
        Some(HexChunk {
            addr: self.base,
            data,
        })
    }

    /// Copy `bytes` to `addr`, pushing any windows that fill up onto `out`
    fn place(&mut self, mut addr: u32, mut bytes: &[u8], out: &mut VecDeque<HexChunk>) {
        while !bytes.is_empty() {
            if !self.contains(addr) {
                out.extend(self.take());
                self.base = addr - addr % BLOCK_SIZE as u32;
            }
            let offset = (addr - self.base) as usize;
            let n = bytes.len().min(BLOCK_SIZE - offset);
            self.data[offset..offset + n].copy_from_slice(&bytes[..n]);
            self.dirty = true;
            addr = addr.wrapping_add(n as u32);
            bytes = &bytes[n..];
        }
    }
}

/// Lazy iterator of flash windows decoded from an Intel HEX stream
///
/// Lines that do not start with `:` are skipped. By default a record is
/// decoded by its byte count: trailing characters are ignored and a bad
/// checksum is only logged. [`HexChunks::strict`] instead rejects any record
/// whose length or checksum is off. Type 04 records set address bits 31:16,
/// type 03 is ignored and other non-data types are logged and ignored.
/// Decoding stops at the first end-of-file record; a stream without one is
/// flushed at end of input.
pub struct HexChunks<R> {
    lines: std::iter::Enumerate<io::Lines<R>>,
    window: HexWindow,
    ready: VecDeque<HexChunk>,
    upper: u32,
    strict: bool,
    done: bool,
}

impl<R: BufRead> HexChunks<R> {
    /// Decode records from `reader`
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines().enumerate(),
            window: HexWindow::new(),
            ready: VecDeque::new(),
            upper: 0,
            strict: false,
            done: false,
        }
    }

    /// Enable or disable full record validation
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn finish(&mut self) {
        self.done = true;
        self.ready.extend(self.window.take());
    }

    fn decode(&self, text: &str, line: usize) -> Result<Option<Record>> {
        if self.strict {
            return Record::from_record_string(text)
                .map(Some)
                .map_err(|source| ImageError::Hex { line, source }.into());
        }

        let loose = parse_loose(text).map_err(|reason| ImageError::Record { line, reason })?;
        if !loose.checksum_ok {
            warn!("HEX line {}: checksum mismatch, record used anyway", line);
        }
        if loose.record.is_none() {
            warn!("ignoring HEX record type 0x{:02X}", loose.record_type);
        }
        Ok(loose.record)
    }

    fn handle(&mut self, record: Record) {
        match record {
            Record::Data { offset, value } => {
                let addr = self.upper | u32::from(offset);
                trace!("HEX data 0x{:08X} ({} bytes)", addr, value.len());
                self.window.place(addr, &value, &mut self.ready);
            }
            Record::EndOfFile => self.finish(),
            Record::ExtendedLinearAddress(upper) => {
                self.upper = u32::from(upper) << 16;
                trace!("HEX base 0x{:08X}", self.upper);
            }
            Record::StartSegmentAddress { .. } => {}
            other => warn!("ignoring HEX record type 0x{:02X}", other.record_type()),
        }
    }
}

impl<R: BufRead> Iterator for HexChunks<R> {
    type Item = Result<HexChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.ready.pop_front() {
                return Some(Ok(chunk));
            }
            if self.done {
                return None;
            }

            let Some((index, line)) = self.lines.next() else {
                debug!("HEX stream ended without an end-of-file record");
                self.finish();
                continue;
            };
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    self.done = true;
                    return Some(Err(ImageError::Io(e).into()));
                }
            };

            let line = line.trim();
            if !line.starts_with(':') {
                continue;
            }
            match self.decode(line, index + 1) {
                Ok(Some(record)) => self.handle(record),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// A record decoded by its byte count
struct LooseRecord {
    record_type: u8,
    /// `None` for record types with no meaning here
    record: Option<Record>,
    checksum_ok: bool,
}

/// Decode `:LLAAAATT<data>CC` using only the declared length `LL`
fn parse_loose(text: &str) -> std::result::Result<LooseRecord, &'static str> {
    let digits = text.get(1..).unwrap_or_default();
    if !digits.is_ascii() {
        return Err("non-ASCII characters");
    }
    let bytes = (0..digits.len() / 2)
        .map(|i| u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|_| "invalid hex digit")?;

    let (&count, rest) = bytes.split_first().ok_or("empty record")?;
    let count = usize::from(count);
    // Length, address and type bytes, the payload, then the checksum
    if rest.len() < 3 + count + 1 {
        return Err("record shorter than its byte count");
    }
    let offset = u16::from_be_bytes([rest[0], rest[1]]);
    let record_type = rest[2];
    let payload = &rest[3..3 + count];
    let sum = bytes[..5 + count]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));

    let word = |i: usize| -> std::result::Result<u16, &'static str> {
        payload
            .get(i..i + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or("address record too short")
    };
    let record = match record_type {
        0x00 => Some(Record::Data {
            offset,
            value: payload.to_vec(),
        }),
        0x01 => Some(Record::EndOfFile),
        0x02 => Some(Record::ExtendedSegmentAddress(word(0)?)),
        0x03 => Some(Record::StartSegmentAddress {
            cs: word(0)?,
            ip: word(2)?,
        }),
        0x04 => Some(Record::ExtendedLinearAddress(word(0)?)),
        0x05 => Some(Record::StartLinearAddress(
            (u32::from(word(0)?) << 16) | u32::from(word(2)?),
        )),
        _ => None,
    };

    Ok(LooseRecord {
        record_type,
        record,
        checksum_ok: sum == 0,
    })
}

/// Decode an Intel HEX stream and write it window by window
///
/// Addresses come from the records themselves. `options.strict_hex`
/// selects full record validation.
pub fn write_hex<T, R, P>(
    target: &mut T,
    reader: R,
    options: ImageOptions,
    progress: &mut P,
) -> Result<ImageStats>
where
    T: FlashTarget + ?Sized,
    R: BufRead,
    P: ImageProgress + ?Sized,
{
    let mut sink = ChunkSink::new(target, progress, options);
    for chunk in HexChunks::new(reader).strict(options.strict_hex) {
        let chunk = chunk?;
        sink.push(chunk.addr, &chunk.data)?;
    }
    let stats = sink.finish();
    debug!("HEX image: {} windows", stats.chunks);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::image::testing::RecordingTarget;
    use crate::image::NoProgress;

    fn line(record: Record) -> String {
        record.to_record_string().unwrap()
    }

    fn data(offset: u16, value: &[u8]) -> String {
        line(Record::Data {
            offset,
            value: value.to_vec(),
        })
    }

    fn decode(text: &str) -> Vec<HexChunk> {
        HexChunks::new(text.as_bytes())
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_single_record_window() {
        let payload: Vec<u8> = (0x10..0x20).collect();
        let text = format!(
            ":0200000400000000FA\n{}\n:00000001FF\n",
            data(0x0010, &payload)
        );

        let chunks = decode(&text);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].addr, 0);
        assert_eq!(chunks[0].data.len(), BLOCK_SIZE);
        assert_eq!(&chunks[0].data[0x10..0x20], &payload[..]);
        assert!(chunks[0].data[..0x10].iter().all(|&b| b == 0xFF));
        assert!(chunks[0].data[0x20..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_extended_address_and_jumps() {
        let text = [
            line(Record::ExtendedLinearAddress(0x0001)),
            data(0x0000, &[1, 2, 3, 4]),
            data(0x8000, &[5, 6, 7, 8]),
            // backwards jump flushes too
            data(0x0400, &[9]),
            line(Record::EndOfFile),
        ]
        .join("\n");

        let chunks = decode(&text);
        let addrs: Vec<_> = chunks.iter().map(|c| c.addr).collect();
        assert_eq!(addrs, vec![0x1_0000, 0x1_8000, 0x1_0400]);
        assert_eq!(&chunks[1].data[..4], &[5, 6, 7, 8]);
        assert_eq!(chunks[2].data[0], 9);
    }

    #[test]
    fn test_record_straddling_window_is_split() {
        let payload: Vec<u8> = (0..16).collect();
        let text = [data(0x03F8, &payload), line(Record::EndOfFile)].join("\n");

        let chunks = decode(&text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].addr, 0);
        assert_eq!(&chunks[0].data[0x3F8..], &payload[..8]);
        assert_eq!(chunks[1].addr, 0x400);
        assert_eq!(&chunks[1].data[..8], &payload[8..]);
    }

    #[test]
    fn test_adjacent_records_share_window() {
        let text = [
            data(0x0000, &[0xAA; 16]),
            data(0x0010, &[0xBB; 16]),
            line(Record::EndOfFile),
        ]
        .join("\r\n");

        let chunks = decode(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0].data[..16], &[0xAA; 16]);
        assert_eq!(&chunks[0].data[16..32], &[0xBB; 16]);
    }

    #[test]
    fn test_non_record_lines_and_other_types_ignored() {
        let text = [
            "# generated by a linker script".to_string(),
            String::new(),
            line(Record::StartSegmentAddress { cs: 0, ip: 0x100 }),
            line(Record::StartLinearAddress(0x0000_0101)),
            data(0x0000, &[0x42]),
            line(Record::EndOfFile),
            data(0x0800, &[0x43]),
        ]
        .join("\n");

        let chunks = decode(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data[0], 0x42);
    }

    #[test]
    fn test_missing_eof_still_flushes() {
        let text = data(0x0100, &[1, 2, 3, 4]);
        let chunks = decode(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0].data[0x100..0x104], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_image_produces_nothing() {
        assert!(decode(":00000001FF\n").is_empty());
    }

    #[test]
    fn test_literal_records_decode_by_byte_count() {
        // The type 04 line carries two extra bytes and its checksum does not
        // match the declared payload
        let text = ":0200000400000000FA\n\
                    :10001000000102030405060708090A0B0C0D0E0F68\n\
                    :00000001FF\n";

        let chunks = decode(text);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].addr, 0);
        let expected: Vec<u8> = (0x00..0x10).collect();
        assert_eq!(&chunks[0].data[0x10..0x20], &expected[..]);
        assert!(chunks[0].data[..0x10].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_loose_upper_address_from_first_payload_bytes() {
        let text = ":0400000400020000F6\n:0100000055AA\n:00000001FF\n";
        let chunks = decode(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].addr, 0x2_0000);
        assert_eq!(chunks[0].data[0], 0x55);
    }

    #[test]
    fn test_short_record_reports_line() {
        let text = ":00000001FF\n";
        assert!(decode(text).is_empty());

        let text = "\n:10000000AABB\n";
        let err = HexChunks::new(text.as_bytes())
            .collect::<Result<Vec<_>>>()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Image(ImageError::Record { line: 2, .. })
        ));
    }

    #[test]
    fn test_strict_mode_rejects_bad_checksum() {
        let text = format!(
            "{}\n:0400000001020304F0\n",
            line(Record::ExtendedLinearAddress(0))
        );
        let err = HexChunks::new(text.as_bytes())
            .strict(true)
            .collect::<Result<Vec<_>>>()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Image(ImageError::Hex { line: 2, .. })
        ));

        // Lenient decoding keeps the record
        let chunks = decode(&text);
        assert_eq!(&chunks[0].data[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_write_hex_programs_windows() {
        let text = [
            data(0x0000, &[1, 2, 3, 4]),
            data(0x0C00, &[5, 6, 7, 8]),
            line(Record::EndOfFile),
        ]
        .join("\n");
        let mut target = RecordingTarget::new();

        let stats = write_hex(
            &mut target,
            text.as_bytes(),
            ImageOptions::default(),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(stats.chunks, 2);
        let addrs: Vec<_> = target.programmed.iter().map(|(a, _)| *a).collect();
        assert_eq!(addrs, vec![0, 0xC00]);
        assert_eq!(&target.memory[0xC00..0xC04], &[5, 6, 7, 8]);
    }
}
