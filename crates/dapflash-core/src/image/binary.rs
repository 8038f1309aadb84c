//! Raw binary image writer

use std::io::{self, Read};

use log::debug;

use super::{ChunkSink, ImageOptions, ImageProgress, ImageStats, BLOCK_SIZE};
use crate::error::{ImageError, Result};
use crate::flash::FlashTarget;

/// Stream `reader` into flash starting at `base`
///
/// The image is consumed in 1 KiB blocks at increasing addresses. The
/// first failing block stops the transfer with [`Error::ChunkFailed`]
/// naming its address.
///
/// [`Error::ChunkFailed`]: crate::Error::ChunkFailed
pub fn write_binary<T, R, P>(
    target: &mut T,
    mut reader: R,
    base: u32,
    options: ImageOptions,
    progress: &mut P,
) -> Result<ImageStats>
where
    T: FlashTarget + ?Sized,
    R: Read,
    P: ImageProgress + ?Sized,
{
    let mut sink = ChunkSink::new(target, progress, options);
    let mut buf = [0u8; BLOCK_SIZE];
    let mut addr = base;

    loop {
        let n = read_block(&mut reader, &mut buf).map_err(ImageError::from)?;
        if n == 0 {
            break;
        }
        sink.push(addr, &buf[..n])?;
        addr = addr.wrapping_add(n as u32);
        if n < BLOCK_SIZE {
            break;
        }
    }

    let stats = sink.finish();
    debug!("binary image: {} bytes in {} chunks", stats.bytes, stats.chunks);
    Ok(stats)
}

/// Fill `buf` as far as the reader allows; short only at end of stream
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::image::testing::RecordingTarget;
    use crate::image::{ImageMode, NoProgress};

    /// Hands out at most 100 bytes per read call
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.0.len()).min(100);
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_blocks_at_increasing_addresses() {
        let image: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        let mut target = RecordingTarget::new();

        let stats = write_binary(
            &mut target,
            Trickle(&image),
            0x2000,
            ImageOptions::default(),
            &mut NoProgress,
        )
        .unwrap();

        let addrs: Vec<_> = target.programmed.iter().map(|(a, d)| (*a, d.len())).collect();
        assert_eq!(addrs, vec![(0x2000, 1024), (0x2400, 1024), (0x2800, 452)]);
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.bytes, 2500);
        assert_eq!(&target.memory[0x2000..0x2000 + 2500], &image[..]);
    }

    #[test]
    fn test_failure_names_chunk_address() {
        let image = vec![0u8; 3000];
        let mut target = RecordingTarget::new();
        target.fail_at = Some(0x400);

        let err = write_binary(
            &mut target,
            &image[..],
            0,
            ImageOptions::default(),
            &mut NoProgress,
        )
        .unwrap_err();

        assert!(matches!(err, Error::ChunkFailed { addr: 0x400, .. }));
        assert_eq!(target.programmed.len(), 1);
    }

    #[test]
    fn test_verify_only_never_programs() {
        let image = vec![0xFFu8; 2048];
        let mut target = RecordingTarget::new();
        let options = ImageOptions {
            mode: ImageMode::VerifyOnly,
            ..ImageOptions::default()
        };

        write_binary(&mut target, &image[..], 0, options, &mut NoProgress).unwrap();

        assert!(target.programmed.is_empty());
        assert_eq!(target.verified, vec![0, 0x400]);
    }

    #[test]
    fn test_empty_image() {
        let mut target = RecordingTarget::new();
        let stats = write_binary(
            &mut target,
            io::empty(),
            0,
            ImageOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(stats.chunks, 0);
        assert!(target.programmed.is_empty());
    }
}
