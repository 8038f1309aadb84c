//! indicatif rendering of image transfer progress

use dapflash_core::image::{ChunkProgress, ImageMode, ImageProgress, ImageStats};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress reporter using an indicatif progress bar
///
/// The byte total is known for binary images. HEX images only reveal
/// their size as they are parsed, so they get a spinner instead.
pub struct IndicatifProgress {
    total: Option<u64>,
    bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new(total: Option<u64>) -> Self {
        Self { total, bar: None }
    }

    fn create_bar(&self, phase: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
        let pb = match self.total {
            Some(total) => {
                let pb = ProgressBar::new(total);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")?
                        .progress_chars("#>-"),
                );
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}")?,
                );
                pb
            }
        };
        pb.set_message(phase.to_string());
        Ok(pb)
    }
}

impl ImageProgress for IndicatifProgress {
    fn started(&mut self, mode: ImageMode) {
        let phase = match mode {
            ImageMode::Program => "Writing",
            ImageMode::VerifyOnly => "Verifying",
        };
        let pb = self.create_bar(phase).unwrap_or_else(|_| match self.total {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        });
        self.bar = Some(pb);
    }

    fn chunk(&mut self, progress: &ChunkProgress) {
        if let Some(pb) = &self.bar {
            pb.inc(progress.len as u64);
            log::trace!(
                "chunk {} at 0x{:08X} took {:?}",
                progress.index,
                progress.addr,
                progress.elapsed
            );
        }
    }

    fn finished(&mut self, stats: &ImageStats) {
        if let Some(pb) = self.bar.take() {
            pb.finish_with_message("done");
        }
        println!(
            "{} bytes in {} chunks ({:.2?})",
            stats.bytes, stats.chunks, stats.elapsed
        );
    }
}
