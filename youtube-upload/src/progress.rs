//! Upload progress reporting.

use crate::options::ProgressType;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;

/// Receives byte counts while a video is being transferred.
///
/// `update` may be called any number of times with a non-decreasing `completed`, up to `total`.
/// `finish` is called exactly once after the last update and must not fail.
pub trait Progress {
    fn update(&mut self, total: u64, completed: u64);
    fn finish(&mut self);
}

/// Returns the progress reporter for the given display type.
pub fn for_type(kind: ProgressType) -> Box<dyn Progress> {
    match kind {
        ProgressType::Bar => Box::new(BarProgress::default()),
        ProgressType::Console => Box::new(ConsoleProgress::new(std::io::stdout())),
        ProgressType::Silent => Box::new(SilentProgress),
    }
}

/// A progress bar with percentage, ETA and transfer rate.
///
/// The bar is created on the first update, once the total size is known.
#[derive(Debug, Default)]
pub struct BarProgress {
    bar: Option<ProgressBar>,
}

impl Progress for BarProgress {
    fn update(&mut self, total: u64, completed: u64) {
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::with_template(
                    "{percent:>3}% [{wide_bar}] {eta_precise} {binary_bytes_per_sec}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
            );
            bar
        });
        bar.set_position(completed);
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

/// Prints `NN %` lines.
#[derive(Debug)]
pub struct ConsoleProgress<W> {
    out: W,
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Progress for ConsoleProgress<W> {
    fn update(&mut self, total: u64, completed: u64) {
        let percent = if total == 0 {
            100.0
        } else {
            (completed as f64 * 100.0 / total as f64).round()
        };
        // a closed stdout must not abort the upload
        let _ = writeln!(self.out, "{percent:.0} %");
        let _ = self.out.flush();
    }

    fn finish(&mut self) {}
}

/// Reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl Progress for SilentProgress {
    fn update(&mut self, _total: u64, _completed: u64) {}
    fn finish(&mut self) {}
}
