/// Download stage: mirror manifest entries into the output directory.
///
/// The local tree mirrors the card (`STR.edf`, `SETTINGS/…`, `DATALOG/<date>/…`).
/// A file already present locally with the card's size is skipped, so repeated
/// runs against an unchanged card fetch nothing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::datalog::ConfirmedFile;
use crate::discovery::DiscoveryManifest;
use crate::error::CardError;
use crate::prober::{Probe, ProbeOutcome};

/// Whole-file GET against the card.
pub trait Fetch: Probe {
    /// Write `path` to `dest`, returning the number of bytes written.
    fn fetch(&self, path: &str, dest: &Path) -> Result<u64, CardError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    /// Not on the card (normal for optional root files and `.crc` companions).
    pub missing: usize,
    pub failed: usize,
}

impl DownloadReport {
    fn add(&mut self, other: DownloadReport) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.missing += other.missing;
        self.failed += other.failed;
    }
}

enum Synced {
    Downloaded,
    Skipped,
    Missing,
    Failed,
    /// Already handled earlier in this run.
    Seen,
}

pub struct Downloader<'a, F: Fetch> {
    card: &'a F,
    output_dir: PathBuf,
    seen: HashSet<String>,
}

impl<'a, F: Fetch> Downloader<'a, F> {
    pub fn new(card: &'a F, output_dir: impl Into<PathBuf>) -> Self {
        Self { card, output_dir: output_dir.into(), seen: HashSet::new() }
    }

    pub fn local_path(&self, remote: &str) -> PathBuf {
        remote.split('/').fold(self.output_dir.clone(), |p, part| p.join(part))
    }

    /// Fetch fixed paths (root files, SETTINGS) whose size is learned by HEAD.
    pub fn download_paths<S: AsRef<str>>(&mut self, label: &str, paths: &[S]) -> DownloadReport {
        log::info!("=== Downloading {label} ===");
        let mut report = DownloadReport::default();
        for path in paths {
            self.tally(&mut report, path.as_ref(), None);
        }
        log::info!(
            "  {label}: {} downloaded, {} skipped, {} not on card, {} failed",
            report.downloaded,
            report.skipped,
            report.missing,
            report.failed
        );
        report
    }

    /// Fetch confirmed DATALOG files and their `.crc` companions.
    pub fn download_datalog(&mut self, files: &[ConfirmedFile]) -> DownloadReport {
        log::info!("=== Downloading DATALOG files ===");
        let mut report = DownloadReport::default();
        for file in files {
            self.tally(&mut report, &file.remote_path(), Some(file.size));
            let crc = file.crc_path();
            let mut crc_report = DownloadReport::default();
            self.tally(&mut crc_report, &crc, None);
            // companions are best-effort; only count real transfers and failures
            report.downloaded += crc_report.downloaded;
            report.failed += crc_report.failed;
        }
        log::info!(
            "  DATALOG: {} downloaded, {} skipped, {} failed",
            report.downloaded,
            report.skipped,
            report.failed
        );
        report
    }

    /// Everything in the manifest: well-known paths, then confirmed files.
    pub fn download(&mut self, manifest: &DiscoveryManifest) -> DownloadReport {
        let mut report = self.download_paths("well-known files", &manifest.well_known);
        report.add(self.download_datalog(&manifest.confirmed));
        report
    }

    fn tally(&mut self, report: &mut DownloadReport, path: &str, known_size: Option<u64>) {
        match self.sync(path, known_size) {
            Synced::Downloaded => report.downloaded += 1,
            Synced::Skipped => report.skipped += 1,
            Synced::Missing => report.missing += 1,
            Synced::Failed => report.failed += 1,
            Synced::Seen => {}
        }
    }

    fn sync(&mut self, path: &str, known_size: Option<u64>) -> Synced {
        if !self.seen.insert(path.to_string()) {
            return Synced::Seen;
        }

        let remote_size = match known_size {
            Some(size) => size,
            None => match self.card.probe(path) {
                ProbeOutcome::Present { size } => size,
                ProbeOutcome::Absent => return Synced::Missing,
                ProbeOutcome::Failed(e) => {
                    log::warn!("  Could not check {path}: {e}");
                    return Synced::Failed;
                }
            },
        };

        let local = self.local_path(path);
        if std::fs::metadata(&local).map(|m| m.len() == remote_size).unwrap_or(false) {
            log::info!("  SKIP {path} (same size: {remote_size})");
            return Synced::Skipped;
        }

        log::info!("  GET  {path} ({remote_size} bytes)");
        match self.card.fetch(path, &local) {
            Ok(written) => {
                if remote_size > 0 && written != remote_size {
                    log::warn!("  Size mismatch for {path}: expected {remote_size}, got {written}");
                }
                Synced::Downloaded
            }
            Err(e) => {
                log::error!("  FAILED {path}: {e}");
                Synced::Failed
            }
        }
    }
}
