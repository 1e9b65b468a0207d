/// Discovery coordinator: sessions in, manifest out.
///
/// Each session runs through a small state machine:
///
///   AnchorPending ─┬─> AnchorResolved ──> DependentsResolving ──> Done
///                  └─> AnchorMissing ───────────────────────────> Done
///
/// The anchor (BRP) gets a full seconds scan. Its resolved second centers a
/// narrow window for each dependent type. A missing anchor skips the
/// dependents of that session only. A missing dependent skips only itself.
///
/// Everything runs sequentially on the caller's thread; the card's radio does
/// not cope with concurrent requests.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use crate::config::ProbeConfig;
use crate::datalog::{CandidateSeq, ConfirmedFile, RecordType};
use crate::prober::{ExistenceProber, FolderCheck, Probe, Resolution};
use crate::session::{self, SessionRecord};

/// Root-level files fetched unconditionally.
pub const ROOT_FILES: [&str; 6] = [
    "STR.edf",
    "STR.crc",
    "Identification.tgt",
    "Identification.crc",
    "journal.dat",
    "journal.jnl",
];

/// SETTINGS files fetched unconditionally.
pub const SETTINGS_FILES: [&str; 2] = ["SETTINGS/sig.dat", "SETTINGS/set.crc"];

/// Which sessions to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayCutoff {
    Unbounded,
    /// Sessions starting on or after this date.
    Since(NaiveDate),
}

impl DayCutoff {
    /// `days == 0` means everything, as does a span reaching past the calendar's start.
    pub fn from_days(days: u32, today: NaiveDate) -> Self {
        if days == 0 {
            return DayCutoff::Unbounded;
        }
        today
            .checked_sub_signed(Duration::days(days.into()))
            .map_or(DayCutoff::Unbounded, DayCutoff::Since)
    }

    pub fn includes(&self, session: &SessionRecord) -> bool {
        match self {
            DayCutoff::Unbounded => true,
            DayCutoff::Since(cutoff) => session.start.date() >= *cutoff,
        }
    }
}

/// Per-run counters, logged at the end and handed on with the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub sessions_considered: usize,
    pub sessions_excluded: usize,
    pub anchors_resolved: usize,
    pub anchors_missing: usize,
    pub dependents_resolved: usize,
    pub dependents_unresolved: usize,
    /// Sessions skipped because their DATALOG folder is absent.
    pub folders_missing: usize,
    pub requests: u64,
    pub cancelled: bool,
}

/// Files to hand to the downloader. Built once per run, never mutated after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryManifest {
    pub well_known: Vec<String>,
    pub confirmed: Vec<ConfirmedFile>,
    pub report: DiscoveryReport,
}

impl DiscoveryManifest {
    /// Manifest with no DATALOG entries, used when STR.edf cannot be parsed.
    pub fn well_known_only() -> Self {
        Self { well_known: well_known_files(), confirmed: Vec::new(), report: DiscoveryReport::default() }
    }
}

pub fn well_known_files() -> Vec<String> {
    ROOT_FILES.iter().chain(SETTINGS_FILES.iter()).map(|s| s.to_string()).collect()
}

/// Per-session discovery phase.
#[derive(Debug)]
enum Phase {
    AnchorPending,
    AnchorResolved(ConfirmedFile),
    AnchorMissing,
    DependentsResolving { anchor_seconds: u32, next: usize },
    Done,
}

pub struct DiscoveryCoordinator<'a, 'p, P: Probe> {
    prober: &'a mut ExistenceProber<'p, P>,
    cfg: ProbeConfig,
    confirmed: Vec<ConfirmedFile>,
    report: DiscoveryReport,
}

impl<'a, 'p, P: Probe> DiscoveryCoordinator<'a, 'p, P> {
    pub fn new(prober: &'a mut ExistenceProber<'p, P>, cfg: ProbeConfig) -> Self {
        Self { prober, cfg, confirmed: Vec::new(), report: DiscoveryReport::default() }
    }

    /// Probe every session inside `cutoff` and build the manifest. Stops early
    /// (keeping what was confirmed) if the prober is cancelled.
    pub fn run(mut self, sessions: &[SessionRecord], cutoff: DayCutoff) -> DiscoveryManifest {
        let mut by_folder: BTreeMap<NaiveDate, Vec<&SessionRecord>> = BTreeMap::new();
        for s in sessions {
            if cutoff.includes(s) {
                by_folder.entry(session::record_date(s)).or_default().push(s);
            } else {
                self.report.sessions_excluded += 1;
            }
        }

        match (by_folder.keys().next(), by_folder.keys().next_back()) {
            (Some(first), Some(last)) => log::info!(
                "Record dates {} to {} ({} folder(s))",
                first.format("%Y%m%d"),
                last.format("%Y%m%d"),
                by_folder.len()
            ),
            _ => log::info!("No sessions found in the requested date range"),
        }

        'folders: for (record_date, folder_sessions) in &by_folder {
            log::info!("[{}] {} session(s)", record_date.format("%Y%m%d"), folder_sessions.len());

            if self.cfg.check_folders {
                match self.prober.check_folder(*record_date) {
                    FolderCheck::Cancelled => {
                        self.report.cancelled = true;
                        break 'folders;
                    }
                    FolderCheck::Absent => {
                        log::warn!("  DATALOG/{} not on card, skipping", record_date.format("%Y%m%d"));
                        self.report.folders_missing += folder_sessions.len();
                        continue;
                    }
                    FolderCheck::Present | FolderCheck::Unknown => {}
                }
            }

            for s in folder_sessions {
                self.report.sessions_considered += 1;
                if !self.discover_session(s, *record_date) {
                    self.report.cancelled = true;
                    break 'folders;
                }
            }
        }

        self.report.requests = self.prober.requests();
        log_summary(&self.report, self.confirmed.len());

        DiscoveryManifest { well_known: well_known_files(), confirmed: self.confirmed, report: self.report }
    }

    /// Drive one session to `Done`. Returns false if cancelled.
    fn discover_session(&mut self, s: &SessionRecord, record_date: NaiveDate) -> bool {
        log::info!(
            "  Session #{} {} ({} min)",
            s.id,
            s.start.format("%Y%m%d %H%M"),
            s.duration_min()
        );

        let mut phase = Phase::AnchorPending;
        loop {
            phase = match phase {
                Phase::AnchorPending => {
                    let seq = CandidateSeq::anchor(s, record_date, RecordType::ANCHOR, self.cfg.anchor_seconds);
                    match self.prober.resolve(&seq) {
                        Resolution::Resolved(file) => Phase::AnchorResolved(file),
                        Resolution::Unresolved { probes, network_failures } => {
                            log::warn!(
                                "    {} not found after {probes} probes ({network_failures} network failures), skipping session",
                                RecordType::ANCHOR
                            );
                            Phase::AnchorMissing
                        }
                        Resolution::Cancelled => return false,
                    }
                }
                Phase::AnchorResolved(file) => {
                    let anchor_seconds = file.seconds();
                    log::info!("    {} found SS={anchor_seconds:02}", file.record_type);
                    self.report.anchors_resolved += 1;
                    self.confirmed.push(file);
                    Phase::DependentsResolving { anchor_seconds, next: 0 }
                }
                Phase::AnchorMissing => {
                    self.report.anchors_missing += 1;
                    Phase::Done
                }
                Phase::DependentsResolving { anchor_seconds, next } => {
                    let Some(&record_type) = RecordType::DEPENDENTS.get(next) else {
                        break;
                    };
                    let seq = CandidateSeq::dependent(
                        s,
                        record_date,
                        record_type,
                        anchor_seconds,
                        self.cfg.dependent_window_s,
                    );
                    match self.prober.resolve(&seq) {
                        Resolution::Resolved(file) => {
                            log::info!("    {record_type} found SS={:02}", file.seconds());
                            self.report.dependents_resolved += 1;
                            self.confirmed.push(file);
                        }
                        Resolution::Unresolved { probes, network_failures } => {
                            log::warn!(
                                "    {record_type} not found within ±{}s ({probes} probes, {network_failures} network failures)",
                                self.cfg.dependent_window_s
                            );
                            self.report.dependents_unresolved += 1;
                        }
                        Resolution::Cancelled => return false,
                    }
                    Phase::DependentsResolving { anchor_seconds, next: next + 1 }
                }
                Phase::Done => break,
            };
        }
        true
    }
}

fn log_summary(report: &DiscoveryReport, confirmed: usize) {
    log::info!(
        "Discovery: {confirmed} file(s) confirmed; sessions: {} probed, {} anchored, {} missing anchor, {} in missing folders, {} outside range; dependents: {} found, {} not found; ~{} probes sent",
        report.sessions_considered,
        report.anchors_resolved,
        report.anchors_missing,
        report.folders_missing,
        report.sessions_excluded,
        report.dependents_resolved,
        report.dependents_unresolved,
        report.requests
    );
    if report.cancelled {
        log::warn!("Discovery interrupted; continuing with the {confirmed} file(s) found so far");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::testing::FakeCard;
    use chrono::NaiveDateTime;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn session(id: usize, start: &str) -> SessionRecord {
        let start = NaiveDateTime::parse_from_str(start, "%Y-%m-%d %H:%M").unwrap();
        SessionRecord { id, start, end: start + Duration::hours(6) }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn run(card: &FakeCard, sessions: &[SessionRecord], cutoff: DayCutoff) -> DiscoveryManifest {
        let mut prober = ExistenceProber::new(card, 0, Arc::new(AtomicBool::new(false)));
        DiscoveryCoordinator::new(&mut prober, ProbeConfig::default()).run(sessions, cutoff)
    }

    fn names(m: &DiscoveryManifest) -> Vec<&str> {
        m.confirmed.iter().map(|f| f.file_name.as_str()).collect()
    }

    #[test]
    fn resolves_anchor_then_dependents() {
        let card = FakeCard::with_files(&[
            "DATALOG/20240102/20240102_231037_BRP.edf",
            "DATALOG/20240102/20240102_231038_PLD.edf",
            "DATALOG/20240102/20240102_231036_SAD.edf",
            "DATALOG/20240102/20240102_231029_EVE.edf",
            "DATALOG/20240102/20240102_231028_CSL.edf",
        ]);
        let m = run(&card, &[session(0, "2024-01-02 23:10")], DayCutoff::Unbounded);
        assert_eq!(
            names(&m),
            vec![
                "20240102_231037_BRP.edf",
                "20240102_231038_PLD.edf",
                "20240102_231036_SAD.edf",
                "20240102_231029_EVE.edf",
                "20240102_231028_CSL.edf",
            ]
        );
        assert_eq!(m.report.anchors_resolved, 1);
        assert_eq!(m.report.dependents_resolved, 4);
        assert_eq!(m.well_known, well_known_files());

        // folder + 38 anchor probes, then 3 + 2 + 16 + 18 for the dependents
        let probes = card.probes();
        assert_eq!(probes[0], "DATALOG/20240102");
        assert_eq!(probes.len(), 1 + 38 + 3 + 2 + 16 + 18);
        assert_eq!(m.report.requests, probes.len() as u64);
    }

    #[test]
    fn dependent_window_probed_nearest_first() {
        let card = FakeCard::with_files(&["DATALOG/20240102/20240102_231037_BRP.edf"]);
        run(&card, &[session(0, "2024-01-02 23:10")], DayCutoff::Unbounded);
        let pld: Vec<String> = card.probes().into_iter().filter(|p| p.ends_with("_PLD.edf")).collect();
        assert_eq!(pld.len(), 31);
        assert_eq!(pld[0], "DATALOG/20240102/20240102_231037_PLD.edf");
        assert_eq!(pld[1], "DATALOG/20240102/20240102_231036_PLD.edf");
        assert_eq!(pld[2], "DATALOG/20240102/20240102_231038_PLD.edf");
        assert_eq!(pld[30], "DATALOG/20240102/20240102_231052_PLD.edf");
    }

    #[test]
    fn missing_anchor_skips_only_that_session() {
        let card = FakeCard::with_files(&[
            "DATALOG/20240102/20240102_231037_BRP.edf",
            "DATALOG/20240102/20240102_231037_PLD.edf",
            // second session in the same folder has dependents but no BRP
            "DATALOG/20240102/20240102_200037_PLD.edf",
        ]);
        let m = run(
            &card,
            &[session(0, "2024-01-02 20:00"), session(1, "2024-01-02 23:10")],
            DayCutoff::Unbounded,
        );
        assert_eq!(names(&m), vec!["20240102_231037_BRP.edf", "20240102_231037_PLD.edf"]);
        assert_eq!(m.report.anchors_missing, 1);
        assert_eq!(m.report.anchors_resolved, 1);
        assert!(!card.probes().iter().any(|p| p.contains("_2000") && !p.ends_with("_BRP.edf")));
    }

    #[test]
    fn missing_dependent_does_not_block_others() {
        let card = FakeCard::with_files(&[
            "DATALOG/20240102/20240102_231037_BRP.edf",
            "DATALOG/20240102/20240102_231037_CSL.edf",
        ]);
        let m = run(&card, &[session(0, "2024-01-02 23:10")], DayCutoff::Unbounded);
        assert_eq!(names(&m), vec!["20240102_231037_BRP.edf", "20240102_231037_CSL.edf"]);
        assert_eq!(m.report.dependents_unresolved, 3);
        assert_eq!(m.report.dependents_resolved, 1);
    }

    #[test]
    fn overnight_session_uses_previous_day_folder() {
        let card = FakeCard::with_files(&["DATALOG/20240102/20240103_011512_BRP.edf"]);
        let m = run(&card, &[session(0, "2024-01-03 01:15")], DayCutoff::Unbounded);
        assert_eq!(names(&m), vec!["20240103_011512_BRP.edf"]);
        assert_eq!(m.confirmed[0].record_date, day("2024-01-02"));
    }

    #[test]
    fn day_cutoff_keeps_last_seven_days() {
        let today = day("2024-03-20");
        let sessions: Vec<SessionRecord> = (0..=10)
            .map(|back| {
                let d = today - Duration::days(back);
                session(back as usize, &format!("{} 22:00", d.format("%Y-%m-%d")))
            })
            .collect();
        let card = FakeCard::default();
        let m = run(&card, &sessions, DayCutoff::from_days(7, today));

        assert_eq!(m.report.sessions_excluded, 3);
        let folders: Vec<String> = card.probes().into_iter().filter(|p| !p.ends_with(".edf")).collect();
        assert_eq!(folders.len(), 8);
        assert!(folders.contains(&"DATALOG/20240313".to_string()));
        assert!(folders.contains(&"DATALOG/20240320".to_string()));
        assert!(!folders.contains(&"DATALOG/20240312".to_string()));
    }

    #[test]
    fn zero_days_is_unbounded() {
        assert_eq!(DayCutoff::from_days(0, day("2024-03-20")), DayCutoff::Unbounded);
    }

    #[test]
    fn huge_day_count_is_unbounded() {
        assert_eq!(DayCutoff::from_days(100_000_000, day("2026-10-16")), DayCutoff::Unbounded);
        assert_eq!(DayCutoff::from_days(u32::MAX, day("2026-10-16")), DayCutoff::Unbounded);
        assert_eq!(
            DayCutoff::from_days(365, day("2026-10-16")),
            DayCutoff::Since(day("2025-10-16"))
        );
    }

    #[test]
    fn absent_folder_skips_its_sessions() {
        let card = FakeCard::default();
        let m = run(&card, &[session(0, "2024-01-02 23:10"), session(1, "2024-01-02 23:50")], DayCutoff::Unbounded);
        assert_eq!(card.probes(), vec!["DATALOG/20240102".to_string()]);
        assert_eq!(m.report.folders_missing, 2);
        assert!(m.confirmed.is_empty());
    }

    #[test]
    fn folder_check_can_be_disabled() {
        let card = FakeCard::default();
        let mut prober = ExistenceProber::new(&card, 0, Arc::new(AtomicBool::new(false)));
        let cfg = ProbeConfig { check_folders: false, ..ProbeConfig::default() };
        let m = DiscoveryCoordinator::new(&mut prober, cfg)
            .run(&[session(0, "2024-01-02 23:10")], DayCutoff::Unbounded);
        assert_eq!(card.probes().len(), 60);
        assert_eq!(m.report.anchors_missing, 1);
    }

    #[test]
    fn cancellation_keeps_confirmed_files() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut card = FakeCard::with_files(&[
            "DATALOG/20240102/20240102_231000_BRP.edf",
            "DATALOG/20240102/20240102_231000_PLD.edf",
        ]);
        // folder + BRP + PLD, then cancel during SAD
        card.cancel_after = Some((5, Arc::clone(&flag)));
        let mut prober = ExistenceProber::new(&card, 0, flag);
        let m = DiscoveryCoordinator::new(&mut prober, ProbeConfig::default()).run(
            &[session(0, "2024-01-02 23:10"), session(1, "2024-01-03 22:00")],
            DayCutoff::Unbounded,
        );
        assert!(m.report.cancelled);
        assert_eq!(names(&m), vec!["20240102_231000_BRP.edf", "20240102_231000_PLD.edf"]);
        assert_eq!(card.probes().len(), 5);
        assert_eq!(m.well_known, well_known_files());
    }

    #[test]
    fn well_known_only_manifest() {
        let m = DiscoveryManifest::well_known_only();
        assert!(m.confirmed.is_empty());
        assert!(m.well_known.contains(&"STR.edf".to_string()));
        assert!(m.well_known.contains(&"SETTINGS/sig.dat".to_string()));
        assert!(m.well_known.contains(&"Identification.tgt".to_string()));
    }
}
