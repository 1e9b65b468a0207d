/// Sequential existence prober.
///
/// Issues one HEAD per candidate, in the order the candidate sequence yields
/// them, and stops at the first hit. Existence is not monotonic in the seconds
/// field, so the worst case is always a full linear scan.
///
/// A network failure is "not confirmed", never fatal. It gets `retries` extra
/// attempts; a definite "absent" answer is never retried. The cancel flag is
/// checked before every request so an interrupt stops the scan between probes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;

use crate::datalog::{self, CandidateFile, ConfirmedFile};
use crate::error::CardError;

/// Raw answer to a single HEAD.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Real file (or folder, for size 0) with its Content-Length.
    Present { size: u64 },
    /// The card answered, and the path does not exist.
    Absent,
    /// Timeout, refused connection, reset...
    Failed(CardError),
}

/// Existence check against the card. Implemented by the HTTP transport and by
/// test doubles.
pub trait Probe {
    fn probe(&self, path: &str) -> ProbeOutcome;
}

/// Result of scanning one candidate sequence.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ConfirmedFile),
    Unresolved { probes: u32, network_failures: u32 },
    Cancelled,
}

/// Result of probing a `DATALOG/<date>` folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderCheck {
    Present,
    Absent,
    /// Card unreachable; the caller should scan anyway.
    Unknown,
    Cancelled,
}

enum Query {
    Answered(ProbeOutcome),
    Cancelled,
}

pub struct ExistenceProber<'a, P: Probe> {
    card: &'a P,
    retries: u32,
    cancel: Arc<AtomicBool>,
    requests: u64,
}

impl<'a, P: Probe> ExistenceProber<'a, P> {
    pub fn new(card: &'a P, retries: u32, cancel: Arc<AtomicBool>) -> Self {
        Self { card, retries, cancel, requests: 0 }
    }

    /// Total HEAD requests sent so far, retries included.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Probe candidates in order; first confirmed file wins.
    pub fn resolve<I>(&mut self, candidates: I) -> Resolution
    where
        I: IntoIterator<Item = CandidateFile>,
    {
        let mut probes = 0u32;
        let mut network_failures = 0u32;

        for candidate in candidates {
            let path = candidate.remote_path();
            probes += 1;
            match self.query(&path) {
                Query::Cancelled => return Resolution::Cancelled,
                // zero-length answers are folders or placeholders, never EDFs
                Query::Answered(ProbeOutcome::Present { size }) if size > 0 => {
                    log::debug!("Probe hit: {path} ({size} bytes)");
                    return Resolution::Resolved(candidate.confirm(size));
                }
                Query::Answered(ProbeOutcome::Failed(e)) => {
                    log::debug!("Probe failed: {path}: {e}");
                    network_failures += 1;
                }
                Query::Answered(_) => {}
            }
        }

        if probes > 0 && network_failures == probes {
            log::warn!(
                "All {probes} probes failed at the network level; the card may be unreachable"
            );
        }
        Resolution::Unresolved { probes, network_failures }
    }

    /// Probe `DATALOG/<record_date>`. Folders answer as a zero-length file.
    pub fn check_folder(&mut self, record_date: NaiveDate) -> FolderCheck {
        let path = datalog::folder_path(record_date);
        match self.query(&path) {
            Query::Cancelled => FolderCheck::Cancelled,
            Query::Answered(ProbeOutcome::Present { size: 0 }) => FolderCheck::Present,
            Query::Answered(ProbeOutcome::Present { .. }) | Query::Answered(ProbeOutcome::Absent) => {
                FolderCheck::Absent
            }
            Query::Answered(ProbeOutcome::Failed(e)) => {
                log::warn!("Folder probe {path} failed: {e}");
                FolderCheck::Unknown
            }
        }
    }

    fn query(&mut self, path: &str) -> Query {
        let mut attempt = 0;
        loop {
            if self.is_cancelled() {
                return Query::Cancelled;
            }
            self.requests += 1;
            match self.card.probe(path) {
                ProbeOutcome::Failed(e) if attempt < self.retries => {
                    attempt += 1;
                    log::debug!("Retrying {path} ({attempt}/{}): {e}", self.retries);
                }
                outcome => return Query::Answered(outcome),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeCard;
    use super::*;
    use crate::datalog::{CandidateSeq, RecordType};
    use crate::session::SessionRecord;
    use chrono::{Duration, NaiveDateTime};

    fn anchor_seq() -> CandidateSeq {
        let start = NaiveDateTime::parse_from_str("2024-01-02 23:10", "%Y-%m-%d %H:%M").unwrap();
        let s = SessionRecord { id: 0, start, end: start + Duration::hours(6) };
        CandidateSeq::anchor(&s, start.date(), RecordType::Brp, 60)
    }

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn stops_at_first_hit() {
        let card = FakeCard::with_files(&["DATALOG/20240102/20240102_231037_BRP.edf"]);
        let mut prober = ExistenceProber::new(&card, 1, no_cancel());
        match prober.resolve(&anchor_seq()) {
            Resolution::Resolved(f) => {
                assert_eq!(f.file_name, "20240102_231037_BRP.edf");
                assert_eq!(f.size, 1000);
            }
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(card.probes().len(), 38);
        assert_eq!(prober.requests(), 38);
    }

    #[test]
    fn first_match_wins_over_later_hits() {
        let card = FakeCard::with_files(&[
            "DATALOG/20240102/20240102_231005_BRP.edf",
            "DATALOG/20240102/20240102_231040_BRP.edf",
        ]);
        let mut prober = ExistenceProber::new(&card, 0, no_cancel());
        let Resolution::Resolved(f) = prober.resolve(&anchor_seq()) else {
            panic!("expected hit");
        };
        assert_eq!(f.file_name, "20240102_231005_BRP.edf");
    }

    #[test]
    fn exhausted_scan_is_unresolved() {
        let card = FakeCard::default();
        let mut prober = ExistenceProber::new(&card, 1, no_cancel());
        assert_eq!(
            prober.resolve(&anchor_seq()),
            Resolution::Unresolved { probes: 60, network_failures: 0 }
        );
        // definite absence is never retried
        assert_eq!(prober.requests(), 60);
    }

    #[test]
    fn zero_length_answer_is_not_a_file() {
        let mut card = FakeCard::default();
        card.files.insert("DATALOG/20240102/20240102_231000_BRP.edf".into(), 0);
        let mut prober = ExistenceProber::new(&card, 0, no_cancel());
        assert!(matches!(prober.resolve(&anchor_seq()), Resolution::Unresolved { .. }));
    }

    #[test]
    fn network_failure_retried_once() {
        let path = "DATALOG/20240102/20240102_231002_BRP.edf";
        let card = FakeCard::with_files(&[path]);
        card.flaky.borrow_mut().insert(path.to_string(), 1);
        let mut prober = ExistenceProber::new(&card, 1, no_cancel());
        assert!(matches!(prober.resolve(&anchor_seq()), Resolution::Resolved(_)));
        assert_eq!(prober.requests(), 4);
    }

    #[test]
    fn persistent_failure_counts_as_not_confirmed() {
        let path = "DATALOG/20240102/20240102_231002_BRP.edf";
        let card = FakeCard::with_files(&[path]);
        card.flaky.borrow_mut().insert(path.to_string(), 5);
        let mut prober = ExistenceProber::new(&card, 1, no_cancel());
        assert_eq!(
            prober.resolve(&anchor_seq()),
            Resolution::Unresolved { probes: 60, network_failures: 1 }
        );
    }

    #[test]
    fn offline_card_is_unresolved() {
        let card = FakeCard { offline: true, ..FakeCard::default() };
        let mut prober = ExistenceProber::new(&card, 1, no_cancel());
        assert_eq!(
            prober.resolve(&anchor_seq()),
            Resolution::Unresolved { probes: 60, network_failures: 60 }
        );
        assert_eq!(prober.requests(), 120);
    }

    #[test]
    fn cancel_stops_between_probes() {
        let flag = no_cancel();
        let card = FakeCard { cancel_after: Some((10, Arc::clone(&flag))), ..FakeCard::default() };
        let mut prober = ExistenceProber::new(&card, 0, flag);
        assert_eq!(prober.resolve(&anchor_seq()), Resolution::Cancelled);
        assert_eq!(card.probes().len(), 10);
    }

    #[test]
    fn folder_check() {
        let card = FakeCard::with_files(&["DATALOG/20240102/20240102_231037_BRP.edf"]);
        let mut prober = ExistenceProber::new(&card, 0, no_cancel());
        let day = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        assert_eq!(prober.check_folder(day("2024-01-02")), FolderCheck::Present);
        assert_eq!(prober.check_folder(day("2024-01-03")), FolderCheck::Absent);

        let offline = FakeCard { offline: true, ..FakeCard::default() };
        let mut prober = ExistenceProber::new(&offline, 0, no_cancel());
        assert_eq!(prober.check_folder(day("2024-01-02")), FolderCheck::Unknown);
    }
}
