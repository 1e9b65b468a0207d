/// DATALOG naming and candidate generation.
///
/// Files live at `DATALOG/<record_date>/<file_date>_<HHMMSS>_<TYPE>.edf`.
/// `record_date` is the noon-split folder; `file_date` and `HHMMSS` are the
/// wall-clock time the device created the file. STR.edf only gives the
/// minute, so candidates differ in the seconds field (and in the minute when
/// a dependent window spills over a minute boundary).

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::session::SessionRecord;

pub const DATALOG_DIR: &str = "DATALOG";

/// EDF record types written per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// Breathing waveform: the anchor, most tightly tied to the mask-on minute.
    Brp,
    Pld,
    Sad,
    /// EVE/CSL are typically written ~8-9s before BRP/PLD/SAD.
    Eve,
    Csl,
}

impl RecordType {
    pub const ANCHOR: RecordType = RecordType::Brp;
    pub const DEPENDENTS: [RecordType; 4] =
        [RecordType::Pld, RecordType::Sad, RecordType::Eve, RecordType::Csl];

    pub fn code(self) -> &'static str {
        match self {
            RecordType::Brp => "BRP",
            RecordType::Pld => "PLD",
            RecordType::Sad => "SAD",
            RecordType::Eve => "EVE",
            RecordType::Csl => "CSL",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// `DATALOG/<record_date>`.
pub fn folder_path(record_date: NaiveDate) -> String {
    format!("{DATALOG_DIR}/{}", record_date.format("%Y%m%d"))
}

/// A speculative DATALOG filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateFile {
    pub record_date: NaiveDate,
    pub timestamp: NaiveDateTime,
    pub record_type: RecordType,
}

impl CandidateFile {
    pub fn seconds(&self) -> u32 {
        self.timestamp.second()
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.edf", self.timestamp.format("%Y%m%d_%H%M%S"), self.record_type)
    }

    pub fn remote_path(&self) -> String {
        format!("{}/{}", folder_path(self.record_date), self.file_name())
    }

    pub fn confirm(self, size: u64) -> ConfirmedFile {
        ConfirmedFile {
            file_name: self.file_name(),
            record_date: self.record_date,
            record_type: self.record_type,
            timestamp: self.timestamp,
            size,
        }
    }
}

/// A DATALOG file the card confirmed with a HEAD probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedFile {
    pub file_name: String,
    pub record_date: NaiveDate,
    pub record_type: RecordType,
    pub timestamp: NaiveDateTime,
    /// Content-Length reported by the probe.
    pub size: u64,
}

impl ConfirmedFile {
    pub fn seconds(&self) -> u32 {
        self.timestamp.second()
    }

    pub fn remote_path(&self) -> String {
        format!("{}/{}", folder_path(self.record_date), self.file_name)
    }

    /// The `.crc` file the device writes next to every EDF.
    pub fn crc_path(&self) -> String {
        let stem = self.file_name.strip_suffix(".edf").unwrap_or(&self.file_name);
        format!("{}/{stem}.crc", folder_path(self.record_date))
    }
}

/// i-th offset from a center, nearest first, earlier second on ties:
/// 0, -1, +1, -2, +2, ...
fn nearest_first_offset(i: u32) -> i64 {
    let i = i as i64;
    if i % 2 == 1 { -(i + 1) / 2 } else { i / 2 }
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    /// Seconds `0..count` of the start minute, ascending.
    Ascending { count: u32 },
    /// `center + offset` for each nearest-first offset within `window`.
    Around { center: NaiveDateTime, window: u32 },
}

/// Lazy, finite, restartable candidate sequence for one session and type.
#[derive(Debug, Clone, Copy)]
pub struct CandidateSeq {
    record_date: NaiveDate,
    minute: NaiveDateTime,
    record_type: RecordType,
    pattern: Pattern,
}

impl CandidateSeq {
    /// Full seconds scan of the session's start minute. `scan_seconds` is
    /// clamped to 60.
    pub fn anchor(
        session: &SessionRecord,
        record_date: NaiveDate,
        record_type: RecordType,
        scan_seconds: u32,
    ) -> Self {
        Self {
            record_date,
            minute: start_minute(session),
            record_type,
            pattern: Pattern::Ascending { count: scan_seconds.min(60) },
        }
    }

    /// Window of `±window` seconds around the anchor's resolved second.
    /// Offsets that leave the minute roll into the neighbouring minute.
    pub fn dependent(
        session: &SessionRecord,
        record_date: NaiveDate,
        record_type: RecordType,
        anchor_seconds: u32,
        window: u32,
    ) -> Self {
        let minute = start_minute(session);
        Self {
            record_date,
            minute,
            record_type,
            pattern: Pattern::Around {
                center: minute + Duration::seconds(anchor_seconds.min(59) as i64),
                window,
            },
        }
    }

    pub fn len(&self) -> usize {
        match self.pattern {
            Pattern::Ascending { count } => count as usize,
            Pattern::Around { window, .. } => 2 * window as usize + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a fresh pass over the candidates.
    pub fn iter(&self) -> Candidates {
        Candidates { seq: *self, next: 0 }
    }
}

impl IntoIterator for &CandidateSeq {
    type Item = CandidateFile;
    type IntoIter = Candidates;

    fn into_iter(self) -> Candidates {
        self.iter()
    }
}

/// Iterator over one pass of a [`CandidateSeq`].
#[derive(Debug, Clone)]
pub struct Candidates {
    seq: CandidateSeq,
    next: u32,
}

impl Iterator for Candidates {
    type Item = CandidateFile;

    fn next(&mut self) -> Option<CandidateFile> {
        let i = self.next;
        if i as usize >= self.seq.len() {
            return None;
        }
        self.next += 1;

        let timestamp = match self.seq.pattern {
            Pattern::Ascending { .. } => self.seq.minute + Duration::seconds(i as i64),
            Pattern::Around { center, .. } => center + Duration::seconds(nearest_first_offset(i)),
        };
        Some(CandidateFile {
            record_date: self.seq.record_date,
            timestamp,
            record_type: self.seq.record_type,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.seq.len().saturating_sub(self.next as usize);
        (left, Some(left))
    }
}

fn start_minute(session: &SessionRecord) -> NaiveDateTime {
    session
        .start
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(session.start)
}
