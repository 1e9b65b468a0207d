/// Therapy sessions from STR.edf, plus the noon-split record-date rule.
///
/// STR.edf carries one data record per day, each starting at noon of
/// `header_date + record_index`. The `MaskOn` / `MaskOff` signals hold one
/// slot per session, in minutes since that noon. Unused slots are zero or
/// negative.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::edf::EdfFile;
use crate::error::ParseError;

const MINUTES_PER_DAY: i16 = 1440;

/// One mask-on/mask-off interval at minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SessionRecord {
    pub fn duration_min(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Parse STR.edf bytes into sessions ordered by start time.
pub fn extract_sessions(bytes: &[u8]) -> Result<Vec<SessionRecord>, ParseError> {
    let edf = EdfFile::parse(bytes)?;
    let mask_on = edf.signal_index("MaskOn").ok_or(ParseError::MissingSignal("MaskOn"))?;
    let mask_off = edf.signal_index("MaskOff").ok_or(ParseError::MissingSignal("MaskOff"))?;

    let first_day = edf.start.date();
    let mut sessions = Vec::new();

    for record in 0..edf.num_records() {
        let noon = (first_day + Duration::days(record as i64)).and_time(noon_time());
        let ons = edf.samples(record, mask_on)?;
        let offs = edf.samples(record, mask_off)?;

        for (index, (&on, &off)) in ons.iter().zip(offs.iter()).enumerate() {
            if !in_day(on) || !in_day(off) {
                continue;
            }
            if off < on {
                return Err(ParseError::InconsistentSession { record, index, on, off });
            }
            if off == on {
                log::debug!("Skipping zero-length session slot {index} in record {record}");
                continue;
            }
            sessions.push(SessionRecord {
                id: 0,
                start: noon + Duration::minutes(on as i64),
                end: noon + Duration::minutes(off as i64),
            });
        }
    }

    sessions.sort_by_key(|s| s.start);
    for (id, s) in sessions.iter_mut().enumerate() {
        s.id = id;
    }
    Ok(sessions)
}

fn in_day(minutes: i16) -> bool {
    minutes > 0 && minutes < MINUTES_PER_DAY
}

fn noon_time() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Folder date for a session: overnight sessions (started before noon) are
/// filed under the previous calendar day, matching the device's own bucketing.
pub fn record_date(session: &SessionRecord) -> NaiveDate {
    let day = session.start.date();
    if session.start.hour() < 12 {
        day.pred_opt().unwrap_or(day)
    } else {
        day
    }
}
