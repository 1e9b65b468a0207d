/// Minimal EDF reader: fixed header, signal table and 16-bit data records.
///
/// Layout (EDF / EDF+ as written by ResMed devices):
///   0..8     version
///   168..176 start date  dd.mm.yy
///   176..184 start time  hh.mm.ss
///   184..192 header size in bytes
///   236..244 number of data records (-1 = unknown)
///   244..252 record duration
///   252..256 number of signals (ns)
///   256..    per-signal fields, each block ns entries wide:
///            label 16, transducer 80, dimension 8, phys min 8, phys max 8,
///            dig min 8, dig max 8, prefilter 80, samples/record 8, reserved 32
///
/// Only what the STR.edf session extractor needs is decoded.

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::ParseError;

const FIXED_HEADER_LEN: usize = 256;
/// Bytes of per-signal header preceding the samples-per-record field.
const SIGNAL_FIELDS_BEFORE_SPR: usize = 16 + 80 + 8 + 8 + 8 + 8 + 8 + 80;

#[derive(Debug)]
pub struct EdfFile<'a> {
    pub start: NaiveDateTime,
    pub labels: Vec<String>,
    samples_per_record: Vec<usize>,
    header_bytes: usize,
    num_records: usize,
    data: &'a [u8],
}

impl<'a> EdfFile<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(ParseError::Truncated { expected: FIXED_HEADER_LEN, got: data.len() });
        }

        let header_bytes = ascii_number(data, 184..192, "header_bytes")?;
        let declared_records = ascii_field(data, 236..244);
        let num_signals = ascii_number(data, 252..256, "num_signals")?;
        let start = parse_start(ascii_field(data, 168..176), ascii_field(data, 176..184))?;

        let table_end = FIXED_HEADER_LEN + num_signals * (SIGNAL_FIELDS_BEFORE_SPR + 8);
        if data.len() < table_end {
            return Err(ParseError::Truncated { expected: table_end, got: data.len() });
        }

        let labels = (0..num_signals)
            .map(|i| {
                let off = FIXED_HEADER_LEN + i * 16;
                ascii_field(data, off..off + 16).to_string()
            })
            .collect();

        let spr_offset = FIXED_HEADER_LEN + num_signals * SIGNAL_FIELDS_BEFORE_SPR;
        let samples_per_record = (0..num_signals)
            .map(|i| {
                let off = spr_offset + i * 8;
                ascii_number(data, off..off + 8, "samples_per_record")
            })
            .collect::<Result<Vec<_>, _>>()?;

        let record_len = samples_per_record.iter().sum::<usize>() * 2;
        let num_records = match declared_records.parse::<i64>() {
            Ok(n) if n >= 0 => n as usize,
            // -1: recording still open, infer from what is on disk
            Ok(_) if record_len > 0 => data.len().saturating_sub(header_bytes) / record_len,
            Ok(_) => 0,
            Err(_) => {
                return Err(ParseError::BadNumber {
                    field: "num_records",
                    value: declared_records.to_string(),
                });
            }
        };

        Ok(Self { start, labels, samples_per_record, header_bytes, num_records, data })
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn signal_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Samples of signal `signal` within data record `record`.
    pub fn samples(&self, record: usize, signal: usize) -> Result<Vec<i16>, ParseError> {
        let record_len: usize = self.samples_per_record.iter().sum::<usize>() * 2;
        let before: usize = self.samples_per_record[..signal].iter().sum();
        let count = self.samples_per_record[signal];

        let start = self.header_bytes + record * record_len + before * 2;
        let end = start + count * 2;
        let bytes = self.data.get(start..end).ok_or(ParseError::DataOverrun { record })?;

        Ok(bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}

fn ascii_field(data: &[u8], range: std::ops::Range<usize>) -> &str {
    std::str::from_utf8(&data[range]).unwrap_or("").trim()
}

fn ascii_number(
    data: &[u8],
    range: std::ops::Range<usize>,
    field: &'static str,
) -> Result<usize, ParseError> {
    let raw = ascii_field(data, range);
    raw.parse().map_err(|_| ParseError::BadNumber { field, value: raw.to_string() })
}

/// `dd.mm.yy` + `hh.mm.ss`, with the EDF two-digit year clipping at 1985.
fn parse_start(date: &str, time: &str) -> Result<NaiveDateTime, ParseError> {
    let bad = || ParseError::BadTimestamp(format!("{date} {time}"));
    let nums = |s: &str| -> Option<Vec<u32>> { s.split('.').map(|p| p.parse().ok()).collect() };

    let d = nums(date).filter(|v| v.len() == 3).ok_or_else(bad)?;
    let t = nums(time).filter(|v| v.len() == 3).ok_or_else(bad)?;
    let year = if d[2] < 85 { 2000 + d[2] } else { 1900 + d[2] };

    NaiveDate::from_ymd_opt(year as i32, d[1], d[0])
        .and_then(|day| day.and_hms_opt(t[0], t[1], t[2]))
        .ok_or_else(bad)
}
