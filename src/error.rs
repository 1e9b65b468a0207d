/// Error types shared across the summary parser and the card transport.
///
/// `ParseError` aborts discovery (no sessions without STR.edf). `CardError` is
/// per request; the prober folds it into "not confirmed".

use thiserror::Error;

/// STR.edf / EDF parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("EDF header truncated: need {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("EDF header field '{field}' is not a number: {value:?}")]
    BadNumber { field: &'static str, value: String },
    #[error("EDF start date/time is invalid: {0}")]
    BadTimestamp(String),
    #[error("signal '{0}' not found in STR.edf")]
    MissingSignal(&'static str),
    #[error("session {index} of record {record} ends before it starts (on={on}, off={off})")]
    InconsistentSession { record: usize, index: usize, on: i16, off: i16 },
    #[error("data record {record} extends past end of file")]
    DataOverrun { record: usize },
}

/// Card transport failures.
#[derive(Debug, Error)]
pub enum CardError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("card served a placeholder page instead of {0}")]
    NotAFile(String),
}
