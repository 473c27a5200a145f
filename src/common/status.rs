//! status kinds used on the data plane.
//!
//! The packet and frame paths need callers to branch on the *kind* of
//! failure (an empty queue is routine, a parse failure is not), so these are
//! a plain enum instead of the boxed errors used at thread entry points.
use thiserror::Error;

/// Everything a reader, writer, parser or composer can report.
///
/// `NoData` and `Unknown` are transient: the depacketizer turns them into
/// silence and keeps going.  `BadFormat` is what parsers return on anything
/// truncated or inconsistent; adversarial input must never panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Status {
    /// queue is empty right now, try again later
    #[error("no data")]
    NoData,
    /// a pool or buffer allocation failed
    #[error("no memory")]
    NoMem,
    /// bytes did not parse as the expected protocol
    #[error("bad format")]
    BadFormat,
    /// the interface exists but is not activated for this direction
    #[error("bad operation")]
    BadOperation,
    /// unknown slot, endpoint or session
    #[error("not found")]
    NotFound,
    /// unexpected failure from upstream, treated as transient
    #[error("unknown failure")]
    Unknown,
}

#[cfg(test)]
mod test_status {
    use super::*;

    #[test]
    fn display() {
        // kinds should print something a log line can use
        assert_eq!(format!("{}", Status::NoData), "no data");
        assert_eq!(format!("{}", Status::BadFormat), "bad format");
    }
}
