//! report values exchanged between participants, plus the NTP clock math.
//!
//! RTCP timestamps ride in 32.32 fixed point NTP format.  Everything inside
//! the pipeline is unix nanoseconds, so the conversions live here and
//! nowhere else.
use serde::{Deserialize, Serialize};

/// seconds between the NTP epoch (1900) and the unix epoch (1970)
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const NS_PER_SEC: i64 = 1_000_000_000;

/// unix nanoseconds to 32.32 NTP
pub fn ns_to_ntp(ns: i64) -> u64 {
    let secs = ns / NS_PER_SEC + NTP_UNIX_OFFSET;
    let frac_ns = ns % NS_PER_SEC;
    let frac = ((frac_ns as u128) << 32) / NS_PER_SEC as u128;
    ((secs as u64) << 32) | frac as u64
}

/// 32.32 NTP back to unix nanoseconds
pub fn ntp_to_ns(ntp: u64) -> i64 {
    let secs = (ntp >> 32) as i64 - NTP_UNIX_OFFSET;
    let frac = ntp & 0xFFFF_FFFF;
    let frac_ns = (frac as u128 * NS_PER_SEC as u128) >> 32;
    secs * NS_PER_SEC + frac_ns as i64
}

/// middle 32 bits, the compact timestamp used by LSR/DLSR and DLRR
pub fn ntp_mid32(ntp: u64) -> u32 {
    ((ntp >> 16) & 0xFFFF_FFFF) as u32
}

/// 1/65536 second units (the DLSR/DLRR delay format) to nanoseconds
pub fn units_to_ns(units: u32) -> i64 {
    (units as i64 * NS_PER_SEC) >> 16
}

pub fn ns_to_units(ns: i64) -> u32 {
    (((ns as i128) << 16) / NS_PER_SEC as i128) as u32
}

/// what a sending participant says about its own stream
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SendReport {
    pub ssrc: u32,
    /// wall clock paired with rtp_timestamp, unix nanoseconds
    pub origin_ns: i64,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub byte_count: u32,
}

/// what a receiving participant says about one remote stream
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecvReport {
    /// the remote stream being reported on
    pub ssrc: u32,
    pub fraction_lost: f64,
    pub cumulative_lost: i64,
    pub last_seqnum: u32,
    /// interarrival jitter in timestamp units
    pub jitter: u32,
}
