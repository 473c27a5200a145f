//! wrap safe ordering for the modular counters that ride in packets.
//!
//! Stream timestamps are unsigned 32 bit sample counters and block numbers
//! are unsigned 16 bit, both of which wrap in normal operation.  Ordering is
//! always decided by looking at the difference as a signed value of the same
//! width, so a comparison stays correct across the wrap point.

/// true if stream timestamp a comes strictly before b
pub fn ts_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// true if a comes before b or they are equal
pub fn ts_before_eq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

/// signed distance from b to a in samples
pub fn ts_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// true if sequence number a comes strictly before b
pub fn seq_before(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// signed distance from b to a in sequence numbers
pub fn seq_diff(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

/// true if FEC block number a comes strictly before b
pub fn blk_before(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// signed distance from block b to block a
pub fn blk_diff(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}
