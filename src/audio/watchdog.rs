//! per session playback supervision.
//!
//! Two jobs: notice when a sender went away (no real audio for longer than
//! the no-playback timeout, the session should be torn down), and notice
//! when playback turned choppy (too many broken frames inside the window,
//! worth a log line and a metric but not a teardown).
use log::warn;

use crate::audio::frame::Frame;
use crate::common::stream_stats::MicroTimer;

const CHOPPY_WINDOW_US: u128 = 2_000_000;
// broken frames tolerated per window before we call it choppy
const CHOPPY_LIMIT: usize = 10;

pub struct Watchdog {
    no_playback_timeout_us: u128,
    last_playback: Option<u128>,
    created_at: u128,

    choppy_timer: Option<MicroTimer>,
    broken_in_window: usize,
    choppy_periods: usize,
}

impl Watchdog {
    pub fn new(no_playback_timeout_us: u128, now_us: u128) -> Watchdog {
        Watchdog {
            no_playback_timeout_us: no_playback_timeout_us,
            last_playback: None,
            created_at: now_us,
            choppy_timer: None,
            broken_in_window: 0,
            choppy_periods: 0,
        }
    }
    pub fn choppy_periods(&self) -> usize {
        self.choppy_periods
    }

    /// look at one frame that just went to the sink
    pub fn update_frame(&mut self, frame: &Frame, now_us: u128) -> () {
        if frame.has_flags(Frame::NOT_BLANK) {
            self.last_playback = Some(now_us);
        }
        let broken = frame.has_flags(Frame::NOT_COMPLETE) || frame.has_flags(Frame::PACKET_DROPS);
        if broken {
            self.broken_in_window += 1;
        }
        let timer = self
            .choppy_timer
            .get_or_insert_with(|| MicroTimer::new(now_us, CHOPPY_WINDOW_US));
        if timer.expired(now_us) {
            if self.broken_in_window > CHOPPY_LIMIT {
                self.choppy_periods += 1;
                warn!(
                    "watchdog: choppy playback, {} broken frames in window",
                    self.broken_in_window
                );
            }
            self.broken_in_window = 0;
            timer.reset(now_us);
        }
    }

    /// false once the silence outlived the timeout and the session should go
    pub fn is_alive(&self, now_us: u128) -> bool {
        let since = now_us.saturating_sub(self.last_playback.unwrap_or(self.created_at));
        since <= self.no_playback_timeout_us
    }
}
