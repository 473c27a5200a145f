//! combines the per-session streams into the one frame the sink pulls.
//!
//! Every session hands over its frame for the tick, the mixer sums them
//! with the master gain and merges the flags so the sink still learns about
//! gaps and drops anywhere in the room.
use crate::audio::frame::{Frame, FrameReader};
use crate::common::status::Status;
use crate::utils::{clip_float, get_frame_power_in_db};

pub struct Mixer {
    master_vol: f32,
    scratch: Frame,
    last_power_db: f64,
}

impl Mixer {
    pub fn new(frame_samples: usize) -> Mixer {
        Mixer {
            master_vol: 1.0,
            scratch: Frame::new(frame_samples),
            last_power_db: -60.0,
        }
    }
    pub fn get_master(&self) -> f32 {
        self.master_vol
    }
    pub fn set_master(&mut self, v: f32) -> () {
        self.master_vol = clip_float(v);
    }
    /// power of the last mixed frame in dB, for level metrics
    pub fn get_power_db(&self) -> f64 {
        self.last_power_db
    }

    /// pull one frame from every reader and sum them into out
    pub fn mix<'a, R, I>(&mut self, readers: I, out: &mut Frame) -> Result<(), Status>
    where
        R: FrameReader + 'a,
        I: Iterator<Item = &'a mut R>,
    {
        out.clear();
        let mut sources = 0;
        for reader in readers {
            reader.read(&mut self.scratch)?;
            for (o, v) in out
                .samples_mut()
                .iter_mut()
                .zip(self.scratch.samples().iter())
            {
                *o = (*o + v * self.master_vol).clamp(-1.0, 1.0);
            }
            out.add_flags(self.scratch.flags());
            if out.capture_timestamp() == 0 && self.scratch.capture_timestamp() != 0 {
                out.set_capture_timestamp(self.scratch.capture_timestamp());
            }
            sources += 1;
        }
        if sources == 0 {
            // empty room: pure silence
            out.add_flags(Frame::NOT_COMPLETE);
        }
        self.last_power_db = get_frame_power_in_db(out.samples());
        Ok(())
    }
}

#[cfg(test)]
mod test_mixer {
    use super::*;

    struct ConstSession {
        value: f32,
        cts: i64,
    }
    impl FrameReader for ConstSession {
        fn read(&mut self, frame: &mut Frame) -> Result<(), Status> {
            frame.clear();
            for v in frame.samples_mut() {
                *v = self.value;
            }
            frame.add_flags(Frame::NOT_BLANK);
            frame.set_capture_timestamp(self.cts);
            Ok(())
        }
    }

    #[test]
    fn build_mixer() {
        let mut mixer = Mixer::new(64);
        assert_eq!(mixer.get_master(), 1.0);
        mixer.set_master(0.5);
        assert_eq!(mixer.get_master(), 0.5);
    }
    #[test]
    fn sums_sessions() {
        let mut mixer = Mixer::new(8);
        let mut sessions = vec![
            ConstSession { value: 0.25, cts: 100 },
            ConstSession { value: 0.25, cts: 200 },
        ];
        let mut out = Frame::new(8);
        mixer.mix(sessions.iter_mut(), &mut out).unwrap();
        for v in out.samples() {
            assert!((v - 0.5).abs() < 0.0001);
        }
        assert!(out.has_flags(Frame::NOT_BLANK));
        // first session with a known capture time wins
        assert_eq!(out.capture_timestamp(), 100);
    }
    #[test]
    fn clips_hot_mix() {
        let mut mixer = Mixer::new(8);
        let mut sessions = vec![
            ConstSession { value: 0.8, cts: 0 },
            ConstSession { value: 0.8, cts: 0 },
        ];
        let mut out = Frame::new(8);
        mixer.mix(sessions.iter_mut(), &mut out).unwrap();
        for v in out.samples() {
            assert!(*v <= 1.0);
        }
    }
    #[test]
    fn power_tracks_the_mix() {
        let mut mixer = Mixer::new(8);
        let mut sessions = vec![ConstSession { value: 0.5, cts: 0 }];
        let mut out = Frame::new(8);
        mixer.mix(sessions.iter_mut(), &mut out).unwrap();
        assert!((mixer.get_power_db().round() + 6.0).abs() < 0.5);
    }
    #[test]
    fn empty_room_is_silence() {
        let mut mixer = Mixer::new(8);
        let mut sessions: Vec<ConstSession> = vec![];
        let mut out = Frame::new(8);
        mixer.mix(sessions.iter_mut(), &mut out).unwrap();
        assert!(out.samples().iter().all(|v| *v == 0.0));
        assert!(out.has_flags(Frame::NOT_COMPLETE));
        assert!(!out.has_flags(Frame::NOT_BLANK));
    }
}
