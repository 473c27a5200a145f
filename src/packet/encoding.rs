//! payload type registry.
//!
//! The static entries are the classic RFC 3551 L16 assignments.  Callers
//! can register their own encodings in the dynamic payload type range, one
//! registry per context, so two contexts can give the same id different
//! meanings without stepping on each other.
use std::collections::HashMap;

use log::debug;

use crate::audio::pcm::{PcmDecoder, PcmFormat};
use crate::audio::sample_spec::SampleSpec;
use crate::common::status::Status;

/// dynamic payload types per RFC 3551
pub const DYNAMIC_PAYLOAD_MIN: u8 = 96;
pub const DYNAMIC_PAYLOAD_MAX: u8 = 127;

pub const PT_L16_STEREO: u8 = 10;
pub const PT_L16_MONO: u8 = 11;

/// how the samples behind one payload type look on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub payload_type: u8,
    pub spec: SampleSpec,
    pub format: PcmFormat,
}

impl Encoding {
    pub fn decoder(&self) -> PcmDecoder {
        PcmDecoder::new(self.format, self.spec)
    }
}

pub struct EncodingMap {
    map: HashMap<u8, Encoding>,
}

impl EncodingMap {
    /// a fresh map holding just the static assignments
    pub fn new() -> EncodingMap {
        let mut map = HashMap::new();
        map.insert(
            PT_L16_STEREO,
            Encoding {
                payload_type: PT_L16_STEREO,
                spec: SampleSpec::new(44100, 2),
                format: PcmFormat::S16Be,
            },
        );
        map.insert(
            PT_L16_MONO,
            Encoding {
                payload_type: PT_L16_MONO,
                spec: SampleSpec::new(44100, 1),
                format: PcmFormat::S16Be,
            },
        );
        EncodingMap { map: map }
    }
    pub fn find(&self, payload_type: u8) -> Option<&Encoding> {
        self.map.get(&payload_type)
    }
    /// user encodings go in the dynamic range only
    pub fn register(&mut self, encoding: Encoding) -> Result<(), Status> {
        if encoding.payload_type < DYNAMIC_PAYLOAD_MIN
            || encoding.payload_type > DYNAMIC_PAYLOAD_MAX
        {
            return Err(Status::BadOperation);
        }
        if self.map.contains_key(&encoding.payload_type) {
            return Err(Status::BadOperation);
        }
        self.map.insert(encoding.payload_type, encoding);
        Ok(())
    }
    /// pipelines pin their negotiated encoding here, statics included
    pub fn force_register(&mut self, encoding: Encoding) -> () {
        if self.map.contains_key(&encoding.payload_type) {
            debug!(
                "encoding map: payload type {} redefined for this context",
                encoding.payload_type
            );
        }
        self.map.insert(encoding.payload_type, encoding);
    }
}

impl Default for EncodingMap {
    fn default() -> EncodingMap {
        EncodingMap::new()
    }
}

#[cfg(test)]
mod test_encoding {
    use super::*;

    #[test]
    fn statics_are_preloaded() {
        let map = EncodingMap::new();
        let stereo = map.find(PT_L16_STEREO).unwrap();
        assert_eq!(stereo.spec.num_channels(), 2);
        assert_eq!(stereo.spec.rate(), 44100);
        let mono = map.find(PT_L16_MONO).unwrap();
        assert_eq!(mono.spec.num_channels(), 1);
        assert!(map.find(42).is_none());
    }
    #[test]
    fn user_encodings_live_in_the_dynamic_range() {
        let mut map = EncodingMap::new();
        let multitrack = Encoding {
            payload_type: 100,
            spec: SampleSpec::new(48000, 8),
            format: PcmFormat::F32Be,
        };
        map.register(multitrack).unwrap();
        assert_eq!(map.find(100).unwrap().spec.num_channels(), 8);
        // static range is off limits
        assert_eq!(
            map.register(Encoding {
                payload_type: 10,
                spec: SampleSpec::new(48000, 2),
                format: PcmFormat::S16Be,
            }),
            Err(Status::BadOperation)
        );
        // so is double registration
        assert_eq!(map.register(multitrack), Err(Status::BadOperation));
    }
    #[test]
    fn decoder_from_encoding() {
        let map = EncodingMap::new();
        let decoder = map.find(PT_L16_MONO).unwrap().decoder();
        assert_eq!(decoder.decoded_sample_count(88200 * 2), 88200);
    }
}
