//! PCM sample coding between f32 frames and packet payload bytes.
//!
//! The pipeline works in f32 internally and puts big endian integers on the
//! wire.  There is nothing clever here on purpose: for real time audio the
//! network has to be fast, and compression buys nothing but latency.
use byteorder::{ByteOrder, NetworkEndian};
use serde::{Deserialize, Serialize};

use crate::audio::sample_spec::SampleSpec;
use crate::common::status::Status;

/// byte formats a payload or mapped buffer can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum PcmFormat {
    /// 16 bit signed big endian, the classic L16 wire format
    S16Be,
    /// 32 bit IEEE float big endian
    F32Be,
}

impl PcmFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PcmFormat::S16Be => 2,
            PcmFormat::F32Be => 4,
        }
    }
}

/// one f32 sample to wire bytes
pub fn encode_sample(fmt: PcmFormat, v: f32, out: &mut [u8]) -> () {
    match fmt {
        PcmFormat::S16Be => {
            let clipped = v.clamp(-1.0, 1.0);
            NetworkEndian::write_i16(out, (clipped * 32767.0) as i16);
        }
        PcmFormat::F32Be => {
            NetworkEndian::write_f32(out, v);
        }
    }
}

/// wire bytes back to one f32 sample
pub fn decode_sample(fmt: PcmFormat, bytes: &[u8]) -> f32 {
    match fmt {
        PcmFormat::S16Be => NetworkEndian::read_i16(bytes) as f32 / 32767.0,
        PcmFormat::F32Be => NetworkEndian::read_f32(bytes),
    }
}

/// encodes interleaved f32 samples into packet payloads
#[derive(Debug, Clone, Copy)]
pub struct PcmEncoder {
    format: PcmFormat,
    spec: SampleSpec,
}

impl PcmEncoder {
    pub fn new(format: PcmFormat, spec: SampleSpec) -> PcmEncoder {
        PcmEncoder {
            format: format,
            spec: spec,
        }
    }
    /// payload size for a packet of n per-channel samples
    pub fn encoded_byte_count(&self, samples_per_chan: usize) -> usize {
        self.spec.overall(samples_per_chan) * self.format.bytes_per_sample()
    }
    /// encode interleaved samples into out, returns bytes written
    pub fn encode(&self, samples: &[f32], out: &mut [u8]) -> Result<usize, Status> {
        let width = self.format.bytes_per_sample();
        if out.len() < samples.len() * width {
            return Err(Status::NoMem);
        }
        let mut idx = 0;
        for v in samples {
            encode_sample(self.format, *v, &mut out[idx..idx + width]);
            idx += width;
        }
        Ok(idx)
    }
}

/// decodes packet payloads back into interleaved f32 samples
#[derive(Debug, Clone, Copy)]
pub struct PcmDecoder {
    format: PcmFormat,
    spec: SampleSpec,
}

impl PcmDecoder {
    pub fn new(format: PcmFormat, spec: SampleSpec) -> PcmDecoder {
        PcmDecoder {
            format: format,
            spec: spec,
        }
    }
    /// per-channel sample count held in a payload of this many bytes
    pub fn decoded_sample_count(&self, payload_len: usize) -> usize {
        payload_len / self.format.bytes_per_sample() / self.spec.num_channels()
    }
    /// decode into out, starting at a per-channel sample offset into the payload.
    ///
    /// returns the number of interleaved samples produced.  The depacketizer
    /// uses the offset when its cursor lands inside a packet.
    pub fn decode(
        &self,
        payload: &[u8],
        offset_per_chan: usize,
        out: &mut [f32],
    ) -> Result<usize, Status> {
        let width = self.format.bytes_per_sample();
        let start = self.spec.overall(offset_per_chan) * width;
        if start > payload.len() {
            return Err(Status::BadFormat);
        }
        let avail = (payload.len() - start) / width;
        let count = avail.min(out.len());
        let mut idx = start;
        for n in 0..count {
            out[n] = decode_sample(self.format, &payload[idx..idx + width]);
            idx += width;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod test_pcm {
    use super::*;

    #[test]
    fn sample_round_trip() {
        // an s16 sample should survive the trip within quantization error
        let mut buf = [0u8; 2];
        encode_sample(PcmFormat::S16Be, 0.5, &mut buf);
        let back = decode_sample(PcmFormat::S16Be, &buf);
        assert!((back - 0.5).abs() < 0.001);
        // floats should be exact
        let mut buf = [0u8; 4];
        encode_sample(PcmFormat::F32Be, 0.11, &mut buf);
        assert_eq!(decode_sample(PcmFormat::F32Be, &buf), 0.11);
    }
    #[test]
    fn clipping() {
        // values past full scale must clip, not wrap
        let mut buf = [0u8; 2];
        encode_sample(PcmFormat::S16Be, 1.5, &mut buf);
        assert!(decode_sample(PcmFormat::S16Be, &buf) > 0.99);
        encode_sample(PcmFormat::S16Be, -1.5, &mut buf);
        assert!(decode_sample(PcmFormat::S16Be, &buf) < -0.99);
    }
    #[test]
    fn encoder_sizes() {
        let spec = SampleSpec::new(100, 2);
        let enc = PcmEncoder::new(PcmFormat::S16Be, spec);
        assert_eq!(enc.encoded_byte_count(200), 800);
    }
    #[test]
    fn encode_decode_payload() {
        let spec = SampleSpec::new(100, 2);
        let enc = PcmEncoder::new(PcmFormat::S16Be, spec);
        let dec = PcmDecoder::new(PcmFormat::S16Be, spec);
        let samples = vec![0.11f32; 400];
        let mut payload = vec![0u8; enc.encoded_byte_count(200)];
        assert_eq!(enc.encode(&samples, &mut payload).unwrap(), 800);
        assert_eq!(dec.decoded_sample_count(payload.len()), 200);

        let mut out = vec![0.0f32; 400];
        let got = dec.decode(&payload, 0, &mut out).unwrap();
        assert_eq!(got, 400);
        for v in &out {
            assert!((v - 0.11).abs() < 0.001);
        }
    }
    #[test]
    fn decode_with_offset() {
        // reading from the middle of a payload should skip whole frames
        let spec = SampleSpec::new(100, 2);
        let enc = PcmEncoder::new(PcmFormat::S16Be, spec);
        let dec = PcmDecoder::new(PcmFormat::S16Be, spec);
        let mut samples = vec![0.0f32; 8];
        for (n, v) in samples.iter_mut().enumerate() {
            *v = n as f32 / 100.0;
        }
        let mut payload = vec![0u8; enc.encoded_byte_count(4)];
        enc.encode(&samples, &mut payload).unwrap();

        let mut out = vec![0.0f32; 4];
        let got = dec.decode(&payload, 2, &mut out).unwrap();
        assert_eq!(got, 4);
        assert!((out[0] - 0.04).abs() < 0.001);
    }
    #[test]
    fn decode_bad_offset() {
        let spec = SampleSpec::new(100, 2);
        let dec = PcmDecoder::new(PcmFormat::S16Be, spec);
        let payload = vec![0u8; 8];
        let mut out = vec![0.0f32; 4];
        assert_eq!(dec.decode(&payload, 100, &mut out), Err(Status::BadFormat));
    }
}
