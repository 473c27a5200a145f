//! maps PCM buffers between byte formats.
//!
//! Sinks and sources on the device side of the pipeline do not always speak
//! f32.  The mapper sits at that boundary and re-codes whole buffers; the
//! reader flavor pulls f32 frames from a nested reader and hands out bytes
//! in whatever format the consumer asked for.
use crate::audio::frame::{Frame, FrameReader};
use crate::audio::pcm::{decode_sample, encode_sample, PcmFormat};
use crate::common::status::Status;

/// stateless buffer-to-buffer format conversion
pub struct PcmMapper {
    in_format: PcmFormat,
    out_format: PcmFormat,
}

impl PcmMapper {
    pub fn new(in_format: PcmFormat, out_format: PcmFormat) -> PcmMapper {
        PcmMapper {
            in_format: in_format,
            out_format: out_format,
        }
    }
    pub fn in_format(&self) -> PcmFormat {
        self.in_format
    }
    pub fn out_format(&self) -> PcmFormat {
        self.out_format
    }
    /// number of output bytes produced for a given input length
    pub fn output_byte_count(&self, input_len: usize) -> usize {
        input_len / self.in_format.bytes_per_sample() * self.out_format.bytes_per_sample()
    }
    /// re-code input into output, returns samples converted
    pub fn map(&self, input: &[u8], output: &mut [u8]) -> Result<usize, Status> {
        let in_w = self.in_format.bytes_per_sample();
        let out_w = self.out_format.bytes_per_sample();
        let count = input.len() / in_w;
        if output.len() < count * out_w {
            return Err(Status::NoMem);
        }
        for n in 0..count {
            let v = decode_sample(self.in_format, &input[n * in_w..n * in_w + in_w]);
            encode_sample(self.out_format, v, &mut output[n * out_w..n * out_w + out_w]);
        }
        Ok(count)
    }
}

/// pulls f32 frames from a nested reader and maps them to bytes
pub struct PcmMapperReader<R: FrameReader> {
    inner: R,
    out_format: PcmFormat,
    scratch: Frame,
}

impl<R: FrameReader> PcmMapperReader<R> {
    pub fn new(inner: R, out_format: PcmFormat, frame_samples: usize) -> PcmMapperReader<R> {
        PcmMapperReader {
            inner: inner,
            out_format: out_format,
            scratch: Frame::new(frame_samples),
        }
    }
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }
    /// read one frame worth of samples, encoded as out_format bytes.
    ///
    /// out must hold exactly one frame.  Returns the frame flags.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<u8, Status> {
        let width = self.out_format.bytes_per_sample();
        if out.len() != self.scratch.num_samples() * width {
            return Err(Status::BadOperation);
        }
        self.scratch.clear();
        self.inner.read(&mut self.scratch)?;
        for (n, v) in self.scratch.samples().iter().enumerate() {
            encode_sample(self.out_format, *v, &mut out[n * width..n * width + width]);
        }
        Ok(self.scratch.flags())
    }
}
