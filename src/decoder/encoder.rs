// src/decoder/encoder.rs

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Result;
use hound::{SampleFormat as HoundFormat, WavSpec, WavWriter};

use crate::format::{SampleEncoding, SampleFormat};

/// Writes raw frames out to a media file.
pub trait EncodeBackend: Send + Sync {
    fn create(&self, path: &Path, format: SampleFormat) -> Result<Box<dyn EncodeSink>>;
}

/// An encoder that is currently writing.
pub trait EncodeSink {
    /// Append whole frames in the sink's native sample encoding.
    fn write(&mut self, raw: &[u8]) -> Result<()>;
    /// Flush and close the file, fixing up its header.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// RIFF/WAVE encoder built on hound.
#[derive(Debug, Default, Clone, Copy)]
pub struct HoundEncoder;

impl EncodeBackend for HoundEncoder {
    fn create(&self, path: &Path, format: SampleFormat) -> Result<Box<dyn EncodeSink>> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.rate,
            bits_per_sample: format.encoding.bits(),
            sample_format: if format.is_float() {
                HoundFormat::Float
            } else {
                HoundFormat::Int
            },
        };

        let file = File::create(path)?;
        let buf_writer = BufWriter::new(file);
        let writer = WavWriter::new(buf_writer, spec).map_err(unwrap_io)?;

        Ok(Box::new(HoundSink {
            writer,
            encoding: format.encoding,
        }))
    }
}

struct HoundSink {
    writer: WavWriter<BufWriter<File>>,
    encoding: SampleEncoding,
}

impl EncodeSink for HoundSink {
    fn write(&mut self, raw: &[u8]) -> Result<()> {
        let width = self.encoding.bytes_per_sample();
        for s in raw.chunks_exact(width) {
            let written = match self.encoding {
                // hound stores 8-bit as unsigned but takes signed input
                SampleEncoding::U8 => self.writer.write_sample((s[0] as i16 - 128) as i8),
                SampleEncoding::S16 => self.writer.write_sample(i16::from_le_bytes([s[0], s[1]])),
                SampleEncoding::S24 => self
                    .writer
                    .write_sample(i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8),
                SampleEncoding::S32 => self
                    .writer
                    .write_sample(i32::from_le_bytes([s[0], s[1], s[2], s[3]])),
                SampleEncoding::F32 => self
                    .writer
                    .write_sample(f32::from_le_bytes([s[0], s[1], s[2], s[3]])),
            };
            written.map_err(unwrap_io)?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.writer.finalize().map_err(unwrap_io)
    }
}

/// Surface hound's I/O failures as plain `io::Error` so callers can tell a
/// full disk apart.
fn unwrap_io(err: hound::Error) -> anyhow::Error {
    match err {
        hound::Error::IoError(io) => io.into(),
        other => other.into(),
    }
}
