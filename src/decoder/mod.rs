// src/decoder/mod.rs

pub mod encoder;

use std::fs::File;
use std::io;
use std::path::Path;

use anyhow::{Result, anyhow};
use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat as SymphoniaSampleFormat;
use symphonia::default::{get_codecs, get_probe};

use crate::format::{SampleEncoding, SampleFormat};

pub use encoder::{EncodeBackend, EncodeSink, HoundEncoder};

/// What a probe learns about a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub frames: u64,
    pub format: SampleFormat,
}

/// Turns container/compressed media into canonical interleaved f32 frames.
pub trait DecodeBackend: Send + Sync {
    fn probe(&self, path: &Path) -> Result<StreamInfo>;
    fn open(&self, path: &Path) -> Result<Box<dyn DecodeStream>>;
}

/// One decode cursor into a media file.
pub trait DecodeStream: Send {
    /// Position the cursor so the next read starts at `frame`.
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Decode up to `count` frames into `out` (interleaved). Returns the
    /// number of frames delivered; fewer than `count` means end of stream.
    fn read_frames(&mut self, count: usize, out: &mut [f32]) -> Result<usize>;
}

/// Decode backend built on symphonia's default probe and codec registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaBackend;

impl SymphoniaBackend {
    fn open_reader(path: &Path) -> Result<(Box<dyn FormatReader>, u32)> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("no default audio track"))?;
        let track_id = track.id;
        Ok((format, track_id))
    }

    fn codec_params(format: &dyn FormatReader, track_id: u32) -> Result<CodecParameters> {
        format
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .map(|t| t.codec_params.clone())
            .ok_or_else(|| anyhow!("track {track_id} vanished"))
    }
}

fn encoding_of(params: &CodecParameters) -> SampleEncoding {
    match params.sample_format {
        Some(SymphoniaSampleFormat::U8) | Some(SymphoniaSampleFormat::S8) => SampleEncoding::U8,
        Some(SymphoniaSampleFormat::U16) | Some(SymphoniaSampleFormat::S16) => SampleEncoding::S16,
        Some(SymphoniaSampleFormat::U24) | Some(SymphoniaSampleFormat::S24) => SampleEncoding::S24,
        Some(SymphoniaSampleFormat::U32) | Some(SymphoniaSampleFormat::S32) => SampleEncoding::S32,
        Some(SymphoniaSampleFormat::F32) | Some(SymphoniaSampleFormat::F64) => SampleEncoding::F32,
        // lossy codecs decode to float and report no integer depth
        None => params
            .bits_per_sample
            .map(SampleEncoding::from_bits)
            .unwrap_or(SampleEncoding::F32),
    }
}

impl DecodeBackend for SymphoniaBackend {
    fn probe(&self, path: &Path) -> Result<StreamInfo> {
        let (format, track_id) = Self::open_reader(path)?;
        let params = Self::codec_params(&*format, track_id)?;

        let channels = params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| anyhow!("unknown channel count"))?;
        let rate = params
            .sample_rate
            .ok_or_else(|| anyhow!("unknown sample rate"))?;
        let format_desc = SampleFormat::new(channels as u16, rate, encoding_of(&params));

        let frames = match params.n_frames {
            Some(n) => n,
            None => {
                // Streams without a length in their header are measured by
                // decoding them once.
                debug!("{}: no frame count in header, scanning", path.display());
                drop(format);
                let mut stream = self.open(path)?;
                let mut scratch = vec![0.0f32; 4096 * channels];
                let mut total = 0u64;
                loop {
                    let got = stream.read_frames(4096, &mut scratch)?;
                    total += got as u64;
                    if got < 4096 {
                        break;
                    }
                }
                total
            }
        };

        Ok(StreamInfo {
            frames,
            format: format_desc,
        })
    }

    fn open(&self, path: &Path) -> Result<Box<dyn DecodeStream>> {
        let (format, track_id) = Self::open_reader(path)?;
        let params = Self::codec_params(&*format, track_id)?;
        let channels = params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| anyhow!("unknown channel count"))?;
        let decoder = get_codecs().make(&params, &DecoderOptions::default())?;

        Ok(Box::new(SymphoniaStream {
            format,
            decoder,
            track_id,
            channels,
            sample_buf: None,
            sample_buf_frames: 0,
            pending: Vec::new(),
            pending_pos: 0,
            skip_until: 0,
            finished: false,
        }))
    }
}

struct SymphoniaStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_buf_frames: u64,
    /// Decoded samples not yet handed out.
    pending: Vec<f32>,
    pending_pos: usize,
    /// Frames before this timestamp are decoder lead-in after a seek.
    skip_until: u64,
    finished: bool,
}

impl SymphoniaStream {
    /// Decode the next packet of our track into `pending`.
    /// Returns false at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }
            // Audio tracks use a 1/sample_rate time base, so ts counts frames.
            let ts = packet.ts();

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let capacity = decoded.capacity() as u64;
                    if self.sample_buf.is_none() || capacity > self.sample_buf_frames {
                        self.sample_buf = Some(SampleBuffer::<f32>::new(capacity, *decoded.spec()));
                        self.sample_buf_frames = capacity;
                    }
                    let Some(buf) = self.sample_buf.as_mut() else {
                        continue;
                    };
                    buf.copy_interleaved_ref(decoded);

                    let samples = buf.samples();
                    let frames = samples.len() / self.channels;
                    let skip = self.skip_until.saturating_sub(ts).min(frames as u64) as usize;

                    self.pending.clear();
                    self.pending.extend_from_slice(&samples[skip * self.channels..]);
                    self.pending_pos = 0;
                    if !self.pending.is_empty() {
                        return Ok(true);
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("skipping undecodable packet at ts {ts}: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl DecodeStream for SymphoniaStream {
    fn seek(&mut self, frame: u64) -> Result<()> {
        self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: frame,
                track_id: self.track_id,
            },
        )?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.skip_until = frame;
        self.finished = false;
        Ok(())
    }

    fn read_frames(&mut self, count: usize, out: &mut [f32]) -> Result<usize> {
        let wanted = count * self.channels;
        debug_assert!(out.len() >= wanted);
        let mut filled = 0;

        while filled < wanted && !self.finished {
            if self.pending_pos >= self.pending.len() && !self.decode_next()? {
                self.finished = true;
                break;
            }
            let avail = &self.pending[self.pending_pos..];
            let n = avail.len().min(wanted - filled);
            out[filled..filled + n].copy_from_slice(&avail[..n]);
            filled += n;
            self.pending_pos += n;
        }

        Ok(filled / self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat as HoundFormat, WavSpec, WavWriter};

    fn write_ramp(path: &Path, frames: usize) {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: HoundFormat::Int,
        };
        let mut w = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            w.write_sample(i as i16).unwrap();
            w.write_sample(-(i as i16)).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn probe_reports_wav_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 1_000);

        let info = SymphoniaBackend.probe(&path).unwrap();
        assert_eq!(info.frames, 1_000);
        assert_eq!(info.format.channels, 2);
        assert_eq!(info.format.rate, 8_000);
        assert_eq!(info.format.encoding, SampleEncoding::S16);
    }

    #[test]
    fn seek_lands_on_the_requested_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 5_000);

        let mut stream = SymphoniaBackend.open(&path).unwrap();
        stream.seek(3_210).unwrap();
        let mut out = vec![0.0f32; 8];
        assert_eq!(stream.read_frames(4, &mut out).unwrap(), 4);
        assert_eq!((out[0] * 32_768.0).round() as i32, 3_210);
        assert_eq!((out[1] * 32_768.0).round() as i32, -3_210);
        assert_eq!((out[6] * 32_768.0).round() as i32, 3_213);
    }

    #[test]
    fn reading_past_the_end_comes_up_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 100);

        let mut stream = SymphoniaBackend.open(&path).unwrap();
        stream.seek(90).unwrap();
        let mut out = vec![0.0f32; 64];
        assert_eq!(stream.read_frames(32, &mut out).unwrap(), 10);
        assert_eq!(stream.read_frames(32, &mut out).unwrap(), 0);
    }
}
