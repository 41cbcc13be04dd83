// src/format.rs

use std::fmt;

/// Storage encoding of one sample. Always little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    U8,
    S16,
    S24,
    S32,
    F32,
}

impl SampleEncoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleEncoding::U8 => 1,
            SampleEncoding::S16 => 2,
            SampleEncoding::S24 => 3,
            SampleEncoding::S32 | SampleEncoding::F32 => 4,
        }
    }

    pub fn bits(self) -> u16 {
        (self.bytes_per_sample() * 8) as u16
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleEncoding::F32)
    }

    /// Pick an integer encoding for a bit depth reported by a decoder.
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            0..=8 => SampleEncoding::U8,
            9..=16 => SampleEncoding::S16,
            17..=24 => SampleEncoding::S24,
            _ => SampleEncoding::S32,
        }
    }
}

/// Channel count, sample rate and encoding of a run of frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SampleFormat {
    pub channels: u16,
    pub rate: u32,
    pub encoding: SampleEncoding,
}

impl SampleFormat {
    pub fn new(channels: u16, rate: u32, encoding: SampleEncoding) -> Self {
        assert!(channels > 0, "a sample format needs at least one channel");
        Self {
            channels,
            rate,
            encoding,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.encoding.bytes_per_sample()
    }

    /// Size of one frame once converted to canonical f32 samples.
    pub fn float_frame_bytes(&self) -> usize {
        self.channels as usize * 4
    }

    pub fn is_float(&self) -> bool {
        self.encoding.is_float()
    }

    /// Bytes per frame for either the native or the float representation.
    pub fn frame_bytes(&self, want_float: bool) -> usize {
        if want_float {
            self.float_frame_bytes()
        } else {
            self.bytes_per_frame()
        }
    }

    /// Convert native-encoded bytes into interleaved f32 samples.
    ///
    /// `raw` must hold whole frames; `out` must hold one f32 per sample.
    pub fn to_float(&self, raw: &[u8], out: &mut [f32]) {
        let width = self.encoding.bytes_per_sample();
        debug_assert_eq!(raw.len() / width, out.len());

        for (dst, src) in out.iter_mut().zip(raw.chunks_exact(width)) {
            *dst = match self.encoding {
                SampleEncoding::U8 => (src[0] as f32 - 128.0) / 128.0,
                SampleEncoding::S16 => i16::from_le_bytes([src[0], src[1]]) as f32 / 32_768.0,
                SampleEncoding::S24 => {
                    let v = i32::from_le_bytes([0, src[0], src[1], src[2]]) >> 8;
                    v as f32 / 8_388_608.0
                }
                SampleEncoding::S32 => {
                    let v = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
                    (v as f64 / 2_147_483_648.0) as f32
                }
                SampleEncoding::F32 => f32::from_le_bytes([src[0], src[1], src[2], src[3]]),
            };
        }
    }

    /// Convert interleaved f32 samples into native-encoded bytes.
    /// Integer encodings clamp to their representable range.
    pub fn from_float(&self, samples: &[f32], raw: &mut [u8]) {
        let width = self.encoding.bytes_per_sample();
        debug_assert_eq!(raw.len() / width, samples.len());

        for (src, dst) in samples.iter().zip(raw.chunks_exact_mut(width)) {
            let s = if src.is_finite() { *src } else { 0.0 };
            match self.encoding {
                SampleEncoding::U8 => {
                    dst[0] = (s * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8;
                }
                SampleEncoding::S16 => {
                    let v = (s * 32_768.0).round().clamp(-32_768.0, 32_767.0) as i16;
                    dst.copy_from_slice(&v.to_le_bytes());
                }
                SampleEncoding::S24 => {
                    let v = (s * 8_388_608.0).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
                    dst.copy_from_slice(&v.to_le_bytes()[..3]);
                }
                SampleEncoding::S32 => {
                    let v = (s as f64 * 2_147_483_648.0)
                        .round()
                        .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
                    dst.copy_from_slice(&v.to_le_bytes());
                }
                SampleEncoding::F32 => dst.copy_from_slice(&s.to_le_bytes()),
            }
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch, {} Hz, {:?}",
            self.channels, self.rate, self.encoding
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes_follow_encoding() {
        let fmt = SampleFormat::new(2, 44_100, SampleEncoding::S24);
        assert_eq!(fmt.bytes_per_frame(), 6);
        assert_eq!(fmt.float_frame_bytes(), 8);
        assert_eq!(fmt.frame_bytes(true), 8);
        assert_eq!(fmt.frame_bytes(false), 6);
    }

    #[test]
    fn integer_samples_survive_a_float_round_trip() {
        for encoding in [
            SampleEncoding::U8,
            SampleEncoding::S16,
            SampleEncoding::S24,
            SampleEncoding::S32,
        ] {
            let fmt = SampleFormat::new(1, 8_000, encoding);
            let width = encoding.bytes_per_sample();
            let raw: Vec<u8> = (0..width * 64).map(|i| (i * 37 % 251) as u8).collect();

            let mut floats = vec![0.0f32; 64];
            fmt.to_float(&raw, &mut floats);
            let mut back = vec![0u8; raw.len()];
            fmt.from_float(&floats, &mut back);

            if encoding == SampleEncoding::S32 {
                // f32 keeps 24 bits of mantissa; compare the top three bytes.
                for (a, b) in raw.chunks(4).zip(back.chunks(4)) {
                    let a = i32::from_le_bytes([a[0], a[1], a[2], a[3]]);
                    let b = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    assert!((a as i64 - b as i64).abs() <= 256);
                }
            } else {
                assert_eq!(raw, back, "{encoding:?}");
            }
        }
    }

    #[test]
    fn encoding_clamps_out_of_range_samples() {
        let fmt = SampleFormat::new(1, 8_000, SampleEncoding::S16);
        let mut raw = [0u8; 6];
        fmt.from_float(&[2.0, -2.0, f32::NAN], &mut raw);
        assert_eq!(i16::from_le_bytes([raw[0], raw[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([raw[2], raw[3]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([raw[4], raw[5]]), 0);
    }
}
