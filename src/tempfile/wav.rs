// src/tempfile/wav.rs

use crate::format::SampleFormat;

/// Data length written before the real size is known.
pub const PROVISIONAL_DATA_BYTES: u64 = 0x7FFF_FFFF;

/// Header size for integer PCM.
pub const PCM_HEADER_BYTES: u64 = 44;
/// Header size for IEEE float: `fmt ` grows by cbSize and a `fact` chunk follows.
pub const FLOAT_HEADER_BYTES: u64 = 58;

pub fn header_len(format: &SampleFormat) -> u64 {
    if format.is_float() {
        FLOAT_HEADER_BYTES
    } else {
        PCM_HEADER_BYTES
    }
}

fn clamp_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

/// Build a RIFF/WAVE header for `data_bytes` of little-endian sample data.
pub fn header(format: &SampleFormat, data_bytes: u64) -> Vec<u8> {
    let float = format.is_float();
    let bpf = format.bytes_per_frame() as u64;
    let riff_len = data_bytes + header_len(format) - 8;

    let mut h = Vec::with_capacity(header_len(format) as usize);
    h.extend_from_slice(b"RIFF");
    h.extend_from_slice(&clamp_u32(riff_len).to_le_bytes());
    h.extend_from_slice(b"WAVEfmt ");
    h.extend_from_slice(&(if float { 18u32 } else { 16u32 }).to_le_bytes());
    h.extend_from_slice(&(if float { 3u16 } else { 1u16 }).to_le_bytes());
    h.extend_from_slice(&format.channels.to_le_bytes());
    h.extend_from_slice(&format.rate.to_le_bytes());
    h.extend_from_slice(&clamp_u32(format.rate as u64 * bpf).to_le_bytes());
    h.extend_from_slice(&(bpf as u16).to_le_bytes());
    h.extend_from_slice(&format.encoding.bits().to_le_bytes());

    if float {
        // cbSize, then the frame count
        h.extend_from_slice(&0u16.to_le_bytes());
        h.extend_from_slice(b"fact");
        h.extend_from_slice(&4u32.to_le_bytes());
        h.extend_from_slice(&clamp_u32(data_bytes / bpf.max(1)).to_le_bytes());
    }

    h.extend_from_slice(b"data");
    h.extend_from_slice(&clamp_u32(data_bytes).to_le_bytes());

    debug_assert_eq!(h.len() as u64, header_len(format));
    h
}
