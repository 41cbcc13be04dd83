// src/datasource/backend.rs

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::decoder::{DecodeBackend, DecodeStream};
use crate::error::{EditError, EditResult};
use crate::format::{SampleEncoding, SampleFormat};

/// Where a source's frames live.
pub(crate) enum Backend {
    Memory(Vec<u8>),
    Silence,
    /// Data region of a WAV file we wrote ourselves. Unlinked on drop.
    TempFile { path: PathBuf, data_offset: u64 },
    /// A media file read through the external decoder.
    Decoded {
        path: PathBuf,
        decoder: Arc<dyn DecodeBackend>,
    },
}

/// Per use-class cursor, present while that class is open.
pub(crate) enum BackendHandle {
    Resident,
    File { file: File, pos: u64 },
    Stream { stream: Box<dyn DecodeStream>, pos: u64 },
}

/// Destination of a read.
pub(crate) enum Target<'a> {
    Raw(&'a mut [u8]),
    Float(&'a mut [f32]),
}

impl Backend {
    pub(crate) fn open(&self) -> EditResult<BackendHandle> {
        match self {
            Backend::Memory(_) | Backend::Silence => Ok(BackendHandle::Resident),
            Backend::TempFile { path, .. } => {
                let file = File::open(path)
                    .map_err(|e| EditError::backend_open(path.display().to_string(), e))?;
                Ok(BackendHandle::File { file, pos: 0 })
            }
            Backend::Decoded { path, decoder, .. } => {
                let stream = decoder
                    .open(path)
                    .map_err(|e| EditError::backend_open(path.display().to_string(), e))?;
                Ok(BackendHandle::Stream { stream, pos: 0 })
            }
        }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        match self {
            Backend::TempFile { path, .. } | Backend::Decoded { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The file to delete when the source goes away.
    pub(crate) fn owned_file(&self) -> Option<&Path> {
        match self {
            Backend::TempFile { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Deliver `frames` frames starting at `start`. The caller has already
    /// clamped the range to the source length.
    pub(crate) fn read(
        &self,
        handle: &mut BackendHandle,
        format: &SampleFormat,
        start: u64,
        frames: usize,
        target: Target<'_>,
    ) -> EditResult<usize> {
        match (self, handle) {
            (Backend::Memory(data), BackendHandle::Resident) => {
                let bpf = format.bytes_per_frame();
                let from = start as usize * bpf;
                let bytes = &data[from..from + frames * bpf];
                match target {
                    Target::Raw(out) => out[..bytes.len()].copy_from_slice(bytes),
                    Target::Float(out) => {
                        format.to_float(bytes, &mut out[..frames * format.channels as usize])
                    }
                }
                Ok(frames)
            }

            (Backend::Silence, BackendHandle::Resident) => {
                match target {
                    Target::Raw(out) => {
                        let silent = if format.encoding == SampleEncoding::U8 { 0x80 } else { 0 };
                        out[..frames * format.bytes_per_frame()].fill(silent);
                    }
                    Target::Float(out) => out[..frames * format.channels as usize].fill(0.0),
                }
                Ok(frames)
            }

            (Backend::TempFile { data_offset, .. }, BackendHandle::File { file, pos }) => {
                let bpf = format.bytes_per_frame();
                let offset = data_offset + start * bpf as u64;
                if *pos != offset {
                    file.seek(SeekFrom::Start(offset))?;
                    *pos = offset;
                }

                match target {
                    Target::Raw(out) => {
                        let got = read_full(file, &mut out[..frames * bpf])?;
                        *pos += got as u64;
                        Ok(got / bpf)
                    }
                    Target::Float(out) => {
                        let mut scratch = vec![0u8; frames * bpf];
                        let got = read_full(file, &mut scratch)?;
                        *pos += got as u64;
                        let got_frames = got / bpf;
                        format.to_float(
                            &scratch[..got_frames * bpf],
                            &mut out[..got_frames * format.channels as usize],
                        );
                        Ok(got_frames)
                    }
                }
            }

            (Backend::Decoded { path, .. }, BackendHandle::Stream { stream, pos }) => {
                let decode_err = |e: anyhow::Error| EditError::Decode {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                };
                if *pos != start {
                    stream.seek(start).map_err(decode_err)?;
                    *pos = start;
                }

                let samples = frames * format.channels as usize;
                let mut scratch = Vec::new();
                let (floats, raw) = match target {
                    Target::Float(out) => (&mut out[..samples], None),
                    Target::Raw(out) => {
                        scratch.resize(samples, 0.0f32);
                        (&mut scratch[..], Some(out))
                    }
                };

                let got = stream.read_frames(frames, floats).map_err(decode_err)?;
                *pos += got as u64;

                if got < frames {
                    warn!(
                        "{}: stream ended {} frames early at frame {}, padding with silence",
                        path.display(),
                        frames - got,
                        start + got as u64
                    );
                    floats[got * format.channels as usize..].fill(0.0);
                }

                if let Some(out) = raw {
                    format.from_float(floats, &mut out[..frames * format.bytes_per_frame()]);
                }
                Ok(frames)
            }

            _ => Err(EditError::backend_open(
                self.path().map(|p| p.display().to_string()).unwrap_or_default(),
                "handle does not match backend",
            )),
        }
    }
}

/// Read until `buf` is full or the file ends.
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match file.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}
