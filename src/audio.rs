// src/audio.rs

use std::sync::Arc;

use anyhow::{Context, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat as DeviceFormat, SizedSample, Stream, StreamConfig};
use log::{error, info};

use crate::format::SampleFormat;
use crate::player::Player;

/// Output device picked for a given source format.
pub struct OutputConfig {
    pub device: Device,
    pub config: StreamConfig,
    pub sample_format: DeviceFormat,
}

/// Find an output configuration running at the source's sample rate,
/// preferring one with the same channel count.
pub fn setup_output_device(format: &SampleFormat) -> anyhow::Result<OutputConfig> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no output device available")?;

    let rate = cpal::SampleRate(format.rate);
    let mut candidates: Vec<_> = device
        .supported_output_configs()
        .context("querying output configurations")?
        .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .collect();
    candidates.sort_by_key(|c| c.channels() != format.channels);

    let Some(range) = candidates.into_iter().next() else {
        bail!("output device cannot play {} Hz", format.rate);
    };
    let supported = range.with_sample_rate(rate);
    let sample_format = supported.sample_format();
    let config = supported.config();

    info!(
        "output device: {} channels at {} Hz ({:?})",
        config.channels, config.sample_rate.0, sample_format
    );
    Ok(OutputConfig {
        device,
        config,
        sample_format,
    })
}

/// Map interleaved frames of `in_ch` channels onto `out_ch` channels.
/// Mono is duplicated, stereo folded to mono by averaging, wider layouts
/// averaged in groups or repeated round-robin.
pub fn remix(input: &[f32], in_ch: usize, output: &mut [f32], out_ch: usize) {
    let frames = (input.len() / in_ch).min(output.len() / out_ch);
    if in_ch == out_ch {
        output[..frames * out_ch].copy_from_slice(&input[..frames * in_ch]);
        return;
    }

    let ins = input.chunks_exact(in_ch);
    let outs = output.chunks_exact_mut(out_ch);
    for (src, dst) in ins.zip(outs) {
        if out_ch < in_ch {
            let factor = in_ch as f32 / out_ch as f32;
            for (oc, out) in dst.iter_mut().enumerate() {
                let start = (oc as f32 * factor).floor() as usize;
                let end = (((oc + 1) as f32 * factor).ceil() as usize).min(in_ch);
                let group = &src[start..end];
                *out = if group.is_empty() {
                    0.0
                } else {
                    group.iter().sum::<f32>() / group.len() as f32
                };
            }
        } else {
            for (oc, out) in dst.iter_mut().enumerate() {
                *out = src[oc % in_ch];
            }
        }
    }
}

/// Build a stream whose callback pulls float frames from `player`.
/// Frames the player cannot deliver play as silence.
pub fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    player: Arc<Player>,
    in_ch: usize,
    err_fn: fn(cpal::StreamError),
) -> anyhow::Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let out_ch = config.channels as usize;
    let mut source = Vec::new();
    let mut mixed = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / out_ch;
                source.resize(frames * in_ch, 0.0);
                mixed.resize(frames * out_ch, 0.0);

                let got = player.supply_float(&mut source);
                remix(&source[..got * in_ch], in_ch, &mut mixed, out_ch);
                mixed[got * out_ch..].fill(0.0);

                for (out, s) in data.iter_mut().zip(&mixed) {
                    *out = T::from_sample(*s);
                }
            },
            err_fn,
            None,
        )
        .map_err(Into::into)
}

/// A running output stream bound to a [`Player`].
pub struct AudioOutput {
    _stream: Stream,
}

impl AudioOutput {
    pub fn start(player: Arc<Player>, format: &SampleFormat) -> anyhow::Result<Self> {
        let OutputConfig {
            device,
            config,
            sample_format,
        } = setup_output_device(format)?;
        let err_fn = |err: cpal::StreamError| error!("output stream error: {err}");
        let in_ch = format.channels as usize;

        let stream = match sample_format {
            DeviceFormat::F32 => build_stream::<f32>(&device, &config, player, in_ch, err_fn)?,
            DeviceFormat::I16 => build_stream::<i16>(&device, &config, player, in_ch, err_fn)?,
            DeviceFormat::U16 => build_stream::<u16>(&device, &config, player, in_ch, err_fn)?,
            other => bail!("unsupported device sample format: {other:?}"),
        };
        stream.play()?;
        Ok(Self { _stream: stream })
    }
}
