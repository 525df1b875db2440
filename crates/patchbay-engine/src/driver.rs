//! Native output through cpal.
//!
//! The device callback drives [`AudioHandle::on_audio_callback`] directly.
//! Planar and interleaved scratch space is allocated before the stream starts,
//! so the callback neither allocates nor locks.

use anyhow::{anyhow, Context};
use arrayvec::ArrayVec;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, FromSample, Sample, SampleFormat, SampleRate, Stream, StreamConfig};

use crate::config::EngineConfig;
use crate::engine::{AudioHandle, MAX_DRIVER_CHANNELS};
use crate::scratch::PlanarScratch;

/// Running output stream. Audio stops when it is dropped.
pub struct OutputStream {
    stream: Stream,
    sample_rate: u32,
    channels: u16,
}

impl OutputStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn pause(&self) -> anyhow::Result<()> {
        self.stream.pause().context("failed to pause output stream")
    }
}

/// Opens the default output device and starts pulling audio from `handle`.
pub fn start_output(handle: AudioHandle, config: &EngineConfig) -> anyhow::Result<OutputStream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("failed to acquire default output device")?;
    let supported = choose_stream_config(&device, config)?;
    let mut stream_config: StreamConfig = supported.config();
    stream_config.buffer_size = BufferSize::Fixed(config.max_block);

    let sample_rate = stream_config.sample_rate.0;
    if sample_rate != config.sample_rate {
        tracing::warn!(
            device_rate = sample_rate,
            engine_rate = config.sample_rate,
            "device sample rate differs from the engine; latencies are reported in engine frames"
        );
    }
    let channels = stream_config.channels;

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output_stream::<f32>(&device, &stream_config, handle, config),
        SampleFormat::I16 => build_output_stream::<i16>(&device, &stream_config, handle, config),
        SampleFormat::U16 => build_output_stream::<u16>(&device, &stream_config, handle, config),
        other => Err(anyhow!("unsupported sample format: {other:?}")),
    }?;
    stream.play().context("failed to start output stream")?;
    tracing::info!(sample_rate, channels, "output stream running");

    Ok(OutputStream {
        stream,
        sample_rate,
        channels,
    })
}

fn build_output_stream<T>(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    mut handle: AudioHandle,
    config: &EngineConfig,
) -> anyhow::Result<Stream>
where
    T: Sample + cpal::SizedSample + FromSample<f32> + Send + 'static,
{
    let stride = usize::from(stream_config.channels).max(1);
    let frames = config.max_block.max(1) as usize;
    let mut scratch = PlanarScratch::new(stride.min(MAX_DRIVER_CHANNELS), frames);
    let mut interleaved = vec![0.0f32; frames * stride];

    let stream = device.build_output_stream(
        stream_config,
        move |output: &mut [T], _info| {
            for block in output.chunks_mut(frames * stride) {
                let block_frames = block.len() / stride;
                {
                    let mut planar: ArrayVec<&mut [f32], MAX_DRIVER_CHANNELS> = scratch
                        .slices_mut()
                        .map(|channel| &mut channel[..block_frames])
                        .collect();
                    handle.on_audio_callback(&[], &mut planar, block_frames);
                }
                scratch.interleave(&mut interleaved, stride, block_frames);
                for (sample, value) in block.iter_mut().zip(&interleaved) {
                    *sample = T::from_sample(*value);
                }
            }
        },
        move |err| {
            tracing::error!(?err, "cpal output stream error");
        },
        None,
    )?;
    Ok(stream)
}

fn choose_stream_config(
    device: &cpal::Device,
    config: &EngineConfig,
) -> anyhow::Result<cpal::SupportedStreamConfig> {
    let desired_rate = SampleRate(config.sample_rate);

    if let Ok(configs) = device.supported_output_configs() {
        for range in configs {
            if range.channels() == 2
                && range.sample_format() == SampleFormat::F32
                && range.min_sample_rate() <= desired_rate
                && desired_rate <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(desired_rate));
            }
        }
    }

    if let Ok(configs) = device.supported_output_configs() {
        for range in configs {
            if range.min_sample_rate() <= desired_rate && desired_rate <= range.max_sample_rate() {
                return Ok(range.with_sample_rate(desired_rate));
            }
        }
    }

    device
        .default_output_config()
        .context("failed to fetch default output config")
}
