//! Audio capture module using cpal

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize};
use std::any::Any;
use std::sync::mpsc::Sender;
use thiserror::Error;

use crate::settings::RecorderSettings;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No input device available")]
    NoInputDevice,
    #[error("Failed to get input config: {0}")]
    Config(String),
    #[error("Failed to build input stream: {0}")]
    Stream(String),
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

/// What the recorder asks the device for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: u32,
}

impl From<&RecorderSettings> for CaptureParams {
    fn from(settings: &RecorderSettings) -> Self {
        Self {
            sample_rate: settings.freq,
            channels: settings.channels,
            frames_per_buffer: settings.frames_per_buffer,
        }
    }
}

/// What the device actually delivers; this is what ends up in the WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    /// Number of interleaved samples in `secs` seconds of audio.
    pub fn samples_for(&self, secs: u32) -> usize {
        self.sample_rate as usize * self.channels as usize * secs as usize
    }
}

/// An open capture stream. Frames keep flowing into the sink until this is dropped.
pub struct OpenCapture {
    format: StreamFormat,
    _stream: Box<dyn Any>,
}

impl OpenCapture {
    pub fn new<S: Any>(format: StreamFormat, stream: S) -> Self {
        Self {
            format,
            _stream: Box::new(stream),
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }
}

/// A source of interleaved i16 frames.
///
/// `open` is called on the recording worker thread and the returned handle is
/// dropped on that same thread, so backends whose streams are not `Send`
/// (cpal on some hosts) are fine here.
pub trait Capture: Send + Sync + 'static {
    fn open(&self, params: &CaptureParams, sink: Sender<Vec<i16>>) -> Result<OpenCapture, AudioError>;
}

/// Captures from the default input device of the default host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCapture;

impl Capture for CpalCapture {
    fn open(&self, params: &CaptureParams, sink: Sender<Vec<i16>>) -> Result<OpenCapture, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;

        tracing::info!(device = %device.name().unwrap_or_default(), "Using input device");

        let (config, sample_format) = choose_config(&device, params)?;
        let format = StreamFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        tracing::info!(
            ?sample_format,
            sample_rate = format.sample_rate,
            channels = format.channels,
            buffer_size = ?config.buffer_size,
            "Opening capture stream"
        );

        let stream = match sample_format {
            SampleFormat::I16 => build_stream_i16(&device, &config, sink)?,
            SampleFormat::F32 => build_stream_f32(&device, &config, sink)?,
            format => return Err(AudioError::UnsupportedFormat(format!("{:?}", format))),
        };

        stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;

        Ok(OpenCapture::new(format, stream))
    }
}

/// Picks a device config matching the requested channels and rate, or the
/// device default when nothing matches.
fn choose_config(
    device: &cpal::Device,
    params: &CaptureParams,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let wanted = SampleRate(params.sample_rate);

    let matching = device
        .supported_input_configs()
        .map_err(|e| AudioError::Config(e.to_string()))?
        .filter(|range| range.channels() == params.channels)
        .filter(|range| matches!(range.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .find(|range| range.min_sample_rate().0 <= wanted.0 && wanted.0 <= range.max_sample_rate().0);

    let supported = match matching {
        Some(range) => range.with_sample_rate(wanted),
        None => {
            let fallback = device
                .default_input_config()
                .map_err(|e| AudioError::Config(e.to_string()))?;
            tracing::warn!(
                requested_rate = params.sample_rate,
                requested_channels = params.channels,
                rate = fallback.sample_rate().0,
                channels = fallback.channels(),
                "Requested format not supported, using device default"
            );
            fallback
        }
    };

    let buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max }
            if (*min..=*max).contains(&params.frames_per_buffer) =>
        {
            BufferSize::Fixed(params.frames_per_buffer)
        }
        _ => BufferSize::Default,
    };

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size,
    };

    Ok((config, supported.sample_format()))
}

fn build_stream_i16(
    device: &cpal::Device,
    config: &StreamConfig,
    sink: Sender<Vec<i16>>,
) -> Result<cpal::Stream, AudioError> {
    let err_fn = |err| tracing::error!("Stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // The receiver is gone once the worker stops listening.
                let _ = sink.send(data.to_vec());
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}

fn build_stream_f32(
    device: &cpal::Device,
    config: &StreamConfig,
    sink: Sender<Vec<i16>>,
) -> Result<cpal::Stream, AudioError> {
    let err_fn = |err| tracing::error!("Stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let frame = data.iter().copied().map(f32_to_i16).collect();
                let _ = sink.send(frame);
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Names of the input devices on the default host.
pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Config(e.to_string()))?;

    Ok(devices.filter_map(|device| device.name().ok()).collect())
}
