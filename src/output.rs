//! CPAL output stream driving a [`StretchProcessor`].

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfig};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::realtime::StretchProcessor;

/// A running output stream. Dropping it stops playback.
pub struct CpalOutput {
    stream: cpal::Stream,
    channels: usize,
    sample_rate: u32,
}

impl CpalOutput {
    pub(crate) fn new(
        device: &cpal::Device,
        config: &SupportedStreamConfig,
        processor: StretchProcessor,
        block_size: usize,
    ) -> Result<Self> {
        let channels = config.channels() as usize;
        let stream_config = config.config();
        let sample_rate = stream_config.sample_rate.0;

        let stream = build_stream(
            device,
            config.sample_format(),
            &stream_config,
            processor,
            block_size.max(1) * channels,
        )?;
        stream.play().map_err(|e| {
            error!(error = %e, "failed to start output stream");
            Error::Output("stream did not start")
        })?;
        info!(channels, sample_rate, "output stream started");

        Ok(Self {
            stream,
            channels,
            sample_rate,
        })
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn pause(&self) -> Result<()> {
        self.stream.pause().map_err(|e| {
            error!(error = %e, "failed to pause output stream");
            Error::Output("stream did not pause")
        })
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    mut processor: StretchProcessor,
    scratch_len: usize,
) -> Result<cpal::Stream> {
    let channels = stream_config.channels as usize;
    let on_error = |err: cpal::StreamError| error!(error = %err, "output stream error");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _| {
                processor.process_interleaved(data, channels);
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = vec![0.0f32; scratch_len];
            device.build_output_stream(
                stream_config,
                move |data: &mut [i16], _| {
                    render_converted(&mut processor, &mut scratch, data, channels, |s| {
                        (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                    });
                },
                on_error,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut scratch = vec![0.0f32; scratch_len];
            device.build_output_stream(
                stream_config,
                move |data: &mut [u16], _| {
                    render_converted(&mut processor, &mut scratch, data, channels, |s| {
                        ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
                    });
                },
                on_error,
                None,
            )
        }
        other => {
            error!(format = ?other, "unsupported output sample format");
            return Err(Error::Output("unsupported sample format"));
        }
    };

    stream.map_err(|e| {
        error!(error = %e, "failed to build output stream");
        Error::Output("could not build stream")
    })
}

/// Render through an f32 scratch buffer, whole frames at a time.
fn render_converted<T>(
    processor: &mut StretchProcessor,
    scratch: &mut [f32],
    data: &mut [T],
    channels: usize,
    convert: impl Fn(f32) -> T,
) {
    let step = scratch.len() / channels * channels;
    for chunk in data.chunks_mut(step.max(channels)) {
        let scratch = &mut scratch[..chunk.len()];
        processor.process_interleaved(scratch, channels);
        for (out, &s) in chunk.iter_mut().zip(scratch.iter()) {
            *out = convert(s);
        }
    }
}
