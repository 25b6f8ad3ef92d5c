//! Block-oriented pull filter over an [`Engine`].
//!
//! [`BlockFilter::extract`] hands out fixed-size blocks of processed audio,
//! pulling from a [`FrameSource`] as needed. A short window of already
//! delivered output is kept so small backward seeks are free.

use tracing::debug;

use crate::config::StretchConfig;
use crate::dsp::{Engine, CHANNELS};
use crate::error::{Error, Result};

/// Consecutive short reads after which the source counts as exhausted.
const SHORT_READS_FOR_EOF: u32 = 2;

/// Random-access supplier of interleaved stereo frames.
pub trait FrameSource {
    /// Copy up to `frames` frames starting at frame `position` into `target`.
    ///
    /// Returns the number of frames copied; fewer than requested means the
    /// end of the source was reached.
    fn extract(&mut self, target: &mut [f32], frames: usize, position: usize) -> usize;

    /// Total length in frames.
    fn frame_len(&self) -> usize;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    #[inline]
    fn extract(&mut self, target: &mut [f32], frames: usize, position: usize) -> usize {
        (**self).extract(target, frames, position)
    }

    #[inline]
    fn frame_len(&self) -> usize {
        (**self).frame_len()
    }
}

/// An in-memory interleaved stereo buffer.
#[derive(Clone, Debug)]
pub struct BufferSource {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl BufferSource {
    /// Wrap interleaved stereo samples. A trailing half frame is dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        samples.truncate(samples.len() / CHANNELS * CHANNELS);
        Self {
            samples,
            sample_rate,
        }
    }

    /// Interleave separate left and right channels. The shorter one sets the length.
    pub fn from_channels(left: &[f32], right: &[f32], sample_rate: u32) -> Self {
        let samples = left
            .iter()
            .zip(right.iter())
            .flat_map(|(&l, &r)| [l, r])
            .collect();
        Self {
            samples,
            sample_rate,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

impl FrameSource for BufferSource {
    fn extract(&mut self, target: &mut [f32], frames: usize, position: usize) -> usize {
        let available = self.frames().saturating_sub(position);
        let frames = frames.min(available).min(target.len() / CHANNELS);
        let start = position * CHANNELS;
        target[..frames * CHANNELS].copy_from_slice(&self.samples[start..start + frames * CHANNELS]);
        frames
    }

    fn frame_len(&self) -> usize {
        self.frames()
    }
}

/// Pulls fixed-size chunks from a source through an [`Engine`] and serves
/// blocks of the result.
///
/// The engine's output queue doubles as a history window: up to
/// `history_frames` already delivered frames stay in it so that
/// [`rewind_to`](Self::rewind_to) can step back without reprocessing.
#[derive(Debug)]
pub struct BlockFilter<S> {
    source: S,
    engine: Engine,

    chunk_frames: usize,
    history_frames: usize,

    /// Frames read from the source so far.
    source_position: usize,
    /// Delivered frames still retained at the front of the output queue.
    output_buffer_position: usize,
    /// Frames delivered since the last reset.
    position: usize,

    short_reads: u32,
    exhausted: bool,
    tail_drained: bool,
}

impl<S: FrameSource> BlockFilter<S> {
    pub fn new(source: S, engine: Engine, config: &StretchConfig) -> Self {
        Self {
            source,
            engine,
            chunk_frames: config.chunk_frames,
            history_frames: config.history_frames(),
            source_position: 0,
            output_buffer_position: 0,
            position: 0,
            short_reads: 0,
            exhausted: false,
            tail_drained: false,
        }
    }

    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[inline]
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Frames delivered since the last reset.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Frames read from the source so far.
    #[inline]
    pub fn source_position(&self) -> usize {
        self.source_position
    }

    #[inline]
    pub fn history_frames(&self) -> usize {
        self.history_frames
    }

    /// Whether the source has run dry.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Step back to an earlier delivered position inside the history window.
    ///
    /// Forward moves, and moves further back than the retained history, fail
    /// with [`Error::SeekOutOfRange`]; use
    /// [`set_source_position`](Self::set_source_position) for those.
    pub fn rewind_to(&mut self, position: usize) -> Result<()> {
        let out_of_range = Error::SeekOutOfRange {
            requested: position,
            current: self.position,
            history: self.output_buffer_position,
        };
        if position > self.position {
            return Err(out_of_range);
        }
        let back = self.position - position;
        if back > self.output_buffer_position {
            return Err(out_of_range);
        }
        self.output_buffer_position -= back;
        self.position = position;
        Ok(())
    }

    /// Drop all buffered state and continue reading the source at `position`.
    pub fn set_source_position(&mut self, position: usize) {
        self.clear();
        self.source_position = position;
    }

    /// Drop all buffered state. The source cursor is kept.
    pub fn clear(&mut self) {
        self.engine.clear();
        self.output_buffer_position = 0;
        self.position = 0;
        self.short_reads = 0;
        self.exhausted = false;
        self.tail_drained = false;
    }

    /// Drop only the stretcher's overlap state.
    pub fn flush(&mut self) {
        self.engine.flush_stretch();
    }

    /// Copy up to `frames` frames of processed audio into `target`.
    ///
    /// Returns the number of frames copied. Zero means the stream has ended.
    pub fn extract(&mut self, target: &mut [f32], frames: usize) -> usize {
        let frames = frames.min(target.len() / CHANNELS);
        self.fill_output_buffer(self.output_buffer_position + frames);

        let output = self.engine.output();
        let available = output.frame_count().saturating_sub(self.output_buffer_position);
        let extracted = frames.min(available);
        output.extract(target, self.output_buffer_position, extracted);

        let current = self.output_buffer_position + extracted;
        self.output_buffer_position = current.min(self.history_frames);
        self.engine
            .output_mut()
            .receive(current.saturating_sub(self.history_frames));
        self.position += extracted;
        extracted
    }

    fn fill_output_buffer(&mut self, frames: usize) {
        while self.engine.output().frame_count() < frames {
            if self.exhausted {
                if self.tail_drained {
                    break;
                }
                if self.engine.drain_tail_step() {
                    self.tail_drained = true;
                    debug!(position = self.position, "source exhausted, drained stretch tail");
                }
                continue;
            }

            // a pull never produces more than the queues already hold room for
            let target = self.chunk_frames.max(self.engine.stretcher().input_chunk_size());
            let wanted = target
                .saturating_sub(self.engine.input().frame_count())
                .min(self.engine.input_budget())
                .max(1);
            let read = self.fill_input_buffer(wanted);
            if read < wanted {
                self.short_reads += 1;
                if self.short_reads >= SHORT_READS_FOR_EOF {
                    self.exhausted = true;
                }
            } else {
                self.short_reads = 0;
            }
            self.engine.process();
        }
    }

    fn fill_input_buffer(&mut self, frames: usize) -> usize {
        let target = self.engine.input_vacant_mut(frames);
        let read = self.source.extract(target, frames, self.source_position);
        self.engine.put_input(read);
        self.source_position += read;
        read
    }
}
