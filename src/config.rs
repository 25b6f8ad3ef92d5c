//! Engine configuration.
//!
//! Everything the engine needs to know about its environment is passed in
//! through [`StretchConfig`]; there is no global sample rate.

use crate::error::{Error, Result};

/// Lowest sample rate the stretcher accepts. Below this the sequence window
/// gets shorter than two overlaps.
pub const MIN_SAMPLE_RATE: u32 = 8_000;
/// Highest sample rate the stretcher accepts.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Construction-time configuration for the engine and the real-time adapter.
///
/// ```
/// use retempo::StretchConfig;
///
/// let config = StretchConfig::default()
///     .with_sample_rate(48_000)
///     .with_block_size(256)
///     .with_quick_seek(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct StretchConfig {
    /// Sample rate in Hz. Replaced by the source rate on load.
    pub sample_rate: u32,
    /// Largest number of frames rendered per real-time step.
    pub block_size: usize,
    /// Length of the rewind history kept by the block filter, in seconds.
    pub history_secs: f64,
    /// Frames pulled from the source per fill.
    pub chunk_frames: usize,
    /// Fixed sequence length in ms, or `None` for the tempo-dependent default.
    pub sequence_ms: Option<f64>,
    /// Fixed seek window in ms, or `None` for the tempo-dependent default.
    pub seek_window_ms: Option<f64>,
    /// Cross-fade length in ms.
    pub overlap_ms: f64,
    /// Use the hierarchical overlap search instead of the exhaustive one.
    pub quick_seek: bool,
    /// Capacity of the control queue.
    pub command_capacity: usize,
    /// Capacity of the event queue.
    pub event_capacity: usize,
}

impl Default for StretchConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 128,
            history_secs: 0.5,
            chunk_frames: 8192,
            sequence_ms: None,
            seek_window_ms: None,
            overlap_ms: 8.0,
            quick_seek: true,
            command_capacity: 64,
            event_capacity: 256,
        }
    }
}

impl StretchConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, frames: usize) -> Self {
        self.block_size = frames;
        self
    }

    pub fn with_history_secs(mut self, secs: f64) -> Self {
        self.history_secs = secs;
        self
    }

    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames;
        self
    }

    /// Pin the sequence and seek window lengths instead of deriving them from tempo.
    pub fn with_sequence(mut self, sequence_ms: f64, seek_window_ms: f64) -> Self {
        self.sequence_ms = Some(sequence_ms);
        self.seek_window_ms = Some(seek_window_ms);
        self
    }

    pub fn with_overlap_ms(mut self, overlap_ms: f64) -> Self {
        self.overlap_ms = overlap_ms;
        self
    }

    pub fn with_quick_seek(mut self, enabled: bool) -> Self {
        self.quick_seek = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, commands: usize, events: usize) -> Self {
        self.command_capacity = commands;
        self.event_capacity = events;
        self
    }

    /// History window length in frames at the configured sample rate.
    #[inline]
    pub fn history_frames(&self) -> usize {
        (self.history_secs * self.sample_rate as f64) as usize
    }

    /// Check that the configuration can drive the engine.
    pub fn validate(&self) -> Result<()> {
        check_sample_rate(self.sample_rate)?;
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block size must be non-zero"));
        }
        if self.chunk_frames == 0 {
            return Err(Error::InvalidConfig("chunk size must be non-zero"));
        }
        if !(self.history_secs > 0.0) {
            return Err(Error::InvalidConfig("history window must be positive"));
        }
        if !(self.overlap_ms > 0.0) {
            return Err(Error::InvalidConfig("overlap must be positive"));
        }
        if self.command_capacity == 0 || self.event_capacity == 0 {
            return Err(Error::InvalidConfig("queue capacities must be non-zero"));
        }
        Ok(())
    }
}

pub(crate) fn check_sample_rate(sample_rate: u32) -> Result<()> {
    if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        Ok(())
    } else {
        Err(Error::InvalidSampleRate(sample_rate))
    }
}
