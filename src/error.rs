//! Error types.

use thiserror::Error;

/// Error type.
///
/// Variants carry only plain values so they can be sent from the audio
/// thread as [`Event::Error`](crate::Event::Error) without allocating.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A load payload without one of its two channels.
    #[error("load payload is missing a channel")]
    MissingChannel,

    /// Left and right channels differ in length.
    #[error("channel lengths differ (left: {left}, right: {right})")]
    ChannelLengthMismatch { left: usize, right: usize },

    /// A load payload with zero frames.
    #[error("load payload contains no frames")]
    EmptySource,

    /// Sample rate outside the supported range.
    #[error("unsupported sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    /// Playback control issued before a source was loaded.
    #[error("no source loaded")]
    NotLoaded,

    /// Rewind target is ahead of the current position or outside the history window.
    #[error("position {requested} is out of range (current: {current}, history: {history} frames)")]
    SeekOutOfRange {
        requested: usize,
        current: usize,
        history: usize,
    },

    /// The render path panicked; the block was silenced.
    #[error("audio render fault, block silenced")]
    RenderPanic,

    /// The control queue is full; the command was not delivered.
    #[error("control queue is full")]
    QueueFull,

    /// The output device could not be opened or started.
    #[error("failed to open audio output: {0}")]
    Output(&'static str),

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
