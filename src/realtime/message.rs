//! Control commands (host → engine) and status events (engine → host).

use crate::error::Error;
use crate::realtime::Session;

/// Commands for the real-time adapter.
///
/// Sent with [`Controller`](crate::Controller) and applied at the start of
/// the next audio block, in the order they were sent.
#[derive(Debug)]
pub enum Command {
    /// Replace the current source. Built and validated on the control thread.
    Load(Box<Session>),
    /// Start or resume playback. Restarts from the beginning after the end was reached.
    Play,
    /// Pause playback, keeping the position.
    Pause,
    /// Stop playback and return to the beginning.
    Stop,
    /// Jump to a source frame. Negative positions clamp to zero.
    Seek(i64),
    /// Transpose by semitones without changing tempo.
    SetPitch(f64),
    /// Transpose by a frequency ratio without changing tempo.
    SetPitchRatio(f64),
    /// Change tempo without changing pitch (1.0 = unchanged).
    SetTempo(f64),
    /// Change playback rate, affecting tempo and pitch together.
    SetRate(f64),
    /// Toggle the hierarchical overlap search.
    SetQuickSeek(bool),
    /// Drop stale overlap state after a parameter jump.
    Flush,
}

/// Status reported back from the audio thread.
///
/// Events are advisory; if the event queue is full they are dropped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Event {
    /// A source was installed.
    Loaded { duration: f64, frames: usize },
    /// Playback time in seconds, once per rendered block while playing.
    TimeUpdate { current_time: f64 },
    /// The stream ran out.
    Ended,
    /// A command was rejected or a block failed to render.
    Error(Error),
    /// Playing flag changed. `current_time` is set when the position was reset.
    StateChange {
        is_playing: bool,
        current_time: Option<f64>,
    },
    /// A seek was applied.
    Seeked { position: usize, current_time: f64 },
}

/// Adapter lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing loaded.
    #[default]
    Idle,
    /// Loaded or stopped, at the beginning.
    Loaded,
    Playing,
    Paused,
    /// Reached the end of the stream.
    Ended,
}

impl PlaybackState {
    #[inline]
    pub fn is_playing(self) -> bool {
        self == PlaybackState::Playing
    }
}
