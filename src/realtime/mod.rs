//! Real-time playback: a control-thread [`Controller`] and an audio-thread
//! [`StretchProcessor`] connected by lock-free queues.

mod adapter;
mod message;
mod processor;
mod session;

pub use adapter::RealtimeAdapter;
pub use message::{Command, Event, PlaybackState};
pub use processor::{channel, Controller, StretchProcessor};
pub use session::{BoxedSource, Session};
