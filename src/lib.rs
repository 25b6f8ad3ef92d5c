//! retempo - real-time time-stretching and pitch-shifting
//!
//! Tempo, pitch and playback rate are independent knobs over a two-stage
//! chain: a linear-interpolation [`RateTransposer`](dsp::RateTransposer)
//! and a WSOLA [`TimeStretcher`](dsp::TimeStretcher).
//!
//! Design principles:
//! - Interleaved stereo `f32` throughout, one sample rate per session
//! - Control goes through message ring buffers, not shared state
//! - No locks and no allocation on the audio thread
//! - CPAL output is optional (`cpal_sink` feature)
//!
//! ```
//! use retempo::{channel, Event, StretchConfig};
//!
//! let (mut controller, mut processor) = channel(StretchConfig::default()).unwrap();
//! let tone: Vec<f32> = (0..44_100).map(|i| (i as f32 * 0.0627).sin() * 0.5).collect();
//! controller.load(&tone, &tone, 44_100).unwrap();
//! controller.set_pitch(3.0).unwrap();
//! controller.play().unwrap();
//!
//! let (mut left, mut right) = (vec![0.0; 128], vec![0.0; 128]);
//! processor.process_block(&mut left, &mut right);
//! assert!(matches!(controller.try_recv_event(), Some(Event::Loaded { .. })));
//! ```

mod config;
mod error;
mod filter;
mod realtime;
pub mod dsp;

#[cfg(feature = "cpal_sink")]
mod device;
#[cfg(feature = "cpal_sink")]
mod output;

pub use config::{StretchConfig, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
pub use error::{Error, Result};
pub use filter::{BlockFilter, BufferSource, FrameSource};
pub use realtime::{
    channel, BoxedSource, Command, Controller, Event, PlaybackState, RealtimeAdapter, Session,
    StretchProcessor,
};

#[cfg(feature = "cpal_sink")]
pub use device::CpalDevice;
#[cfg(feature = "cpal_sink")]
pub use output::CpalOutput;
