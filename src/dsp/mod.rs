//! DSP stages.
//!
//! Leaves first: [`SampleQueue`] carries interleaved stereo frames between
//! stages, [`RateTransposer`] resamples, [`TimeStretcher`] changes duration,
//! and [`Engine`] composes the two.

mod engine;
mod rate_transposer;
mod sample_queue;
mod time_stretch;

pub use engine::{ChainOrder, Engine, MIN_RATIO};
pub use rate_transposer::RateTransposer;
pub use sample_queue::{SampleQueue, CHANNELS};
pub use time_stretch::{TimeStretcher, DEFAULT_OVERLAP_MS};
