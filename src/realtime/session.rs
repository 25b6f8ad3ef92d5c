//! A loaded source with its processing chain.

use core::fmt;

use crate::config::{check_sample_rate, StretchConfig};
use crate::dsp::Engine;
use crate::error::{Error, Result};
use crate::filter::{BlockFilter, BufferSource, FrameSource};

/// Any source a session can play from the audio thread.
pub type BoxedSource = Box<dyn FrameSource + Send>;

/// Everything one playback needs: the decoded source, an engine and the
/// block filter over them.
///
/// Sessions are allocated on the control thread and moved to the audio
/// thread whole, so loading never allocates in the audio callback.
pub struct Session {
    filter: BlockFilter<BoxedSource>,
    sample_rate: u32,
    frames: usize,
}

impl Session {
    /// Validate a load payload and build a session for it.
    ///
    /// `channels` must hold exactly a left and a right channel of equal,
    /// non-zero length.
    pub fn new(channels: &[&[f32]], sample_rate: u32, config: &StretchConfig) -> Result<Self> {
        let (left, right) = match channels {
            [left, right] => (*left, *right),
            [_, _, ..] => return Err(Error::InvalidConfig("only stereo sources are supported")),
            _ => return Err(Error::MissingChannel),
        };
        if left.len() != right.len() {
            return Err(Error::ChannelLengthMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        if left.is_empty() {
            return Err(Error::EmptySource);
        }
        check_sample_rate(sample_rate)?;

        let source = BufferSource::from_channels(left, right, sample_rate);
        Self::with_source(Box::new(source), sample_rate, config)
    }

    /// Build a session over any frame source running at `sample_rate`.
    pub fn with_source(
        source: BoxedSource,
        sample_rate: u32,
        config: &StretchConfig,
    ) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        let frames = source.frame_len();
        if frames == 0 {
            return Err(Error::EmptySource);
        }

        let config = StretchConfig {
            sample_rate,
            ..config.clone()
        };
        let engine = Engine::with_config(&config);
        Ok(Self {
            frames,
            filter: BlockFilter::new(source, engine, &config),
            sample_rate,
        })
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn filter(&self) -> &BlockFilter<BoxedSource> {
        &self.filter
    }

    #[inline]
    pub fn filter_mut(&mut self) -> &mut BlockFilter<BoxedSource> {
        &mut self.filter
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames)
            .field("position", &self.filter.position())
            .field("source_position", &self.filter.source_position())
            .finish()
    }
}
