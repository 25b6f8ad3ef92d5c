//! Control/audio thread split.

use std::collections::VecDeque;

use dasp_graph::{Buffer, Input, Node};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info, warn};

use crate::config::StretchConfig;
use crate::error::{Error, Result};
use crate::realtime::adapter::RealtimeAdapter;
use crate::realtime::message::{Command, Event, PlaybackState};
use crate::realtime::{BoxedSource, Session};

/// Create a connected controller/processor pair.
///
/// The [`Controller`] stays on the control thread; the
/// [`StretchProcessor`] moves into the audio callback.
///
/// ```
/// use retempo::{channel, StretchConfig};
///
/// let (mut controller, mut processor) = channel(StretchConfig::default()).unwrap();
/// let tone: Vec<f32> = (0..44_100).map(|i| (i as f32 * 0.0627).sin()).collect();
/// controller.load(&tone, &tone, 44_100).unwrap();
/// controller.set_tempo(0.5).unwrap();
/// controller.play().unwrap();
///
/// let (mut left, mut right) = ([0.0; 128], [0.0; 128]);
/// assert!(processor.process_block(&mut left, &mut right));
/// ```
pub fn channel(config: StretchConfig) -> Result<(Controller, StretchProcessor)> {
    config.validate()?;

    let (commands_tx, commands_rx) = RingBuffer::new(config.command_capacity);
    let (events_tx, events_rx) = RingBuffer::new(config.event_capacity);
    let (retired_tx, retired_rx) = RingBuffer::new(config.command_capacity + 1);

    let adapter = RealtimeAdapter::new(config.block_size, config.quick_seek, events_tx, retired_tx);
    let processor = StretchProcessor {
        adapter,
        commands: commands_rx,
        left: vec![0.0; config.block_size],
        right: vec![0.0; config.block_size],
    };
    let controller = Controller {
        config,
        commands: commands_tx,
        events: events_rx,
        rejected: VecDeque::new(),
        retired: retired_rx,
        sessions_out: 0,
    };
    Ok((controller, processor))
}

/// Control-thread handle.
pub struct Controller {
    config: StretchConfig,
    commands: Producer<Command>,
    events: Consumer<Event>,
    /// Errors for loads rejected here, reported ahead of audio-thread events.
    rejected: VecDeque<Event>,
    retired: Consumer<Box<Session>>,
    /// Sessions sent to the audio thread and not yet collected back.
    sessions_out: usize,
}

impl Controller {
    /// Send a command to the audio thread.
    pub fn send(&mut self, command: Command) -> Result<()> {
        self.commands
            .push(command)
            .map_err(|rtrb::PushError::Full(_)| Error::QueueFull)
    }

    /// Load a stereo source.
    ///
    /// The payload is validated and the session built here, so the audio
    /// thread only swaps a pointer. A malformed payload is returned as an
    /// error and also reported as [`Event::Error`].
    pub fn load(&mut self, left: &[f32], right: &[f32], sample_rate: u32) -> Result<()> {
        self.load_channels(&[left, right], sample_rate)
    }

    /// Like [`load`](Self::load) for a list of channels, which must be exactly two.
    pub fn load_channels(&mut self, channels: &[&[f32]], sample_rate: u32) -> Result<()> {
        let session = Session::new(channels, sample_rate, &self.config);
        self.load_session(session)
    }

    /// Load any [`FrameSource`](crate::FrameSource) running at `sample_rate`.
    pub fn load_source(&mut self, source: BoxedSource, sample_rate: u32) -> Result<()> {
        let session = Session::with_source(source, sample_rate, &self.config);
        self.load_session(session)
    }

    /// Sessions handed to the audio thread that have not come back yet,
    /// including the one playing.
    pub fn sessions_in_flight(&self) -> usize {
        self.sessions_out
    }

    fn load_session(&mut self, session: Result<Session>) -> Result<()> {
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "rejected load");
                self.rejected.push_back(Event::Error(e));
                return Err(e);
            }
        };

        // Emptying the retire queue before every load keeps at most
        // `command_capacity` retirements pending, one fewer than it holds.
        self.collect_retired();

        info!(
            frames = session.frames(),
            sample_rate = session.sample_rate(),
            duration = session.duration_secs(),
            "loading source"
        );
        self.send(Command::Load(Box::new(session)))?;
        self.sessions_out += 1;
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        self.send(Command::Play)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Seek to a source frame.
    pub fn seek(&mut self, position_frames: i64) -> Result<()> {
        debug!(position_frames, "seek");
        self.send(Command::Seek(position_frames))
    }

    /// Transpose by semitones.
    pub fn set_pitch(&mut self, semitones: f64) -> Result<()> {
        debug!(semitones, "set pitch");
        self.send(Command::SetPitch(semitones))
    }

    pub fn set_pitch_ratio(&mut self, ratio: f64) -> Result<()> {
        debug!(ratio, "set pitch ratio");
        self.send(Command::SetPitchRatio(ratio))
    }

    pub fn set_tempo(&mut self, ratio: f64) -> Result<()> {
        debug!(ratio, "set tempo");
        self.send(Command::SetTempo(ratio))
    }

    pub fn set_rate(&mut self, ratio: f64) -> Result<()> {
        debug!(ratio, "set rate");
        self.send(Command::SetRate(ratio))
    }

    pub fn set_quick_seek(&mut self, enabled: bool) -> Result<()> {
        self.send(Command::SetQuickSeek(enabled))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.send(Command::Flush)
    }

    /// Next pending event, if any.
    pub fn try_recv_event(&mut self) -> Option<Event> {
        self.collect_retired();
        self.rejected.pop_front().or_else(|| self.events.pop().ok())
    }

    /// Drain all pending events. Rejected loads come first.
    pub fn poll_events(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.collect_retired();
        let events = &mut self.events;
        self.rejected
            .drain(..)
            .chain(core::iter::from_fn(move || events.pop().ok()))
    }

    pub fn config(&self) -> &StretchConfig {
        &self.config
    }

    /// Drop sessions the audio thread has let go of.
    fn collect_retired(&mut self) {
        while let Ok(session) = self.retired.pop() {
            drop(session);
            self.sessions_out = self.sessions_out.saturating_sub(1);
        }
    }
}

/// Audio-thread half. Move it into the output callback.
pub struct StretchProcessor {
    adapter: RealtimeAdapter,
    commands: Consumer<Command>,
    // planar scratch for interleaved and mono hosts
    left: Vec<f32>,
    right: Vec<f32>,
}

impl StretchProcessor {
    /// Apply queued commands and render one planar stereo block.
    ///
    /// Always returns `true`.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) -> bool {
        let commands = &mut self.commands;
        let messages = core::iter::from_fn(|| commands.pop().ok());
        self.adapter.process(messages, left, right)
    }

    /// Render into an interleaved buffer with `channels` channels.
    ///
    /// Mono gets the average of left and right; channels past the second
    /// are silent.
    pub fn process_interleaved(&mut self, out: &mut [f32], channels: usize) -> bool {
        if channels == 0 {
            return true;
        }
        self.drain_commands();

        let block = self.left.len();
        for chunk in out.chunks_mut(block * channels) {
            let frames = chunk.len() / channels;
            let (left, right) = (&mut self.left[..frames], &mut self.right[..frames]);
            self.adapter.render(left, right);

            for (i, frame) in chunk.chunks_exact_mut(channels).enumerate() {
                if channels == 1 {
                    frame[0] = 0.5 * (left[i] + right[i]);
                } else {
                    frame[0] = left[i];
                    frame[1] = right[i];
                    frame[2..].fill(0.0);
                }
            }
            chunk[frames * channels..].fill(0.0);
        }
        true
    }

    #[inline]
    pub fn state(&self) -> PlaybackState {
        self.adapter.state()
    }

    #[inline]
    pub fn current_time(&self) -> f64 {
        self.adapter.current_time()
    }

    #[inline]
    pub fn adapter(&self) -> &RealtimeAdapter {
        &self.adapter
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.adapter.handle_command(command);
        }
    }
}

/// Stereo source node for a `dasp_graph` graph. Inputs are ignored.
impl Node for StretchProcessor {
    fn process(&mut self, _inputs: &[Input], output: &mut [Buffer]) {
        match output {
            [] => self.drain_commands(),
            [mono] => {
                self.drain_commands();
                let block = self.right.len();
                for chunk in mono.chunks_mut(block) {
                    let right = &mut self.right[..chunk.len()];
                    self.adapter.render(chunk, right);
                    for (m, r) in chunk.iter_mut().zip(right.iter()) {
                        *m = 0.5 * (*m + *r);
                    }
                }
            }
            [left, right, rest @ ..] => {
                self.process_block(left, right);
                for buffer in rest {
                    buffer.silence();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::BufferSource;

    fn tone(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| (i as f32 * 0.0627).sin() * 0.5).collect()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = StretchConfig::default().with_block_size(0);
        assert!(matches!(channel(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn load_errors_are_returned_and_reported() {
        let (mut controller, _processor) = channel(StretchConfig::default()).unwrap();
        let a = tone(100);
        assert_eq!(
            controller.load(&a, &a[..50], 44_100),
            Err(Error::ChannelLengthMismatch { left: 100, right: 50 })
        );
        assert_eq!(controller.load_channels(&[&a[..]], 44_100), Err(Error::MissingChannel));
        assert_eq!(
            controller.try_recv_event(),
            Some(Event::Error(Error::ChannelLengthMismatch { left: 100, right: 50 }))
        );
        assert_eq!(
            controller.poll_events().collect::<Vec<_>>(),
            vec![Event::Error(Error::MissingChannel)]
        );
        assert_eq!(controller.sessions_in_flight(), 0);
    }

    #[test]
    fn rejected_loads_precede_audio_events() {
        let (mut controller, mut processor) = channel(StretchConfig::default()).unwrap();
        let a = tone(1_000);
        controller.load(&a, &a, 44_100).unwrap();
        let (mut left, mut right) = ([0.0; 64], [0.0; 64]);
        processor.process_block(&mut left, &mut right);
        assert!(controller.load(&a, &a, 0).is_err());

        let events: Vec<Event> = controller.poll_events().collect();
        assert_eq!(events[0], Event::Error(Error::InvalidSampleRate(0)));
        assert!(matches!(events[1], Event::Loaded { frames: 1_000, .. }));
    }

    #[test]
    fn custom_source_loads() {
        let (mut controller, mut processor) = channel(StretchConfig::default()).unwrap();
        let a = tone(20_000);
        let source = BufferSource::from_channels(&a, &a, 44_100);
        controller.load_source(Box::new(source), 44_100).unwrap();
        controller.play().unwrap();

        let (mut left, mut right) = ([0.0; 128], [0.0; 128]);
        processor.process_block(&mut left, &mut right);
        assert!(matches!(
            controller.try_recv_event(),
            Some(Event::Loaded { frames: 20_000, .. })
        ));
        assert!(left.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn replaced_sessions_come_back_on_load() {
        let config = StretchConfig::default().with_queue_capacity(2, 64);
        let (mut controller, mut processor) = channel(config).unwrap();
        let a = tone(1_000);
        let (mut left, mut right) = ([0.0; 64], [0.0; 64]);
        for _ in 0..10 {
            controller.load(&a, &a, 44_100).unwrap();
            processor.process_block(&mut left, &mut right);
        }
        // the playing session plus the one just retired
        assert_eq!(controller.sessions_in_flight(), 2);
        controller.poll_events().for_each(drop);
        assert_eq!(controller.sessions_in_flight(), 1);
    }

    #[test]
    fn full_queue_reports_error() {
        let config = StretchConfig::default().with_queue_capacity(2, 16);
        let (mut controller, _processor) = channel(config).unwrap();
        controller.play().unwrap();
        controller.pause().unwrap();
        assert_eq!(controller.stop(), Err(Error::QueueFull));
    }

    #[test]
    fn interleaved_extra_channels_are_silent() {
        let (mut controller, mut processor) = channel(StretchConfig::default()).unwrap();
        let left = tone(20_000);
        let right = vec![0.0; 20_000];
        controller.load(&left, &right, 44_100).unwrap();
        controller.play().unwrap();

        let mut out = vec![1.0; 512 * 4];
        processor.process_interleaved(&mut out, 4);
        assert!(out.chunks_exact(4).all(|f| f[1] == 0.0 && f[2] == 0.0 && f[3] == 0.0));
        assert!(out.chunks_exact(4).any(|f| f[0] != 0.0));
    }

    #[test]
    fn interleaved_mono_is_average() {
        let left = tone(20_000);
        let right: Vec<f32> = left.iter().map(|s| s * 0.25).collect();
        let start = |processor: &mut StretchProcessor, controller: &mut Controller| {
            controller.load(&left, &right, 44_100).unwrap();
            controller.play().unwrap();
            processor.process_interleaved(&mut [], 2);
        };

        let (mut controller, mut mono_processor) = channel(StretchConfig::default()).unwrap();
        start(&mut mono_processor, &mut controller);
        let (mut controller, mut planar_processor) = channel(StretchConfig::default()).unwrap();
        start(&mut planar_processor, &mut controller);

        let mut mono = vec![0.0; 512];
        let (mut l, mut r) = (vec![0.0; 512], vec![0.0; 512]);
        mono_processor.process_interleaved(&mut mono, 1);
        planar_processor.process_block(&mut l, &mut r);
        for i in 0..512 {
            assert_eq!(mono[i], 0.5 * (l[i] + r[i]));
        }
    }

    #[test]
    fn graph_node_fills_stereo_buffers() {
        let (mut controller, mut processor) = channel(StretchConfig::default()).unwrap();
        let left = tone(20_000);
        controller.load(&left, &left, 44_100).unwrap();
        controller.play().unwrap();

        let mut buffers = vec![Buffer::SILENT; 3];
        buffers[2].iter_mut().for_each(|s| *s = 1.0);
        Node::process(&mut processor, &[], &mut buffers);
        assert!(buffers[0].iter().any(|&s| s != 0.0));
        assert_eq!(&buffers[0][..], &buffers[1][..]);
        assert!(buffers[2].iter().all(|&s| s == 0.0));
    }
}
