//! Drives a [`Session`] from an audio callback.

use std::panic::{catch_unwind, AssertUnwindSafe};

use rtrb::Producer;
use tracing::error;

use crate::dsp::CHANNELS;
use crate::error::Error;
use crate::realtime::message::{Command, Event, PlaybackState};
use crate::realtime::Session;

/// Parameters that outlive a session.
#[derive(Clone, Copy, Debug)]
struct Params {
    pitch: f64,
    tempo: f64,
    rate: f64,
    quick_seek: bool,
}

/// Real-time side of the engine.
///
/// Applies [`Command`]s, renders planar stereo blocks and reports
/// [`Event`]s. Nothing here allocates once constructed: sessions arrive
/// prebuilt and leave through the retire queue to be dropped elsewhere.
pub struct RealtimeAdapter {
    session: Option<Box<Session>>,
    state: PlaybackState,
    params: Params,

    /// Output frames on the playback timeline. A seek places it where the
    /// target would have been reached from the start at the current ratios.
    frames_processed: usize,

    /// Interleaved scratch for one block.
    scratch: Vec<f32>,
    block_size: usize,

    events: Producer<Event>,
    retired: Producer<Box<Session>>,
    /// A replaced session that found the retire queue full.
    parked: Option<Box<Session>>,
}

impl RealtimeAdapter {
    pub fn new(
        block_size: usize,
        quick_seek: bool,
        events: Producer<Event>,
        retired: Producer<Box<Session>>,
    ) -> Self {
        let block_size = block_size.max(1);
        Self {
            session: None,
            state: PlaybackState::Idle,
            params: Params {
                pitch: 1.0,
                tempo: 1.0,
                rate: 1.0,
                quick_seek,
            },
            frames_processed: 0,
            scratch: vec![0.0; block_size * CHANNELS],
            block_size,
            events,
            retired,
            parked: None,
        }
    }

    #[inline]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    #[inline]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_deref()
    }

    /// Playback time in seconds.
    pub fn current_time(&self) -> f64 {
        match &self.session {
            Some(session) => self.frames_processed as f64 / session.sample_rate() as f64,
            None => 0.0,
        }
    }

    /// Apply pending commands, then render one block.
    ///
    /// Returns `true` so a host keeps calling it.
    pub fn process(
        &mut self,
        commands: impl Iterator<Item = Command>,
        left: &mut [f32],
        right: &mut [f32],
    ) -> bool {
        for command in commands {
            self.handle_command(command);
        }
        self.render(left, right);
        true
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Load(session) => self.load(session),
            Command::Play => self.play(),
            Command::Pause => {
                if self.require_session() {
                    if self.state == PlaybackState::Playing {
                        self.state = PlaybackState::Paused;
                    }
                    self.emit(Event::StateChange {
                        is_playing: false,
                        current_time: None,
                    });
                }
            }
            Command::Stop => {
                if let Some(session) = self.session.as_mut() {
                    session.filter_mut().set_source_position(0);
                    self.frames_processed = 0;
                    self.state = PlaybackState::Loaded;
                    self.emit(Event::StateChange {
                        is_playing: false,
                        current_time: Some(0.0),
                    });
                    self.emit(Event::TimeUpdate { current_time: 0.0 });
                } else {
                    self.emit(Event::Error(Error::NotLoaded));
                }
            }
            Command::Seek(position) => self.seek(position),
            Command::SetPitch(semitones) => {
                self.params.pitch = 2f64.powf(semitones / 12.0);
                self.apply_params();
            }
            Command::SetPitchRatio(ratio) => {
                self.params.pitch = ratio;
                self.apply_params();
            }
            Command::SetTempo(ratio) => {
                self.params.tempo = ratio;
                self.apply_params();
            }
            Command::SetRate(ratio) => {
                self.params.rate = ratio;
                self.apply_params();
            }
            Command::SetQuickSeek(enabled) => {
                self.params.quick_seek = enabled;
                self.apply_params();
            }
            Command::Flush => {
                if let Some(session) = self.session.as_mut() {
                    session.filter_mut().flush();
                }
            }
        }
    }

    fn load(&mut self, session: Box<Session>) {
        let event = Event::Loaded {
            duration: session.duration_secs(),
            frames: session.frames(),
        };
        if let Some(old) = self.session.replace(session) {
            self.retire(old);
        }
        self.apply_params();
        self.frames_processed = 0;
        self.state = PlaybackState::Loaded;
        self.emit(event);
    }

    /// Hand a session back to the control thread without freeing it here.
    fn retire(&mut self, session: Box<Session>) {
        self.retire_parked();
        if let Err(rtrb::PushError::Full(session)) = self.retired.push(session) {
            if self.parked.is_none() {
                self.parked = Some(session);
            } else {
                // both slots taken; freeing here is the only option left
                drop(session);
            }
        }
    }

    fn retire_parked(&mut self) {
        if let Some(session) = self.parked.take() {
            if let Err(rtrb::PushError::Full(session)) = self.retired.push(session) {
                self.parked = Some(session);
            }
        }
    }

    fn play(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.emit(Event::Error(Error::NotLoaded));
            return;
        };
        if self.state == PlaybackState::Ended {
            session.filter_mut().set_source_position(0);
            self.frames_processed = 0;
        }
        self.state = PlaybackState::Playing;
        self.emit(Event::StateChange {
            is_playing: true,
            current_time: None,
        });
    }

    fn seek(&mut self, position: i64) {
        let Some(session) = self.session.as_mut() else {
            self.emit(Event::Error(Error::NotLoaded));
            return;
        };
        let position = usize::try_from(position.max(0))
            .unwrap_or(usize::MAX)
            .min(session.frames());
        session.filter_mut().set_source_position(position);
        let engine = session.filter().engine();
        let ratio = engine.effective_tempo() * engine.effective_rate();
        self.frames_processed = (position as f64 / ratio).round() as usize;
        if self.state == PlaybackState::Ended {
            self.state = PlaybackState::Paused;
        }
        let current_time = self.current_time();
        self.emit(Event::Seeked {
            position,
            current_time,
        });
    }

    fn apply_params(&mut self) {
        if let Some(session) = self.session.as_mut() {
            let engine = session.filter_mut().engine_mut();
            engine.set_pitch(self.params.pitch);
            engine.set_tempo(self.params.tempo);
            engine.set_rate(self.params.rate);
            engine.set_quick_seek(self.params.quick_seek);
        }
    }

    fn require_session(&mut self) -> bool {
        if self.session.is_none() {
            self.emit(Event::Error(Error::NotLoaded));
            return false;
        }
        true
    }

    /// Fill `left` and `right` with the next frames of output.
    ///
    /// Silence is written while paused, after the end and before a load.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.retire_parked();
        let frames = left.len().min(right.len());
        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(self.block_size);
            self.render_chunk(&mut left[offset..offset + n], &mut right[offset..offset + n]);
            offset += n;
        }
        left[frames..].fill(0.0);
        right[frames..].fill(0.0);
    }

    fn render_chunk(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len();
        if self.state != PlaybackState::Playing {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            left.fill(0.0);
            right.fill(0.0);
            return;
        };

        let scratch = &mut self.scratch[..frames * CHANNELS];
        let extracted = match catch_unwind(AssertUnwindSafe(|| {
            session.filter_mut().extract(scratch, frames)
        })) {
            Ok(extracted) => extracted,
            Err(_) => {
                error!("stretch render panicked, silencing block");
                left.fill(0.0);
                right.fill(0.0);
                self.emit(Event::Error(Error::RenderPanic));
                return;
            }
        };

        if extracted == 0 {
            left.fill(0.0);
            right.fill(0.0);
            self.state = PlaybackState::Ended;
            self.emit(Event::Ended);
            self.emit(Event::StateChange {
                is_playing: false,
                current_time: None,
            });
            return;
        }

        for (i, frame) in self.scratch[..extracted * CHANNELS]
            .chunks_exact(CHANNELS)
            .enumerate()
        {
            left[i] = frame[0];
            right[i] = frame[1];
        }
        left[extracted..].fill(0.0);
        right[extracted..].fill(0.0);

        self.frames_processed += extracted;
        let current_time = self.current_time();
        self.emit(Event::TimeUpdate { current_time });
    }

    #[inline]
    fn emit(&mut self, event: Event) {
        // events are advisory, drop on overflow
        let _ = self.events.push(event);
    }
}
