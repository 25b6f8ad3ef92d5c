//! Pitch/rate/tempo pipeline.
//!
//! Three independent knobs are folded into two effective ratios:
//!
//! - `effective_tempo = tempo / pitch` drives the [`TimeStretcher`]
//! - `effective_rate = rate * pitch` drives the [`RateTransposer`]
//!
//! The stages always run in one of two fixed compositions, picked by
//! [`ChainOrder`]; the cheaper resampler runs on the smaller stream.

use tracing::debug;

use super::rate_transposer::RateTransposer;
use super::sample_queue::{SampleQueue, CHANNELS};
use super::time_stretch::TimeStretcher;
use crate::config::StretchConfig;

/// Ratios smaller than this are clamped up; a zero tempo would never consume input.
pub const MIN_RATIO: f64 = 0.01;

/// Effective values closer than this are treated as unchanged.
const RATIO_EPSILON: f64 = 1e-10;

/// Silence fed per step while draining the tail.
const TAIL_PAD_FRAMES: usize = 1024;

/// Upper bound on tail padding steps, so a drain always terminates.
const MAX_TAIL_STEPS: usize = 4096;

/// Fastest effective tempo the queues are sized for up front. Faster
/// settings still work but may grow the queues once.
const PRESIZED_MAX_TEMPO: f64 = 4.0;

/// Which stage sees the input first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainOrder {
    /// input → transposer → stretcher → output (effective rate ≤ 1)
    TransposeFirst,
    /// input → stretcher → transposer → output (effective rate > 1)
    StretchFirst,
}

impl ChainOrder {
    #[inline]
    fn for_rate(rate: f64) -> Self {
        if rate > 1.0 {
            ChainOrder::StretchFirst
        } else {
            ChainOrder::TransposeFirst
        }
    }
}

/// The stretch + transpose pipeline with its three queues.
#[derive(Clone, Debug)]
pub struct Engine {
    transposer: RateTransposer,
    stretcher: TimeStretcher,

    input: SampleQueue,
    intermediate: SampleQueue,
    output: SampleQueue,
    order: ChainOrder,

    virtual_pitch: f64,
    virtual_rate: f64,
    virtual_tempo: f64,
    effective_tempo: f64,
    effective_rate: f64,

    /// Output frames owed for input already accepted, at the current ratios.
    pending_output: f64,
    /// Padding steps fed since the tail drain started.
    tail_steps: usize,
}

impl Engine {
    /// Create an engine for `sample_rate` with default stretch timing.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_config(&StretchConfig::default().with_sample_rate(sample_rate))
    }

    /// Create an engine from a configuration.
    ///
    /// The queues are pre-sized for `chunk_frames` plus the sequence
    /// requirement at [`PRESIZED_MAX_TEMPO`]; the output queue also holds the
    /// history window. Callers that keep each pull within
    /// [`input_budget`](Self::input_budget) never grow them.
    pub fn with_config(config: &StretchConfig) -> Self {
        let mut stretcher = TimeStretcher::new(config.sample_rate);
        stretcher.set_parameters(
            config.sample_rate,
            config.sequence_ms,
            config.seek_window_ms,
            config.overlap_ms,
        );
        stretcher.set_quick_seek(config.quick_seek);

        let mut fastest = stretcher.clone();
        fastest.set_tempo(PRESIZED_MAX_TEMPO);
        let sequence_frames = stretcher.input_chunk_size().max(fastest.input_chunk_size());
        let queue_frames = config.chunk_frames * 4 + sequence_frames * 2;

        let mut engine = Self {
            transposer: RateTransposer::new(),
            stretcher,
            input: SampleQueue::with_capacity(queue_frames),
            intermediate: SampleQueue::with_capacity(queue_frames),
            output: SampleQueue::with_capacity(queue_frames + config.history_frames()),
            order: ChainOrder::TransposeFirst,
            virtual_pitch: 1.0,
            virtual_rate: 1.0,
            virtual_tempo: 1.0,
            effective_tempo: 0.0,
            effective_rate: 0.0,
            pending_output: 0.0,
            tail_steps: 0,
        };
        engine.calculate_effective_rate_and_tempo();
        engine
    }

    /// Set the pitch ratio (2.0 is one octave up).
    pub fn set_pitch(&mut self, ratio: f64) {
        self.virtual_pitch = clamp_ratio(ratio);
        self.calculate_effective_rate_and_tempo();
    }

    pub fn set_pitch_octaves(&mut self, octaves: f64) {
        self.set_pitch(octaves.exp2());
    }

    pub fn set_pitch_semitones(&mut self, semitones: f64) {
        self.set_pitch_octaves(semitones / 12.0);
    }

    /// Set the playback rate (changes tempo and pitch together).
    pub fn set_rate(&mut self, ratio: f64) {
        self.virtual_rate = clamp_ratio(ratio);
        self.calculate_effective_rate_and_tempo();
    }

    /// Set the rate as a percentage change, `+10.0` → 1.1.
    pub fn set_rate_change(&mut self, percent: f64) {
        self.set_rate(1.0 + 0.01 * percent);
    }

    /// Set the tempo ratio (2.0 is twice as fast, same pitch).
    pub fn set_tempo(&mut self, ratio: f64) {
        self.virtual_tempo = clamp_ratio(ratio);
        self.calculate_effective_rate_and_tempo();
    }

    /// Set the tempo as a percentage change, `-50.0` → 0.5.
    pub fn set_tempo_change(&mut self, percent: f64) {
        self.set_tempo(1.0 + 0.01 * percent);
    }

    pub fn set_quick_seek(&mut self, enabled: bool) {
        self.stretcher.set_quick_seek(enabled);
    }

    #[inline]
    pub fn pitch(&self) -> f64 {
        self.virtual_pitch
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.virtual_rate
    }

    #[inline]
    pub fn tempo(&self) -> f64 {
        self.virtual_tempo
    }

    #[inline]
    pub fn effective_tempo(&self) -> f64 {
        self.effective_tempo
    }

    #[inline]
    pub fn effective_rate(&self) -> f64 {
        self.effective_rate
    }

    #[inline]
    pub fn order(&self) -> ChainOrder {
        self.order
    }

    #[inline]
    pub fn stretcher(&self) -> &TimeStretcher {
        &self.stretcher
    }

    /// Queue frames enter through.
    #[inline]
    pub fn input(&self) -> &SampleQueue {
        &self.input
    }

    #[inline]
    pub fn output(&self) -> &SampleQueue {
        &self.output
    }

    #[inline]
    pub fn output_mut(&mut self) -> &mut SampleQueue {
        &mut self.output
    }

    /// Writable space for `frames` input frames; commit with [`put_input`](Self::put_input).
    #[inline]
    pub fn input_vacant_mut(&mut self, frames: usize) -> &mut [f32] {
        self.input.vacant_mut(frames)
    }

    /// Source frames that can be accepted right now without any queue
    /// outgrowing its capacity once they are processed.
    ///
    /// Bounds the stretcher's output by `(backlog + n + 1) / tempo` plus a
    /// few sequences, where backlog is what it holds beyond one sequence
    /// requirement. The transposer adds at most two frames.
    pub fn input_budget(&self) -> usize {
        let (tempo, rate) = (self.effective_tempo, self.effective_rate);
        let room =
            |queue: &SampleQueue| queue.capacity().saturating_sub(queue.frame_count()) as f64;
        let slack = 3.0 * self.stretcher.output_chunk_size() as f64 + 4.0;

        let budget = match self.order {
            ChainOrder::TransposeFirst => {
                let pending = self.input.frame_count() as f64;
                let backlog = self
                    .intermediate
                    .frame_count()
                    .saturating_sub(self.stretcher.input_chunk_size()) as f64;
                let by_intermediate = (room(&self.intermediate) - 2.0) * rate - pending;
                let by_output =
                    ((room(&self.output) - slack) * tempo - backlog - 3.0) * rate - pending;
                room(&self.input).min(by_intermediate).min(by_output)
            }
            ChainOrder::StretchFirst => {
                let backlog = self
                    .input
                    .frame_count()
                    .saturating_sub(self.stretcher.input_chunk_size()) as f64;
                let held = self.intermediate.frame_count() as f64;
                let by_intermediate = (room(&self.intermediate) - slack) * tempo - backlog - 1.0;
                let by_output =
                    ((room(&self.output) - 2.0) * rate - held - slack) * tempo - backlog - 1.0;
                room(&self.input).min(by_intermediate).min(by_output)
            }
        };
        budget.max(0.0) as usize
    }

    /// Commit `frames` frames written through [`input_vacant_mut`](Self::input_vacant_mut).
    pub fn put_input(&mut self, frames: usize) {
        self.input.put(frames);
        self.pending_output += frames as f64 / (self.effective_tempo * self.effective_rate);
    }

    /// Append interleaved stereo samples to the input.
    pub fn put_samples(&mut self, samples: &[f32]) {
        let frames = samples.len() / CHANNELS;
        self.input_vacant_mut(frames)
            .copy_from_slice(&samples[..frames * CHANNELS]);
        self.put_input(frames);
    }

    /// Run both stages in chain order.
    pub fn process(&mut self) {
        let before = self.output.frame_count();
        match self.order {
            ChainOrder::StretchFirst => {
                self.stretcher.process(&mut self.input, &mut self.intermediate);
                self.transposer.process(&mut self.intermediate, &mut self.output);
            }
            ChainOrder::TransposeFirst => {
                self.transposer.process(&mut self.input, &mut self.intermediate);
                self.stretcher.process(&mut self.intermediate, &mut self.output);
            }
        }
        self.pending_output -= self.output.frame_count().saturating_sub(before) as f64;
    }

    /// Output frames still owed for input already accepted.
    #[inline]
    pub fn pending_output(&self) -> f64 {
        self.pending_output
    }

    /// Feed one step of silence towards the owed tail.
    ///
    /// Returns `true` once everything owed has been produced; the padding
    /// overshoot is then trimmed and the stage queues emptied. Each call does
    /// a bounded amount of work, so a real-time caller can spread the drain
    /// over several blocks.
    pub fn drain_tail_step(&mut self) -> bool {
        if self.pending_output >= 1.0 && self.tail_steps < MAX_TAIL_STEPS {
            let before = self.output.frame_count();
            let pad = TAIL_PAD_FRAMES.min(self.input_budget()).max(1);
            self.input.put_silence(pad);
            self.process();
            self.tail_steps += 1;
            if self.pending_output >= 1.0 {
                return false;
            }
            // the overshoot came from this step alone
            let excess = (-self.pending_output).floor() as usize;
            let keep = self.output.frame_count().saturating_sub(excess);
            self.output.truncate(keep.max(before));
        }
        self.pending_output = 0.0;
        self.tail_steps = 0;
        self.input.clear();
        self.intermediate.clear();
        true
    }

    /// Push silence through the chain until all owed output has been
    /// produced, then trim the padding back off.
    ///
    /// Used once the source is exhausted, so the frames still held inside the
    /// stretcher reach the output. Returns the number of output frames added.
    pub fn drain_tail(&mut self) -> usize {
        let before = self.output.frame_count();
        while !self.drain_tail_step() {}
        self.output.frame_count().saturating_sub(before)
    }

    /// Drop everything buffered in every stage.
    pub fn clear(&mut self) {
        self.input.clear();
        self.intermediate.clear();
        self.output.clear();
        self.transposer.reset();
        self.stretcher.clear();
        self.pending_output = 0.0;
        self.tail_steps = 0;
    }

    /// Drop the stretcher's overlap state and its pending input, keeping the
    /// output already produced.
    pub fn flush_stretch(&mut self) {
        self.stretcher.clear();
        match self.order {
            ChainOrder::StretchFirst => self.input.receive_all(),
            ChainOrder::TransposeFirst => self.intermediate.receive_all(),
        };
        self.rebase_pending_output();
    }

    /// Recompute the owed output from what the stages still hold, at the
    /// current ratios.
    ///
    /// A primed stretcher has consumed one overlap more than it has emitted.
    fn rebase_pending_output(&mut self) {
        let (tempo, rate) = (self.effective_tempo, self.effective_rate);
        let overlap = if self.stretcher.is_primed() {
            self.stretcher.overlap_length() as f64
        } else {
            0.0
        };
        let input = self.input.frame_count() as f64;
        let intermediate = self.intermediate.frame_count() as f64;
        self.pending_output = match self.order {
            ChainOrder::TransposeFirst => input / (tempo * rate) + (intermediate + overlap) / tempo,
            ChainOrder::StretchFirst => (input + overlap) / (tempo * rate) + intermediate / rate,
        };
    }

    fn calculate_effective_rate_and_tempo(&mut self) {
        let previous_tempo = self.effective_tempo;
        let previous_rate = self.effective_rate;

        self.effective_tempo = self.virtual_tempo / self.virtual_pitch;
        self.effective_rate = self.virtual_rate * self.virtual_pitch;

        let tempo_changed = (self.effective_tempo - previous_tempo).abs() > RATIO_EPSILON;
        let rate_changed = (self.effective_rate - previous_rate).abs() > RATIO_EPSILON;
        if tempo_changed {
            self.stretcher.set_tempo(self.effective_tempo);
        }
        if rate_changed {
            self.transposer.set_rate(self.effective_rate);
        }

        let order = ChainOrder::for_rate(self.effective_rate);
        if order != self.order {
            debug!(?order, rate = self.effective_rate, "re-wiring stretch chain");
            self.order = order;
        }
        // buffered input is consumed at the new ratios
        if tempo_changed || rate_changed {
            self.rebase_pending_output();
        }
    }
}

#[inline]
fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() {
        ratio.max(MIN_RATIO)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tone(frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (i as f32 * 440.0 / 44_100.0 * core::f32::consts::TAU).sin() * 0.5;
                [v, v]
            })
            .collect()
    }

    #[test]
    fn pitch_and_tempo_are_independent() {
        let mut engine = Engine::new(44_100);
        engine.set_pitch(2.0);
        engine.set_tempo(1.0);
        assert_relative_eq!(engine.effective_rate(), 2.0);
        assert_relative_eq!(engine.effective_tempo(), 0.5);
        // net duration change: tempo * rate
        assert_relative_eq!(engine.effective_tempo() * engine.effective_rate(), 1.0);
    }

    #[test]
    fn semitones_convert_to_ratio() {
        let mut engine = Engine::new(44_100);
        engine.set_pitch_semitones(12.0);
        assert_relative_eq!(engine.pitch(), 2.0, epsilon = 1e-12);
        engine.set_pitch_semitones(-12.0);
        assert_relative_eq!(engine.pitch(), 0.5, epsilon = 1e-12);
        engine.set_pitch_semitones(7.0);
        assert_relative_eq!(engine.pitch(), 2f64.powf(7.0 / 12.0), epsilon = 1e-12);
    }

    #[test]
    fn percentage_knobs() {
        let mut engine = Engine::new(44_100);
        engine.set_tempo_change(-50.0);
        assert_relative_eq!(engine.tempo(), 0.5);
        engine.set_rate_change(25.0);
        assert_relative_eq!(engine.rate(), 1.25);
    }

    #[test]
    fn chain_order_follows_effective_rate() {
        let mut engine = Engine::new(44_100);
        assert_eq!(engine.order(), ChainOrder::TransposeFirst);
        engine.set_pitch(1.5);
        assert_eq!(engine.order(), ChainOrder::StretchFirst);
        engine.set_pitch(1.0);
        assert_eq!(engine.order(), ChainOrder::TransposeFirst);
    }

    #[test]
    fn degenerate_ratios_are_clamped() {
        let mut engine = Engine::new(44_100);
        engine.set_tempo(0.0);
        assert_relative_eq!(engine.tempo(), MIN_RATIO);
        engine.set_pitch(f64::NAN);
        assert_relative_eq!(engine.pitch(), 1.0);
    }

    #[test]
    fn drained_length_matches_ratio() {
        let frames = 44_100;
        for &(tempo, pitch) in &[(0.5, 1.0), (1.0, 2.0), (1.3, 0.8), (2.0, 1.0)] {
            let mut engine = Engine::new(44_100);
            engine.set_tempo(tempo);
            engine.set_pitch(pitch);
            for chunk in tone(frames).chunks(8192 * 2) {
                engine.put_samples(chunk);
                engine.process();
            }
            engine.drain_tail();

            let expected = frames as f64 / tempo;
            let got = engine.output().frame_count() as f64;
            let overlap = engine.stretcher().overlap_length() as f64;
            assert!(
                (got - expected).abs() <= overlap,
                "tempo {tempo}, pitch {pitch}: got {got}, expected {expected}"
            );
        }
    }

    #[test]
    fn budgeted_input_never_grows_queues() {
        let config = StretchConfig::default();
        let history = config.history_frames();
        let src = tone(441_000);
        for &(tempo, pitch) in &[(0.25, 1.0), (0.01, 1.0), (0.5, 0.5), (1.0, 2.0), (2.0, 1.0)] {
            let mut engine = Engine::with_config(&config);
            engine.set_tempo(tempo);
            engine.set_pitch(pitch);
            let capacities = (
                engine.input.capacity(),
                engine.intermediate.capacity(),
                engine.output.capacity(),
            );

            let mut fed = 0;
            for _ in 0..50 {
                let budget = engine.input_budget().min(8192);
                assert!(budget > 0, "tempo {tempo}, pitch {pitch}: no budget");
                let n = budget.min(src.len() / CHANNELS - fed);
                engine.put_samples(&src[fed * CHANNELS..(fed + n) * CHANNELS]);
                engine.process();
                fed += n;
                assert_eq!(
                    (
                        engine.input.capacity(),
                        engine.intermediate.capacity(),
                        engine.output.capacity()
                    ),
                    capacities,
                    "tempo {tempo}, pitch {pitch}"
                );
                // a consumer keeps the history window
                let delivered = engine.output().frame_count().saturating_sub(history);
                engine.output_mut().receive(delivered);
            }
        }
    }

    #[test]
    fn tempo_change_does_not_pad_tail() {
        let mut engine = Engine::new(44_100);
        let src = tone(88_200);
        engine.set_tempo(0.05);
        engine.put_samples(&src[..8192 * CHANNELS]);
        engine.process();
        engine.set_tempo(2.0);
        engine.put_samples(&src[8192 * CHANNELS..]);
        engine.process();
        engine.drain_tail();

        let trailing = engine
            .output()
            .samples()
            .iter()
            .rev()
            .take_while(|s| **s == 0.0)
            .count()
            / CHANNELS;
        assert!(
            trailing < engine.stretcher().seek_window_length(),
            "{trailing} silent frames at the end"
        );
    }

    #[test]
    fn tail_drains_in_bounded_steps() {
        let mut engine = Engine::new(44_100);
        engine.set_tempo(0.5);
        engine.put_samples(&tone(20_000));
        engine.process();
        let owed = engine.pending_output();
        assert!(owed >= 1.0);

        let mut steps = 1;
        while !engine.drain_tail_step() {
            steps += 1;
        }
        assert!(steps < 32, "{steps} steps");
        assert_eq!(engine.pending_output(), 0.0);
        assert!(engine.input().is_empty());
        // finished drains are no-ops
        let produced = engine.output().frame_count();
        assert!(engine.drain_tail_step());
        assert_eq!(engine.output().frame_count(), produced);
    }

    #[test]
    fn clear_empties_all_queues() {
        let mut engine = Engine::new(44_100);
        engine.put_samples(&tone(20_000));
        engine.process();
        assert!(engine.output().frame_count() > 0);
        engine.clear();
        assert!(engine.input().is_empty());
        assert!(engine.output().is_empty());
        assert_eq!(engine.pending_output(), 0.0);
        assert!(!engine.stretcher().is_primed());
    }

    #[test]
    fn flush_keeps_produced_output() {
        let mut engine = Engine::new(44_100);
        engine.put_samples(&tone(20_000));
        engine.process();
        let produced = engine.output().frame_count();
        engine.flush_stretch();
        assert_eq!(engine.output().frame_count(), produced);
        assert!(!engine.stretcher().is_primed());
    }
}
