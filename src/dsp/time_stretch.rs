//! WSOLA time stretcher.
//!
//! Changes duration by `tempo` without touching pitch. Input is cut into
//! sequences; each new sequence is joined to the tail of the previous one at
//! the offset where the two waveforms correlate best, with a linear
//! cross-fade over `overlap_length` frames.

use super::sample_queue::{SampleQueue, CHANNELS};

/// Default cross-fade length.
pub const DEFAULT_OVERLAP_MS: f64 = 8.0;

/// Tempo range over which the automatic sequence/seek lengths are interpolated.
const AUTOSEQ_TEMPO_LOW: f64 = 0.5;
const AUTOSEQ_TEMPO_TOP: f64 = 2.0;

const AUTOSEQ_AT_MIN: f64 = 125.0;
const AUTOSEQ_AT_MAX: f64 = 50.0;
const AUTOSEQ_K: f64 = (AUTOSEQ_AT_MAX - AUTOSEQ_AT_MIN) / (AUTOSEQ_TEMPO_TOP - AUTOSEQ_TEMPO_LOW);
const AUTOSEQ_C: f64 = AUTOSEQ_AT_MIN - AUTOSEQ_K * AUTOSEQ_TEMPO_LOW;

const AUTOSEEK_AT_MIN: f64 = 25.0;
const AUTOSEEK_AT_MAX: f64 = 15.0;
const AUTOSEEK_K: f64 = (AUTOSEEK_AT_MAX - AUTOSEEK_AT_MIN) / (AUTOSEQ_TEMPO_TOP - AUTOSEQ_TEMPO_LOW);
const AUTOSEEK_C: f64 = AUTOSEEK_AT_MIN - AUTOSEEK_K * AUTOSEQ_TEMPO_LOW;

/// Smallest cross-fade, in frames.
const MIN_OVERLAP: usize = 16;

/// Smallest positive double; a correlation must beat this to move the seam.
const CORRELATION_FLOOR: f64 = 5e-324;

/// Candidate offsets for the hierarchical search, coarse to fine. Zero ends a pass.
const SCAN_OFFSETS: [[i32; 24]; 4] = [
    [
        124, 186, 248, 310, 372, 434, 496, 558, 620, 682, 744, 806, 868, 930, 992, 1054, 1116,
        1178, 1240, 1302, 1364, 1426, 1488, 0,
    ],
    [
        -100, -75, -50, -25, 25, 50, 75, 100, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ],
    [
        -20, -15, -10, -5, 5, 10, 15, 20, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ],
    [
        -4, -3, -2, -1, 1, 2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ],
];

/// Overlap-add time stretcher with cross-correlation seam search.
#[derive(Clone, Debug)]
pub struct TimeStretcher {
    sample_rate: u32,
    tempo: f64,

    sequence_ms: f64,
    seek_window_ms: f64,
    overlap_ms: f64,
    auto_sequence: bool,
    auto_seek_window: bool,
    quick_seek: bool,

    /// Frames per sequence.
    seek_window_length: usize,
    /// Range searched for the best seam.
    seek_length: usize,
    overlap_length: usize,

    /// Input frames consumed per sequence, fractional.
    nominal_skip: f64,
    /// Sub-frame remainder of `nominal_skip`, always in `[0, 1)`.
    skip_fract: f64,
    /// Input frames required before a sequence can be produced.
    sample_req: usize,

    /// Tail of the previous sequence, waiting to be cross-faded.
    mid_buffer: Vec<f32>,
    /// `mid_buffer` weighted by the correlation window.
    ref_mid_buffer: Vec<f32>,
    /// Whether `mid_buffer` holds real audio yet.
    primed: bool,
}

impl TimeStretcher {
    /// Create a stretcher for `sample_rate` with automatic sequence lengths.
    pub fn new(sample_rate: u32) -> Self {
        let mut stretcher = Self {
            sample_rate,
            tempo: 1.0,
            sequence_ms: 0.0,
            seek_window_ms: 0.0,
            overlap_ms: DEFAULT_OVERLAP_MS,
            auto_sequence: true,
            auto_seek_window: true,
            quick_seek: true,
            seek_window_length: 0,
            seek_length: 0,
            overlap_length: 0,
            nominal_skip: 0.0,
            skip_fract: 0.0,
            sample_req: 0,
            mid_buffer: Vec::new(),
            ref_mid_buffer: Vec::new(),
            primed: false,
        };
        stretcher.set_parameters(sample_rate, None, None, DEFAULT_OVERLAP_MS);
        stretcher
    }

    /// Set timing parameters. `None` for sequence or seek window selects the
    /// tempo-dependent defaults.
    pub fn set_parameters(
        &mut self,
        sample_rate: u32,
        sequence_ms: Option<f64>,
        seek_window_ms: Option<f64>,
        overlap_ms: f64,
    ) {
        if sample_rate > 0 {
            self.sample_rate = sample_rate;
        }
        if overlap_ms > 0.0 {
            self.overlap_ms = overlap_ms;
        }
        match sequence_ms {
            Some(ms) if ms > 0.0 => {
                self.sequence_ms = ms;
                self.auto_sequence = false;
            }
            _ => self.auto_sequence = true,
        }
        match seek_window_ms {
            Some(ms) if ms > 0.0 => {
                self.seek_window_ms = ms;
                self.auto_seek_window = false;
            }
            _ => self.auto_seek_window = true,
        }
        self.calculate_overlap_length();
        self.set_tempo(self.tempo);
    }

    #[inline]
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Set the tempo ratio (2.0 plays twice as fast). Must be positive.
    pub fn set_tempo(&mut self, tempo: f64) {
        debug_assert!(tempo > 0.0);
        self.tempo = tempo;
        self.calculate_sequence_parameters();
        self.nominal_skip = self.tempo * (self.seek_window_length - self.overlap_length) as f64;
        self.skip_fract = 0.0;
        let int_skip = (self.nominal_skip + 0.5).floor() as usize;
        self.sample_req =
            (int_skip + self.overlap_length).max(self.seek_window_length) + self.seek_length;
    }

    pub fn set_quick_seek(&mut self, enabled: bool) {
        self.quick_seek = enabled;
    }

    #[inline]
    pub fn quick_seek(&self) -> bool {
        self.quick_seek
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn overlap_length(&self) -> usize {
        self.overlap_length
    }

    #[inline]
    pub fn seek_window_length(&self) -> usize {
        self.seek_window_length
    }

    #[inline]
    pub fn seek_length(&self) -> usize {
        self.seek_length
    }

    #[inline]
    pub fn sequence_ms(&self) -> f64 {
        self.sequence_ms
    }

    #[inline]
    pub fn seek_window_ms(&self) -> f64 {
        self.seek_window_ms
    }

    #[inline]
    pub fn skip_fract(&self) -> f64 {
        self.skip_fract
    }

    /// Input frames needed before one sequence can be produced.
    #[inline]
    pub fn input_chunk_size(&self) -> usize {
        self.sample_req
    }

    /// Output frames produced per sequence.
    #[inline]
    pub fn output_chunk_size(&self) -> usize {
        self.overlap_length + self.seek_window_length.saturating_sub(2 * self.overlap_length)
    }

    /// Whether overlap state from earlier input is pending.
    #[inline]
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Drop the pending overlap and the skip remainder.
    pub fn clear(&mut self) {
        self.primed = false;
        self.skip_fract = 0.0;
        self.mid_buffer.fill(0.0);
    }

    fn calculate_overlap_length(&mut self) {
        let mut overlap = (self.sample_rate as f64 * self.overlap_ms / 1000.0) as usize;
        overlap = overlap.max(MIN_OVERLAP);
        overlap -= overlap % 8;
        self.overlap_length = overlap;
        self.mid_buffer = vec![0.0; overlap * CHANNELS];
        self.ref_mid_buffer = vec![0.0; overlap * CHANNELS];
        self.primed = false;
    }

    fn calculate_sequence_parameters(&mut self) {
        if self.auto_sequence {
            let seq = (AUTOSEQ_C + AUTOSEQ_K * self.tempo).clamp(AUTOSEQ_AT_MAX, AUTOSEQ_AT_MIN);
            self.sequence_ms = (seq + 0.5).floor();
        }
        if self.auto_seek_window {
            let seek =
                (AUTOSEEK_C + AUTOSEEK_K * self.tempo).clamp(AUTOSEEK_AT_MAX, AUTOSEEK_AT_MIN);
            self.seek_window_ms = (seek + 0.5).floor();
        }
        let rate = self.sample_rate as f64;
        self.seek_window_length = ((rate * self.sequence_ms) / 1000.0).floor() as usize;
        self.seek_length = ((rate * self.seek_window_ms) / 1000.0).floor() as usize;
        // A sequence shorter than two overlaps would never advance the input.
        self.seek_window_length = self.seek_window_length.max(2 * self.overlap_length);
    }

    /// Stretch as much of `input` as possible onto the end of `output`.
    ///
    /// Frames that are not yet enough for a full sequence stay in `input`.
    pub fn process(&mut self, input: &mut SampleQueue, output: &mut SampleQueue) {
        if !self.primed {
            if input.frame_count() < self.overlap_length {
                return;
            }
            input.receive_samples(&mut self.mid_buffer, self.overlap_length);
            self.primed = true;
        }

        while input.frame_count() >= self.sample_req {
            let offset = self.seek_best_overlap_position(input);

            self.overlap(input, output, offset);

            let copy_through = self.seek_window_length as isize - 2 * self.overlap_length as isize;
            if copy_through > 0 {
                output.put_from(input, offset + self.overlap_length, copy_through as usize);
            }

            // Tail of this sequence becomes the head of the next cross-fade.
            let start = input.start_index()
                + CHANNELS * (offset + self.seek_window_length - self.overlap_length);
            let len = CHANNELS * self.overlap_length;
            self.mid_buffer
                .copy_from_slice(&input.buffer()[start..start + len]);

            self.skip_fract += self.nominal_skip;
            let overlap_skip = self.skip_fract.floor();
            self.skip_fract -= overlap_skip;
            input.receive(overlap_skip as usize);
        }
    }

    fn seek_best_overlap_position(&mut self, input: &SampleQueue) -> usize {
        self.precalculate_correlation_reference();
        if self.quick_seek {
            self.seek_quick(input)
        } else {
            self.seek_exhaustive(input)
        }
    }

    fn seek_exhaustive(&self, input: &SampleQueue) -> usize {
        let mut best_offset = 0;
        let mut best_correlation = CORRELATION_FLOOR;
        for offset in 0..self.seek_length {
            let correlation = self.cross_correlation(input, offset);
            if correlation > best_correlation {
                best_correlation = correlation;
                best_offset = offset;
            }
        }
        best_offset
    }

    /// Four passes over [`SCAN_OFFSETS`], each centred on the previous best.
    fn seek_quick(&self, input: &SampleQueue) -> usize {
        let mut best_offset = 0usize;
        let mut best_correlation = CORRELATION_FLOOR;
        let mut centre = 0i64;

        for pass in SCAN_OFFSETS.iter() {
            for &step in pass.iter().take_while(|&&step| step != 0) {
                let candidate = centre + step as i64;
                if candidate >= self.seek_length as i64 {
                    break;
                }
                if candidate < 0 {
                    continue;
                }
                let candidate = candidate as usize;
                let correlation = self.cross_correlation(input, candidate);
                if correlation > best_correlation {
                    best_correlation = correlation;
                    best_offset = candidate;
                }
            }
            centre = best_offset as i64;
        }
        best_offset
    }

    /// Weight the pending overlap by `i * (overlap - i)` so the centre counts most.
    fn precalculate_correlation_reference(&mut self) {
        let overlap = self.overlap_length;
        for i in 0..overlap {
            let weight = (i * (overlap - i)) as f32;
            self.ref_mid_buffer[2 * i] = self.mid_buffer[2 * i] * weight;
            self.ref_mid_buffer[2 * i + 1] = self.mid_buffer[2 * i + 1] * weight;
        }
    }

    /// Unnormalised dot product of the reference against input at `offset`.
    fn cross_correlation(&self, input: &SampleQueue, offset: usize) -> f64 {
        let mixing = &input.samples()[offset * CHANNELS..];
        let compare = &self.ref_mid_buffer;
        let mut correlation = 0.0f64;
        // Frame 0 has zero weight.
        for i in (CHANNELS..CHANNELS * self.overlap_length).step_by(CHANNELS) {
            correlation += mixing[i] as f64 * compare[i] as f64
                + mixing[i + 1] as f64 * compare[i + 1] as f64;
        }
        correlation
    }

    /// Cross-fade the pending tail into `input` at `offset`, appending to `output`.
    fn overlap(&self, input: &SampleQueue, output: &mut SampleQueue, offset: usize) {
        let overlap = self.overlap_length;
        let src = &input.samples()[offset * CHANNELS..];
        let dest = output.vacant_mut(overlap);
        let frame_scale = 1.0 / overlap as f32;
        for i in 0..overlap {
            let fade_out = (overlap - i) as f32 * frame_scale;
            let fade_in = i as f32 * frame_scale;
            let c = 2 * i;
            dest[c] = src[c] * fade_in + self.mid_buffer[c] * fade_out;
            dest[c + 1] = src[c + 1] * fade_in + self.mid_buffer[c + 1] * fade_out;
        }
        output.put(overlap);
    }
}
