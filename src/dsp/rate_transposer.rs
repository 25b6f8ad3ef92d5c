//! Linear-interpolation rate transposer.
//!
//! Changes the playback rate by resampling: `rate > 1` produces fewer frames
//! (higher pitch, shorter), `rate < 1` produces more.

use super::sample_queue::{SampleQueue, CHANNELS};

/// A linear-interpolation resampler that is restartable across call
/// boundaries.
///
/// Cross-call memory is the fractional phase plus the last input frame, so
/// feeding a stream in one call or in any number of pieces gives the same
/// output.
#[derive(Clone, Debug)]
pub struct RateTransposer {
    rate: f64,
    /// Fractional position between `prev` and the next input frame.
    slope_count: f64,
    prev_l: f32,
    prev_r: f32,
}

impl Default for RateTransposer {
    fn default() -> Self {
        Self::new()
    }
}

impl RateTransposer {
    pub fn new() -> Self {
        Self {
            rate: 1.0,
            slope_count: 0.0,
            prev_l: 0.0,
            prev_r: 0.0,
        }
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Set the resampling ratio. Must be positive.
    pub fn set_rate(&mut self, rate: f64) {
        debug_assert!(rate > 0.0);
        self.rate = rate;
    }

    /// Forget the carried frame and phase.
    pub fn reset(&mut self) {
        self.slope_count = 0.0;
        self.prev_l = 0.0;
        self.prev_r = 0.0;
    }

    /// Conservative output size for `frames` input frames.
    #[inline]
    pub fn max_output_frames(&self, frames: usize) -> usize {
        (frames as f64 / self.rate).ceil() as usize + 2
    }

    /// Resample everything in `input` onto the end of `output`.
    ///
    /// The input queue is drained; the last frame is carried into the next call.
    pub fn process(&mut self, input: &mut SampleQueue, output: &mut SampleQueue) {
        let frames = input.frame_count();
        if frames == 0 {
            return;
        }
        let capacity = self.max_output_frames(frames);
        let produced = self.transpose(input.samples(), output.vacant_mut(capacity));
        input.receive_all();
        output.put(produced);
    }

    /// Resample the interleaved `src` into `dest`, returning frames written.
    pub fn transpose(&mut self, src: &[f32], dest: &mut [f32]) -> usize {
        let frames = src.len() / CHANNELS;
        if frames == 0 {
            return 0;
        }

        let mut written = 0;
        // Between the carried frame and the first new one.
        while self.slope_count < 1.0 {
            let s = self.slope_count;
            dest[2 * written] = lerp(self.prev_l, src[0], s);
            dest[2 * written + 1] = lerp(self.prev_r, src[1], s);
            written += 1;
            self.slope_count += self.rate;
        }
        self.slope_count -= 1.0;

        if frames > 1 {
            let mut used = 0;
            'out: loop {
                while self.slope_count > 1.0 {
                    self.slope_count -= 1.0;
                    used += 1;
                    if used >= frames - 1 {
                        break 'out;
                    }
                }
                let i = 2 * used;
                let s = self.slope_count;
                dest[2 * written] = lerp(src[i], src[i + 2], s);
                dest[2 * written + 1] = lerp(src[i + 1], src[i + 3], s);
                written += 1;
                self.slope_count += self.rate;
            }
        }

        self.prev_l = src[2 * frames - 2];
        self.prev_r = src[2 * frames - 1];
        written
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f64) -> f32 {
    ((1.0 - t) * a as f64 + t * b as f64) as f32
}
