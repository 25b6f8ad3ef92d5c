//! Growable FIFO of interleaved stereo frames.

/// Samples per frame. Everything in the engine is interleaved stereo.
pub const CHANNELS: usize = 2;

/// A FIFO of interleaved stereo frames backed by one contiguous buffer.
///
/// Live data is the window `[position, position + frame_count)` (in frames).
/// Writers either copy in with [`put_samples`](Self::put_samples) or fill the
/// slice from [`vacant_mut`](Self::vacant_mut) and commit it with
/// [`put`](Self::put). Growth only ever copies the live window and moves it
/// back to the start of the buffer, so memory tracks live data rather than
/// total stream length.
#[derive(Clone, Debug, Default)]
pub struct SampleQueue {
    buffer: Vec<f32>,
    position: usize,
    frame_count: usize,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that can hold `frames` frames without growing.
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            buffer: vec![0.0; frames * CHANNELS],
            position: 0,
            frame_count: 0,
        }
    }

    /// Number of unread frames.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    /// Read cursor, in frames from the start of the backing buffer.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Backing buffer size in frames.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len() / CHANNELS
    }

    /// Sample index of the first live frame.
    #[inline]
    pub fn start_index(&self) -> usize {
        self.position * CHANNELS
    }

    /// Sample index one past the last live frame.
    #[inline]
    pub fn end_index(&self) -> usize {
        (self.position + self.frame_count) * CHANNELS
    }

    /// The live frames, interleaved.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.buffer[self.start_index()..self.end_index()]
    }

    /// Make room for at least `frames` live frames.
    ///
    /// Grows geometrically when the buffer is too small; otherwise rewinds
    /// the live window to the start of the buffer.
    pub fn ensure_capacity(&mut self, frames: usize) {
        let min_len = frames * CHANNELS;
        if self.buffer.len() < min_len {
            let new_len = min_len.max(self.buffer.len() * 2);
            let mut grown = vec![0.0; new_len];
            let live = self.end_index() - self.start_index();
            grown[..live].copy_from_slice(self.samples());
            self.buffer = grown;
            self.position = 0;
        } else {
            self.rewind();
        }
    }

    /// Make room for `frames` more frames past the current end.
    #[inline]
    pub fn ensure_additional_capacity(&mut self, frames: usize) {
        self.ensure_capacity(self.frame_count + frames);
    }

    /// Move the live window to the start of the buffer.
    pub fn rewind(&mut self) {
        if self.position > 0 {
            let (start, end) = (self.start_index(), self.end_index());
            self.buffer.copy_within(start..end, 0);
            self.position = 0;
        }
    }

    /// Writable space for `frames` frames past the current end.
    ///
    /// Nothing becomes readable until [`put`](Self::put) commits it.
    pub fn vacant_mut(&mut self, frames: usize) -> &mut [f32] {
        self.ensure_additional_capacity(frames);
        let end = self.end_index();
        &mut self.buffer[end..end + frames * CHANNELS]
    }

    /// Commit `frames` frames the caller already wrote past the end.
    #[inline]
    pub fn put(&mut self, frames: usize) {
        debug_assert!(self.end_index() + frames * CHANNELS <= self.buffer.len());
        self.frame_count += frames;
    }

    /// Append whole frames from an interleaved slice. A trailing half frame is ignored.
    pub fn put_samples(&mut self, samples: &[f32]) {
        let frames = samples.len() / CHANNELS;
        self.vacant_mut(frames)
            .copy_from_slice(&samples[..frames * CHANNELS]);
        self.put(frames);
    }

    /// Append `frames` frames read from `other` starting `offset` frames
    /// into its live window. `other` is not consumed.
    pub fn put_from(&mut self, other: &SampleQueue, offset: usize, frames: usize) {
        let start = other.start_index() + offset * CHANNELS;
        let src = &other.buffer[start..start + frames * CHANNELS];
        self.vacant_mut(frames).copy_from_slice(src);
        self.put(frames);
    }

    /// Append `frames` frames of silence.
    pub fn put_silence(&mut self, frames: usize) {
        self.vacant_mut(frames).fill(0.0);
        self.put(frames);
    }

    /// Discard up to `frames` frames from the front. Returns how many were dropped.
    pub fn receive(&mut self, frames: usize) -> usize {
        let frames = frames.min(self.frame_count);
        self.frame_count -= frames;
        self.position += frames;
        frames
    }

    /// Discard everything.
    pub fn receive_all(&mut self) -> usize {
        self.receive(self.frame_count)
    }

    /// Move up to `frames` frames into `output` and discard them. Returns frames moved.
    pub fn receive_samples(&mut self, output: &mut [f32], frames: usize) -> usize {
        let frames = self.extract(output, 0, frames);
        self.receive(frames)
    }

    /// Copy up to `frames` frames starting `offset` frames into the live
    /// window, without moving any cursor. Returns frames copied.
    pub fn extract(&self, output: &mut [f32], offset: usize, frames: usize) -> usize {
        let available = self.frame_count.saturating_sub(offset);
        let frames = frames.min(available).min(output.len() / CHANNELS);
        let start = self.start_index() + offset * CHANNELS;
        output[..frames * CHANNELS].copy_from_slice(&self.buffer[start..start + frames * CHANNELS]);
        frames
    }

    /// Drop frames from the back so at most `frames` remain.
    pub fn truncate(&mut self, frames: usize) {
        self.frame_count = self.frame_count.min(frames);
    }

    /// Forget all live frames. The backing buffer is kept.
    pub fn clear(&mut self) {
        self.position = 0;
        self.frame_count = 0;
    }

    #[inline]
    pub(crate) fn buffer(&self) -> &[f32] {
        &self.buffer
    }
}
