//! Gapless playback scheduling against a monotonic output clock

use std::time::Duration;

use super::codec::{TARGET_SAMPLE_RATE, bytes_to_pcm16, pcm16_to_f32};
use crate::Result;

/// An output stream with its own monotonic clock, in seconds
pub trait OutputClock: Send {
    /// Seconds elapsed on the output timeline
    fn current_time(&self) -> f64;

    /// Whether the clock is paused
    fn is_suspended(&self) -> bool;

    /// Restart a paused clock
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be restarted
    fn resume(&mut self) -> Result<()>;

    /// Queue mono samples to start at `start_at` seconds on this clock
    ///
    /// # Errors
    ///
    /// Returns error if the stream is gone
    fn schedule(&mut self, start_at: f64, samples: Vec<f32>) -> Result<()>;
}

/// Opens output clocks
pub trait OutputDevice: Send {
    /// Open a mono output clock at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputClock>>;
}

/// Placement of one chunk on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    /// Start time in seconds
    pub start: f64,
    /// Length in seconds
    pub duration: f64,
}

impl ScheduledChunk {
    /// End time in seconds
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Schedules decoded speech chunks back to back in arrival order
///
/// The output clock is opened on first use and shared by every later chunk,
/// including chunks from later sessions. Scheduled chunks cannot be
/// cancelled; they play to completion.
pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    clock: Option<Box<dyn OutputClock>>,
    next_play_time: f64,
    lookahead: f64,
}

impl PlaybackScheduler {
    /// Create a scheduler that opens its clock from `device`
    #[must_use]
    pub fn new(device: Box<dyn OutputDevice>, lookahead: Duration) -> Self {
        Self {
            device,
            clock: None,
            next_play_time: 0.0,
            lookahead: lookahead.as_secs_f64(),
        }
    }

    /// Schedule one PCM16 LE chunk
    ///
    /// Returns `None` for a chunk with no whole samples.
    ///
    /// # Errors
    ///
    /// Returns error if the output clock cannot be opened or rejects the chunk
    pub fn schedule(&mut self, pcm_bytes: &[u8]) -> Result<Option<ScheduledChunk>> {
        let clock = match self.clock.as_mut() {
            Some(clock) => clock,
            None => {
                let opened = self.device.open(TARGET_SAMPLE_RATE)?;
                tracing::debug!(sample_rate = TARGET_SAMPLE_RATE, "output clock opened");
                self.clock.insert(opened)
            }
        };

        if clock.is_suspended() {
            if let Err(e) = clock.resume() {
                tracing::warn!(error = %e, "failed to resume output clock");
            }
        }

        let samples = pcm16_to_f32(&bytes_to_pcm16(pcm_bytes));
        if samples.is_empty() {
            return Ok(None);
        }

        #[allow(clippy::cast_precision_loss)]
        let duration = samples.len() as f64 / f64::from(TARGET_SAMPLE_RATE);
        let earliest = clock.current_time() + self.lookahead;
        let start = self.next_play_time.max(earliest);

        clock.schedule(start, samples)?;
        self.next_play_time = start + duration;

        tracing::trace!(start, duration, "chunk scheduled");
        Ok(Some(ScheduledChunk { start, duration }))
    }

    /// Cursor where the next chunk will start, at the earliest
    #[must_use]
    pub const fn next_play_time(&self) -> f64 {
        self.next_play_time
    }

    /// Whether the output clock has been opened
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.clock.is_some()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Observable state of a [`FakeOutput`]
    #[derive(Debug, Default)]
    pub struct FakeOutputState {
        pub now: f64,
        pub suspended: bool,
        pub opens: usize,
        pub resumes: usize,
        pub scheduled: Vec<(f64, usize)>,
    }

    /// Output device whose clock only moves when a test moves it
    #[derive(Clone, Default)]
    pub struct FakeOutput {
        pub state: Arc<Mutex<FakeOutputState>>,
    }

    struct FakeClock {
        state: Arc<Mutex<FakeOutputState>>,
    }

    impl OutputDevice for FakeOutput {
        fn open(&self, _sample_rate: u32) -> Result<Box<dyn OutputClock>> {
            self.state.lock().unwrap().opens += 1;
            Ok(Box::new(FakeClock {
                state: Arc::clone(&self.state),
            }))
        }
    }

    impl OutputClock for FakeClock {
        fn current_time(&self) -> f64 {
            self.state.lock().unwrap().now
        }

        fn is_suspended(&self) -> bool {
            self.state.lock().unwrap().suspended
        }

        fn resume(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.suspended = false;
            state.resumes += 1;
            Ok(())
        }

        fn schedule(&mut self, start_at: f64, samples: Vec<f32>) -> Result<()> {
            self.state.lock().unwrap().scheduled.push((start_at, samples.len()));
            Ok(())
        }
    }
}
