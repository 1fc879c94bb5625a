//! Microphone capture contract
//!
//! A [`CaptureDevice`] opens a capture graph that delivers fixed-size mono
//! blocks. The graph must keep its processing path running for as long as it
//! is held, without routing captured audio to any output: the user never
//! hears their own microphone.

use tokio::sync::mpsc;

use crate::Result;

/// Frames per delivered block
pub const CAPTURE_BLOCK_FRAMES: usize = 4096;

/// Blocks buffered between the audio thread and the controller
pub const CAPTURE_QUEUE: usize = 8;

/// Processing requested from the input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct CaptureConstraints {
    pub mono: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl CaptureConstraints {
    /// What a live coaching session asks for
    pub const VOICE: Self = Self {
        mono: true,
        echo_cancellation: true,
        noise_suppression: true,
        auto_gain_control: true,
    };
}

/// One block of mono samples in `[-1, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Resources released when capture ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    DisconnectProcessor,
    DisconnectSource,
    DisconnectSink,
    CloseContext,
    StopTracks,
}

/// Release order
pub const TEARDOWN_ORDER: [TeardownStep; 5] = [
    TeardownStep::DisconnectProcessor,
    TeardownStep::DisconnectSource,
    TeardownStep::DisconnectSink,
    TeardownStep::CloseContext,
    TeardownStep::StopTracks,
];

/// A running capture pipeline
pub trait CaptureGraph: Send {
    /// Release one resource
    ///
    /// # Errors
    ///
    /// Returns error if the resource could not be released
    fn release(&mut self, step: TeardownStep) -> Result<()>;
}

/// Opens capture pipelines
pub trait CaptureDevice: Send + Sync {
    /// Start capturing, pushing blocks into `blocks`
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    fn open(
        &self,
        constraints: CaptureConstraints,
        blocks: mpsc::Sender<CaptureBlock>,
    ) -> Result<Box<dyn CaptureGraph>>;
}

/// Release every resource in order; a failing step never skips later ones
pub fn release_all(graph: &mut dyn CaptureGraph) {
    for step in TEARDOWN_ORDER {
        if let Err(e) = graph.release(step) {
            tracing::warn!(?step, error = %e, "capture teardown step failed");
        }
    }
}

/// Cuts an interleaved device stream into mono blocks
///
/// Runs on the audio thread: it never blocks, and drops blocks the controller
/// has not caught up with.
#[derive(Debug)]
pub struct BlockAccumulator {
    pending: Vec<f32>,
    sample_rate: u32,
    blocks: mpsc::Sender<CaptureBlock>,
    dropped: u64,
}

impl BlockAccumulator {
    #[must_use]
    pub fn new(sample_rate: u32, blocks: mpsc::Sender<CaptureBlock>) -> Self {
        Self {
            pending: Vec::with_capacity(CAPTURE_BLOCK_FRAMES),
            sample_rate,
            blocks,
            dropped: 0,
        }
    }

    /// Feed interleaved samples; channels are averaged down to mono
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) {
        let channels = channels.max(1);
        for frame in data.chunks(channels) {
            #[allow(clippy::cast_precision_loss)]
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            self.pending.push(mono);
            if self.pending.len() == CAPTURE_BLOCK_FRAMES {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(CAPTURE_BLOCK_FRAMES));
        let block = CaptureBlock {
            samples,
            sample_rate: self.sample_rate,
        };
        if self.blocks.try_send(block).is_err() {
            self.dropped += 1;
            if self.dropped.is_power_of_two() {
                tracing::debug!(dropped = self.dropped, "capture blocks dropped");
            }
        }
    }

    /// Blocks dropped so far
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}
