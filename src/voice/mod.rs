//! Audio device backends
//!
//! cpal implementations of the capture and output contracts in
//! [`crate::realtime`], plus the device checks behind `test-mic` and
//! `test-speaker`.

mod capture;
mod playback;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::Result;
use crate::realtime::capture::{CAPTURE_QUEUE, CaptureConstraints, CaptureDevice, release_all};
use crate::realtime::codec::TARGET_SAMPLE_RATE;
use crate::realtime::playback::OutputDevice;

pub use capture::CpalMicrophone;
pub use playback::{CpalSpeaker, Timeline};

/// Run device work that waits on an audio thread
///
/// On a multi-threaded runtime the worker is handed off first so other
/// tasks keep running while this one waits.
fn blocking<T>(work: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

/// Result of a microphone check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MicLevel {
    pub blocks: usize,
    pub sample_rate: u32,
    pub rms: f32,
    pub peak: f32,
}

/// Record from `device` for `duration` and measure the level
///
/// # Errors
///
/// Returns error if the microphone cannot be opened
pub async fn measure_microphone(device: &dyn CaptureDevice, duration: Duration) -> Result<MicLevel> {
    let (tx, mut rx) = mpsc::channel(CAPTURE_QUEUE);
    let mut graph = device.open(CaptureConstraints::VOICE, tx)?;

    let mut level = MicLevel {
        blocks: 0,
        sample_rate: 0,
        rms: 0.0,
        peak: 0.0,
    };
    let mut sum_squares = 0.0f64;
    let mut count = 0usize;

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            block = rx.recv() => {
                let Some(block) = block else { break };
                level.blocks += 1;
                level.sample_rate = block.sample_rate;
                for &s in &block.samples {
                    sum_squares += f64::from(s) * f64::from(s);
                    level.peak = level.peak.max(s.abs());
                }
                count += block.samples.len();
            }
        }
    }
    release_all(graph.as_mut());

    if count > 0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let rms = (sum_squares / count as f64).sqrt() as f32;
        level.rms = rms;
    }
    Ok(level)
}

/// Play a short tone through `device` and wait for it to finish
///
/// # Errors
///
/// Returns error if the speaker cannot be opened
pub async fn play_test_tone(device: &dyn OutputDevice, frequency: f32, duration: Duration) -> Result<()> {
    let mut clock = device.open(TARGET_SAMPLE_RATE)?;
    let samples = tone(frequency, duration);
    let start = clock.current_time() + 0.05;
    clock.schedule(start, samples)?;
    tokio::time::sleep(duration + Duration::from_millis(200)).await;
    Ok(())
}

/// Sine tone at quarter amplitude, 24 kHz
#[must_use]
pub fn tone(frequency: f32, duration: Duration) -> Vec<f32> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (duration.as_secs_f64() * f64::from(TARGET_SAMPLE_RATE)) as usize;
    #[allow(clippy::cast_precision_loss)]
    let rate = TARGET_SAMPLE_RATE as f32;
    (0..len)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / rate;
            0.25 * (std::f32::consts::TAU * frequency * t).sin()
        })
        .collect()
}
