//! Scheduled playback on the default output device

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};

use crate::realtime::playback::{OutputClock, OutputDevice};
use crate::{Error, Result};

/// Plays to the default output device
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalSpeaker;

impl OutputDevice for CpalSpeaker {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputClock>> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (control_tx, control_rx) = std_mpsc::channel::<std_mpsc::Sender<Result<()>>>();

        std::thread::Builder::new()
            .name("coach-playback".to_string())
            .spawn(move || output_thread(sample_rate, &ready_tx, &control_rx))?;

        let (timeline, suspended) = super::blocking(|| ready_rx.recv())
            .map_err(|_| Error::Audio("playback thread exited".to_string()))??;

        Ok(Box::new(CpalClock {
            timeline,
            suspended,
            resume: control_tx,
        }))
    }
}

/// Chunk waiting on the output timeline
#[derive(Debug)]
struct Segment {
    /// First device frame of the chunk
    start_frame: u64,
    samples: Vec<f32>,
}

/// What the output callback plays, and how far it has got
///
/// Positions are kept in whole device frames so back-to-back chunks meet
/// exactly, whatever rounding their start times picked up.
#[derive(Debug)]
pub struct Timeline {
    device_rate: u64,
    source_rate: u64,
    frames: u64,
    segments: VecDeque<Segment>,
}

impl Timeline {
    /// Timeline for `source_rate` chunks played at `device_rate`
    #[must_use]
    pub fn new(source_rate: u32, device_rate: u32) -> Self {
        Self {
            device_rate: u64::from(device_rate.max(1)),
            source_rate: u64::from(source_rate.max(1)),
            frames: 0,
            segments: VecDeque::new(),
        }
    }

    /// Seconds played so far
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn now(&self) -> f64 {
        self.frames as f64 / self.device_rate as f64
    }

    /// Queue samples to start at `start` seconds
    pub fn push(&mut self, start: f64, samples: Vec<f32>) {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let start_frame = (start.max(0.0) * self.device_rate as f64).round() as u64;
        self.segments.push_back(Segment {
            start_frame,
            samples,
        });
    }

    /// Device frames a chunk of `len` source samples occupies
    fn span(&self, len: usize) -> u64 {
        (len as u64 * self.device_rate).div_ceil(self.source_rate)
    }

    /// Produce the next device frame and advance the clock
    pub fn next_sample(&mut self) -> f32 {
        let frame = self.frames;
        self.frames += 1;

        while let Some(front) = self.segments.front() {
            if frame < front.start_frame + self.span(front.samples.len()) {
                break;
            }
            self.segments.pop_front();
        }

        let Some(front) = self.segments.front() else {
            return 0.0;
        };
        if frame < front.start_frame {
            return 0.0;
        }
        let index = (frame - front.start_frame) * self.source_rate / self.device_rate;
        usize::try_from(index)
            .ok()
            .and_then(|i| front.samples.get(i))
            .copied()
            .unwrap_or(0.0)
    }

    /// Chunks not yet fully played
    #[must_use]
    pub fn pending(&self) -> usize {
        self.segments.len()
    }
}

type Ready = Result<(Arc<Mutex<Timeline>>, Arc<AtomicBool>)>;

struct CpalClock {
    timeline: Arc<Mutex<Timeline>>,
    suspended: Arc<AtomicBool>,
    resume: std_mpsc::Sender<std_mpsc::Sender<Result<()>>>,
}

impl OutputClock for CpalClock {
    fn current_time(&self) -> f64 {
        self.timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .now()
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Relaxed)
    }

    fn resume(&mut self) -> Result<()> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.resume
            .send(reply_tx)
            .map_err(|_| Error::Audio("playback thread exited".to_string()))?;
        super::blocking(|| reply_rx.recv())
            .map_err(|_| Error::Audio("playback thread exited".to_string()))?
    }

    fn schedule(&mut self, start_at: f64, samples: Vec<f32>) -> Result<()> {
        self.timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(start_at, samples);
        Ok(())
    }
}

fn output_thread(
    source_rate: u32,
    ready: &std_mpsc::Sender<Ready>,
    resume: &std_mpsc::Receiver<std_mpsc::Sender<Result<()>>>,
) {
    let suspended = Arc::new(AtomicBool::new(false));
    let (stream, timeline) = match build_stream(source_rate, Arc::clone(&suspended)) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok((timeline, Arc::clone(&suspended))));

    while let Ok(reply) = resume.recv() {
        let result = stream.play().map_err(|e| Error::Audio(e.to_string()));
        if result.is_ok() {
            suspended.store(false, Ordering::Relaxed);
        }
        let _ = reply.send(result);
    }
    tracing::debug!("audio playback closed");
}

fn pick_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |c: &SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels
            && c.sample_format() == cpal::SampleFormat::F32
            && c.min_sample_rate() <= rate
            && c.max_sample_rate() >= rate
    };

    let exact = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| supports(c, 1))
        .or_else(|| {
            // stereo fallback
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports(c, 2))
        });

    if let Some(range) = exact {
        return Ok(range.with_sample_rate(rate).config());
    }

    // play at the device rate and let the timeline pick source samples
    let fallback = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    if fallback.sample_format() != cpal::SampleFormat::F32 {
        return Err(Error::Audio("no suitable output config found".to_string()));
    }
    Ok(fallback.config())
}

fn build_stream(
    source_rate: u32,
    suspended: Arc<AtomicBool>,
) -> Result<(Stream, Arc<Mutex<Timeline>>)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let config = pick_config(&device, source_rate)?;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio playback initialized"
    );

    let timeline = Arc::new(Mutex::new(Timeline::new(source_rate, config.sample_rate.0)));
    let callback_timeline = Arc::clone(&timeline);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut timeline = callback_timeline
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks_mut(channels) {
                    frame.fill(timeline.next_sample());
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                suspended.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, timeline))
}
