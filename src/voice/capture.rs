//! Microphone capture on the default input device

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use tokio::sync::mpsc;

use crate::realtime::capture::{
    BlockAccumulator, CaptureBlock, CaptureConstraints, CaptureDevice, CaptureGraph, TeardownStep,
};
use crate::{Error, Result};

type Control = (TeardownStep, std_mpsc::Sender<Result<()>>);

/// Captures from the default input device
///
/// cpal streams cannot leave the thread that built them, so each capture
/// graph owns a thread that holds the stream and applies teardown steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalMicrophone;

impl CaptureDevice for CpalMicrophone {
    fn open(
        &self,
        constraints: CaptureConstraints,
        blocks: mpsc::Sender<CaptureBlock>,
    ) -> Result<Box<dyn CaptureGraph>> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (control_tx, control_rx) = std_mpsc::channel::<Control>();

        let thread = std::thread::Builder::new()
            .name("coach-capture".to_string())
            .spawn(move || capture_thread(constraints, blocks, &ready_tx, &control_rx))?;

        let sample_rate = super::blocking(|| ready_rx.recv())
            .map_err(|_| Error::Audio("capture thread exited".to_string()))??;

        tracing::debug!(sample_rate, "audio capture started");
        Ok(Box::new(CpalCaptureGraph {
            control: Some(control_tx),
            thread: Some(thread),
        }))
    }
}

struct CpalCaptureGraph {
    control: Option<std_mpsc::Sender<Control>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureGraph for CpalCaptureGraph {
    fn release(&mut self, step: TeardownStep) -> Result<()> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| Error::Audio("capture already stopped".to_string()))?;
        let (reply_tx, reply_rx) = std_mpsc::channel();
        control
            .send((step, reply_tx))
            .map_err(|_| Error::Audio("capture thread exited".to_string()))?;
        let result = super::blocking(|| reply_rx.recv())
            .map_err(|_| Error::Audio("capture thread exited".to_string()))?;

        if step == TeardownStep::StopTracks {
            self.control = None;
            if let Some(thread) = self.thread.take() {
                if super::blocking(|| thread.join()).is_err() {
                    tracing::warn!("capture thread panicked");
                }
            }
            tracing::debug!("audio capture stopped");
        }
        result
    }
}

fn capture_thread(
    constraints: CaptureConstraints,
    blocks: mpsc::Sender<CaptureBlock>,
    ready: &std_mpsc::Sender<Result<u32>>,
    control: &std_mpsc::Receiver<Control>,
) {
    let forwarding = Arc::new(AtomicBool::new(true));
    let (stream, sample_rate) = match build_stream(constraints, blocks, Arc::clone(&forwarding)) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(sample_rate));

    let mut stream = Some(stream);
    while let Ok((step, reply)) = control.recv() {
        let result = match step {
            TeardownStep::DisconnectProcessor => {
                forwarding.store(false, Ordering::Relaxed);
                Ok(())
            }
            TeardownStep::DisconnectSource => stream.as_ref().map_or(Ok(()), |s| {
                s.pause().map_err(|e| Error::Audio(e.to_string()))
            }),
            // captured audio is never routed to an output
            TeardownStep::DisconnectSink => Ok(()),
            TeardownStep::CloseContext => {
                drop(stream.take());
                Ok(())
            }
            TeardownStep::StopTracks => {
                drop(stream.take());
                let _ = reply.send(Ok(()));
                return;
            }
        };
        let _ = reply.send(result);
    }
}

fn build_stream(
    constraints: CaptureConstraints,
    blocks: mpsc::Sender<CaptureBlock>,
    forwarding: Arc<AtomicBool>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config = supported.config();
    let channels = usize::from(config.channels);
    let sample_rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        mono = constraints.mono,
        echo_cancellation = constraints.echo_cancellation,
        noise_suppression = constraints.noise_suppression,
        auto_gain_control = constraints.auto_gain_control,
        "audio capture initialized; voice processing is left to the platform"
    );

    let mut accumulator = BlockAccumulator::new(sample_rate, blocks);
    let on_error = |err| tracing::error!(error = %err, "audio capture error");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if forwarding.load(Ordering::Relaxed) {
                    accumulator.push_interleaved(data, channels);
                }
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if forwarding.load(Ordering::Relaxed) {
                    let samples: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    accumulator.push_interleaved(&samples, channels);
                }
            },
            on_error,
            None,
        ),
        other => {
            return Err(Error::Audio(format!("unsupported input sample format {other}")));
        }
    }
    .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, sample_rate))
}
