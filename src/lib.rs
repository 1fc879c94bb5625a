//! Audition Coach - realtime voice coaching for acting auditions
//!
//! This library provides the pieces of a live coaching session:
//! - PCM16 codec and gapless playback scheduling
//! - Short-lived realtime credentials and the backend that mints them
//! - The realtime session controller and its socket transport
//! - cpal microphone and speaker backends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 coach (CLI session)                  │
//! │   Microphone  │  Speaker  │  Transcripts  │ Status  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Session Controller                      │
//! │   Codec  │  Playback  │  Events  │  Transport       │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │ token                       │ socket
//! ┌──────────▼──────────┐       ┌──────────▼────────────┐
//! │   Token backend     │       │  Realtime model       │
//! │   (serve)           │──────▶│  session              │
//! └─────────────────────┘       └───────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod realtime;
pub mod validation;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use validation::{Mode, SessionParams};
