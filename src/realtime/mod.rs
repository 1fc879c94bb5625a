//! Realtime voice bridge
//!
//! Microphone audio flows out through [`codec`] and [`transport`]; the
//! coach's speech flows back through [`events`], [`codec`] and [`playback`].
//! The [`controller`] ties them together for one session at a time.

pub mod capture;
pub mod codec;
pub mod controller;
pub mod events;
pub mod playback;
pub mod token;
pub mod transport;

pub use capture::{CaptureBlock, CaptureConstraints, CaptureDevice, CaptureGraph, TeardownStep};
pub use controller::{SessionController, SessionHandle, SessionState, SessionUpdate, Snapshot};
pub use events::{ClientEvent, ServerEvent};
pub use playback::{OutputClock, OutputDevice, PlaybackScheduler, ScheduledChunk};
pub use token::{HttpTokenBroker, Token, TokenBroker};
pub use transport::{Connector, SocketEvent, SocketLink, WsConnector};
