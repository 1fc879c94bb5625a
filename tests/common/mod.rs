//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use audition_coach::config::ClientConfig;
use audition_coach::realtime::capture::{
    CaptureBlock, CaptureConstraints, CaptureDevice, CaptureGraph, TeardownStep,
};
use audition_coach::realtime::playback::{OutputClock, OutputDevice, PlaybackScheduler};
use audition_coach::realtime::token::{DEFAULT_WS_URL, Token, TokenBroker};
use audition_coach::realtime::transport::{Connector, SocketLink, SocketPeer};
use audition_coach::realtime::{SessionController, SessionUpdate};
use audition_coach::{Config, Error, Mode, Result, SessionParams};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Build a config from key/value pairs instead of the process environment
#[must_use]
pub fn config_from(pairs: &[(&str, &str)]) -> Config {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Config::from_lookup(move |key| map.get(key).cloned())
}

/// Serve a router on an ephemeral local port, returning its base URL
pub async fn serve(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server failed");
    });
    format!("http://{addr}")
}

/// Parameters every realtime test can use
#[must_use]
pub fn params() -> SessionParams {
    SessionParams::new(Mode::IntenseDrama, 60, "Hard")
}

/// Broker that hands out a fixed token, or fails
pub struct StaticBroker {
    pub value: String,
    pub fail_with: Option<String>,
}

impl StaticBroker {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            value: "ek_test".to_string(),
            fail_with: None,
        }
    }
}

#[async_trait]
impl TokenBroker for StaticBroker {
    async fn fetch_token(&self, _params: &SessionParams) -> Result<Token> {
        if let Some(message) = &self.fail_with {
            return Err(Error::Upstream(message.clone()));
        }
        Ok(Token::new(self.value.clone(), None, DEFAULT_WS_URL))
    }
}

/// Connector that keeps the socket side of every link for the test to drive
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub peers: Arc<Mutex<Vec<SocketPeer>>>,
    pub connects: Arc<Mutex<usize>>,
}

impl FakeConnector {
    /// Take the socket side of the most recent link
    pub fn take_peer(&self) -> SocketPeer {
        self.peers.lock().unwrap().pop().expect("no socket was dialled")
    }

    pub fn connect_count(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _ws_url: &str, _token: &Token) -> Result<SocketLink> {
        *self.connects.lock().unwrap() += 1;
        let (link, peer) = SocketLink::pair();
        self.peers.lock().unwrap().push(peer);
        Ok(link)
    }
}

/// Microphone that records teardown and lets tests push blocks
#[derive(Clone, Default)]
pub struct FakeMic {
    pub released: Arc<Mutex<Vec<TeardownStep>>>,
    pub blocks: Arc<Mutex<Option<mpsc::Sender<CaptureBlock>>>>,
    pub fail_open: bool,
}

struct FakeGraph {
    released: Arc<Mutex<Vec<TeardownStep>>>,
}

impl CaptureGraph for FakeGraph {
    fn release(&mut self, step: TeardownStep) -> Result<()> {
        self.released.lock().unwrap().push(step);
        Ok(())
    }
}

impl CaptureDevice for FakeMic {
    fn open(
        &self,
        _constraints: CaptureConstraints,
        blocks: mpsc::Sender<CaptureBlock>,
    ) -> Result<Box<dyn CaptureGraph>> {
        if self.fail_open {
            return Err(Error::Audio("permission denied".to_string()));
        }
        *self.blocks.lock().unwrap() = Some(blocks);
        Ok(Box::new(FakeGraph {
            released: Arc::clone(&self.released),
        }))
    }
}

impl FakeMic {
    /// Sender the controller is reading microphone blocks from
    pub fn sender(&self) -> mpsc::Sender<CaptureBlock> {
        self.blocks
            .lock()
            .unwrap()
            .clone()
            .expect("microphone was never opened")
    }
}

/// Output whose clock stands still
#[derive(Clone, Default)]
pub struct FakeSpeaker {
    pub scheduled: Arc<Mutex<Vec<(f64, usize)>>>,
}

struct FakeSpeakerClock {
    scheduled: Arc<Mutex<Vec<(f64, usize)>>>,
}

impl OutputDevice for FakeSpeaker {
    fn open(&self, _sample_rate: u32) -> Result<Box<dyn OutputClock>> {
        Ok(Box::new(FakeSpeakerClock {
            scheduled: Arc::clone(&self.scheduled),
        }))
    }
}

impl OutputClock for FakeSpeakerClock {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn is_suspended(&self) -> bool {
        false
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn schedule(&mut self, start_at: f64, samples: Vec<f32>) -> Result<()> {
        self.scheduled.lock().unwrap().push((start_at, samples.len()));
        Ok(())
    }
}

/// A controller wired to fakes
pub struct Harness {
    pub controller: SessionController,
    pub updates: mpsc::UnboundedReceiver<SessionUpdate>,
    pub connector: FakeConnector,
    pub mic: FakeMic,
    pub speaker: FakeSpeaker,
}

impl Harness {
    #[must_use]
    pub fn new(broker: Box<dyn TokenBroker>) -> Self {
        Self::with_mic(broker, FakeMic::default())
    }

    #[must_use]
    pub fn with_mic(broker: Box<dyn TokenBroker>, mic: FakeMic) -> Self {
        let connector = FakeConnector::default();
        let speaker = FakeSpeaker::default();
        let config = ClientConfig::default();
        let (controller, updates) = SessionController::new(
            broker,
            Box::new(connector.clone()),
            Box::new(mic.clone()),
            PlaybackScheduler::new(Box::new(speaker.clone()), config.playback_lookahead),
            &config,
        );
        Self {
            controller,
            updates,
            connector,
            mic,
            speaker,
        }
    }

    /// Every update emitted so far
    pub fn drain(&mut self) -> Vec<SessionUpdate> {
        drain(&mut self.updates)
    }
}

/// Every update currently queued
pub fn drain(updates: &mut mpsc::UnboundedReceiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut all = Vec::new();
    while let Ok(update) = updates.try_recv() {
        all.push(update);
    }
    all
}
