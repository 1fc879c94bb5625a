//! Realtime socket transport
//!
//! A [`SocketLink`] is the controller's view of one socket: a stream of
//! [`SocketEvent`]s in, fire-and-forget text frames out. The socket itself is
//! driven by a pump task so nothing on the controller's path blocks on IO.

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use super::token::Token;
use crate::{Error, Result};

/// Outbound frames queued before new ones are dropped
pub const OUTBOUND_CAPACITY: usize = 64;

/// Inbound events buffered before the pump waits
pub const EVENT_CAPACITY: usize = 256;

/// Something that happened on the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Handshake completed
    Open,
    /// Text frame
    Message(String),
    /// Socket-level failure; a failed dial reports only this
    Error(String),
    /// An established socket closed
    Closed { code: Option<u16>, reason: String },
}

/// Controller side of a socket
#[derive(Debug)]
pub struct SocketLink {
    outbound: mpsc::Sender<String>,
    events: mpsc::Receiver<SocketEvent>,
    close: Option<oneshot::Sender<()>>,
}

/// Socket side of a [`SocketLink`], held by whatever drives the socket
#[derive(Debug)]
pub struct SocketPeer {
    /// Frames the controller wants sent
    pub outbound: mpsc::Receiver<String>,
    /// Where socket events are reported
    pub events: mpsc::Sender<SocketEvent>,
    /// Resolves when the controller closes the link or drops it
    pub close: oneshot::Receiver<()>,
}

impl SocketLink {
    /// Create a connected link/peer pair
    #[must_use]
    pub fn pair() -> (Self, SocketPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (close_tx, close_rx) = oneshot::channel();
        (
            Self {
                outbound: outbound_tx,
                events: events_rx,
                close: Some(close_tx),
            },
            SocketPeer {
                outbound: outbound_rx,
                events: events_tx,
                close: close_rx,
            },
        )
    }

    /// Queue a text frame without waiting
    ///
    /// Returns `false` if the frame was dropped because the queue is full or
    /// the socket is gone.
    pub fn send(&self, text: String) -> bool {
        match self.outbound.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("socket gone, dropping frame");
                false
            }
        }
    }

    /// Next socket event; `None` once the socket side is gone
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        self.events.recv().await
    }

    /// Ask the socket to close. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            // the pump may already be gone
            let _ = close.send(());
        }
    }
}

/// Dials realtime sockets
pub trait Connector: Send + Sync {
    /// Start connecting to `ws_url` authenticated with `token`
    ///
    /// Progress arrives as [`SocketEvent`]s on the returned link.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be built
    fn connect(&self, ws_url: &str, token: &Token) -> Result<SocketLink>;
}

/// WebSocket connector carrying the token in the subprotocol header
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Build the handshake request
    ///
    /// # Errors
    ///
    /// Returns error if the URL or header is invalid
    pub fn build_request(ws_url: &str, token: &Token) -> Result<Request> {
        let mut request = ws_url.into_client_request()?;
        let mut protocol = HeaderValue::from_str(&format!(
            "realtime, openai-insecure-api-key.{}",
            token.expose()
        ))
        .map_err(|_| Error::Transport("token is not a valid header value".to_string()))?;
        protocol.set_sensitive(true);
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", protocol);
        Ok(request)
    }
}

impl Connector for WsConnector {
    fn connect(&self, ws_url: &str, token: &Token) -> Result<SocketLink> {
        let request = Self::build_request(ws_url, token)?;
        let (link, peer) = SocketLink::pair();
        tracing::info!(url = %ws_url, "connecting realtime socket");
        tokio::spawn(pump(request, peer));
        Ok(link)
    }
}

async fn pump(request: Request, peer: SocketPeer) {
    let SocketPeer {
        mut outbound,
        events,
        mut close,
    } = peer;

    let stream = match connect_async(request).await {
        Ok((stream, response)) => {
            tracing::debug!(status = %response.status(), "realtime socket connected");
            stream
        }
        Err(e) => {
            tracing::warn!(error = %e, "realtime socket dial failed");
            let _ = events.send(SocketEvent::Error(e.to_string())).await;
            return;
        }
    };

    if events.send(SocketEvent::Open).await.is_err() {
        return;
    }

    let (mut sink, mut stream) = stream.split();

    loop {
        tokio::select! {
            _ = &mut close => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    tracing::debug!(error = %e, "close frame not sent");
                }
                break;
            }
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "realtime socket send failed");
                    let _ = events.send(SocketEvent::Error(e.to_string())).await;
                    let _ = events
                        .send(SocketEvent::Closed { code: None, reason: e.to_string() })
                        .await;
                    break;
                }
            }
            message = stream.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => SocketEvent::Message(text),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                            .unwrap_or_default();
                        let _ = events.send(SocketEvent::Closed { code, reason }).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "realtime socket read failed");
                        let _ = events.send(SocketEvent::Error(e.to_string())).await;
                        let _ = events
                            .send(SocketEvent::Closed { code: None, reason: e.to_string() })
                            .await;
                        break;
                    }
                    None => {
                        let _ = events
                            .send(SocketEvent::Closed { code: None, reason: String::new() })
                            .await;
                        break;
                    }
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("realtime socket pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::token::DEFAULT_WS_URL;

    #[test]
    fn request_carries_subprotocol_credential() {
        let token = Token::new("ek_abc", None, DEFAULT_WS_URL);
        let request = WsConnector::build_request(DEFAULT_WS_URL, &token).unwrap();
        let header = request.headers().get("Sec-WebSocket-Protocol").unwrap();
        assert_eq!(
            header.to_str().unwrap(),
            "realtime, openai-insecure-api-key.ek_abc"
        );
        assert!(header.is_sensitive());
        assert_eq!(request.uri().query(), Some("model=gpt-realtime"));
    }

    #[test]
    fn bad_url_fails_synchronously() {
        let token = Token::new("ek_abc", None, DEFAULT_WS_URL);
        assert!(WsConnector::build_request("not a url", &token).is_err());
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let token = Token::new("ek\nabc", None, DEFAULT_WS_URL);
        assert!(matches!(
            WsConnector::build_request(DEFAULT_WS_URL, &token),
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn full_queue_drops_frames() {
        let (link, mut peer) = SocketLink::pair();
        for i in 0..OUTBOUND_CAPACITY {
            assert!(link.send(format!("frame {i}")));
        }
        assert!(!link.send("overflow".to_string()));
        assert_eq!(peer.outbound.recv().await.as_deref(), Some("frame 0"));
    }

    #[tokio::test]
    async fn close_signals_peer_once() {
        let (mut link, peer) = SocketLink::pair();
        link.close();
        link.close();
        assert!(peer.close.await.is_ok());
    }

    #[tokio::test]
    async fn send_after_peer_drop_is_dropped() {
        let (link, peer) = SocketLink::pair();
        drop(peer);
        assert!(!link.send("late".to_string()));
    }
}
