//! Shared handle to the collector connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use super::config::LinkConfig;
use super::state::{AtomicLinkState, LinkState};
use crate::error::{LinkError, LinkResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One open connection to the collector.
///
/// The write and read halves are locked separately so the send and receive
/// tasks never wait on each other.
pub struct Link {
    generation: u64,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Link {
    fn new(generation: u64, ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            generation,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    /// Number of the dial that produced this link. Starts at 1.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Send`] if the write fails.
    pub async fn send_text(&self, text: String) -> LinkResult<()> {
        self.sink
            .lock()
            .await
            .send(Message::text(text))
            .await
            .map_err(|e| LinkError::Send(e.to_string()))
    }

    /// Wait for the next inbound frame.
    ///
    /// Returns the payload of a text frame, or `None` for control and binary
    /// frames, which only prove the peer is alive. Cancel safe.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Closed`] when the collector closes the
    /// connection and [`LinkError::Receive`] on transport errors.
    pub async fn recv(&self) -> LinkResult<Option<String>> {
        match self.stream.lock().await.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(text.as_str().to_string())),
            Some(Ok(Message::Close(_))) | None => Err(LinkError::Closed),
            Some(Ok(_)) => Ok(None),
            Some(Err(e)) => Err(LinkError::Receive(e.to_string())),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(generation = self.generation, error = %e, "close handshake failed");
        }
    }
}

/// Owns the single connection shared by the send and receive tasks.
///
/// [`LinkManager::acquire`] dials while holding the slot lock, so when
/// several tasks find the link down only one of them dials and the others
/// reuse its result.
#[derive(Debug)]
pub struct LinkManager {
    url: Url,
    config: LinkConfig,
    slot: Mutex<Option<Arc<Link>>>,
    generations: AtomicU64,
    state: AtomicLinkState,
}

impl LinkManager {
    /// Create a manager for the collector at `url`. Nothing is dialed until
    /// the first [`acquire`](Self::acquire).
    #[must_use]
    pub fn new(url: Url, config: LinkConfig) -> Self {
        Self {
            url,
            config,
            slot: Mutex::new(None),
            generations: AtomicU64::new(0),
            state: AtomicLinkState::new(LinkState::Disconnected),
        }
    }

    /// Link timing.
    #[must_use]
    pub const fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current link state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state.load()
    }

    /// Number of dials that succeeded so far.
    #[must_use]
    pub fn dials(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    /// Return the open link, dialing first if there is none.
    ///
    /// # Errors
    ///
    /// Returns the dial failure; the slot stays empty so the next caller
    /// dials again.
    pub async fn acquire(&self) -> LinkResult<Arc<Link>> {
        let mut slot = self.slot.lock().await;
        if let Some(link) = slot.as_ref() {
            return Ok(Arc::clone(link));
        }

        self.state.store(LinkState::Connecting);
        match self.dial().await {
            Ok(ws) => {
                let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                let link = Arc::new(Link::new(generation, ws));
                *slot = Some(Arc::clone(&link));
                self.state.store(LinkState::Connected);
                info!(collector = %redacted(&self.url), generation, "connected to collector");
                Ok(link)
            }
            Err(e) => {
                self.state.store(if e.is_auth() {
                    LinkState::Rejected
                } else {
                    LinkState::Disconnected
                });
                Err(e)
            }
        }
    }

    /// Drop the link of `generation` so the next [`acquire`](Self::acquire)
    /// redials. Returns `false` if that link was already replaced.
    pub async fn invalidate(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|link| link.generation == generation) {
            *slot = None;
            self.state.store(LinkState::Disconnected);
            warn!(generation, "collector link invalidated");
            true
        } else {
            false
        }
    }

    /// Close the current link, if any.
    pub async fn close(&self) {
        let link = self.slot.lock().await.take();
        if let Some(link) = link {
            link.close().await;
            info!(generation = link.generation, "collector link closed");
        }
        self.state.store(LinkState::Disconnected);
    }

    async fn dial(&self) -> LinkResult<WsStream> {
        debug!(collector = %redacted(&self.url), "dialing collector");
        let connect = connect_async(self.url.as_str());
        match tokio::time::timeout(self.config.dial_timeout, connect).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(WsError::Http(response))) => {
                let status = response.status();
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    Err(LinkError::Auth {
                        status: status.as_u16(),
                    })
                } else {
                    Err(LinkError::Dial(format!("handshake refused with HTTP {status}")))
                }
            }
            Ok(Err(e)) => Err(LinkError::Dial(e.to_string())),
            Err(_) => Err(LinkError::DialTimeout(self.config.dial_timeout)),
        }
    }
}

/// `url` without its query, which carries the key.
fn redacted(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_query(None);
    url
}
