//! WebSocket transport and relay server.
//!
//! `WsConnector` opens sessions against a remote broker engine reachable at
//! the configured `ws://` URL. `start_websocket_server` is that remote end:
//! it accepts WebSocket connections and relays their JSON frames into a
//! shared [`MemoryBroker`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::MemoryBroker;
use crate::config::BrokerSettings;
use crate::transport::link::{FrameLink, FrameTransport};
use crate::transport::message::{ClientFrame, ServerFrame};
use crate::transport::{BrokerTransport, Connector, EventSender};
use crate::utils::{Result, SessionError, lock};

const RETRY_DELAY: Duration = Duration::from_millis(250);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(
        &self,
        settings: &BrokerSettings,
        events: EventSender,
    ) -> Result<Arc<dyn BrokerTransport>> {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let link = WsLink {
            url: settings.url.clone(),
            retries: settings.connect_retries,
            outgoing: Mutex::new(None),
            frames: frames_tx,
        };
        Ok(Arc::new(FrameTransport::new(link, settings, frames_rx, events)))
    }
}

struct WsLink {
    url: String,
    retries: u32,
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    frames: mpsc::UnboundedSender<ServerFrame>,
}

impl FrameLink for WsLink {
    fn open(&self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.outgoing) = Some(tx);
        spawn(run_socket(
            self.url.clone(),
            self.retries,
            rx,
            self.frames.clone(),
        ));
        Ok(())
    }

    fn send_frame(&self, frame: ClientFrame) -> Result<()> {
        let outgoing = lock(&self.outgoing);
        let Some(outgoing) = outgoing.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        outgoing
            .send(frame)
            .map_err(|_| SessionError::Transport("WebSocket connection is closed".to_string()))
    }
}

async fn connect_with_retries(url: &str, retries: u32) -> Result<WsStream> {
    let mut attempt = 0;
    loop {
        match connect_async(url).await {
            Ok((stream, _)) => return Ok(stream),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!("Connection attempt {attempt} to {url} failed: {e}; retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Owns one client WebSocket. Frames queued before the socket is up are sent
/// once it connects. Ends with a `Disconnected` frame, synthesized if the
/// server never sent one.
async fn run_socket(
    url: String,
    retries: u32,
    mut outgoing: mpsc::UnboundedReceiver<ClientFrame>,
    frames: mpsc::UnboundedSender<ServerFrame>,
) {
    let stream = match connect_with_retries(&url, retries).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = frames.send(ServerFrame::ConnectFailed {
                reason: e.to_string(),
            });
            return;
        }
    };
    debug!("WebSocket connected to {url}");

    let (mut sink, mut source) = stream.split();
    let writer = spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Unable to encode frame: {e}");
                    continue;
                }
            };
            if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                warn!("Failed to send frame: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut disconnected = false;
    while let Some(message) = source.next().await {
        match message {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerFrame>(text.as_str()) {
                Ok(frame) => {
                    disconnected = frame == ServerFrame::Disconnected;
                    if frames.send(frame).is_err() || disconnected {
                        break;
                    }
                }
                Err(e) => warn!("Invalid server frame: {e} | {}", text.as_str()),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error on {url}: {e}");
                break;
            }
        }
    }

    if !disconnected {
        let _ = frames.send(ServerFrame::Disconnected);
    }
    writer.abort();
}

/// Binds `addr` and relays every WebSocket connection into `broker`.
pub async fn start_websocket_server(addr: String, broker: MemoryBroker) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| SessionError::Transport(format!("can't bind {addr}: {e}")))?;

    info!("WebSocket server listening on ws://{addr}");
    serve(listener, broker).await;
    Ok(())
}

/// Accepts connections on an already bound listener.
pub async fn serve(listener: TcpListener, broker: MemoryBroker) {
    while let Ok((stream, _)) = listener.accept().await {
        let broker = broker.clone();
        let peer = format!("peer-{}", Uuid::new_v4());
        spawn(handle_connection(stream, peer, broker));
    }
}

async fn handle_connection(stream: TcpStream, peer: String, broker: MemoryBroker) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    // broker -> peer
    let writer_peer = peer.clone();
    spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = frame == ServerFrame::Disconnected;
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Unable to encode frame for {writer_peer}: {e}");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(WsMessage::Text(text.into())).await {
                warn!("Failed to send frame to {writer_peer}: {e}");
                break;
            }
            if closing {
                let _ = ws_sender.close().await;
                break;
            }
        }
        debug!("Send loop closed for {writer_peer}");
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => {
                if let Err(e) = broker.handle_frame(&peer, &tx, frame) {
                    warn!("Rejected frame from {peer}: {e}");
                }
            }
            Err(err) => warn!("Invalid client frame: {err} | {text}"),
        }
    }

    info!("{peer} disconnected");
    broker.detach(&peer);
}
