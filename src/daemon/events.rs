use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::store::SyncedStore;

use super::api_types::DaemonEvent;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Live connection to the daemon's event stream.
pub struct EventStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// Open the WebSocket endpoint and hand back a typed frame reader.
pub async fn connect_events(url: &str) -> Result<EventStream, ClientError> {
    let (ws, _response) = connect_async(url).await.map_err(ClientError::WebSocket)?;
    Ok(EventStream { ws })
}

impl EventStream {
    /// Next parsed event; `None` once the daemon closes the stream.
    ///
    /// A frame that fails to decode ends the stream with an error — the
    /// caller treats that the same as a disconnect and falls back to
    /// baseline polling.
    pub async fn next_event(&mut self) -> Result<Option<DaemonEvent>, ClientError> {
        while let Some(frame) = self.ws.next().await {
            match frame.map_err(ClientError::WebSocket)? {
                Message::Text(text) => {
                    let event = serde_json::from_str(&text).map_err(ClientError::Decode)?;
                    return Ok(Some(event));
                }
                Message::Close(_) => return Ok(None),
                // Pings are answered by the transport on the next read.
                _ => continue,
            }
        }
        Ok(None)
    }
}

/// Supervise the event stream for the store's lifetime: connect, drain
/// frames into the reconciler, reconnect with capped exponential backoff.
/// The backoff resets once a connection has delivered at least one frame.
pub async fn run_event_loop(store: SyncedStore, url: String) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match connect_events(&url).await {
            Ok(mut stream) => {
                info!(url = %url, "Connected to daemon event stream");
                store.set_websocket_connected(true);
                let mut delivered = false;
                loop {
                    match stream.next_event().await {
                        Ok(Some(event)) => {
                            delivered = true;
                            store.apply_event(event);
                        }
                        Ok(None) => {
                            info!("Daemon event stream closed");
                            break;
                        }
                        Err(err) => {
                            warn!(error = ?err, "Event stream failure");
                            break;
                        }
                    }
                }
                store.set_websocket_connected(false);
                if delivered {
                    backoff = INITIAL_BACKOFF;
                }
            }
            Err(err) => {
                debug!(error = ?err, "Event stream connect failed");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
