//! OCast WebSocket transport (§4.G): connect, size-limited send, and close.

use ocast_core::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const MAX_OUTBOUND_PAYLOAD: usize = 4096;
const TLS_PORT: u16 = 4433;
const PLAIN_PORT: u16 = 4434;

/// Receives transport lifecycle events. Callbacks may arrive on the transport's own I/O task.
pub trait WebSocketListener: Send + Sync {
    fn on_open(&self);
    /// One text frame per received message; the §4.F codec parses it from here.
    fn on_message(&self, text: String);
    /// `None` iff the close was requested via [`WebSocketTransport::close`].
    fn on_close(&self, error: Option<Error>);
}

/// TLS parameters for a `wss://` connection. An absent config means plain `ws://`.
///
/// Bundles all three knobs spec.md §6 lists together ("cert verifier, SNI
/// hostname, trust source"): `client_config` carries the caller's own
/// `rustls::ClientConfig` (its verifier and trust roots) when it needs
/// something other than the default webpki-roots trust store, and
/// `sni_hostname` overrides the name sent in the TLS handshake and the
/// WebSocket `Host` header independently of the address `connect` actually
/// dials — the two can differ when a device is reached by IP but serves a
/// certificate for a DNS name.
#[derive(Clone, Default)]
pub struct TlsConfig {
    /// SNI hostname override; defaults to the connection host when unset.
    pub sni_hostname: Option<String>,
    /// Custom cert verifier / trust source; defaults to webpki-roots when unset.
    pub client_config: Option<Arc<rustls::ClientConfig>>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("sni_hostname", &self.sni_hostname)
            .field("client_config", &self.client_config.is_some())
            .finish()
    }
}

/// A connected (or connecting) OCast WebSocket, per §4.G.
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Message>,
    closing: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// Connects to `wss://host:4433/ocast` when `tls` is `Some`, else `ws://host:4434/ocast`.
    /// Applies a 5 s connect timeout; on success the I/O task is spawned and `onOpen` fires.
    ///
    /// The TCP socket always dials `host`; when `tls.sni_hostname` is set, it
    /// names a different host for the TLS handshake and `Host` header, so the
    /// two can diverge (device reached by IP, certificate issued for a name).
    pub async fn connect(
        host: &str,
        tls: Option<TlsConfig>,
        listener: Arc<dyn WebSocketListener>,
    ) -> Result<Self, Error> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));

        match tls {
            Some(cfg) => {
                let sni_host = cfg.sni_hostname.clone().unwrap_or_else(|| host.to_string());
                let url = format!("wss://{sni_host}:{TLS_PORT}/ocast");
                let connector = cfg.client_config.clone().map(Connector::Rustls);
                let handshake = async {
                    let tcp = TcpStream::connect((host, TLS_PORT))
                        .await
                        .map_err(|e| Error::transport(-3, "TCP connect failed").with_source(e))?;
                    tokio_tungstenite::client_async_tls_with_config(url, tcp, connector)
                        .await
                        .map_err(|e| Error::transport(-3, "WebSocket TLS handshake failed").with_source(e))
                };
                let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, handshake)
                    .await
                    .map_err(|_| Error::transport(-3, "WebSocket connect timed out"))??;

                listener.on_open();
                let task_closing = Arc::clone(&closing);
                tokio::spawn(Self::run(stream, outbound_rx, listener, task_closing));
            }
            None => {
                let url = format!("ws://{host}:{PLAIN_PORT}/ocast");
                let handshake = async {
                    let tcp = TcpStream::connect((host, PLAIN_PORT))
                        .await
                        .map_err(|e| Error::transport(-3, "TCP connect failed").with_source(e))?;
                    tokio_tungstenite::client_async(url, tcp)
                        .await
                        .map_err(|e| Error::transport(-3, "WebSocket handshake failed").with_source(e))
                };
                let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, handshake)
                    .await
                    .map_err(|_| Error::transport(-3, "WebSocket connect timed out"))??;

                listener.on_open();
                let task_closing = Arc::clone(&closing);
                tokio::spawn(Self::run(stream, outbound_rx, listener, task_closing));
            }
        }

        Ok(Self {
            outbound: outbound_tx,
            closing,
        })
    }

    /// Rejects (returns `false`) payloads over 4096 bytes instead of sending them.
    pub fn send(&self, text: String) -> bool {
        if self.closing.load(Ordering::Acquire) {
            return false;
        }
        if text.len() > MAX_OUTBOUND_PAYLOAD {
            return false;
        }
        self.outbound.send(Message::Text(text)).is_ok()
    }

    /// Requests an orderly close (status code 1000). `onClose(None)` follows once the
    /// underlying stream finishes.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Message::Close(Some(
            tokio_tungstenite::tungstenite::protocol::CloseFrame {
                code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                reason: std::borrow::Cow::Borrowed(""),
            },
        )));
    }

    async fn run<S>(
        stream: tokio_tungstenite::WebSocketStream<S>,
        mut outbound_rx: mpsc::UnboundedReceiver<Message>,
        listener: Arc<dyn WebSocketListener>,
        closing: Arc<AtomicBool>,
    ) where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut sink, mut source) = stream.split();
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await;

        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            let is_close = matches!(message, Message::Close(_));
                            if let Err(e) = sink.send(message).await {
                                warn!(error = %e, "WebSocket send failed");
                                closing.store(true, Ordering::Release);
                                listener.on_close(Some(
                                    Error::transport(-3, "WebSocket send failed").with_source(e),
                                ));
                                return;
                            }
                            if is_close {
                                closing.store(true, Ordering::Release);
                                listener.on_close(None);
                                return;
                            }
                        }
                        None => {
                            closing.store(true, Ordering::Release);
                            listener.on_close(None);
                            return;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        closing.store(true, Ordering::Release);
                        listener.on_close(Some(Error::transport(-3, "keepalive ping failed")));
                        return;
                    }
                }
                incoming = source.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            listener.on_message(text);
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            debug!("WebSocket keepalive frame received");
                        }
                        Some(Ok(Message::Close(_))) => {
                            closing.store(true, Ordering::Release);
                            listener.on_close(None);
                            return;
                        }
                        Some(Ok(Message::Binary(_) | Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            closing.store(true, Ordering::Release);
                            listener.on_close(Some(
                                Error::transport(-3, "WebSocket read failed").with_source(e),
                            ));
                            return;
                        }
                        None => {
                            let was_user_close = closing.swap(true, Ordering::AcqRel);
                            listener.on_close(if was_user_close {
                                None
                            } else {
                                Some(Error::transport(-3, "WebSocket stream ended"))
                            });
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingListener {
        messages: std::sync::Mutex<Vec<String>>,
    }

    impl WebSocketListener for RecordingListener {
        fn on_open(&self) {}
        fn on_message(&self, text: String) {
            self.messages.lock().unwrap().push(text);
        }
        fn on_close(&self, _error: Option<Error>) {}
    }

    #[test]
    fn oversized_payload_is_rejected_without_reaching_the_socket() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = WebSocketTransport {
            outbound: tx,
            closing: Arc::new(AtomicBool::new(false)),
        };
        let oversized = "x".repeat(MAX_OUTBOUND_PAYLOAD + 1);
        assert!(!transport.send(oversized));
    }

    #[test]
    fn payload_at_the_limit_is_accepted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = WebSocketTransport {
            outbound: tx,
            closing: Arc::new(AtomicBool::new(false)),
        };
        let exact = "x".repeat(MAX_OUTBOUND_PAYLOAD);
        assert!(transport.send(exact));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn send_after_close_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(true));
        let transport = WebSocketTransport {
            outbound: tx,
            closing,
        };
        assert!(!transport.send("hello".to_string()));
    }

    #[test]
    fn listener_records_delivered_messages() {
        let listener = RecordingListener {
            messages: std::sync::Mutex::new(Vec::new()),
        };
        listener.on_message("{\"hello\":true}".to_string());
        assert_eq!(listener.messages.lock().unwrap().len(), 1);
    }
}
