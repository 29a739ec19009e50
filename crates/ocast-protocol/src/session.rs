//! Per-device session state machine (§4.H): connect/disconnect, pending
//! replies, sequence numbering, command flow, application lifecycle, and
//! event dispatch.

use crate::codec::{self, ApplicationLayer, RoutingDomain};
use crate::dispatch;
use crate::errors::{self, Status};
use crate::events::{self, ConnectionStatus, Event};
use ocast_core::Error;
use ocast_dial::DialClient;
use ocast_transport::{TlsConfig, WebSocketListener, WebSocketTransport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MAX_SEQUENCE_ID: i64 = i64::MAX;
const APP_READY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Notified of events and of an unsolicited disconnection, per §4.H/§4.I.
/// Both callbacks are invoked through the session's configured dispatcher
/// (see [`SessionConfig::dispatcher`]), not called directly on whatever
/// task happened to be processing the inbound frame.
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: Event);
    /// Fires only when the disconnection was not requested via [`DeviceSession::disconnect`].
    fn on_unsolicited_disconnect(&self, error: Error);
}

/// Bundled session configuration (§6 "Configuration"): the TLS knob, the
/// desired receiver application name, and the callback-dispatch indirection
/// every externally visible success/failure continuation is routed through
/// (§4.I). `application_name` seeds the session the same way a later
/// [`DeviceSession::set_application_name`] call would.
pub struct SessionConfig {
    pub tls: Option<TlsConfig>,
    pub application_name: Option<String>,
    pub dispatcher: Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tls: None,
            application_name: None,
            dispatcher: dispatch::identity_dispatcher(),
        }
    }
}

struct PendingEntry {
    complete: oneshot::Sender<Result<Value, Error>>,
}

enum TransportEvent {
    Open,
    Message(String),
    Closed(Option<Error>),
}

struct ChannelListener {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl WebSocketListener for ChannelListener {
    fn on_open(&self) {
        let _ = self.tx.send(TransportEvent::Open);
    }
    fn on_message(&self, text: String) {
        let _ = self.tx.send(TransportEvent::Message(text));
    }
    fn on_close(&self, error: Option<Error>) {
        let _ = self.tx.send(TransportEvent::Closed(error));
    }
}

struct ReadyLatch {
    complete: oneshot::Sender<Result<(), Error>>,
}

struct Shared {
    state: Mutex<SessionState>,
    pending: Mutex<HashMap<i64, PendingEntry>>,
    sequence: AtomicI64,
    transport: Mutex<Option<Arc<WebSocketTransport>>>,
    transport_task: Mutex<Option<JoinHandle<()>>>,
    application_name: Mutex<Option<String>>,
    application_running: AtomicBool,
    ready_latch: Mutex<Option<ReadyLatch>>,
    client_uuid: String,
    dial_base_url: String,
    tls: Option<TlsConfig>,
    user_disconnect_requested: AtomicBool,
    listener: Arc<dyn SessionListener>,
    dispatcher: Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>,
}

impl Shared {
    /// Routes `f` through the configured dispatcher (§4.I) instead of running
    /// it inline on whatever task happens to be processing the frame.
    fn dispatch(&self, f: impl FnOnce() + Send + 'static) {
        (self.dispatcher)(Box::new(f));
    }
}

/// The §4.H per-device session: one WebSocket connection plus the DIAL-driven
/// application lifecycle layered on top of it.
pub struct DeviceSession {
    shared: Arc<Shared>,
}

impl DeviceSession {
    pub fn new(
        client_uuid: String,
        dial_base_url: String,
        listener: Arc<dyn SessionListener>,
        config: SessionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Disconnected),
                pending: Mutex::new(HashMap::new()),
                sequence: AtomicI64::new(1),
                transport: Mutex::new(None),
                transport_task: Mutex::new(None),
                application_name: Mutex::new(config.application_name),
                application_running: AtomicBool::new(false),
                ready_latch: Mutex::new(None),
                client_uuid,
                dial_base_url,
                tls: config.tls,
                user_disconnect_requested: AtomicBool::new(false),
                listener,
                dispatcher: config.dispatcher,
            }),
        }
    }

    /// Generates the 16-char textual client UUID a session carries per §3
    /// "Session", instead of requiring the caller to supply one.
    pub fn with_generated_uuid(
        dial_base_url: String,
        listener: Arc<dyn SessionListener>,
        config: SessionConfig,
    ) -> Self {
        let generated = uuid::Uuid::new_v4().simple().to_string();
        Self::new(generated[..16].to_string(), dial_base_url, listener, config)
    }

    pub async fn set_application_name(&self, name: Option<String>) {
        let mut current = self.shared.application_name.lock().await;
        let changed = *current != name;
        *current = name;
        drop(current);
        if changed {
            self.shared.application_running.store(false, Ordering::Release);
            if let Some(latch) = self.shared.ready_latch.lock().await.take() {
                let shared = Arc::clone(&self.shared);
                shared.dispatch(move || {
                    let _ = latch
                        .complete
                        .send(Err(Error::state(-2, "application name changed")));
                });
            }
        }
    }

    /// Disconnected → Connecting → Connected. Rejects with a "busy" error
    /// from any other state.
    pub async fn connect(&self, ws_host: &str) -> Result<(), Error> {
        {
            let mut state = self.shared.state.lock().await;
            if *state != SessionState::Disconnected {
                return Err(Error::state(-2, "session is busy"));
            }
            *state = SessionState::Connecting;
        }
        self.shared.user_disconnect_requested.store(false, Ordering::Release);

        let (tx, rx) = mpsc::unbounded_channel();
        let tls = self.shared.tls.clone();
        let transport = match WebSocketTransport::connect(ws_host, tls, Arc::new(ChannelListener { tx })).await {
            Ok(t) => t,
            Err(e) => {
                *self.shared.state.lock().await = SessionState::Disconnected;
                return Err(e);
            }
        };
        *self.shared.transport.lock().await = Some(Arc::new(transport));

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(Self::run_transport_events(shared, rx));
        *self.shared.transport_task.lock().await = Some(handle);

        *self.shared.state.lock().await = SessionState::Connected;
        Ok(())
    }

    /// Connected → Disconnecting → Disconnected, via an orderly WebSocket close.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let mut state = self.shared.state.lock().await;
        if *state != SessionState::Connected {
            return Err(Error::state(-2, "session is not connected"));
        }
        self.shared.user_disconnect_requested.store(true, Ordering::Release);
        *state = SessionState::Disconnecting;
        drop(state);

        if let Some(transport) = self.shared.transport.lock().await.as_ref() {
            transport.close();
        }
        Ok(())
    }

    async fn run_transport_events(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Open => {}
                TransportEvent::Message(text) => Self::handle_frame(&shared, &text).await,
                TransportEvent::Closed(error) => {
                    Self::handle_disconnection(&shared, error).await;
                    return;
                }
            }
        }
    }

    async fn handle_disconnection(shared: &Arc<Shared>, error: Option<Error>) {
        *shared.state.lock().await = SessionState::Disconnected;
        *shared.transport.lock().await = None;

        let failed: Vec<PendingEntry> = {
            let mut pending = shared.pending.lock().await;
            pending.drain().map(|(_, entry)| entry).collect()
        };
        let socket_error = error
            .as_ref()
            .map(|e| Error::new(e.kind, e.code, e.message.clone()))
            .unwrap_or_else(|| Error::transport(errors::DEVICE_LAYER, "socket disconnected"));
        for entry in failed {
            shared.dispatch(move || {
                let _ = entry.complete.send(Err(Error::transport(
                    errors::DEVICE_LAYER,
                    "socket disconnected",
                )));
            });
        }

        if let Some(latch) = shared.ready_latch.lock().await.take() {
            shared.dispatch(move || {
                let _ = latch
                    .complete
                    .send(Err(Error::transport(errors::DEVICE_LAYER, "socket disconnected")));
            });
        }

        let user_requested = shared.user_disconnect_requested.swap(false, Ordering::AcqRel);
        if !user_requested {
            warn!(error = %socket_error, "session disconnected without user request");
            let listener = Arc::clone(&shared.listener);
            shared.dispatch(move || listener.on_unsolicited_disconnect(socket_error));
        }
    }

    async fn handle_frame(shared: &Arc<Shared>, text: &str) {
        let frame = match codec::decode_frame(text) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "dropping unparseable frame");
                return;
            }
        };

        match frame.message_type {
            codec::MessageType::Reply => {
                Self::handle_reply(shared, frame.id, frame.status, frame.message).await;
            }
            codec::MessageType::Event => {
                Self::handle_event(shared, frame.message).await;
            }
            codec::MessageType::Command => {
                debug!("dropping inbound command frame (not valid from a device)");
            }
        }
    }

    async fn handle_reply(shared: &Arc<Shared>, id: i64, status: Option<Status>, message: ApplicationLayer) {
        let entry = { shared.pending.lock().await.remove(&id) };
        let Some(entry) = entry else {
            debug!(id, "dropping orphan reply");
            return;
        };

        let status = match status {
            Some(Status::Ok) => Status::Ok,
            Some(other) => {
                shared.dispatch(move || {
                    let _ = entry.complete.send(Err(other.as_device_layer_error()));
                });
                return;
            }
            None => {
                shared.dispatch(move || {
                    let _ = entry
                        .complete
                        .send(Err(Error::protocol(errors::DEVICE_LAYER, "reply missing status")));
                });
                return;
            }
        };
        debug_assert_eq!(status, Status::Ok);

        let params = message.data.params;
        // A nested params.code equal to SUCCESS is required before the payload is
        // handed to the caller; a missing code can't be verified as SUCCESS.
        match params.get("code").and_then(Value::as_i64) {
            Some(code) if code == i64::from(errors::SUCCESS) => {
                shared.dispatch(move || {
                    let _ = entry.complete.send(Ok(params));
                });
            }
            Some(code) => {
                shared.dispatch(move || {
                    let _ = entry.complete.send(Err(errors::code_to_error(code as i32)));
                });
            }
            None => {
                shared.dispatch(move || {
                    let _ = entry.complete.send(Err(errors::code_to_error(errors::UNKNOWN)));
                });
            }
        }
    }

    async fn handle_event(shared: &Arc<Shared>, message: ApplicationLayer) {
        let event = events::dispatch(&message.service, &message.data.name, &message.data.params);

        if let Event::WebAppConnectedStatus(ref status_event) = event {
            match status_event.status {
                ConnectionStatus::Connected => {
                    shared.application_running.store(true, Ordering::Release);
                    if let Some(latch) = shared.ready_latch.lock().await.take() {
                        shared.dispatch(move || {
                            let _ = latch.complete.send(Ok(()));
                        });
                    }
                }
                ConnectionStatus::Disconnected => {
                    shared.application_running.store(false, Ordering::Release);
                }
            }
        }

        let listener = Arc::clone(&shared.listener);
        shared.dispatch(move || listener.on_event(event));
    }

    fn next_sequence_id(shared: &Shared) -> i64 {
        loop {
            let current = shared.sequence.load(Ordering::Relaxed);
            let next = if current >= MAX_SEQUENCE_ID { 1 } else { current + 1 };
            if shared
                .sequence
                .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return current;
            }
        }
    }

    /// Sends a command and awaits its typed reply. Use `serde_json::Value`
    /// as `T` for commands whose reply has no payload to decode (§4.H
    /// "if the expected type is 'none', skip decoding" — decoding into
    /// `Value` always succeeds).
    pub async fn send_command<T: DeserializeOwned + Send + 'static>(
        &self,
        domain: RoutingDomain,
        service: &str,
        name: &str,
        params: Value,
        options: Option<Value>,
    ) -> Result<T, Error> {
        if *self.shared.state.lock().await != SessionState::Connected {
            return Err(Error::state(-2, "session is not connected"));
        }

        if domain == RoutingDomain::Browser {
            let running = self.shared.application_running.load(Ordering::Acquire);
            if !running {
                let name = self.shared.application_name.lock().await.clone();
                let Some(name) = name else {
                    return Err(Error::state(-2, "application name not defined"));
                };
                self.start_application(&name).await?;
            }
        }

        let id = Self::next_sequence_id(&self.shared);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, PendingEntry { complete: tx });

        let encoded = match codec::encode_command(&self.shared.client_uuid, domain, id, service, name, params, options) {
            Ok(e) => e,
            Err(e) => {
                self.shared.pending.lock().await.remove(&id);
                return Err(e);
            }
        };

        let transport = self.shared.transport.lock().await.clone();
        let sent = match transport {
            Some(transport) => transport.send(encoded),
            None => false,
        };
        if !sent {
            self.shared.pending.lock().await.remove(&id);
            return Err(Error::transport(errors::CLIENT, "unable to send command"));
        }

        match rx.await {
            Ok(Ok(params)) => codec::decode_params(&params),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::transport(errors::DEVICE_LAYER, "socket disconnected")),
        }
    }

    /// `startApplication`, per §4.H "Application lifecycle".
    pub async fn start_application(&self, name: &str) -> Result<(), Error> {
        {
            let configured = self.shared.application_name.lock().await.clone();
            if configured.as_deref() != Some(name) {
                return Err(Error::state(-2, "application name not defined"));
            }
        }

        match *self.shared.state.lock().await {
            SessionState::Connecting | SessionState::Disconnecting | SessionState::Disconnected => {
                return Err(Error::state(-2, "session is not connected"));
            }
            SessionState::Connected => {}
        }

        let dial = DialClient::new(self.shared.dial_base_url.clone())?;
        let application = dial.get(name).await?;
        if matches!(application.state, ocast_core::ApplicationState::Running) {
            self.shared.application_running.store(true, Ordering::Release);
            return Ok(());
        }

        dial.start(name).await?;

        let (tx, rx) = oneshot::channel();
        *self.shared.ready_latch.lock().await = Some(ReadyLatch {
            complete: tx,
        });

        match tokio::time::timeout(APP_READY_TIMEOUT, rx).await {
            Ok(Ok(Ok(()))) => {
                info!(application = name, "web application connected");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::state(-2, "web application connected event not received")),
            Err(_) => {
                self.shared.ready_latch.lock().await.take();
                Err(Error::state(-2, "web application connected event not received"))
            }
        }
    }

    /// `stopApplication`, per §4.H.
    pub async fn stop_application(&self, name: &str) -> Result<(), Error> {
        let dial = DialClient::new(self.shared.dial_base_url.clone())?;
        dial.stop(name).await?;
        self.shared.application_running.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_application_running(&self) -> bool {
        self.shared.application_running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingListener {
        disconnects: StdMutex<Vec<String>>,
    }

    impl SessionListener for RecordingListener {
        fn on_event(&self, _event: Event) {}
        fn on_unsolicited_disconnect(&self, error: Error) {
            self.disconnects.lock().unwrap().push(error.to_string());
        }
    }

    fn new_session() -> (DeviceSession, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let session = DeviceSession::new(
            "client-uuid".to_string(),
            "http://127.0.0.1:8008/apps".to_string(),
            listener.clone(),
            SessionConfig::default(),
        );
        (session, listener)
    }

    fn bare_shared(listener: Arc<dyn SessionListener>) -> Arc<Shared> {
        Arc::new(Shared {
            state: Mutex::new(SessionState::Connected),
            pending: Mutex::new(HashMap::new()),
            sequence: AtomicI64::new(1),
            transport: Mutex::new(None),
            transport_task: Mutex::new(None),
            application_name: Mutex::new(None),
            application_running: AtomicBool::new(false),
            ready_latch: Mutex::new(None),
            client_uuid: "c".to_string(),
            dial_base_url: "http://x".to_string(),
            tls: None,
            user_disconnect_requested: AtomicBool::new(false),
            listener,
            dispatcher: dispatch::identity_dispatcher(),
        })
    }

    #[tokio::test]
    async fn sending_a_command_while_disconnected_fails_with_state_error() {
        let (session, _listener) = new_session();
        let result = session
            .send_command::<Value>(RoutingDomain::Settings, "org.ocast.settings.device", "getUpdateStatus", Value::Null, None)
            .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ocast_core::ErrorKind::State);
    }

    #[tokio::test]
    async fn disconnecting_while_disconnected_is_rejected() {
        let (session, _listener) = new_session();
        let result = session.disconnect().await;
        assert!(result.is_err());
    }

    #[test]
    fn sequence_id_wraps_from_max_to_one() {
        let shared = bare_shared(Arc::new(RecordingListener::default()));
        shared.sequence.store(MAX_SEQUENCE_ID, Ordering::Relaxed);
        assert_eq!(DeviceSession::next_sequence_id(&shared), MAX_SEQUENCE_ID);
        assert_eq!(DeviceSession::next_sequence_id(&shared), 1);
    }

    /// §8 scenario 4: a reply whose params don't match the caller's expected
    /// type must surface as a client error, not a success, and the pending
    /// entry is still removed exactly once.
    #[tokio::test]
    async fn reply_with_mismatched_payload_type_fails_as_client_error() {
        let shared = bare_shared(Arc::new(RecordingListener::default()));
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().await.insert(7, PendingEntry { complete: tx });

        let message = ApplicationLayer {
            service: "org.ocast.media".to_string(),
            data: codec::DataLayer {
                name: "prepare".to_string(),
                params: serde_json::json!({ "code": 0, "unexpected": "shape" }),
                options: None,
            },
        };
        DeviceSession::handle_reply(&shared, 7, Some(Status::Ok), message).await;

        assert!(shared.pending.lock().await.is_empty());
        let params = rx.await.unwrap().expect("status ok + code SUCCESS completes with the raw params");

        #[derive(serde::Deserialize)]
        #[allow(dead_code)]
        struct Expected {
            must_have_field: String,
        }
        let decoded: Result<Expected, Error> = codec::decode_params(&params);
        let err = decoded.unwrap_err();
        assert_eq!(err.kind, ocast_core::ErrorKind::Protocol);
        assert_eq!(err.code, errors::CLIENT);
    }

    /// A reply whose `params` carries no `code` field at all cannot be
    /// verified as SUCCESS and must fail, not silently succeed.
    #[tokio::test]
    async fn reply_missing_code_field_fails_as_unknown_instead_of_succeeding() {
        let shared = bare_shared(Arc::new(RecordingListener::default()));
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().await.insert(1, PendingEntry { complete: tx });

        let message = ApplicationLayer {
            service: "org.ocast.media".to_string(),
            data: codec::DataLayer {
                name: "prepare".to_string(),
                params: serde_json::json!({ "noCodeHere": true }),
                options: None,
            },
        };
        DeviceSession::handle_reply(&shared, 1, Some(Status::Ok), message).await;

        let result = rx.await.unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.code, errors::UNKNOWN);
    }

    /// §8 scenario 5: disconnection while three commands are in flight fails
    /// each pending entry with a device-layer "socket disconnected" error and
    /// then notifies the session listener exactly once, after which a new
    /// command fails immediately with a state error.
    #[tokio::test]
    async fn disconnection_fails_all_pending_commands_then_notifies_listener_once() {
        let listener = Arc::new(RecordingListener::default());
        let shared = bare_shared(listener.clone());

        let mut receivers = Vec::new();
        {
            let mut pending = shared.pending.lock().await;
            for id in 1..=3 {
                let (tx, rx) = oneshot::channel();
                pending.insert(id, PendingEntry { complete: tx });
                receivers.push(rx);
            }
        }

        DeviceSession::handle_disconnection(&shared, Some(Error::transport(-3, "network error"))).await;

        assert!(shared.pending.lock().await.is_empty());
        for rx in receivers {
            let err = rx.await.unwrap().unwrap_err();
            assert_eq!(err.kind, ocast_core::ErrorKind::Transport);
            assert_eq!(err.code, errors::DEVICE_LAYER);
        }

        let disconnects = listener.disconnects.lock().unwrap();
        assert_eq!(disconnects.len(), 1);
        assert!(disconnects[0].contains("network error"));
        drop(disconnects);

        let session = DeviceSession { shared };
        let result = session
            .send_command::<Value>(RoutingDomain::Settings, "org.ocast.settings.device", "getUpdateStatus", Value::Null, None)
            .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ocast_core::ErrorKind::State);
    }

    /// §8 scenario 2: `start_application` starts the receiver app via DIAL
    /// and completes once the WebAppConnectedStatus CONNECTED event arrives,
    /// without waiting for the full 60 s timeout.
    #[tokio::test]
    async fn start_application_completes_when_connected_event_arrives() {
        let shared = bare_shared(Arc::new(RecordingListener::default()));
        *shared.application_name.lock().await = Some("MyReceiver".to_string());

        let (tx, rx) = oneshot::channel();
        *shared.ready_latch.lock().await = Some(ReadyLatch { complete: tx });
        assert!(!shared.application_running.load(Ordering::Acquire));

        let message = ApplicationLayer {
            service: "org.ocast.webapp".to_string(),
            data: codec::DataLayer {
                name: "connectedStatus".to_string(),
                params: serde_json::json!({ "status": "connected" }),
                options: None,
            },
        };
        DeviceSession::handle_event(&shared, message).await;

        assert!(shared.application_running.load(Ordering::Acquire));
        assert!(shared.ready_latch.lock().await.is_none());
        assert!(rx.await.unwrap().is_ok());
    }
}
