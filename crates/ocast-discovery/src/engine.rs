//! Discovery engine: periodic probes, dedup, hydration, and ageing (§4.C).

use crate::ssdp::{MSearchRequest, MSearchResponse};
use crate::udp_socket::{UdpSocket, UdpSocketListener};
use ocast_core::{Device, Error};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const SSDP_PORT: u16 = 1900;
const MIN_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MX: u32 = 3;

/// Receives batched device-added/-removed events and the terminal discovery-stopped event.
pub trait DiscoveryListener: Send + Sync {
    /// Never called with an empty list.
    fn on_devices_added(&self, devices: Vec<Device>);
    /// Never called with an empty list.
    fn on_devices_removed(&self, uuids: Vec<String>);
    /// `None` iff `stop`/`pause` was requested by the caller.
    fn on_discovery_stopped(&self, error: Option<Error>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Stopped,
    Paused,
    Running,
}

/// Tuning knobs, per spec.md §6 "Configuration".
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Clamped to a minimum of 5 s.
    pub interval: Duration,
    /// `MX` seconds advertised in the M-SEARCH request and used to derive the ageing delay.
    pub mx: u32,
    pub search_targets: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            mx: DEFAULT_MX,
            search_targets: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    fn clamped_interval(&self) -> Duration {
        self.interval.max(MIN_INTERVAL)
    }
}

struct DeviceRecord {
    device: Device,
    last_seen: Instant,
}

enum SocketEvent {
    Data(Vec<u8>, SocketAddr),
    Closed(Option<Error>),
}

struct ChannelListener {
    tx: mpsc::UnboundedSender<SocketEvent>,
}

impl UdpSocketListener for ChannelListener {
    fn on_data_received(&self, data: Vec<u8>, remote: SocketAddr) {
        let _ = self.tx.send(SocketEvent::Data(data, remote));
    }
    fn on_closed(&self, error: Option<Error>) {
        let _ = self.tx.send(SocketEvent::Closed(error));
    }
}

struct Shared {
    state: AsyncMutex<EngineState>,
    config: AsyncMutex<DiscoveryConfig>,
    devices: AsyncMutex<HashMap<String, DeviceRecord>>,
    socket: AsyncMutex<Option<Arc<UdpSocket>>>,
    probe_task: AsyncMutex<Option<JoinHandle<()>>>,
    aging_task: AsyncMutex<Option<JoinHandle<()>>>,
    socket_event_task: AsyncMutex<Option<JoinHandle<()>>>,
    user_requested_stop: AtomicBool,
    listener: Arc<dyn DiscoveryListener>,
}

/// The §4.C state machine over {Stopped, Paused, Running}.
pub struct DiscoveryEngine {
    shared: Arc<Shared>,
}

impl DiscoveryEngine {
    pub fn new(listener: Arc<dyn DiscoveryListener>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AsyncMutex::new(EngineState::Stopped),
                config: AsyncMutex::new(DiscoveryConfig::default()),
                devices: AsyncMutex::new(HashMap::new()),
                socket: AsyncMutex::new(None),
                probe_task: AsyncMutex::new(None),
                aging_task: AsyncMutex::new(None),
                socket_event_task: AsyncMutex::new(None),
                user_requested_stop: AtomicBool::new(false),
                listener,
            }),
        }
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.shared
            .devices
            .lock()
            .await
            .values()
            .map(|r| r.device.clone())
            .collect()
    }

    pub async fn configure(&self, config: DiscoveryConfig) {
        *self.shared.config.lock().await = config;
    }

    /// Stopped/Paused → Running. Returns `false` (and remains Stopped) if the socket can't be opened.
    pub async fn resume(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        if *state == EngineState::Running {
            return true;
        }
        let was_stopped = *state == EngineState::Stopped;

        let (tx, rx) = mpsc::unbounded_channel();
        let socket = match UdpSocket::open(0, Arc::new(ChannelListener { tx })) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                warn!(error = %e, "failed to open discovery socket");
                return false;
            }
        };
        if let Err(e) = socket.join_multicast_v4(SSDP_MULTICAST_ADDR) {
            warn!(error = %e, "failed to join SSDP multicast group");
            return false;
        }
        let _ = socket.set_multicast_ttl_v4(2);

        if was_stopped {
            self.shared.devices.lock().await.clear();
        }
        *self.shared.socket.lock().await = Some(Arc::clone(&socket));
        self.shared.user_requested_stop.store(false, Ordering::Release);
        *state = EngineState::Running;
        drop(state);

        let event_shared = Arc::clone(&self.shared);
        let event_handle = tokio::spawn(Self::run_socket_events(event_shared, rx));
        *self.shared.socket_event_task.lock().await = Some(event_handle);

        self.restart_probe_timer().await;
        true
    }

    /// Running → Paused. Cancels timers and closes the socket; the device set survives.
    pub async fn pause(&self) -> bool {
        let mut state = self.shared.state.lock().await;
        if *state != EngineState::Running {
            return false;
        }
        self.shared.user_requested_stop.store(true, Ordering::Release);
        self.cancel_timers().await;
        self.close_socket().await;
        *state = EngineState::Paused;
        true
    }

    /// Running/Paused → Stopped. Clears the device set, then emits removed/stopped in order.
    pub async fn stop(&self) {
        self.transition_to_stopped(None).await;
    }

    async fn transition_to_stopped(&self, error: Option<Error>) {
        let mut state = self.shared.state.lock().await;
        if *state == EngineState::Stopped {
            return;
        }
        if error.is_none() {
            self.shared.user_requested_stop.store(true, Ordering::Release);
        }
        self.cancel_timers().await;
        self.close_socket().await;

        let removed_uuids: Vec<String> = {
            let mut devices = self.shared.devices.lock().await;
            devices.drain().map(|(uuid, _)| uuid).collect()
        };
        *state = EngineState::Stopped;
        drop(state);

        if !removed_uuids.is_empty() {
            self.shared.listener.on_devices_removed(removed_uuids);
        }
        self.shared.listener.on_discovery_stopped(error);
    }

    pub async fn set_search_targets(&self, targets: Vec<String>) {
        self.shared.config.lock().await.search_targets = targets;
        if *self.shared.state.lock().await == EngineState::Running {
            self.probe_once().await;
        }
    }

    pub async fn set_interval(&self, interval: Duration) {
        self.shared.config.lock().await.interval = interval;
        if *self.shared.state.lock().await == EngineState::Running {
            self.restart_probe_timer().await;
        }
    }

    async fn cancel_timers(&self) {
        if let Some(handle) = self.shared.probe_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.shared.aging_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.shared.socket_event_task.lock().await.take() {
            handle.abort();
        }
    }

    async fn close_socket(&self) {
        if let Some(socket) = self.shared.socket.lock().await.take() {
            socket.close();
        }
    }

    async fn restart_probe_timer(&self) {
        if let Some(handle) = self.shared.probe_task.lock().await.take() {
            handle.abort();
        }
        let interval = self.shared.config.lock().await.clamped_interval();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                Self::probe(&shared).await;
            }
        });
        *self.shared.probe_task.lock().await = Some(handle);
    }

    async fn probe_once(&self) {
        Self::probe(&self.shared).await;
    }

    async fn probe(shared: &Arc<Shared>) {
        let (targets, mx) = {
            let config = shared.config.lock().await;
            (config.search_targets.clone(), config.mx)
        };
        let socket = shared.socket.lock().await.clone();
        let Some(socket) = socket else { return };

        let tick_time = Instant::now();
        let host = format!("{SSDP_MULTICAST_ADDR}:{SSDP_PORT}");
        for target in &targets {
            let request = MSearchRequest::new(host.as_str(), target.clone(), Some(mx));
            let payload = request.encode();
            for _ in 0..2 {
                if let Err(e) = socket.send(payload.as_bytes(), &SSDP_MULTICAST_ADDR.to_string(), SSDP_PORT) {
                    warn!(error = %e, target, "failed to send M-SEARCH");
                }
            }
        }

        if let Some(handle) = shared.aging_task.lock().await.take() {
            handle.abort();
        }
        let delay = Duration::from_secs(u64::from(mx) + 1);
        let aging_shared = Arc::clone(shared);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::age_devices(&aging_shared, tick_time).await;
        });
        *shared.aging_task.lock().await = Some(handle);
    }

    async fn age_devices(shared: &Arc<Shared>, tick_time: Instant) {
        let removed: Vec<String> = {
            let mut devices = shared.devices.lock().await;
            let stale: Vec<String> = devices
                .iter()
                .filter(|(_, record)| record.last_seen < tick_time)
                .map(|(uuid, _)| uuid.clone())
                .collect();
            for uuid in &stale {
                devices.remove(uuid);
            }
            stale
        };
        if !removed.is_empty() {
            debug!(count = removed.len(), "ageing out stale devices");
            shared.listener.on_devices_removed(removed);
        }
    }

    async fn run_socket_events(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<SocketEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                SocketEvent::Data(data, remote) => {
                    Self::handle_datagram(&shared, &data, remote).await;
                }
                SocketEvent::Closed(error) => {
                    if let Some(err) = error {
                        warn!(error = %err, "discovery socket closed unexpectedly");
                        let engine = DiscoveryEngine {
                            shared: Arc::clone(&shared),
                        };
                        engine.transition_to_stopped(Some(err)).await;
                    }
                    return;
                }
            }
        }
    }

    async fn handle_datagram(shared: &Arc<Shared>, data: &[u8], _remote: SocketAddr) {
        let Ok(text) = std::str::from_utf8(data) else {
            return;
        };
        let Some(response) = MSearchResponse::parse(text) else {
            return;
        };
        let Some(uuid) = response.uuid() else {
            return;
        };

        let already_known = {
            let mut devices = shared.devices.lock().await;
            if let Some(record) = devices.get_mut(&uuid) {
                record.last_seen = Instant::now();
                true
            } else {
                false
            }
        };
        if already_known {
            return;
        }

        let location = response.location.clone();
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            match ocast_dial::fetch_description(&location).await {
                Ok(device) => {
                    let inserted = {
                        let mut devices = shared.devices.lock().await;
                        if devices.contains_key(&device.uuid) {
                            false
                        } else {
                            devices.insert(
                                device.uuid.clone(),
                                DeviceRecord {
                                    device: device.clone(),
                                    last_seen: Instant::now(),
                                },
                            );
                            true
                        }
                    };
                    if inserted {
                        info!(uuid = %device.uuid, name = %device.friendly_name, "device added");
                        shared.listener.on_devices_added(vec![device]);
                    }
                }
                Err(e) => {
                    debug!(location, error = %e, "dropping candidate: description fetch failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingListener {
        added: StdMutex<Vec<Vec<Device>>>,
        removed: StdMutex<Vec<Vec<String>>>,
        stopped: StdMutex<Vec<Option<String>>>,
    }

    impl DiscoveryListener for RecordingListener {
        fn on_devices_added(&self, devices: Vec<Device>) {
            self.added.lock().unwrap().push(devices);
        }
        fn on_devices_removed(&self, uuids: Vec<String>) {
            self.removed.lock().unwrap().push(uuids);
        }
        fn on_discovery_stopped(&self, error: Option<Error>) {
            self.stopped.lock().unwrap().push(error.map(|e| e.to_string()));
        }
    }

    #[test]
    fn interval_is_clamped_to_minimum() {
        let config = DiscoveryConfig {
            interval: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(config.clamped_interval(), MIN_INTERVAL);
    }

    #[test]
    fn default_interval_is_thirty_seconds() {
        assert_eq!(DiscoveryConfig::default().interval, DEFAULT_INTERVAL);
    }

    #[tokio::test]
    async fn stopping_an_already_stopped_engine_is_a_no_op() {
        let listener = Arc::new(RecordingListener::default());
        let engine = DiscoveryEngine::new(listener.clone());
        engine.stop().await;
        assert!(listener.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_then_stop_with_no_responses_emits_no_added_events() {
        let listener = Arc::new(RecordingListener::default());
        let engine = DiscoveryEngine::new(listener.clone());
        engine
            .configure(DiscoveryConfig {
                interval: Duration::from_secs(5),
                mx: 1,
                search_targets: vec!["urn:cast-ocast-org:service:cast:1".to_string()],
            })
            .await;
        assert!(engine.resume().await);
        engine.stop().await;

        assert!(listener.added.lock().unwrap().is_empty());
        assert_eq!(listener.stopped.lock().unwrap().len(), 1);
        assert_eq!(listener.stopped.lock().unwrap()[0], None);
    }
}
