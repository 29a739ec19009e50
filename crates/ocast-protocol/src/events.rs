//! Event dispatch by service name (§4.H "Event handling").

use ocast_core::Error;
use serde::Deserialize;
use serde_json::Value;

const SERVICE_WEBAPP: &str = "org.ocast.webapp";
const SERVICE_MEDIA: &str = "org.ocast.media";
const SERVICE_SETTINGS_DEVICE: &str = "org.ocast.settings.device";

/// `org.ocast.webapp` connection status, per §4.H.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebAppConnectedStatusEvent {
    pub status: ConnectionStatus,
}

/// `0`=unknown, `1`=idle, `2`=playing, `3`=paused, `4`=buffering — matches
/// §8 scenario 3 (`state: 2` decodes to `Playing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    Unknown = 0,
    Idle = 1,
    Playing = 2,
    Paused = 3,
    Buffering = 4,
}

impl PlaybackState {
    fn from_code(code: u8) -> Result<Self, Error> {
        match code {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Idle),
            2 => Ok(Self::Playing),
            3 => Ok(Self::Paused),
            4 => Ok(Self::Buffering),
            other => Err(Error::protocol(
                crate::errors::CLIENT,
                format!("unrecognized playback state {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatusEvent {
    pub code: i32,
    pub position: f64,
    pub duration: f64,
    pub state: PlaybackState,
    pub volume: f64,
    pub muted: bool,
}

impl PlaybackStatusEvent {
    fn from_params(params: &Value) -> Result<Self, Error> {
        let code = params
            .get("code")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::protocol(crate::errors::CLIENT, "playbackStatus missing code"))?
            as i32;
        let position = params.get("position").and_then(Value::as_f64).unwrap_or(0.0);
        let duration = params.get("duration").and_then(Value::as_f64).unwrap_or(0.0);
        let raw_state = params
            .get("state")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::protocol(crate::errors::CLIENT, "playbackStatus missing state"))?;
        let state = PlaybackState::from_code(raw_state as u8)?;
        let volume = params.get("volume").and_then(Value::as_f64).unwrap_or(0.0);
        let muted = params.get("mute").and_then(Value::as_bool).unwrap_or(false);
        Ok(Self {
            code,
            position,
            duration,
            state,
            volume,
            muted,
        })
    }
}

/// `org.ocast.media` `metadataChanged` carries a service-defined shape; kept
/// as a raw object, matching §9's sum-type-with-custom-fallback approach.
#[derive(Debug, Clone)]
pub struct MetadataChangedEvent {
    pub params: Value,
}

/// `org.ocast.settings.device` `updateStatus`.
#[derive(Debug, Clone)]
pub struct UpdateStatusEvent {
    pub params: Value,
}

#[derive(Debug, Clone)]
pub struct CustomEvent {
    pub service: String,
    pub name: String,
    pub params: Value,
}

/// One variant per known service/name, plus a `Custom` fallback holding the
/// raw object (§9 "Raw JSON pass-through").
#[derive(Debug, Clone)]
pub enum Event {
    WebAppConnectedStatus(WebAppConnectedStatusEvent),
    PlaybackStatus(PlaybackStatusEvent),
    MetadataChanged(MetadataChangedEvent),
    UpdateStatus(UpdateStatusEvent),
    Custom(CustomEvent),
}

/// Dispatches an incoming event frame's `(service, name, params)` into a
/// typed [`Event`]. Decode failures for a recognized service/name fall back
/// to [`Event::Custom`] rather than dropping the event outright.
pub fn dispatch(service: &str, name: &str, params: &Value) -> Event {
    match (service, name) {
        (SERVICE_WEBAPP, "connectedStatus") => {
            match serde_json::from_value::<WebAppConnectedStatusEvent>(params.clone()) {
                Ok(event) => Event::WebAppConnectedStatus(event),
                Err(_) => Event::Custom(CustomEvent {
                    service: service.to_string(),
                    name: name.to_string(),
                    params: params.clone(),
                }),
            }
        }
        (SERVICE_MEDIA, "playbackStatus") => match PlaybackStatusEvent::from_params(params) {
            Ok(event) => Event::PlaybackStatus(event),
            Err(_) => Event::Custom(CustomEvent {
                service: service.to_string(),
                name: name.to_string(),
                params: params.clone(),
            }),
        },
        (SERVICE_MEDIA, "metadataChanged") => Event::MetadataChanged(MetadataChangedEvent {
            params: params.clone(),
        }),
        (SERVICE_SETTINGS_DEVICE, "updateStatus") => Event::UpdateStatus(UpdateStatusEvent {
            params: params.clone(),
        }),
        _ => Event::Custom(CustomEvent {
            service: service.to_string(),
            name: name.to_string(),
            params: params.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn webapp_connected_status_dispatches_to_typed_variant() {
        let params = json!({ "status": "connected" });
        match dispatch(SERVICE_WEBAPP, "connectedStatus", &params) {
            Event::WebAppConnectedStatus(event) => {
                assert_eq!(event.status, ConnectionStatus::Connected);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn playback_status_decodes_scenario_three_literal_values() {
        let params = json!({
            "code": 0, "position": 1234.56, "duration": 5678.9,
            "state": 2, "volume": 0.45, "mute": true
        });
        match dispatch(SERVICE_MEDIA, "playbackStatus", &params) {
            Event::PlaybackStatus(event) => {
                assert_eq!(event.state, PlaybackState::Playing);
                assert_eq!(event.position, 1234.56);
                assert_eq!(event.duration, 5678.9);
                assert_eq!(event.volume, 0.45);
                assert!(event.muted);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_service_dispatches_as_custom() {
        let params = json!({ "anything": 1 });
        match dispatch("org.ocast.unheard-of", "ping", &params) {
            Event::Custom(event) => {
                assert_eq!(event.service, "org.ocast.unheard-of");
                assert_eq!(event.name, "ping");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
