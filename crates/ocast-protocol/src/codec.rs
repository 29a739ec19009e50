//! Layered JSON framing for OCast commands, replies, and events (§3 "OCast
//! message", §4.F). Decoding is two-step: the device layer is parsed with
//! `message` kept as a raw JSON value until the caller's expected type is
//! known, per §9 "Raw JSON pass-through".

use crate::errors::Status;
use ocast_core::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Device-layer `type` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Command,
    Reply,
    Event,
}

/// The data layer: `name` + opaque `params` + optional `options`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLayer {
    pub name: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// The application layer: a service name plus its data layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationLayer {
    pub service: String,
    pub data: DataLayer,
}

/// The device layer, as sent for a command. `status` never appears on the
/// wire for an outgoing command (§8 scenario 6).
#[derive(Debug, Clone, Serialize)]
pub struct CommandFrame {
    pub src: String,
    pub dst: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub id: i64,
    pub message: ApplicationLayer,
}

/// The device layer, as received for a reply or an event. `status` is
/// present only on replies.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingFrame {
    #[allow(dead_code)]
    pub src: String,
    #[allow(dead_code)]
    pub dst: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub id: i64,
    #[serde(default)]
    pub status: Option<Status>,
    pub message: ApplicationLayer,
}

/// Routing domain for a command, per §4.H step 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDomain {
    /// Media and custom commands; requires the receiver application running.
    Browser,
    /// Device/input settings commands; never requires the application.
    Settings,
}

impl RoutingDomain {
    pub fn destination(self) -> &'static str {
        match self {
            RoutingDomain::Browser => "browser",
            RoutingDomain::Settings => "settings",
        }
    }
}

/// Serializes a command device layer to its wire JSON text.
pub fn encode_command(
    src: &str,
    domain: RoutingDomain,
    id: i64,
    service: &str,
    name: &str,
    params: Value,
    options: Option<Value>,
) -> Result<String, Error> {
    let frame = CommandFrame {
        src: src.to_string(),
        dst: domain.destination().to_string(),
        message_type: MessageType::Command,
        id,
        message: ApplicationLayer {
            service: service.to_string(),
            data: DataLayer {
                name: name.to_string(),
                params,
                options,
            },
        },
    };
    serde_json::to_string(&frame)
        .map_err(|e| Error::protocol(crate::errors::CLIENT, "failed to encode command frame").with_source(e))
}

/// Parses the device layer only; the application/data layers stay structured
/// but `params` remains an opaque [`Value`] until the caller decodes it.
pub fn decode_frame(text: &str) -> Result<IncomingFrame, Error> {
    serde_json::from_str(text)
        .map_err(|e| Error::protocol(crate::errors::CLIENT, "failed to decode frame").with_source(e))
}

/// Decodes `params` into `T`, used once the reply's expected type is known.
pub fn decode_params<T: for<'de> Deserialize<'de>>(params: &Value) -> Result<T, Error> {
    serde_json::from_value(params.clone())
        .map_err(|e| Error::protocol(crate::errors::CLIENT, "reply params do not match expected type").with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prepare_media_command_encodes_without_a_status_key() {
        let params = json!({
            "url": "http://example.com/video.mp4",
            "frequency": 300,
            "title": "My video",
            "subtitle": "episode 1",
            "logo": "http://example.com/logo.png",
            "mediaType": "video",
            "transferMode": "streamed",
            "autoplay": true,
        });
        let options = json!({ "auth_cookie": "azertyuiop1234" });
        let encoded = encode_command(
            "client-uuid",
            RoutingDomain::Browser,
            1,
            "org.ocast.media",
            "prepare",
            params,
            Some(options),
        )
        .unwrap();

        assert!(!encoded.contains("\"status\""));
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["src"], "client-uuid");
        assert_eq!(value["dst"], "browser");
        assert_eq!(value["type"], "command");
        assert_eq!(value["id"], 1);
        assert_eq!(value["message"]["service"], "org.ocast.media");
        assert_eq!(value["message"]["data"]["name"], "prepare");
        assert_eq!(value["message"]["data"]["options"]["auth_cookie"], "azertyuiop1234");
    }

    #[test]
    fn decodes_reply_with_ok_status_and_success_code() {
        let raw = json!({
            "src": "device",
            "dst": "client-uuid",
            "type": "reply",
            "id": 42,
            "status": "ok",
            "message": {
                "service": "org.ocast.media",
                "data": { "name": "prepare", "params": { "code": 0 } }
            }
        })
        .to_string();

        let frame = decode_frame(&raw).unwrap();
        assert_eq!(frame.message_type, MessageType::Reply);
        assert_eq!(frame.id, 42);
        assert_eq!(frame.status, Some(Status::Ok));
        assert_eq!(frame.message.data.params["code"], 0);
    }

    #[test]
    fn unrecognized_status_token_decodes_as_unknown() {
        let raw = json!({
            "src": "device", "dst": "x", "type": "reply", "id": 1,
            "status": "totally_new_status",
            "message": { "service": "s", "data": { "name": "n", "params": {} } }
        })
        .to_string();
        let frame = decode_frame(&raw).unwrap();
        assert_eq!(frame.status, Some(Status::Unknown));
    }

    #[test]
    fn malformed_json_fails_to_decode() {
        assert!(decode_frame("{not json").is_err());
    }
}
