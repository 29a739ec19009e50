use serde::{Deserialize, Serialize};

/// A discovered OCast device.
///
/// Created upon the first successful UPnP description fetch following an
/// SSDP response; otherwise immutable. The discovery engine tracks
/// last-seen timestamps and aging separately — this struct only carries the
/// device's own metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// UPnP UUID, extracted from USN/UDN. Unique key.
    pub uuid: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    /// DIAL service base URL (from `Application-DIAL-URL`, falling back to `Application-URL`).
    pub app_base_url: String,
}

/// State of a DIAL application, as reported by a Get request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ApplicationState {
    Running,
    Stopped,
    Hidden,
    /// The raw state contained `installable=<url>`; carries that URL.
    Installable(String),
}

/// OCast-specific additional data attached to a DIAL application description.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OCastAdditionalData {
    /// `ocast:X_OCAST_App2AppURL`.
    pub app_to_app_url: Option<String>,
    /// `ocast:X_OCAST_Version`.
    pub version: Option<String>,
}

/// A DIAL application as returned by a Get request (§4.E).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub is_stop_allowed: bool,
    pub state: ApplicationState,
    /// `link.href`, used to construct the stop URL.
    pub instance_path: Option<String>,
    pub additional_data: OCastAdditionalData,
}

/// Extract the UUID portion of a USN/UDN value, per `^uuid:([^:]*)`.
///
/// Shared by the SSDP response parser and the UPnP description client,
/// both of which derive a device's UUID the same way.
pub fn extract_uuid(usn_or_udn: &str) -> Option<String> {
    use regex::Regex;

    let re = Regex::new(r"^uuid:([^:]*)").expect("static uuid pattern is valid");
    let uuid = re.captures(usn_or_udn)?.get(1)?.as_str();
    if uuid.is_empty() {
        None
    } else {
        Some(uuid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_uuid_from_usn_with_trailing_urn() {
        let usn = "uuid:b042f955-9ae7-44a8-ba6c-0009743932f7::urn:dial-multiscreen-org:service:dial:1";
        assert_eq!(
            extract_uuid(usn).as_deref(),
            Some("b042f955-9ae7-44a8-ba6c-0009743932f7")
        );
    }

    #[test]
    fn extract_uuid_from_bare_udn() {
        let udn = "uuid:b042f955-9ae7-44a8-ba6c-0009743932f7";
        assert_eq!(
            extract_uuid(udn).as_deref(),
            Some("b042f955-9ae7-44a8-ba6c-0009743932f7")
        );
    }

    #[test]
    fn rejects_missing_prefix() {
        assert_eq!(extract_uuid("not-a-uuid-string"), None);
    }

    #[test]
    fn device_equality_is_by_value() {
        let a = Device {
            uuid: "b042f955-9ae7-44a8-ba6c-0009743932f7".into(),
            friendly_name: "LaCléTV-32F7".into(),
            manufacturer: "Innopia".into(),
            model_name: "Orange TV".into(),
            app_base_url: "http://127.0.0.1:8008/apps".into(),
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
