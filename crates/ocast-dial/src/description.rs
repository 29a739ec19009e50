//! UPnP device description client (§4.D).

use crate::xml::local_name;
use ocast_core::{extract_uuid, Device, Error};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Issues the UPnP description GET, parses the response, and builds a `Device`.
///
/// A non-2xx status, a non-UTF8/truncated body, or a missing mandatory field
/// are all reported as failures — the caller (the discovery engine) drops
/// the candidate for this round rather than retrying.
pub async fn fetch_description(location: &str) -> Result<Device, Error> {
    let client = Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| Error::transport(-3, "failed to build HTTP client").with_source(e))?;

    let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let response = client
        .get(location)
        .header("Date", date)
        .send()
        .await
        .map_err(|e| Error::transport(-3, "UPnP description request failed").with_source(e))?;

    if !response.status().is_success() {
        let status = response.status();
        return Err(Error::transport(
            status.as_u16() as i32,
            format!("UPnP description request returned {status}"),
        ));
    }

    let app_base_url = response
        .headers()
        .get("Application-DIAL-URL")
        .or_else(|| response.headers().get("Application-URL"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| Error::protocol(-1, "missing Application-DIAL-URL/Application-URL header"))?;

    let body_bytes = response
        .bytes()
        .await
        .map_err(|e| Error::transport(-3, "failed to read UPnP description body").with_source(e))?;
    let body = String::from_utf8(body_bytes.to_vec())
        .map_err(|e| Error::protocol(-1, "UPnP description body was not valid UTF-8").with_source(e))?;

    let fields = parse_device_fields(&body)?;

    let friendly_name = fields
        .friendly_name
        .ok_or_else(|| Error::protocol(-1, "missing friendlyName"))?;
    let manufacturer = fields
        .manufacturer
        .ok_or_else(|| Error::protocol(-1, "missing manufacturer"))?;
    let model_name = fields
        .model_name
        .ok_or_else(|| Error::protocol(-1, "missing modelName"))?;
    let udn = fields.udn.ok_or_else(|| Error::protocol(-1, "missing UDN"))?;
    let uuid =
        extract_uuid(&udn).ok_or_else(|| Error::protocol(-1, "UDN did not contain a uuid: prefix"))?;

    Ok(Device {
        uuid,
        friendly_name,
        manufacturer,
        model_name,
        app_base_url,
    })
}

#[derive(Default)]
struct DeviceFields {
    friendly_name: Option<String>,
    manufacturer: Option<String>,
    model_name: Option<String>,
    udn: Option<String>,
}

/// Picks `friendlyName`/`manufacturer`/`modelName`/`UDN` out of the `root/device` XML.
///
/// Takes the first occurrence of each tag in document order; OCast device
/// descriptions do not nest embedded `deviceList` entries, so this is exact
/// in practice without tracking the full element path.
fn parse_device_fields(xml: &str) -> Result<DeviceFields, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = DeviceFields::default();
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => current_tag = Some(local_name(&e)),
            Ok(Event::Text(e)) => {
                if let Some(tag) = current_tag.as_deref() {
                    let text = e
                        .unescape()
                        .map_err(|e| Error::protocol(-1, "invalid XML text content").with_source(e))?
                        .into_owned();
                    match tag {
                        "friendlyName" if fields.friendly_name.is_none() => {
                            fields.friendly_name = Some(text)
                        }
                        "manufacturer" if fields.manufacturer.is_none() => {
                            fields.manufacturer = Some(text)
                        }
                        "modelName" if fields.model_name.is_none() => fields.model_name = Some(text),
                        "UDN" if fields.udn.is_none() => fields.udn = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => current_tag = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::protocol(-1, "malformed UPnP description XML").with_source(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:tvdevice:1</deviceType>
    <friendlyName>LaCléTV-32F7</friendlyName>
    <manufacturer>Innopia</manufacturer>
    <modelName>Orange TV</modelName>
    <UDN>uuid:b042f955-9ae7-44a8-ba6c-0009743932f7</UDN>
  </device>
</root>"#;

    #[test]
    fn parses_all_mandatory_fields() {
        let fields = parse_device_fields(DESCRIPTION_XML).unwrap();
        assert_eq!(fields.friendly_name.as_deref(), Some("LaCléTV-32F7"));
        assert_eq!(fields.manufacturer.as_deref(), Some("Innopia"));
        assert_eq!(fields.model_name.as_deref(), Some("Orange TV"));
        assert_eq!(
            fields.udn.as_deref(),
            Some("uuid:b042f955-9ae7-44a8-ba6c-0009743932f7")
        );
    }

    #[test]
    fn missing_field_leaves_it_none() {
        let xml = "<root><device><friendlyName>Only This</friendlyName></device></root>";
        let fields = parse_device_fields(xml).unwrap();
        assert_eq!(fields.friendly_name.as_deref(), Some("Only This"));
        assert!(fields.udn.is_none());
    }

    #[test]
    fn malformed_xml_is_rejected() {
        let xml = "<root><device><friendlyName>unterminated</device></root>";
        // quick-xml treats mismatched end tags as an error.
        assert!(parse_device_fields(xml).is_err());
    }
}
