//! DIAL Get/Start/Stop client (§4.E).

use crate::xml::{attribute, local_name};
use ocast_core::{Application, ApplicationState, Error, OCastAdditionalData};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// A DIAL client bound to one device's application base URL.
pub struct DialClient {
    client: Client,
    base_url: String,
}

impl DialClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::transport(-3, "failed to build HTTP client").with_source(e))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn app_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }

    /// `GET base/name`, decoding the returned `service` element.
    pub async fn get(&self, name: &str) -> Result<Application, Error> {
        let response = self
            .client
            .get(self.app_url(name))
            .send()
            .await
            .map_err(|e| Error::transport(-3, "DIAL GET failed").with_source(e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::transport(
                status.as_u16() as i32,
                format!("DIAL GET returned {status}"),
            ));
        }

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transport(-3, "failed to read DIAL response body").with_source(e))?;
        let body = String::from_utf8(body_bytes.to_vec())
            .map_err(|e| Error::protocol(-1, "DIAL response body was not valid UTF-8").with_source(e))?;

        parse_service_xml(&body, name)
    }

    /// `POST base/name` with an empty body; success is any 2xx.
    pub async fn start(&self, name: &str) -> Result<(), Error> {
        let response = self
            .client
            .post(self.app_url(name))
            .body(Vec::new())
            .send()
            .await
            .map_err(|e| Error::transport(-3, "DIAL POST failed").with_source(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            Err(Error::transport(
                status.as_u16() as i32,
                format!("DIAL POST returned {status}"),
            ))
        }
    }

    /// Chains a Get; issues `DELETE` on the derived instance URL if stop is allowed.
    pub async fn stop(&self, name: &str) -> Result<(), Error> {
        let app = self.get(name).await?;
        if !app.is_stop_allowed {
            return Err(Error::transport(-3, "DIAL application does not allow stop"));
        }

        let instance_url = match &app.instance_path {
            Some(path) if path.starts_with("http://") || path.starts_with("https://") => path.clone(),
            Some(path) => format!("{}/{}/{}", self.base_url.trim_end_matches('/'), name, path),
            None => format!("{}/{}/run", self.base_url.trim_end_matches('/'), name),
        };

        let response = self
            .client
            .delete(&instance_url)
            .send()
            .await
            .map_err(|e| Error::transport(-3, "DIAL DELETE failed").with_source(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            Err(Error::transport(
                status.as_u16() as i32,
                format!("DIAL DELETE returned {status}"),
            ))
        }
    }
}

fn parse_service_xml(xml: &str, requested_name: &str) -> Result<Application, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut name = None;
    let mut is_stop_allowed = false;
    let mut raw_state = None;
    let mut instance_path = None;
    let mut additional_data = OCastAdditionalData::default();
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let tag = local_name(&e);
                if tag == "options" {
                    is_stop_allowed = attribute(&e, "allowStop").as_deref() == Some("true");
                } else if tag == "link" {
                    instance_path = attribute(&e, "href");
                }
                current_tag = Some(tag);
            }
            Ok(Event::Text(e)) => {
                if let Some(tag) = current_tag.as_deref() {
                    let text = e
                        .unescape()
                        .map_err(|e| Error::protocol(-1, "invalid XML text content").with_source(e))?
                        .into_owned();
                    match tag {
                        "name" if name.is_none() => name = Some(text),
                        "state" if raw_state.is_none() => raw_state = Some(text),
                        "X_OCAST_App2AppURL" => additional_data.app_to_app_url = Some(text),
                        "X_OCAST_Version" => additional_data.version = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => current_tag = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::protocol(-1, "malformed DIAL service XML").with_source(e)),
            _ => {}
        }
        buf.clear();
    }

    let raw_state = raw_state.ok_or_else(|| Error::protocol(-1, "missing state element"))?;

    Ok(Application {
        name: name.unwrap_or_else(|| requested_name.to_string()),
        is_stop_allowed,
        state: parse_state(&raw_state),
        instance_path,
        additional_data,
    })
}

/// Parses the `state` element text into the `{Running, Stopped, Hidden, Installable(url)}` enum.
fn parse_state(raw: &str) -> ApplicationState {
    let lower = raw.to_lowercase();
    if let Some(idx) = lower.find("installable=") {
        let url = raw[idx + "installable=".len()..].trim();
        return ApplicationState::Installable(url.to_string());
    }
    match lower.trim() {
        "running" => ApplicationState::Running,
        "hidden" => ApplicationState::Hidden,
        _ => ApplicationState::Stopped,
    }
}
