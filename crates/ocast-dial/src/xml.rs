//! Small quick-xml helpers shared by the description and DIAL parsers.

use quick_xml::events::BytesStart;

/// Tag name with any XML namespace prefix stripped (`ocast:X_OCAST_Version` → `X_OCAST_Version`).
pub fn local_name(e: &BytesStart) -> String {
    let full = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    match full.find(':') {
        Some(idx) => full[idx + 1..].to_string(),
        None => full,
    }
}

pub fn attribute(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::events::Event;
    use quick_xml::Reader;

    fn first_start_tag(xml: &str) -> BytesStart<'static> {
        let mut reader = Reader::from_str(xml);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf).unwrap() {
                Event::Start(e) | Event::Empty(e) => return e.into_owned(),
                Event::Eof => panic!("no start tag found"),
                _ => {}
            }
            buf.clear();
        }
    }

    #[test]
    fn strips_namespace_prefix() {
        let tag = first_start_tag("<ocast:X_OCAST_Version>1.0</ocast:X_OCAST_Version>");
        assert_eq!(local_name(&tag), "X_OCAST_Version");
    }

    #[test]
    fn reads_attribute_value() {
        let tag = first_start_tag(r#"<options allowStop="true"/>"#);
        assert_eq!(attribute(&tag, "allowStop").as_deref(), Some("true"));
    }

    #[test]
    fn missing_attribute_is_none() {
        let tag = first_start_tag("<options/>");
        assert_eq!(attribute(&tag, "allowStop"), None);
    }
}
