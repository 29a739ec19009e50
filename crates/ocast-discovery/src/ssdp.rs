//! SSDP M-SEARCH request/response codec (§4.B).

/// An M-SEARCH request, either to build and send or parsed back for testing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MSearchRequest {
    pub host: String,
    /// Omitted for unicast.
    pub mx: Option<u32>,
    pub st: String,
}

impl MSearchRequest {
    pub fn new(host: impl Into<String>, st: impl Into<String>, mx: Option<u32>) -> Self {
        Self {
            host: host.into(),
            mx,
            st: st.into(),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::from("M-SEARCH * HTTP/1.1\r\n");
        out.push_str(&format!("HOST: {}\r\n", self.host));
        out.push_str("MAN: \"ssdp:discover\"\r\n");
        if let Some(mx) = self.mx {
            out.push_str(&format!("MX: {mx}\r\n"));
        }
        out.push_str(&format!("ST: {}\r\n", self.st));
        out.push_str("\r\n");
        out
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (start_line, headers) = split_start_line_and_headers(raw)?;
        if start_line != "M-SEARCH * HTTP/1.1" {
            return None;
        }
        find_header(&headers, "MAN")?;
        Some(Self {
            host: find_header(&headers, "HOST")?,
            mx: find_header(&headers, "MX").and_then(|v| v.parse().ok()),
            st: find_header(&headers, "ST")?,
        })
    }
}

/// A parsed M-SEARCH response, with its four mandatory headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MSearchResponse {
    pub location: String,
    pub server: String,
    pub usn: String,
    pub st: String,
}

impl MSearchResponse {
    pub fn parse(raw: &str) -> Option<Self> {
        let (start_line, headers) = split_start_line_and_headers(raw)?;
        if start_line != "HTTP/1.1 200 OK" {
            return None;
        }
        Some(Self {
            location: find_header(&headers, "LOCATION")?,
            server: find_header(&headers, "SERVER")?,
            usn: find_header(&headers, "USN")?,
            st: find_header(&headers, "ST")?,
        })
    }

    /// The UUID portion of `USN`, per `^uuid:([^:]*)`.
    pub fn uuid(&self) -> Option<String> {
        ocast_core::extract_uuid(&self.usn)
    }
}

/// True for every code point §4.B lists as a line terminator: CR, LF, VT, FF,
/// NEL (U+0085), LS (U+2028), PS (U+2029), including their CRLF combination.
fn is_unicode_newline(c: char) -> bool {
    matches!(
        c,
        '\r' | '\n' | '\u{0B}' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

fn split_start_line_and_headers(raw: &str) -> Option<(String, Vec<(String, String)>)> {
    let mut lines = raw
        .split(is_unicode_newline)
        .map(str::trim)
        .filter(|line| !line.is_empty());

    let start_line = lines.next()?.to_string();
    let headers = lines
        .filter_map(|line| {
            let idx = line.find(':')?;
            Some((line[..idx].trim().to_string(), line[idx + 1..].trim().to_string()))
        })
        .collect();

    Some((start_line, headers))
}

fn find_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}
