//! Message serialization and parsing for the ImageServer protocol.
//!
//! Requests are sent without linebreaks within the XML, per the Milestone
//! protocol documentation. All messages end with `\r\n\r\n`.

use regex::Regex;
use std::sync::OnceLock;

use xpex_models::{CODEC_ID_H264, GENERIC_BYTEDATA_CONTENT_TYPE, NO_NEIGHBOR_TS};

use crate::error::{ProtoError, ProtoResult};

/// Message terminator, also the trailer after every image payload.
pub const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Size of the proprietary header in front of generic bytedata payloads.
pub const GENERIC_HEADER_LEN: usize = 36;

/// An outbound method call.
#[derive(Debug, Clone)]
pub enum MethodCall<'a> {
    /// Open a session for one camera. `always_std_jpeg` requests server-side
    /// transcoding to JPEG; the exporter asks for raw codec mode instead.
    Connect {
        camera_id: &'a str,
        token: &'a str,
        always_std_jpeg: bool,
    },
    /// Replace the session token mid-connection.
    ConnectUpdate { token: &'a str },
    /// Seek to a timestamp (Unix milliseconds); answers with a frame.
    Goto { time_ms: i64 },
    Next,
    Previous,
    Live,
    Disconnect,
}

impl MethodCall<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            MethodCall::Connect { .. } => "connect",
            MethodCall::ConnectUpdate { .. } => "connectupdate",
            MethodCall::Goto { .. } => "goto",
            MethodCall::Next => "next",
            MethodCall::Previous => "previous",
            MethodCall::Live => "live",
            MethodCall::Disconnect => "disconnect",
        }
    }

    fn body(&self) -> String {
        match self {
            MethodCall::Connect {
                camera_id,
                token,
                always_std_jpeg,
            } => {
                let yn = if *always_std_jpeg { "yes" } else { "no" };
                format!(
                    "<username>dummy</username><password>dummy</password>\
                     <alwaysstdjpeg>{yn}</alwaysstdjpeg>\
                     <connectparam>id={camera_id}&amp;connectiontoken={token}</connectparam>"
                )
            }
            MethodCall::ConnectUpdate { token } => {
                format!("<connectparam>connectiontoken={token}</connectparam>")
            }
            MethodCall::Goto { time_ms } => format!("<time>{time_ms}</time>"),
            MethodCall::Next | MethodCall::Previous | MethodCall::Live | MethodCall::Disconnect => {
                String::new()
            }
        }
    }

    /// Whether the server answers this call with an XML response rather
    /// than an image response.
    pub fn expects_xml_response(&self) -> bool {
        matches!(
            self,
            MethodCall::Connect { .. } | MethodCall::ConnectUpdate { .. } | MethodCall::Disconnect
        )
    }
}

/// Serialize a method call into its wire form.
pub fn encode_method(request_id: u32, call: &MethodCall<'_>) -> Vec<u8> {
    let mut message = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><methodcall><requestid>{}</requestid><methodname>{}</methodname>{}</methodcall>"#,
        request_id,
        call.name(),
        call.body()
    )
    .into_bytes();
    message.extend_from_slice(SEPARATOR);
    message
}

/// Parsed XML method response.
#[derive(Debug, Clone, Default)]
pub struct XmlResponse {
    pub request_id: Option<u32>,
    pub method_name: Option<String>,
    pub connected: Option<bool>,
    pub status: Option<String>,
    pub error_reason: Option<String>,
}

impl XmlResponse {
    /// Whether the server reported success.
    ///
    /// `connect`/`connectupdate` answer with `<connected>yes</connected>`;
    /// other methods carry a `<status>success</status>` element. A response
    /// with neither is rejected.
    pub fn is_success(&self) -> bool {
        match (self.connected, self.status.as_deref()) {
            (Some(connected), _) => connected,
            (None, Some(status)) => status.eq_ignore_ascii_case("success"),
            (None, None) => false,
        }
    }

    /// Turn a failed response into the protocol error carrying the server's
    /// reason.
    pub fn failure(&self) -> ProtoError {
        let reason = self
            .error_reason
            .clone()
            .or_else(|| self.status.clone())
            .unwrap_or_else(|| "no status element in response".to_string());
        ProtoError::unexpected_status(reason)
    }
}

/// Parse an inbound XML method response, tolerant of unknown elements and
/// namespace prefixes.
pub fn parse_xml_response(text: &str) -> XmlResponse {
    static ELEMENT_RE: OnceLock<Regex> = OnceLock::new();
    let re = ELEMENT_RE
        .get_or_init(|| Regex::new(r"<(?:\w+:)?(\w+)>([^<]*)</").expect("element regex"));

    let mut response = XmlResponse::default();
    for cap in re.captures_iter(text) {
        let value = cap[2].trim();
        match cap[1].to_ascii_lowercase().as_str() {
            "requestid" => response.request_id = value.parse().ok(),
            "methodname" => response.method_name = Some(value.to_string()),
            "connected" => response.connected = Some(value.eq_ignore_ascii_case("yes")),
            "status" => response.status = Some(value.to_string()),
            "errorreason" => response.error_reason = Some(cap[2].to_string()),
            _ => {}
        }
    }
    response
}

/// Parsed header block of an image response.
#[derive(Debug, Clone)]
pub struct ImageHeader {
    pub request_id: u32,
    pub content_type: String,
    /// Payload length; `None` for frame-less answers (nothing recorded at
    /// the requested position).
    pub content_length: Option<u32>,
    pub current_ts_ms: i64,
    pub prev_ts_ms: i64,
    pub next_ts_ms: i64,
}

/// Parse the ASCII header block of an image response.
///
/// The server mixes `Key: value` and `Key=value` line forms; both are
/// accepted, keys case-insensitively.
pub fn parse_image_header(block: &str) -> ProtoResult<ImageHeader> {
    let mut request_id = None;
    let mut content_type = None;
    let mut content_length = None;
    let mut current = NO_NEIGHBOR_TS;
    let mut prev = NO_NEIGHBOR_TS;
    let mut next = NO_NEIGHBOR_TS;

    for line in block.split("\r\n") {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once(':').or_else(|| line.split_once('=')) {
            Some((k, v)) => (k.trim(), v.trim()),
            None => continue,
        };

        if key.eq_ignore_ascii_case("requestid") {
            request_id = value.parse::<u32>().ok();
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        } else if key.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<u32>().ok();
        } else if key.eq_ignore_ascii_case("current") {
            current = value.parse().unwrap_or(NO_NEIGHBOR_TS);
        } else if key.eq_ignore_ascii_case("prev") {
            prev = value.parse().unwrap_or(NO_NEIGHBOR_TS);
        } else if key.eq_ignore_ascii_case("next") {
            next = value.parse().unwrap_or(NO_NEIGHBOR_TS);
        }
    }

    let request_id = request_id
        .ok_or_else(|| ProtoError::bad_header(format!("no RequestId in header block: {block:?}")))?;

    Ok(ImageHeader {
        request_id,
        content_type: content_type.unwrap_or_default(),
        content_length,
        current_ts_ms: current,
        prev_ts_ms: prev,
        next_ts_ms: next,
    })
}

/// Strip the proprietary 36-byte header from a generic bytedata payload.
///
/// Layout: big-endian codec id at offset 0, big-endian payload length at
/// offset 8 (must match the bytes following the header), codec payload from
/// offset 36. The reserved regions are carried opaquely and never
/// interpreted. Only `0x000A` (raw H.264 Annex-B) passes; any other codec
/// id fails the export.
pub fn strip_generic_header(payload: &[u8]) -> ProtoResult<&[u8]> {
    if payload.len() < GENERIC_HEADER_LEN {
        return Err(ProtoError::bad_header(format!(
            "generic bytedata payload of {} bytes is shorter than the {} byte header",
            payload.len(),
            GENERIC_HEADER_LEN
        )));
    }

    let codec_id = u16::from_be_bytes([payload[0], payload[1]]);
    if codec_id != CODEC_ID_H264 {
        return Err(ProtoError::UnsupportedCodec(codec_id));
    }

    let declared = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]) as usize;
    let actual = payload.len() - GENERIC_HEADER_LEN;
    if declared != actual {
        return Err(ProtoError::ContentLengthMismatch { declared, actual });
    }

    Ok(&payload[GENERIC_HEADER_LEN..])
}
