//! Scripted mock ImageServer.
//!
//! Replays a configurable frame script over the real wire format: XML
//! responses for `connect`/`connectupdate`, image responses with the
//! mandatory trailer for `goto`/`next`. Fault injection covers the
//! missing-trailer case. Accepts multiple connections in sequence, so
//! reconnect behavior can be exercised.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One scripted frame.
#[derive(Debug, Clone)]
pub struct MockFrame {
    pub ts_ms: i64,
    pub content_type: String,
    pub payload: Vec<u8>,
}

/// Mock behavior knobs.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    pub frames: Vec<MockFrame>,
    /// Omit the post-payload trailer when serving this frame index
    pub omit_trailer_at: Option<usize>,
    /// Artificial delay before each image response
    pub frame_delay: Duration,
    /// Drop this many connections cold on their first `goto`, to exercise
    /// the reconnect-before-first-frame path
    pub drop_goto_connections: usize,
}

/// Running mock server handle.
pub struct MockImageServer {
    pub addr: SocketAddr,
    methods: Arc<Mutex<Vec<String>>>,
}

impl MockImageServer {
    pub async fn spawn(script: MockScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let methods = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&methods);

        tokio::spawn(async move {
            let mut connection_index = 0usize;
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let drop_on_goto = connection_index < script.drop_goto_connections;
                connection_index += 1;
                let script = script.clone();
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let _ = serve_connection(socket, script, drop_on_goto, log).await;
                });
            }
        });

        Self { addr, methods }
    }

    /// Method names received so far, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    script: MockScript,
    drop_on_goto: bool,
    log: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut buf: Vec<u8> = Vec::new();
    let mut cursor = 0usize;

    loop {
        let request = match read_request(&mut socket, &mut buf).await? {
            Some(request) => request,
            None => return Ok(()),
        };

        let request_id = extract(&request, "requestid")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        let method = extract(&request, "methodname").unwrap_or_default();
        log.lock().unwrap().push(method.clone());

        let response: Vec<u8> = match method.as_str() {
            "connect" | "connectupdate" => format!(
                "<methodresponse><requestid>{request_id}</requestid><methodname>{method}</methodname><connected>yes</connected></methodresponse>\r\n\r\n"
            )
            .into_bytes(),
            "disconnect" => return Ok(()),
            "goto" | "next" => {
                if drop_on_goto {
                    return Ok(());
                }
                if !script.frame_delay.is_zero() {
                    tokio::time::sleep(script.frame_delay).await;
                }
                if cursor < script.frames.len() {
                    let index = cursor;
                    cursor += 1;
                    frame_response(&script, index, request_id)
                } else {
                    format!("ImageResponse\r\nRequestId={request_id}\r\nCurrent=-1\r\n\r\n")
                        .into_bytes()
                }
            }
            other => format!(
                "<methodresponse><requestid>{request_id}</requestid><errorreason>unknown method {other}</errorreason></methodresponse>\r\n\r\n"
            )
            .into_bytes(),
        };

        socket.write_all(&response).await?;
    }
}

async fn read_request(
    socket: &mut TcpStream,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let request = String::from_utf8_lossy(&buf[..pos]).into_owned();
            buf.drain(..pos + 4);
            return Ok(Some(request));
        }
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn frame_response(script: &MockScript, index: usize, request_id: u32) -> Vec<u8> {
    let frame = &script.frames[index];
    let prev = if index > 0 {
        script.frames[index - 1].ts_ms
    } else {
        -1
    };
    let next = script.frames.get(index + 1).map(|f| f.ts_ms).unwrap_or(-1);

    let mut bytes = format!(
        "ImageResponse\r\nContent-type: {}\r\nContent-length: {}\r\nCurrent={}\r\nPrev={prev}\r\nNext={next}\r\nRequestId={request_id}\r\n\r\n",
        frame.content_type,
        frame.payload.len(),
        frame.ts_ms,
    )
    .into_bytes();
    bytes.extend_from_slice(&frame.payload);
    if script.omit_trailer_at != Some(index) {
        bytes.extend_from_slice(b"\r\n\r\n");
    }
    bytes
}

fn extract(request: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = request.find(&open)? + open.len();
    let end = request[start..].find(&close)? + start;
    Some(request[start..end].to_string())
}

/// Generic-bytedata frame payload: 36-byte proprietary header followed by
/// an Annex-B-looking body.
pub fn generic_payload(codec_id: u16, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(36 + body.len());
    payload.extend_from_slice(&codec_id.to_be_bytes());
    payload.extend_from_slice(&[0u8; 6]);
    payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
    payload.extend_from_slice(&[0u8; 24]);
    payload.extend_from_slice(body);
    payload
}

/// `count` H.264 frames spread evenly over `[t0, t0 + duration_ms)`.
pub fn h264_script(count: usize, t0: i64, duration_ms: i64) -> Vec<MockFrame> {
    (0..count)
        .map(|i| MockFrame {
            ts_ms: t0 + i as i64 * duration_ms / count as i64,
            content_type: "application/x-genericbytedata-octet-stream".to_string(),
            payload: generic_payload(0x000A, &[0, 0, 0, 1, 0x65, i as u8, 0x80]),
        })
        .collect()
}

/// `count` JPEG frames spread evenly over `[t0, t0 + duration_ms)`.
pub fn jpeg_script(count: usize, t0: i64, duration_ms: i64) -> Vec<MockFrame> {
    jpeg_script_with_payload(count, t0, duration_ms, &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10])
}

pub fn jpeg_script_with_payload(
    count: usize,
    t0: i64,
    duration_ms: i64,
    payload: &[u8],
) -> Vec<MockFrame> {
    (0..count)
        .map(|i| MockFrame {
            ts_ms: t0 + i as i64 * duration_ms / count as i64,
            content_type: "image/jpeg".to_string(),
            payload: payload.to_vec(),
        })
        .collect()
}
