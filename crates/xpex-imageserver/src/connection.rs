//! One TCP connection to an ImageServer, with strict framing.
//!
//! The connection is single-reader and single-writer; the pipeline layer
//! coordinates concurrent use. Any framing error (short read, malformed
//! header, missing trailer) leaves the byte stream position unknown, so the
//! connection transitions to a terminal `Broken` state and every further
//! call fails with [`ProtoError::ConnectionBroken`].

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use xpex_models::Frame;

use crate::codec::{
    encode_method, parse_image_header, parse_xml_response, MethodCall, XmlResponse, SEPARATOR,
};
use crate::error::{ProtoError, ProtoResult};

/// Default connect and read timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Open,
    Closed,
    Broken,
}

/// A response read off the wire.
#[derive(Debug)]
pub enum Response {
    Xml(XmlResponse),
    Image(Frame),
}

/// One socket to the ImageServer.
pub struct Connection {
    stream: TcpStream,
    /// Bytes received but not yet consumed
    buf: Vec<u8>,
    state: ConnState,
    io_timeout: Duration,
    next_request_id: u32,
}

impl Connection {
    /// Open a TCP connection to the recording server.
    pub async fn open(host: &str, port: u16, io_timeout: Duration) -> ProtoResult<Self> {
        debug!(host, port, "Connecting to ImageServer");
        let stream = timeout(io_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ProtoError::Timeout)??;
        Ok(Self {
            stream,
            buf: Vec::new(),
            state: ConnState::Open,
            io_timeout,
            next_request_id: 0,
        })
    }

    /// Whether the connection is usable.
    pub fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    /// Send a method call, returning the request id it was assigned.
    ///
    /// Request ids are strictly increasing for the lifetime of the
    /// connection.
    pub async fn send_method(&mut self, call: &MethodCall<'_>) -> ProtoResult<u32> {
        self.ensure_open()?;
        self.next_request_id += 1;
        let request_id = self.next_request_id;

        let message = encode_method(request_id, call);
        trace!(request_id, method = call.name(), "-> methodcall");

        if let Err(e) = self.stream.write_all(&message).await {
            self.state = ConnState::Broken;
            return Err(e.into());
        }
        Ok(request_id)
    }

    /// Read one response, XML or image, discriminated by its first
    /// non-whitespace byte.
    pub async fn read_response(&mut self) -> ProtoResult<Response> {
        self.ensure_open()?;
        match self.read_response_inner().await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.breaks_connection() {
                    self.state = ConnState::Broken;
                }
                Err(e)
            }
        }
    }

    /// Read a response and require it to be XML.
    pub async fn read_xml_response(&mut self) -> ProtoResult<XmlResponse> {
        match self.read_response().await? {
            Response::Xml(xml) => Ok(xml),
            Response::Image(frame) => {
                self.state = ConnState::Broken;
                Err(ProtoError::unexpected_status(format!(
                    "expected XML response, got image frame for request {}",
                    frame.request_id
                )))
            }
        }
    }

    /// Read a response and require it to be an image.
    pub async fn read_image_response(&mut self) -> ProtoResult<Frame> {
        match self.read_response().await? {
            Response::Image(frame) => Ok(frame),
            Response::Xml(xml) => {
                self.state = ConnState::Broken;
                Err(xml.failure())
            }
        }
    }

    /// Mark the connection broken after a protocol violation detected
    /// above the framing layer (e.g. an out-of-order response id).
    pub(crate) fn mark_broken(&mut self) {
        self.state = ConnState::Broken;
    }

    /// Close the socket. A clean close; the connection cannot be reused.
    pub async fn close(&mut self) {
        if self.state == ConnState::Open {
            let _ = self.stream.shutdown().await;
        }
        self.state = ConnState::Closed;
    }

    fn ensure_open(&self) -> ProtoResult<()> {
        match self.state {
            ConnState::Open => Ok(()),
            ConnState::Closed | ConnState::Broken => Err(ProtoError::ConnectionBroken),
        }
    }

    async fn read_response_inner(&mut self) -> ProtoResult<Response> {
        // Skip stray whitespace between messages
        loop {
            let ws = self
                .buf
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            self.consume(ws);
            match self.buf.first() {
                Some(_) => break,
                None => self.fill_some().await?,
            }
        }

        let header_end = self.fill_until_separator().await?;

        if self.buf[0] == b'<' {
            let text = String::from_utf8_lossy(&self.buf[..header_end]).into_owned();
            self.consume(header_end + SEPARATOR.len());
            let response = parse_xml_response(&text);
            trace!(request_id = ?response.request_id, "<- xml response");
            return Ok(Response::Xml(response));
        }

        let block = String::from_utf8_lossy(&self.buf[..header_end]).into_owned();
        self.consume(header_end + SEPARATOR.len());
        let header = parse_image_header(&block)?;

        let payload = match header.content_length {
            None | Some(0) => Vec::new(),
            Some(length) => {
                let length = length as usize;
                self.fill_exact(length).await?;
                let payload = self.buf[..length].to_vec();
                self.consume(length);

                // The four bytes after the payload MUST be the trailer;
                // anything else means the framing is already corrupt.
                self.fill_exact(SEPARATOR.len()).await.map_err(|e| match e {
                    ProtoError::ShortRead { .. } => ProtoError::MissingTrailer,
                    other => other,
                })?;
                if &self.buf[..SEPARATOR.len()] != SEPARATOR {
                    return Err(ProtoError::MissingTrailer);
                }
                self.consume(SEPARATOR.len());
                payload
            }
        };

        if let Some(declared) = header.content_length {
            if payload.len() != declared as usize {
                return Err(ProtoError::ContentLengthMismatch {
                    declared: declared as usize,
                    actual: payload.len(),
                });
            }
        }

        trace!(
            request_id = header.request_id,
            current = header.current_ts_ms,
            bytes = payload.len(),
            "<- image response"
        );

        Ok(Response::Image(Frame {
            request_id: header.request_id,
            content_type: header.content_type,
            content_length: header.content_length.unwrap_or(0),
            current_ts_ms: header.current_ts_ms,
            prev_ts_ms: header.prev_ts_ms,
            next_ts_ms: header.next_ts_ms,
            payload,
        }))
    }

    /// Grow the buffer until it contains the `\r\n\r\n` separator; returns
    /// the separator's offset.
    async fn fill_until_separator(&mut self) -> ProtoResult<usize> {
        loop {
            if let Some(pos) = find_separator(&self.buf) {
                return Ok(pos);
            }
            self.fill_some().await?;
        }
    }

    /// Grow the buffer to at least `len` bytes.
    async fn fill_exact(&mut self, len: usize) -> ProtoResult<()> {
        while self.buf.len() < len {
            match self.fill_some().await {
                Ok(()) => {}
                Err(ProtoError::ConnectionBroken) => {
                    return Err(ProtoError::ShortRead {
                        expected: len,
                        got: self.buf.len(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn fill_some(&mut self) -> ProtoResult<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = timeout(self.io_timeout, self.stream.read(&mut chunk))
            .await
            .map_err(|_| ProtoError::Timeout)??;
        if n == 0 {
            return Err(ProtoError::ConnectionBroken);
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    fn consume(&mut self, n: usize) {
        self.buf.drain(..n);
    }
}

fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(SEPARATOR.len())
        .position(|window| window == SEPARATOR)
}
