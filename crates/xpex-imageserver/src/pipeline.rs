//! Windowed frame reader over one connection.
//!
//! Keeps up to `depth` unanswered `next` requests on the wire and yields
//! frames in timestamp order. Responses are matched against the pending id
//! queue head: request ids are strictly increasing and answered in send
//! order, so an id mismatch is a protocol violation that breaks the
//! connection.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

use xpex_models::{Frame, TimeRange};

use crate::codec::MethodCall;
use crate::connection::Connection;
use crate::error::{ProtoError, ProtoResult};

/// Default number of in-flight `next` requests.
pub const DEFAULT_PIPELINE_DEPTH: usize = 8;

/// Hard bounds on the configurable window.
pub const MIN_PIPELINE_DEPTH: usize = 1;
pub const MAX_PIPELINE_DEPTH: usize = 32;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Target window depth, clamped to `1..=32`
    pub depth: usize,
    /// Send a `connectupdate` after this much wall-clock time (half the
    /// session token TTL); `None` disables refresh tracking
    pub refresh_interval: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_PIPELINE_DEPTH,
            refresh_interval: None,
        }
    }
}

/// Ordered lazy sequence of frames covering a time range.
pub struct FramePipeline<'a> {
    conn: &'a mut Connection,
    range: TimeRange,
    depth: usize,
    /// Request ids on the wire, oldest first
    pending: VecDeque<u32>,
    /// Frames received but not yet handed to the caller
    ready: VecDeque<Frame>,
    refresh_interval: Option<Duration>,
    last_refresh: Instant,
    /// Set once the end of the range (or of the recording) is seen; no new
    /// requests are issued, pending responses are drained
    draining: bool,
}

impl<'a> FramePipeline<'a> {
    /// Seek to the start of the range and prepare the window.
    ///
    /// Issues `goto(t0)` and consumes its answering frame. A frame-less
    /// answer (nothing recorded at or after `t0`) yields a pipeline that
    /// immediately reports end-of-sequence.
    pub async fn seek(
        conn: &'a mut Connection,
        range: TimeRange,
        config: PipelineConfig,
    ) -> ProtoResult<FramePipeline<'a>> {
        let depth = config.depth.clamp(MIN_PIPELINE_DEPTH, MAX_PIPELINE_DEPTH);

        let request_id = conn
            .send_method(&MethodCall::Goto {
                time_ms: range.start_ms,
            })
            .await?;
        let frame = conn.read_image_response().await?;
        if frame.request_id != request_id {
            conn.mark_broken();
            return Err(out_of_order(request_id, frame.request_id));
        }

        let mut pipeline = FramePipeline {
            conn,
            range,
            depth,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            refresh_interval: config.refresh_interval,
            last_refresh: Instant::now(),
            draining: false,
        };

        debug!(
            start_ms = range.start_ms,
            end_ms = range.end_ms,
            first_ts = frame.current_ts_ms,
            depth,
            "Seeked to range start"
        );
        pipeline.accept(frame);
        Ok(pipeline)
    }

    /// Next frame in timestamp order, or `None` at the end of the range.
    pub async fn next_frame(&mut self) -> ProtoResult<Option<Frame>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }

            self.refill().await?;

            let expected = match self.pending.pop_front() {
                Some(request_id) => request_id,
                None => return Ok(None),
            };
            let frame = self.conn.read_image_response().await?;
            if frame.request_id != expected {
                self.conn.mark_broken();
                return Err(out_of_order(expected, frame.request_id));
            }
            self.accept(frame);
        }
    }

    /// Number of unanswered requests currently on the wire.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Whether the session token has aged past the refresh interval.
    ///
    /// Refresh is skipped once the pipeline is draining; the remaining
    /// responses are already on their way.
    pub fn needs_refresh(&self) -> bool {
        match self.refresh_interval {
            Some(interval) => !self.draining && self.last_refresh.elapsed() >= interval,
            None => false,
        }
    }

    /// Replace the session token with a `connectupdate`.
    ///
    /// The update is an XML-response method and must not share the wire
    /// with image requests: all pending responses are drained (buffered
    /// for later emission) before the update is sent, and the window
    /// refills only after its response arrives.
    pub async fn refresh(&mut self, token: &str) -> ProtoResult<()> {
        while let Some(expected) = self.pending.pop_front() {
            let frame = self.conn.read_image_response().await?;
            if frame.request_id != expected {
                self.conn.mark_broken();
                return Err(out_of_order(expected, frame.request_id));
            }
            self.accept(frame);
        }

        let request_id = self
            .conn
            .send_method(&MethodCall::ConnectUpdate { token })
            .await?;
        let response = self.conn.read_xml_response().await?;
        if response.request_id != Some(request_id) {
            self.conn.mark_broken();
            return Err(out_of_order(
                request_id,
                response.request_id.unwrap_or(0),
            ));
        }
        if !response.is_success() {
            self.conn.mark_broken();
            return Err(response.failure());
        }

        debug!("Session token refreshed mid-export");
        self.last_refresh = Instant::now();
        Ok(())
    }

    /// Top the window back up to `depth`.
    async fn refill(&mut self) -> ProtoResult<()> {
        while !self.draining && self.pending.len() < self.depth {
            let request_id = self.conn.send_method(&MethodCall::Next).await?;
            self.pending.push_back(request_id);
        }
        Ok(())
    }

    /// Record a received frame: update termination state and buffer it for
    /// emission when it falls inside the range.
    fn accept(&mut self, frame: Frame) {
        if frame.payload.is_empty() {
            // Frame-less answer: nothing (more) recorded here
            self.draining = true;
            return;
        }
        if frame.is_last() || frame.current_ts_ms >= self.range.end_ms {
            self.draining = true;
        }
        if frame.current_ts_ms <= self.range.end_ms {
            self.ready.push_back(frame);
        }
    }
}

fn out_of_order(expected: u32, got: u32) -> ProtoError {
    ProtoError::unexpected_status(format!(
        "out-of-order response: expected request id {expected}, got {got}"
    ))
}
