//! The export facade and its per-job worker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{error, info, warn};

use xpex_imageserver::codec::{strip_generic_header, MethodCall};
use xpex_imageserver::{Connection, FramePipeline, PipelineConfig, ProtoError};
use xpex_media::{fs_utils, EncoderMode, EncoderPipe, DEFAULT_JPEG_FRAMERATE};
use xpex_milestone::{AuthBroker, ConfigClient};
use xpex_models::{
    CameraId, CodecKind, ExportId, ExportJob, Frame, TimeRange, MAX_EXPORT_RANGE_MS,
};

use crate::error::{ExportError, ExportResult};
use crate::registry::ExportRegistry;

/// Exporter tuning. Everything has a production default; tests and the
/// binary override from the environment.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Directory receiving `{export_id}.mp4` files
    pub export_dir: PathBuf,
    /// In-flight `next` window depth
    pub pipeline_depth: usize,
    /// Connect/read timeout on the ImageServer socket
    pub io_timeout: Duration,
    /// Maximum export range in milliseconds
    pub max_range_ms: i64,
    /// Nominal framerate for the JPEG fallback mux
    pub jpeg_framerate: u32,
    /// Concurrently running export workers
    pub max_concurrent: usize,
    /// Encoder binary; tests substitute a stub sink
    pub encoder_program: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("./exports"),
            pipeline_depth: 8,
            io_timeout: Duration::from_secs(30),
            max_range_ms: MAX_EXPORT_RANGE_MS,
            jpeg_framerate: DEFAULT_JPEG_FRAMERATE,
            max_concurrent: 4,
            encoder_program: "ffmpeg".to_string(),
        }
    }
}

/// Facade over the whole export pipeline.
///
/// `start` validates and registers a job, then hands it to a dedicated
/// worker task; all further I/O for that job is strictly sequential on its
/// own connection. The broker and registry are the only shared state.
#[derive(Clone)]
pub struct Exporter {
    auth: Arc<AuthBroker>,
    config: Arc<ConfigClient>,
    registry: ExportRegistry,
    settings: Arc<ExportSettings>,
    permits: Arc<Semaphore>,
    cancels: Arc<Mutex<HashMap<ExportId, watch::Sender<bool>>>>,
}

impl Exporter {
    pub fn new(
        auth: Arc<AuthBroker>,
        config: Arc<ConfigClient>,
        registry: ExportRegistry,
        settings: ExportSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            auth,
            config,
            registry,
            settings: Arc::new(settings),
            permits,
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &ExportRegistry {
        &self.registry
    }

    /// Register an export and spawn its worker. Returns immediately with
    /// the job id; outcome and progress are read via [`Self::status`].
    pub async fn start(&self, camera_id: CameraId, range: TimeRange) -> ExportResult<ExportId> {
        if range.exceeds(self.settings.max_range_ms) {
            return Err(ExportError::RangeTooLarge {
                requested_ms: range.duration_ms(),
                max_ms: self.settings.max_range_ms,
            });
        }

        let job = ExportJob::new(camera_id.clone(), range);
        let id = job.id.clone();
        self.registry.insert(job).await;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels.lock().await.insert(id.clone(), cancel_tx);

        info!(export_id = %id, camera_id = %camera_id, "Export queued");

        let worker = self.clone();
        let worker_id = id.clone();
        tokio::spawn(async move {
            worker.run_worker(worker_id, camera_id, range, cancel_rx).await;
        });

        Ok(id)
    }

    /// Snapshot of one job.
    pub async fn status(&self, id: &ExportId) -> Option<ExportJob> {
        self.registry.get(id).await
    }

    /// Output path once the job has succeeded.
    pub async fn output_path(&self, id: &ExportId) -> Option<PathBuf> {
        self.registry.output_path(id).await
    }

    /// Signal a running export to stop. Returns whether a cancellable job
    /// existed. Best-effort: the worker closes its connection and reaps the
    /// encoder before the job reaches its terminal state.
    pub async fn cancel(&self, id: &ExportId) -> bool {
        match self.cancels.lock().await.get(id) {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    async fn run_worker(
        self,
        id: ExportId,
        camera_id: CameraId,
        range: TimeRange,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        self.registry.update(&id, |job| job.start()).await;

        let result = self.run_export(&id, &camera_id, range, &mut cancel_rx).await;

        match result {
            Ok(output) => {
                info!(export_id = %id, output = %output.display(), "Export succeeded");
                self.registry.update(&id, |job| job.complete(output)).await;
            }
            Err(e) => {
                let tag = e.tag();
                if matches!(e, ExportError::Cancelled) {
                    info!(export_id = %id, "Export cancelled");
                } else {
                    error!(export_id = %id, tag, "Export failed: {}", e);
                }
                self.registry
                    .update(&id, |job| job.fail(tag, e.to_string()))
                    .await;
            }
        }

        self.cancels.lock().await.remove(&id);
    }

    async fn run_export(
        &self,
        id: &ExportId,
        camera_id: &CameraId,
        range: TimeRange,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> ExportResult<PathBuf> {
        let (host, port) = self.config.resolve_recorder(camera_id).await?;
        let token = self.auth.imageserver_token().await?;
        let refresh_interval = self.auth.soap_ttl().await / 2;

        let mut frames_written: u64 = 0;
        let mut conn = self.open_session(&host, port, camera_id, &token).await?;

        let mut result = self
            .stream_range(&mut conn, id, range, refresh_interval, cancel_rx, &mut frames_written)
            .await;

        // One reconnect attempt, and only before the first frame reached
        // the encoder: a retry after that would break timestamp ordering.
        let broke_early = frames_written == 0
            && matches!(
                result,
                Err(ExportError::Proto(ProtoError::ConnectionBroken))
            );
        if broke_early {
            warn!(export_id = %id, "Connection broke before the first frame, reconnecting once");
            conn.close().await;
            let token = self.auth.imageserver_token().await?;
            conn = self.open_session(&host, port, camera_id, &token).await?;
            result = self
                .stream_range(&mut conn, id, range, refresh_interval, cancel_rx, &mut frames_written)
                .await;
        }

        if conn.is_open() {
            let _ = conn.send_method(&MethodCall::Disconnect).await;
        }
        conn.close().await;

        result
    }

    /// Open the socket and perform the `connect` handshake, requesting raw
    /// codec mode.
    async fn open_session(
        &self,
        host: &str,
        port: u16,
        camera_id: &CameraId,
        token: &str,
    ) -> ExportResult<Connection> {
        let mut conn = Connection::open(host, port, self.settings.io_timeout).await?;
        conn.send_method(&MethodCall::Connect {
            camera_id: camera_id.as_str(),
            token,
            always_std_jpeg: false,
        })
        .await?;

        let response = conn.read_xml_response().await?;
        if !response.is_success() {
            return Err(response.failure().into());
        }
        Ok(conn)
    }

    /// Seek, classify, and pump frames into the encoder.
    async fn stream_range(
        &self,
        conn: &mut Connection,
        id: &ExportId,
        range: TimeRange,
        refresh_interval: Duration,
        cancel_rx: &mut watch::Receiver<bool>,
        frames_written: &mut u64,
    ) -> ExportResult<PathBuf> {
        let pipeline_config = PipelineConfig {
            depth: self.settings.pipeline_depth,
            refresh_interval: Some(refresh_interval),
        };
        let mut pipeline = FramePipeline::seek(conn, range, pipeline_config).await?;

        // The first frame decides the mux mode. A server that ignores
        // alwaysstdjpeg=no simply lands us in JPEG mode, no reconnect.
        let first = match next_or_cancel(&mut pipeline, cancel_rx).await? {
            Some(frame) => frame,
            None => return Err(ExportError::NoRecordingInRange),
        };

        let codec = CodecKind::classify(&first.content_type, &first.payload);
        let mode = match codec {
            CodecKind::RawH264 => EncoderMode::H264Passthrough,
            CodecKind::Jpeg => EncoderMode::JpegSequence {
                framerate: self.settings.jpeg_framerate,
            },
            CodecKind::Unsupported(codec_id) => {
                return Err(ProtoError::UnsupportedCodec(codec_id).into())
            }
        };
        info!(export_id = %id, ?codec, first_ts = first.current_ts_ms, "First frame classified");

        tokio::fs::create_dir_all(&self.settings.export_dir).await?;
        let part_path = self.settings.export_dir.join(format!("{id}.mp4.part"));
        let mut encoder =
            EncoderPipe::spawn_program(&self.settings.encoder_program, mode, &part_path)?;

        let streamed: ExportResult<()> = self
            .pump_frames(
                &mut pipeline,
                &mut encoder,
                codec,
                first,
                id,
                range,
                cancel_rx,
                frames_written,
            )
            .await;

        match streamed {
            Ok(()) => {
                encoder.finish().await?;
                let final_path = self.settings.export_dir.join(format!("{id}.mp4"));
                fs_utils::promote(&part_path, &final_path).await?;
                Ok(final_path)
            }
            Err(e) => {
                if matches!(e, ExportError::Cancelled) || *frames_written == 0 {
                    // Nothing worth keeping
                    encoder.abort().await;
                    fs_utils::discard(&part_path).await;
                } else if let Err(finish_err) = encoder.finish().await {
                    // Failed mid-stream: let the encoder finalize what it
                    // has; the part-file stays on disk for inspection but
                    // is never downloadable.
                    warn!(export_id = %id, "Encoder did not finalize partial output: {}", finish_err);
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump_frames(
        &self,
        pipeline: &mut FramePipeline<'_>,
        encoder: &mut EncoderPipe,
        codec: CodecKind,
        first: Frame,
        id: &ExportId,
        range: TimeRange,
        cancel_rx: &mut watch::Receiver<bool>,
        frames_written: &mut u64,
    ) -> ExportResult<()> {
        let mut frame = Some(first);
        loop {
            let current = match frame.take() {
                Some(frame) => frame,
                None => match next_or_cancel(pipeline, cancel_rx).await? {
                    Some(frame) => frame,
                    None => return Ok(()),
                },
            };

            let payload: &[u8] = match codec {
                CodecKind::RawH264 => strip_generic_header(&current.payload)?,
                CodecKind::Jpeg => &current.payload,
                CodecKind::Unsupported(codec_id) => {
                    return Err(ProtoError::UnsupportedCodec(codec_id).into())
                }
            };

            encoder.write_frame(payload).await?;
            *frames_written += 1;

            let progress = range.progress_at(current.current_ts_ms);
            let frames = *frames_written;
            self.registry
                .update(id, |job| job.with_progress(progress, frames))
                .await;

            // Session token refresh rides between frame slots, never
            // pipelined with image requests
            if pipeline.needs_refresh() {
                let fresh = self.auth.renew_imageserver_token().await?;
                pipeline.refresh(&fresh).await?;
            }
        }
    }
}

/// Wait for the next frame, racing the cancel signal.
async fn next_or_cancel(
    pipeline: &mut FramePipeline<'_>,
    cancel_rx: &mut watch::Receiver<bool>,
) -> ExportResult<Option<Frame>> {
    if *cancel_rx.borrow() {
        return Err(ExportError::Cancelled);
    }
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    return Err(ExportError::Cancelled);
                }
            }
            frame = pipeline.next_frame() => return Ok(frame?),
        }
    }
}
