//! FFmpeg pipe: stdin as the frame sink, a file path as the output.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{EncoderError, EncoderResult};

/// Nominal framerate for the JPEG image sequence mode.
///
/// Inter-frame timing is not reconstructed from frame timestamps in this
/// mode; the sequence is muxed at this fixed rate.
pub const DEFAULT_JPEG_FRAMERATE: u32 = 15;

/// Keep this many trailing stderr lines for error reports.
const STDERR_RING_LINES: usize = 32;

/// How the incoming frames are muxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderMode {
    /// Raw H.264 Annex-B input, stream copy into MP4. No decode, no
    /// re-encode.
    H264Passthrough,
    /// Concatenated JPEG frames, encoded to H.264 at a nominal framerate.
    JpegSequence { framerate: u32 },
}

impl EncoderMode {
    fn args(&self, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), "error".into()];
        match self {
            EncoderMode::H264Passthrough => {
                args.extend(["-f".into(), "h264".into(), "-i".into(), "pipe:0".into()]);
                args.extend(["-c:v".into(), "copy".into()]);
            }
            EncoderMode::JpegSequence { framerate } => {
                args.extend([
                    "-f".into(),
                    "image2pipe".into(),
                    "-framerate".into(),
                    framerate.to_string(),
                    "-i".into(),
                    "pipe:0".into(),
                ]);
                args.extend([
                    "-c:v".into(),
                    "libx264".into(),
                    "-pix_fmt".into(),
                    "yuv420p".into(),
                    "-preset".into(),
                    "fast".into(),
                ]);
            }
        }
        args.extend(["-movflags".into(), "+faststart".into()]);
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

/// A running encoder process.
///
/// Write-only from the exporter's side; stderr is drained into a bounded
/// ring so a failure report can carry the encoder's last words. The child
/// is spawned with `kill_on_drop`, so dropping the pipe (worker panic,
/// cancellation race) cannot leave a zombie process behind.
#[derive(Debug)]
pub struct EncoderPipe {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: JoinHandle<Vec<String>>,
    output: PathBuf,
}

impl EncoderPipe {
    /// Spawn FFmpeg in the given mode, writing to `output`.
    pub fn spawn(mode: EncoderMode, output: impl AsRef<Path>) -> EncoderResult<Self> {
        Self::spawn_program("ffmpeg", mode, output)
    }

    /// Spawn a specific encoder program. Production uses [`Self::spawn`];
    /// tests substitute a stub sink here.
    pub fn spawn_program(
        program: &str,
        mode: EncoderMode,
        output: impl AsRef<Path>,
    ) -> EncoderResult<Self> {
        let program = which::which(program).map_err(|_| EncoderError::FfmpegNotFound)?;
        let output = output.as_ref().to_path_buf();
        let args = mode.args(&output);

        debug!(program = %program.display(), args = ?args, "Spawning encoder");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EncoderError::spawn_failed(format!("{}: {}", program.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::spawn_failed("encoder stdin not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EncoderError::spawn_failed("encoder stderr not captured"))?;

        // Drain stderr into a bounded ring; an unread pipe would stall the
        // encoder once the kernel buffer fills.
        let stderr_task = tokio::spawn(async move {
            let mut ring = std::collections::VecDeque::with_capacity(STDERR_RING_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if ring.len() == STDERR_RING_LINES {
                    ring.pop_front();
                }
                ring.push_back(line);
            }
            ring.into_iter().collect()
        });

        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_task,
            output,
        })
    }

    /// Path the encoder writes to.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Feed one frame payload to the encoder.
    ///
    /// The OS pipe is bounded; when the encoder falls behind, this write
    /// blocks and backpressure propagates to the frame producer.
    pub async fn write_frame(&mut self, payload: &[u8]) -> EncoderResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncoderError::spawn_failed("encoder stdin already closed"))?;
        stdin.write_all(payload).await?;
        Ok(())
    }

    /// Close stdin and wait for the encoder to finish the file.
    pub async fn finish(mut self) -> EncoderResult<()> {
        drop(self.stdin.take());
        let status = self.child.wait().await?;
        let stderr_tail = self.stderr_task.await.unwrap_or_default().join("\n");

        if status.success() {
            Ok(())
        } else {
            Err(EncoderError::NonZeroExit {
                code: status.code(),
                stderr_tail,
            })
        }
    }

    /// Kill the encoder and wait for it to exit. Used on cancellation and
    /// on failures where the output is being discarded.
    pub async fn abort(mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill encoder: {}", e);
        }
        let _ = self.child.wait().await;
        self.stderr_task.abort();
    }
}
