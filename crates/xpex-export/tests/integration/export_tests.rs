//! End-to-end export scenarios against the scripted mocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use xpex_export::{ExportRegistry, ExportSettings, Exporter};
use xpex_milestone::{build_http_client, AuthBroker, ConfigClient};
use xpex_models::{CameraId, ExportJob, ExportState, TimeRange};

use super::mock_imageserver::{
    generic_payload, h264_script, jpeg_script, jpeg_script_with_payload, MockFrame,
    MockImageServer, MockScript,
};
use super::mock_milestone::MockMilestone;

const T0: i64 = 1_705_320_000_000;
const ONE_HOUR_TTL_MICROS: u64 = 3_600_000_000;

/// Shell stub standing in for FFmpeg: records its argv next to the output
/// file and copies stdin into it.
fn stub_encoder(dir: &Path) -> String {
    let path = dir.join("stub-encoder.sh");
    std::fs::write(
        &path,
        "#!/bin/sh\nfor last; do :; done\nprintf '%s\\n' \"$*\" > \"${last}.args\"\ncat > \"$last\"\n",
    )
    .unwrap();

    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();

    path.to_string_lossy().into_owned()
}

struct Harness {
    exporter: Exporter,
    imageserver: MockImageServer,
    milestone: MockMilestone,
    export_dir: PathBuf,
    _tmp: TempDir,
}

async fn harness(script: MockScript, ttl_micros: u64) -> Harness {
    let tmp = TempDir::new().unwrap();
    let export_dir = tmp.path().join("exports");
    let encoder_program = stub_encoder(tmp.path());

    let imageserver = MockImageServer::spawn(script).await;
    let milestone = MockMilestone::spawn(imageserver.addr, ttl_micros).await;

    let http = build_http_client(true).unwrap();
    let auth = Arc::new(AuthBroker::new(
        http.clone(),
        milestone.base_url.clone(),
        "user",
        "pass",
    ));
    let config = Arc::new(ConfigClient::new(
        http,
        milestone.base_url.clone(),
        Arc::clone(&auth),
    ));

    let settings = ExportSettings {
        export_dir: export_dir.clone(),
        io_timeout: Duration::from_secs(5),
        encoder_program,
        ..ExportSettings::default()
    };
    let exporter = Exporter::new(auth, config, ExportRegistry::new(), settings);

    Harness {
        exporter,
        imageserver,
        milestone,
        export_dir,
        _tmp: tmp,
    }
}

async fn wait_terminal(exporter: &Exporter, id: &xpex_models::ExportId) -> ExportJob {
    for _ in 0..500 {
        if let Some(job) = exporter.status(id).await {
            if job.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("export {id} did not reach a terminal state");
}

fn encoder_args(export_dir: &Path, id: &xpex_models::ExportId) -> String {
    std::fs::read_to_string(export_dir.join(format!("{id}.mp4.part.args"))).unwrap_or_default()
}

#[tokio::test]
async fn test_happy_h264_export() {
    let script = MockScript {
        frames: h264_script(90, T0, 6_000),
        ..MockScript::default()
    };
    let h = harness(script, ONE_HOUR_TTL_MICROS).await;

    let range = TimeRange::new(T0, T0 + 6_000).unwrap();
    let id = h
        .exporter
        .start(CameraId::from("cam-1"), range)
        .await
        .unwrap();

    let job = wait_terminal(&h.exporter, &id).await;
    assert_eq!(job.state, ExportState::Succeeded, "error: {:?}", job.error);
    assert_eq!(job.frames_written, 90);
    assert_eq!(job.progress, 1.0);

    // Passthrough mode, not re-encoding
    let args = encoder_args(&h.export_dir, &id);
    assert!(args.contains("-f h264"), "args: {args}");
    assert!(args.contains("-c:v copy"), "args: {args}");

    // Each write was one stripped 7-byte Annex-B body
    let output = h.export_dir.join(format!("{id}.mp4"));
    let size = std::fs::metadata(&output).unwrap().len();
    assert_eq!(size, 90 * 7);

    // No part file left behind
    assert!(!h.export_dir.join(format!("{id}.mp4.part")).exists());
}

#[tokio::test]
async fn test_jpeg_fallback() {
    // The server ignores alwaysstdjpeg=no and returns JPEG anyway
    let script = MockScript {
        frames: jpeg_script(30, T0, 2_000),
        ..MockScript::default()
    };
    let h = harness(script, ONE_HOUR_TTL_MICROS).await;

    let range = TimeRange::new(T0, T0 + 2_000).unwrap();
    let id = h
        .exporter
        .start(CameraId::from("cam-1"), range)
        .await
        .unwrap();

    let job = wait_terminal(&h.exporter, &id).await;
    assert_eq!(job.state, ExportState::Succeeded, "error: {:?}", job.error);
    assert_eq!(job.frames_written, 30);

    // JPEG sequence mode without a reconnect: exactly one connect call
    let args = encoder_args(&h.export_dir, &id);
    assert!(args.contains("-f image2pipe"), "args: {args}");
    assert!(args.contains("libx264"), "args: {args}");
    let connects = h
        .imageserver
        .methods()
        .iter()
        .filter(|m| m.as_str() == "connect")
        .count();
    assert_eq!(connects, 1);
}

#[tokio::test]
async fn test_unsupported_codec_fails_before_encoder() {
    // First frame advertises HEVC
    let script = MockScript {
        frames: vec![MockFrame {
            ts_ms: T0,
            content_type: "application/x-genericbytedata-octet-stream".to_string(),
            payload: generic_payload(0x000E, &[0u8; 16]),
        }],
        ..MockScript::default()
    };
    let h = harness(script, ONE_HOUR_TTL_MICROS).await;

    let range = TimeRange::new(T0, T0 + 6_000).unwrap();
    let id = h
        .exporter
        .start(CameraId::from("cam-1"), range)
        .await
        .unwrap();

    let job = wait_terminal(&h.exporter, &id).await;
    assert_eq!(job.state, ExportState::Failed);
    assert_eq!(job.error_tag.as_deref(), Some("codec_unsupported"));
    assert!(job.error.unwrap().contains("0x000e"));

    // The encoder was never spawned and no output exists
    assert!(!h.export_dir.join(format!("{id}.mp4.part.args")).exists());
    assert!(!h.export_dir.join(format!("{id}.mp4")).exists());
}

#[tokio::test]
async fn test_missing_trailer_fails_export() {
    let script = MockScript {
        frames: h264_script(20, T0, 2_000),
        omit_trailer_at: Some(1),
        ..MockScript::default()
    };
    let h = harness(script, ONE_HOUR_TTL_MICROS).await;

    let range = TimeRange::new(T0, T0 + 2_000).unwrap();
    let id = h
        .exporter
        .start(CameraId::from("cam-1"), range)
        .await
        .unwrap();

    let job = wait_terminal(&h.exporter, &id).await;
    assert_eq!(job.state, ExportState::Failed);
    assert!(
        matches!(
            job.error_tag.as_deref(),
            Some("proto_missing_trailer") | Some("proto_bad_header")
        ),
        "tag: {:?}",
        job.error_tag
    );
    // The first frame made it through before the framing broke
    assert_eq!(job.frames_written, 1);
    assert!(!h.export_dir.join(format!("{id}.mp4")).exists());
}

#[tokio::test]
async fn test_token_refresh_mid_export() {
    // Tiny session TTL forces connectupdates while frames trickle in
    let script = MockScript {
        frames: h264_script(60, T0, 4_000),
        frame_delay: Duration::from_millis(5),
        ..MockScript::default()
    };
    let h = harness(script, 200_000).await; // 0.2 s TTL, 0.1 s refresh

    let range = TimeRange::new(T0, T0 + 4_000).unwrap();
    let id = h
        .exporter
        .start(CameraId::from("cam-1"), range)
        .await
        .unwrap();

    let job = wait_terminal(&h.exporter, &id).await;
    assert_eq!(job.state, ExportState::Succeeded, "error: {:?}", job.error);
    assert_eq!(job.frames_written, 60);

    let methods = h.imageserver.methods();
    let updates = methods.iter().filter(|m| m.as_str() == "connectupdate").count();
    assert!(updates >= 1, "methods: {methods:?}");
    // Each connectupdate carried a freshly issued token
    assert!(h.milestone.login_count() >= 2);
}

#[tokio::test]
async fn test_cancellation_mid_export() {
    // ~20 ms per frame: a 90-frame export runs for ~2 s
    let script = MockScript {
        frames: h264_script(90, T0, 6_000),
        frame_delay: Duration::from_millis(20),
        ..MockScript::default()
    };
    let h = harness(script, ONE_HOUR_TTL_MICROS).await;

    let range = TimeRange::new(T0, T0 + 6_000).unwrap();
    let id = h
        .exporter
        .start(CameraId::from("cam-1"), range)
        .await
        .unwrap();

    // Let roughly half the frames through, then cancel
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(h.exporter.cancel(&id).await);

    let job = wait_terminal(&h.exporter, &id).await;
    assert_eq!(job.state, ExportState::Failed);
    assert_eq!(job.error_tag.as_deref(), Some("cancelled"));
    assert!(job.frames_written < 90);

    // No zombie output: neither the final file nor the part file survives
    assert!(!h.export_dir.join(format!("{id}.mp4")).exists());
    assert!(!h.export_dir.join(format!("{id}.mp4.part")).exists());
}

#[tokio::test]
async fn test_no_recording_in_range() {
    let h = harness(MockScript::default(), ONE_HOUR_TTL_MICROS).await;

    let range = TimeRange::new(T0, T0 + 6_000).unwrap();
    let id = h
        .exporter
        .start(CameraId::from("cam-1"), range)
        .await
        .unwrap();

    let job = wait_terminal(&h.exporter, &id).await;
    assert_eq!(job.state, ExportState::Failed);
    assert_eq!(job.error_tag.as_deref(), Some("no_recording_in_range"));
}

#[tokio::test]
async fn test_reconnects_once_before_first_frame() {
    let script = MockScript {
        frames: h264_script(10, T0, 1_000),
        drop_goto_connections: 1,
        ..MockScript::default()
    };
    let h = harness(script, ONE_HOUR_TTL_MICROS).await;

    let range = TimeRange::new(T0, T0 + 1_000).unwrap();
    let id = h
        .exporter
        .start(CameraId::from("cam-1"), range)
        .await
        .unwrap();

    let job = wait_terminal(&h.exporter, &id).await;
    assert_eq!(job.state, ExportState::Succeeded, "error: {:?}", job.error);
    assert_eq!(job.frames_written, 10);

    let connects = h
        .imageserver
        .methods()
        .iter()
        .filter(|m| m.as_str() == "connect")
        .count();
    assert_eq!(connects, 2);
}

/// Full pipeline against a real FFmpeg: generate one genuine JPEG with
/// FFmpeg itself, replay it as the camera stream, and mux through the
/// image2pipe path.
#[tokio::test]
#[ignore]
async fn test_jpeg_export_with_real_ffmpeg() {
    let tmp = TempDir::new().unwrap();
    let jpeg_path = tmp.path().join("frame.jpg");
    let status = std::process::Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "lavfi",
            "-i",
            "testsrc=size=320x240:rate=1",
            "-frames:v",
            "1",
            &jpeg_path.to_string_lossy(),
        ])
        .status()
        .expect("ffmpeg not runnable");
    assert!(status.success());
    let jpeg = std::fs::read(&jpeg_path).unwrap();

    let script = MockScript {
        frames: jpeg_script_with_payload(30, T0, 2_000, &jpeg),
        ..MockScript::default()
    };

    // Same harness, but with the real encoder binary
    let export_dir = tmp.path().join("exports");
    let imageserver = MockImageServer::spawn(script).await;
    let milestone = MockMilestone::spawn(imageserver.addr, ONE_HOUR_TTL_MICROS).await;
    let http = build_http_client(true).unwrap();
    let auth = Arc::new(AuthBroker::new(
        http.clone(),
        milestone.base_url.clone(),
        "user",
        "pass",
    ));
    let config = Arc::new(ConfigClient::new(
        http,
        milestone.base_url.clone(),
        Arc::clone(&auth),
    ));
    let exporter = Exporter::new(
        auth,
        config,
        ExportRegistry::new(),
        ExportSettings {
            export_dir: export_dir.clone(),
            io_timeout: Duration::from_secs(5),
            ..ExportSettings::default()
        },
    );

    let range = TimeRange::new(T0, T0 + 2_000).unwrap();
    let id = exporter
        .start(CameraId::from("cam-1"), range)
        .await
        .unwrap();

    let job = wait_terminal(&exporter, &id).await;
    assert_eq!(job.state, ExportState::Succeeded, "error: {:?}", job.error);

    let output = export_dir.join(format!("{id}.mp4"));
    assert!(std::fs::metadata(&output).unwrap().len() > 0);
}
