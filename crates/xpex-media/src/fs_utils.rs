//! Filesystem helpers for atomic output placement.

use std::path::Path;
use tokio::fs;

use crate::error::EncoderResult;

/// Promote a finished part-file to its final name.
///
/// The encoder writes to a `.part` path in the destination directory, so
/// the rename is atomic on the destination filesystem and a download can
/// never observe a half-written MP4.
pub async fn promote(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> EncoderResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    fs::rename(src, dst).await?;
    Ok(())
}

/// Best-effort removal of an abandoned part-file.
pub async fn discard(path: impl AsRef<Path>) {
    let path = path.as_ref();
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
