//! Final file assembly.
//!
//! Runs only on the success path, after the scheduler has verified every
//! piece: streams the scratch files into the output in index order and
//! unlinks each one as it is consumed.
use super::piece::{scratch_path, PieceSpec};
use super::DownloadError;
use super::DownloadResult;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Concatenates `<output>.0 .. <output>.N-1` into `output`.
///
/// A scratch file that does not supply exactly its piece's length means the
/// scheduler's completion predicate was violated; that surfaces as
/// [`DownloadError::Assemble`] rather than silently producing a bad file.
#[instrument(level = "debug", skip(pieces))]
pub async fn assemble(output: &Path, pieces: &[PieceSpec]) -> DownloadResult<()> {
    let mut out = tokio::fs::File::create(output).await?;
    for piece in pieces {
        let path = scratch_path(output, piece.index);
        let bytes = tokio::fs::read(&path).await?;
        if bytes.len() != piece.length {
            return Err(DownloadError::Assemble { index: piece.index });
        }
        out.write_all(&bytes).await?;
        tokio::fs::remove_file(&path).await?;
    }
    out.flush().await?;
    Ok(())
}
