//! Parallel piece-download scheduler.
//!
//! One worker task per peer address, all pulling piece descriptors from a
//! shared MPMC queue. A worker owns its peer connection and its scratch
//! writes exclusively; the orchestrator owns the queue, the worker pool and
//! the `done` set. A worker that hits any fatal error hands its in-flight
//! piece back to the queue tail and exits; the orchestrator declares the
//! download failed only when the pool is empty with pieces still missing,
//! so every piece is eventually produced or the failure is reported.
use crate::peer::connection::PeerConnection;
use crate::peer::PeerError;
use crate::torrent::file::TorrentFile;
use crate::torrent::TorrentError;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::instrument;

pub mod assemble;
pub mod piece;

use piece::PieceSpec;

/// Block requests pipelined per batch on one connection.
const PIPELINE_DEPTH: usize = 5;

/// How often the orchestrator re-checks piece completion and worker
/// liveness while nothing else wakes it.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("piece {index} failed hash verification")]
    HashMismatch { index: usize },

    #[error("download failed: {remaining} pieces remain and no workers are alive")]
    Failed { remaining: usize },

    #[error("assembling piece {index}: scratch file does not match its piece")]
    Assemble { index: usize },

    #[error("piece index {0} is out of range")]
    InvalidPieceIndex(usize),

    #[error("no peers available")]
    NoPeers,

    #[error("work queue closed")]
    QueueClosed,
}

pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// What travels on the work queue: a piece to fetch, or the shutdown
/// sentinel the orchestrator enqueues once per worker at termination.
enum WorkItem {
    Piece(PieceSpec),
    Shutdown,
}

/// Coordinates a pool of peer workers against a queue of pieces.
pub struct Downloader {
    torrent: Arc<TorrentFile>,
    peers: Vec<SocketAddr>,
    peer_id: [u8; 20],
}

impl Downloader {
    pub fn new(
        torrent: TorrentFile,
        peers: Vec<SocketAddr>,
        peer_id: [u8; 20],
    ) -> DownloadResult<Self> {
        if peers.is_empty() {
            return Err(DownloadError::NoPeers);
        }
        Ok(Self {
            torrent: Arc::new(torrent),
            peers,
            peer_id,
        })
    }

    /// Downloads the whole torrent and assembles it at `output`.
    #[instrument(level = "debug", skip(self))]
    pub async fn download(&self, output: &Path) -> DownloadResult<()> {
        self.torrent.single_file_length()?;
        let pieces = PieceSpec::all(&self.torrent);
        self.run_scheduler(pieces.clone(), output).await?;
        assemble::assemble(output, &pieces).await
    }

    /// Downloads a single piece to `output`.
    #[instrument(level = "debug", skip(self))]
    pub async fn download_piece(&self, index: usize, output: &Path) -> DownloadResult<()> {
        let spec = PieceSpec::for_index(&self.torrent, index)
            .ok_or(DownloadError::InvalidPieceIndex(index))?;
        self.run_scheduler(vec![spec], output).await?;
        tokio::fs::rename(piece::scratch_path(output, index), output).await?;
        Ok(())
    }

    /// The scheduler main loop.
    ///
    /// Seeds the queue, spawns one worker per peer, then alternates between
    /// polling piece completion (scratch file presence + size + hash) and
    /// reaping dead workers. Terminates with success when every piece is
    /// done, or with [`DownloadError::Failed`] when the pool drains first.
    /// Either way, every worker is woken with a sentinel and joined before
    /// returning.
    async fn run_scheduler(&self, pieces: Vec<PieceSpec>, output: &Path) -> DownloadResult<()> {
        let (tx, rx) = kanal::unbounded_async::<WorkItem>();
        for spec in &pieces {
            tx.send(WorkItem::Piece(spec.clone()))
                .await
                .map_err(|_| DownloadError::QueueClosed)?;
        }

        let mut workers: JoinSet<DownloadResult<()>> = JoinSet::new();
        for &addr in &self.peers {
            workers.spawn(run_worker(
                addr,
                Arc::clone(&self.torrent),
                self.peer_id,
                output.to_path_buf(),
                rx.clone(),
                tx.clone(),
            ));
        }

        let mut done = vec![false; pieces.len()];
        let result = loop {
            for (slot, spec) in pieces.iter().enumerate() {
                if !done[slot] && piece::is_complete(output, spec).await {
                    tracing::debug!(index = spec.index, "piece complete");
                    done[slot] = true;
                }
            }

            if done.iter().all(|&d| d) {
                break Ok(());
            }
            if workers.is_empty() {
                let remaining = done.iter().filter(|&&d| !d).count();
                break Err(DownloadError::Failed { remaining });
            }

            tokio::select! {
                joined = workers.join_next() => reap(joined),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        };

        // Wake every remaining worker so it can exit, then join the pool.
        for _ in 0..workers.len() {
            let _ = tx.send(WorkItem::Shutdown).await;
        }
        while let Some(joined) = workers.join_next().await {
            reap(Some(joined));
        }

        result
    }
}

/// Logs a reaped worker's fate. Worker errors are expected events (a flaky
/// peer must not kill the download), so they surface on stderr and in the
/// final `Failed` accounting instead of propagating.
fn reap(joined: Option<Result<DownloadResult<()>, tokio::task::JoinError>>) {
    match joined {
        Some(Ok(Err(error))) => tracing::warn!(%error, "worker exited with error"),
        Some(Err(join_error)) => tracing::error!(%join_error, "worker task aborted"),
        Some(Ok(Ok(()))) | None => {}
    }
}

/// The worker loop: one peer connection, pieces taken from the queue until
/// a sentinel or a fatal error.
async fn run_worker(
    addr: SocketAddr,
    torrent: Arc<TorrentFile>,
    peer_id: [u8; 20],
    output: PathBuf,
    rx: kanal::AsyncReceiver<WorkItem>,
    tx: kanal::AsyncSender<WorkItem>,
) -> DownloadResult<()> {
    let mut connection = PeerConnection::connect(addr, torrent.info_hash, peer_id).await?;
    tracing::debug!(%addr, "worker connected");

    loop {
        let item = match rx.recv().await {
            Ok(item) => item,
            Err(_) => break, // queue closed; nothing left to do
        };
        let spec = match item {
            WorkItem::Shutdown => break,
            WorkItem::Piece(spec) => spec,
        };

        if let Err(error) = fetch_and_store(&mut connection, &spec, &output).await {
            // Hand the piece back to the tail so another worker retries it
            // before this peer would get a second chance.
            let _ = tx.send(WorkItem::Piece(spec)).await;
            return Err(error);
        }
    }

    Ok(())
}

/// Fetches one piece over the connection, verifies it and stages it in its
/// scratch file.
async fn fetch_and_store(
    connection: &mut PeerConnection,
    spec: &PieceSpec,
    output: &Path,
) -> DownloadResult<()> {
    let requests = spec.block_requests();
    let mut blocks = Vec::with_capacity(requests.len());
    for batch in requests.chunks(PIPELINE_DEPTH) {
        blocks.extend(connection.fetch_blocks(batch).await?);
    }

    blocks.sort_by_key(|block| block.begin);
    let mut assembled = Vec::with_capacity(spec.length);
    for block in &blocks {
        assembled.extend_from_slice(&block.block);
    }

    if !spec.matches(&assembled) {
        return Err(DownloadError::HashMismatch { index: spec.index });
    }

    tokio::fs::write(piece::scratch_path(output, spec.index), &assembled).await?;
    tracing::debug!(index = spec.index, length = spec.length, "piece staged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::testing;
    use crate::torrent::file::{InfoDict, TorrentFile};
    use crate::BLOCK_SIZE;
    use sha1::{Digest, Sha1};

    const INFO_HASH: [u8; 20] = [0x5A; 20];
    const PEER_ID: [u8; 20] = *b"-SG0001-schedulertst";

    /// Builds an in-memory torrent over `data` with the given piece length,
    /// using a fixed info hash (the fake seeder echoes whatever hash it was
    /// given, so the real dictionary digest is irrelevant here).
    fn torrent_over(data: &[u8], piece_length: usize) -> TorrentFile {
        let pieces_hash: Vec<[u8; 20]> = data
            .chunks(piece_length)
            .map(|chunk| Sha1::digest(chunk).into())
            .collect();
        let pieces: Vec<u8> = pieces_hash.iter().flatten().copied().collect();
        TorrentFile {
            announce: "http://tracker.invalid/announce".to_string(),
            info: InfoDict {
                name: "blob.bin".to_string(),
                piece_length: piece_length as i64,
                pieces,
                length: Some(data.len() as i64),
                files: Vec::new(),
            },
            info_hash: INFO_HASH,
            pieces_hash,
        }
    }

    fn test_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 257) as u8).collect()
    }

    #[tokio::test]
    async fn downloads_a_three_piece_file() {
        let piece_length = BLOCK_SIZE * 2;
        let data = test_data(piece_length * 2 + 1000);
        let torrent = torrent_over(&data, piece_length);
        let addr = testing::spawn_seeder(data.clone(), piece_length, INFO_HASH, false).await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("blob.bin");
        let downloader = Downloader::new(torrent, vec![addr], PEER_ID).unwrap();
        downloader.download(&output).await.unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), data);
        for index in 0..3 {
            assert!(!piece::scratch_path(&output, index).exists());
        }
    }

    #[tokio::test]
    async fn download_survives_a_dead_peer_in_the_pool() {
        let piece_length = BLOCK_SIZE;
        let data = test_data(piece_length + 50);
        let torrent = torrent_over(&data, piece_length);
        let dead = testing::spawn_dead_peer().await;
        let good = testing::spawn_seeder(data.clone(), piece_length, INFO_HASH, false).await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("blob.bin");
        let downloader = Downloader::new(torrent, vec![dead, good], PEER_ID).unwrap();
        downloader.download(&output).await.unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), data);
    }

    #[tokio::test]
    async fn corrupting_peer_exhausts_the_pool() {
        let piece_length = BLOCK_SIZE;
        let data = test_data(piece_length);
        let torrent = torrent_over(&data, piece_length);
        let addr = testing::spawn_seeder(data.clone(), piece_length, INFO_HASH, true).await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("blob.bin");
        let downloader = Downloader::new(torrent, vec![addr], PEER_ID).unwrap();

        assert!(matches!(
            downloader.download(&output).await,
            Err(DownloadError::Failed { remaining: 1 })
        ));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn downloads_a_single_piece() {
        let piece_length = BLOCK_SIZE;
        let data = test_data(piece_length * 2 + 333);
        let torrent = torrent_over(&data, piece_length);
        let addr = testing::spawn_seeder(data.clone(), piece_length, INFO_HASH, false).await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("piece-2");
        let downloader = Downloader::new(torrent, vec![addr], PEER_ID).unwrap();
        downloader.download_piece(2, &output).await.unwrap();

        assert_eq!(
            tokio::fs::read(&output).await.unwrap(),
            &data[piece_length * 2..]
        );
    }

    #[tokio::test]
    async fn rejects_out_of_range_piece_index() {
        let data = test_data(64);
        let torrent = torrent_over(&data, 64);
        let addr = testing::spawn_seeder(data, 64, INFO_HASH, false).await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("piece-9");
        let downloader = Downloader::new(torrent, vec![addr], PEER_ID).unwrap();
        assert!(matches!(
            downloader.download_piece(9, &output).await,
            Err(DownloadError::InvalidPieceIndex(9))
        ));
    }

    #[test]
    fn empty_peer_list_is_rejected() {
        let torrent = torrent_over(&test_data(64), 64);
        assert!(matches!(
            Downloader::new(torrent, Vec::new(), PEER_ID),
            Err(DownloadError::NoPeers)
        ));
    }
}
