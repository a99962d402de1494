//! `sget` — single-torrent BitTorrent downloader.
//!
//! Thin dispatch layer: parses the command line, wires the library
//! subsystems together and prints their results. All protocol logic lives
//! in the library crate.
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use swarmget::bencode;
use swarmget::download::Downloader;
use swarmget::peer::connection::PeerConnection;
use swarmget::torrent::file::TorrentFile;
use swarmget::torrent::magnet::MagnetLink;
use swarmget::tracker::Client;
use swarmget::DEFAULT_PORT;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a bencoded string and print it as JSON
    Decode { value: String },
    /// Print the metainfo of a torrent file
    Info { torrent: PathBuf },
    /// Ask the tracker for peers and print one address per line
    Peers { torrent: PathBuf },
    /// Handshake with one peer and print its peer id
    Handshake { torrent: PathBuf, peer: SocketAddr },
    /// Download a single verified piece
    #[clap(name = "download_piece")]
    DownloadPiece {
        #[arg(short)]
        output: Option<PathBuf>,
        torrent: PathBuf,
        piece: usize,
    },
    /// Download the whole file
    Download {
        #[arg(short)]
        output: Option<PathBuf>,
        torrent: PathBuf,
    },
    /// Parse a magnet link and print its tracker and info hash
    #[clap(name = "magnet_parse")]
    MagnetParse { link: String },
}

fn load_torrent(path: &PathBuf) -> anyhow::Result<TorrentFile> {
    TorrentFile::from_path(path)
        .with_context(|| format!("parse torrent file {}", path.display()))
}

async fn discover_peers(
    client: &Client,
    torrent: &TorrentFile,
) -> anyhow::Result<Vec<SocketAddr>> {
    let response = client.announce(torrent).await.context("query tracker")?;
    Ok(response.peers.iter().map(|peer| peer.addr()).collect())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Decode { value } => {
            let decoded = bencode::decode_bytes(value.as_bytes()).context("decode value")?;
            println!("{}", decoded.to_json());
        }
        Command::Info { torrent } => {
            let torrent = load_torrent(&torrent)?;
            println!("Tracker URL: {}", torrent.announce);
            println!("Length: {}", torrent.total_length());
            println!("Info Hash: {}", hex::encode(torrent.info_hash));
            println!("Piece Length: {}", torrent.info.piece_length);
            println!("Piece Hashes:");
            for hash in &torrent.pieces_hash {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { torrent } => {
            let torrent = load_torrent(&torrent)?;
            let client = Client::new(DEFAULT_PORT);
            let response = client.announce(&torrent).await.context("query tracker")?;
            for peer in &response.peers {
                println!("{}", peer);
            }
        }
        Command::Handshake { torrent, peer } => {
            let torrent = load_torrent(&torrent)?;
            let client = Client::new(DEFAULT_PORT);
            let connection =
                PeerConnection::handshake_only(peer, torrent.info_hash, client.peer_id())
                    .await
                    .context("handshake with peer")?;
            println!("Peer ID: {}", hex::encode(connection.peer_id()));
        }
        Command::DownloadPiece {
            output,
            torrent,
            piece,
        } => {
            let output = output.unwrap_or_else(|| PathBuf::from(format!("piece-{}", piece)));
            let torrent = load_torrent(&torrent)?;
            let client = Client::new(DEFAULT_PORT);
            let peers = discover_peers(&client, &torrent).await?;
            let downloader = Downloader::new(torrent, peers, client.peer_id())?;
            downloader
                .download_piece(piece, &output)
                .await
                .context("download piece")?;
            println!("Piece {} downloaded to {}.", piece, output.display());
        }
        Command::Download { output, torrent } => {
            let torrent_path = torrent;
            let torrent = load_torrent(&torrent_path)?;
            let output = output.unwrap_or_else(|| PathBuf::from(&torrent.info.name));
            let client = Client::new(DEFAULT_PORT);
            let peers = discover_peers(&client, &torrent).await?;
            let downloader = Downloader::new(torrent, peers, client.peer_id())?;
            downloader.download(&output).await.context("download")?;
            println!(
                "Downloaded {} to {}.",
                torrent_path.display(),
                output.display()
            );
        }
        Command::MagnetParse { link } => {
            let magnet = MagnetLink::parse(&link).context("parse magnet link")?;
            if let Some(tracker) = &magnet.tracker {
                println!("Tracker URL: {}", tracker);
            }
            println!("Info Hash: {}", magnet.info_hash_hex());
        }
    }
    Ok(())
}
