//! TCP transport with one length-delimited connection per pair of ranks.

use super::{Transport, check_peer};
use crate::config::TransportConfig;
use async_trait::async_trait;
use bytes::Bytes;
use chorus_common::{ChorusError, ErrorContext, Result};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info};

type Reader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
type Writer = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

struct PeerLink {
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
}

/// A fully connected TCP mesh endpoint.
///
/// Connections are set up once by [`TcpTransport::establish`]: each rank
/// dials every lower rank and accepts a connection from every higher rank.
pub struct TcpTransport {
    rank: usize,
    size: usize,
    links: Vec<Option<PeerLink>>,
}

impl TcpTransport {
    /// Connect `rank` to every other address in `peers`.
    ///
    /// `listener` must already be bound to `peers[rank]` (or a port that
    /// peers were told about), so peers can dial in while this rank is still
    /// dialing out.
    pub async fn establish(
        rank: usize,
        listener: TcpListener,
        peers: &[SocketAddr],
        config: &TransportConfig,
    ) -> Result<Self> {
        let size = peers.len();
        if rank >= size {
            return Err(ChorusError::configuration_error(format!(
                "rank {} is outside a group of {} peers",
                rank, size
            )));
        }

        let (dialed, accepted) = tokio::try_join!(
            dial_lower_ranks(rank, peers, config),
            accept_higher_ranks(rank, size, &listener),
        )?;

        let mut streams: Vec<Option<TcpStream>> = (0..size).map(|_| None).collect();
        for (peer, stream) in dialed.into_iter().chain(accepted) {
            streams[peer] = Some(stream);
        }

        let links = streams
            .into_iter()
            .map(|stream| stream.map(|stream| split_link(stream, config.max_frame_bytes)))
            .collect();

        info!("rank {} connected to {} peers over tcp", rank, size - 1);
        Ok(Self { rank, size, links })
    }

    fn link(&self, peer: usize) -> Result<&PeerLink> {
        check_peer(self.rank, self.size, peer)?;
        self.links[peer].as_ref().ok_or_else(|| {
            ChorusError::communication_error(format!(
                "rank {} has no connection to rank {}",
                self.rank, peer
            ))
        })
    }
}

fn split_link(stream: TcpStream, max_frame_bytes: usize) -> PeerLink {
    let codec = || {
        LengthDelimitedCodec::builder()
            .max_frame_length(max_frame_bytes)
            .new_codec()
    };
    let (read_half, write_half) = stream.into_split();
    PeerLink {
        reader: Mutex::new(FramedRead::new(read_half, codec())),
        writer: Mutex::new(FramedWrite::new(write_half, codec())),
    }
}

async fn dial_lower_ranks(
    rank: usize,
    peers: &[SocketAddr],
    config: &TransportConfig,
) -> Result<Vec<(usize, TcpStream)>> {
    let mut streams = Vec::with_capacity(rank);
    for (peer, addr) in peers.iter().enumerate().take(rank) {
        let mut stream = connect_with_retry(*addr, config).await?;
        stream
            .set_nodelay(true)
            .with_communication_context(|| format!("set nodelay on link to rank {}", peer))?;
        stream
            .write_u32(rank as u32)
            .await
            .with_communication_context(|| format!("send handshake to rank {}", peer))?;
        debug!("rank {} dialed rank {} at {}", rank, peer, addr);
        streams.push((peer, stream));
    }
    Ok(streams)
}

async fn connect_with_retry(addr: SocketAddr, config: &TransportConfig) -> Result<TcpStream> {
    let mut attempt = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < config.connect_retries => {
                attempt += 1;
                debug!("connect to {} failed ({}), retry {}", addr, e, attempt);
                tokio::time::sleep(Duration::from_millis(config.retry_interval_ms)).await;
            }
            Err(e) => {
                return Err(ChorusError::communication_error_with_source(
                    format!("could not connect to {} after {} retries", addr, attempt),
                    e,
                ));
            }
        }
    }
}

async fn accept_higher_ranks(
    rank: usize,
    size: usize,
    listener: &TcpListener,
) -> Result<Vec<(usize, TcpStream)>> {
    let expected = size - rank - 1;
    let mut streams: Vec<(usize, TcpStream)> = Vec::with_capacity(expected);
    while streams.len() < expected {
        let (mut stream, remote) = listener
            .accept()
            .await
            .with_communication_context(|| format!("rank {} accepting peers", rank))?;
        let peer = stream
            .read_u32()
            .await
            .with_communication_context(|| format!("read handshake from {}", remote))?
            as usize;

        if peer <= rank || peer >= size {
            return Err(ChorusError::protocol_error(format!(
                "rank {} got handshake from unexpected rank {}",
                rank, peer
            )));
        }
        if streams.iter().any(|(seen, _)| *seen == peer) {
            return Err(ChorusError::protocol_error(format!(
                "rank {} got a second connection from rank {}",
                rank, peer
            )));
        }
        stream
            .set_nodelay(true)
            .with_communication_context(|| format!("set nodelay on link to rank {}", peer))?;
        debug!("rank {} accepted rank {} from {}", rank, peer, remote);
        streams.push((peer, stream));
    }
    Ok(streams)
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn send(&self, to: usize, payload: Bytes) -> Result<()> {
        let link = self.link(to)?;
        let mut writer = link.writer.lock().await;
        writer
            .send(payload)
            .await
            .with_communication_context(|| format!("send from rank {} to rank {}", self.rank, to))
    }

    async fn receive(&self, from: usize) -> Result<Bytes> {
        let link = self.link(from)?;
        let mut reader = link.reader.lock().await;
        match reader.next().await {
            Some(frame) => frame.map(|bytes| bytes.freeze()).with_communication_context(|| {
                format!("receive on rank {} from rank {}", self.rank, from)
            }),
            None => Err(ChorusError::communication_error(format!(
                "rank {} closed its connection to rank {}",
                from, self.rank
            ))),
        }
    }
}
