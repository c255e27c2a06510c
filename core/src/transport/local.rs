//! In-process full-mesh transport over tokio channels.

use super::{Transport, check_peer};
use async_trait::async_trait;
use bytes::Bytes;
use chorus_common::{ChorusError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// One endpoint of an in-memory mesh created by [`LocalTransport::mesh`].
///
/// Every rank lives in the same process, which makes the mesh suitable for
/// tests and single-process simulation of a group.
pub struct LocalTransport {
    rank: usize,
    size: usize,
    outgoing: RwLock<Vec<Option<UnboundedSender<Bytes>>>>,
    incoming: Vec<Mutex<UnboundedReceiver<Bytes>>>,
}

impl LocalTransport {
    /// Create `size` fully connected endpoints, indexed by rank.
    pub fn mesh(size: usize) -> Vec<Arc<LocalTransport>> {
        let mut senders: Vec<Vec<Option<UnboundedSender<Bytes>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Mutex<UnboundedReceiver<Bytes>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();

        for from in 0..size {
            for to in 0..size {
                let (tx, rx) = mpsc::unbounded_channel();
                senders[from].push(Some(tx));
                receivers[to].push(Mutex::new(rx));
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outgoing, incoming))| {
                Arc::new(LocalTransport {
                    rank,
                    size,
                    outgoing: RwLock::new(outgoing),
                    incoming,
                })
            })
            .collect()
    }

    /// Drop every outgoing link, as if this rank had crashed.
    ///
    /// Peers waiting on this rank see their receive fail once they have
    /// drained what was already sent.
    pub fn disconnect(&self) {
        debug!("rank {} disconnecting from local mesh", self.rank);
        for link in self.outgoing.write().iter_mut() {
            *link = None;
        }
    }
}

impl fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransport")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn send(&self, to: usize, payload: Bytes) -> Result<()> {
        check_peer(self.rank, self.size, to)?;
        let link = self.outgoing.read()[to].clone();
        let link = link.ok_or_else(|| {
            ChorusError::communication_error(format!(
                "rank {} is disconnected from the mesh",
                self.rank
            ))
        })?;
        link.send(payload).map_err(|_| {
            ChorusError::communication_error(format!(
                "link from rank {} to rank {} is closed",
                self.rank, to
            ))
        })
    }

    async fn receive(&self, from: usize) -> Result<Bytes> {
        check_peer(self.rank, self.size, from)?;
        self.incoming[from].lock().await.recv().await.ok_or_else(|| {
            ChorusError::communication_error(format!(
                "link from rank {} to rank {} is closed",
                from, self.rank
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mesh_delivers_in_order() {
        let mesh = LocalTransport::mesh(3);
        assert_eq!(mesh[2].rank(), 2);
        assert_eq!(mesh[2].size(), 3);

        mesh[0].send(2, Bytes::from_static(b"a")).await.unwrap();
        mesh[0].send(2, Bytes::from_static(b"b")).await.unwrap();
        mesh[1].send(2, Bytes::from_static(b"c")).await.unwrap();

        assert_eq!(mesh[2].receive(1).await.unwrap(), Bytes::from_static(b"c"));
        assert_eq!(mesh[2].receive(0).await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(mesh[2].receive(0).await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_disconnect_closes_links() {
        let mesh = LocalTransport::mesh(2);
        mesh[1].send(0, Bytes::from_static(b"last")).await.unwrap();
        mesh[1].disconnect();

        assert!(mesh[1].send(0, Bytes::new()).await.is_err());
        assert_eq!(mesh[0].receive(1).await.unwrap(), Bytes::from_static(b"last"));
        let err = mesh[0].receive(1).await.unwrap_err();
        assert!(matches!(err, ChorusError::Communication { .. }));
    }

    #[tokio::test]
    async fn test_self_and_out_of_range_rejected() {
        let mesh = LocalTransport::mesh(2);
        assert!(matches!(
            mesh[0].send(0, Bytes::new()).await,
            Err(ChorusError::Protocol { .. })
        ));
        assert!(matches!(
            mesh[0].receive(5).await,
            Err(ChorusError::Protocol { .. })
        ));
    }
}
