//! Frames exchanged by collective operations.

use crate::partition::Partition;
use anyhow::anyhow;
use bincode::{Decode, Encode, config};
use bytes::Bytes;
use chorus_common::{ChorusError, Result};

/// Largest frame a peer may send. Decoding never allocates past this.
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024; // 256MB

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum FrameKind {
    /// Partitions of a table
    Data,
    /// A rank reached a barrier
    Barrier,
    /// The leader releases a barrier
    Release,
}

/// One message of a collective operation.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Frame {
    pub op: String,
    pub table_id: i32,
    pub kind: FrameKind,
    /// Rank whose table the partitions came from, which is not always the
    /// sender (allgather forwards blocks around the ring)
    pub origin: u32,
    pub partitions: Vec<Partition>,
}

/// Borrowed view of a [`Frame`] with the same encoding, so partitions can be
/// sent without cloning them first.
#[derive(Encode)]
pub(crate) struct FrameRef<'a> {
    pub op: &'a str,
    pub table_id: i32,
    pub kind: FrameKind,
    pub origin: u32,
    pub partitions: &'a [&'a Partition],
}

impl FrameRef<'_> {
    pub fn encode(&self) -> Result<Bytes> {
        bincode::encode_to_vec(self, config::standard())
            .map(Bytes::from)
            .map_err(|e| {
                ChorusError::serialization_error_with_source(
                    format!("encode frame for op '{}'", self.op),
                    anyhow!("{e}"),
                )
            })
    }
}

impl Frame {
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        let limited = config::standard().with_limit::<MAX_FRAME_BYTES>();
        let (frame, read) = bincode::decode_from_slice::<Frame, _>(bytes, limited).map_err(|e| {
            ChorusError::serialization_error_with_source("decode frame", anyhow!("{e}"))
        })?;
        if read != bytes.len() {
            return Err(ChorusError::protocol_error(format!(
                "frame for op '{}' has {} trailing bytes",
                frame.op,
                bytes.len() - read
            )));
        }
        Ok(frame)
    }
}
