//! Partitioned coarsening across cooperating ranks.
//!
//! Every rank holds the full condensed matrix and owns a subset of its
//! nodes. Ranks exchange opaque byte messages through a [`Communicator`];
//! structured payloads are encoded with `bincode`'s serde support.
//!
//! The [`PartitionedCoarsener`] plugs into
//! [`Hierarchy::build_with`](crate::hierarchy::Hierarchy::build_with), so a
//! partitioned hierarchy is built with the same loop as a serial one.

mod channel;
mod partitioned;

pub use channel::ChannelCommunicator;
pub use partitioned::{Partition, PartitionedCoarsener};

use bincode::config;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AmgError, Result};

/// A group of ranks that can exchange messages.
///
/// `send` must not block until the peer receives. `recv` may block until a
/// message from any peer is available.
pub trait Communicator {
    /// Rank of this process in the group.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Send `message` to `rank`.
    ///
    /// # Errors
    ///
    /// [`AmgError::Communication`] if the peer is gone.
    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()>;

    /// Receive the next message from any peer.
    ///
    /// # Errors
    ///
    /// [`AmgError::Communication`] if every peer is gone.
    fn recv(&self) -> Result<Vec<u8>>;

    /// Put back a received message that is not needed yet.
    ///
    /// # Errors
    ///
    /// [`AmgError::Communication`] if the local queue is closed.
    fn requeue(&self, message: Vec<u8>) -> Result<()>;

    /// Every rank contributes `value`; every rank gets all contributions in
    /// rank order. `tag` separates consecutive gathers: messages carrying a
    /// different tag are held back and requeued afterwards.
    ///
    /// # Errors
    ///
    /// Transport failures and undecodable envelopes.
    fn all_gather(&self, tag: u64, value: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let me = self.rank();
        let p = self.size();
        for peer in (0..p).filter(|&q| q != me) {
            let envelope = Envelope {
                tag,
                source: me,
                payload: value.clone(),
            };
            self.send(peer, encode(&envelope)?)?;
        }

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; p];
        slots[me] = Some(value);
        let mut missing = p - 1;
        let mut deferred = Vec::new();
        while missing > 0 {
            let bytes = self.recv()?;
            let envelope: Envelope = decode(&bytes)?;
            if envelope.tag != tag {
                deferred.push(bytes);
                continue;
            }
            let slot = slots.get_mut(envelope.source).ok_or_else(|| {
                AmgError::Communication(format!("message from unknown rank {}", envelope.source))
            })?;
            if slot.replace(envelope.payload).is_some() {
                return Err(AmgError::Communication(format!(
                    "rank {} sent twice in gather {tag}",
                    envelope.source
                )));
            }
            missing -= 1;
        }
        for bytes in deferred {
            self.requeue(bytes)?;
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    tag: u64,
    source: usize,
    payload: Vec<u8>,
}

/// Serialise a payload.
///
/// # Errors
///
/// [`AmgError::Communication`] if encoding fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config::standard())
        .map_err(|e| AmgError::Communication(format!("encode: {e}")))
}

/// Deserialise a payload produced by [`encode`].
///
/// # Errors
///
/// [`AmgError::Communication`] if the bytes do not decode to `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::serde::decode_from_slice(bytes, config::standard())
        .map(|(value, _)| value)
        .map_err(|e| AmgError::Communication(format!("decode: {e}")))
}

/// Typed [`Communicator::all_gather`].
///
/// # Errors
///
/// Transport and codec failures.
pub fn gather<C, T>(comm: &C, tag: u64, value: &T) -> Result<Vec<T>>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
{
    comm.all_gather(tag, encode(value)?)?
        .iter()
        .map(|bytes| decode(bytes))
        .collect()
}
