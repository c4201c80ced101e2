//! In-process communicator over crossbeam channels.

use crossbeam::channel::{self, Receiver, Sender};

use super::Communicator;
use crate::error::{AmgError, Result};

/// One rank of a group of threads connected by unbounded channels.
#[derive(Debug)]
pub struct ChannelCommunicator {
    rank: usize,
    peers: Vec<Sender<Vec<u8>>>,
    inbox: Receiver<Vec<u8>>,
}

impl ChannelCommunicator {
    /// A fully connected group of `size` ranks, in rank order. Move each
    /// member onto its own thread.
    pub fn group(size: usize) -> Vec<ChannelCommunicator> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel::unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ChannelCommunicator {
                rank,
                peers: senders.clone(),
                inbox,
            })
            .collect()
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        let peer = self
            .peers
            .get(rank)
            .ok_or_else(|| AmgError::Communication(format!("no rank {rank} in a group of {}", self.peers.len())))?;
        peer.send(message)
            .map_err(|_| AmgError::Communication(format!("rank {rank} hung up")))
    }

    fn recv(&self) -> Result<Vec<u8>> {
        self.inbox
            .recv()
            .map_err(|_| AmgError::Communication(format!("inbox of rank {} closed", self.rank)))
    }

    fn requeue(&self, message: Vec<u8>) -> Result<()> {
        self.send(self.rank, message)
    }
}
