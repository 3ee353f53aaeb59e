pub mod dispatch;
#[cfg(feature = "mpi")]
pub mod mpi;
pub mod threads;
pub mod topology;
pub mod util;

#[cfg(test)]
mod util_test;

/*
 * Two levels of parallelism:
 * -> across nodes: one process per node, the representatives form the coordinator group
 *   -> coordinator rank 0 hands out archives on request, completions come back in arrival order
 * -> within a node: a local pool per archive (see executors::local)
 *
 * The communication layer is kept behind `Communicator` so the same scheduling code runs on MPI
 * or on threads inside one process (single host runs and tests).
 */

use crate::{archive::Archive, worker::Outcome};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommError {
    #[error("Rank {0} does not exist")]
    NoSuchRank(usize),
    #[error("Lost connection to rank {0}")]
    Disconnected(usize),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error("Failed to spawn process thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("Process thread of rank {0} panicked")]
    Panicked(usize),
    #[error("Failed to initialize the communication layer")]
    Initialize,
}

/// Everything exchanged between the lead and the node representatives
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// a worker is idle
    Ready,
    Assign(Archive),
    /// a worker finished an archive, doubles as the request for the next one
    Finished { archive: Archive, outcome: Outcome },
    /// no work left
    Stop,
}

/// Flat group of processes with point to point messages and a few collectives
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// stable name of the host this process runs on
    fn host_identity(&self) -> String;

    fn send(&self, to: usize, message: Message) -> Result<(), CommError>;

    /// block until any process sends a message, returns the sender's rank
    fn receive_any(&self) -> Result<(usize, Message), CommError>;

    /// every process contributes one value, all receive all values ordered by rank
    fn all_gather(&self, value: u64) -> Result<Vec<u64>, CommError>;

    fn barrier(&self) -> Result<(), CommError>;

    /// stop every process of the group
    fn abort(&self, code: i32) -> !;
}
