use super::{CommError, Communicator, Message};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::{
    process,
    sync::{Arc, Barrier},
    thread,
};
use tracing::trace;

struct Shared {
    mailboxes: Vec<Sender<(usize, Message)>>,
    barrier: Barrier,
    gathered: Mutex<Vec<u64>>,
}

/// In-process stand-in for a cluster, every rank is a thread with its own mailbox.
/// Each rank claims to run on the host it was given, so several "nodes" can be simulated
/// on one machine.
pub struct ThreadCommunicator {
    rank: usize,
    host: String,
    inbox: Receiver<(usize, Message)>,
    shared: Arc<Shared>,
}

/// Create one communicator per entry of `hosts`
pub fn cluster(hosts: &[String]) -> Vec<ThreadCommunicator> {
    let (mailboxes, inboxes): (Vec<_>, Vec<_>) = hosts.iter().map(|_| unbounded()).unzip();

    let shared = Arc::new(Shared {
        mailboxes,
        barrier: Barrier::new(hosts.len()),
        gathered: Mutex::new(vec![0; hosts.len()]),
    });

    hosts
        .iter()
        .zip(inboxes)
        .enumerate()
        .map(|(rank, (host, inbox))| ThreadCommunicator {
            rank,
            host: host.clone(),
            inbox,
            shared: Arc::clone(&shared),
        })
        .collect()
}

/// Run `f` on every rank of a fresh cluster and collect the results ordered by rank
pub fn run_cluster<F, R>(hosts: &[String], f: F) -> Result<Vec<R>, CommError>
where
    F: Fn(ThreadCommunicator) -> R + Sync,
    R: Send,
{
    let f = &f;

    thread::scope(|scope| {
        let handles = cluster(hosts)
            .into_iter()
            .map(|comm| {
                let rank = comm.rank;
                thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(scope, move || f(comm))
                    .map_err(CommError::Spawn)
            })
            .collect::<Result<Vec<_>, _>>()?;

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| handle.join().map_err(|_| CommError::Panicked(rank)))
            .collect()
    })
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    fn host_identity(&self) -> String {
        self.host.clone()
    }

    fn send(&self, to: usize, message: Message) -> Result<(), CommError> {
        let mailbox = self
            .shared
            .mailboxes
            .get(to)
            .ok_or(CommError::NoSuchRank(to))?;

        trace!(from = self.rank, to, ?message, "send");
        mailbox
            .send((self.rank, message))
            .map_err(|_| CommError::Disconnected(to))
    }

    fn receive_any(&self) -> Result<(usize, Message), CommError> {
        self.inbox
            .recv()
            .map_err(|_| CommError::Disconnected(self.rank))
    }

    fn all_gather(&self, value: u64) -> Result<Vec<u64>, CommError> {
        self.shared.gathered.lock()[self.rank] = value;
        self.shared.barrier.wait();

        let values = self.shared.gathered.lock().clone();
        // nobody may overwrite a slot before every rank has read it
        self.shared.barrier.wait();

        Ok(values)
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.shared.barrier.wait();
        Ok(())
    }

    // all ranks share the process
    fn abort(&self, code: i32) -> ! {
        process::exit(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Archive;

    fn hosts(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("node{i}")).collect()
    }

    #[test]
    fn all_gather_orders_by_rank() {
        let results = run_cluster(&hosts(4), |comm| {
            let first = comm.all_gather(comm.rank() as u64 * 10).unwrap();
            let second = comm.all_gather(comm.rank() as u64 + 1).unwrap();
            (first, second)
        })
        .unwrap();

        for (first, second) in results {
            assert_eq!(first, vec![0, 10, 20, 30]);
            assert_eq!(second, vec![1, 2, 3, 4]);
        }
    }

    #[test]
    fn messages_carry_the_sender() {
        let results = run_cluster(&hosts(3), |comm| {
            if comm.rank() == 0 {
                let mut senders = (1..comm.size())
                    .map(|_| comm.receive_any().unwrap())
                    .map(|(from, message)| {
                        assert_eq!(message, Message::Assign(Archive::new(format!("{from}.tar.gz"))));
                        from
                    })
                    .collect::<Vec<_>>();
                senders.sort_unstable();
                senders
            } else {
                let archive = Archive::new(format!("{}.tar.gz", comm.rank()));
                comm.send(0, Message::Assign(archive)).unwrap();
                vec![]
            }
        })
        .unwrap();

        assert_eq!(results[0], vec![1, 2]);
    }

    #[test]
    fn unknown_rank_is_rejected() {
        let comms = cluster(&hosts(1));

        assert!(matches!(
            comms[0].send(5, Message::Stop),
            Err(CommError::NoSuchRank(5))
        ));
    }

    #[test]
    fn ranks_report_their_host() {
        let results = run_cluster(&hosts(2), |comm| comm.host_identity()).unwrap();

        assert_eq!(results, hosts(2));
    }
}
