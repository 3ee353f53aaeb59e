use super::{util, CommError, Communicator, Message};
use mpi::{
    environment::Universe,
    topology::SimpleCommunicator,
    traits::{Communicator as _, CommunicatorCollectives, Destination, Source},
};
use tracing::trace;

/// Communicator over `MPI_COMM_WORLD`, finalizes MPI when dropped
pub struct MpiCommunicator {
    world: SimpleCommunicator,
    _universe: Universe,
}

impl MpiCommunicator {
    pub fn initialize() -> Result<Self, CommError> {
        let universe = mpi::initialize().ok_or(CommError::Initialize)?;
        let world = universe.world();

        Ok(Self {
            world,
            _universe: universe,
        })
    }

    fn mpi_rank(&self, rank: usize) -> Result<i32, CommError> {
        i32::try_from(rank)
            .ok()
            .filter(|rank| *rank < self.world.size())
            .ok_or(CommError::NoSuchRank(rank))
    }
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn host_identity(&self) -> String {
        util::host_identity(mpi::environment::processor_name().ok())
    }

    fn send(&self, to: usize, message: Message) -> Result<(), CommError> {
        let payload = serde_yaml::to_string(&message)?;

        trace!(to, ?message, "send");
        self.world
            .process_at_rank(self.mpi_rank(to)?)
            .send(payload.as_bytes());

        Ok(())
    }

    fn receive_any(&self) -> Result<(usize, Message), CommError> {
        let (payload, status) = self.world.any_process().receive_vec::<u8>();
        let message = serde_yaml::from_slice(&payload)?;

        Ok((status.source_rank() as usize, message))
    }

    fn all_gather(&self, value: u64) -> Result<Vec<u64>, CommError> {
        let mut values = vec![0u64; self.size()];
        self.world.all_gather_into(&value, &mut values[..]);

        Ok(values)
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.world.barrier();
        Ok(())
    }

    fn abort(&self, code: i32) -> ! {
        self.world.abort(code)
    }
}
