use super::{util::host_key, CommError, Communicator};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("{size} processes share a node, please spawn one process per node")]
    Violation { size: usize },
    #[error(transparent)]
    Communication(#[from] CommError),
}

/// The node representatives, ordered by world rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorGroup {
    /// rank of this process within the group
    pub rank: usize,
    /// world ranks of all members
    pub members: Vec<usize>,
}

impl CoordinatorGroup {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_lead(&self) -> bool {
        self.rank == 0
    }

    /// world rank of the process handing out work
    pub fn lead(&self) -> usize {
        self.members[0]
    }
}

/// Placement of this process in the two level grouping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub world_rank: usize,
    pub world_size: usize,
    pub node_local_rank: usize,
    pub node_local_size: usize,
    pub is_node_representative: bool,
    /// `Some` for node representatives only
    pub coordinator_group: Option<CoordinatorGroup>,
    /// most processes found on any single node
    pub largest_node: usize,
}

impl Topology {
    /// Derive the grouping from the host key of every world rank.
    /// The lowest world rank on each host becomes its representative.
    pub fn from_host_keys(rank: usize, keys: &[u64]) -> Self {
        let key = keys[rank];
        let node_local_rank = keys[..rank].iter().filter(|other| **other == key).count();
        let node_local_size = keys.iter().filter(|other| **other == key).count();

        let members = (0..keys.len())
            .filter(|candidate| !keys[..*candidate].contains(&keys[*candidate]))
            .collect::<Vec<_>>();

        let largest_node = members
            .iter()
            .map(|member| keys.iter().filter(|other| **other == keys[*member]).count())
            .max()
            .unwrap_or(0);

        let coordinator_group = members
            .iter()
            .position(|member| *member == rank)
            .map(|group_rank| CoordinatorGroup {
                rank: group_rank,
                members: members.clone(),
            });

        Self {
            world_rank: rank,
            world_size: keys.len(),
            node_local_rank,
            node_local_size,
            is_node_representative: node_local_rank == 0,
            coordinator_group,
            largest_node,
        }
    }

    /// the process that owns the catalog and the report
    pub fn is_lead(&self) -> bool {
        self.coordinator_group
            .as_ref()
            .map_or(false, CoordinatorGroup::is_lead)
    }
}

/// Build the topology collectively, every process has to call this.
///
/// With `exclusive` set, more than one process on any node is an error on
/// every rank, so either all processes continue or none does.
pub fn build<C: Communicator>(comm: &C, exclusive: bool) -> Result<Topology, TopologyError> {
    let key = host_key(&comm.host_identity());
    let keys = comm.all_gather(key)?;
    let topology = Topology::from_host_keys(comm.rank(), &keys);

    debug!(
        "Global rank {} of {} is local rank {} of {} on host {key:016x}",
        topology.world_rank,
        topology.world_size,
        topology.node_local_rank,
        topology.node_local_size
    );

    if exclusive && topology.largest_node > 1 {
        if topology.is_lead() {
            error!(
                "{} processes share a node. Please spawn one process per node for optimal performance",
                topology.largest_node
            );
        }

        return Err(TopologyError::Violation {
            size: topology.largest_node,
        });
    }

    Ok(topology)
}
