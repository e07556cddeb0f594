use std::collections::HashSet;
use std::fmt;

/// ReplicaId is a member's position in the cluster's peer list. Every member must be
/// configured with the same list, so the same id names the same member everywhere.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ReplicaId(usize);

impl ReplicaId {
    pub fn new(id: usize) -> Self {
        ReplicaId(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica-{}", self.0)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// ClusterTracker knows who is in the cluster. Membership is fixed for the lifetime of a replica.
#[derive(Clone, Debug)]
pub(crate) struct ClusterTracker {
    my_replica_id: ReplicaId,
    peer_ids: Vec<ReplicaId>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum InvalidCluster {
    #[error("my replica ID {0:?} is not in cluster config")]
    MeNotInCluster(ReplicaId),
    #[error("replica ID {0:?} appears more than once in cluster config")]
    DuplicateMember(ReplicaId),
}

impl ClusterTracker {
    pub(crate) fn create_valid_cluster(
        my_replica_id: ReplicaId,
        cluster_members: Vec<ReplicaId>,
    ) -> Result<Self, InvalidCluster> {
        let mut seen = HashSet::with_capacity(cluster_members.len());
        for member in cluster_members.iter() {
            if !seen.insert(*member) {
                return Err(InvalidCluster::DuplicateMember(*member));
            }
        }
        if !seen.contains(&my_replica_id) {
            return Err(InvalidCluster::MeNotInCluster(my_replica_id));
        }

        let peer_ids = cluster_members
            .into_iter()
            .filter(|member| *member != my_replica_id)
            .collect();

        Ok(ClusterTracker {
            my_replica_id,
            peer_ids,
        })
    }

    pub(crate) fn my_replica_id(&self) -> ReplicaId {
        self.my_replica_id
    }

    pub(crate) fn peer_ids(&self) -> &[ReplicaId] {
        &self.peer_ids
    }

    pub(crate) fn contains_member(&self, replica_id: &ReplicaId) -> bool {
        *replica_id == self.my_replica_id || self.peer_ids.contains(replica_id)
    }

    pub(crate) fn num_voting_replicas(&self) -> usize {
        self.peer_ids.len() + 1
    }

    /// Strict majority of the whole cluster, counting ourselves.
    pub(crate) fn majority_count(&self) -> usize {
        (self.num_voting_replicas() / 2) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[usize]) -> Vec<ReplicaId> {
        raw.iter().copied().map(ReplicaId::new).collect()
    }

    #[test]
    fn valid_cluster() {
        let cluster = ClusterTracker::create_valid_cluster(ReplicaId::new(1), ids(&[0, 1, 2])).unwrap();

        assert_eq!(ReplicaId::new(1), cluster.my_replica_id());
        assert_eq!(&ids(&[0, 2])[..], cluster.peer_ids());
        assert!(cluster.contains_member(&ReplicaId::new(1)));
        assert!(cluster.contains_member(&ReplicaId::new(2)));
        assert!(!cluster.contains_member(&ReplicaId::new(3)));
        assert_eq!(3, cluster.num_voting_replicas());
    }

    #[test]
    fn majority_count() {
        for (size, majority) in [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3), (6, 4), (7, 4)].iter() {
            let members: Vec<_> = (0..*size).map(ReplicaId::new).collect();
            let cluster = ClusterTracker::create_valid_cluster(ReplicaId::new(0), members).unwrap();
            assert_eq!(*majority, cluster.majority_count(), "cluster size {}", size);
        }
    }

    #[test]
    fn invalid_clusters() {
        assert!(matches!(
            ClusterTracker::create_valid_cluster(ReplicaId::new(5), ids(&[0, 1, 2])),
            Err(InvalidCluster::MeNotInCluster(_))
        ));
        assert!(matches!(
            ClusterTracker::create_valid_cluster(ReplicaId::new(0), ids(&[0, 1, 1])),
            Err(InvalidCluster::DuplicateMember(_))
        ));
    }
}
