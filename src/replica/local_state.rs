use crate::replica::peers::ReplicaId;
use std::fmt;

#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub(crate) struct Term(u64);

impl Term {
    pub(crate) fn new(term: u64) -> Self {
        Term(term)
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LocalState is the term/vote half of the state the raft algorithm requires to be durable.
/// The other half is the log itself (see `WriteAheadLog`).
///
/// Mutators are written CAS style: they return true iff they changed something, so the
/// caller knows when it must persist before replying to anyone.
pub(crate) struct LocalState {
    current_term: Term,
    voted_for_this_term: Option<ReplicaId>,
    my_replica_id: ReplicaId,
}

impl LocalState {
    #[cfg(test)]
    pub(crate) fn new(my_replica_id: ReplicaId) -> Self {
        Self::restored(my_replica_id, Term::new(0), None)
    }

    pub(crate) fn restored(my_replica_id: ReplicaId, current_term: Term, voted_for: Option<ReplicaId>) -> Self {
        LocalState {
            current_term,
            voted_for_this_term: voted_for,
            my_replica_id,
        }
    }

    /// Set current term to `new_term` iff it is larger than current term. Clears our vote.
    pub(crate) fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        if new_term <= self.current_term {
            return false;
        }

        self.current_term = new_term;
        self.voted_for_this_term = None;
        true
    }

    /// Store our vote iff `expected_term` is still the current term and we haven't voted in it.
    pub(crate) fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: ReplicaId) -> bool {
        if expected_term != self.current_term || self.voted_for_this_term.is_some() {
            return false;
        }

        self.voted_for_this_term.replace(vote);
        true
    }

    /// Return the new term. Used when transitioning to candidate.
    pub(crate) fn increment_term_and_vote_for_self(&mut self) -> Term {
        self.current_term.incr();
        self.voted_for_this_term.replace(self.my_replica_id);

        self.current_term
    }

    pub(crate) fn current_term(&self) -> Term {
        self.current_term
    }

    pub(crate) fn voted_for_current_term(&self) -> (Term, Option<ReplicaId>) {
        (self.current_term, self.voted_for_this_term)
    }
}
