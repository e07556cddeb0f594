use std::convert::TryFrom;
use std::ops::RangeInclusive;
use tokio::time::Duration;

/// Tuning knobs. Anything left `None` gets a default suited to a LAN-sized cluster.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    pub leader_heartbeat_duration: Option<Duration>,
    pub election_min_timeout: Option<Duration>,
    pub election_max_timeout: Option<Duration>,
    pub rpc_timeout: Option<Duration>,
    pub max_entries_per_append: Option<usize>,
    pub actor_queue_size: Option<usize>,
}

#[derive(Debug)]
pub(super) struct RaftOptionsValidated {
    pub leader_heartbeat_duration: Duration,
    pub election_min_timeout: Duration,
    pub election_max_timeout: Duration,
    pub rpc_timeout: Duration,
    pub max_entries_per_append: usize,
    pub actor_queue_size: usize,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.leader_heartbeat_duration >= self.election_min_timeout {
            return Err("Election minimum timeout must be greater than leader's heartbeat");
        }
        if self.election_min_timeout >= self.election_max_timeout {
            return Err("Election minimum timeout must be less than maximum timeout");
        }
        if self.rpc_timeout >= self.election_min_timeout {
            return Err("RPC timeout must be less than the election minimum timeout");
        }
        if self.max_entries_per_append == 0 {
            return Err("Max entries per AppendEntries must be at least 1");
        }
        if self.actor_queue_size == 0 {
            return Err("Actor queue size must be at least 1");
        }

        Ok(())
    }

    pub(super) fn election_timeout_range(&self) -> RangeInclusive<Duration> {
        self.election_min_timeout..=self.election_max_timeout
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let values = RaftOptionsValidated {
            leader_heartbeat_duration: options
                .leader_heartbeat_duration
                .unwrap_or_else(|| Duration::from_millis(100)),
            election_min_timeout: options
                .election_min_timeout
                .unwrap_or_else(|| Duration::from_millis(800)),
            election_max_timeout: options
                .election_max_timeout
                .unwrap_or_else(|| Duration::from_millis(1100)),
            rpc_timeout: options.rpc_timeout.unwrap_or_else(|| Duration::from_millis(300)),
            max_entries_per_append: options.max_entries_per_append.unwrap_or(64),
            actor_queue_size: options.actor_queue_size.unwrap_or(64),
        };

        values.validate()?;
        Ok(values)
    }
}
