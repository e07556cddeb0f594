//! Test harness: a cluster of raft nodes living in this process, talking over a `LocalNetwork`.
#![allow(dead_code)]

use bytes::Bytes;
use raft_core::{
    ApplyMsg, InMemoryStorage, LocalNetwork, RaftNode, RaftNodeConfig, RaftOptions, ReplicaId, StableStorage,
};
use rand::Rng;
use slog::Drain;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

pub const ELECTION_MIN_TIMEOUT: Duration = Duration::from_millis(250);

pub fn test_options() -> RaftOptions {
    RaftOptions {
        leader_heartbeat_duration: Some(Duration::from_millis(50)),
        election_min_timeout: Some(ELECTION_MIN_TIMEOUT),
        election_max_timeout: Some(Duration::from_millis(400)),
        rpc_timeout: Some(Duration::from_millis(100)),
        ..RaftOptions::default()
    }
}

pub fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().filter_level(slog::Level::Info).fuse();

    slog::Logger::root(drain, slog::o!())
}

pub fn command(n: usize) -> Bytes {
    Bytes::from(format!("cmd-{}", n))
}

#[derive(Default)]
struct ApplyState {
    // Per node, what it has applied. Position i holds index i + 1.
    logs: Vec<Vec<Bytes>>,
    // Per node, which incarnation's apply channel we're listening to.
    generations: Vec<u64>,
    // What any node applied at each index.
    committed: HashMap<u64, Bytes>,
    errors: Vec<String>,
}

pub struct Cluster {
    pub logger: slog::Logger,
    pub network: LocalNetwork,
    members: Vec<ReplicaId>,
    nodes: Vec<Option<RaftNode>>,
    storages: Vec<Arc<dyn StableStorage>>,
    apply_state: Arc<Mutex<ApplyState>>,
    options: RaftOptions,
}

impl Cluster {
    pub fn new(num_members: usize) -> Self {
        Self::with_options(num_members, test_options())
    }

    pub fn with_options(num_members: usize, options: RaftOptions) -> Self {
        let storages = (0..num_members)
            .map(|_| Arc::new(InMemoryStorage::new()) as Arc<dyn StableStorage>)
            .collect();
        Self::with_storages(storages, options)
    }

    /// One storage per member. Must be called from within a tokio runtime.
    pub fn with_storages(storages: Vec<Arc<dyn StableStorage>>, options: RaftOptions) -> Self {
        let num_members = storages.len();
        let logger = create_root_logger_for_stdout();
        let apply_state = ApplyState {
            logs: vec![Vec::new(); num_members],
            generations: vec![0; num_members],
            ..ApplyState::default()
        };

        let mut cluster = Cluster {
            network: LocalNetwork::new(logger.new(slog::o!("Task" => "Network"))),
            logger,
            members: (0..num_members).map(ReplicaId::new).collect(),
            nodes: (0..num_members).map(|_| None).collect(),
            storages,
            apply_state: Arc::new(Mutex::new(apply_state)),
            options,
        };
        for i in 0..num_members {
            cluster.start(i);
        }

        cluster
    }

    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    /// Start (or restart) member `i` from whatever its storage holds, and connect it.
    pub fn start(&mut self, i: usize) {
        self.crash(i);

        let generation = {
            let mut state = self.apply_state.lock().unwrap();
            state.generations[i] += 1;
            state.logs[i].clear();
            state.generations[i]
        };

        let (apply_tx, apply_rx) = mpsc::channel(256);
        let node = raft_core::create_raft_node(RaftNodeConfig {
            my_replica_id: self.members[i],
            cluster_members: self.members.clone(),
            storage: self.storages[i].clone(),
            transport: Arc::new(self.network.transport_for(self.members[i])),
            apply_channel: apply_tx,
            info_logger: self.logger.clone(),
            options: self.options.clone(),
        })
        .unwrap();

        self.network.register(self.members[i], node.rpc_handler());
        tokio::spawn(collect_applied(i, generation, apply_rx, self.apply_state.clone()));
        self.nodes[i] = Some(node);
    }

    /// Kill member `i` and cut it off. Its storage survives for a later `start(i)`.
    pub fn crash(&mut self, i: usize) {
        self.network.disconnect(self.members[i]);
        if let Some(node) = self.nodes[i].take() {
            node.kill();
        }
    }

    pub fn disconnect(&self, i: usize) {
        self.network.disconnect(self.members[i]);
    }

    pub fn connect(&self, i: usize) {
        self.network.connect(self.members[i]);
    }

    pub fn node(&self, i: usize) -> &RaftNode {
        self.nodes[i].as_ref().expect("node is crashed")
    }

    fn is_up(&self, i: usize) -> bool {
        self.nodes[i].is_some() && self.network.is_connected(self.members[i])
    }

    /// Wait for exactly one leader among connected members, and return it. Panics if there are
    /// two leaders in one term, or no leader for too long.
    pub async fn check_one_leader(&self) -> usize {
        for _ in 0..10 {
            let pause = rand::thread_rng().gen_range(450..550);
            tokio::time::sleep(Duration::from_millis(pause)).await;

            let mut leaders: HashMap<u64, Vec<usize>> = HashMap::new();
            for i in (0..self.num_members()).filter(|i| self.is_up(*i)) {
                let (term, is_leader) = self.node(i).get_state();
                if is_leader {
                    leaders.entry(term).or_default().push(i);
                }
            }

            for (term, leaders_in_term) in leaders.iter() {
                assert!(
                    leaders_in_term.len() <= 1,
                    "term {} has {} leaders: {:?}",
                    term,
                    leaders_in_term.len(),
                    leaders_in_term
                );
            }

            if let Some(latest_term) = leaders.keys().max() {
                return leaders[latest_term][0];
            }
        }

        panic!("expected one leader, got none");
    }

    /// Every connected member agrees on the term.
    pub fn check_terms(&self) -> u64 {
        let mut agreed_term = None;
        for i in (0..self.num_members()).filter(|i| self.is_up(*i)) {
            let (term, _) = self.node(i).get_state();
            match agreed_term {
                None => agreed_term = Some(term),
                Some(agreed) => assert_eq!(agreed, term, "members disagree on term"),
            }
        }

        agreed_term.expect("no connected members")
    }

    pub fn check_no_leader(&self) {
        for i in (0..self.num_members()).filter(|i| self.is_up(*i)) {
            let (term, is_leader) = self.node(i).get_state();
            assert!(!is_leader, "member {} is leader in term {}, but shouldn't be", i, term);
        }
    }

    /// How many members applied `index`, and the command they applied.
    pub fn n_committed(&self, index: u64) -> (usize, Option<Bytes>) {
        let state = self.apply_state.lock().unwrap();
        assert!(state.errors.is_empty(), "apply errors: {:?}", state.errors);

        let mut count = 0;
        let mut command = None;
        for log in state.logs.iter() {
            if let Some(applied) = log.get(index as usize - 1) {
                if let Some(existing) = &command {
                    assert_eq!(existing, applied, "members applied different commands at {}", index);
                }
                count += 1;
                command = Some(applied.clone());
            }
        }

        (count, command)
    }

    /// Wait for at least `n` members to apply `index`.
    pub async fn wait(&self, index: u64, n: usize) -> Option<Bytes> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut pause = Duration::from_millis(10);
        while Instant::now() < deadline {
            let (count, command) = self.n_committed(index);
            if count >= n {
                return command;
            }
            tokio::time::sleep(pause).await;
            pause = std::cmp::min(pause * 2, Duration::from_millis(500));
        }

        None
    }

    /// Get `command` committed on at least `expected_members` members, starting it on whichever
    /// member is leader. With `retry`, a leader that fails to commit it in time is given up on
    /// and the command is started again elsewhere. Returns the index it committed at.
    pub async fn one(&self, command: Bytes, expected_members: usize, retry: bool) -> u64 {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut starting_member = 0;
        while Instant::now() < deadline {
            let mut started_at = None;
            for offset in 0..self.num_members() {
                let i = (starting_member + offset) % self.num_members();
                if !self.is_up(i) {
                    continue;
                }
                if let Ok(entry_id) = self.node(i).start(command.clone()).await {
                    started_at = Some(entry_id.index);
                    starting_member = i;
                    break;
                }
            }

            match started_at {
                Some(index) => {
                    let commit_deadline = Instant::now() + Duration::from_secs(2);
                    while Instant::now() < commit_deadline {
                        let (count, committed) = self.n_committed(index);
                        if count >= expected_members && committed.as_ref() == Some(&command) {
                            return index;
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    if !retry {
                        panic!("{:?} failed to reach agreement", command);
                    }
                    starting_member = (starting_member + 1) % self.num_members();
                }
                None => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }

        panic!("{:?} failed to reach agreement", command);
    }

    pub fn assert_no_apply_errors(&self) {
        let state = self.apply_state.lock().unwrap();
        assert!(state.errors.is_empty(), "apply errors: {:?}", state.errors);
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for node in self.nodes.iter().flatten() {
            node.kill();
        }
    }
}

async fn collect_applied(
    member: usize,
    generation: u64,
    mut apply_rx: mpsc::Receiver<ApplyMsg>,
    apply_state: Arc<Mutex<ApplyState>>,
) {
    while let Some(msg) = apply_rx.recv().await {
        let mut state = apply_state.lock().unwrap();
        if state.generations[member] != generation {
            // Member was restarted. This is the old incarnation draining.
            return;
        }

        let expected_index = state.logs[member].len() as u64 + 1;
        if msg.index != expected_index {
            let error = format!(
                "member {} applied index {} out of order, expected {}",
                member, msg.index, expected_index
            );
            state.errors.push(error);
            continue;
        }

        if let Some(existing) = state.committed.get(&msg.index) {
            if *existing != msg.command {
                let error = format!(
                    "member {} applied {:?} at index {}, but {:?} was applied there elsewhere",
                    member, msg.command, msg.index, existing
                );
                state.errors.push(error);
            }
        }
        state.committed.insert(msg.index, msg.command.clone());
        state.logs[member].push(msg.command);
    }
}
