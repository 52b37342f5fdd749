use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::proto::raft::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use crate::raft::log::{Entry, Log};
use crate::raft::persister::{Persister, PersistedState};
use crate::raft::progress::{Progress, ProgressMode};
use crate::raft::transport::RaftTransport;

/// Maximum number of log entries a single AppendEntries carries. Keeps an
/// RPC to a badly-lagging follower from growing unboundedly.
const MAX_ENTRIES_PER_APPEND: usize = 64;

const TICK_INTERVAL: Duration = Duration::from_millis(10);

impl From<Entry> for crate::proto::raft::Entry {
    fn from(e: Entry) -> Self {
        crate::proto::raft::Entry { term: e.term, command: e.command }
    }
}

impl From<crate::proto::raft::Entry> for Entry {
    fn from(e: crate::proto::raft::Entry) -> Self {
        Entry { term: e.term, command: e.command }
    }
}

/// A message delivered to the host application through the apply channel,
/// in log order: either a newly committed command, or notice that the
/// caller should reset its state machine from a snapshot.
#[derive(Debug, Clone)]
pub enum ApplyMsg {
    Command { index: u64, term: u64, data: Vec<u8> },
    Snapshot { index: u64, term: u64, data: Vec<u8> },
}

#[derive(Debug, Clone, Default)]
struct FollowerState {
    leader_hint: Option<u64>,
}

#[derive(Debug, Clone, Default)]
struct CandidateState {
    votes: std::collections::HashSet<u64>,
}

#[derive(Debug)]
struct LeaderState {
    progress: HashMap<u64, Progress>,
}

#[derive(Debug)]
enum Role {
    Follower(FollowerState),
    PreCandidate(CandidateState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl Role {
    fn is_leader(&self) -> bool {
        matches!(self, Role::Leader(_))
    }

    fn leader_hint(&self) -> Option<u64> {
        match self {
            Role::Follower(f) => f.leader_hint,
            _ => None,
        }
    }
}

enum PendingRpc {
    RequestVote { peer: u64, args: RequestVoteArgs },
    AppendEntries { peer: u64, args: AppendEntriesArgs },
}

struct RaftState {
    current_term: u64,
    voted_for: Option<u64>,
    log: Log,
    commit_index: u64,
    last_applied: u64,
    role: Role,
    peers: Vec<u64>,
    last_heartbeat: Instant,
    election_timeout: Duration,
}

/// A single Raft replica. Cloning the `Arc` shares the same underlying
/// consensus state; this is the handle the KV service and the RPC service
/// wrapper both hold.
pub struct Raft {
    me: u64,
    state: Mutex<RaftState>,
    transport: Arc<dyn RaftTransport>,
    persister: Arc<dyn Persister>,
    apply_tx: mpsc::UnboundedSender<ApplyMsg>,
    killed: AtomicBool,
    election_timeout_min: Duration,
    election_timeout_max: Duration,
    heartbeat_interval: Duration,
}

fn random_election_timeout(min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let ms = if max_ms > min_ms { rand::thread_rng().gen_range(min_ms..max_ms) } else { min_ms };
    Duration::from_millis(ms)
}

impl Raft {
    /// Builds a replica and spawns its background tick loop. `peers` lists
    /// every other member of the cluster (not `me`). Prior state is
    /// restored from `persister` if present, matching `Raft.Make`'s crash
    /// recovery contract in the lab.
    pub fn new(
        me: u64,
        peers: Vec<u64>,
        transport: Arc<dyn RaftTransport>,
        persister: Arc<dyn Persister>,
        apply_tx: mpsc::UnboundedSender<ApplyMsg>,
        election_timeout_min: Duration,
        election_timeout_max: Duration,
        heartbeat_interval: Duration,
    ) -> Arc<Self> {
        let restored = persister.read_state().ok().flatten();
        let (current_term, voted_for, commit_index, log) = match restored {
            Some(s) => (s.current_term, s.voted_for, s.commit_index, s.log),
            None => (0, None, 0, Log::new()),
        };
        let election_timeout = random_election_timeout(election_timeout_min, election_timeout_max);
        let state = RaftState {
            current_term,
            voted_for,
            log,
            commit_index,
            last_applied: 0,
            role: Role::Follower(FollowerState::default()),
            peers,
            last_heartbeat: Instant::now(),
            election_timeout,
        };
        let raft = Arc::new(Raft {
            me,
            state: Mutex::new(state),
            transport,
            persister,
            apply_tx,
            killed: AtomicBool::new(false),
            election_timeout_min,
            election_timeout_max,
            heartbeat_interval,
        });
        // Re-apply everything already committed before the crash: the
        // state machine on top of this replica is rebuilt from nothing on
        // every restart, so it must see 1..=commit again before anything
        // new is allowed to commit.
        {
            let mut state = raft.state.lock();
            raft.apply_committed(&mut state);
        }
        let ticker = raft.clone();
        tokio::spawn(async move {
            while !ticker.is_killed() {
                tokio::time::sleep(TICK_INTERVAL).await;
                ticker.tick().await;
            }
        });
        raft
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// `Kill`: stops the background tick loop. The lab interface has no
    /// way to signal this synchronously, so callers just stop invoking
    /// the handle afterward; in-flight RPC dispatch tasks finish on their
    /// own once they notice `is_killed`.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    /// `GetState`: `(current_term, is_leader)`.
    pub fn get_state(&self) -> (u64, bool) {
        let state = self.state.lock();
        (state.current_term, state.role.is_leader())
    }

    /// If this replica believes it knows the current leader (because it's
    /// a follower that has recently heard from one), returns that hint so
    /// a client can skip straight to it on its next attempt.
    pub fn leader_hint(&self) -> Option<u64> {
        self.state.lock().role.leader_hint()
    }

    /// `Start`: appends `command` to the log if this replica is currently
    /// the leader. Returns `(index, term, is_leader)` exactly like the
    /// lab's interface; the caller must watch the apply channel to learn
    /// whether the entry actually committed; a leadership change before
    /// that happens means it may never will.
    pub fn start(self: &Arc<Self>, command: Vec<u8>) -> (u64, u64, bool) {
        let mut state = self.state.lock();
        if !state.role.is_leader() {
            return (0, state.current_term, false);
        }
        let term = state.current_term;
        let index = state.log.append(vec![Entry { term, command }]);
        self.persist(&state);
        if let Role::Leader(leader) = &mut state.role {
            let mut own = Progress::new(index);
            own.record_success(index);
            leader.progress.insert(self.me, own);
        }
        let pending = self.broadcast_append_entries(&mut state);
        drop(state);
        self.spawn_all(pending);
        (index, term, true)
    }

    /// `Snapshot`: the host application has durably captured everything
    /// up through `index` and no longer needs the log entries below it.
    pub fn snapshot(&self, index: u64, data: Vec<u8>) {
        let mut state = self.state.lock();
        if index <= state.log.offset() || index > state.last_applied {
            return;
        }
        state.log.compact(index);
        let persisted = PersistedState {
            current_term: state.current_term,
            voted_for: state.voted_for,
            commit_index: state.commit_index,
            log: state.log.clone(),
        };
        if let Err(e) = self.persister.save_state_and_snapshot(&persisted, &data) {
            log::error!("replica {}: failed to persist snapshot at index {index}: {e}", self.me);
        }
    }

    /// `CheckQuorum`: synchronously probes every peer and reports whether
    /// a majority (this replica included) still acknowledges it as
    /// leader for the current term. Not on the hot path: a consumer that
    /// wants an extra freshness guarantee before serving a read can await
    /// this, but ordinary reads already go through the log like any other
    /// command and don't need it.
    pub async fn check_quorum(self: &Arc<Self>) -> bool {
        let (term, peers, args) = {
            let state = self.state.lock();
            if !state.role.is_leader() {
                return false;
            }
            let args = AppendEntriesArgs {
                term: state.current_term,
                leader_id: self.me,
                prev_log_index: state.log.last_index(),
                prev_log_term: state.log.last_term(),
                entries: vec![],
                leader_commit: state.commit_index,
            };
            (state.current_term, state.peers.clone(), args)
        };

        let mut handles = Vec::new();
        for peer in peers {
            let transport = self.transport.clone();
            let args = args.clone();
            handles.push(tokio::spawn(async move { transport.append_entries(peer, args).await }));
        }

        let mut acks = 1; // count self
        for handle in handles {
            if let Ok(Ok(reply)) = handle.await {
                if reply.term == term && reply.success {
                    acks += 1;
                }
            }
        }

        let cluster_size = 1 + self.state.lock().peers.len();
        acks * 2 > cluster_size
    }

    fn persist(&self, state: &RaftState) {
        let persisted = PersistedState {
            current_term: state.current_term,
            voted_for: state.voted_for,
            commit_index: state.commit_index,
            log: state.log.clone(),
        };
        if let Err(e) = self.persister.save_state(&persisted) {
            log::error!("replica {}: failed to persist state: {e}", self.me);
            if let Error::Encode(_) = e {
                panic!("replica {}: state became unencodable, refusing to run with an unrecoverable persisted record: {e}", self.me);
            }
        }
    }

    fn spawn_all(self: &Arc<Self>, pending: Vec<PendingRpc>) {
        for rpc in pending {
            let raft = self.clone();
            tokio::spawn(async move { raft.dispatch(rpc).await });
        }
    }

    async fn dispatch(self: &Arc<Self>, rpc: PendingRpc) {
        if self.is_killed() {
            return;
        }
        match rpc {
            PendingRpc::RequestVote { peer, args } => {
                if let Ok(reply) = self.transport.request_vote(peer, args.clone()).await {
                    self.handle_request_vote_reply(peer, args, reply);
                }
            }
            PendingRpc::AppendEntries { peer, args } => {
                if let Ok(reply) = self.transport.append_entries(peer, args.clone()).await {
                    self.handle_append_entries_reply(peer, args, reply);
                }
            }
        }
    }

    async fn tick(self: &Arc<Self>) {
        let pending = {
            let mut state = self.state.lock();
            self.tick_locked(&mut state)
        };
        self.spawn_all(pending);
    }

    fn tick_locked(self: &Arc<Self>, state: &mut RaftState) -> Vec<PendingRpc> {
        if let Role::Leader(_) = &state.role {
            if state.last_heartbeat.elapsed() >= self.heartbeat_interval {
                state.last_heartbeat = Instant::now();
                return self.broadcast_append_entries(state);
            }
            return vec![];
        }
        if state.last_heartbeat.elapsed() < state.election_timeout {
            return vec![];
        }
        match &state.role {
            Role::Follower(_) => self.start_pre_election(state),
            Role::PreCandidate(_) => {
                // Pre-vote round didn't reach a majority in time; abandon
                // it rather than escalating a term nobody else is ready
                // to contest.
                self.reset_election_timer(state);
                state.role = Role::Follower(FollowerState::default());
                vec![]
            }
            Role::Candidate(_) => self.start_real_election(state),
            Role::Leader(_) => unreachable!("handled above"),
        }
    }

    fn reset_election_timer(&self, state: &mut RaftState) {
        state.last_heartbeat = Instant::now();
        state.election_timeout = random_election_timeout(self.election_timeout_min, self.election_timeout_max);
    }

    fn start_pre_election(&self, state: &mut RaftState) -> Vec<PendingRpc> {
        self.reset_election_timer(state);
        let mut votes = std::collections::HashSet::new();
        votes.insert(self.me);
        state.role = Role::PreCandidate(CandidateState { votes });
        let args = RequestVoteArgs {
            term: state.current_term + 1,
            candidate_id: self.me,
            last_log_index: state.log.last_index(),
            last_log_term: state.log.last_term(),
            pre_vote: true,
        };
        state.peers.iter().map(|&peer| PendingRpc::RequestVote { peer, args: args.clone() }).collect()
    }

    fn start_real_election(&self, state: &mut RaftState) -> Vec<PendingRpc> {
        self.reset_election_timer(state);
        state.current_term += 1;
        state.voted_for = Some(self.me);
        self.persist(state);
        let mut votes = std::collections::HashSet::new();
        votes.insert(self.me);
        state.role = Role::Candidate(CandidateState { votes });
        let args = RequestVoteArgs {
            term: state.current_term,
            candidate_id: self.me,
            last_log_index: state.log.last_index(),
            last_log_term: state.log.last_term(),
            pre_vote: false,
        };
        state.peers.iter().map(|&peer| PendingRpc::RequestVote { peer, args: args.clone() }).collect()
    }

    fn is_majority(&self, votes: usize, state: &RaftState) -> bool {
        votes * 2 > state.peers.len() + 1
    }

    /// Transitions to follower on observing `term`. Per the resolved
    /// election-safety question, `voted_for` is cleared only when `term`
    /// is strictly newer than what we already knew: discovering the
    /// current leader of a term we already voted in must not let us vote
    /// again in that same term.
    fn become_follower(&self, state: &mut RaftState, term: u64, leader_hint: Option<u64>) {
        if term > state.current_term {
            state.current_term = term;
            state.voted_for = None;
            self.persist(state);
        }
        state.role = Role::Follower(FollowerState { leader_hint });
        self.reset_election_timer(state);
    }

    fn become_leader(&self, state: &mut RaftState) {
        let last_index = state.log.last_index();
        let mut progress = HashMap::new();
        for &peer in &state.peers {
            progress.insert(peer, Progress::new(last_index));
        }
        let mut own = Progress::new(last_index);
        own.record_success(last_index);
        progress.insert(self.me, own);
        state.role = Role::Leader(LeaderState { progress });
        log::info!("replica {} became leader for term {}", self.me, state.current_term);
    }

    fn build_append_entries(&self, state: &mut RaftState, peer: u64) -> Option<PendingRpc> {
        let (prev_index, max_batch) = {
            let Role::Leader(leader) = &state.role else { return None };
            let progress = leader.progress.get(&peer)?;
            let max_batch = match progress.mode {
                ProgressMode::Probe => 1,
                ProgressMode::Replicate => MAX_ENTRIES_PER_APPEND,
            };
            (progress.next_index.saturating_sub(1), max_batch)
        };
        if prev_index < state.log.offset() {
            panic!("replica {}: peer {peer} fell behind the compacted log; InstallSnapshot is not implemented", self.me);
        }
        let prev_term = state.log.term_at(prev_index).expect("prev_index must be within the log");
        let entries = state.log.take(prev_index, max_batch);
        let args = AppendEntriesArgs {
            term: state.current_term,
            leader_id: self.me,
            prev_log_index: prev_index,
            prev_log_term: prev_term,
            entries: entries.into_iter().map(Into::into).collect(),
            leader_commit: state.commit_index,
        };
        if let Role::Leader(leader) = &mut state.role {
            leader.progress.get_mut(&peer).unwrap().rpc_in_flight = true;
        }
        Some(PendingRpc::AppendEntries { peer, args })
    }

    fn broadcast_append_entries(&self, state: &mut RaftState) -> Vec<PendingRpc> {
        if !state.role.is_leader() {
            return vec![];
        }
        let peers = state.peers.clone();
        peers.into_iter().filter_map(|peer| self.build_append_entries(state, peer)).collect()
    }

    fn handle_request_vote_reply(self: &Arc<Self>, peer: u64, args: RequestVoteArgs, reply: RequestVoteReply) {
        let pending = {
            let mut state = self.state.lock();
            self.on_request_vote_reply(&mut state, peer, args, reply)
        };
        self.spawn_all(pending);
    }

    fn on_request_vote_reply(
        &self,
        state: &mut RaftState,
        peer: u64,
        args: RequestVoteArgs,
        reply: RequestVoteReply,
    ) -> Vec<PendingRpc> {
        if reply.term > state.current_term {
            self.become_follower(state, reply.term, None);
            return vec![];
        }
        if !reply.vote_granted {
            return vec![];
        }
        if args.pre_vote {
            if args.term != state.current_term + 1 {
                return vec![];
            }
            let won = match &mut state.role {
                Role::PreCandidate(c) => {
                    c.votes.insert(peer);
                    self.is_majority(c.votes.len(), state)
                }
                _ => false,
            };
            if won {
                return self.start_real_election(state);
            }
        } else {
            if args.term != state.current_term {
                return vec![];
            }
            let won = match &mut state.role {
                Role::Candidate(c) => {
                    c.votes.insert(peer);
                    self.is_majority(c.votes.len(), state)
                }
                _ => false,
            };
            if won {
                self.become_leader(state);
                return self.broadcast_append_entries(state);
            }
        }
        vec![]
    }

    fn handle_append_entries_reply(self: &Arc<Self>, peer: u64, args: AppendEntriesArgs, reply: AppendEntriesReply) {
        let mut state = self.state.lock();
        if reply.term > state.current_term {
            self.become_follower(&mut state, reply.term, None);
            return;
        }
        if args.term != state.current_term {
            return;
        }
        let state = &mut *state;
        let should_try_commit = match &mut state.role {
            Role::Leader(leader) => {
                let Some(progress) = leader.progress.get_mut(&peer) else { return };
                progress.rpc_in_flight = false;
                if reply.success {
                    let new_match = args.prev_log_index + args.entries.len() as u64;
                    progress.record_success(new_match);
                    true
                } else {
                    let log = &state.log;
                    progress.record_failure(reply.hint_index, reply.hint_term, |term| log.find_hint(term));
                    false
                }
            }
            _ => return,
        };
        if should_try_commit {
            self.try_commit(state);
        }
    }

    /// `tryCommit`: a leader may advance `commit_index` to the highest
    /// index replicated on a majority of servers, including itself, but
    /// only if that entry was appended in the leader's current term (the
    /// rule that rules out committing a previous leader's uncommitted
    /// entry purely by match-index arithmetic).
    fn try_commit(&self, state: &mut RaftState) {
        let Role::Leader(leader) = &state.role else { return };
        let mut matches: Vec<u64> = leader.progress.values().map(|p| p.match_index).collect();
        matches.sort_unstable();
        let n = matches.len();
        let median = matches[n - (n / 2 + 1)];
        if median <= state.commit_index {
            return;
        }
        if state.log.term_at(median) != Some(state.current_term) {
            return;
        }
        self.advance_commit_index(state, median);
    }

    fn advance_commit_index(&self, state: &mut RaftState, new_commit: u64) {
        if new_commit <= state.commit_index {
            return;
        }
        state.commit_index = new_commit;
        self.apply_committed(state);
    }

    fn apply_committed(&self, state: &mut RaftState) {
        while state.last_applied < state.commit_index {
            let next = state.last_applied + 1;
            let Some(entry) = state.log.get(next) else { break };
            let msg = ApplyMsg::Command { index: next, term: entry.term, data: entry.command.clone() };
            if self.apply_tx.send(msg).is_err() {
                log::warn!("replica {}: apply channel closed", self.me);
                break;
            }
            state.last_applied = next;
        }
    }

    /// `RequestVote` RPC handler, shared by real votes and pre-votes. A
    /// pre-vote never mutates `current_term` or `voted_for`: it only asks
    /// "would you vote for me", so a flaky candidate that can't reach a
    /// majority never disrupts the term of a working leader.
    pub fn handle_request_vote(self: &Arc<Self>, args: RequestVoteArgs) -> RequestVoteReply {
        let mut state = self.state.lock();
        if args.pre_vote {
            // Evaluated against our actual current_term without ever
            // adopting the candidate's hypothetical next term: a pre-vote
            // that loses must leave every responder exactly as it found it.
            let grant = args.term >= state.current_term
                && state.log.is_up_to_date(args.last_log_index, args.last_log_term);
            return RequestVoteReply { term: state.current_term, from: self.me, vote_granted: grant };
        }
        if args.term > state.current_term {
            self.become_follower(&mut state, args.term, None);
        }
        if args.term < state.current_term {
            return RequestVoteReply { term: state.current_term, from: self.me, vote_granted: false };
        }
        let up_to_date = state.log.is_up_to_date(args.last_log_index, args.last_log_term);
        let can_vote = state.voted_for.is_none() || state.voted_for == Some(args.candidate_id);
        let grant = can_vote && up_to_date;
        if grant {
            state.voted_for = Some(args.candidate_id);
            self.persist(&state);
            self.reset_election_timer(&mut state);
        }
        RequestVoteReply { term: state.current_term, from: self.me, vote_granted: grant }
    }

    /// `AppendEntries` RPC handler, also used as the heartbeat.
    pub fn handle_append_entries(self: &Arc<Self>, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut state = self.state.lock();
        if args.term > state.current_term {
            self.become_follower(&mut state, args.term, Some(args.leader_id));
        }
        if args.term < state.current_term {
            return AppendEntriesReply { term: state.current_term, from: self.me, success: false, hint_index: 0, hint_term: 0 };
        }
        // Same term: this is the legitimate leader, even if we were still
        // a (pre-)candidate a moment ago. Two leaders in the same term
        // would mean the election safety property is already broken
        // elsewhere, so this is treated as a fatal bug rather than
        // something to route around.
        assert!(!state.role.is_leader(), "replica {}: saw a second leader in term {}", self.me, state.current_term);
        state.role = Role::Follower(FollowerState { leader_hint: Some(args.leader_id) });
        self.reset_election_timer(&mut state);

        if !state.log.matches(args.prev_log_index, args.prev_log_term) {
            let (hint_index, hint_term) = self.conflict_hint(&state, args.prev_log_index);
            return AppendEntriesReply { term: state.current_term, from: self.me, success: false, hint_index, hint_term };
        }

        // Find the first entry that actually conflicts (or is new), then
        // truncate and append the remainder in one shot. Entries already
        // present with a matching term must be left alone: a reordered
        // duplicate of this RPC must not discard anything committed.
        let mut first_new = 0;
        let mut conflict_at = None;
        for entry in &args.entries {
            let index = args.prev_log_index + first_new as u64 + 1;
            match state.log.term_at(index) {
                Some(existing_term) if existing_term == entry.term => first_new += 1,
                _ => {
                    conflict_at = Some(index);
                    break;
                }
            }
        }
        if let Some(index) = conflict_at {
            assert!(
                index > state.commit_index,
                "replica {}: leader {} asked to delete committed entry at index {} (commit = {})",
                self.me, args.leader_id, index, state.commit_index
            );
            state.log.delete_from(index);
            let new_entries = args.entries[first_new..].iter().cloned().map(Entry::from).collect();
            state.log.append(new_entries);
        }
        self.persist(&state);

        if args.leader_commit > state.commit_index {
            let new_commit = args.leader_commit.min(state.log.last_index());
            self.advance_commit_index(&mut state, new_commit);
        }

        AppendEntriesReply { term: state.current_term, from: self.me, success: true, hint_index: 0, hint_term: 0 }
    }

    fn conflict_hint(&self, state: &RaftState, prev_log_index: u64) -> (u64, u64) {
        if prev_log_index > state.log.last_index() {
            return (state.log.last_index() + 1, 0);
        }
        match state.log.term_at(prev_log_index) {
            Some(term) => {
                let first_of_term = state.log.find_hint(term).unwrap_or(prev_log_index);
                (first_of_term, term)
            }
            None => (state.log.offset() + 1, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::persister::MemoryPersister;

    struct NoopTransport;

    #[async_trait::async_trait]
    impl RaftTransport for NoopTransport {
        async fn request_vote(&self, peer: u64, args: RequestVoteArgs) -> crate::error::Result<RequestVoteReply> {
            Ok(RequestVoteReply { term: args.term, from: peer, vote_granted: false })
        }
        async fn append_entries(&self, peer: u64, args: AppendEntriesArgs) -> crate::error::Result<AppendEntriesReply> {
            Ok(AppendEntriesReply { term: args.term, from: peer, success: false, hint_index: 0, hint_term: 0 })
        }
    }

    fn single_replica() -> Arc<Raft> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Raft::new(
            0,
            vec![1, 2],
            Arc::new(NoopTransport),
            MemoryPersister::new(),
            tx,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        )
    }

    fn entry(term: u64, command: &[u8]) -> crate::proto::raft::Entry {
        crate::proto::raft::Entry { term, command: command.to_vec() }
    }

    /// S3: a follower with a conflicting entry at the leader's next index
    /// truncates exactly the conflicting suffix and adopts the leader's
    /// entry, never ending up with both versions applied at that index.
    #[tokio::test]
    async fn append_entries_resolves_a_log_conflict_by_truncating_the_suffix() {
        let raft = single_replica();
        {
            let mut state = raft.state.lock();
            state.current_term = 2;
            state.log.append(vec![Entry { term: 1, command: b"c1".to_vec() }, Entry { term: 1, command: b"c2".to_vec() }, Entry { term: 1, command: b"c3".to_vec() }]);
        }

        let reply = raft.handle_append_entries(AppendEntriesArgs {
            term: 2,
            leader_id: 1,
            prev_log_index: 2,
            prev_log_term: 1,
            entries: vec![entry(3, b"c4")],
            leader_commit: 0,
        });

        assert!(reply.success);
        let state = raft.state.lock();
        assert_eq!(state.log.last_index(), 3);
        assert_eq!(state.log.get(3).unwrap().command, b"c4");
        assert_eq!(state.log.get(3).unwrap().term, 3);
    }

    /// A peer in Probe mode gets at most one entry per AppendEntries,
    /// even when the log has many more queued up; only Replicate mode
    /// sends a full batch.
    #[tokio::test]
    async fn probe_mode_caps_the_batch_at_one_entry() {
        let raft = single_replica();
        let peer = 1;
        let mut state = raft.state.lock();
        state.log.append(vec![
            Entry { term: 1, command: b"c1".to_vec() },
            Entry { term: 1, command: b"c2".to_vec() },
            Entry { term: 1, command: b"c3".to_vec() },
        ]);
        raft.become_leader(&mut state);
        if let Role::Leader(leader) = &mut state.role {
            leader.progress.insert(peer, Progress::new(0));
        }

        let PendingRpc::AppendEntries { args, .. } = raft.build_append_entries(&mut state, peer).unwrap() else {
            panic!("expected an AppendEntries RPC");
        };
        assert_eq!(args.entries.len(), 1);

        if let Role::Leader(leader) = &mut state.role {
            leader.progress.get_mut(&peer).unwrap().record_success(1);
        }
        let PendingRpc::AppendEntries { args, .. } = raft.build_append_entries(&mut state, peer).unwrap() else {
            panic!("expected an AppendEntries RPC");
        };
        assert_eq!(args.entries.len(), 2);
    }

    /// Heartbeat commits: an empty AppendEntries still advances commit
    /// when the leader's commit index has moved past ours.
    #[tokio::test]
    async fn empty_append_entries_still_advances_commit() {
        let raft = single_replica();
        {
            let mut state = raft.state.lock();
            state.log.append(vec![Entry { term: 1, command: b"c1".to_vec() }]);
        }
        let reply = raft.handle_append_entries(AppendEntriesArgs {
            term: 1,
            leader_id: 1,
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 1,
        });
        assert!(reply.success);
        assert_eq!(raft.state.lock().commit_index, 1);
    }

    /// S5: a pre-vote round never bumps the term, win or lose — neither
    /// the candidate's own term (not exercised here) nor a responder's,
    /// even though the probe's `term` field is deliberately the
    /// candidate's hypothetical next term.
    #[tokio::test]
    async fn pre_vote_request_does_not_advance_responder_term() {
        let raft = single_replica();
        let reply = raft.handle_request_vote(RequestVoteArgs {
            term: 5,
            candidate_id: 1,
            last_log_index: 0,
            last_log_term: 0,
            pre_vote: true,
        });
        assert!(reply.vote_granted);
        assert_eq!(reply.term, 0);
        assert_eq!(raft.state.lock().current_term, 0);
    }

    /// `Start` on a non-leader is a pure query: no log mutation, no RPCs.
    #[tokio::test]
    async fn start_on_non_leader_has_no_side_effects() {
        let raft = single_replica();
        let (index, _term, is_leader) = raft.start(b"x".to_vec());
        assert_eq!(index, 0);
        assert!(!is_leader);
        assert_eq!(raft.state.lock().log.last_index(), 0);
    }

    /// A follower that already voted in a term keeps that vote when it
    /// merely hears from the elected leader of that same term again.
    #[tokio::test]
    async fn confirming_same_term_leader_does_not_revoke_an_existing_vote() {
        let raft = single_replica();
        let first = raft.handle_request_vote(RequestVoteArgs {
            term: 1,
            candidate_id: 1,
            last_log_index: 0,
            last_log_term: 0,
            pre_vote: false,
        });
        assert!(first.vote_granted);

        raft.handle_append_entries(AppendEntriesArgs {
            term: 1,
            leader_id: 1,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        });

        let second = raft.handle_request_vote(RequestVoteArgs {
            term: 1,
            candidate_id: 2,
            last_log_index: 0,
            last_log_term: 0,
            pre_vote: false,
        });
        assert!(!second.vote_granted);
    }
}
