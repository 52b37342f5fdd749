/// How a leader is currently replicating to one follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// The leader doesn't yet know where this follower's log diverges.
    /// Sends one entry (or none) per AppendEntries and backs `next_index`
    /// off on rejection, using the follower's conflict hint to skip whole
    /// terms at once rather than stepping one index at a time.
    Probe,
    /// The leader knows the follower's log matches up through
    /// `match_index` and streams new entries as they're proposed.
    Replicate,
}

/// Per-follower replication state a leader tracks for the lifetime of its
/// term. Reset whenever a server becomes leader; meaningless otherwise.
#[derive(Debug, Clone)]
pub struct Progress {
    pub next_index: u64,
    pub match_index: u64,
    pub mode: ProgressMode,
    /// True while an AppendEntries to this peer is in flight. A leader
    /// only ever has one outstanding RPC per follower at a time, which
    /// keeps `next_index` bookkeeping simple at the cost of pipelining.
    pub rpc_in_flight: bool,
}

impl Progress {
    pub fn new(last_log_index: u64) -> Self {
        Progress {
            next_index: last_log_index + 1,
            match_index: 0,
            mode: ProgressMode::Probe,
            rpc_in_flight: false,
        }
    }

    /// Records a successful AppendEntries that replicated up through
    /// `index`, advancing both cursors and promoting to `Replicate` mode.
    pub fn record_success(&mut self, index: u64) {
        if index > self.match_index {
            self.match_index = index;
        }
        self.next_index = index + 1;
        self.mode = ProgressMode::Replicate;
    }

    /// Records a rejected AppendEntries, backing `next_index` off using
    /// the follower's conflict hint. `hint_index`/`hint_term` are the
    /// values the follower returned; `find_hint` is a callback into the
    /// leader's own log to implement the fast-backup optimization.
    pub fn record_failure(
        &mut self,
        hint_index: u64,
        hint_term: u64,
        find_hint: impl FnOnce(u64) -> Option<u64>,
    ) {
        self.mode = ProgressMode::Probe;
        let new_next = if hint_term == 0 {
            // Follower's log was shorter than prev_log_index.
            hint_index.max(1)
        } else if let Some(last_of_term) = find_hint(hint_term) {
            last_of_term + 1
        } else {
            hint_index.max(1)
        };
        self.next_index = new_next.min(self.next_index).max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_advances_match_and_next() {
        let mut p = Progress::new(5);
        p.record_success(5);
        assert_eq!(p.match_index, 5);
        assert_eq!(p.next_index, 6);
        assert_eq!(p.mode, ProgressMode::Replicate);
    }

    #[test]
    fn failure_without_hint_term_backs_off_to_hint_index() {
        let mut p = Progress::new(10);
        p.record_failure(4, 0, |_| None);
        assert_eq!(p.next_index, 4);
        assert_eq!(p.mode, ProgressMode::Probe);
    }

    #[test]
    fn failure_with_hint_term_uses_leader_log_lookup() {
        let mut p = Progress::new(10);
        p.record_failure(6, 2, |term| if term == 2 { Some(5) } else { None });
        assert_eq!(p.next_index, 6);
    }
}
