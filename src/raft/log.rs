use serde::{Deserialize, Serialize};

/// A single log entry: the term in which it was appended by a leader, and
/// the opaque, already-serialized command the host application proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub term: u64,
    pub command: Vec<u8>,
}

/// The replicated log.
///
/// Indices are 1-based and global: index 0 is a sentinel meaning "nothing
/// has ever been appended". `entries[0]` (if present) holds the entry at
/// index `offset + 1`. `offset` and `offset_term` together describe
/// whatever prefix of the log has been compacted away by a snapshot: the
/// entry formerly at index `offset` had term `offset_term`, and the log
/// guarantees nothing about indices at or below `offset` beyond that term.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Log {
    entries: Vec<Entry>,
    offset: u64,
    offset_term: u64,
}

impl Log {
    pub fn new() -> Self {
        Log { entries: Vec::new(), offset: 0, offset_term: 0 }
    }

    /// Index of the last entry in the log (0 if the log is empty and
    /// nothing has been compacted).
    pub fn last_index(&self) -> u64 {
        self.offset + self.entries.len() as u64
    }

    /// Term of the last entry in the log, or the compaction point's term
    /// if the log holds no entries past it.
    pub fn last_term(&self) -> u64 {
        match self.entries.last() {
            Some(e) => e.term,
            None => self.offset_term,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Term of the entry at `index`, if it is still known. Returns `None`
    /// both for indices past the end of the log and for indices that have
    /// been compacted away (other than the compaction boundary itself).
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.offset {
            return Some(self.offset_term);
        }
        if index <= self.offset || index > self.last_index() {
            return None;
        }
        Some(self.entries[(index - self.offset - 1) as usize].term)
    }

    pub fn get(&self, index: u64) -> Option<&Entry> {
        if index <= self.offset || index > self.last_index() {
            return None;
        }
        Some(&self.entries[(index - self.offset - 1) as usize])
    }

    /// Entries strictly after `index`, up to the end of the log. Panics if
    /// `index` refers to an already-compacted range; callers must check
    /// `index >= self.offset()` first (a caller that needs entries from a
    /// compacted follower must fall back to installing a snapshot, which
    /// is out of scope here).
    pub fn entries_from(&self, index: u64) -> &[Entry] {
        assert!(index >= self.offset, "entries_from below compaction point");
        let start = (index - self.offset) as usize;
        &self.entries[start..]
    }

    /// `Match`: true if the log has an entry at `prev_index` whose term is
    /// `prev_term` (the vacuous case `prev_index == 0` always matches).
    pub fn matches(&self, prev_index: u64, prev_term: u64) -> bool {
        if prev_index == 0 {
            return true;
        }
        self.term_at(prev_index) == Some(prev_term)
    }

    /// `IsUpToDate`: true if a candidate whose log ends at
    /// `(candidate_last_index, candidate_last_term)` is at least as
    /// up-to-date as this log, per the Raft election restriction: higher
    /// term wins outright, equal term compares length.
    pub fn is_up_to_date(&self, candidate_last_index: u64, candidate_last_term: u64) -> bool {
        let (my_index, my_term) = (self.last_index(), self.last_term());
        candidate_last_term > my_term
            || (candidate_last_term == my_term && candidate_last_index >= my_index)
    }

    /// Appends `entries` starting immediately after the current end of the
    /// log and returns the new last index.
    pub fn append(&mut self, mut entries: Vec<Entry>) -> u64 {
        self.entries.append(&mut entries);
        self.last_index()
    }

    /// `DeleteFrom`: truncates the log so that `index` and everything
    /// after it is discarded. A no-op if `index` is past the end.
    pub fn delete_from(&mut self, index: u64) {
        if index <= self.offset {
            self.entries.clear();
            return;
        }
        let keep = (index - self.offset - 1) as usize;
        if keep < self.entries.len() {
            self.entries.truncate(keep);
        }
    }

    /// `Take`: the entries following a leader's `prev_log_index`, capped
    /// at `max` entries, for inclusion in an AppendEntries RPC.
    pub fn take(&self, prev_log_index: u64, max: usize) -> Vec<Entry> {
        let all = self.entries_from(prev_log_index);
        all.iter().take(max).cloned().collect()
    }

    /// `FindHint`: given a follower-reported conflicting term, finds the
    /// first index in this log carrying that term, so the leader can
    /// decide whether to skip straight past the follower's whole
    /// conflicting term (fast backup) instead of decrementing one index
    /// at a time.
    pub fn find_hint(&self, conflict_term: u64) -> Option<u64> {
        for (i, e) in self.entries.iter().enumerate() {
            if e.term == conflict_term {
                return Some(self.offset + i as u64 + 1);
            }
        }
        None
    }

    /// `Compact`: drops every entry at or before `index`, recording
    /// `index`'s term as the new compaction boundary. Used when the host
    /// application installs a snapshot via `Raft::snapshot`.
    pub fn compact(&mut self, index: u64) {
        if index <= self.offset {
            return;
        }
        let term = self.term_at(index).expect("compact index must be in range");
        let drop = (index - self.offset) as usize;
        self.entries.drain(0..drop);
        self.offset = index;
        self.offset_term = term;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(term: u64) -> Entry {
        Entry { term, command: vec![] }
    }

    #[test]
    fn append_and_last_index() {
        let mut log = Log::new();
        assert_eq!(log.last_index(), 0);
        log.append(vec![entry(1), entry(1), entry(2)]);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 2);
    }

    #[test]
    fn matches_sentinel_and_real_entries() {
        let mut log = Log::new();
        log.append(vec![entry(1), entry(2)]);
        assert!(log.matches(0, 0));
        assert!(log.matches(1, 1));
        assert!(log.matches(2, 2));
        assert!(!log.matches(2, 1));
        assert!(!log.matches(3, 2));
    }

    #[test]
    fn is_up_to_date_prefers_higher_term() {
        let mut log = Log::new();
        log.append(vec![entry(1), entry(1), entry(1)]);
        assert!(log.is_up_to_date(1, 2));
        assert!(!log.is_up_to_date(1, 1));
        assert!(log.is_up_to_date(3, 1));
    }

    #[test]
    fn delete_from_truncates() {
        let mut log = Log::new();
        log.append(vec![entry(1), entry(1), entry(2)]);
        log.delete_from(2);
        assert_eq!(log.last_index(), 1);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    fn find_hint_locates_first_index_of_term() {
        let mut log = Log::new();
        log.append(vec![entry(1), entry(2), entry(2), entry(3)]);
        assert_eq!(log.find_hint(2), Some(2));
        assert_eq!(log.find_hint(9), None);
    }

    #[test]
    fn compact_advances_offset_and_preserves_term() {
        let mut log = Log::new();
        log.append(vec![entry(1), entry(1), entry(2), entry(2)]);
        log.compact(2);
        assert_eq!(log.offset(), 2);
        assert_eq!(log.term_at(2), Some(1));
        assert_eq!(log.term_at(1), None);
        assert_eq!(log.get(3).unwrap().term, 2);
        assert!(log.matches(2, 1));
    }
}
