pub type NodeId = u64;
pub type Term = u64;
pub type LogIndex = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPayload {
    /// An empty AppendEntries payload used purely as a heartbeat. Never
    /// carries an HLC timestamp attachment point -- that lives on the
    /// AppendEntries envelope itself, not the entry.
    Blank,
    Normal(Vec<u8>),
    Config(crate::config::JointConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub payload: EntryPayload,
}

/// The in-memory portion of a replicated log. A real deployment backs this
/// with a disk-flushed segment file; here we only model the ordering and
/// commit-index rules the engine depends on.
#[derive(Debug, Default)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn append(&mut self, term: Term, payload: EntryPayload) -> LogIndex {
        let index = self.entries.last().map(|e| e.index + 1).unwrap_or(1);
        self.entries.push(LogEntry { term, index, payload });
        index
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        self.get(index).map(|e| e.term)
    }

    /// Truncates any entries at or after `index`, used when a follower's
    /// log diverges from the leader's.
    pub fn truncate_from(&mut self, index: LogIndex) {
        if index == 0 {
            self.entries.clear();
            return;
        }
        self.entries.truncate((index - 1) as usize);
    }

    pub fn entries_from(&self, index: LogIndex) -> &[LogEntry] {
        if index == 0 || index as usize > self.entries.len() + 1 {
            return &[];
        }
        &self.entries[(index - 1) as usize..]
    }
}

/// "candidate log is at least as up to date" rule, shared by both
/// pre-vote and real vote handling.
pub fn log_is_up_to_date(
    candidate_last_term: Term,
    candidate_last_index: LogIndex,
    local_last_term: Term,
    local_last_index: LogIndex,
) -> bool {
    candidate_last_term > local_last_term
        || (candidate_last_term == local_last_term && candidate_last_index >= local_last_index)
}

/// The standard Raft commit rule: an index is committed once it is stored
/// on a majority of voters AND at least one entry from the leader's current
/// term has itself been committed.
pub fn compute_commit_index(
    match_indices: &[LogIndex],
    term_at: impl Fn(LogIndex) -> Option<Term>,
    current_term: Term,
) -> LogIndex {
    if match_indices.is_empty() {
        return 0;
    }

    let mut sorted = match_indices.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    // `sorted[majority_pos]` is the largest N for which a majority of
    // voters have matchIndex >= N. Smaller ranks only weaken that bound, so
    // walk down from there looking for the first index whose term matches
    // the leader's current term -- the standard Raft commit rule.
    let majority_pos = (sorted.len() - 1) / 2;
    for candidate in &sorted[majority_pos..] {
        if *candidate == 0 {
            continue;
        }
        if term_at(*candidate) == Some(current_term) {
            return *candidate;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_sequential_indices() {
        let mut log = Log::new();
        assert_eq!(log.append(1, EntryPayload::Blank), 1);
        assert_eq!(log.append(1, EntryPayload::Blank), 2);
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn up_to_date_prefers_higher_term_then_longer_log() {
        assert!(log_is_up_to_date(2, 1, 1, 100));
        assert!(log_is_up_to_date(1, 10, 1, 5));
        assert!(!log_is_up_to_date(1, 3, 1, 5));
    }

    #[test]
    fn commit_index_requires_majority_and_current_term_entry() {
        // 5 voters; match indices for 4 followers + leader's own (always at
        // its own last index, supplied by the caller).
        let match_indices = vec![5, 5, 4, 3, 2];
        let terms = |idx: LogIndex| -> Option<Term> {
            if idx <= 3 {
                Some(1)
            } else {
                Some(2)
            }
        };
        // majority (3 of 5) is committed at index 4, and index 4 is from
        // term 2 == current_term.
        assert_eq!(compute_commit_index(&match_indices, terms, 2), 4);
    }

    #[test]
    fn commit_index_withholds_until_current_term_entry_replicated() {
        let match_indices = vec![5, 5, 4, 3, 2];
        let terms = |_idx: LogIndex| -> Option<Term> { Some(1) };
        // Every replicated entry is from term 1, but current_term is 2 --
        // nothing can be committed yet.
        assert_eq!(compute_commit_index(&match_indices, terms, 2), 0);
    }
}
