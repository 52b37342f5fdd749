use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raft::log::Log;

/// The durable record written on every term change, vote, or log mutation.
/// Mirrors exactly what a Raft peer must recover on restart before it is
/// safe to rejoin the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub commit_index: u64,
    pub log: Log,
}

/// Storage abstraction for a replica's durable state, modeled after the
/// lab's `Persister`: one blob for Raft state, a second independent blob
/// for the latest application-level snapshot.
pub trait Persister: Send + Sync {
    fn save_state(&self, state: &PersistedState) -> Result<()>;
    fn read_state(&self) -> Result<Option<PersistedState>>;
    fn save_snapshot(&self, snapshot: &[u8]) -> Result<()>;
    fn read_snapshot(&self) -> Result<Option<Vec<u8>>>;
    /// Atomically replace both the Raft state and the snapshot, used after
    /// a successful `Raft::snapshot` compaction so the two never observe
    /// a torn write relative to each other.
    fn save_state_and_snapshot(&self, state: &PersistedState, snapshot: &[u8]) -> Result<()>;
}

/// An in-memory `Persister`, used by tests and the loopback network: state
/// survives a simulated crash only as long as the `Arc` handle is kept
/// alive by the test harness, which is exactly what "persistence" means in
/// a single-process simulation.
#[derive(Default)]
pub struct MemoryPersister {
    inner: Mutex<(Option<PersistedState>, Option<Vec<u8>>)>,
}

impl MemoryPersister {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Persister for MemoryPersister {
    fn save_state(&self, state: &PersistedState) -> Result<()> {
        self.inner.lock().0 = Some(state.clone());
        Ok(())
    }

    fn read_state(&self) -> Result<Option<PersistedState>> {
        Ok(self.inner.lock().0.clone())
    }

    fn save_snapshot(&self, snapshot: &[u8]) -> Result<()> {
        self.inner.lock().1 = Some(snapshot.to_vec());
        Ok(())
    }

    fn read_snapshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().1.clone())
    }

    fn save_state_and_snapshot(&self, state: &PersistedState, snapshot: &[u8]) -> Result<()> {
        let mut guard = self.inner.lock();
        guard.0 = Some(state.clone());
        guard.1 = Some(snapshot.to_vec());
        Ok(())
    }
}

/// A `Persister` backed by two files on disk, one per blob. Writes go
/// through a temp file plus rename so a crash mid-write never leaves a
/// half-written state file behind.
pub struct FilePersister {
    state_path: PathBuf,
    snapshot_path: PathBuf,
    lock: Mutex<()>,
}

impl FilePersister {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Arc::new(Self {
            state_path: data_dir.join("raft_state.bin"),
            snapshot_path: data_dir.join("snapshot.bin"),
            lock: Mutex::new(()),
        }))
    }

    fn write_atomically(path: &PathBuf, data: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Persister for FilePersister {
    fn save_state(&self, state: &PersistedState) -> Result<()> {
        let _guard = self.lock.lock();
        let data = bincode::serialize(state).map_err(|e| Error::Encode(e.to_string()))?;
        Self::write_atomically(&self.state_path, &data)
    }

    fn read_state(&self) -> Result<Option<PersistedState>> {
        let _guard = self.lock.lock();
        if !self.state_path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.state_path)?;
        Ok(Some(bincode::deserialize(&data)?))
    }

    fn save_snapshot(&self, snapshot: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();
        Self::write_atomically(&self.snapshot_path, snapshot)
    }

    fn read_snapshot(&self) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock();
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&self.snapshot_path)?))
    }

    fn save_state_and_snapshot(&self, state: &PersistedState, snapshot: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();
        let data = bincode::serialize(state).map_err(|e| Error::Encode(e.to_string()))?;
        Self::write_atomically(&self.state_path, &data)?;
        Self::write_atomically(&self.snapshot_path, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_persister_round_trips() {
        let p = MemoryPersister::new();
        assert!(p.read_state().unwrap().is_none());
        let state = PersistedState { current_term: 3, voted_for: Some(1), commit_index: 2, log: Log::new() };
        p.save_state(&state).unwrap();
        let read = p.read_state().unwrap().unwrap();
        assert_eq!(read.current_term, 3);
        assert_eq!(read.voted_for, Some(1));
        assert_eq!(read.commit_index, 2);
    }

    #[test]
    fn file_persister_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let p = FilePersister::new(dir.path()).unwrap();
        let mut log = Log::new();
        log.append(vec![crate::raft::log::Entry { term: 1, command: vec![9] }]);
        let state = PersistedState { current_term: 5, voted_for: None, commit_index: 1, log };
        p.save_state_and_snapshot(&state, b"snap").unwrap();
        let read = p.read_state().unwrap().unwrap();
        assert_eq!(read.current_term, 5);
        assert_eq!(read.log.last_index(), 1);
        assert_eq!(p.read_snapshot().unwrap().unwrap(), b"snap");
    }
}
