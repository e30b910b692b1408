use parking_lot::Mutex;
use std::collections::HashMap;

use crate::errors::PersistenceError;
use crate::ids::SessionId;
use crate::status::SessionRecord;

/// Durable record store keyed by session id. Every call is write-through.
pub trait SessionStore: Send + Sync {
    fn save(&self, record: &SessionRecord) -> Result<(), PersistenceError>;
    fn remove(&self, id: &SessionId) -> Result<(), PersistenceError>;
    fn load_all(&self) -> Result<Vec<SessionRecord>, PersistenceError>;
}

/// Volatile store for tests and embedding without a database.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionRecord> {
        self.records.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        self.records.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, id: &SessionId) -> Result<(), PersistenceError> {
        self.records.lock().remove(id);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SessionRecord>, PersistenceError> {
        let mut all: Vec<_> = self.records.lock().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}
