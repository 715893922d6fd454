//! In-memory document store for tests

use super::DocumentStore;
use crate::errors::{AppError, Result};
use crate::models::{DocumentRecord, StatusPatch};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Document store backed by a `HashMap`, with failure injection
pub struct MemoryStore {
    name: &'static str,
    records: Mutex<HashMap<String, DocumentRecord>>,
    next_id: AtomicUsize,
    updates: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            records: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            updates: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, id: &str) -> Option<DocumentRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful status updates
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(AppError::store(self.name, "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn create(&self, record: &DocumentRecord, linked_id: Option<&str>) -> Result<String> {
        self.check_writable()?;
        let id = format!("{}-{}", self.name, self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut stored = record.clone();
        stored.id = Some(id.clone());
        stored.linked_id = linked_id.map(String::from);
        self.records.lock().unwrap().insert(id.clone(), stored);
        Ok(id)
    }

    async fn update(&self, id: &str, patch: &StatusPatch) -> Result<()> {
        self.check_writable()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| AppError::store(self.name, format!("no document {}", id)))?;
        if !record.apply(patch) {
            return Err(AppError::store(
                self.name,
                format!("document {} cannot move from {} to {}", id, record.status.as_str(), patch.status.as_str()),
            ));
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn link(&self, id: &str, linked_id: &str) -> Result<()> {
        self.check_writable()?;
        if let Some(record) = self.records.lock().unwrap().get_mut(id) {
            record.linked_id = Some(linked_id.to_string());
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
