//! Write-behind session over a [`BackingStore`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::debug;

use procflow_core::{EngineError, EngineResult, EntityId, EntityKind};

use super::Record;
use crate::store::query::{paginate, sort_rows};
use crate::store::{BackingStore, QueryParams, StoreOperation};

/// Net effect staged for one entity.
#[derive(Debug, Clone, PartialEq)]
enum Staged {
    Insert(Record),
    Update(Record),
    Delete(Record),
}

type Key = (EntityKind, EntityId);

/// Staging buffer for one unit of work.
///
/// Mutations are keyed by entity identity and collapse to their net effect:
///
/// | staged \ new | insert      | update       | delete      |
/// |--------------|-------------|--------------|-------------|
/// | (none)       | insert      | update       | delete      |
/// | insert       | insert(new) | insert(new)  | (dropped)   |
/// | update       | error       | update(new)  | delete      |
/// | delete       | error       | error        | delete      |
///
/// Reads consult the stage first, so a caller never sees an entity it has
/// staged for deletion and always sees its own pending inserts and updates.
pub struct Session {
    store: Arc<dyn BackingStore>,
    staged: HashMap<Key, (u64, Staged)>,
    next_seq: u64,
    closed: bool,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("pending", &self.staged.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Session {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self {
            store,
            staged: HashMap::new(),
            next_seq: 0,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of entities with a staged mutation.
    pub fn pending_count(&self) -> usize {
        self.staged.len()
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::illegal_state("session is closed"));
        }
        Ok(())
    }

    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn insert(&mut self, record: Record) -> EngineResult<()> {
        self.ensure_open()?;
        let seq = self.seq();
        let key = (record.kind(), record.id().clone());
        match self.staged.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert((seq, Staged::Insert(record)));
            }
            Entry::Occupied(mut slot) => match &slot.get().1 {
                Staged::Insert(_) => slot.get_mut().1 = Staged::Insert(record),
                Staged::Update(_) | Staged::Delete(_) => {
                    return Err(EngineError::illegal_state(format!(
                        "{} '{}' is already persistent",
                        record.kind(),
                        record.id()
                    )));
                }
            },
        }
        Ok(())
    }

    pub fn update(&mut self, record: Record) -> EngineResult<()> {
        self.ensure_open()?;
        let seq = self.seq();
        let key = (record.kind(), record.id().clone());
        match self.staged.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert((seq, Staged::Update(record)));
            }
            Entry::Occupied(mut slot) => match &slot.get().1 {
                Staged::Insert(_) => slot.get_mut().1 = Staged::Insert(record),
                Staged::Update(_) => slot.get_mut().1 = Staged::Update(record),
                Staged::Delete(_) => {
                    return Err(EngineError::illegal_state(format!(
                        "{} '{}' is staged for deletion",
                        record.kind(),
                        record.id()
                    )));
                }
            },
        }
        Ok(())
    }

    pub fn delete(&mut self, record: Record) -> EngineResult<()> {
        self.ensure_open()?;
        let seq = self.seq();
        let key = (record.kind(), record.id().clone());
        match self.staged.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert((seq, Staged::Delete(record)));
            }
            Entry::Occupied(mut slot) => match &slot.get().1 {
                // Never reached the store: both cancel out.
                Staged::Insert(_) => {
                    slot.remove();
                }
                Staged::Update(_) => slot.get_mut().1 = Staged::Delete(record),
                Staged::Delete(_) => {}
            },
        }
        Ok(())
    }

    pub fn find_by_id(&self, kind: EntityKind, id: &EntityId) -> EngineResult<Option<Record>> {
        self.ensure_open()?;
        match self.staged.get(&(kind, id.clone())) {
            Some((_, Staged::Insert(r) | Staged::Update(r))) => Ok(Some(r.clone())),
            Some((_, Staged::Delete(_))) => Ok(None),
            None => Ok(self.store.find_by_id(kind, id)?),
        }
    }

    /// Rows of a keyed query: committed state overlaid with this session's stage.
    pub fn select_list(&self, query_id: &str, params: &QueryParams) -> EngineResult<Vec<Record>> {
        self.ensure_open()?;
        if self.staged.is_empty() {
            return Ok(self.store.select_list(query_id, params)?);
        }

        let rows = self.overlay(query_id, params)?;
        Ok(paginate(rows, params.page).into_iter().map(|(r, _)| r).collect())
    }

    /// At most one row; more than one match is [`EngineError::TooManyResults`].
    pub fn select_one(&self, query_id: &str, params: &QueryParams) -> EngineResult<Option<Record>> {
        let mut rows = self.select_list(query_id, params)?;
        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            n => Err(EngineError::TooManyResults(n)),
        }
    }

    pub fn select_count(&self, query_id: &str, params: &QueryParams) -> EngineResult<usize> {
        self.ensure_open()?;
        if self.staged.is_empty() {
            return Ok(self.store.select_count(query_id, params)?);
        }
        Ok(self.overlay(query_id, params)?.len())
    }

    /// Unpaged, sorted query result with staged changes applied.
    fn overlay(&self, query_id: &str, params: &QueryParams) -> EngineResult<Vec<(Record, serde_json::Value)>> {
        let unpaged = params.unpaged();
        let committed = self.store.select_list(query_id, &unpaged)?;

        let mut rows = Vec::with_capacity(committed.len());
        for record in committed {
            let key = (record.kind(), record.id().clone());
            match self.staged.get(&key) {
                Some((_, Staged::Delete(_))) => {}
                Some((_, Staged::Update(staged) | Staged::Insert(staged))) => {
                    if self.store.matches(query_id, &unpaged, staged)? {
                        rows.push((staged.clone(), staged.to_json()?));
                    }
                }
                None => {
                    let json = record.to_json()?;
                    rows.push((record, json));
                }
            }
        }

        // Staged inserts and updates that did not match in committed state.
        for (key, (_, staged)) in &self.staged {
            let candidate = match staged {
                Staged::Insert(r) | Staged::Update(r) => r,
                Staged::Delete(_) => continue,
            };
            if rows.iter().any(|(r, _)| r.kind() == key.0 && r.id() == &key.1) {
                continue;
            }
            if self.store.matches(query_id, &unpaged, candidate)? {
                rows.push((candidate.clone(), candidate.to_json()?));
            }
        }

        sort_rows(&mut rows, &params.order_by);
        Ok(rows)
    }

    /// Apply every staged mutation in one atomic store call and clear the stage.
    ///
    /// Inserts go parents first, deletes children first. On failure nothing
    /// reaches the store and the stage is discarded.
    pub fn flush(&mut self) -> EngineResult<usize> {
        self.ensure_open()?;
        if self.staged.is_empty() {
            return Ok(0);
        }

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for (_, (seq, staged)) in self.staged.drain() {
            match staged {
                Staged::Insert(r) => inserts.push((seq, r)),
                Staged::Update(r) => updates.push((seq, r)),
                Staged::Delete(r) => deletes.push((seq, r)),
            }
        }
        inserts.sort_by_key(|(seq, r)| (r.kind().flush_rank(), *seq));
        updates.sort_by_key(|(seq, _)| *seq);
        deletes.sort_by_key(|(seq, r)| (core::cmp::Reverse(r.kind().flush_rank()), *seq));

        let (insert_count, update_count, delete_count) = (inserts.len(), updates.len(), deletes.len());
        let operations: Vec<StoreOperation> = inserts
            .into_iter()
            .map(|(_, r)| StoreOperation::Insert(r))
            .chain(updates.into_iter().map(|(_, r)| StoreOperation::Update(r)))
            .chain(deletes.into_iter().map(|(_, r)| StoreOperation::Delete(r)))
            .collect();

        self.store.apply(&operations)?;

        debug!(
            inserts = insert_count,
            updates = update_count,
            deletes = delete_count,
            "session flushed"
        );
        Ok(operations.len())
    }

    /// Discard every staged mutation.
    pub fn rollback(&mut self) {
        if !self.staged.is_empty() {
            debug!(discarded = self.staged.len(), "session rolled back");
        }
        self.staged.clear();
    }

    /// Release the session. Idempotent; pending mutations are discarded.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.staged.clear();
        self.closed = true;
    }
}
