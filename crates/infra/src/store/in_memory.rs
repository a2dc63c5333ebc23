use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;

use procflow_core::{EntityId, EntityKind, ExpectedRevision};

use super::query::{QueryParams, paginate, sort_rows};
use super::r#trait::{BackingStore, StoreError, StoreOperation};
use crate::persistence::Record;

/// Extra predicate of a custom named query, evaluated on the serialized row
/// together with the query's parameters.
pub type QueryPredicate = Arc<dyn Fn(&JsonValue, &QueryParams) -> bool + Send + Sync>;

#[derive(Clone)]
struct NamedQuery {
    kind: EntityKind,
    predicate: Option<QueryPredicate>,
}

#[derive(Debug, Clone)]
struct StoredRow {
    record: Record,
    json: JsonValue,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<(EntityKind, EntityId), StoredRow>,
    /// Every identifier ever inserted, including deleted ones.
    used_ids: HashSet<EntityId>,
}

/// In-memory backing store.
///
/// Intended for tests/dev. Not optimized for performance: every flush clones
/// the tables so a failing batch leaves no trace.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    queries: RwLock<HashMap<String, NamedQuery>>,
}

impl core::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("rows", &self.len().unwrap_or_default())
            .finish()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store with the built-in `select<Kind>ByQueryCriteria` queries registered.
    pub fn new() -> Self {
        let queries = EntityKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind.criteria_query_id().to_string(),
                    NamedQuery {
                        kind,
                        predicate: None,
                    },
                )
            })
            .collect();

        Self {
            tables: RwLock::new(Tables::default()),
            queries: RwLock::new(queries),
        }
    }

    /// Register (or replace) a named query over rows of `kind`.
    ///
    /// The query's filters still apply; `predicate` is an additional
    /// condition evaluated with the query's free-form parameters.
    pub fn register_query<F>(&self, query_id: impl Into<String>, kind: EntityKind, predicate: F) -> Result<(), StoreError>
    where
        F: Fn(&JsonValue, &QueryParams) -> bool + Send + Sync + 'static,
    {
        let mut queries = self.queries.write().map_err(|_| StoreError::Poisoned)?;
        queries.insert(
            query_id.into(),
            NamedQuery {
                kind,
                predicate: Some(Arc::new(predicate)),
            },
        );
        Ok(())
    }

    /// Number of live rows across all kinds.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.tables.read().map_err(|_| StoreError::Poisoned)?.rows.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Number of live rows of one kind.
    pub fn count_kind(&self, kind: EntityKind) -> Result<usize, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tables.rows.keys().filter(|(k, _)| *k == kind).count())
    }

    fn named_query(&self, query_id: &str) -> Result<NamedQuery, StoreError> {
        let queries = self.queries.read().map_err(|_| StoreError::Poisoned)?;
        queries
            .get(query_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownQuery(query_id.to_string()))
    }

    fn row_matches(query: &NamedQuery, params: &QueryParams, kind: EntityKind, json: &JsonValue) -> bool {
        kind == query.kind
            && params.matches(json)
            && query.predicate.as_ref().is_none_or(|p| p(json, params))
    }

    fn matching_rows(&self, query_id: &str, params: &QueryParams) -> Result<Vec<(Record, JsonValue)>, StoreError> {
        let query = self.named_query(query_id)?;
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tables
            .rows
            .iter()
            .filter(|((kind, _), row)| Self::row_matches(&query, params, *kind, &row.json))
            .map(|(_, row)| (row.record.clone(), row.json.clone()))
            .collect())
    }

    fn apply_one(tables: &mut Tables, op: &StoreOperation) -> Result<(), StoreError> {
        let record = op.record();
        let key = (record.kind(), record.id().clone());

        match op {
            StoreOperation::Insert(record) => {
                if tables.used_ids.contains(record.id()) {
                    return Err(StoreError::DuplicateId {
                        kind: record.kind(),
                        id: record.id().clone(),
                    });
                }
                if let Some((parent_kind, parent_id)) = record.parent() {
                    if !tables.rows.contains_key(&(parent_kind, parent_id.clone())) {
                        return Err(StoreError::ForeignKey(format!(
                            "{} '{}' references missing {parent_kind} '{parent_id}'",
                            record.kind(),
                            record.id()
                        )));
                    }
                }

                let mut record = record.clone();
                record.set_revision(1);
                let json = record.to_json()?;
                tables.used_ids.insert(record.id().clone());
                tables.rows.insert(key, StoredRow { record, json });
            }
            StoreOperation::Update(record) => {
                let current = Self::current_revision(tables, &key)?;
                ExpectedRevision::Exact(record.revision())
                    .check(current)
                    .map_err(|e| StoreError::Concurrency(format!("{} '{}': {e}", record.kind(), record.id())))?;

                let mut record = record.clone();
                record.set_revision(current + 1);
                let json = record.to_json()?;
                tables.rows.insert(key, StoredRow { record, json });
            }
            StoreOperation::Delete(record) => {
                let current = Self::current_revision(tables, &key)?;
                ExpectedRevision::Exact(record.revision())
                    .check(current)
                    .map_err(|e| StoreError::Concurrency(format!("{} '{}': {e}", record.kind(), record.id())))?;

                let has_children = tables
                    .rows
                    .values()
                    .any(|row| row.record.parent() == Some((record.kind(), record.id())));
                if has_children {
                    return Err(StoreError::ForeignKey(format!(
                        "{} '{}' is still referenced",
                        record.kind(),
                        record.id()
                    )));
                }

                tables.rows.remove(&key);
            }
        }
        Ok(())
    }

    fn current_revision(tables: &Tables, key: &(EntityKind, EntityId)) -> Result<u64, StoreError> {
        tables
            .rows
            .get(key)
            .map(|row| row.record.revision())
            .ok_or_else(|| StoreError::Concurrency(format!("{} '{}' no longer exists", key.0, key.1)))
    }
}

impl BackingStore for InMemoryStore {
    fn find_by_id(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Record>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tables
            .rows
            .get(&(kind, id.clone()))
            .map(|row| row.record.clone()))
    }

    fn select_list(&self, query_id: &str, params: &QueryParams) -> Result<Vec<Record>, StoreError> {
        let mut rows = self.matching_rows(query_id, params)?;
        sort_rows(&mut rows, &params.order_by);
        let records = rows.into_iter().map(|(record, _)| record).collect();
        Ok(paginate(records, params.page))
    }

    fn select_count(&self, query_id: &str, params: &QueryParams) -> Result<usize, StoreError> {
        Ok(self.matching_rows(query_id, params)?.len())
    }

    fn matches(&self, query_id: &str, params: &QueryParams, record: &Record) -> Result<bool, StoreError> {
        let query = self.named_query(query_id)?;
        let json = record.to_json()?;
        Ok(Self::row_matches(&query, params, record.kind(), &json))
    }

    fn apply(&self, operations: &[StoreOperation]) -> Result<(), StoreError> {
        if operations.is_empty() {
            return Ok(());
        }

        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;

        // Work on a copy; swap it in only when every operation succeeded.
        let mut next = tables.clone();
        for op in operations {
            Self::apply_one(&mut next, op)?;
        }
        *tables = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Filter;
    use crate::tasks::{AttachmentEntity, TaskEntity};

    fn task(priority: i32) -> TaskEntity {
        TaskEntity::new().with_priority(priority)
    }

    #[test]
    fn insert_assigns_revision_and_update_bumps_it() {
        let store = InMemoryStore::new();
        let t = task(10);
        store.apply(&[StoreOperation::Insert(t.clone().into())]).unwrap();

        let stored = store.find_by_id(EntityKind::Task, &t.id).unwrap().unwrap();
        assert_eq!(stored.revision(), 1);

        store.apply(&[StoreOperation::Update(stored.clone())]).unwrap();
        let updated = store.find_by_id(EntityKind::Task, &t.id).unwrap().unwrap();
        assert_eq!(updated.revision(), 2);

        // Stale revision.
        let err = store.apply(&[StoreOperation::Update(stored)]).unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
    }

    #[test]
    fn failing_batch_leaves_no_trace() {
        let store = InMemoryStore::new();
        let a = task(1);
        let orphan = AttachmentEntity::new(EntityId::parse("missing-task").unwrap());

        let err = store
            .apply(&[
                StoreOperation::Insert(a.clone().into()),
                StoreOperation::Insert(orphan.into()),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey(_)));
        assert!(store.find_by_id(EntityKind::Task, &a.id).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn deleted_ids_are_never_reused() {
        let store = InMemoryStore::new();
        let t = task(1);
        store.apply(&[StoreOperation::Insert(t.clone().into())]).unwrap();
        let stored = store.find_by_id(EntityKind::Task, &t.id).unwrap().unwrap();
        store.apply(&[StoreOperation::Delete(stored)]).unwrap();

        let err = store.apply(&[StoreOperation::Insert(t.into())]).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
    }

    #[test]
    fn parent_with_children_cannot_be_deleted() {
        let store = InMemoryStore::new();
        let t = task(1);
        let a = AttachmentEntity::new(t.id.clone());
        store
            .apply(&[
                StoreOperation::Insert(t.clone().into()),
                StoreOperation::Insert(a.into()),
            ])
            .unwrap();

        let stored = store.find_by_id(EntityKind::Task, &t.id).unwrap().unwrap();
        let err = store.apply(&[StoreOperation::Delete(stored)]).unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey(_)));
    }

    #[test]
    fn criteria_query_filters_sorts_and_pages() {
        let store = InMemoryStore::new();
        let ops: Vec<_> = [30, 10, 20]
            .into_iter()
            .map(|p| StoreOperation::Insert(task(p).into()))
            .collect();
        store.apply(&ops).unwrap();

        let mut params = QueryParams::new().with_filter(Filter::greater_or_equal("priority", 15));
        params.order_by.push(crate::store::OrderBy {
            field: "priority".into(),
            direction: crate::store::Direction::Desc,
        });

        let query_id = EntityKind::Task.criteria_query_id();
        let priorities: Vec<i32> = store
            .select_list(query_id, &params)
            .unwrap()
            .into_iter()
            .map(|r| match r {
                Record::Task(t) => t.priority,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(priorities, vec![30, 20]);
        assert_eq!(store.select_count(query_id, &params).unwrap(), 2);

        let paged = params.with_page(crate::store::Pagination::new(1, 5));
        assert_eq!(store.select_list(query_id, &paged).unwrap().len(), 1);
    }

    #[test]
    fn unknown_query_is_an_error() {
        let store = InMemoryStore::new();
        let err = store.select_list("selectNothing", &QueryParams::new()).unwrap_err();
        assert_eq!(err, StoreError::UnknownQuery("selectNothing".into()));
    }

    #[test]
    fn custom_query_uses_its_predicate_and_parameters() {
        let store = InMemoryStore::new();
        store
            .register_query("selectTasksAbovePriority", EntityKind::Task, |row, params| {
                let min = params.parameters.get("min").and_then(JsonValue::as_i64).unwrap_or(0);
                row.get("priority").and_then(JsonValue::as_i64).is_some_and(|p| p > min)
            })
            .unwrap();
        store
            .apply(&[
                StoreOperation::Insert(task(5).into()),
                StoreOperation::Insert(task(50).into()),
            ])
            .unwrap();

        let params = QueryParams::new().with_parameter("min", 10);
        assert_eq!(store.select_count("selectTasksAbovePriority", &params).unwrap(), 1);
    }
}
