//! Fluent query builder shared by every entity kind.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use procflow_core::{EngineError, EngineResult, Entity};

use crate::command_executor::{Command, CommandExecutor};
use crate::context::ExecutionContext;
use crate::persistence::EntityManager;
use crate::store::{Direction, Filter, OrderBy, Pagination, QueryParams};

/// Filter/order/page specification executed as one read against the store.
///
/// Filter methods consume and return the builder. `order_by` must be followed
/// by [`asc`](Self::asc) or [`desc`](Self::desc); the direction call applies to
/// the most recent sort key and the last call wins. Misuse is recorded and
/// reported when the query executes.
///
/// A query built with [`Query::new`] runs in its own unit of work. The `*_in`
/// variants run inside an existing context, seeing its staged changes.
pub struct Query<M: EntityManager> {
    executor: Option<Arc<CommandExecutor>>,
    query_id: String,
    params: QueryParams,
    ordering: Vec<(String, Option<Direction>)>,
    error: Option<EngineError>,
    _manager: PhantomData<fn() -> M>,
}

impl<M: EntityManager> fmt::Debug for Query<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("query_id", &self.query_id)
            .field("params", &self.params)
            .field("ordering", &self.ordering)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<M: EntityManager> Query<M> {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self {
            executor: Some(executor),
            ..Self::detached()
        }
    }

    /// Query without an executor; only the `*_in` methods can run it.
    pub fn detached() -> Self {
        Self {
            executor: None,
            query_id: <M::Entity as Entity>::KIND.criteria_query_id().to_string(),
            params: QueryParams::new(),
            ordering: Vec::new(),
            error: None,
            _manager: PhantomData,
        }
    }

    /// Run a custom named query instead of the kind's criteria query.
    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = query_id.into();
        self
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.params.filters.push(filter);
        self
    }

    /// Free-form parameter handed to custom named queries.
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.parameters.insert(key.into(), value.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.ordering.retain(|(f, _)| *f != field);
        self.ordering.push((field, None));
        self
    }

    pub fn asc(self) -> Self {
        self.direction(Direction::Asc)
    }

    pub fn desc(self) -> Self {
        self.direction(Direction::Desc)
    }

    fn direction(mut self, direction: Direction) -> Self {
        match self.ordering.last_mut() {
            Some((_, slot)) => *slot = Some(direction),
            None => {
                return self.fail(EngineError::illegal_argument(
                    "call an order_by method before asc() or desc()",
                ));
            }
        }
        self
    }

    /// Record the first builder misuse.
    pub(crate) fn fail(mut self, error: EngineError) -> Self {
        self.error.get_or_insert(error);
        self
    }

    fn resolved(&self, page: Option<Pagination>) -> EngineResult<QueryParams> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let order_by = self
            .ordering
            .iter()
            .map(|(field, direction)| match direction {
                Some(direction) => Ok(OrderBy {
                    field: field.clone(),
                    direction: *direction,
                }),
                None => Err(EngineError::illegal_argument(format!(
                    "order by '{field}' needs asc() or desc()"
                ))),
            })
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(QueryParams {
            order_by,
            page,
            ..self.params.clone()
        })
    }

    pub fn list_in(&self, ctx: &mut ExecutionContext) -> EngineResult<Vec<M::Entity>> {
        let params = self.resolved(None)?;
        ctx.manager::<M>().list_by(&self.query_id, &params)
    }

    pub fn list_page_in(&self, ctx: &mut ExecutionContext, offset: usize, limit: usize) -> EngineResult<Vec<M::Entity>> {
        let params = self.resolved(Some(Pagination::new(offset, limit)))?;
        ctx.manager::<M>().list_by(&self.query_id, &params)
    }

    pub fn single_result_in(&self, ctx: &mut ExecutionContext) -> EngineResult<Option<M::Entity>> {
        let params = self.resolved(None)?;
        ctx.manager::<M>().one_by(&self.query_id, &params)
    }

    pub fn count_in(&self, ctx: &mut ExecutionContext) -> EngineResult<usize> {
        let params = self.resolved(None)?;
        ctx.session().select_count(&self.query_id, &params)
    }

    pub fn list(&self) -> EngineResult<Vec<M::Entity>> {
        self.run("ListQuery", |q, ctx| q.list_in(ctx))
    }

    pub fn list_page(&self, offset: usize, limit: usize) -> EngineResult<Vec<M::Entity>> {
        self.run("ListPageQuery", |q, ctx| q.list_page_in(ctx, offset, limit))
    }

    /// `None` when nothing matches; [`EngineError::TooManyResults`] when more than one row does.
    pub fn single_result(&self) -> EngineResult<Option<M::Entity>> {
        self.run("SingleResultQuery", |q, ctx| q.single_result_in(ctx))
    }

    pub fn count(&self) -> EngineResult<usize> {
        self.run("CountQuery", |q, ctx| q.count_in(ctx))
    }

    fn run<T, F>(&self, name: &'static str, read: F) -> EngineResult<T>
    where
        F: Fn(&Self, &mut ExecutionContext) -> EngineResult<T>,
    {
        let executor = self.executor.as_ref().ok_or_else(|| {
            EngineError::illegal_state("query has no command executor; use the *_in variants")
        })?;
        executor.execute(&ExecuteQuery {
            name,
            query: self,
            read,
        })
    }
}

struct ExecuteQuery<'q, M: EntityManager, F> {
    name: &'static str,
    query: &'q Query<M>,
    read: F,
}

impl<M, F, T> Command for ExecuteQuery<'_, M, F>
where
    M: EntityManager,
    F: Fn(&Query<M>, &mut ExecutionContext) -> EngineResult<T>,
{
    type Output = T;

    fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<T> {
        (self.read)(self.query, ctx)
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::services::EngineServices;
    use crate::store::InMemoryStore;
    use crate::tasks::{SaveTaskCmd, TaskEntity, TaskEntityManager};

    fn executor() -> Arc<CommandExecutor> {
        let services = EngineServices::new(EngineConfig::default(), Arc::new(InMemoryStore::new()));
        Arc::new(CommandExecutor::new(services))
    }

    #[test]
    fn direction_without_order_by_fails_on_execution() {
        let query = Query::<TaskEntityManager>::new(executor()).desc();
        assert!(matches!(query.list(), Err(EngineError::IllegalArgument(_))));
    }

    #[test]
    fn order_by_without_direction_fails_on_execution() {
        let query = Query::<TaskEntityManager>::new(executor()).order_by("priority");
        assert!(matches!(query.count(), Err(EngineError::IllegalArgument(_))));
    }

    #[test]
    fn last_direction_wins() {
        let executor = executor();
        for priority in [10, 30, 20] {
            executor
                .execute(&SaveTaskCmd {
                    task: TaskEntity::new().with_priority(priority),
                })
                .unwrap();
        }

        let priorities: Vec<i32> = Query::<TaskEntityManager>::new(executor)
            .order_by("priority")
            .desc()
            .asc()
            .list()
            .unwrap()
            .into_iter()
            .map(|t| t.priority)
            .collect();
        assert_eq!(priorities, vec![10, 20, 30]);
    }

    #[test]
    fn detached_query_needs_a_context() {
        let query = Query::<TaskEntityManager>::detached();
        assert!(matches!(query.list(), Err(EngineError::IllegalState(_))));
    }
}
