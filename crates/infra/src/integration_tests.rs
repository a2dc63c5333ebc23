//! Integration tests for the full command pipeline.
//!
//! Tests: ProcessEngine → interceptor chain → Session → BackingStore, with
//! listeners observing the dispatched events.
//!
//! Verifies:
//! - A unit of work commits entirely or not at all
//! - Events reach listeners in dispatch order, before the staged change lands
//! - Optimistic conflicts are detected, retried, and bounded
//! - Query ordering and paging are deterministic
//! - Job claiming has exactly one winner

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::Value as JsonValue;

    use procflow_core::{EngineError, EngineResult, EntityId, EntityKind};
    use procflow_events::{EngineEvent, EngineEventType, EventListener};

    use crate::command_executor::CommandConfig;
    use crate::config::EngineConfig;
    use crate::context::ExecutionContext;
    use crate::engine::ProcessEngine;
    use crate::jobs::{CreateJobCmd, JobEntity, JobFailureOutcome, JobRunOutcome, LockJobCmd, RetryPolicy};
    use crate::persistence::Persistent;
    use crate::store::{BackingStore, InMemoryStore, QueryParams};
    use crate::tasks::{AttachmentEntity, CreateAttachmentCmd, SaveTaskCmd, TaskEntity};

    type Recorded = Arc<Mutex<Vec<(EngineEventType, EntityKind, EntityId)>>>;

    fn engine_with(config: EngineConfig) -> (Arc<InMemoryStore>, ProcessEngine) {
        procflow_observability::init_for_tests();
        let store = Arc::new(InMemoryStore::new());
        let engine = ProcessEngine::builder()
            .with_name("integration")
            .with_config(config)
            .with_store(store.clone())
            .build();
        (store, engine)
    }

    fn engine() -> (Arc<InMemoryStore>, ProcessEngine) {
        engine_with(EngineConfig::default())
    }

    fn record_events(engine: &ProcessEngine) -> Recorded {
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = recorded.clone();
        engine
            .event_dispatcher()
            .add_listener(Arc::new(move |event: &EngineEvent| -> anyhow::Result<()> {
                sink.lock()
                    .unwrap()
                    .push((event.event_type(), event.entity_kind(), event.entity_id().clone()));
                Ok(())
            }));
        recorded
    }

    fn types(recorded: &Recorded) -> Vec<EngineEventType> {
        recorded.lock().unwrap().iter().map(|(t, _, _)| *t).collect()
    }

    fn stored_task(store: &InMemoryStore, id: &EntityId) -> TaskEntity {
        let record = store.find_by_id(EntityKind::Task, id).unwrap().unwrap();
        TaskEntity::from_record(record).unwrap()
    }

    // --- atomicity ---

    #[test]
    fn failing_command_leaves_no_trace() {
        let (store, engine) = engine();

        let result = engine.execute(&|ctx: &mut ExecutionContext| -> EngineResult<()> {
            ctx.tasks().insert(TaskEntity::new().with_name("first"))?;
            ctx.tasks().insert(TaskEntity::new().with_name("second"))?;
            Err(EngineError::illegal_state("business rule violated"))
        });

        assert!(matches!(result, Err(EngineError::IllegalState(_))));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn failing_flush_leaves_no_trace() {
        let (store, engine) = engine();
        let existing = engine.save_task(TaskEntity::new().with_name("existing")).unwrap();

        // The duplicate id is only detected by the store, after the fresh row was staged.
        let result = engine.execute(&|ctx: &mut ExecutionContext| -> EngineResult<()> {
            ctx.tasks().insert(TaskEntity::new().with_name("fresh"))?;
            ctx.tasks().insert(TaskEntity::new().with_id(existing.id.clone()))
        });

        assert!(matches!(result, Err(EngineError::IllegalArgument(_))));
        assert_eq!(store.count_kind(EntityKind::Task).unwrap(), 1);
        assert_eq!(stored_task(&store, &existing.id).name.as_deref(), Some("existing"));
    }

    #[test]
    fn insert_then_delete_in_one_unit_of_work_touches_nothing() {
        let (store, engine) = engine();
        let id = EntityId::generate();

        let flushed = engine
            .execute(&|ctx: &mut ExecutionContext| -> EngineResult<usize> {
                let task = TaskEntity::new().with_id(id.clone());
                ctx.tasks().insert(task.clone())?;
                ctx.tasks().delete(task)?;
                assert_eq!(ctx.session().pending_count(), 0);
                ctx.flush()
            })
            .unwrap();

        assert_eq!(flushed, 0);
        assert!(store.is_empty().unwrap());
        // The id never reached the store, so it is still free.
        engine.save_task(TaskEntity::new().with_id(id)).unwrap();
    }

    #[test]
    fn reads_see_the_units_own_staged_changes() {
        let (store, engine) = engine();
        engine.save_task(TaskEntity::new().with_priority(10)).unwrap();

        let (listed, counted) = engine
            .execute(&|ctx: &mut ExecutionContext| -> EngineResult<(usize, usize)> {
                ctx.tasks().insert(TaskEntity::new().with_priority(99))?;
                let query = ctx.tasks().query().min_priority(90);
                Ok((query.list_in(ctx)?.len(), query.count_in(ctx)?))
            })
            .unwrap();

        assert_eq!((listed, counted), (1, 1));
        assert_eq!(store.count_kind(EntityKind::Task).unwrap(), 2);
    }

    // --- events ---

    #[test]
    fn listeners_see_events_in_dispatch_order() {
        let (_, engine) = engine();
        let recorded = record_events(&engine);

        let task = engine.save_task(TaskEntity::new()).unwrap();
        let task = engine.save_task(TaskEntity { priority: 80, ..task }).unwrap();
        engine
            .create_attachment(AttachmentEntity::new(task.id.clone()).with_name("spec.pdf"))
            .unwrap();
        engine.delete_task(task.id.clone()).unwrap();

        assert_eq!(
            types(&recorded),
            vec![
                EngineEventType::EntityCreated,
                EngineEventType::EntityUpdated,
                EngineEventType::EntityCreated,
                EngineEventType::EntityDeleted,
                EngineEventType::EntityDeleted,
            ]
        );
        let kinds: Vec<EntityKind> = recorded.lock().unwrap().iter().map(|(_, k, _)| *k).collect();
        assert_eq!(kinds[3], EntityKind::Task);
        assert_eq!(kinds[4], EntityKind::Attachment);
    }

    #[test]
    fn cancellation_is_dispatched_while_the_job_still_exists() {
        let (store, engine) = engine();
        let job = engine.create_job(CreateJobCmd::new("report")).unwrap();

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let reader = store.clone();
        engine.event_dispatcher().add_typed_listener(
            [EngineEventType::JobCanceled],
            Arc::new(move |event: &EngineEvent| -> anyhow::Result<()> {
                let still_there = reader.find_by_id(EntityKind::Job, event.entity_id())?.is_some();
                sink.lock().unwrap().push(still_there);
                Ok(())
            }),
        );

        engine.delete_job(Some(job.id.as_str())).unwrap();

        assert_eq!(*observed.lock().unwrap(), vec![true]);
        assert!(store.find_by_id(EntityKind::Job, &job.id).unwrap().is_none());
    }

    #[test]
    fn disabled_dispatcher_still_deletes() {
        let (store, engine) = engine_with(EngineConfig::default().with_event_dispatcher_enabled(false));
        let recorded = record_events(&engine);
        let job = engine.create_job(CreateJobCmd::new("report")).unwrap();

        engine.delete_job(Some(job.id.as_str())).unwrap();

        assert!(recorded.lock().unwrap().is_empty());
        assert_eq!(store.count_kind(EntityKind::Job).unwrap(), 0);
    }

    #[test]
    fn failing_and_panicking_listeners_are_isolated() {
        let (store, engine) = engine();
        let dispatcher = engine.event_dispatcher();
        dispatcher.add_listener(Arc::new(|_: &EngineEvent| -> anyhow::Result<()> {
            anyhow::bail!("listener unavailable")
        }));
        dispatcher.add_listener(Arc::new(|_: &EngineEvent| -> anyhow::Result<()> {
            panic!("listener bug")
        }));
        let recorded = record_events(&engine);

        let job = engine.create_job(CreateJobCmd::new("report")).unwrap();
        engine.delete_job(Some(job.id.as_str())).unwrap();

        assert_eq!(
            types(&recorded),
            vec![EngineEventType::EntityCreated, EngineEventType::JobCanceled]
        );
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn close_removes_listeners() {
        let (_, engine) = engine();
        let recorded = record_events(&engine);
        engine.close();

        engine.save_task(TaskEntity::new()).unwrap();
        assert_eq!(engine.event_dispatcher().listener_count(), 0);
        assert!(recorded.lock().unwrap().is_empty());
    }

    // --- deletion errors ---

    #[test]
    fn deleting_with_a_missing_id_is_illegal_argument() {
        let (_, engine) = engine();
        let recorded = record_events(&engine);

        assert!(matches!(engine.delete_job(None), Err(EngineError::IllegalArgument(_))));
        assert!(matches!(engine.delete_job(Some("")), Err(EngineError::IllegalArgument(_))));
        assert!(matches!(
            engine.delete_history_job(None),
            Err(EngineError::IllegalArgument(_))
        ));
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[test]
    fn deleting_an_unknown_job_is_object_not_found() {
        let (_, engine) = engine();
        let recorded = record_events(&engine);

        assert!(matches!(
            engine.delete_job(Some("no-such-job")),
            Err(EngineError::ObjectNotFound { kind: EntityKind::Job, .. })
        ));
        assert!(matches!(
            engine.delete_history_job(Some("no-such-job")),
            Err(EngineError::ObjectNotFound {
                kind: EntityKind::HistoryJob,
                ..
            })
        ));
        assert!(matches!(
            engine.delete_dead_letter_job(Some("no-such-job")),
            Err(EngineError::ObjectNotFound {
                kind: EntityKind::DeadLetterJob,
                ..
            })
        ));
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[test]
    fn archived_job_can_be_deleted() {
        let (store, engine) = engine_with(EngineConfig::default().with_archive_completed_jobs(true));
        engine
            .job_handlers()
            .register("report", |_: &JobEntity, _: &mut ExecutionContext| -> anyhow::Result<()> { Ok(()) });
        let job = engine.create_job(CreateJobCmd::new("report")).unwrap();
        engine.job_executor().execute_available().unwrap();

        let archived = engine
            .create_history_job_query()
            .job_id(&job.id)
            .single_result()
            .unwrap()
            .unwrap();
        let recorded = record_events(&engine);
        engine.delete_history_job(Some(archived.id.as_str())).unwrap();

        assert_eq!(
            *recorded.lock().unwrap(),
            vec![(EngineEventType::JobCanceled, EntityKind::HistoryJob, archived.id.clone())]
        );
        assert!(store.is_empty().unwrap());
    }

    // --- optimistic concurrency ---

    #[test]
    fn stale_update_loses_the_race() {
        let (store, engine) = engine();
        let task = engine.save_task(TaskEntity::new()).unwrap();

        let mut first = ExecutionContext::new(engine.services().clone());
        let mut second = ExecutionContext::new(engine.services().clone());
        let mut a = first.tasks().get(&task.id).unwrap();
        let mut b = second.tasks().get(&task.id).unwrap();

        a.priority = 1;
        first.tasks().update(a).unwrap();
        first.flush().unwrap();

        b.priority = 2;
        second.tasks().update(b).unwrap();
        assert!(matches!(second.flush(), Err(EngineError::Concurrency(_))));

        let stored = stored_task(&store, &task.id);
        assert_eq!((stored.priority, stored.revision), (1, 2));
    }

    #[test]
    fn conflicting_command_is_rerun_with_fresh_state() {
        let (store, engine) = engine();
        let task = engine.save_task(TaskEntity::new().with_priority(50)).unwrap();
        let competitor = engine.command_executor().clone();
        let attempts = AtomicU32::new(0);

        let priority = engine
            .execute(&|ctx: &mut ExecutionContext| -> EngineResult<i32> {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                let mut current = ctx.tasks().get(&task.id)?;
                if attempt == 0 {
                    // Another writer commits between our read and our flush.
                    competitor.execute(&SaveTaskCmd {
                        task: TaskEntity {
                            priority: 70,
                            ..current.clone()
                        },
                    })?;
                }
                current.priority += 1;
                let priority = current.priority;
                ctx.tasks().update(current)?;
                Ok(priority)
            })
            .unwrap();

        assert_eq!(priority, 71);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(stored_task(&store, &task.id).priority, 71);
    }

    #[test]
    fn retries_are_bounded() {
        let (store, engine) = engine_with(EngineConfig::default().with_command_retry_attempts(4));
        let task = engine.save_task(TaskEntity::new()).unwrap();
        let competitor = engine.command_executor().clone();
        let attempts = AtomicU32::new(0);

        let bump = |ctx: &mut ExecutionContext| -> EngineResult<()> {
            attempts.fetch_add(1, Ordering::SeqCst);
            let mut current = ctx.tasks().get(&task.id)?;
            competitor.execute(&SaveTaskCmd { task: current.clone() })?;
            current.priority += 1;
            ctx.tasks().update(current)
        };

        assert!(matches!(engine.execute(&bump), Err(EngineError::Concurrency(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);

        attempts.store(0, Ordering::SeqCst);
        assert!(engine.execute_with(CommandConfig::no_retry(), &bump).is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // Only the competitor's writes landed.
        assert_eq!(stored_task(&store, &task.id).priority, TaskEntity::DEFAULT_PRIORITY);
    }

    // --- jobs ---

    #[test]
    fn racing_claims_have_exactly_one_winner() {
        let (store, engine) = engine();
        let job = engine.create_job(CreateJobCmd::new("report")).unwrap();
        let now = Utc::now();
        let claim = |owner: &str| LockJobCmd {
            job_id: job.id.clone(),
            owner: owner.to_string(),
            now,
            lock_duration: Duration::from_secs(60),
        };

        // Both workers read the unlocked row before either commits.
        let executor = engine.command_executor();
        let mut w1 = ExecutionContext::new(engine.services().clone());
        let mut w2 = ExecutionContext::new(engine.services().clone());
        executor.execute_in(&mut w1, &claim("w1")).unwrap();
        executor.execute_in(&mut w2, &claim("w2")).unwrap();

        let results = [w1.flush(), w2.flush()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results[1].as_ref().is_err_and(EngineError::is_concurrency));

        let record = store.find_by_id(EntityKind::Job, &job.id).unwrap().unwrap();
        let stored = JobEntity::from_record(record).unwrap();
        assert_eq!(stored.lock_owner.as_deref(), Some("w1"));
    }

    #[test]
    fn expired_lock_can_be_reclaimed() {
        let (_, engine) = engine();
        let job = engine.create_job(CreateJobCmd::new("report")).unwrap();
        let now = Utc::now();
        let claim = |owner: &str, at| LockJobCmd {
            job_id: job.id.clone(),
            owner: owner.to_string(),
            now: at,
            lock_duration: Duration::from_secs(60),
        };

        engine.execute_with(CommandConfig::no_retry(), &claim("w1", now)).unwrap();
        let err = engine
            .execute_with(CommandConfig::no_retry(), &claim("w2", now + chrono::Duration::seconds(30)))
            .unwrap_err();
        assert!(err.is_concurrency());

        let reclaimed = engine
            .execute_with(CommandConfig::no_retry(), &claim("w2", now + chrono::Duration::seconds(61)))
            .unwrap();
        assert_eq!(reclaimed.lock_owner.as_deref(), Some("w2"));
    }

    #[test]
    fn exhausted_job_moves_to_dead_letter_and_back() {
        let config = EngineConfig::default()
            .with_default_job_retries(1)
            .with_job_retry_policy(RetryPolicy::immediate());
        let (store, engine) = engine_with(config);
        engine.job_handlers().register(
            "mail.*",
            |_: &JobEntity, _: &mut ExecutionContext| -> anyhow::Result<()> { anyhow::bail!("smtp timeout") },
        );
        let recorded = record_events(&engine);
        let job = engine.create_job(CreateJobCmd::new("mail.send")).unwrap();

        let outcomes = engine.job_executor().execute_available().unwrap();
        let dead_letter_job_id = match &outcomes[..] {
            [(id, JobRunOutcome::Failed(JobFailureOutcome::DeadLettered { dead_letter_job_id }))] if *id == job.id => {
                dead_letter_job_id.clone()
            }
            other => panic!("unexpected outcomes: {other:?}"),
        };
        assert!(types(&recorded).contains(&EngineEventType::JobMovedToDeadLetter));

        let dead = engine
            .create_dead_letter_job_query()
            .job_id(&job.id)
            .single_result()
            .unwrap()
            .unwrap();
        assert_eq!(dead.id, dead_letter_job_id);
        assert!(dead.exception_message.as_deref().unwrap_or_default().contains("smtp timeout"));

        let revived = engine.move_dead_letter_job_to_executable(dead.id, 2).unwrap();
        assert_ne!(revived.id, job.id);
        assert_eq!(revived.retries, 2);
        assert_eq!(store.count_kind(EntityKind::DeadLetterJob).unwrap(), 0);
        assert_eq!(engine.create_job_query().handler_type("mail.send").count().unwrap(), 1);
    }

    // --- nested commands ---

    #[test]
    fn nested_commands_commit_with_their_parent() {
        let (store, engine) = engine();
        let executor = engine.command_executor().clone();

        let parent = |fail: bool| {
            let executor = executor.clone();
            move |ctx: &mut ExecutionContext| -> EngineResult<()> {
                let task = executor.execute_in(ctx, &SaveTaskCmd { task: TaskEntity::new() })?;
                executor.execute_in(
                    ctx,
                    &CreateAttachmentCmd {
                        attachment: AttachmentEntity::new(task.id),
                    },
                )?;
                if fail {
                    return Err(EngineError::illegal_state("parent failed after nested commands"));
                }
                Ok(())
            }
        };

        assert!(engine.execute(&parent(true)).is_err());
        assert!(store.is_empty().unwrap());

        engine.execute(&parent(false)).unwrap();
        assert_eq!(store.count_kind(EntityKind::Task).unwrap(), 1);
        assert_eq!(store.count_kind(EntityKind::Attachment).unwrap(), 1);
    }

    // --- queries ---

    #[test]
    fn priority_ordering_is_strictly_descending() {
        let (_, engine) = engine();
        for priority in [40, 0, 80, 20, 60] {
            engine.save_task(TaskEntity::new().with_priority(priority)).unwrap();
        }

        let priorities: Vec<i32> = engine
            .create_task_query()
            .order_by_task_priority()
            .desc()
            .list()
            .unwrap()
            .into_iter()
            .map(|t| t.priority)
            .collect();
        assert_eq!(priorities, vec![80, 60, 40, 20, 0]);
    }

    #[test]
    fn first_page_matches_the_unpaged_prefix() {
        let (_, engine) = engine();
        for i in 0..15 {
            engine.save_task(TaskEntity::new().with_priority((i * 7) % 5)).unwrap();
        }

        let query = engine.create_task_query().order_by_task_priority().asc();
        let all = query.list().unwrap();
        let first = query.list_page(0, 10).unwrap();
        let rest = query.list_page(10, 10).unwrap();

        assert_eq!(all.len(), 15);
        assert_eq!(first, all[..10].to_vec());
        assert_eq!(rest, all[10..].to_vec());
        assert_eq!(query.count().unwrap(), 15);
    }

    #[test]
    fn single_result_rejects_multiple_matches() {
        let (_, engine) = engine();
        engine.save_task(TaskEntity::new().with_owner("kermit")).unwrap();
        engine.save_task(TaskEntity::new().with_owner("kermit")).unwrap();

        assert!(matches!(
            engine.create_task_query().task_owner("kermit").single_result(),
            Err(EngineError::TooManyResults(2))
        ));
        assert_eq!(engine.create_task_query().task_owner("gonzo").single_result().unwrap(), None);
    }

    #[test]
    fn custom_named_query_uses_its_parameters() {
        procflow_observability::init_for_tests();
        let store = Arc::new(InMemoryStore::new());
        store
            .register_query(
                "selectTasksByOwnerParameter",
                EntityKind::Task,
                |row: &JsonValue, params: &QueryParams| {
                    params.parameters.get("owner").is_some_and(|owner| row.get("owner") == Some(owner))
                },
            )
            .unwrap();
        let engine = ProcessEngine::builder().with_store(store.clone()).build();
        for owner in ["kermit", "gonzo", "kermit"] {
            engine.save_task(TaskEntity::new().with_owner(owner)).unwrap();
        }

        let query = engine
            .create_task_query()
            .with_query_id("selectTasksByOwnerParameter")
            .parameter("owner", "kermit");
        assert_eq!(query.list().unwrap().len(), 2);

        let one = engine
            .execute(&|ctx: &mut ExecutionContext| -> EngineResult<bool> {
                let params = QueryParams::new().with_parameter("owner", "gonzo");
                Ok(ctx.session().select_one("selectTasksByOwnerParameter", &params)?.is_some())
            })
            .unwrap();
        assert!(one);
    }

    #[test]
    fn pre_interceptor_sees_every_command() {
        use crate::interceptor::{CommandInterceptor, ContextSlot, Invocation, Next};

        #[derive(Default)]
        struct Counting(AtomicU32);

        impl CommandInterceptor for Counting {
            fn intercept(
                &self,
                invocation: &Invocation<'_>,
                context: ContextSlot<'_>,
                next: Next<'_>,
            ) -> EngineResult<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                next.run(invocation, context)
            }
        }

        let counting = Arc::new(Counting::default());
        let engine = ProcessEngine::builder().with_pre_interceptor(counting.clone()).build();
        engine.save_task(TaskEntity::new()).unwrap();
        engine.create_task_query().count().unwrap();

        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]

        #[test]
        fn paging_agrees_with_a_reference_sort(
            priorities in proptest::collection::vec(0i32..5, 0..25),
            offset in 0usize..30,
            limit in 0usize..30,
        ) {
            let (_, engine) = engine();
            let mut expected: Vec<(i32, EntityId)> = priorities
                .iter()
                .map(|p| {
                    let task = engine.save_task(TaskEntity::new().with_priority(*p)).unwrap();
                    (task.priority, task.id)
                })
                .collect();
            expected.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
            let expected: Vec<EntityId> = expected.into_iter().skip(offset).take(limit).map(|(_, id)| id).collect();

            let page: Vec<EntityId> = engine
                .create_task_query()
                .order_by_task_priority()
                .desc()
                .list_page(offset, limit)
                .unwrap()
                .into_iter()
                .map(|t| t.id)
                .collect();
            prop_assert_eq!(page, expected);
        }
    }

    #[test]
    fn listener_registered_through_the_builder_receives_events() {
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = recorded.clone();
        let listener: Arc<dyn EventListener> = Arc::new(move |event: &EngineEvent| -> anyhow::Result<()> {
            sink.lock()
                .unwrap()
                .push((event.event_type(), event.entity_kind(), event.entity_id().clone()));
            Ok(())
        });
        let engine = ProcessEngine::builder().with_listener(listener).build();

        let task = engine.save_task(TaskEntity::new()).unwrap();
        assert_eq!(
            *recorded.lock().unwrap(),
            vec![(EngineEventType::EntityCreated, EntityKind::Task, task.id)]
        );
    }
}
