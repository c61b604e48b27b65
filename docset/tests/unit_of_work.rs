mod common;

use std::time::Duration;

use common::{Task, context, fast_config, seed};
use docset::prelude::*;

#[tokio::test]
async fn saving_persists_staged_entities() {
    let (ctx, backend) = context(fast_config());

    let mut task = Task::new("write docs", "open", 2);
    ctx.add(&mut task).await.unwrap();

    assert_eq!(task.meta.context(), OperationContext::Insert);
    assert_eq!(ctx.pending_writes().await, 1);
    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert_eq!(ctx.pending_writes().await, 0);

    let stored = backend
        .inner
        .get_document("tasks", task.meta.id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_str("title").unwrap(), "write docs");
    assert!(stored.contains_key("createdDate"));
    assert!(!stored.contains_key("notes"));
    assert!(!stored.contains_key("_id"));
}

#[tokio::test]
async fn only_mutated_entities_are_written_back() {
    let (ctx, backend) = context(fast_config());
    seed(&ctx, (0..5).map(|i| Task::new(&format!("task {i}"), "open", i)).collect()).await;
    let writes_before = backend.writes();

    let loaded = ctx.set::<Task>().all().to_list().await.unwrap();
    assert_eq!(loaded.len(), 5);

    loaded[0].write().await.status = "done".into();
    loaded[3].write().await.status = "done".into();

    assert!(loaded[0].is_dirty());
    assert!(!loaded[1].is_dirty());

    assert_eq!(ctx.save_changes().await.unwrap(), 2);
    assert_eq!(backend.writes() - writes_before, 2);

    let done = ctx
        .set::<Task>()
        .filter(PredicateBuilder::new().equal("status", "done"))
        .unwrap()
        .to_list()
        .await
        .unwrap();
    assert_eq!(done.len(), 2);
}

#[tokio::test]
async fn unchanged_writes_are_skipped() {
    let (ctx, backend) = context(fast_config());
    seed(&ctx, vec![Task::new("stable", "open", 1)]).await;

    let task = ctx.set::<Task>().first().await.unwrap();
    {
        let mut guard = task.write().await;
        guard.status = "open".into();
    }

    let commits = backend.commits();
    assert_eq!(ctx.save_changes().await.unwrap(), 0);
    assert_eq!(backend.commits(), commits);
}

#[tokio::test]
async fn repeated_saves_are_idempotent() {
    let (ctx, backend) = context(fast_config());

    assert_eq!(ctx.save_changes().await.unwrap(), 0);
    assert_eq!(ctx.save_changes().await.unwrap(), 0);
    assert_eq!(backend.commits(), 0);

    let task = {
        seed(&ctx, vec![Task::new("once", "open", 1)]).await;
        ctx.set::<Task>().first().await.unwrap()
    };
    task.write().await.priority = 7;

    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert_eq!(ctx.save_changes().await.unwrap(), 0);
}

#[tokio::test]
async fn outstanding_tasks_time_out_the_save() {
    let (ctx, backend) = context(fast_config());

    let outstanding = ctx.register_task(async { Ok::<_, DocSetError>(()) });

    let mut task = Task::new("blocked", "open", 1);
    ctx.add(&mut task).await.unwrap();

    let err = ctx.save_changes().await.unwrap_err();
    assert!(matches!(err, DocSetError::CommitTimeout(_)));
    assert_eq!(err.kind(), ErrorKind::CommitTimeout);
    assert_eq!(ctx.pending_writes().await, 0);
    assert!(!ctx.has_write_error());

    drop(outstanding);
    assert_eq!(ctx.save_changes().await.unwrap(), 0);
    assert_eq!(backend.commits(), 0);
}

#[tokio::test]
async fn registered_tasks_are_awaited_before_committing() {
    let (ctx, backend) = context(fast_config());

    let task = ctx.register_task(async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, DocSetError>(42)
    });
    let handle = tokio::spawn(task);

    let mut staged = Task::new("after task", "open", 1);
    ctx.add(&mut staged).await.unwrap();

    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert_eq!(handle.await.unwrap().unwrap(), 42);
    assert_eq!(backend.commits(), 1);
}

#[tokio::test]
async fn failed_tasks_set_the_write_error() {
    let (ctx, _backend) = context(fast_config());

    let result = ctx
        .register_task(async { Err::<(), _>(DocSetError::Upload("bucket unavailable".into())) })
        .await;

    assert!(result.is_err());
    assert!(ctx.has_write_error());
}

#[tokio::test]
async fn failed_commits_block_later_saves() {
    let (ctx, backend) = context(fast_config());
    backend.fail_commits(true);

    let mut first = Task::new("first", "open", 1);
    ctx.add(&mut first).await.unwrap();

    let err = ctx.save_changes().await.unwrap_err();
    assert!(matches!(err, DocSetError::Write(_)));
    assert!(ctx.has_write_error());
    assert_eq!(ctx.pending_writes().await, 0);

    backend.fail_commits(false);
    let mut second = Task::new("second", "open", 1);
    ctx.add(&mut second).await.unwrap();
    assert_eq!(ctx.save_changes().await.unwrap(), 0);
    assert_eq!(backend.commits(), 0);

    ctx.clear_write_error();
    ctx.add(&mut second).await.unwrap();
    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert_eq!(backend.commits(), 1);
}

#[tokio::test]
async fn validation_failures_stage_nothing() {
    let (ctx, _backend) = context(fast_config());

    let mut untitled = Task::new("", "open", 1);
    let err = ctx.add(&mut untitled).await.unwrap_err();
    assert!(matches!(err, DocSetError::InvalidEntityState { ref field, .. } if field == "title"));

    let mut anonymous = Task {
        meta: EntityMeta::without_id(),
        ..Task::new("anonymous", "open", 1)
    };
    let err = ctx.add(&mut anonymous).await.unwrap_err();
    assert!(matches!(err, DocSetError::MissingId(ref collection) if collection == "tasks"));

    assert_eq!(ctx.pending_writes().await, 0);
    assert!(!ctx.has_write_error());
}

#[tokio::test]
async fn ignore_all_skips_validation() {
    let (ctx, _backend) = context(fast_config());

    let mut draft = Task::new("", "draft", 0);
    draft.meta.set_context(OperationContext::IgnoreAll);

    ctx.add(&mut draft).await.unwrap();
    assert_eq!(draft.meta.context(), OperationContext::IgnoreAll);
    assert_eq!(ctx.save_changes().await.unwrap(), 1);
}

#[tokio::test]
async fn removed_entities_are_deleted() {
    let (ctx, backend) = context(fast_config());
    let ids = seed(&ctx, vec![Task::new("doomed", "open", 1)]).await;

    let task = ctx.set::<Task>().find(&ids[0]).await.unwrap().unwrap();
    task.write().await.status = "edited".into();
    ctx.remove(&*task.read().await).await.unwrap();

    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert!(backend.inner.get_document("tasks", &ids[0]).await.unwrap().is_none());
}

#[tokio::test]
async fn oversized_batches_are_rejected() {
    let (ctx, backend) = context(fast_config().with_max_batch_size(2));

    for i in 0..3 {
        let mut task = Task::new(&format!("task {i}"), "open", i);
        ctx.add(&mut task).await.unwrap();
    }

    let err = ctx.save_changes().await.unwrap_err();
    assert!(matches!(err, DocSetError::BatchTooLarge { size: 3, limit: 2 }));
    assert_eq!(ctx.pending_writes().await, 0);
    assert_eq!(backend.commits(), 0);
}

#[tokio::test]
async fn duplicate_registrations_fail_the_build() {
    let err = DbContext::builder(docset::memory::InMemoryStore::new())
        .register::<Task>()
        .register::<Task>()
        .build()
        .unwrap_err();

    assert!(matches!(err, DocSetError::Initialization(_)));
}

#[tokio::test]
async fn unregistered_entities_are_rejected() {
    let ctx = DbContext::builder(docset::memory::InMemoryStore::new())
        .register::<Task>()
        .build()
        .unwrap();

    let mut profile = common::Profile::default();
    let err = ctx.add(&mut profile).await.unwrap_err();

    assert!(matches!(err, DocSetError::EntityNotRegistered(_)));
}

#[tokio::test]
async fn held_write_guard_times_out_the_save() {
    let (ctx, backend) = context(fast_config());
    seed(&ctx, vec![Task::new("locked", "open", 1)]).await;

    let task = ctx.set::<Task>().first().await.unwrap();
    let mut guard = task.write().await;
    guard.status = "done".into();

    let outcome = tokio::time::timeout(Duration::from_secs(2), ctx.save_changes())
        .await
        .expect("save must stay within its commit timeout");
    assert!(matches!(outcome, Err(DocSetError::CommitTimeout(_))));

    drop(guard);
    let commits = backend.commits();
    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert_eq!(backend.commits(), commits + 1);
}

#[tokio::test]
async fn held_read_guard_does_not_block_the_save() {
    let (ctx, backend) = context(fast_config());
    let ids = seed(&ctx, vec![Task::new("shared", "open", 1)]).await;

    let task = ctx.set::<Task>().first().await.unwrap();
    task.write().await.status = "done".into();
    let reader = task.read().await;

    let saved = tokio::time::timeout(Duration::from_secs(2), ctx.save_changes())
        .await
        .expect("save must stay within its commit timeout");
    assert_eq!(saved.unwrap(), 1);
    assert_eq!(reader.status, "done");

    let stored = backend.inner.get_document("tasks", &ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.get_str("status").unwrap(), "done");
}

#[tokio::test]
async fn loading_a_tracked_document_again_returns_the_same_entity() {
    let (ctx, backend) = context(fast_config());
    let ids = seed(&ctx, vec![Task::new("twice", "open", 1)]).await;

    let first = ctx.set::<Task>().find(&ids[0]).await.unwrap().unwrap();
    first.write().await.status = "done".into();

    let second = ctx.set::<Task>().all().to_list().await.unwrap().remove(0);
    assert_eq!(second.read().await.status, "done");
    assert!(second.is_dirty());
    assert_eq!(ctx.unit_of_work().tracked_count().await, 1);

    let writes = backend.writes();
    assert_eq!(ctx.save_changes().await.unwrap(), 1);
    assert_eq!(backend.writes() - writes, 1);
}
