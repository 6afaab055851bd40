//! Checkpoint creation and restore against in-memory backends.

mod common;

use std::time::Duration;

use common::*;
use ctxkeep_core::{
    AgentRef, CheckpointRequest, CheckpointTrigger, CoreConfig, CtxKeepError, ItemKind,
    RestoreOutcome, RestoreStep, SnapshotStep,
};
use ctxkeep_state::{CheckpointCatalog, FileChange, FileChangeKind};

async fn checkpoint(h: &Harness, name: &str) -> ctxkeep_core::CheckpointRecord {
    h.service
        .checkpoint(PROJECT, name, None, CheckpointTrigger::Manual)
        .await
        .unwrap()
}

#[tokio::test]
async fn restore_round_trips_all_three_stores() {
    let h = Harness::new();
    let agent = agent();
    let kept = h.append(&agent, ItemKind::Task, "write the parser".to_string()).await;
    h.files.write_file(PROJECT, "src/lib.rs", "v1");
    h.relational.set(PROJECT, "phase", "design");

    let record = checkpoint(&h, "before refactor").await;
    assert_eq!(record.metadata.context_items_count, 1);

    h.append(&agent, ItemKind::Code, "later work".to_string()).await;
    h.service.record_access(&agent, &kept.id).await.unwrap();
    h.files.write_file(PROJECT, "src/lib.rs", "v2");
    h.files.write_file(PROJECT, "src/new.rs", "new");
    h.relational.set(PROJECT, "phase", "implementation");

    let outcome = h.service.restore(PROJECT, &record.id, false).await.unwrap();
    let RestoreOutcome::Applied(report) = outcome else {
        panic!("expected an applied restore");
    };
    assert_eq!(report.completed_steps, RestoreStep::ALL.to_vec());
    assert_eq!(report.items_restored, 1);

    assert_eq!(h.files.read_file(PROJECT, "src/lib.rs").as_deref(), Some("v1"));
    assert_eq!(h.files.read_file(PROJECT, "src/new.rs"), None);
    assert_eq!(h.relational.value(PROJECT, "phase").as_deref(), Some("design"));

    let items = h.service.items(&agent, None, None).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, kept.id);
    assert_eq!(items[0].access_count, 0);
}

#[tokio::test]
async fn preview_of_unchanged_project_is_empty() {
    let h = Harness::new();
    let agent = agent();
    h.append(&agent, ItemKind::Task, "t".to_string()).await;
    h.files.write_file(PROJECT, "a.txt", "a");
    let record = checkpoint(&h, "clean").await;
    let before = h.service.stats(&agent).await.unwrap();

    let RestoreOutcome::Preview(preview) =
        h.service.restore(PROJECT, &record.id, true).await.unwrap()
    else {
        panic!("expected a preview");
    };
    assert_eq!(preview.total_changes(), 0);
    assert!(preview.is_empty());

    let after = h.service.stats(&agent).await.unwrap();
    assert_eq!(after.total_items, before.total_items);
    assert_eq!(after.hot_count, before.hot_count);
    assert_eq!(after.warm_count, before.warm_count);
    assert_eq!(after.cold_count, before.cold_count);
    assert_eq!(after.total_tokens, before.total_tokens);
}

#[tokio::test]
async fn preview_reports_changes_without_applying_them() {
    let h = Harness::new();
    let agent = agent();
    let original = h.append(&agent, ItemKind::Task, "t".to_string()).await;
    h.files.write_file(PROJECT, "a.txt", "a");
    let record = checkpoint(&h, "base").await;

    let added_since = h.append(&agent, ItemKind::Code, "c".to_string()).await;
    h.service.record_access(&agent, &original.id).await.unwrap();
    h.files.write_file(PROJECT, "a.txt", "changed");

    let RestoreOutcome::Preview(preview) =
        h.service.restore(PROJECT, &record.id, true).await.unwrap()
    else {
        panic!("expected a preview");
    };
    assert_eq!(
        preview.file_changes,
        vec![FileChange {
            path: "a.txt".to_string(),
            kind: FileChangeKind::Modified
        }]
    );
    assert!(preview.items_added.is_empty());
    assert_eq!(preview.items_removed, vec![added_since.id.clone()]);
    assert_eq!(preview.items_modified, vec![original.id.clone()]);
    assert_eq!(preview.total_changes(), 3);

    assert_eq!(h.files.read_file(PROJECT, "a.txt").as_deref(), Some("changed"));
    assert_eq!(h.items.len(), 2);
}

#[tokio::test]
async fn each_snapshot_step_failure_is_named() {
    let cases: [(fn(&Harness, bool), SnapshotStep); 4] = [
        (|h, on| h.files.fail_snapshot.set(on), SnapshotStep::FileTree),
        (|h, on| h.relational.fail_backup.set(on), SnapshotStep::Relational),
        (|h, on| h.cas.fail_put.set(on), SnapshotStep::Memory),
        (|h, on| h.catalog.fail_append.set(on), SnapshotStep::Catalog),
    ];

    for (inject, expected) in cases {
        let h = Harness::new();
        h.append(&agent(), ItemKind::Task, "t".to_string()).await;
        inject(&h, true);

        let err = h
            .service
            .checkpoint(PROJECT, "doomed", None, CheckpointTrigger::Manual)
            .await
            .unwrap_err();
        match err {
            CtxKeepError::SnapshotFailure { step, .. } => assert_eq!(step, expected),
            other => panic!("expected SnapshotFailure, got {other:?}"),
        }
        assert!(h.catalog.list(PROJECT).await.unwrap().is_empty());
        assert_eq!(h.items.len(), 1);

        inject(&h, false);
        checkpoint(&h, "recovered").await;
        assert_eq!(h.catalog.list(PROJECT).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn missing_memory_dump_fails_closed() {
    let h = Harness::new();
    h.files.write_file(PROJECT, "a.txt", "a");
    let record = checkpoint(&h, "base").await;
    h.files.write_file(PROJECT, "a.txt", "b");
    h.cas.evict(&record.memory_digest);

    for preview in [true, false] {
        let err = h
            .service
            .restore(PROJECT, &record.id, preview)
            .await
            .unwrap_err();
        assert!(matches!(err, CtxKeepError::ArtifactMissing(_)));
    }
    assert_eq!(h.files.read_file(PROJECT, "a.txt").as_deref(), Some("b"));
}

#[tokio::test]
async fn missing_relational_backup_fails_closed() {
    let h = Harness::new();
    h.files.write_file(PROJECT, "a.txt", "a");
    let record = checkpoint(&h, "base").await;
    h.files.write_file(PROJECT, "a.txt", "b");
    h.relational.evict(&record.backup_ref);

    let err = h
        .service
        .restore(PROJECT, &record.id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CtxKeepError::ArtifactMissing(_)));
    assert_eq!(h.files.read_file(PROJECT, "a.txt").as_deref(), Some("b"));
}

#[tokio::test]
async fn restore_failure_reports_progress() {
    let h = Harness::new();
    let agent = agent();
    h.append(&agent, ItemKind::Task, "t".to_string()).await;
    h.files.write_file(PROJECT, "a.txt", "a");
    let record = checkpoint(&h, "base").await;
    h.files.write_file(PROJECT, "a.txt", "b");
    h.relational.fail_restore.set(true);

    let err = h
        .service
        .restore(PROJECT, &record.id, false)
        .await
        .unwrap_err();
    match err {
        CtxKeepError::RestoreFailure {
            failed_step,
            completed,
            remaining,
            ..
        } => {
            assert_eq!(failed_step, RestoreStep::Relational);
            assert_eq!(completed, vec![RestoreStep::FileTree]);
            assert_eq!(remaining, vec![RestoreStep::Memory]);
        }
        other => panic!("expected RestoreFailure, got {other:?}"),
    }
    assert_eq!(h.files.read_file(PROJECT, "a.txt").as_deref(), Some("a"));
}

#[tokio::test]
async fn restore_failing_at_file_tree_changes_nothing() {
    let h = Harness::new();
    let agent = agent();
    h.append(&agent, ItemKind::Task, "t".to_string()).await;
    h.files.write_file(PROJECT, "a.txt", "a");
    h.relational.set(PROJECT, "phase", "design");
    let record = checkpoint(&h, "base").await;

    h.append(&agent, ItemKind::Code, "later".to_string()).await;
    h.files.write_file(PROJECT, "a.txt", "b");
    h.relational.set(PROJECT, "phase", "implementation");
    h.files.fail_reset.set(true);

    let err = h
        .service
        .restore(PROJECT, &record.id, false)
        .await
        .unwrap_err();
    match err {
        CtxKeepError::RestoreFailure {
            failed_step,
            completed,
            remaining,
            ..
        } => {
            assert_eq!(failed_step, RestoreStep::FileTree);
            assert!(completed.is_empty());
            assert_eq!(remaining, vec![RestoreStep::Relational, RestoreStep::Memory]);
        }
        other => panic!("expected RestoreFailure, got {other:?}"),
    }
    assert_eq!(h.files.read_file(PROJECT, "a.txt").as_deref(), Some("b"));
    assert_eq!(
        h.relational.value(PROJECT, "phase").as_deref(),
        Some("implementation")
    );
    assert_eq!(h.items.len(), 2);
}

#[tokio::test]
async fn restore_failing_at_memory_reports_earlier_steps() {
    let h = Harness::new();
    let agent = agent();
    h.append(&agent, ItemKind::Task, "t".to_string()).await;
    h.files.write_file(PROJECT, "a.txt", "a");
    h.relational.set(PROJECT, "phase", "design");
    let record = checkpoint(&h, "base").await;

    h.append(&agent, ItemKind::Code, "later".to_string()).await;
    h.files.write_file(PROJECT, "a.txt", "b");
    h.relational.set(PROJECT, "phase", "implementation");
    h.items.fail_writes.set(true);

    let err = h
        .service
        .restore(PROJECT, &record.id, false)
        .await
        .unwrap_err();
    match err {
        CtxKeepError::RestoreFailure {
            failed_step,
            completed,
            remaining,
            ..
        } => {
            assert_eq!(failed_step, RestoreStep::Memory);
            assert_eq!(completed, vec![RestoreStep::FileTree, RestoreStep::Relational]);
            assert!(remaining.is_empty());
        }
        other => panic!("expected RestoreFailure, got {other:?}"),
    }
    assert_eq!(h.files.read_file(PROJECT, "a.txt").as_deref(), Some("a"));
    assert_eq!(h.relational.value(PROJECT, "phase").as_deref(), Some("design"));
    assert_eq!(h.items.len(), 2);
}

#[tokio::test]
async fn unknown_checkpoint_is_not_found() {
    let h = Harness::new();
    let err = h
        .service
        .restore(PROJECT, &ctxkeep_core::CheckpointId::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CtxKeepError::NotFound(_)));
}

#[tokio::test]
async fn catalog_lists_in_creation_order() {
    let h = Harness::new();
    let first = checkpoint(&h, "first").await;
    h.clock.advance(chrono::Duration::minutes(1));
    let second = checkpoint(&h, "second").await;

    let ids: Vec<_> = h
        .service
        .checkpoints(PROJECT)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);

    let newest_first = h.service.engine().list_desc(PROJECT).await.unwrap();
    assert_eq!(newest_first[0].id, second.id);
}

#[tokio::test]
async fn checkpoint_records_description_and_metadata() {
    let h = Harness::new();
    h.append(&agent(), ItemKind::Task, "a".repeat(40)).await;
    h.append(&AgentRef::new(PROJECT, "qa-001"), ItemKind::TestResult, "b".repeat(8)).await;

    let record = h
        .service
        .engine()
        .create(
            CheckpointRequest::new(PROJECT, "phase done")
                .with_description("design phase complete")
                .with_trigger(CheckpointTrigger::PhaseTransition),
        )
        .await
        .unwrap();

    assert_eq!(record.description.as_deref(), Some("design phase complete"));
    assert_eq!(record.trigger, CheckpointTrigger::PhaseTransition);
    assert_eq!(
        record.metadata.agents_active,
        vec!["backend-001".to_string(), "qa-001".to_string()]
    );
    assert_eq!(record.metadata.context_items_count, 2);
    assert_eq!(record.metadata.total_tokens, 12);
    assert_eq!(record.metadata.hot_count, 1);
    assert_eq!(record.metadata.warm_count, 1);
}

#[tokio::test]
async fn slow_snapshot_times_out_without_catalog_entry() {
    let config = CoreConfig::default().with_snapshot_timeout(Duration::from_millis(50));
    let (h, _slow) = Harness::with_slow_tree(config, Duration::from_secs(5));

    let err = h
        .service
        .checkpoint(PROJECT, "too slow", None, CheckpointTrigger::Auto)
        .await
        .unwrap_err();
    assert!(matches!(err, CtxKeepError::Timeout(_)));
    assert!(h.catalog.list(PROJECT).await.unwrap().is_empty());
}
