// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::Utc;

use super::{EntityPatch, InsightPatch, SessionPatch};
use crate::error::Error;
use crate::model::{Cuj, Insight, Spec, Task, WorkSession};
use crate::store::Store;

fn spec(project: &str, id: &str, title: &str) -> Spec {
    Spec {
        id: id.to_owned(),
        project: project.to_owned(),
        title: title.to_owned(),
        description: String::new(),
        status: "draft".to_owned(),
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn create_starts_at_version_one() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let created = store.create_spec(&spec("p", "s1", "Title")).await?;
    assert_eq!(created.version, 1);
    assert_eq!(created.status, "draft");
    Ok(())
}

#[tokio::test]
async fn update_bumps_version_on_match() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    store.create_spec(&spec("p", "s1", "Title")).await?;

    let patch = EntityPatch { title: Some("X".into()), version: 1, ..Default::default() };
    let updated = store.update_spec("p", "s1", &patch).await?;
    assert_eq!(updated.version, 2);
    assert_eq!(updated.title, "X");
    Ok(())
}

#[tokio::test]
async fn stale_version_conflicts() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    store.create_spec(&spec("p", "s1", "Title")).await?;

    let first = EntityPatch { title: Some("X".into()), version: 1, ..Default::default() };
    store.update_spec("p", "s1", &first).await?;

    // Same starting version again: exactly one writer wins.
    let second = EntityPatch { title: Some("Y".into()), version: 1, ..Default::default() };
    let result = store.update_spec("p", "s1", &second).await;
    assert!(matches!(result, Err(Error::VersionConflict)));

    // The stored row kept the winner's write.
    assert_eq!(store.get_spec("p", "s1").await?.title, "X");
    Ok(())
}

#[tokio::test]
async fn concurrent_updates_admit_exactly_one_winner() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    store.create_spec(&spec("p", "s1", "Title")).await?;

    let mut handles = Vec::new();
    for i in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let patch =
                EntityPatch { title: Some(format!("w{i}")), version: 1, ..Default::default() };
            store.update_spec("p", "s1", &patch).await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await? {
            Ok(updated) => {
                wins += 1;
                assert_eq!(updated.version, 2);
            }
            Err(Error::VersionConflict) => conflicts += 1,
            Err(other) => anyhow::bail!("unexpected error: {other}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 3);
    Ok(())
}

#[tokio::test]
async fn update_of_missing_entity_is_not_found() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let patch = EntityPatch { version: 1, ..Default::default() };
    let result = store.update_spec("p", "nope", &patch).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn patch_leaves_unset_fields_alone() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let mut initial = spec("p", "s1", "Title");
    initial.description = "original".into();
    store.create_spec(&initial).await?;

    let patch = EntityPatch { status: Some("active".into()), version: 1, ..Default::default() };
    let updated = store.update_spec("p", "s1", &patch).await?;
    assert_eq!(updated.title, "Title");
    assert_eq!(updated.description, "original");
    assert_eq!(updated.status, "active");
    Ok(())
}

#[tokio::test]
async fn entities_are_project_scoped() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    store.create_spec(&spec("p1", "s1", "One")).await?;
    store.create_spec(&spec("p2", "s1", "Two")).await?;

    assert_eq!(store.get_spec("p1", "s1").await?.title, "One");
    assert_eq!(store.get_spec("p2", "s1").await?.title, "Two");
    assert_eq!(store.list_specs("p1").await?.len(), 1);

    store.delete_spec("p1", "s1").await?;
    assert!(matches!(store.get_spec("p1", "s1").await, Err(Error::NotFound(_))));
    assert!(store.get_spec("p2", "s1").await.is_ok());
    Ok(())
}

#[tokio::test]
async fn task_assignment_uses_versioning() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let task = Task {
        id: "t1".into(),
        project: "p".into(),
        story_id: None,
        title: "Do it".into(),
        description: String::new(),
        status: "todo".into(),
        assignee: None,
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.create_task(&task).await?;

    let assign = EntityPatch { assignee: Some("bob".into()), version: 1, ..Default::default() };
    let assigned = store.update_task("p", "t1", &assign).await?;
    assert_eq!(assigned.assignee.as_deref(), Some("bob"));
    assert_eq!(assigned.version, 2);

    let done =
        EntityPatch { status: Some("done".into()), version: 2, ..Default::default() };
    let completed = store.update_task("p", "t1", &done).await?;
    assert_eq!(completed.status, "done");
    Ok(())
}

#[tokio::test]
async fn insights_update_without_versioning() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let insight = Insight {
        id: "i1".into(),
        project: "p".into(),
        spec_id: None,
        title: "Found something".into(),
        body: String::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.create_insight(&insight).await?;

    let patch = InsightPatch { spec_id: Some("s1".into()), ..Default::default() };
    let linked = store.update_insight("p", "i1", &patch).await?;
    assert_eq!(linked.spec_id.as_deref(), Some("s1"));
    assert_eq!(linked.title, "Found something");
    Ok(())
}

#[tokio::test]
async fn session_stop_stamps_stopped_at_once() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let session = WorkSession {
        id: "w1".into(),
        project: "p".into(),
        agent_id: Some("a1".into()),
        name: "build".into(),
        status: "running".into(),
        started_at: Utc::now(),
        stopped_at: None,
    };
    let created = store.create_session(&session).await?;
    assert!(created.stopped_at.is_none());

    let stop = SessionPatch { status: Some("stopped".into()), ..Default::default() };
    let stopped = store.update_session("p", "w1", &stop).await?;
    let stamp = stopped.stopped_at;
    assert!(stamp.is_some());

    // Stopping again keeps the original stamp.
    let again = store.update_session("p", "w1", &stop).await?;
    assert_eq!(again.stopped_at, stamp);
    Ok(())
}

#[tokio::test]
async fn cuj_delete_cascades_feature_links() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let cuj = Cuj {
        id: "c1".into(),
        project: "p".into(),
        spec_id: None,
        title: "Checkout".into(),
        description: String::new(),
        status: "draft".into(),
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.create_cuj(&cuj).await?;
    store.link_cuj_feature("p", "c1", "f1").await?;
    store.link_cuj_feature("p", "c1", "f2").await?;
    assert_eq!(store.cuj_feature_links("p", "c1").await?.len(), 2);

    store.delete_cuj("p", "c1").await?;
    assert!(store.cuj_feature_links("p", "c1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn cuj_links_are_idempotent_and_unlinkable() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let cuj = Cuj {
        id: "c1".into(),
        project: "p".into(),
        spec_id: None,
        title: "Checkout".into(),
        description: String::new(),
        status: "draft".into(),
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.create_cuj(&cuj).await?;

    store.link_cuj_feature("p", "c1", "f1").await?;
    store.link_cuj_feature("p", "c1", "f1").await?;
    assert_eq!(store.cuj_feature_links("p", "c1").await?, vec!["f1".to_owned()]);

    store.unlink_cuj_feature("p", "c1", "f1").await?;
    assert!(store.cuj_feature_links("p", "c1").await?.is_empty());
    assert!(matches!(
        store.unlink_cuj_feature("p", "c1", "f1").await,
        Err(Error::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn linking_to_missing_cuj_fails() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let result = store.link_cuj_feature("p", "ghost", "f1").await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    Ok(())
}
