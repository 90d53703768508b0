// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::Utc;

use super::NewEvent;
use crate::error::Error;
use crate::model::{EventKind, Message};
use crate::store::Store;

fn draft(project: &str, from: &str, to: &[&str], body: &str) -> Message {
    Message {
        id: uuid::Uuid::new_v4().to_string(),
        thread_id: None,
        project: project.to_owned(),
        from: from.to_owned(),
        to: to.iter().map(|s| (*s).to_owned()).collect(),
        cc: vec![],
        bcc: vec![],
        subject: None,
        body: body.to_owned(),
        importance: None,
        ack_required: false,
        created_at: Utc::now(),
        cursor: 0,
    }
}

fn message_event(msg: Message) -> NewEvent {
    NewEvent {
        kind: EventKind::MessageCreated,
        project: msg.project.clone(),
        agent: None,
        payload: serde_json::json!({}),
        message: Some(msg),
    }
}

async fn send(store: &Store, project: &str, from: &str, to: &[&str], body: &str) -> Message {
    let event = store
        .append_event(message_event(draft(project, from, to, body)))
        .await
        .expect("append_event");
    event.message.expect("message on message.created event")
}

#[tokio::test]
async fn cursors_strictly_increase() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let mut last = 0;
    for i in 0..5 {
        let event = store
            .append_event(message_event(draft("p", "alice", &["bob"], &format!("m{i}"))))
            .await?;
        assert!(event.cursor > last, "cursor {} not > {last}", event.cursor);
        last = event.cursor;
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_appends_get_distinct_increasing_cursors() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .append_event(message_event(draft("p", "alice", &["bob"], &format!("c{i}"))))
                .await
                .map(|e| e.cursor)
        }));
    }

    let mut cursors = Vec::new();
    for handle in handles {
        cursors.push(handle.await??);
    }
    cursors.sort_unstable();
    let mut deduped = cursors.clone();
    deduped.dedup();
    assert_eq!(cursors.len(), deduped.len(), "cursors must be pairwise distinct");
    assert_eq!(*cursors.last().unwrap_or(&0), 10, "cursors are dense");
    Ok(())
}

#[tokio::test]
async fn every_recipient_gets_an_inbox_row() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let mut msg = draft("p", "alice", &["bob"], "hello");
    msg.cc = vec!["carol".into()];
    msg.bcc = vec!["dave".into()];
    let sent = store.append_event(message_event(msg)).await?.message.map(|m| m.id);

    for agent in ["bob", "carol", "dave"] {
        let inbox = store.inbox_since("p", agent, 0, None).await?;
        assert_eq!(inbox.len(), 1, "{agent} should have the message");
        assert_eq!(Some(inbox[0].id.clone()), sent);
    }

    // The sender and bystanders see nothing.
    assert!(store.inbox_since("p", "alice", 0, None).await?.is_empty());
    assert!(store.inbox_since("p", "mallory", 0, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn inbox_pagination_is_strictly_greater() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    for i in 0..3 {
        send(&store, "p", "alice", &["bob"], &format!("m{i}")).await;
    }

    let all = store.inbox_since("p", "bob", 0, None).await?;
    assert_eq!(all.len(), 3);

    let rest = store.inbox_since("p", "bob", all[0].cursor, None).await?;
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|m| m.cursor > all[0].cursor));

    let none = store.inbox_since("p", "bob", all[2].cursor, None).await?;
    assert!(none.is_empty());
    Ok(())
}

#[tokio::test]
async fn inbox_respects_limit_and_order() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    for i in 0..5 {
        send(&store, "p", "alice", &["bob"], &format!("m{i}")).await;
    }
    let page = store.inbox_since("p", "bob", 0, Some(2)).await?;
    assert_eq!(page.len(), 2);
    assert!(page[0].cursor < page[1].cursor);
    assert_eq!(page[0].body, "m0");
    Ok(())
}

#[tokio::test]
async fn inbox_is_project_isolated() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    send(&store, "p1", "alice", &["bob"], "in p1").await;
    send(&store, "p2", "alice", &["bob"], "in p2").await;

    let p1 = store.inbox_since("p1", "bob", 0, None).await?;
    assert_eq!(p1.len(), 1);
    assert!(p1.iter().all(|m| m.project == "p1"));

    // Empty project means no filter.
    let all = store.inbox_since("", "bob", 0, None).await?;
    assert_eq!(all.len(), 2);
    Ok(())
}

#[tokio::test]
async fn thread_summaries_cover_sender_and_recipients() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let mut m1 = draft("p", "alice", &["bob", "carol"], "first");
    m1.thread_id = Some("t1".into());
    store.append_event(message_event(m1)).await?;
    let mut m2 = draft("p", "bob", &["alice"], "second");
    m2.thread_id = Some("t1".into());
    let e2 = store.append_event(message_event(m2)).await?;

    for agent in ["alice", "bob"] {
        let threads = store.list_threads("p", agent, 0, None).await?;
        assert_eq!(threads.len(), 1, "{agent}");
        assert_eq!(threads[0].thread_id, "t1");
        assert_eq!(threads[0].message_count, 2);
        assert_eq!(threads[0].last_cursor, e2.cursor);
        assert_eq!(threads[0].last_body.as_deref(), Some("second"));
    }

    // Carol saw only the first message.
    let threads = store.list_threads("p", "carol", 0, None).await?;
    assert_eq!(threads[0].message_count, 1);
    Ok(())
}

#[tokio::test]
async fn list_threads_pages_backward() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    for t in ["t1", "t2", "t3"] {
        let mut msg = draft("p", "alice", &["bob"], t);
        msg.thread_id = Some(t.to_owned());
        store.append_event(message_event(msg)).await?;
    }

    let first_page = store.list_threads("p", "bob", 0, Some(2)).await?;
    assert_eq!(first_page.len(), 2);
    assert!(first_page[0].last_cursor > first_page[1].last_cursor, "newest first");

    // Pass the smallest last_cursor of the page to continue backward.
    let next = store.list_threads("p", "bob", first_page[1].last_cursor, Some(2)).await?;
    assert_eq!(next.len(), 1);
    assert!(next[0].last_cursor < first_page[1].last_cursor);
    Ok(())
}

#[tokio::test]
async fn thread_messages_filters_by_cursor() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let mut cursors = Vec::new();
    for i in 0..3 {
        let mut msg = draft("p", "alice", &["bob"], &format!("m{i}"));
        msg.thread_id = Some("t".into());
        cursors.push(store.append_event(message_event(msg)).await?.cursor);
    }

    let all = store.thread_messages("p", "t", 0).await?;
    assert_eq!(all.len(), 3);
    let tail = store.thread_messages("p", "t", cursors[0]).await?;
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].body, "m1");
    Ok(())
}

#[tokio::test]
async fn mark_read_is_idempotent_and_forward_only() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let msg = send(&store, "p", "alice", &["bob"], "hi").await;

    store.mark_read("p", &msg.id, "bob").await?;
    let first = store.recipient_statuses("p", &msg.id).await?;
    let first_read = first[0].read_at;
    assert!(first_read.is_some());

    // Second mark succeeds without moving the timestamp.
    store.mark_read("p", &msg.id, "bob").await?;
    let second = store.recipient_statuses("p", &msg.id).await?;
    assert_eq!(second[0].read_at, first_read);
    Ok(())
}

#[tokio::test]
async fn mark_read_rejects_non_recipients() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let msg = send(&store, "p", "alice", &["bob"], "hi").await;

    let result = store.mark_read("p", &msg.id, "mallory").await;
    assert!(matches!(result, Err(Error::NotRecipient)));
    Ok(())
}

#[tokio::test]
async fn ack_and_read_are_independent() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let msg = send(&store, "p", "alice", &["bob"], "hi").await;

    store.mark_ack("p", &msg.id, "bob").await?;
    let statuses = store.recipient_statuses("p", &msg.id).await?;
    assert!(statuses[0].ack_at.is_some());
    assert!(statuses[0].read_at.is_none());
    Ok(())
}

#[tokio::test]
async fn inbox_counts_track_reads() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let first = send(&store, "p", "alice", &["bob"], "m1").await;
    send(&store, "p", "alice", &["bob"], "m2").await;
    send(&store, "p", "alice", &["bob"], "m3").await;

    assert_eq!(store.inbox_counts("p", "bob").await?, (3, 3));
    store.mark_read("p", &first.id, "bob").await?;
    assert_eq!(store.inbox_counts("p", "bob").await?, (3, 2));
    Ok(())
}

#[tokio::test]
async fn events_since_hydrates_messages() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let msg = send(&store, "p", "alice", &["bob"], "hi").await;
    store
        .append_event(
            NewEvent::bare(EventKind::SpecCreated, "p")
                .with_payload(serde_json::json!({"spec_id": "s1"})),
        )
        .await?;

    let events = store.events_since("p", 0, None).await?;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::MessageCreated);
    assert_eq!(events[0].message.as_ref().map(|m| m.id.clone()), Some(msg.id));
    assert_eq!(events[1].kind, EventKind::SpecCreated);
    assert!(events[1].message.is_none());
    assert_eq!(events[1].payload.get("spec_id"), Some(&serde_json::json!("s1")));

    // Project isolation applies to the raw feed too.
    assert!(store.events_since("other", 0, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn message_cursor_matches_event_cursor() -> anyhow::Result<()> {
    let store = Store::open_memory().await?;
    let event = store.append_event(message_event(draft("p", "a", &["b"], "x"))).await?;
    let msg = event.message.as_ref().map(|m| m.cursor);
    assert_eq!(msg, Some(event.cursor));

    let stored = store.inbox_since("p", "b", 0, None).await?;
    assert_eq!(stored[0].cursor, event.cursor);
    Ok(())
}
