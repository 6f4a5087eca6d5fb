// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn store() -> MessageStore {
    match MessageStore::open_in_memory() {
        Ok(store) => store,
        Err(e) => unreachable!("in-memory store: {e}"),
    }
}

fn input(role: Role, body: &str) -> MessageInput {
    MessageInput { role, body: body.to_owned(), ..Default::default() }
}

#[test]
fn insert_assigns_id_and_defaults() -> anyhow::Result<()> {
    let store = store();
    let message = store.insert_message(input(Role::User, "hello"))?;

    assert!(!message.id.is_empty());
    assert_eq!(message.delivery_status, DeliveryStatus::Delivered);
    assert!(message.created_at > 0);

    let fetched = store.get_message(&message.id)?;
    assert_eq!(fetched, Some(message));
    Ok(())
}

#[test]
fn explicit_id_and_status_are_kept() -> anyhow::Result<()> {
    let store = store();
    let message = store.insert_message(MessageInput {
        id: Some("msg-1".to_owned()),
        delivery_status: Some(DeliveryStatus::Pending),
        ..input(Role::Agent, "queued")
    })?;
    assert_eq!(message.id, "msg-1");
    assert_eq!(message.delivery_status, DeliveryStatus::Pending);

    // Same id again never overwrites.
    let dup = store.insert_message(MessageInput {
        id: Some("msg-1".to_owned()),
        ..input(Role::Agent, "other")
    });
    assert!(dup.is_err());
    Ok(())
}

#[test]
fn metadata_round_trips() -> anyhow::Result<()> {
    let store = store();
    let metadata = serde_json::json!({ "source": "tool", "n": 2 });
    let message = store.insert_message(MessageInput {
        metadata: Some(metadata.clone()),
        ..input(Role::System, "meta")
    })?;
    let fetched = store.get_message(&message.id)?;
    assert_eq!(fetched.and_then(|m| m.metadata), Some(metadata));
    Ok(())
}

#[test]
fn get_messages_is_newest_first_with_filters() -> anyhow::Result<()> {
    let store = store();
    store.insert_message(MessageInput {
        agent_id: Some("alpha".to_owned()),
        ..input(Role::Agent, "from alpha")
    })?;
    store.insert_message(MessageInput {
        recipient: Some("alpha".to_owned()),
        ..input(Role::User, "to alpha")
    })?;
    store.insert_message(MessageInput {
        agent_id: Some("beta".to_owned()),
        ..input(Role::Agent, "from beta")
    })?;

    let all = store.get_messages(&MessageQuery::default())?;
    assert_eq!(all.len(), 3);
    assert!(all[0].created_at >= all[1].created_at);

    let alpha = store.get_messages(&MessageQuery {
        agent_id: Some("alpha".to_owned()),
        ..Default::default()
    })?;
    assert_eq!(alpha.len(), 2);

    let agents_only = store.get_messages(&MessageQuery {
        role: Some(Role::Agent),
        ..Default::default()
    })?;
    assert_eq!(agents_only.len(), 2);
    Ok(())
}

#[test]
fn limit_defaults_and_caps() -> anyhow::Result<()> {
    let store = store();
    for i in 0..5 {
        store.insert_message(input(Role::User, &format!("m{i}")))?;
    }
    let limited = store.get_messages(&MessageQuery { limit: Some(2), ..Default::default() })?;
    assert_eq!(limited.len(), 2);

    // An absurd limit is capped rather than honored.
    let capped =
        store.get_messages(&MessageQuery { limit: Some(10_000_000), ..Default::default() })?;
    assert_eq!(capped.len(), 5);
    Ok(())
}

#[test]
fn delivery_status_never_regresses() -> anyhow::Result<()> {
    let store = store();
    let message = store.insert_message(MessageInput {
        delivery_status: Some(DeliveryStatus::Pending),
        ..input(Role::Agent, "x")
    })?;

    assert!(store.mark_read(&message.id)?);
    // A second mark_read is silently a no-op.
    assert!(!store.mark_read(&message.id)?);

    let fetched = store.get_message(&message.id)?;
    assert_eq!(fetched.map(|m| m.delivery_status), Some(DeliveryStatus::Read));
    Ok(())
}

#[test]
fn mark_all_read_scopes_by_agent() -> anyhow::Result<()> {
    let store = store();
    store.insert_message(MessageInput {
        recipient: Some("alpha".to_owned()),
        ..input(Role::User, "one")
    })?;
    store.insert_message(MessageInput {
        recipient: Some("alpha".to_owned()),
        ..input(Role::User, "two")
    })?;
    store.insert_message(MessageInput {
        recipient: Some("beta".to_owned()),
        ..input(Role::User, "three")
    })?;

    assert_eq!(store.mark_all_read(Some("alpha"), None)?, 2);
    let counts = store.get_unread_counts()?;
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].agent_id, "beta");
    assert_eq!(counts[0].count, 1);
    Ok(())
}

#[test]
fn search_matches_substrings() -> anyhow::Result<()> {
    let store = store();
    store.insert_message(input(Role::User, "deploy the parser today"))?;
    store.insert_message(input(Role::User, "unrelated note"))?;

    let hits = store.search_messages("parser", &MessageQuery::default())?;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].body.contains("parser"));
    Ok(())
}

#[test]
fn threads_aggregate_counts_and_participants() -> anyhow::Result<()> {
    let store = store();
    store.insert_message(MessageInput {
        thread_id: Some("t1".to_owned()),
        agent_id: Some("alpha".to_owned()),
        recipient: Some("user".to_owned()),
        ..input(Role::Agent, "hi")
    })?;
    store.insert_message(MessageInput {
        thread_id: Some("t1".to_owned()),
        recipient: Some("alpha".to_owned()),
        ..input(Role::User, "hello back")
    })?;
    store.insert_message(MessageInput {
        thread_id: Some("t2".to_owned()),
        agent_id: Some("beta".to_owned()),
        ..input(Role::Agent, "elsewhere")
    })?;

    let threads = store.get_threads(None)?;
    assert_eq!(threads.len(), 2);
    let t1 = match threads.iter().find(|t| t.thread_id == "t1") {
        Some(t) => t,
        None => anyhow::bail!("t1 missing"),
    };
    assert_eq!(t1.message_count, 2);
    assert!(t1.participants.contains(&"alpha".to_owned()));
    assert!(t1.participants.contains(&"user".to_owned()));

    let alpha_threads = store.get_threads(Some("alpha"))?;
    assert_eq!(alpha_threads.len(), 1);
    assert_eq!(alpha_threads[0].thread_id, "t1");
    Ok(())
}
