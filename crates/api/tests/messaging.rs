//! Chat messages, typing indicators and read receipts.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{Client, Harness, JOB, OBSERVER, REQUESTER, WORKER};
use jobline_api::config::RealtimeConfig;
use jobline_core::chat::ChatMessage;
use jobline_core::job_status::JobStatus;
use jobline_core::protocol::{ErrorCode, ServerEvent};
use jobline_core::roles::Role;
use serde_json::json;

fn error_code(event: Option<ServerEvent>) -> ErrorCode {
    match event {
        Some(ServerEvent::Error { code, .. }) => code,
        other => panic!("expected error event, got {other:?}"),
    }
}

fn chat_ids(events: &[ServerEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::ChatNew { message } => Some(message.id),
            _ => None,
        })
        .collect()
}

fn message_ids(messages: &[ChatMessage]) -> Vec<i64> {
    messages.iter().map(|m| m.id).collect()
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_get_unique_increasing_ids() {
    let h = Harness::new(JobStatus::EnRoute);
    let clients = vec![
        h.joined(REQUESTER, Role::Requester).await,
        h.joined(WORKER, Role::Worker).await,
        h.joined(OBSERVER, Role::Observer).await,
    ];

    let mut tasks = Vec::new();
    for client in clients {
        tasks.push(tokio::spawn(async move {
            for i in 0..8 {
                client.chat(JOB, &format!("msg {i}")).await;
            }
            client
        }));
    }
    let mut clients: Vec<Client> = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap());
    }

    let mut stored: Vec<i64> = h.store.messages(JOB).iter().map(|m| m.id).collect();
    stored.sort_unstable();
    assert_eq!(stored, (1..=24).collect::<Vec<i64>>());

    // Every member sees others' messages in id order.
    for client in &mut clients {
        let ids = chat_ids(&client.drain());
        assert_eq!(ids.len(), 16);
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

#[tokio::test]
async fn sender_gets_ack_and_others_get_message() {
    let h = Harness::new(JobStatus::Accepted);
    let mut r = h.joined(REQUESTER, Role::Requester).await;
    let mut w = h.joined(WORKER, Role::Worker).await;

    w.send(json!({
        "type": "chat.send",
        "job_id": JOB,
        "body": "  photo of the gate  ",
        "attachment_ref": "uploads/gate.jpg",
    }))
    .await;

    assert_matches!(
        w.try_next(),
        Some(ServerEvent::Ack { message_id: Some(1), event, .. }) if event == "chat.send"
    );
    assert!(w.try_next().is_none(), "sender does not receive its own message");
    assert_matches!(
        r.try_next(),
        Some(ServerEvent::ChatNew { message })
            if message.id == 1
                && message.sender_id == WORKER
                && message.body == "photo of the gate"
                && message.attachment_ref.as_deref() == Some("uploads/gate.jpg")
                && message.delivered
    );
}

#[tokio::test]
async fn delivered_messages_are_marked_in_store() {
    let h = Harness::new(JobStatus::Accepted);
    let _r = h.joined(REQUESTER, Role::Requester).await;
    let w = h.joined(WORKER, Role::Worker).await;

    w.chat(JOB, "hello").await;
    for _ in 0..100 {
        if h.store.messages(JOB).first().is_some_and(|m| m.delivered) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("message was never marked delivered");
}

#[tokio::test]
async fn undelivered_message_falls_back_to_push() {
    let h = Harness::new(JobStatus::Accepted);
    let w = h.joined(WORKER, Role::Worker).await;

    w.chat(JOB, "anyone there?").await;

    let pushed = h.push.wait_for(2).await;
    assert_eq!(pushed.len(), 2);
    assert!(pushed.iter().all(|(actor, payload)| {
        *actor != WORKER && payload["message"]["body"] == "anyone there?"
    }));
    assert!(!h.store.messages(JOB)[0].delivered);
}

#[tokio::test]
async fn backlog_handed_out_on_join_is_delivered() {
    let h = Harness::new(JobStatus::Accepted);
    let w = h.joined(WORKER, Role::Worker).await;
    w.chat(JOB, "gate code is 4411").await;
    w.disconnect().await;

    // The sender's own rejoin does not count as delivery.
    let mut w = h.connect(WORKER, Role::Worker).await;
    assert!(!w.join(JOB).await.messages[0].delivered);

    let mut r = h.connect(REQUESTER, Role::Requester).await;
    let resync = r.join(JOB).await;
    assert!(resync.messages[0].delivered);
    assert!(!resync.messages[0].read);

    for _ in 0..100 {
        if h.store.messages(JOB)[0].delivered {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("backlog was never marked delivered in the store");
}

#[tokio::test]
async fn reading_a_backlog_message_marks_it_delivered() {
    let h = Harness::new(JobStatus::Accepted);
    let w = h.joined(WORKER, Role::Worker).await;
    w.chat(JOB, "left a key under the mat").await;

    let mut r = h.connect(REQUESTER, Role::Requester).await;
    r.join(JOB).await;
    r.send(json!({"type": "chat.read", "job_id": JOB, "message_id": 1}))
        .await;
    assert_matches!(r.try_next(), Some(ServerEvent::Ack { .. }));

    let stored = h.store.messages(JOB);
    assert!(stored[0].read && stored[0].delivered);
    let mut o = h.connect(OBSERVER, Role::Observer).await;
    let cached = o.join(JOB).await.messages;
    assert!(cached[0].read && cached[0].delivered);
}

// ---------------------------------------------------------------------------
// Rejections and persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_append_is_never_broadcast() {
    let h = Harness::new(JobStatus::Accepted);
    let mut r = h.joined(REQUESTER, Role::Requester).await;
    let mut w = h.joined(WORKER, Role::Worker).await;
    h.store.fail_appends.store(true, Ordering::SeqCst);

    w.chat(JOB, "lost").await;
    assert_eq!(error_code(w.try_next()), ErrorCode::PersistenceFailed);
    assert!(r.drain().is_empty());

    // The failed id is not reused.
    h.store.fail_appends.store(false, Ordering::SeqCst);
    w.chat(JOB, "kept").await;
    assert_matches!(
        w.try_next(),
        Some(ServerEvent::Ack { message_id: Some(2), .. })
    );
    assert_eq!(chat_ids(&r.drain()), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn slow_append_times_out() {
    let h = Harness::new(JobStatus::Accepted);
    let mut r = h.joined(REQUESTER, Role::Requester).await;
    let mut w = h.joined(WORKER, Role::Worker).await;
    h.store.set_append_delay(Some(Duration::from_secs(30)));

    w.chat(JOB, "slow").await;
    assert_matches!(
        w.try_next(),
        Some(ServerEvent::Error { code: ErrorCode::PersistenceFailed, message }) if message.contains("timed out")
    );
    assert!(r.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn timed_out_append_that_lands_later_stays_hidden() {
    let config = RealtimeConfig {
        room_message_cache: 1,
        ..RealtimeConfig::default()
    };
    let h = Harness::with_config(JobStatus::Accepted, config);
    let mut w = h.joined(WORKER, Role::Worker).await;
    h.store.commit_before_delay.store(true, Ordering::SeqCst);
    h.store.set_append_delay(Some(Duration::from_secs(30)));

    w.chat(JOB, "in flight").await;
    assert_eq!(error_code(w.try_next()), ErrorCode::PersistenceFailed);
    // The write reached storage after the room gave up on it.
    assert_eq!(h.store.messages(JOB).len(), 1);

    h.store.set_append_delay(None);
    w.chat(JOB, "second").await;
    w.chat(JOB, "third").await;
    w.drain();

    // Both resync paths read storage: the cache only holds id 3.
    let mut r = h.connect(REQUESTER, Role::Requester).await;
    let resync = r.join_with_cursor(JOB, Some(0)).await;
    assert_eq!(message_ids(&resync.messages), vec![2, 3]);
    assert!(!resync.has_more);

    r.send(json!({"type": "room.leave", "job_id": JOB})).await;
    r.drain();
    let resync = r.join(JOB).await;
    assert_eq!(message_ids(&resync.messages), vec![2, 3]);

    r.send(json!({"type": "chat.read", "job_id": JOB, "message_id": 1}))
        .await;
    assert_eq!(error_code(r.try_next()), ErrorCode::InvalidEvent);
}

#[tokio::test]
async fn empty_and_oversized_bodies_are_invalid() {
    let h = Harness::new(JobStatus::Accepted);
    let mut w = h.joined(WORKER, Role::Worker).await;

    w.chat(JOB, "   ").await;
    assert_eq!(error_code(w.try_next()), ErrorCode::InvalidEvent);
    w.chat(JOB, &"x".repeat(4_001)).await;
    assert_eq!(error_code(w.try_next()), ErrorCode::InvalidEvent);
    assert!(h.store.messages(JOB).is_empty());
}

#[tokio::test]
async fn chat_before_join_is_forbidden() {
    let h = Harness::new(JobStatus::Accepted);
    let mut w = h.connect(WORKER, Role::Worker).await;

    w.chat(JOB, "hello").await;
    assert_eq!(error_code(w.try_next()), ErrorCode::Forbidden);
}

// ---------------------------------------------------------------------------
// Typing indicators
// ---------------------------------------------------------------------------

async fn typing(client: &Client, is_typing: bool) {
    client
        .send(json!({"type": "chat.typing", "job_id": JOB, "is_typing": is_typing}))
        .await;
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_expires() {
    let h = Harness::new(JobStatus::Accepted);
    let r = h.joined(REQUESTER, Role::Requester).await;
    let mut w = h.joined(WORKER, Role::Worker).await;

    typing(&r, true).await;
    assert_matches!(
        w.try_next(),
        Some(ServerEvent::TypingIndicator { sender_id: REQUESTER, is_typing: true, .. })
    );

    // Refreshing does not re-announce.
    tokio::time::advance(Duration::from_secs(4)).await;
    typing(&r, true).await;
    assert!(w.try_next().is_none());

    // Expiry counts from the refresh.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(w.try_next().is_none());
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_matches!(
        w.try_next(),
        Some(ServerEvent::TypingIndicator { sender_id: REQUESTER, is_typing: false, .. })
    );
}

#[tokio::test]
async fn explicit_stop_is_broadcast_once() {
    let h = Harness::new(JobStatus::Accepted);
    let r = h.joined(REQUESTER, Role::Requester).await;
    let mut w = h.joined(WORKER, Role::Worker).await;

    typing(&r, true).await;
    typing(&r, false).await;
    typing(&r, false).await;

    let indicators: Vec<bool> = w
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::TypingIndicator { is_typing, .. } => Some(is_typing),
            _ => None,
        })
        .collect();
    assert_eq!(indicators, vec![true, false]);
}

#[tokio::test]
async fn sending_a_message_clears_typing() {
    let h = Harness::new(JobStatus::Accepted);
    let r = h.joined(REQUESTER, Role::Requester).await;
    let mut w = h.joined(WORKER, Role::Worker).await;

    typing(&r, true).await;
    w.drain();
    r.chat(JOB, "done typing").await;

    let events = w.drain();
    assert_matches!(
        events.as_slice(),
        [
            ServerEvent::TypingIndicator { is_typing: false, .. },
            ServerEvent::ChatNew { .. }
        ]
    );
}

#[tokio::test]
async fn leaving_clears_typing() {
    let h = Harness::new(JobStatus::Accepted);
    let r = h.joined(REQUESTER, Role::Requester).await;
    let mut w = h.joined(WORKER, Role::Worker).await;

    typing(&r, true).await;
    w.drain();
    r.disconnect().await;
    assert_matches!(
        w.try_next(),
        Some(ServerEvent::TypingIndicator { sender_id: REQUESTER, is_typing: false, .. })
    );
}

// ---------------------------------------------------------------------------
// Read receipts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_receipt_reaches_sender() {
    let h = Harness::new(JobStatus::Accepted);
    let mut r = h.joined(REQUESTER, Role::Requester).await;
    let mut w = h.joined(WORKER, Role::Worker).await;

    w.chat(JOB, "arrived").await;
    w.drain();
    r.drain();

    r.send(json!({"type": "chat.read", "job_id": JOB, "message_id": 1}))
        .await;
    assert_matches!(
        r.try_next(),
        Some(ServerEvent::Ack { event, .. }) if event == "chat.read"
    );
    assert_matches!(
        w.try_next(),
        Some(ServerEvent::ReadReceipt { message_id: 1, reader_id: REQUESTER, .. })
    );
    assert!(h.store.messages(JOB)[0].read);

    // The cached copy served to late joiners reflects the receipt.
    let mut o = h.connect(OBSERVER, Role::Observer).await;
    let resync = o.join(JOB).await;
    assert!(resync.messages[0].read);
}

#[tokio::test]
async fn read_receipt_for_unknown_message_is_invalid() {
    let h = Harness::new(JobStatus::Accepted);
    let mut r = h.joined(REQUESTER, Role::Requester).await;

    r.send(json!({"type": "chat.read", "job_id": JOB, "message_id": 5}))
        .await;
    assert_eq!(error_code(r.try_next()), ErrorCode::InvalidEvent);
}

#[tokio::test]
async fn read_receipt_for_own_message_is_rejected() {
    let config = RealtimeConfig {
        room_message_cache: 1,
        ..RealtimeConfig::default()
    };
    let h = Harness::with_config(JobStatus::Accepted, config);
    let mut r = h.joined(REQUESTER, Role::Requester).await;
    let mut w = h.joined(WORKER, Role::Worker).await;
    w.chat(JOB, "first").await;
    w.chat(JOB, "second").await;
    w.drain();
    r.drain();

    // Message 2 is cached; message 1 is only in storage.
    for message_id in [2, 1] {
        w.send(json!({"type": "chat.read", "job_id": JOB, "message_id": message_id}))
            .await;
        assert_eq!(error_code(w.try_next()), ErrorCode::InvalidEvent);
    }

    assert!(r.drain().is_empty());
    assert!(h.store.messages(JOB).iter().all(|m| !m.read));
}
