mod support;

use std::sync::Arc;
use support::{coordinator, open_ticket, profile, MemoryStore, RecordingTransport, SUPPORT_CHAT, TECH_CHAT};
use supportbot::coordinator::ClientOutcome;
use supportbot::kb::Topic;
use supportbot::shared::models::{InboundContent, TicketStatus};

fn text(content: &str) -> InboundContent {
    InboundContent::Text {
        text: content.to_string(),
        entities: vec![],
    }
}

#[tokio::test]
async fn simultaneous_first_messages_create_one_ticket() {
    let store = Arc::new(MemoryStore::default());
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), None);
    let user = profile(42);

    let first = text("first");
    let second = text("second");
    let (a, b) = tokio::join!(
        coord.handle_client_message(&user, Some(Topic::Balance), &first),
        coord.handle_client_message(&user, Some(Topic::Balance), &second),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == ClientOutcome::Opened)
            .count(),
        1
    );
    assert_eq!(transport.thread_count(), 1);
    let ticket = store.ticket_of(42).unwrap();
    assert!(ticket.is_open());
}

#[tokio::test]
async fn follow_up_lands_in_existing_thread() {
    let store = Arc::new(MemoryStore::with_ticket(open_ticket(
        7,
        101,
        chrono::Utc::now(),
    )));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), None);

    let outcome = coord
        .handle_client_message(&profile(7), None, &text("still broken"))
        .await
        .unwrap();

    assert_eq!(outcome, ClientOutcome::Relayed);
    assert_eq!(transport.thread_count(), 0);
    let to_thread = transport.messages_to(SUPPORT_CHAT);
    assert_eq!(to_thread.len(), 1);
    assert_eq!(to_thread[0].thread_id, Some(101));
}

#[tokio::test]
async fn message_without_ticket_or_topic_is_bounced() {
    let store = Arc::new(MemoryStore::default());
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store, transport.clone(), None);

    let outcome = coord
        .handle_client_message(&profile(7), None, &text("hello?"))
        .await
        .unwrap();

    assert_eq!(outcome, ClientOutcome::NoTicket);
    assert_eq!(transport.thread_count(), 0);
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn message_after_close_reports_previous_ticket() {
    let mut ticket = open_ticket(7, 101, chrono::Utc::now());
    ticket.status = TicketStatus::Closed;
    let store = Arc::new(MemoryStore::with_ticket(ticket));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store, transport.clone(), None);

    let outcome = coord
        .handle_client_message(&profile(7), None, &text("are you there?"))
        .await
        .unwrap();

    assert_eq!(outcome, ClientOutcome::PreviouslyClosed);
    assert_eq!(transport.thread_count(), 0);
}

#[tokio::test]
async fn close_is_idempotent() {
    let store = Arc::new(MemoryStore::with_ticket(open_ticket(
        9,
        101,
        chrono::Utc::now(),
    )));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), None);

    assert!(coord.close(9, true).await.unwrap());
    assert!(!coord.close(9, true).await.unwrap());

    assert!(!store.ticket_of(9).unwrap().is_open());
    // Rename and user notification happened exactly once.
    assert_eq!(transport.renamed.lock().unwrap().len(), 1);
    assert_eq!(transport.messages_to(9).len(), 1);
    let (_, _, title) = transport.renamed.lock().unwrap()[0].clone();
    assert!(title.starts_with("🔒 ЗАКРЫТО:"));
}

#[tokio::test]
async fn close_tears_down_tech_thread() {
    let mut ticket = open_ticket(9, 101, chrono::Utc::now());
    ticket.tech_thread_id = Some(205);
    let store = Arc::new(MemoryStore::with_ticket(ticket));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), None);

    assert!(coord.close(9, false).await.unwrap());

    let closed = transport.closed_threads.lock().unwrap().clone();
    assert!(closed.contains(&(SUPPORT_CHAT, 101)));
    assert!(closed.contains(&(TECH_CHAT, 205)));
    assert!(store.ticket_of(9).unwrap().tech_thread_id.is_none());
    // Silent close: nothing went to the user.
    assert!(transport.messages_to(9).is_empty());
}

#[tokio::test]
async fn double_escalation_reuses_live_tech_thread() {
    let store = Arc::new(MemoryStore::with_ticket(open_ticket(
        9,
        101,
        chrono::Utc::now(),
    )));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), None);

    let first = coord.request_technical_escalation(9).await.unwrap().unwrap();
    let second = coord.request_technical_escalation(9).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(transport.thread_count(), 1);
    assert_eq!(store.ticket_of(9).unwrap().tech_thread_id, Some(first));
}

#[tokio::test]
async fn stale_tech_thread_reference_is_replaced() {
    let mut ticket = open_ticket(9, 101, chrono::Utc::now());
    ticket.tech_thread_id = Some(205);
    let store = Arc::new(MemoryStore::with_ticket(ticket));
    let transport = Arc::new(RecordingTransport::default());
    transport
        .reopen_not_found
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let coord = coordinator(store.clone(), transport.clone(), None);

    let fresh = coord.request_technical_escalation(9).await.unwrap().unwrap();

    assert_ne!(fresh, 205);
    assert_eq!(store.ticket_of(9).unwrap().tech_thread_id, Some(fresh));
    assert_eq!(transport.thread_count(), 1);
}

#[tokio::test]
async fn escalation_replays_ticket_history() {
    let store = Arc::new(MemoryStore::default());
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), None);

    coord
        .handle_client_message(&profile(9), Some(Topic::Bugs), &text("it crashed"))
        .await
        .unwrap();
    coord
        .handle_client_message(&profile(9), None, &text("twice now"))
        .await
        .unwrap();
    coord.request_technical_escalation(9).await.unwrap();

    // Header plus two relayed messages replayed into the tech thread.
    let copied = transport.copied.lock().unwrap();
    assert_eq!(copied.len(), 3);
    assert!(copied.iter().all(|(_, _, to, _)| *to == TECH_CHAT));
}

#[tokio::test]
async fn staff_reply_reaches_user_and_flips_human_responded() {
    let store = Arc::new(MemoryStore::with_ticket(open_ticket(
        9,
        101,
        chrono::Utc::now(),
    )));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), None);

    coord
        .handle_staff_reply(101, false, &text("We are on it"))
        .await
        .unwrap();

    let to_user = transport.messages_to(9);
    assert_eq!(to_user.len(), 1);
    assert_eq!(to_user[0].text, "We are on it");
    let ticket = store.ticket_of(9).unwrap();
    assert!(ticket.human_responded);
    assert!(!ticket.close_reminder_sent);
}

#[tokio::test]
async fn colliding_thread_ids_resolve_by_chat() {
    let now = chrono::Utc::now();
    let store = Arc::new(MemoryStore::with_ticket(open_ticket(1, 101, now)));
    // A different user's technical thread happens to share the id 101.
    let mut other = open_ticket(2, 500, now);
    other.tech_thread_id = Some(101);
    store.tickets.lock().unwrap().insert(2, other);
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store, transport.clone(), None);

    coord
        .handle_staff_reply(101, false, &text("support side"))
        .await
        .unwrap();
    coord
        .handle_staff_reply(101, true, &text("tech side"))
        .await
        .unwrap();

    let to_first = transport.messages_to(1);
    assert_eq!(to_first.len(), 1);
    assert_eq!(to_first[0].text, "support side");
    let to_second = transport.messages_to(2);
    assert_eq!(to_second.len(), 1);
    assert_eq!(to_second[0].text, "tech side");
}

#[tokio::test]
async fn auto_reply_delivered_and_counted() {
    let store = Arc::new(MemoryStore::default());
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(
        store.clone(),
        transport.clone(),
        Some("Проверьте раздел Профиль.".into()),
    );

    coord
        .handle_client_message(&profile(9), Some(Topic::Balance), &text("где баланс?"))
        .await
        .unwrap();

    let to_user = transport.messages_to(9);
    // Confirmation plus the generated answer.
    assert_eq!(to_user.len(), 2);
    assert!(to_user.iter().any(|m| m.text.contains("Профиль")));
    assert_eq!(store.ticket_of(9).unwrap().ai_response_count, 1);
}

#[tokio::test]
async fn auto_reply_stops_at_ceiling() {
    let mut ticket = open_ticket(9, 101, chrono::Utc::now());
    ticket.ai_response_count = 2;
    let store = Arc::new(MemoryStore::with_ticket(ticket));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), Some("answer".into()));

    coord
        .handle_client_message(&profile(9), None, &text("and again"))
        .await
        .unwrap();

    assert!(transport.messages_to(9).is_empty());
    assert_eq!(store.ticket_of(9).unwrap().ai_response_count, 2);
}

#[tokio::test]
async fn auto_reply_suppressed_after_human_responded() {
    let mut ticket = open_ticket(9, 101, chrono::Utc::now());
    ticket.human_responded = true;
    let store = Arc::new(MemoryStore::with_ticket(ticket));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), Some("answer".into()));

    coord
        .handle_client_message(&profile(9), None, &text("any news?"))
        .await
        .unwrap();

    assert!(transport.messages_to(9).is_empty());
    assert_eq!(store.ticket_of(9).unwrap().ai_response_count, 0);
}

#[tokio::test]
async fn distress_suppresses_auto_reply_and_flags_thread() {
    let store = Arc::new(MemoryStore::with_ticket(open_ticket(
        9,
        101,
        chrono::Utc::now(),
    )));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), Some("answer".into()));

    coord
        .handle_client_message(&profile(9), None, &text("ничего не работает, сколько ждать"))
        .await
        .unwrap();

    assert!(transport.messages_to(9).is_empty());
    let to_thread = transport.messages_to(SUPPORT_CHAT);
    assert!(to_thread.iter().any(|m| m.text.contains("⚠️")));
    assert_eq!(store.ticket_of(9).unwrap().ai_response_count, 0);
}

#[tokio::test]
async fn handoff_phrase_in_generated_reply_is_withheld() {
    let store = Arc::new(MemoryStore::with_ticket(open_ticket(
        9,
        101,
        chrono::Utc::now(),
    )));
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(
        store.clone(),
        transport.clone(),
        Some("Передам ваш вопрос оператору.".into()),
    );

    coord
        .handle_client_message(&profile(9), None, &text("помогите с аккаунтом"))
        .await
        .unwrap();

    assert!(transport.messages_to(9).is_empty());
    assert_eq!(store.ticket_of(9).unwrap().ai_response_count, 0);
}

#[tokio::test]
async fn close_all_closes_every_open_ticket() {
    let store = Arc::new(MemoryStore::default());
    let now = chrono::Utc::now();
    {
        let mut tickets = store.tickets.lock().unwrap();
        tickets.insert(1, open_ticket(1, 101, now));
        tickets.insert(2, open_ticket(2, 102, now));
        let mut closed = open_ticket(3, 103, now);
        closed.status = supportbot::shared::models::TicketStatus::Closed;
        tickets.insert(3, closed);
    }
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport.clone(), None);

    let closed = coord.close_all().await.unwrap();

    assert_eq!(closed, 2);
    assert!(!store.ticket_of(1).unwrap().is_open());
    assert!(!store.ticket_of(2).unwrap().is_open());
}

#[tokio::test]
async fn locale_hint_seeds_language_and_persists() {
    let store = Arc::new(MemoryStore::default());
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store.clone(), transport, None);

    assert_eq!(coord.resolve_language(5, Some("en")).await, "en");
    // An unsupported locale falls back to the default.
    assert_eq!(coord.resolve_language(8, Some("de")).await, "ru");

    // A fresh coordinator over the same store sees the persisted choice.
    let coord = coordinator(store, Arc::new(RecordingTransport::default()), None);
    assert_eq!(coord.language(5).await, "en");
}

#[tokio::test]
async fn stored_language_wins_over_locale_hint() {
    let store = Arc::new(MemoryStore::default());
    store.languages.lock().unwrap().insert(6, "ru".into());
    let transport = Arc::new(RecordingTransport::default());
    let coord = coordinator(store, transport, None);

    assert_eq!(coord.resolve_language(6, Some("en")).await, "ru");
}
