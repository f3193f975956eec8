//! Sync Integration Tests
//!
//! End-to-end behaviour of the conversation sync path:
//! - Idempotent, ordered ingestion and reverse pagination
//! - Created/updated signalling to listing views
//! - Reply routing and empty-thread failures
//! - View projection rebinding under stale answers
//! - Packet ingestion through the SMS plugin and outgoing request packets
//! - Outstanding request timeouts

use cosmic_connect_sms::{
    AddOutcome, ConversationEvent, Direction, Message, Packet, PacketTransport, Plugin,
    ProjectionChange, Result, SmsConfig, SmsError, SmsPlugin, SmsTransport, SyncCoordinator,
    ThreadId, ViewProjection, PACKET_TYPE_SMS_MESSAGES, PACKET_TYPE_SMS_REQUEST,
    PACKET_TYPE_SMS_REQUEST_CONVERSATION,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_test::{assert_err, assert_ok};

/// Transport call recorded by [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Conversation(ThreadId),
    AllConversations,
    Send { address: String, body: String },
}

/// Mock transport recording every request
#[derive(Debug, Default)]
struct MockTransport {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockTransport {
    async fn get_calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl SmsTransport for MockTransport {
    async fn request_conversation(&self, thread_id: &ThreadId) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(Call::Conversation(thread_id.clone()));
        Ok(())
    }

    async fn request_all_conversations(&self) -> Result<()> {
        self.calls.lock().await.push(Call::AllConversations);
        Ok(())
    }

    async fn send_message(&self, address: &str, body: &str) -> Result<()> {
        self.calls.lock().await.push(Call::Send {
            address: address.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn setup(config: SmsConfig) -> (Arc<SyncCoordinator>, Arc<MockTransport>) {
    init_tracing();
    let transport = Arc::new(MockTransport::default());
    let coordinator = Arc::new(SyncCoordinator::new(transport.clone(), config));
    (coordinator, transport)
}

fn msg(thread: &str, unique_id: i64, timestamp: i64, body: &str) -> Message {
    Message::new(thread, unique_id, timestamp)
        .with_address(format!("+1555000{}", thread))
        .with_body(body)
}

fn ids(messages: &[Message]) -> Vec<i64> {
    messages.iter().map(|m| m.unique_id).collect()
}

#[tokio::test]
async fn test_reference_conversation_example() {
    let (coordinator, _) = setup(SmsConfig::default());
    let thread = ThreadId::new("1");

    assert_eq!(
        coordinator.ingest(msg("1", 5, 100, "hi")).await,
        AddOutcome::Created
    );
    assert_eq!(
        coordinator.ingest(msg("1", 5, 100, "hi")).await,
        AddOutcome::Duplicate
    );
    assert_eq!(coordinator.store().read().await.message_count(&thread), 1);
    assert_eq!(
        coordinator.ingest(msg("1", 6, 200, "yo")).await,
        AddOutcome::Updated
    );

    let page = coordinator.messages_in_range(&thread, 0, 2).await;
    assert_eq!(ids(&page), vec![6, 5]);
    assert_eq!(page[0].body, "yo");
    assert_eq!(page[1].body, "hi");
}

#[tokio::test]
async fn test_replayed_delivery_is_idempotent() {
    let (coordinator, _) = setup(SmsConfig::default());
    let batch: Vec<Message> = (1..=20)
        .map(|i| msg("1", i, (i * 37) % 11 * 100 + i, "x"))
        .collect();

    let mut changes = 0;
    for _ in 0..3 {
        for m in &batch {
            if coordinator.ingest(m.clone()).await.is_change() {
                changes += 1;
            }
        }
    }

    assert_eq!(changes, 20);
    assert_eq!(
        coordinator
            .store()
            .read()
            .await
            .message_count(&ThreadId::new("1")),
        20
    );
}

#[tokio::test]
async fn test_out_of_order_delivery_pages_newest_first() {
    let (coordinator, _) = setup(SmsConfig::default());
    let thread = ThreadId::new("7");
    for (id, ts) in [(1, 500), (2, 100), (3, 900), (4, 300), (5, 700), (6, 200)] {
        coordinator.ingest(msg("7", id, ts, "x")).await;
    }

    let all = coordinator.messages_in_range(&thread, 0, 6).await;
    assert!(all.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

    let mut paged = coordinator.messages_in_range(&thread, 0, 3).await;
    paged.extend(coordinator.messages_in_range(&thread, 3, 6).await);
    assert_eq!(paged, all);

    assert!(coordinator.messages_in_range(&thread, 6, 9).await.is_empty());
    assert!(coordinator
        .messages_in_range(&ThreadId::new("nope"), 0, 10)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_listing_view_sees_created_then_updated() {
    let (coordinator, _) = setup(SmsConfig::default());
    let mut listing = coordinator.subscribe_all().await;

    coordinator.ingest(msg("1", 1, 10, "a")).await;
    coordinator.ingest(msg("2", 2, 20, "b")).await;
    coordinator.ingest(msg("1", 1, 10, "a")).await;
    coordinator.ingest(msg("1", 3, 30, "c")).await;

    let events: Vec<ConversationEvent> = std::iter::from_fn(|| listing.try_recv()).collect();
    assert_eq!(
        events,
        vec![
            ConversationEvent::ConversationCreated(msg("1", 1, 10, "a")),
            ConversationEvent::ConversationCreated(msg("2", 2, 20, "b")),
            ConversationEvent::ConversationUpdated(msg("1", 3, 30, "c")),
        ]
    );

    let latest = coordinator.active_conversations().await;
    assert_eq!(ids(&latest), vec![3, 2]);
}

#[tokio::test]
async fn test_reply_to_empty_thread_issues_no_transport_call() {
    let (coordinator, transport) = setup(SmsConfig::default());

    let err = assert_err!(coordinator.send_reply(&ThreadId::new("1"), "hello").await);
    assert!(matches!(err, SmsError::EmptyThread(_)));
    assert!(err.requires_user_action());
    assert!(transport.get_calls().await.is_empty());

    let err = assert_err!(coordinator.address_for(&ThreadId::new("1")).await);
    assert!(matches!(err, SmsError::NotFound(_)));
}

#[tokio::test]
async fn test_reply_goes_to_thread_counterpart() {
    let (coordinator, transport) = setup(SmsConfig::default());
    coordinator
        .ingest(msg("3", 1, 10, "ping").with_direction(Direction::Received))
        .await;

    assert_ok!(coordinator.send_reply(&ThreadId::new("3"), "pong").await);
    assert_eq!(
        transport.get_calls().await,
        vec![Call::Send {
            address: "+15550003".to_string(),
            body: "pong".to_string()
        }]
    );
}

#[tokio::test]
async fn test_rebound_view_ignores_stale_thread() {
    let (coordinator, transport) = setup(SmsConfig::default());
    coordinator.ingest(msg("b", 10, 1000, "b1")).await;

    let mut view = ViewProjection::new(coordinator.clone());
    assert_ok!(view.bind(ThreadId::new("a")).await);
    assert_ok!(view.bind(ThreadId::new("b")).await);
    view.apply_pending();
    assert_eq!(ids(view.rows()), vec![10]);

    // Late answer to the request made for thread a
    coordinator.ingest(msg("a", 1, 2000, "a1")).await;
    assert!(view.apply_pending().is_empty());
    assert_eq!(ids(view.rows()), vec![10]);

    // A stale event pushed directly is discarded as well
    let stale = ConversationEvent::ConversationUpdated(msg("a", 2, 3000, "a2"));
    assert_eq!(view.apply_event(stale), None);
    assert_eq!(ids(view.rows()), vec![10]);

    assert_eq!(
        transport.get_calls().await,
        vec![
            Call::Conversation(ThreadId::new("a")),
            Call::Conversation(ThreadId::new("b")),
        ]
    );
}

#[tokio::test]
async fn test_queued_stale_event_discarded_after_rebind() {
    let (coordinator, _) = setup(SmsConfig::default());
    coordinator.ingest(msg("b", 10, 1000, "b1")).await;

    let mut view = ViewProjection::new(coordinator.clone());
    assert_ok!(view.bind(ThreadId::new("a")).await);

    // Routed to the view while still bound to a, left undrained
    coordinator.ingest(msg("a", 1, 2000, "a1")).await;
    coordinator.ingest(msg("a", 2, 3000, "a2")).await;

    assert_ok!(view.bind(ThreadId::new("b")).await);
    let changes = view.apply_pending();

    assert_eq!(
        changes,
        vec![ProjectionChange::Inserted {
            position: 0,
            message: msg("b", 10, 1000, "b1")
        }]
    );
    assert_eq!(ids(view.rows()), vec![10]);
    assert!(view.rows().iter().all(|m| m.thread_id.as_str() == "b"));
}

#[tokio::test]
async fn test_view_follows_live_conversation() {
    let (coordinator, transport) = setup(SmsConfig {
        page_size: 3,
        ..Default::default()
    });
    for i in 1..=5 {
        coordinator.ingest(msg("1", i, i * 100, "old")).await;
    }

    let mut view = ViewProjection::new(coordinator.clone());
    assert_ok!(view.bind(ThreadId::new("1")).await);
    view.apply_pending();
    assert_eq!(ids(view.rows()), vec![5, 4, 3]);

    coordinator.ingest(msg("1", 6, 600, "new")).await;
    assert_eq!(
        view.next_change().await,
        Some(ProjectionChange::Inserted {
            position: 0,
            message: msg("1", 6, 600, "new")
        })
    );

    assert_ok!(view.load_older().await);
    view.apply_pending();
    assert_eq!(ids(view.rows()), vec![6, 5, 4, 3, 2, 1]);

    assert_ok!(view.send_reply("thanks").await);
    assert!(transport.get_calls().await.contains(&Call::Send {
        address: "+15550001".to_string(),
        body: "thanks".to_string()
    }));
}

#[tokio::test]
async fn test_plugin_packet_feeds_view() {
    let (coordinator, _) = setup(SmsConfig::default());
    let mut plugin = SmsPlugin::new(coordinator.clone());
    assert_ok!(plugin.start().await);

    let mut view = ViewProjection::new(coordinator.clone());
    assert_ok!(view.bind(ThreadId::new("42")).await);

    let packet = Packet::new(
        PACKET_TYPE_SMS_MESSAGES,
        json!({
            "conversations": [
                {
                    "thread_id": 42,
                    "messages": [
                        { "_id": 2, "address": "+15550142", "body": "second", "date": 2000, "type": 1 },
                        { "_id": 1, "address": "+15550142", "body": "first", "date": 1000, "type": 2 }
                    ]
                },
                {
                    "thread_id": 43,
                    "messages": [
                        { "_id": 9, "address": "+15550143", "body": "other", "date": 1500, "type": 1 }
                    ]
                }
            ]
        }),
    );

    // As read off the wire, with the upstream prefix
    let wire = serde_json::to_string(&packet).unwrap()
        .replace("cconnect.sms.messages", "kdeconnect.sms.messages");
    let decoded: Packet = serde_json::from_str(&wire).unwrap();
    assert_ok!(plugin.handle_packet(&decoded).await);

    view.apply_pending();
    assert_eq!(ids(view.rows()), vec![2, 1]);
    assert!(view.row(1).map_or(false, Message::is_sent));
    assert!(coordinator.pending_requests().await.is_empty());

    assert_ok!(plugin.stop().await);
}

#[tokio::test]
async fn test_packet_transport_round_trip() {
    init_tracing();
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let transport = Arc::new(PacketTransport::new("phone", tx));
    let coordinator = Arc::new(SyncCoordinator::new(transport, SmsConfig::default()));

    coordinator
        .ingest(msg("12", 1, 10, "hi").with_address("+15550112"))
        .await;
    assert_ok!(coordinator.request_thread(&ThreadId::new("12")).await);
    assert_ok!(coordinator.send_reply(&ThreadId::new("12"), "hey").await);

    let (device, packet) = rx.recv().await.unwrap();
    assert_eq!(device, "phone");
    assert!(packet.is_type(PACKET_TYPE_SMS_REQUEST_CONVERSATION));
    assert_eq!(packet.body["threadID"], 12);

    let (_, packet) = rx.recv().await.unwrap();
    assert!(packet.is_type(PACKET_TYPE_SMS_REQUEST));
    assert_eq!(packet.body["phoneNumber"], "+15550112");
    assert_eq!(packet.body["messageBody"], "hey");
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_seed_request_times_out_in_view() {
    let (coordinator, _) = setup(SmsConfig {
        request_timeout_secs: 5,
        ..Default::default()
    });

    let mut view = ViewProjection::new(coordinator.clone());
    assert_ok!(view.bind(ThreadId::new("1")).await);
    assert_eq!(coordinator.pending_requests().await, vec![ThreadId::new("1")]);

    assert_eq!(
        view.next_change().await,
        Some(ProjectionChange::RequestTimedOut {
            thread_id: ThreadId::new("1")
        })
    );
    assert!(coordinator.pending_requests().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_answered_request_does_not_time_out() {
    let (coordinator, _) = setup(SmsConfig {
        request_timeout_secs: 5,
        ..Default::default()
    });
    let mut listing = coordinator.subscribe_all().await;

    assert_ok!(coordinator.request_thread(&ThreadId::new("1")).await);
    tokio::time::advance(Duration::from_secs(2)).await;
    coordinator.ingest(msg("1", 1, 10, "hi")).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(matches!(
        listing.try_recv(),
        Some(ConversationEvent::ConversationCreated(_))
    ));
    assert_eq!(listing.try_recv(), None);
}

#[tokio::test(start_paused = true)]
async fn test_rerequest_restarts_timeout() {
    let (coordinator, _) = setup(SmsConfig {
        request_timeout_secs: 5,
        ..Default::default()
    });
    let mut sub = coordinator.subscribe_thread(ThreadId::new("1")).await;

    assert_ok!(coordinator.request_thread(&ThreadId::new("1")).await);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_ok!(coordinator.request_thread(&ThreadId::new("1")).await);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(sub.try_recv(), None);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        sub.try_recv(),
        Some(ConversationEvent::RequestTimedOut {
            thread_id: ThreadId::new("1")
        })
    );
    assert_eq!(sub.try_recv(), None);
}

#[test]
fn test_snapshot_survives_restart() {
    tokio_test::block_on(async {
        let dir = tempfile::TempDir::new().unwrap();
        let config = SmsConfig {
            cache_path: Some(dir.path().join("sms").join("conversations.json")),
            ..Default::default()
        };
        let config_path = dir.path().join("sms.toml");
        assert_ok!(config.save(&config_path));
        let config = assert_ok!(SmsConfig::load(&config_path));

        let transport = Arc::new(MockTransport::default());
        let coordinator = assert_ok!(SyncCoordinator::with_config(
            transport.clone(),
            config.clone()
        ));
        coordinator.ingest(msg("1", 1, 10, "a")).await;
        coordinator.ingest(msg("2", 2, 20, "b")).await;
        assert_ok!(coordinator.persist().await);
        drop(coordinator);

        let restored = assert_ok!(SyncCoordinator::with_config(transport, config));
        assert_eq!(ids(&restored.active_conversations().await), vec![2, 1]);
        assert_eq!(
            restored.ingest(msg("1", 1, 10, "a")).await,
            AddOutcome::Duplicate
        );
    });
}
