//! SMS Plugin
//!
//! Bridges CConnect packets and the sync coordinator: inbound
//! `cconnect.sms.messages` packets are decoded and ingested, and the
//! outgoing request packets used by [`PacketTransport`](crate::PacketTransport)
//! are built here.
//!
//! ## Protocol
//!
//! **Packet Types**:
//! - `cconnect.sms.messages` - SMS message data (incoming)
//! - `cconnect.sms.request_conversations` - Request conversation list (outgoing)
//! - `cconnect.sms.request_conversation` - Request thread messages (outgoing)
//! - `cconnect.sms.request` - Send SMS message (outgoing)
//!
//! ## SMS Messages
//!
//! The body either groups messages per thread:
//!
//! ```json
//! { "conversations": [ { "thread_id": 7, "messages": [ { "_id": 1, "date": 100, "body": "hi" } ] } ] }
//! ```
//!
//! or lists them flat, each carrying its own `thread_id`:
//!
//! ```json
//! { "messages": [ { "_id": 1, "thread_id": 7, "date": 100, "type": 1, "body": "hi", "addresses": [ { "address": "+15550100" } ] } ] }
//! ```
//!
//! A record that fails to decode is logged and skipped; the rest of the
//! packet is still ingested.

use crate::{AddOutcome, Message, Packet, Result, SmsError, SyncCoordinator, ThreadId, WireMessage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Packet type for SMS messages
pub const PACKET_TYPE_SMS_MESSAGES: &str = "cconnect.sms.messages";

/// Packet type for requesting conversation list
pub const PACKET_TYPE_SMS_REQUEST_CONVERSATIONS: &str = "cconnect.sms.request_conversations";

/// Packet type for requesting conversation messages
pub const PACKET_TYPE_SMS_REQUEST_CONVERSATION: &str = "cconnect.sms.request_conversation";

/// Packet type for sending SMS
pub const PACKET_TYPE_SMS_REQUEST: &str = "cconnect.sms.request";

/// Packet handler interface
///
/// Plugins handle packets idempotently and never depend on receiving a
/// response to something they sent.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Short lowercase identifier
    fn name(&self) -> &str;

    /// Packet types this plugin can receive
    fn incoming_capabilities(&self) -> Vec<String>;

    /// Packet types this plugin can send
    fn outgoing_capabilities(&self) -> Vec<String>;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Handle an incoming packet
    ///
    /// Should only return an error for packets that cannot be interpreted at
    /// all; individual bad records are logged.
    async fn handle_packet(&mut self, packet: &Packet) -> Result<()>;
}

/// Thread group in a `cconnect.sms.messages` body
#[derive(Debug, Deserialize)]
struct SmsConversation {
    thread_id: Value,
    #[serde(default)]
    messages: Vec<Value>,
}

/// `cconnect.sms.messages` body
#[derive(Debug, Deserialize)]
struct SmsMessages {
    #[serde(default)]
    conversations: Vec<SmsConversation>,
    #[serde(default)]
    messages: Vec<Value>,
}

/// Outcome counts for one ingested packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub created: usize,
    pub updated: usize,
    pub duplicates: usize,
    pub malformed: usize,
}

impl IngestSummary {
    fn record(&mut self, outcome: AddOutcome) {
        match outcome {
            AddOutcome::Created => self.created += 1,
            AddOutcome::Updated => self.updated += 1,
            AddOutcome::Duplicate => self.duplicates += 1,
        }
    }

    /// Total records seen, including malformed ones
    pub fn total(&self) -> usize {
        self.created + self.updated + self.duplicates + self.malformed
    }
}

/// SMS plugin
pub struct SmsPlugin {
    coordinator: Arc<SyncCoordinator>,
}

impl SmsPlugin {
    /// Create a plugin feeding `coordinator`
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Create a request for conversation list
    ///
    /// Requests the latest message in each thread.
    pub fn create_conversations_request() -> Packet {
        debug!("Creating conversations list request");
        Packet::new(PACKET_TYPE_SMS_REQUEST_CONVERSATIONS, json!({}))
    }

    /// Create a request for every message in a conversation
    pub fn create_conversation_request(thread_id: &ThreadId) -> Packet {
        debug!("Creating conversation request for thread {}", thread_id);

        Packet::new(
            PACKET_TYPE_SMS_REQUEST_CONVERSATION,
            json!({
                "threadID": thread_id.to_wire_value(),
            }),
        )
    }

    /// Create a request to send an SMS
    pub fn create_send_sms_request(phone_number: &str, message: &str) -> Packet {
        debug!("Creating send SMS request to {}", phone_number);

        Packet::new(
            PACKET_TYPE_SMS_REQUEST,
            json!({
                "phoneNumber": phone_number,
                "messageBody": message,
            }),
        )
    }

    /// Decode a `cconnect.sms.messages` packet and ingest every record
    ///
    /// # Errors
    ///
    /// `SmsError::InvalidPacket` if the body is not an SMS messages body.
    pub async fn ingest_packet(&self, packet: &Packet) -> Result<IngestSummary> {
        let messages: SmsMessages = serde_json::from_value(packet.body.clone())
            .map_err(|e| SmsError::InvalidPacket(format!("Failed to parse SMS: {}", e)))?;

        let mut summary = IngestSummary::default();
        let mut records = messages.messages;

        for conversation in messages.conversations {
            debug!(
                "Thread {}: {} messages",
                conversation.thread_id,
                conversation.messages.len()
            );
            for mut record in conversation.messages {
                if let Value::Object(ref mut map) = record {
                    map.entry("thread_id")
                        .or_insert_with(|| conversation.thread_id.clone());
                }
                records.push(record);
            }
        }

        for record in records {
            match serde_json::from_value::<WireMessage>(record) {
                Ok(wire) => {
                    let outcome = self.coordinator.ingest(Message::from(wire)).await;
                    summary.record(outcome);
                }
                Err(e) => {
                    warn!("Skipping malformed SMS record: {}", e);
                    summary.malformed += 1;
                }
            }
        }

        debug!(
            "Ingested SMS packet: {} created, {} updated, {} duplicate, {} malformed",
            summary.created, summary.updated, summary.duplicates, summary.malformed
        );

        Ok(summary)
    }
}

#[async_trait]
impl Plugin for SmsPlugin {
    fn name(&self) -> &str {
        "sms"
    }

    fn incoming_capabilities(&self) -> Vec<String> {
        vec![PACKET_TYPE_SMS_MESSAGES.to_string()]
    }

    fn outgoing_capabilities(&self) -> Vec<String> {
        vec![
            PACKET_TYPE_SMS_REQUEST_CONVERSATIONS.to_string(),
            PACKET_TYPE_SMS_REQUEST_CONVERSATION.to_string(),
            PACKET_TYPE_SMS_REQUEST.to_string(),
        ]
    }

    async fn start(&mut self) -> Result<()> {
        info!("SMS plugin started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.coordinator.cancel_all_requests().await;
        info!("SMS plugin stopped");
        Ok(())
    }

    async fn handle_packet(&mut self, packet: &Packet) -> Result<()> {
        if packet.is_type(PACKET_TYPE_SMS_MESSAGES) {
            debug!("Received SMS messages");
            self.ingest_packet(packet).await.map(|_| ())
        } else {
            warn!("Unexpected packet type: {}", packet.packet_type);
            Ok(())
        }
    }
}
