//! SMS/MMS message values
//!
//! A [`Message`] is created once on ingest and never mutated afterwards.
//! [`WireMessage`] is the structured form the phone sends inside
//! `cconnect.sms.messages` packets and converts into a [`Message`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Logical conversation identifier, stable per conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// JSON form used on the wire
    ///
    /// Android thread ids are integers, so ids that parse as one are sent as
    /// a number; anything else is sent verbatim as a string.
    pub fn to_wire_value(&self) -> Value {
        match self.0.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(self.0.clone()),
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for ThreadId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Message direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent by the user
    Sent,
    /// Received from the counterpart
    Received,
}

impl Direction {
    /// Map an Android SMS `type` column value to a direction
    ///
    /// Only `1` (MESSAGE_TYPE_INBOX) is a received message. Sent, draft,
    /// outbox, failed and queued are all outgoing from the user's side.
    pub fn from_wire_type(value: i32) -> Self {
        match value {
            1 => Direction::Received,
            _ => Direction::Sent,
        }
    }

    pub fn wire_type(&self) -> i32 {
        match self {
            Direction::Received => 1,
            Direction::Sent => 2,
        }
    }
}

/// One SMS/MMS event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Conversation this message belongs to
    pub thread_id: ThreadId,
    /// Transport-assigned identifier, unique within a thread
    pub unique_id: i64,
    /// Epoch time in milliseconds; the ordering key within a thread
    pub timestamp: i64,
    pub direction: Direction,
    /// Sender or recipient (phone number or similar)
    pub address: String,
    pub body: String,
}

impl Message {
    /// Create a received message with an empty address and body
    ///
    /// # Examples
    ///
    /// ```
    /// use cosmic_connect_sms::{Direction, Message};
    ///
    /// let msg = Message::new("1", 5, 100)
    ///     .with_address("+15550100")
    ///     .with_body("hi")
    ///     .with_direction(Direction::Sent);
    /// assert_eq!(msg.thread_id.as_str(), "1");
    /// assert_eq!(msg.body, "hi");
    /// ```
    pub fn new(thread_id: impl Into<ThreadId>, unique_id: i64, timestamp: i64) -> Self {
        Self {
            thread_id: thread_id.into(),
            unique_id,
            timestamp,
            direction: Direction::Received,
            address: String::new(),
            body: String::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }
}

/// Address entry of a multi-recipient wire message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAddress {
    pub address: String,
}

/// SMS record as delivered by the phone
///
/// Older phones send a single `address`; newer ones send an `addresses`
/// list. Both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message ID
    #[serde(rename = "_id")]
    pub id: i64,

    /// Thread ID (number or string)
    #[serde(
        rename = "thread_id",
        deserialize_with = "deserialize_thread_id",
        serialize_with = "serialize_thread_id"
    )]
    pub thread_id: ThreadId,

    /// Timestamp (milliseconds since epoch)
    pub date: i64,

    /// Message type (1 = received, anything else = sent)
    #[serde(rename = "type", default = "default_wire_type")]
    pub message_type: i32,

    #[serde(default)]
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<WireAddress>,
}

impl WireMessage {
    /// First known counterpart address
    pub fn primary_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .or_else(|| self.addresses.first().map(|a| a.address.as_str()))
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let address = wire.primary_address().unwrap_or_default().to_string();
        Self {
            thread_id: wire.thread_id,
            unique_id: wire.id,
            timestamp: wire.date,
            direction: Direction::from_wire_type(wire.message_type),
            address,
            body: wire.body,
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.unique_id,
            thread_id: message.thread_id.clone(),
            date: message.timestamp,
            message_type: message.direction.wire_type(),
            body: message.body.clone(),
            address: Some(message.address.clone()),
            addresses: Vec::new(),
        }
    }
}

fn default_wire_type() -> i32 {
    1
}

fn deserialize_thread_id<'de, D>(deserializer: D) -> std::result::Result<ThreadId, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Value = Deserialize::deserialize(deserializer)?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(ThreadId::from)
            .ok_or_else(|| Error::custom("Invalid number for thread_id")),
        Value::String(s) => Ok(ThreadId(s)),
        _ => Err(Error::custom("thread_id must be a number or string")),
    }
}

fn serialize_thread_id<S>(id: &ThreadId, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    id.to_wire_value().serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direction_from_wire_type() {
        assert_eq!(Direction::from_wire_type(1), Direction::Received);
        assert_eq!(Direction::from_wire_type(2), Direction::Sent);
        // Outbox and failed messages originate from the user
        assert_eq!(Direction::from_wire_type(4), Direction::Sent);
        assert_eq!(Direction::from_wire_type(5), Direction::Sent);
    }

    #[test]
    fn test_wire_message_single_address() {
        let wire: WireMessage = serde_json::from_value(json!({
            "_id": 5,
            "thread_id": 1,
            "address": "+15550100",
            "body": "hi",
            "date": 100,
            "type": 1,
            "read": 1
        }))
        .unwrap();

        let msg = Message::from(wire);
        assert_eq!(msg.thread_id, ThreadId::new("1"));
        assert_eq!(msg.unique_id, 5);
        assert_eq!(msg.timestamp, 100);
        assert_eq!(msg.address, "+15550100");
        assert_eq!(msg.direction, Direction::Received);
    }

    #[test]
    fn test_wire_message_address_list() {
        let wire: WireMessage = serde_json::from_value(json!({
            "_id": 9,
            "thread_id": "group-3",
            "addresses": [{ "address": "+15550101" }, { "address": "+15550102" }],
            "body": "hello all",
            "date": 300,
            "type": 2
        }))
        .unwrap();

        let msg = Message::from(wire);
        assert_eq!(msg.thread_id.as_str(), "group-3");
        assert_eq!(msg.address, "+15550101");
        assert!(msg.is_sent());
    }

    #[test]
    fn test_wire_message_missing_type_is_received() {
        let wire: WireMessage = serde_json::from_value(json!({
            "_id": 1,
            "thread_id": 4,
            "date": 10
        }))
        .unwrap();

        assert_eq!(wire.message_type, 1);
        assert_eq!(Message::from(wire).address, "");
    }

    #[test]
    fn test_thread_id_wire_value() {
        assert_eq!(ThreadId::new("42").to_wire_value(), json!(42));
        assert_eq!(ThreadId::new("abc").to_wire_value(), json!("abc"));
    }

    #[test]
    fn test_wire_from_message_keeps_numeric_thread() {
        let msg = Message::new("17", 3, 900).with_address("+15550100").with_body("yo");
        let value = serde_json::to_value(WireMessage::from(&msg)).unwrap();

        assert_eq!(value["thread_id"], json!(17));
        assert_eq!(value["_id"], json!(3));
        assert_eq!(value["type"], json!(1));
    }
}
