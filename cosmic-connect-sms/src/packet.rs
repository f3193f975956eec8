//! CConnect Network Packet
//!
//! SMS requests and replies travel between the desktop and the phone as
//! JSON packets. Framing and the socket belong to the connection layer; this
//! crate only builds and reads packet values.
//!
//! ## Packet Structure
//!
//! - `id`: UNIX epoch timestamp in milliseconds
//! - `type`: Packet type such as `cconnect.sms.request_conversation`
//! - `body`: JSON dictionary of packet parameters
//!
//! Phones running the upstream KDE Connect app use the `kdeconnect.` prefix
//! instead of `cconnect.`; [`Packet::is_type`] treats both as equal.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Represents a CConnect network packet
///
/// # Examples
///
/// ```
/// use cosmic_connect_sms::Packet;
/// use serde_json::json;
///
/// let packet = Packet::new(
///     "cconnect.sms.request",
///     json!({ "phoneNumber": "+15550100", "messageBody": "on my way" }),
/// );
///
/// assert!(packet.is_type("kdeconnect.sms.request"));
/// assert_eq!(packet.body["messageBody"], "on my way");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    /// UNIX timestamp in milliseconds
    /// Note: Some clients send this as a string
    #[serde(deserialize_with = "deserialize_id", serialize_with = "serialize_id")]
    pub id: i64,

    /// Packet type in format: cconnect.<plugin>[.<action>]
    #[serde(rename = "type")]
    pub packet_type: String,

    /// Packet-specific parameters
    #[serde(default)]
    pub body: Value,
}

impl Packet {
    /// Creates a new packet with the specified type and body
    ///
    /// The packet ID is set to the current timestamp in milliseconds.
    pub fn new(packet_type: impl Into<String>, body: Value) -> Self {
        Self {
            id: current_timestamp(),
            packet_type: packet_type.into(),
            body,
        }
    }

    /// Check if packet is of a specific type
    ///
    /// `cconnect.` and `kdeconnect.` prefixes are interchangeable.
    pub fn is_type(&self, packet_type: &str) -> bool {
        if self.packet_type == packet_type {
            return true;
        }

        if let Some(rest) = packet_type.strip_prefix("cconnect.") {
            return self.packet_type == format!("kdeconnect.{}", rest);
        }
        if let Some(rest) = packet_type.strip_prefix("kdeconnect.") {
            return self.packet_type == format!("cconnect.{}", rest);
        }

        false
    }
}

/// Custom deserializer for the `id` field to handle both string and number formats
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value: Value = Deserialize::deserialize(deserializer)?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::custom("Invalid number for id")),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| Error::custom("Invalid string for id")),
        _ => Err(Error::custom("id must be a number or string")),
    }
}

fn serialize_id<S>(id: &i64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_i64(*id)
}

/// Generate current UNIX timestamp in milliseconds
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}
