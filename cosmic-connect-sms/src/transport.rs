//! Transport Trait Abstraction
//!
//! The sync coordinator never talks to the network directly. It issues
//! requests through [`SmsTransport`]; answers come back later as ordinary
//! inbound messages on the ingest path.
//!
//! [`PacketTransport`] is the production implementation: it turns each
//! request into a CConnect packet and queues it on the device's packet
//! channel, the same `(device_id, Packet)` channel plugins use for
//! proactive sends.

use crate::plugin::SmsPlugin;
use crate::{Packet, Result, SmsError, ThreadId};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::mpsc::Sender;
use tracing::debug;

/// Requests the sync coordinator can send to the phone
///
/// All calls are fire-and-forget: `Ok(())` means the request was handed to
/// the transport, not that the phone answered.
#[async_trait]
pub trait SmsTransport: Send + Sync + Debug {
    /// Ask the phone to (re)send one conversation
    async fn request_conversation(&self, thread_id: &ThreadId) -> Result<()>;

    /// Ask the phone for every conversation (at least its latest message)
    async fn request_all_conversations(&self) -> Result<()>;

    /// Send a text message to `address`
    async fn send_message(&self, address: &str, body: &str) -> Result<()>;
}

/// Transport that queues CConnect packets for a device
#[derive(Debug, Clone)]
pub struct PacketTransport {
    device_id: String,
    packet_sender: Sender<(String, Packet)>,
}

impl PacketTransport {
    /// Create a transport sending on behalf of `device_id`
    pub fn new(device_id: impl Into<String>, packet_sender: Sender<(String, Packet)>) -> Self {
        Self {
            device_id: device_id.into(),
            packet_sender,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn dispatch(&self, packet: Packet) -> Result<()> {
        debug!(
            "Queueing '{}' packet for device {}",
            packet.packet_type, self.device_id
        );

        self.packet_sender
            .send((self.device_id.clone(), packet))
            .await
            .map_err(|e| {
                SmsError::ChannelClosed(format!(
                    "packet channel for device {} closed: {}",
                    self.device_id, e
                ))
            })
    }
}

#[async_trait]
impl SmsTransport for PacketTransport {
    async fn request_conversation(&self, thread_id: &ThreadId) -> Result<()> {
        self.dispatch(SmsPlugin::create_conversation_request(thread_id))
            .await
    }

    async fn request_all_conversations(&self) -> Result<()> {
        self.dispatch(SmsPlugin::create_conversations_request()).await
    }

    async fn send_message(&self, address: &str, body: &str) -> Result<()> {
        self.dispatch(SmsPlugin::create_send_sms_request(address, body))
            .await
    }
}
