//! Cosmic Connect SMS Sync
//!
//! Conversation store and synchronization for SMS/MMS messages mirrored from
//! a paired phone. Messages arrive out of order and possibly duplicated over
//! the CConnect protocol; they are grouped into threads, deduplicated by
//! their transport id and kept in timestamp order, then exposed to listing
//! views and to per-conversation view projections.
//!
//! Data flows transport → [`SmsPlugin`] → [`SyncCoordinator::ingest`] →
//! [`ConversationStore`] → [`EventBus`] → [`ViewProjection`]. Replies go the
//! other way through [`SmsTransport`].

pub mod config;
pub mod coordinator;
pub mod events;
pub mod message;
pub mod packet;
pub mod plugin;
pub mod projection;
pub mod store;
pub mod transport;

mod error;

pub use config::SmsConfig;
pub use coordinator::SyncCoordinator;
pub use error::{Result, SmsError};
pub use events::{ConversationEvent, EventBus, Subscription};
pub use message::{Direction, Message, ThreadId, WireAddress, WireMessage};
pub use packet::{current_timestamp, Packet};
pub use plugin::{
    IngestSummary, Plugin, SmsPlugin, PACKET_TYPE_SMS_MESSAGES, PACKET_TYPE_SMS_REQUEST,
    PACKET_TYPE_SMS_REQUEST_CONVERSATION, PACKET_TYPE_SMS_REQUEST_CONVERSATIONS,
};
pub use projection::{ProjectionChange, ViewProjection};
pub use store::{AddOutcome, ConversationStore, Thread};
pub use transport::{PacketTransport, SmsTransport};
