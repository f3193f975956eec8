//! Error handling for SMS conversation sync
//!
//! This module provides the error type shared by the store, the sync
//! coordinator, the packet plugin and the view projection. Errors convert
//! automatically from underlying library errors using `thiserror`.
//!
//! ## Error Handling Patterns
//!
//! ### Error Propagation
//!
//! Use `?` operator for automatic error propagation:
//!
//! ```rust
//! use cosmic_connect_sms::Result;
//!
//! fn parse_body(data: &[u8]) -> Result<serde_json::Value> {
//!     let value: serde_json::Value = serde_json::from_slice(data)?;
//!     Ok(value)
//! }
//! ```
//!
//! ### Error Matching
//!
//! ```rust
//! use cosmic_connect_sms::SmsError;
//!
//! fn describe(error: &SmsError) -> &'static str {
//!     match error {
//!         SmsError::EmptyThread(_) => "no destination for reply",
//!         SmsError::ChannelClosed(_) => "device went away",
//!         _ => "other failure",
//!     }
//! }
//! ```
//!
//! ## Error Categories
//!
//! ### Not errors
//! Duplicate ingestion, paging past the end of a thread and queries against
//! unknown threads are normal outcomes and are reported through return
//! values (`AddOutcome::Duplicate`, empty sequences), never through
//! `SmsError`.
//!
//! ### Reply errors
//! - `EmptyThread`: a reply was requested for a thread with no stored messages
//! - `NotFound`: no address could be resolved for a thread
//!
//! ### Transport errors
//! - `Transport`: the collaborator failed to take the request
//! - `ChannelClosed`: the packet channel to the device went away
//!
//! Unanswered requests are not errors either; they surface as a
//! `RequestTimedOut` event.

use thiserror::Error;

/// Result type for SMS sync operations
pub type Result<T> = std::result::Result<T, SmsError>;

/// Errors that can occur during SMS sync operations
///
/// # Examples
///
/// ```rust
/// use cosmic_connect_sms::SmsError;
///
/// let error = SmsError::EmptyThread("42".to_string());
/// assert_eq!(error.to_string(), "Conversation has no messages: 42");
///
/// let error = SmsError::InvalidPacket("missing body".to_string());
/// assert_eq!(error.to_string(), "Invalid packet: missing body");
/// ```
#[derive(Error, Debug)]
pub enum SmsError {
    /// I/O error (snapshot files, config files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    ///
    /// Invalid values or an unparseable configuration file.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid or malformed packet
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Transport layer error
    ///
    /// The transport collaborator could not accept a request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reply requested for a conversation without any stored messages
    ///
    /// No destination address can be inferred, so the send is aborted.
    #[error("Conversation has no messages: {0}")]
    EmptyThread(String),

    /// Lookup against an unknown or empty conversation
    #[error("Conversation not found: {0}")]
    NotFound(String),

    /// Invalid state
    ///
    /// An operation was attempted in a state that does not allow it, such
    /// as replying from an unbound projection.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Packet or event channel closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl SmsError {
    /// Check if this error is recoverable (transient error that can be retried)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cosmic_connect_sms::SmsError;
    ///
    /// assert!(SmsError::Transport("link down".to_string()).is_recoverable());
    /// assert!(!SmsError::EmptyThread("7".to_string()).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SmsError::Transport(_) | SmsError::ChannelClosed(_) | SmsError::Io(_)
        )
    }

    /// Check if this error requires user action
    ///
    /// Returns `true` if the error cannot be resolved by retrying.
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            SmsError::EmptyThread(_) | SmsError::NotFound(_) | SmsError::Configuration(_)
        )
    }

    /// Get a user-friendly error message suitable for display in UI
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cosmic_connect_sms::SmsError;
    ///
    /// let error = SmsError::EmptyThread("12".to_string());
    /// assert_eq!(
    ///     error.user_message(),
    ///     "Cannot reply: conversation 12 has no messages to reply to."
    /// );
    /// ```
    pub fn user_message(&self) -> String {
        match self {
            SmsError::EmptyThread(id) => {
                format!("Cannot reply: conversation {} has no messages to reply to.", id)
            }
            SmsError::NotFound(id) => {
                format!("Conversation '{}' not found. Try refreshing conversations.", id)
            }
            SmsError::Transport(msg) => {
                format!("Transport error: {}. Check the device connection.", msg)
            }
            SmsError::ChannelClosed(msg) => {
                format!("Connection to device closed: {}.", msg)
            }
            SmsError::Configuration(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
            SmsError::InvalidPacket(msg) => {
                format!("Invalid data received: {}.", msg)
            }
            SmsError::InvalidState(msg) => {
                format!("Invalid state: {}.", msg)
            }
            SmsError::Io(e) => {
                format!("I/O error: {}.", e)
            }
            SmsError::Json(e) => {
                format!("Data format error: {}.", e)
            }
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        SmsError::InvalidState(msg.into())
    }
}
