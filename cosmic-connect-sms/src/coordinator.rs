//! Conversation Sync Coordinator
//!
//! Orchestrates requests to the phone and feeds what comes back into the
//! [`ConversationStore`]. All inbound messages, whether answers to a request
//! or unsolicited pushes, go through [`SyncCoordinator::ingest`].
//!
//! ## Outstanding Requests
//!
//! Every conversation request registers a pending entry for its thread. The
//! first message ingested for that thread (duplicates included) settles it.
//! If nothing arrives within `request_timeout_secs`, a warning is logged and
//! [`ConversationEvent::RequestTimedOut`] is published so a waiting view can
//! stop showing a spinner.
//!
//! ## Locking
//!
//! Ingestion publishes events while still holding the store write lock, so
//! subscribers see events in store order and readers never observe a thread
//! mid-insert.

use crate::{
    AddOutcome, ConversationEvent, ConversationStore, EventBus, Message, Result, SmsConfig,
    SmsError, SmsTransport, Subscription, ThreadId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pending conversation request
#[derive(Debug)]
struct PendingRequest {
    generation: u64,
    watchdog: Option<JoinHandle<()>>,
}

impl PendingRequest {
    fn stop(self) {
        if let Some(watchdog) = self.watchdog {
            watchdog.abort();
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<ThreadId, PendingRequest>>>;

/// Sync coordinator
///
/// Owns the conversation store and the event bus for one device.
pub struct SyncCoordinator {
    store: Arc<RwLock<ConversationStore>>,
    events: Arc<EventBus>,
    transport: Arc<dyn SmsTransport>,
    pending: PendingMap,
    next_generation: AtomicU64,
    config: SmsConfig,
}

impl SyncCoordinator {
    /// Create a coordinator with an empty store
    pub fn new(transport: Arc<dyn SmsTransport>, config: SmsConfig) -> Self {
        Self::with_store(transport, config, ConversationStore::new())
    }

    /// Create a coordinator, restoring conversations from `cache_path`
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or an existing snapshot cannot
    /// be read.
    pub fn with_config(transport: Arc<dyn SmsTransport>, config: SmsConfig) -> Result<Self> {
        config.validate()?;

        let store = match &config.cache_path {
            Some(path) if path.exists() => {
                let store = ConversationStore::load_snapshot(path)?;
                info!(
                    "Restored {} conversations ({} messages) from {}",
                    store.thread_count(),
                    store.total_messages(),
                    path.display()
                );
                store
            }
            _ => ConversationStore::new(),
        };

        Ok(Self::with_store(transport, config, store))
    }

    fn with_store(
        transport: Arc<dyn SmsTransport>,
        config: SmsConfig,
        store: ConversationStore,
    ) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            events: Arc::new(EventBus::new()),
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &SmsConfig {
        &self.config
    }

    /// Shared handle to the store for read-only queries
    pub fn store(&self) -> Arc<RwLock<ConversationStore>> {
        self.store.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn transport(&self) -> &Arc<dyn SmsTransport> {
        &self.transport
    }

    /// Ask the phone to (re)send a conversation
    ///
    /// Always issues the request, even when the thread is cached. Messages
    /// arrive later through [`ingest`](Self::ingest).
    pub async fn request_thread(&self, thread_id: &ThreadId) -> Result<()> {
        let generation = self.track_request(thread_id).await;

        if let Err(e) = self.transport.request_conversation(thread_id).await {
            warn!("Failed to request conversation {}: {}", thread_id, e);
            self.forget_request(thread_id, generation).await;
            return Err(e);
        }

        debug!("Requested conversation {}", thread_id);
        Ok(())
    }

    /// Request a conversation and replay cached rows `start..end`
    ///
    /// Cached messages are published newest-first to the thread's
    /// subscribers as [`ConversationEvent::MessageReceived`] with their row
    /// position, then the fetch is issued.
    pub async fn request_thread_range(
        &self,
        thread_id: &ThreadId,
        start: usize,
        end: usize,
    ) -> Result<()> {
        {
            let store = self.store.read().await;

            if !store.contains_thread(thread_id) {
                warn!(
                    "Got a conversation request for thread {} which has no cached messages",
                    thread_id
                );
            }

            let messages = store.messages_in_range(thread_id, start, end);
            debug!(
                "Replaying {} cached messages of thread {} from row {}",
                messages.len(),
                thread_id,
                start
            );

            for (offset, message) in messages.into_iter().enumerate() {
                self.events
                    .publish(ConversationEvent::MessageReceived {
                        message,
                        position: start + offset,
                    })
                    .await;
            }
        }

        self.request_thread(thread_id).await
    }

    /// Ask the phone for every conversation
    pub async fn request_all_threads(&self) -> Result<()> {
        info!("Requesting all conversations");
        self.transport.request_all_conversations().await
    }

    /// Reply to a conversation
    ///
    /// The destination is the thread's counterpart address. Delivery
    /// confirmation, if any, arrives later as an ordinary message.
    ///
    /// # Errors
    ///
    /// `SmsError::EmptyThread` if the thread has no stored messages; the
    /// transport is not called.
    pub async fn send_reply(&self, thread_id: &ThreadId, body: &str) -> Result<()> {
        let address = match self.store.read().await.address_for(thread_id) {
            Ok(address) => address,
            Err(_) => {
                warn!(
                    "Cannot reply to conversation {}: no messages to take an address from",
                    thread_id
                );
                return Err(SmsError::EmptyThread(thread_id.to_string()));
            }
        };

        debug!("Replying to conversation {} via {}", thread_id, address);
        self.transport.send_message(&address, body).await
    }

    /// Store an inbound message and notify subscribers
    pub async fn ingest(&self, message: Message) -> AddOutcome {
        let thread_id = message.thread_id.clone();

        let outcome = {
            let mut store = self.store.write().await;
            let outcome = store.add_message(message.clone());

            match outcome {
                AddOutcome::Created => {
                    self.events
                        .publish(ConversationEvent::ConversationCreated(message))
                        .await;
                }
                AddOutcome::Updated => {
                    self.events
                        .publish(ConversationEvent::ConversationUpdated(message))
                        .await;
                }
                AddOutcome::Duplicate => {}
            }

            outcome
        };

        if let Some(request) = self.pending.lock().await.remove(&thread_id) {
            debug!("Conversation request for {} answered", thread_id);
            request.stop();
        }

        outcome
    }

    /// Latest message of every conversation, newest first
    pub async fn active_conversations(&self) -> Vec<Message> {
        let mut conversations = self.store.read().await.latest_per_thread();
        conversations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        conversations
    }

    /// Rows `start..end` of a thread, newest first
    pub async fn messages_in_range(
        &self,
        thread_id: &ThreadId,
        start: usize,
        end: usize,
    ) -> Vec<Message> {
        self.store
            .read()
            .await
            .messages_in_range(thread_id, start, end)
    }

    pub async fn address_for(&self, thread_id: &ThreadId) -> Result<String> {
        self.store.read().await.address_for(thread_id)
    }

    pub async fn subscribe_all(&self) -> Subscription {
        self.events.subscribe_all().await
    }

    pub async fn subscribe_thread(&self, thread_id: ThreadId) -> Subscription {
        self.events.subscribe_thread(thread_id).await
    }

    /// Stop waiting for a conversation request
    ///
    /// No event is published. Returns whether a request was pending.
    pub async fn cancel_request(&self, thread_id: &ThreadId) -> bool {
        match self.pending.lock().await.remove(thread_id) {
            Some(request) => {
                debug!("Cancelled conversation request for {}", thread_id);
                request.stop();
                true
            }
            None => false,
        }
    }

    /// Stop waiting for every outstanding request
    pub async fn cancel_all_requests(&self) {
        let mut pending = self.pending.lock().await;
        for (_, request) in pending.drain() {
            request.stop();
        }
    }

    /// Threads with an unanswered conversation request
    pub async fn pending_requests(&self) -> Vec<ThreadId> {
        let mut threads: Vec<ThreadId> = self.pending.lock().await.keys().cloned().collect();
        threads.sort();
        threads
    }

    /// Write the store to `cache_path`
    ///
    /// Does nothing when no cache path is configured.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.config.cache_path else {
            debug!("No cache path configured, not persisting conversations");
            return Ok(());
        };

        let store = self.store.read().await;
        store.save_snapshot(path)?;
        debug!(
            "Persisted {} conversations to {}",
            store.thread_count(),
            path.display()
        );
        Ok(())
    }

    /// Register a pending request, replacing any earlier one for the thread
    ///
    /// The watchdog is spawned while the pending map is locked, so it cannot
    /// look for its entry before the entry exists.
    async fn track_request(&self, thread_id: &ThreadId) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().await;

        let watchdog = self
            .config
            .request_timeout()
            .map(|timeout| self.spawn_watchdog(thread_id.clone(), generation, timeout));
        let previous = pending.insert(
            thread_id.clone(),
            PendingRequest {
                generation,
                watchdog,
            },
        );
        if let Some(previous) = previous {
            previous.stop();
        }

        generation
    }

    async fn forget_request(&self, thread_id: &ThreadId, generation: u64) {
        let mut pending = self.pending.lock().await;
        if pending.get(thread_id).map(|r| r.generation) == Some(generation) {
            if let Some(request) = pending.remove(thread_id) {
                request.stop();
            }
        }
    }

    fn spawn_watchdog(
        &self,
        thread_id: ThreadId,
        generation: u64,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let pending = self.pending.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            {
                let mut pending = pending.lock().await;
                if pending.get(&thread_id).map(|r| r.generation) != Some(generation) {
                    return;
                }
                pending.remove(&thread_id);
            }

            warn!(
                "Conversation request for {} not answered after {}s",
                thread_id,
                timeout.as_secs()
            );
            events
                .publish(ConversationEvent::RequestTimedOut { thread_id })
                .await;
        })
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.try_lock() {
            for (_, request) in pending.drain() {
                request.stop();
            }
        }
    }
}
