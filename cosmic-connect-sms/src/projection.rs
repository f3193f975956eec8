//! Conversation View Projection
//!
//! Position-addressable, newest-first rows of one conversation for a
//! display surface. Row 0 is always the newest message.
//!
//! A projection is either unbound or bound to one thread. Binding to another
//! thread clears the rows, moves the event subscription and seeds the first
//! page. Events for any thread other than the bound one are discarded, which
//! covers answers to requests made before the last rebind.

use crate::{ConversationEvent, Message, Result, SmsError, Subscription, SyncCoordinator, ThreadId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Row change applied to a projection
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionChange {
    /// A message was inserted at `position`
    Inserted { position: usize, message: Message },

    /// The seeding request for the bound thread was never answered
    RequestTimedOut { thread_id: ThreadId },
}

/// View projection over one conversation
pub struct ViewProjection {
    coordinator: Arc<SyncCoordinator>,
    bound: Option<ThreadId>,
    subscription: Option<Subscription>,
    rows: Vec<Message>,
    row_ids: HashSet<i64>,
}

impl ViewProjection {
    /// Create an unbound projection
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            coordinator,
            bound: None,
            subscription: None,
            rows: Vec::new(),
            row_ids: HashSet::new(),
        }
    }

    /// Bind to a thread and seed its first page
    ///
    /// Binding to the current thread is a no-op. The subscription is moved
    /// before the seeding request so replayed rows are not missed.
    pub async fn bind(&mut self, thread_id: ThreadId) -> Result<()> {
        if self.bound.as_ref() == Some(&thread_id) {
            return Ok(());
        }

        debug!("Binding conversation view to thread {}", thread_id);
        self.clear_rows();

        match self.subscription.as_mut() {
            Some(subscription) => {
                self.coordinator
                    .events()
                    .rebind(subscription, thread_id.clone())
                    .await
            }
            None => {
                self.subscription = Some(self.coordinator.subscribe_thread(thread_id.clone()).await)
            }
        }
        self.bound = Some(thread_id.clone());

        let page_size = self.coordinator.config().page_size;
        self.coordinator
            .request_thread_range(&thread_id, 0, page_size)
            .await
    }

    /// Drop the binding, rows and subscription
    pub async fn unbind(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.coordinator.events().unsubscribe(&subscription).await;
        }
        if let Some(thread_id) = self.bound.take() {
            debug!("Unbound conversation view from thread {}", thread_id);
        }
        self.clear_rows();
    }

    /// Request the page of messages older than the current rows
    ///
    /// The page starts after the newest run of store messages the view
    /// already holds, so older rows that arrived live do not hide a gap.
    ///
    /// # Errors
    ///
    /// `SmsError::InvalidState` when unbound.
    pub async fn load_older(&self) -> Result<()> {
        let thread_id = self.bound_or_err()?;
        let start = self.loaded_prefix(thread_id).await;
        let end = start + self.coordinator.config().page_size;

        self.coordinator
            .request_thread_range(thread_id, start, end)
            .await
    }

    /// Reply to the bound conversation
    ///
    /// # Errors
    ///
    /// `SmsError::InvalidState` when unbound, otherwise whatever
    /// [`SyncCoordinator::send_reply`] returns.
    pub async fn send_reply(&self, body: &str) -> Result<()> {
        let thread_id = self.bound_or_err()?;
        self.coordinator.send_reply(thread_id, body).await
    }

    /// Apply one event, returning the resulting change if any
    pub fn apply_event(&mut self, event: ConversationEvent) -> Option<ProjectionChange> {
        let Some(bound) = &self.bound else {
            debug!("Discarding conversation event for unbound view");
            return None;
        };

        if event.thread_id() != bound {
            debug!(
                "Discarding event for thread {} in view bound to {}",
                event.thread_id(),
                bound
            );
            return None;
        }

        match event {
            ConversationEvent::ConversationCreated(message)
            | ConversationEvent::ConversationUpdated(message) => self.insert(message, false),
            ConversationEvent::MessageReceived { message, .. } => self.insert(message, true),
            ConversationEvent::RequestTimedOut { thread_id } => {
                Some(ProjectionChange::RequestTimedOut { thread_id })
            }
        }
    }

    /// Apply every event already queued for this view
    pub fn apply_pending(&mut self) -> Vec<ProjectionChange> {
        let mut changes = Vec::new();

        while let Some(event) = self.subscription.as_mut().and_then(Subscription::try_recv) {
            if let Some(change) = self.apply_event(event) {
                changes.push(change);
            }
        }

        changes
    }

    /// Wait for the next event that changes this view
    ///
    /// Returns `None` when unbound or once the coordinator is gone.
    pub async fn next_change(&mut self) -> Option<ProjectionChange> {
        loop {
            let event = self.subscription.as_mut()?.recv().await?;
            if let Some(change) = self.apply_event(event) {
                return Some(change);
            }
        }
    }

    pub fn bound_thread(&self) -> Option<&ThreadId> {
        self.bound.as_ref()
    }

    pub fn rows(&self) -> &[Message] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Message> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn bound_or_err(&self) -> Result<&ThreadId> {
        self.bound
            .as_ref()
            .ok_or_else(|| SmsError::invalid_state("No conversation bound to view"))
    }

    fn clear_rows(&mut self) {
        self.rows.clear();
        self.row_ids.clear();
    }

    /// Number of newest store messages held without a gap
    async fn loaded_prefix(&self, thread_id: &ThreadId) -> usize {
        let shared = self.coordinator.store();
        let store = shared.read().await;

        store.thread(thread_id).map_or(0, |thread| {
            thread
                .iter_newest_first()
                .take_while(|m| self.row_ids.contains(&m.unique_id))
                .count()
        })
    }

    /// Insert in newest-first store order
    ///
    /// Replayed rows arrive newest first, so a tie goes below the rows
    /// already present; a live message is the newest of its tie and goes
    /// above them.
    fn insert(&mut self, message: Message, replayed: bool) -> Option<ProjectionChange> {
        if !self.row_ids.insert(message.unique_id) {
            return None;
        }

        let position = if replayed {
            self.rows
                .partition_point(|r| r.timestamp >= message.timestamp)
        } else {
            self.rows
                .partition_point(|r| r.timestamp > message.timestamp)
        };
        self.rows.insert(position, message.clone());

        Some(ProjectionChange::Inserted { position, message })
    }
}

impl std::fmt::Debug for ViewProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewProjection")
            .field("bound", &self.bound)
            .field("rows", &self.rows.len())
            .finish()
    }
}
