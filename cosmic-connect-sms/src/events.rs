//! Conversation Event System
//!
//! Publish/subscribe channel between the sync path and its consumers.
//! Subscribers either listen to every conversation (a conversation list) or
//! to one thread (an open conversation view). Thread subscriptions can be
//! moved to another thread with [`EventBus::rebind`], which takes the same
//! lock as [`EventBus::publish`], so no event is routed while a
//! subscription is half-moved.
//!
//! Channels are unbounded; publishing never waits on a slow consumer.
//! Subscriptions whose receiver was dropped are pruned on the next publish.

use crate::{Message, ThreadId};
use std::collections::HashMap;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::debug;

/// Events emitted by the sync coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// First message of a new conversation was stored
    ConversationCreated(Message),

    /// A new message was stored in an existing conversation
    ConversationUpdated(Message),

    /// A cached message replayed for a ranged request
    ///
    /// `position` is the newest-first row index the consumer should insert at.
    MessageReceived {
        /// The cached message
        message: Message,
        /// Row position, 0 = newest
        position: usize,
    },

    /// An outstanding conversation request was never answered
    RequestTimedOut {
        /// Thread the request was issued for
        thread_id: ThreadId,
    },
}

impl ConversationEvent {
    /// Thread this event concerns
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            ConversationEvent::ConversationCreated(message)
            | ConversationEvent::ConversationUpdated(message)
            | ConversationEvent::MessageReceived { message, .. } => &message.thread_id,
            ConversationEvent::RequestTimedOut { thread_id } => thread_id,
        }
    }

    /// Message carried by this event, if any
    pub fn message(&self) -> Option<&Message> {
        match self {
            ConversationEvent::ConversationCreated(message)
            | ConversationEvent::ConversationUpdated(message)
            | ConversationEvent::MessageReceived { message, .. } => Some(message),
            ConversationEvent::RequestTimedOut { .. } => None,
        }
    }

    /// Whether subscribers to every conversation receive this event
    ///
    /// Replayed cache rows only matter to the view that asked for them.
    fn is_broadcast(&self) -> bool {
        !matches!(self, ConversationEvent::MessageReceived { .. })
    }
}

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    thread_id: Option<ThreadId>,
    receiver: UnboundedReceiver<ConversationEvent>,
}

impl Subscription {
    /// Thread this subscription is registered for, `None` for all threads
    pub fn thread_id(&self) -> Option<&ThreadId> {
        self.thread_id.as_ref()
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<ConversationEvent> {
        self.receiver.recv().await
    }

    /// Take an already-queued event without waiting
    pub fn try_recv(&mut self) -> Option<ConversationEvent> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    all: HashMap<u64, UnboundedSender<ConversationEvent>>,
    by_thread: HashMap<ThreadId, HashMap<u64, UnboundedSender<ConversationEvent>>>,
    /// Thread subscription id -> sender, so rebind can move it
    thread_senders: HashMap<u64, (ThreadId, UnboundedSender<ConversationEvent>)>,
}

impl Registry {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn detach_thread(&mut self, id: u64) -> Option<UnboundedSender<ConversationEvent>> {
        let (thread_id, sender) = self.thread_senders.remove(&id)?;
        if let Some(subscribers) = self.by_thread.get_mut(&thread_id) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                self.by_thread.remove(&thread_id);
            }
        }
        Some(sender)
    }

    fn attach_thread(&mut self, id: u64, thread_id: ThreadId, sender: UnboundedSender<ConversationEvent>) {
        self.by_thread
            .entry(thread_id.clone())
            .or_default()
            .insert(id, sender.clone());
        self.thread_senders.insert(id, (thread_id, sender));
    }
}

/// Publish/subscribe hub keyed by thread id
#[derive(Debug, Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to created/updated/timed-out events of every conversation
    pub async fn subscribe_all(&self) -> Subscription {
        let (sender, receiver) = unbounded_channel();
        let mut registry = self.registry.lock().await;
        let id = registry.allocate();
        registry.all.insert(id, sender);

        Subscription {
            id,
            thread_id: None,
            receiver,
        }
    }

    /// Subscribe to every event of one conversation
    pub async fn subscribe_thread(&self, thread_id: ThreadId) -> Subscription {
        let (sender, receiver) = unbounded_channel();
        let mut registry = self.registry.lock().await;
        let id = registry.allocate();
        registry.attach_thread(id, thread_id.clone(), sender);

        Subscription {
            id,
            thread_id: Some(thread_id),
            receiver,
        }
    }

    /// Move a thread subscription to another thread
    ///
    /// Unregistering the old thread and registering the new one happen under
    /// one registry lock. Events already queued for the old thread stay in
    /// the receiver; consumers must still check the thread id of what they
    /// receive.
    pub async fn rebind(&self, subscription: &mut Subscription, thread_id: ThreadId) {
        let mut registry = self.registry.lock().await;

        let sender = match registry.detach_thread(subscription.id) {
            Some(sender) => sender,
            None => {
                // Subscription was to all threads or already pruned; give it a new channel
                registry.all.remove(&subscription.id);
                let (sender, receiver) = unbounded_channel();
                subscription.receiver = receiver;
                sender
            }
        };

        registry.attach_thread(subscription.id, thread_id.clone(), sender);
        subscription.thread_id = Some(thread_id);
    }

    /// Remove a subscription
    pub async fn unsubscribe(&self, subscription: &Subscription) {
        let mut registry = self.registry.lock().await;
        registry.all.remove(&subscription.id);
        registry.detach_thread(subscription.id);
    }

    /// Deliver an event to its subscribers
    ///
    /// Returns the number of subscribers the event reached.
    pub async fn publish(&self, event: ConversationEvent) -> usize {
        let mut registry = self.registry.lock().await;
        let mut delivered = 0;
        let mut closed = Vec::new();

        if event.is_broadcast() {
            for (id, sender) in &registry.all {
                if sender.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(*id);
                }
            }
        }

        if let Some(subscribers) = registry.by_thread.get(event.thread_id()) {
            for (id, sender) in subscribers {
                if sender.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(*id);
                }
            }
        }

        for id in closed {
            debug!("Pruning closed conversation subscription {}", id);
            registry.all.remove(&id);
            registry.detach_thread(id);
        }

        delivered
    }

    /// Number of live registrations for a thread
    pub async fn thread_subscriber_count(&self, thread_id: &ThreadId) -> usize {
        let registry = self.registry.lock().await;
        registry.by_thread.get(thread_id).map_or(0, HashMap::len)
    }
}
