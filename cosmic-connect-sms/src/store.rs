//! Conversation Store
//!
//! Owns every known conversation thread. Messages arrive out of order and
//! possibly more than once; the store deduplicates them by their
//! transport-assigned `unique_id` and keeps each thread ordered by
//! timestamp.
//!
//! ## Ordering
//!
//! Within a thread messages are keyed by `(timestamp, insertion sequence)`,
//! so equal timestamps keep their arrival order. No ordering is defined
//! across threads.
//!
//! ## Paging
//!
//! [`ConversationStore::messages_in_range`] indexes from the newest end:
//! offset 0 is the most recent message of the thread. A caller holding the
//! newest N messages asks for `N..N + page` to get the next older page.
//!
//! ## Persistence
//!
//! The store is in-memory. A JSON snapshot keyed by thread id can be written
//! with [`ConversationStore::to_snapshot_bytes`] and restored with
//! [`ConversationStore::from_snapshot_bytes`].

use crate::{Message, Result, SmsError, ThreadId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

/// Result of [`ConversationStore::add_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// First message of a previously unknown thread
    Created,
    /// New message for an existing thread
    Updated,
    /// `unique_id` already seen in this thread; nothing changed
    Duplicate,
}

impl AddOutcome {
    /// Whether the store changed
    pub fn is_change(&self) -> bool {
        !matches!(self, AddOutcome::Duplicate)
    }
}

/// One conversation and its messages
#[derive(Debug, Clone)]
pub struct Thread {
    id: ThreadId,
    messages: BTreeMap<(i64, u64), Message>,
    seen_ids: HashSet<i64>,
    next_seq: u64,
}

impl Thread {
    fn new(id: ThreadId) -> Self {
        Self {
            id,
            messages: BTreeMap::new(),
            seen_ids: HashSet::new(),
            next_seq: 0,
        }
    }

    pub fn id(&self) -> &ThreadId {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether a message with this `unique_id` has been stored
    pub fn contains(&self, unique_id: i64) -> bool {
        self.seen_ids.contains(&unique_id)
    }

    /// Chronologically last message
    pub fn latest(&self) -> Option<&Message> {
        self.messages.values().next_back()
    }

    /// Chronologically first message
    pub fn oldest(&self) -> Option<&Message> {
        self.messages.values().next()
    }

    /// Messages in ascending timestamp order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.messages.values()
    }

    /// Messages newest first
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &Message> {
        self.messages.values().rev()
    }

    /// Returns false if the `unique_id` was already present
    fn insert(&mut self, message: Message) -> bool {
        if !self.seen_ids.insert(message.unique_id) {
            return false;
        }
        let key = (message.timestamp, self.next_seq);
        self.next_seq += 1;
        self.messages.insert(key, message);
        true
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    threads: BTreeMap<String, Vec<Message>>,
}

/// In-memory store of all conversations
///
/// The store itself is not synchronized; `SyncCoordinator` confines
/// mutation behind a single lock.
#[derive(Debug, Default)]
pub struct ConversationStore {
    threads: HashMap<ThreadId, Thread>,
}

impl ConversationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message, deduplicating by `unique_id`
    ///
    /// An unknown `thread_id` creates the thread. A duplicate performs no
    /// mutation, which makes replays and retries idempotent.
    ///
    /// # Examples
    ///
    /// ```
    /// use cosmic_connect_sms::{AddOutcome, ConversationStore, Message};
    ///
    /// let mut store = ConversationStore::new();
    /// assert_eq!(store.add_message(Message::new("1", 5, 100)), AddOutcome::Created);
    /// assert_eq!(store.add_message(Message::new("1", 5, 100)), AddOutcome::Duplicate);
    /// assert_eq!(store.add_message(Message::new("1", 6, 200)), AddOutcome::Updated);
    /// ```
    pub fn add_message(&mut self, message: Message) -> AddOutcome {
        let unique_id = message.unique_id;

        match self.threads.get_mut(&message.thread_id) {
            Some(thread) => {
                if thread.insert(message) {
                    AddOutcome::Updated
                } else {
                    debug!(
                        "Ignoring duplicate message {} in thread {}",
                        unique_id,
                        thread.id()
                    );
                    AddOutcome::Duplicate
                }
            }
            None => {
                let id = message.thread_id.clone();
                let mut thread = Thread::new(id.clone());
                thread.insert(message);
                self.threads.insert(id, thread);
                AddOutcome::Created
            }
        }
    }

    /// Latest message of every known thread
    ///
    /// Order across threads follows store iteration order. An empty thread is
    /// a defect; it is logged and skipped.
    pub fn latest_per_thread(&self) -> Vec<Message> {
        let mut latest = Vec::with_capacity(self.threads.len());

        for (id, thread) in &self.threads {
            match thread.latest() {
                Some(message) => latest.push(message.clone()),
                None => warn!("Conversation with ID {} is unexpectedly empty", id),
            }
        }

        latest
    }

    /// Messages `start..end` counted from the newest message of the thread
    ///
    /// Returns an empty sequence for unknown threads, for `start` past the end
    /// of the thread and for `end <= start`.
    pub fn messages_in_range(&self, thread_id: &ThreadId, start: usize, end: usize) -> Vec<Message> {
        let Some(thread) = self.threads.get(thread_id) else {
            return Vec::new();
        };

        if start >= thread.len() || end <= start {
            return Vec::new();
        }

        thread
            .iter_newest_first()
            .skip(start)
            .take(end - start)
            .cloned()
            .collect()
    }

    /// Address of the conversation's assumed single counterpart
    ///
    /// Uses the oldest stored message. For group conversations this is only
    /// a heuristic: any participant may come back.
    ///
    /// # Errors
    ///
    /// `SmsError::NotFound` if the thread is unknown or empty.
    pub fn address_for(&self, thread_id: &ThreadId) -> Result<String> {
        self.threads
            .get(thread_id)
            .and_then(Thread::oldest)
            .map(|message| message.address.clone())
            .ok_or_else(|| SmsError::NotFound(thread_id.to_string()))
    }

    pub fn thread(&self, thread_id: &ThreadId) -> Option<&Thread> {
        self.threads.get(thread_id)
    }

    pub fn contains_thread(&self, thread_id: &ThreadId) -> bool {
        self.threads.contains_key(thread_id)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Number of messages stored for a thread (0 if unknown)
    pub fn message_count(&self, thread_id: &ThreadId) -> usize {
        self.threads.get(thread_id).map_or(0, Thread::len)
    }

    /// Number of messages across all threads
    pub fn total_messages(&self) -> usize {
        self.threads.values().map(Thread::len).sum()
    }

    /// Serialize all threads as a JSON snapshot
    pub fn to_snapshot_bytes(&self) -> Result<Vec<u8>> {
        let threads = self
            .threads
            .iter()
            .map(|(id, thread)| (id.to_string(), thread.iter().cloned().collect()))
            .collect();

        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            threads,
        };
        Ok(serde_json::to_vec_pretty(&snapshot)?)
    }

    /// Rebuild a store from a JSON snapshot
    ///
    /// Messages are re-ingested, so ordering and dedup state are rebuilt
    /// rather than trusted.
    pub fn from_snapshot_bytes(data: &[u8]) -> Result<Self> {
        let snapshot: StoreSnapshot = serde_json::from_slice(data)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SmsError::Configuration(format!(
                "Unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut store = Self::new();
        for (key, messages) in snapshot.threads {
            for message in messages {
                if message.thread_id.as_str() != key {
                    warn!(
                        "Snapshot message {} filed under thread {} belongs to {}",
                        message.unique_id, key, message.thread_id
                    );
                }
                store.add_message(message);
            }
        }

        Ok(store)
    }

    /// Write a snapshot to `path`, creating parent directories
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_snapshot_bytes()?)?;
        Ok(())
    }

    /// Load a snapshot from `path`
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_snapshot_bytes(&data)
    }
}
