//! Stream registry: which sink receives which stream id.
//!
//! Owned by the poller and only touched under the poller's channel lock,
//! so registration, dispatch and removal are atomic with respect to each
//! other and to dedup bookkeeping.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use megaphone_core::{ChannelError, Chunk, MegaphoneError};

/// Caller-visible receiver of one subscription's chunks.
///
/// `Err` is the channel-wide error notification; dropping every clone of the
/// sender is the completion notification.
pub type ChunkSink = mpsc::UnboundedSender<Result<Chunk<Value>, ChannelError>>;

/// Completion predicate: called with the stream id and the chunk just
/// delivered. `true` keeps the stream registered, `false` removes it.
pub type ShouldContinue = Arc<dyn Fn(&str, &Chunk<Value>) -> bool + Send + Sync>;

/// Identifies the sink a group of stream ids was registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Outcome of routing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered; the stream stays registered.
    Delivered,
    /// Delivered; the predicate ended the stream and it was removed.
    Completed,
    /// The sink's receiver is gone; the stream was removed.
    Closed,
    /// No stream with this id is registered.
    Unrouted,
}

struct Registration {
    sink_id: SinkId,
    sink: ChunkSink,
    should_continue: ShouldContinue,
}

/// Stream id → (sink, completion predicate).
#[derive(Default)]
pub struct StreamRegistry {
    entries: HashMap<String, Registration>,
    next_sink: u64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every id in `stream_ids` against one sink.
    ///
    /// All or nothing: if any id is already registered, or appears twice in
    /// `stream_ids`, nothing is registered.
    pub fn register(
        &mut self,
        stream_ids: &[String],
        sink: ChunkSink,
        should_continue: ShouldContinue,
    ) -> Result<SinkId, MegaphoneError> {
        let mut fresh = HashSet::with_capacity(stream_ids.len());
        for id in stream_ids {
            if self.entries.contains_key(id) || !fresh.insert(id.as_str()) {
                return Err(MegaphoneError::DuplicateStream {
                    stream_id: id.clone(),
                });
            }
        }

        let sink_id = SinkId(self.next_sink);
        self.next_sink += 1;
        for id in stream_ids {
            self.entries.insert(
                id.clone(),
                Registration {
                    sink_id,
                    sink: sink.clone(),
                    should_continue: Arc::clone(&should_continue),
                },
            );
        }
        Ok(sink_id)
    }

    /// Route a chunk to its stream's sink, then let the predicate decide
    /// whether the stream stays registered.
    pub fn dispatch(&mut self, chunk: Chunk<Value>) -> Dispatch {
        let Some(entry) = self.entries.get(&chunk.stream_id) else {
            return Dispatch::Unrouted;
        };

        let stream_id = chunk.stream_id.clone();
        if entry.sink.send(Ok(chunk.clone())).is_err() {
            self.entries.remove(&stream_id);
            return Dispatch::Closed;
        }

        let should_continue = entry.should_continue.as_ref();
        let keep = match panic::catch_unwind(AssertUnwindSafe(|| should_continue(stream_id.as_str(), &chunk))) {
            Ok(keep) => keep,
            Err(_) => {
                tracing::warn!(stream_id = %stream_id, "completion predicate panicked, stream removed");
                false
            }
        };

        if keep {
            Dispatch::Delivered
        } else {
            self.entries.remove(&stream_id);
            Dispatch::Completed
        }
    }

    /// Remove the given ids. Unknown ids are ignored. Returns how many
    /// registrations were removed.
    pub fn remove(&mut self, stream_ids: &[String]) -> usize {
        stream_ids
            .iter()
            .filter(|id| self.entries.remove(id.as_str()).is_some())
            .count()
    }

    /// Remove the given ids only where they are still bound to `sink_id`.
    ///
    /// Used by cancellation so that an id re-registered by a newer
    /// subscription survives the older one being dropped.
    pub fn remove_owned(&mut self, stream_ids: &[String], sink_id: SinkId) -> usize {
        let mut removed = 0;
        for id in stream_ids {
            if self.entries.get(id).is_some_and(|e| e.sink_id == sink_id) {
                self.entries.remove(id);
                removed += 1;
            }
        }
        removed
    }

    /// Send `err` once to every distinct sink, then drop all registrations,
    /// which completes every sink. Returns the number of sinks notified.
    pub fn fail_all(&mut self, err: &ChannelError) -> usize {
        let mut notified = HashSet::new();
        for entry in self.entries.values() {
            if notified.insert(entry.sink_id) {
                let _ = entry.sink.send(Err(err.clone()));
            }
        }
        self.entries.clear();
        notified.len()
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.entries.contains_key(stream_id)
    }

    /// Number of registered stream ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered stream ids, in no particular order.
    pub fn stream_ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}
