//! In-process registry with optimistic concurrency and replayable watches.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{EventType, ListOptions, Registry, WatchEvent, WatchOptions, WatchStream};
use crate::error::{EngineError, EngineResult};
use crate::models::Object;

/// Events retained for watches that start in the past.
const DEFAULT_HISTORY: usize = 1024;

/// Capacity of the live event channel.
const CHANNEL_CAPACITY: usize = 256;

struct State<T> {
    items: HashMap<String, T>,
    version: u64,
    history: VecDeque<WatchEvent<T>>,
    /// Highest version evicted from `history`.
    compacted: u64,
}

/// In-memory [`Registry`] for one record kind.
pub struct MemoryRegistry<T: Object> {
    state: RwLock<State<T>>,
    events: broadcast::Sender<WatchEvent<T>>,
    history_limit: usize,
}

impl<T: Object> MemoryRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    /// Registry that keeps at most `history_limit` past events for replay.
    #[must_use]
    pub fn with_history(history_limit: usize) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(State {
                items: HashMap::new(),
                version: 0,
                history: VecDeque::new(),
                compacted: 0,
            }),
            events,
            history_limit: history_limit.max(1),
        }
    }

    /// Current registry version.
    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Start background sweep deleting records past their expiry.
    pub fn start_expiry_task(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                self.sweep_expired().await;
            }
        })
    }

    /// Delete every expired record, emitting `Deleted` events. Returns the count.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let expired: Vec<String> = state
            .items
            .values()
            .filter(|item| item.expires_at().is_some_and(|at| at <= now))
            .map(|item| item.name().to_owned())
            .collect();

        for name in &expired {
            if let Some(item) = state.items.remove(name) {
                self.record(&mut state, EventType::Deleted, item);
            }
        }

        if !expired.is_empty() {
            tracing::debug!(kind = T::KIND, count = expired.len(), "Swept expired records");
        }
        expired.len()
    }

    /// Apply an event produced by another registry, keeping its version.
    ///
    /// Events at or below the current version are ignored, so replaying an
    /// upstream watch is idempotent.
    pub async fn apply(&self, event: WatchEvent<T>) -> EngineResult<()> {
        let Some(object) = event.object else {
            return Err(EngineError::invalid_input("object", "replicated event carries no object"));
        };

        let mut state = self.state.write().await;
        if event.version <= state.version {
            return Ok(());
        }

        let name = object.name().to_owned();
        let stored = self.stamp(&mut state, event.event_type, object, event.version);
        if event.event_type == EventType::Deleted {
            state.items.remove(&name);
        } else {
            state.items.insert(name, stored);
        }
        Ok(())
    }

    /// Keep this registry in sync with `upstream` until the watch ends.
    pub fn follow(self: Arc<Self>, upstream: Arc<dyn Registry<T>>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let since = self.version().await;
            let mut events = match upstream.watch(WatchOptions { name: None, since_version: since }).await {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(kind = T::KIND, error = %err, "Replica could not watch upstream");
                    return;
                }
            };

            while let Some(event) = events.next().await {
                let result = match event {
                    Ok(event) => self.apply(event).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = result {
                    tracing::warn!(kind = T::KIND, error = %err, "Replica stopped following upstream");
                    return;
                }
            }
        })
    }

    /// Bump the version, stamp `object`, append to history and publish.
    fn record(&self, state: &mut State<T>, event_type: EventType, object: T) -> T {
        let version = state.version + 1;
        self.stamp(state, event_type, object, version)
    }

    /// Must be called with the write lock held so watchers see a gapless order.
    fn stamp(&self, state: &mut State<T>, event_type: EventType, mut object: T, version: u64) -> T {
        state.version = version;
        object.meta_mut().resource_version = version;

        let event = WatchEvent { event_type, object: Some(object.clone()), version };
        state.history.push_back(event.clone());
        while state.history.len() > self.history_limit {
            if let Some(evicted) = state.history.pop_front() {
                state.compacted = evicted.version;
            }
        }

        // No receivers is fine.
        let _ = self.events.send(event);
        object
    }
}

impl<T: Object> Default for MemoryRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Object> std::fmt::Debug for MemoryRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistry").field("kind", &T::KIND).finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<T: Object> Registry<T> for MemoryRegistry<T> {
    async fn get(&self, name: &str) -> EngineResult<T> {
        self.state
            .read()
            .await
            .items
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::not_found(T::KIND, name))
    }

    async fn list(&self, options: &ListOptions) -> EngineResult<Vec<T>> {
        let state = self.state.read().await;
        let mut items: Vec<T> =
            state.items.values().filter(|item| options.matches(*item)).cloned().collect();
        items.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(items)
    }

    async fn create(&self, object: T) -> EngineResult<T> {
        let name = object.name().to_owned();
        if name.is_empty() {
            return Err(EngineError::invalid_input("name", "cannot be empty"));
        }

        let mut state = self.state.write().await;
        if state.items.contains_key(&name) {
            return Err(EngineError::already_exists(T::KIND, name));
        }

        let stored = self.record(&mut state, EventType::Added, object);
        state.items.insert(name, stored.clone());
        Ok(stored)
    }

    async fn update(&self, object: T) -> EngineResult<T> {
        let name = object.name().to_owned();
        let mut state = self.state.write().await;

        let current = state
            .items
            .get(&name)
            .map(Object::resource_version)
            .ok_or_else(|| EngineError::not_found(T::KIND, &name))?;
        if current != object.resource_version() {
            return Err(EngineError::conflict(
                T::KIND,
                name,
                format!(
                    "resource version {} does not match stored {current}",
                    object.resource_version()
                ),
            ));
        }

        let stored = self.record(&mut state, EventType::Modified, object);
        state.items.insert(name, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, name: &str) -> EngineResult<T> {
        let mut state = self.state.write().await;
        let removed = state.items.remove(name).ok_or_else(|| EngineError::not_found(T::KIND, name))?;
        Ok(self.record(&mut state, EventType::Deleted, removed))
    }

    async fn watch(&self, options: WatchOptions) -> EngineResult<WatchStream<T>> {
        let WatchOptions { name, since_version } = options;

        // Subscribe and snapshot history under one lock: nothing is missed or doubled.
        let (replay, receiver) = {
            let state = self.state.read().await;
            if since_version < state.compacted {
                return Err(EngineError::storage(format!(
                    "{} watch from version {since_version} is too old (compacted through {})",
                    T::KIND,
                    state.compacted
                )));
            }
            let replay: Vec<WatchEvent<T>> = state
                .history
                .iter()
                .filter(|event| event.version > since_version && names_match(name.as_deref(), event))
                .cloned()
                .collect();
            (replay, self.events.subscribe())
        };

        let stream = async_stream::stream! {
            let mut last = since_version;
            for event in replay {
                last = event.version;
                yield Ok(event);
            }

            let mut live = BroadcastStream::new(receiver);
            while let Some(item) = live.next().await {
                match item {
                    Ok(event) => {
                        if event.version <= last || !names_match(name.as_deref(), &event) {
                            continue;
                        }
                        last = event.version;
                        yield Ok(event);
                    }
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        yield Err(EngineError::storage(format!(
                            "{} watch fell behind by {missed} events",
                            T::KIND
                        )));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn names_match<T: Object>(name: Option<&str>, event: &WatchEvent<T>) -> bool {
    match (name, &event.object) {
        (None, _) => true,
        (Some(wanted), Some(object)) => object.name() == wanted,
        (Some(_), None) => false,
    }
}
