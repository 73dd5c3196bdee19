//! Quorum replication observer.
//!
//! After a token is written, the response is held until the record is
//! visible on enough independent replicas. Each replica is watched
//! concurrently from `version - 1`; the first event for the record decides
//! whether that replica observed the write.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::StreamExt;
use futures::future::join_all;

use crate::error::{EngineError, EngineResult};
use crate::models::Object;
use crate::registry::{EventType, Registry, WatchOptions};

/// A replica the observer watches.
pub struct ReplicaBackend<T: Object> {
    pub name: String,
    pub registry: Arc<dyn Registry<T>>,
}

impl<T: Object> ReplicaBackend<T> {
    #[must_use]
    pub fn new(name: impl Into<String>, registry: Arc<dyn Registry<T>>) -> Self {
        Self { name: name.into(), registry }
    }
}

impl<T: Object> Clone for ReplicaBackend<T> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), registry: Arc::clone(&self.registry) }
    }
}

impl<T: Object> fmt::Debug for ReplicaBackend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaBackend").field("name", &self.name).finish_non_exhaustive()
    }
}

/// How observation ended on one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOutcome {
    Observed,
    Failed(String),
    TimedOut,
    Cancelled,
}

impl fmt::Display for BackendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observed => f.write_str("observed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Waits for a write to reach `success_threshold` of its backends.
pub struct QuorumObserver<T: Object> {
    backends: Vec<ReplicaBackend<T>>,
    required: usize,
    timeout: Duration,
}

impl<T: Object> QuorumObserver<T> {
    /// `success_threshold == 0` requires every backend. A threshold above the
    /// backend count is clamped to it.
    #[must_use]
    pub fn new(backends: Vec<ReplicaBackend<T>>, success_threshold: usize, timeout: Duration) -> Self {
        let required = match success_threshold {
            0 => backends.len(),
            n if n > backends.len() => {
                tracing::warn!(
                    kind = T::KIND,
                    threshold = n,
                    backends = backends.len(),
                    "Replica success threshold exceeds backend count, clamping"
                );
                backends.len()
            }
            n => n,
        };
        Self { backends, required, timeout }
    }

    /// Observer with no backends; every observation succeeds immediately.
    #[must_use]
    pub fn disabled() -> Self {
        Self { backends: Vec::new(), required: 0, timeout: Duration::ZERO }
    }

    #[must_use]
    pub fn required(&self) -> usize {
        self.required
    }

    #[must_use]
    pub fn backends(&self) -> &[ReplicaBackend<T>] {
        &self.backends
    }

    /// Wait until `name` at `version` is visible on enough backends.
    pub async fn observe(&self, name: &str, version: u64) -> EngineResult<()> {
        self.observe_until(name, version, futures::future::pending::<()>()).await
    }

    /// Like [`Self::observe`], but every pending backend watch is abandoned
    /// with [`BackendOutcome::Cancelled`] once `cancel` resolves.
    pub async fn observe_until<C>(&self, name: &str, version: u64, cancel: C) -> EngineResult<()>
    where
        C: Future<Output = ()> + Send,
    {
        if self.backends.is_empty() {
            return Ok(());
        }

        let cancel = cancel.boxed().shared();
        let watches = self.backends.iter().map(|backend| {
            let cancel = cancel.clone();
            async move {
                let outcome = tokio::select! {
                    result = tokio::time::timeout(
                        self.timeout,
                        observe_backend(backend.registry.as_ref(), name, version),
                    ) => result.unwrap_or(BackendOutcome::TimedOut),
                    () = cancel => BackendOutcome::Cancelled,
                };
                (backend.name.as_str(), outcome)
            }
        });
        let outcomes = join_all(watches).await;

        let observed = outcomes.iter().filter(|(_, o)| *o == BackendOutcome::Observed).count();
        if observed >= self.required {
            tracing::debug!(kind = T::KIND, name, version, observed, "Write observed by quorum");
            return Ok(());
        }

        let failures: Vec<String> = outcomes
            .iter()
            .filter(|(_, o)| *o != BackendOutcome::Observed)
            .map(|(backend, outcome)| format!("{backend}: {outcome}"))
            .collect();
        tracing::warn!(
            kind = T::KIND,
            name,
            version,
            observed,
            required = self.required,
            failures = ?failures,
            "Write not observed by quorum"
        );
        Err(EngineError::ReplicationTimeout { observed, required: self.required, failures })
    }
}

impl<T: Object> fmt::Debug for QuorumObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuorumObserver")
            .field("backends", &self.backends)
            .field("required", &self.required)
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn observe_backend<T: Object>(registry: &dyn Registry<T>, name: &str, version: u64) -> BackendOutcome {
    let options = WatchOptions::for_name(name, version.saturating_sub(1));
    let mut events = match registry.watch(options).await {
        Ok(events) => events,
        Err(err) => return BackendOutcome::Failed(err.to_string()),
    };

    let event = match events.next().await {
        Some(Ok(event)) => event,
        Some(Err(err)) => return BackendOutcome::Failed(err.to_string()),
        None => return BackendOutcome::Failed("watch closed before any event".into()),
    };

    match (event.event_type, event.object) {
        (_, None) => BackendOutcome::Failed("event carried no object".into()),
        (EventType::Deleted, Some(_)) => BackendOutcome::Failed("record was deleted".into()),
        (_, Some(object)) if object.resource_version() == version => BackendOutcome::Observed,
        (_, Some(object)) => BackendOutcome::Failed(format!(
            "first event at version {} instead of {version}",
            object.resource_version()
        )),
    }
}
