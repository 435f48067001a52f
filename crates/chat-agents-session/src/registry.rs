//! Session registry: one live agent session per chat.

use std::{
    collections::HashMap,
    fmt,
    ops::Deref,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chat_agents_core::{
    AgentBackend, AgentSession, ContextId, HandleId, SessionConfig, SessionConstructionError,
    SessionOptions, config::DEFAULT_SESSION_TIMEOUT, options::DEFAULT_MODEL,
};
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};

/// Registry entry for one chat.
struct Entry<S> {
    session: Arc<S>,
    created_at: Instant,
    last_activity: Instant,
}

/// Empty until the first successful construction; emptied on teardown.
type Slot<S> = Arc<Mutex<Option<Entry<S>>>>;

/// Snapshot of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub handle: HandleId,
    pub created_at: Instant,
    pub last_activity: Instant,
}

/// Exclusive use of a chat's session for the duration of one query.
///
/// While a lease is alive no other caller can acquire, evict or close the
/// same chat's session.
pub struct SessionLease<S> {
    context_id: ContextId,
    session: Arc<S>,
    fresh: bool,
    slot: OwnedMutexGuard<Option<Entry<S>>>,
}

impl<S> SessionLease<S> {
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Whether the session was constructed by this acquire.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        self.fresh
    }
}

impl<S: AgentSession> SessionLease<S> {
    #[must_use]
    pub fn handle_id(&self) -> HandleId {
        self.session.id()
    }
}

impl<S: AgentSession> fmt::Debug for SessionLease<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("context_id", &self.context_id)
            .field("handle", &self.session.id())
            .field("fresh", &self.fresh)
            .finish_non_exhaustive()
    }
}

impl<S> Deref for SessionLease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

/// Owns every chat's backend session.
///
/// Each chat id maps to its own async-locked slot; the map lock itself is
/// only held to look a slot up, so different chats never wait on each other.
pub struct SessionRegistry<B: AgentBackend> {
    backend: B,
    session_timeout: Duration,
    model: String,
    slots: RwLock<HashMap<ContextId, Slot<B::Session>>>,
    live: AtomicUsize,
}

impl<B: AgentBackend> SessionRegistry<B> {
    /// Create a registry with the given idle timeout.
    #[must_use]
    pub fn new(backend: B, session_timeout: Duration) -> Self {
        Self {
            backend,
            session_timeout,
            model: DEFAULT_MODEL.to_string(),
            slots: RwLock::new(HashMap::new()),
            live: AtomicUsize::new(0),
        }
    }

    /// Registry with the default 30 minute timeout.
    #[must_use]
    pub fn with_default_timeout(backend: B) -> Self {
        Self::new(backend, DEFAULT_SESSION_TIMEOUT)
    }

    /// Use `model` for sessions created from now on.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Idle for at least the timeout.
    fn is_expired(&self, entry: &Entry<B::Session>, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_activity) >= self.session_timeout
    }

    fn slot(&self, context_id: ContextId) -> Slot<B::Session> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&context_id)
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(context_id).or_default())
    }

    /// Drop the chat's map entry if `slot` is empty and nobody else holds it.
    ///
    /// The caller must own one reference to `slot` and no guard on it.
    fn prune(&self, context_id: ContextId, slot: &Slot<B::Session>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let unused = slots
            .get(&context_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
            && Arc::strong_count(slot) == 2
            && slot.try_lock().is_ok_and(|guard| guard.is_none());
        if unused {
            slots.remove(&context_id);
        }
    }

    fn existing_slot(&self, context_id: ContextId) -> Option<Slot<B::Session>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&context_id)
            .map(Arc::clone)
    }

    /// Get the chat's session, creating or replacing it as needed.
    ///
    /// An existing session idle for at least the timeout is closed and a new
    /// one constructed. Last activity is set to now in every case.
    ///
    /// # Errors
    /// Returns error if a new backend session cannot be constructed; the chat
    /// is then left without a session and the next acquire tries again.
    pub async fn acquire(
        &self,
        context_id: ContextId,
        config: &SessionConfig,
    ) -> Result<SessionLease<B::Session>, SessionConstructionError> {
        let handle = self.slot(context_id);
        let mut slot = Arc::clone(&handle).lock_owned().await;
        let now = Instant::now();

        let expired = (*slot)
            .as_ref()
            .is_some_and(|entry| self.is_expired(entry, now));
        if expired {
            tracing::info!(context_id, "[SESSION] Session expired, creating new");
            if let Some(old) = slot.take() {
                self.live.fetch_sub(1, Ordering::SeqCst);
                close_quietly(context_id, old.session.as_ref()).await;
            }
        }

        let (session, fresh) = if let Some(entry) = (*slot).as_mut() {
            tracing::info!(context_id, handle = %entry.session.id(), "[SESSION] Continue session");
            entry.last_activity = now;
            (Arc::clone(&entry.session), false)
        } else {
            tracing::info!(context_id, "[SESSION] New session");
            let options = SessionOptions::for_chat(context_id, config, &self.model);
            let session = match self.backend.connect(&options).await {
                Ok(session) => Arc::new(session),
                Err(e) => {
                    drop(slot);
                    self.prune(context_id, &handle);
                    return Err(e);
                }
            };
            tracing::debug!(context_id, handle = %session.id(), "[SESSION] Session constructed");
            *slot = Some(Entry {
                session: Arc::clone(&session),
                created_at: now,
                last_activity: now,
            });
            self.live.fetch_add(1, Ordering::SeqCst);
            (session, true)
        };

        Ok(SessionLease {
            context_id,
            session,
            fresh,
            slot,
        })
    }

    /// Snapshot of the chat's entry, if it has a live session.
    ///
    /// Waits while the chat's session is leased.
    pub async fn info(&self, context_id: ContextId) -> Option<SessionInfo> {
        let slot = self.existing_slot(context_id)?;
        let guard = slot.lock().await;
        (*guard).as_ref().map(|entry| SessionInfo {
            handle: entry.session.id(),
            created_at: entry.created_at,
            last_activity: entry.last_activity,
        })
    }

    /// Whether the chat has a live session.
    pub async fn contains(&self, context_id: ContextId) -> bool {
        self.info(context_id).await.is_some()
    }

    /// Close one chat's session. Returns whether there was one.
    pub async fn release(&self, context_id: ContextId) -> bool {
        let Some(slot) = self.existing_slot(context_id) else {
            return false;
        };
        let mut guard = slot.lock().await;
        let released = match guard.take() {
            Some(entry) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                close_quietly(context_id, entry.session.as_ref()).await;
                true
            }
            None => false,
        };
        drop(guard);
        self.prune(context_id, &slot);
        released
    }

    /// Close the leased session and remove it, for sessions left broken by
    /// a failed query. The next acquire constructs a new one.
    pub async fn discard(&self, lease: SessionLease<B::Session>) {
        let SessionLease {
            context_id,
            session,
            mut slot,
            ..
        } = lease;
        let handle = Arc::clone(OwnedMutexGuard::mutex(&slot));
        if slot.take().is_some() {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        tracing::warn!(context_id, handle = %session.id(), "[SESSION] Discarding session");
        close_quietly(context_id, session.as_ref()).await;
        drop(slot);
        self.prune(context_id, &handle);
    }

    /// Close every session idle for at least the timeout.
    ///
    /// Sessions currently leased are skipped. Returns how many were closed.
    pub async fn evict_idle(&self) -> usize {
        let slots: Vec<(ContextId, Slot<B::Session>)> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let now = Instant::now();
        let mut evicted = 0;
        for (context_id, slot) in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let expired = (*guard)
                .as_ref()
                .is_some_and(|entry| self.is_expired(entry, now));
            if !expired {
                continue;
            }
            if let Some(entry) = guard.take() {
                self.live.fetch_sub(1, Ordering::SeqCst);
                tracing::info!(context_id, "[SESSION] Evicting idle session");
                close_quietly(context_id, entry.session.as_ref()).await;
                evicted += 1;
            }
            drop(guard);
            self.prune(context_id, &slot);
        }
        evicted
    }

    /// Close every session and empty the registry. For shutdown.
    ///
    /// Close failures are logged and never stop the loop. Waits for
    /// in-flight queries to finish first.
    pub async fn release_all(&self) {
        let slots: Vec<(ContextId, Slot<B::Session>)> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        tracing::info!("[AGENT] Closing {} active sessions", self.len());

        for (context_id, slot) in slots {
            let mut guard = slot.lock().await;
            if let Some(entry) = guard.take() {
                self.live.fetch_sub(1, Ordering::SeqCst);
                close_quietly(context_id, entry.session.as_ref()).await;
            }
            drop(guard);
            self.prune(context_id, &slot);
        }
    }
}

async fn close_quietly<S: AgentSession + ?Sized>(context_id: ContextId, session: &S) {
    match session.close().await {
        Ok(()) => {
            tracing::info!(context_id, handle = %session.id(), "[SESSION] Closed session");
        }
        Err(e) => {
            tracing::error!(
                context_id,
                handle = %session.id(),
                "[SESSION] Error closing session: {e}"
            );
        }
    }
}
