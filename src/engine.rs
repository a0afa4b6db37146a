//! Reconciliation engine.
//!
//! [`ReconcileEngine`] owns the client's view of the remote VPN instance. It
//! seeds itself from the [`StatusStore`], applies every successful control or
//! status response through the message parser, persists the result, and runs
//! a status poll loop while the instance is in a transitional state.
//!
//! # Concurrency
//!
//! All session state sits behind one mutex that is never held across an
//! await. Network completions are applied under that lock, so there is a
//! single writer.
//!
//! A single `is_loading` flag guards both [`ReconcileEngine::toggle`] and
//! [`ReconcileEngine::check_status`]: while a request is in flight, further
//! calls return immediately without touching the network.
//!
//! Snapshots are written on the blocking pool while the request still holds
//! that flag, so file I/O never runs on an async worker and saves land in
//! the order they were applied.
//!
//! At most one poll loop exists. Starting one cancels its predecessor, and
//! each loop carries a generation number so a finished loop never clears the
//! handle of its replacement. A fetch that completes after its loop was
//! cancelled is discarded.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = ReconcileEngine::initialize(api, store, DEFAULT_POLL_INTERVAL);
//! let mut view = engine.subscribe();
//! engine.toggle().await;
//! view.wait_for(|v| v.state.is_stable() && !v.polling).await?;
//! ```

use crate::error::VpnError;
use crate::gateway::{ControlApi, ControlResponse};
use crate::parser::parse_message;
use crate::state::{StatusSnapshot, VpnAction, VpnState};
use crate::store::StatusStore;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status message shown before anything is known.
pub const DEFAULT_STATUS_MESSAGE: &str = "Checking status...";

/// Status message shown after a failed status check.
pub const STATUS_UNAVAILABLE_MESSAGE: &str = "Unable to determine VPN status";

/// Delay between poll loop status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 64;

/// Observable engine state for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub state: VpnState,
    pub instance_id: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub status_message: String,
    /// A toggle or status check is in flight.
    pub is_loading: bool,
    /// Message of the most recent failed request, cleared by the next request.
    pub error_message: Option<String>,
    /// A poll loop is active.
    pub polling: bool,
}

/// Discrete engine activity, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A control action was sent.
    ActionSent(VpnAction),
    /// A server message was applied and persisted.
    SnapshotApplied(StatusSnapshot),
    /// A toggle or status check failed.
    RequestFailed { message: String },
    /// A poll loop was started.
    PollStarted { generation: u64 },
    /// A poll loop was cancelled or ran to completion.
    PollStopped { generation: u64 },
}

/// Result of a status check.
#[derive(Debug)]
pub enum CheckOutcome {
    /// The response carried a message; state after applying it.
    Updated(VpnState),
    /// The response had no message. Nothing changed.
    NoUpdate,
    /// Another request was in flight. No network call was made.
    Skipped,
    /// The request failed.
    Failed(VpnError),
    /// The poll loop was cancelled while the fetch was in flight.
    Discarded,
}

/// Result of a toggle.
#[derive(Debug)]
pub enum ToggleOutcome {
    /// The action was accepted by the server.
    Sent(VpnAction),
    /// Another request was in flight. No network call was made.
    Busy,
    /// The request failed.
    Failed(VpnError),
}

struct PollHandle {
    generation: u64,
    token: CancellationToken,
}

struct Session {
    state: VpnState,
    instance_id: Option<String>,
    last_updated: Option<DateTime<Utc>>,
    status_message: String,
    is_loading: bool,
    error_message: Option<String>,
    poll: Option<PollHandle>,
    next_generation: u64,
    /// Latest timestamp issued by this process. Not restored from the store.
    stamp_floor: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: VpnState::default(),
            instance_id: None,
            last_updated: None,
            status_message: DEFAULT_STATUS_MESSAGE.to_owned(),
            is_loading: false,
            error_message: None,
            poll: None,
            next_generation: 0,
            stamp_floor: None,
        }
    }
}

impl Session {
    fn from_snapshot(snapshot: StatusSnapshot) -> Self {
        Self {
            state: snapshot.state,
            instance_id: snapshot.instance_id,
            last_updated: Some(snapshot.last_updated),
            status_message: snapshot.message,
            ..Self::default()
        }
    }

    fn view(&self) -> ViewState {
        ViewState {
            state: self.state,
            instance_id: self.instance_id.clone(),
            last_updated: self.last_updated,
            status_message: self.status_message.clone(),
            is_loading: self.is_loading,
            error_message: self.error_message.clone(),
            polling: self.poll.is_some(),
        }
    }

    /// Apply a server message and return the snapshot to persist.
    fn apply_message(&mut self, message: String) -> StatusSnapshot {
        parse_message(&message).apply_to(&mut self.state, &mut self.instance_id);
        self.status_message = message;

        // monotonic within this process, even if the wall clock steps back
        let now = Utc::now();
        let stamp = match self.stamp_floor {
            Some(floor) if floor > now => floor,
            _ => now,
        };
        self.stamp_floor = Some(stamp);
        self.last_updated = Some(stamp);

        StatusSnapshot {
            state: self.state,
            instance_id: self.instance_id.clone(),
            last_updated: stamp,
            message: self.status_message.clone(),
        }
    }
}

struct Inner {
    api: Arc<dyn ControlApi>,
    store: Arc<dyn StatusStore>,
    poll_interval: Duration,
    session: Mutex<Session>,
    view_tx: watch::Sender<ViewState>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, session: &Session) {
        self.view_tx.send_replace(session.view());
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.event_tx.send(event);
    }

    /// Claim the in-flight slot. Returns `false` if it is taken.
    fn begin_request(&self, session: &mut Session) -> bool {
        if session.is_loading {
            return false;
        }
        session.is_loading = true;
        session.error_message = None;
        self.publish(session);
        true
    }

    fn apply_message(&self, session: &mut Session, message: String) -> StatusSnapshot {
        let snapshot = session.apply_message(message);
        debug!(
            state = %snapshot.state,
            instance_id = snapshot.instance_id.as_deref().unwrap_or("-"),
            "applied status message"
        );
        self.publish(session);
        snapshot
    }

    /// Write the snapshot on the blocking pool.
    ///
    /// Callers still hold the in-flight slot, so saves cannot reorder.
    async fn persist(&self, snapshot: StatusSnapshot) {
        let store = Arc::clone(&self.store);
        let record = snapshot.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.save(&record)).await {
            warn!("status persistence task failed: {e}");
        }
        self.emit(EngineEvent::SnapshotApplied(snapshot));
    }

    fn record_failure(&self, session: &mut Session, error: &VpnError) {
        session.error_message = Some(error.to_string());
        self.emit(EngineEvent::RequestFailed {
            message: error.to_string(),
        });
    }

    /// Apply a status fetch result. State is only touched by a parsed message.
    ///
    /// With `cancel` set, a result arriving after cancellation is discarded.
    async fn apply_fetch(
        &self,
        result: crate::error::Result<ControlResponse>,
        cancel: Option<&CancellationToken>,
    ) -> CheckOutcome {
        let snapshot = {
            let mut session = self.lock();
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                debug!("discarding status result from cancelled poll loop");
                return CheckOutcome::Discarded;
            }
            match result {
                Ok(ControlResponse {
                    message: Some(message),
                }) => self.apply_message(&mut session, message),
                Ok(ControlResponse { message: None }) => {
                    debug!("status response carried no message");
                    return CheckOutcome::NoUpdate;
                }
                Err(e) => {
                    warn!(code = e.code(), "status check failed: {e}");
                    self.record_failure(&mut session, &e);
                    session.status_message = STATUS_UNAVAILABLE_MESSAGE.to_owned();
                    self.publish(&session);
                    return CheckOutcome::Failed(e);
                }
            }
        };

        let state = snapshot.state;
        self.persist(snapshot).await;
        CheckOutcome::Updated(state)
    }

    fn stop_polling(&self, session: &mut Session) {
        if let Some(handle) = session.poll.take() {
            handle.token.cancel();
            debug!(generation = handle.generation, "status polling stopped");
            self.emit(EngineEvent::PollStopped {
                generation: handle.generation,
            });
        }
    }

    /// Replace any active poll loop with a fresh one.
    fn start_polling(self: &Arc<Self>, session: &mut Session) {
        self.stop_polling(session);

        session.next_generation += 1;
        let generation = session.next_generation;
        let token = CancellationToken::new();
        session.poll = Some(PollHandle {
            generation,
            token: token.clone(),
        });

        debug!(generation, "status polling started");
        self.emit(EngineEvent::PollStarted { generation });
        tokio::spawn(poll_loop(
            Arc::downgrade(self),
            generation,
            token,
            self.poll_interval,
        ));
    }

    async fn toggle(self: &Arc<Self>) -> ToggleOutcome {
        let action = {
            let mut session = self.lock();
            if !self.begin_request(&mut session) {
                debug!("toggle ignored, request already in flight");
                return ToggleOutcome::Busy;
            }
            VpnAction::for_state(session.state)
        };

        info!(%action, "sending VPN action");
        self.emit(EngineEvent::ActionSent(action));

        let response = match self.api.send_action(action).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%action, code = e.code(), "VPN action failed: {e}");
                let mut session = self.lock();
                session.is_loading = false;
                self.record_failure(&mut session, &e);
                self.publish(&session);
                return ToggleOutcome::Failed(e);
            }
        };

        if let Some(message) = response.message {
            let snapshot = {
                let mut session = self.lock();
                self.apply_message(&mut session, message)
            };
            self.persist(snapshot).await;
        }

        let mut session = self.lock();
        session.is_loading = false;
        self.start_polling(&mut session);
        self.publish(&session);
        ToggleOutcome::Sent(action)
    }

    async fn check_status(self: &Arc<Self>) -> CheckOutcome {
        {
            let mut session = self.lock();
            if !self.begin_request(&mut session) {
                debug!("status check skipped, request already in flight");
                return CheckOutcome::Skipped;
            }
        }

        let result = self.api.fetch_status().await;
        let outcome = self.apply_fetch(result, None).await;

        let mut session = self.lock();
        session.is_loading = false;
        if let CheckOutcome::Updated(state) = &outcome {
            if state.is_transitioning() {
                self.start_polling(&mut session);
            } else {
                self.stop_polling(&mut session);
            }
        }
        self.publish(&session);
        outcome
    }

    /// One poll loop iteration. Returns whether the loop should continue.
    async fn poll_once(&self, cancel: &CancellationToken) -> bool {
        {
            let mut session = self.lock();
            if cancel.is_cancelled() {
                return false;
            }
            if !self.begin_request(&mut session) {
                debug!("poll tick skipped, request already in flight");
                return true;
            }
        }

        let result = self.api.fetch_status().await;
        let outcome = self.apply_fetch(result, Some(cancel)).await;

        let mut session = self.lock();
        session.is_loading = false;
        self.publish(&session);
        !matches!(outcome, CheckOutcome::Discarded) && session.state.is_transitioning()
    }

    /// Clear the poll handle if it still belongs to `generation`.
    fn finish_poll(&self, generation: u64) {
        let mut session = self.lock();
        if session
            .poll
            .as_ref()
            .is_some_and(|handle| handle.generation == generation)
        {
            session.poll = None;
            debug!(generation, "status polling finished");
            self.emit(EngineEvent::PollStopped { generation });
            self.publish(&session);
        }
    }
}

/// Wait, check, repeat while the state is transitional.
///
/// The first check always happens, so a toggle whose response carried no
/// recognisable state still gets one follow-up.
async fn poll_loop(
    inner: Weak<Inner>,
    generation: u64,
    cancel: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(engine) = inner.upgrade() else {
            break;
        };
        if !engine.poll_once(&cancel).await {
            break;
        }
    }

    if let Some(engine) = inner.upgrade() {
        engine.finish_poll(generation);
    }
}

/// Client-side owner of the VPN instance state.
///
/// Dropping the engine stops its poll loop.
pub struct ReconcileEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReconcileEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileEngine")
            .field("poll_interval", &self.inner.poll_interval)
            .field("view", &self.view())
            .finish()
    }
}

impl ReconcileEngine {
    /// Create an engine seeded from the last persisted snapshot.
    ///
    /// Makes no network call. Without a stored snapshot the state is
    /// `stopped` with no identifier and [`DEFAULT_STATUS_MESSAGE`].
    pub fn initialize(
        api: Arc<dyn ControlApi>,
        store: Arc<dyn StatusStore>,
        poll_interval: Duration,
    ) -> Self {
        let session = match store.load() {
            Some(snapshot) => {
                info!(state = %snapshot.state, "restored last known VPN status");
                Session::from_snapshot(snapshot)
            }
            None => Session::default(),
        };

        let (view_tx, _) = watch::channel(session.view());
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                api,
                store,
                poll_interval,
                session: Mutex::new(session),
                view_tx,
                event_tx,
            }),
        }
    }

    /// Send `start` if stopped, otherwise `stop`, then poll until stable.
    ///
    /// A transitional state also sends `stop`.
    pub async fn toggle(&self) -> ToggleOutcome {
        self.inner.toggle().await
    }

    /// Fetch and apply the current status.
    ///
    /// A transitional result (re)starts polling; a stable one stops it. On
    /// failure the state is kept and the status message becomes
    /// [`STATUS_UNAVAILABLE_MESSAGE`].
    pub async fn check_status(&self) -> CheckOutcome {
        self.inner.check_status().await
    }

    /// Stop polling, then perform one status check.
    pub async fn force_refresh(&self) -> CheckOutcome {
        {
            let mut session = self.inner.lock();
            self.inner.stop_polling(&mut session);
            self.inner.publish(&session);
        }
        self.inner.check_status().await
    }

    /// Current view.
    pub fn view(&self) -> ViewState {
        self.inner.lock().view()
    }

    /// Watch the view. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.inner.view_tx.subscribe()
    }

    /// Subscribe to engine events from this point on.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Stop any active poll loop.
    pub fn shutdown(&self) {
        let mut session = self.inner.lock();
        self.inner.stop_polling(&mut session);
        self.inner.publish(&session);
    }
}

impl Drop for ReconcileEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
