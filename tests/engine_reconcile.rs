//! Reconciliation engine behaviour against a scripted gateway.
//!
//! Covers stabilization through the poll loop, failure handling, the
//! in-flight guard under concurrent callers, poll loop exclusivity and
//! cancellation, and persistence across engine instances.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use vpn_control::engine::{DEFAULT_STATUS_MESSAGE, STATUS_UNAVAILABLE_MESSAGE};
use vpn_control::{
    CheckOutcome, ControlApi, ControlResponse, EngineEvent, JsonFileStore, MemoryStatusStore,
    ReconcileEngine, StatusSnapshot, StatusStore, ToggleOutcome, ViewState, VpnAction, VpnError,
    VpnState,
};

const WAIT: Duration = Duration::from_secs(5);
const FAST_POLL: Duration = Duration::from_millis(10);
const SLOW_POLL: Duration = Duration::from_secs(60);

// ────────────────────────────────────────────────────────────────────────────
// Scripted gateway
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Reply {
    Message(&'static str),
    Empty,
    Fail,
}

impl Reply {
    fn into_result(self) -> vpn_control::Result<ControlResponse> {
        match self {
            Self::Message(m) => Ok(ControlResponse::with_message(m)),
            Self::Empty => Ok(ControlResponse::default()),
            Self::Fail => Err(VpnError::Network("connection reset".to_owned())),
        }
    }
}

/// Replays queued status replies, repeating the last one once drained.
struct ScriptedApi {
    action_reply: Reply,
    status_replies: Mutex<VecDeque<Reply>>,
    last_status: Mutex<Reply>,
    gate: Option<Arc<Notify>>,
    action_gate: Option<Arc<Notify>>,
    delay: Option<Duration>,
    actions: Mutex<Vec<VpnAction>>,
    status_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedApi {
    fn new(action_reply: Reply, status_replies: Vec<Reply>) -> Self {
        Self {
            action_reply,
            status_replies: Mutex::new(status_replies.into()),
            last_status: Mutex::new(Reply::Empty),
            gate: None,
            action_gate: None,
            delay: None,
            actions: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every status fetch waits for one `notify_one` on the gate.
    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Every action waits for one `notify_one` on the gate.
    fn action_gated(mut self, gate: Arc<Notify>) -> Self {
        self.action_gate = Some(gate);
        self
    }

    /// Every status fetch takes at least `delay`.
    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn actions(&self) -> Vec<VpnAction> {
        self.actions.lock().unwrap().clone()
    }

    fn next_status(&self) -> Reply {
        let mut queue = self.status_replies.lock().unwrap();
        let mut last = self.last_status.lock().unwrap();
        if let Some(reply) = queue.pop_front() {
            *last = reply.clone();
            reply
        } else {
            last.clone()
        }
    }
}

#[async_trait]
impl ControlApi for ScriptedApi {
    async fn send_action(&self, action: VpnAction) -> vpn_control::Result<ControlResponse> {
        self.actions.lock().unwrap().push(action);
        if let Some(gate) = &self.action_gate {
            gate.notified().await;
        }
        self.action_reply.clone().into_result()
    }

    async fn fetch_status(&self) -> vpn_control::Result<ControlResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_status().into_result()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn engine(
    api: &Arc<ScriptedApi>,
    store: &Arc<MemoryStatusStore>,
    interval: Duration,
) -> ReconcileEngine {
    ReconcileEngine::initialize(api.clone(), store.clone(), interval)
}

fn seeded_store(state: VpnState, message: &str) -> Arc<MemoryStatusStore> {
    let store = Arc::new(MemoryStatusStore::new());
    store.save(&StatusSnapshot {
        state,
        instance_id: Some("i-1".to_owned()),
        last_updated: chrono::Utc::now(),
        message: message.to_owned(),
    });
    store
}

async fn wait_until(view: &mut watch::Receiver<ViewState>, f: impl FnMut(&ViewState) -> bool) {
    tokio::time::timeout(WAIT, view.wait_for(f))
        .await
        .expect("timed out waiting for view")
        .expect("engine dropped");
}

// ────────────────────────────────────────────────────────────────────────────
// Stabilization
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn toggle_from_stopped_polls_until_running() {
    let api = Arc::new(ScriptedApi::new(
        Reply::Message("Instance i-1 is starting"),
        vec![
            Reply::Message("Instance i-1 is starting"),
            Reply::Message("Instance i-1 is running"),
        ],
    ));
    let store = Arc::new(MemoryStatusStore::new());
    let engine = engine(&api, &store, FAST_POLL);
    let mut view = engine.subscribe();

    let outcome = engine.toggle().await;
    assert!(matches!(outcome, ToggleOutcome::Sent(VpnAction::Start)));

    let after_toggle = engine.view();
    assert_eq!(after_toggle.state, VpnState::Starting);
    assert_eq!(after_toggle.instance_id.as_deref(), Some("i-1"));
    assert_eq!(after_toggle.status_message, "Instance i-1 is starting");
    assert!(after_toggle.polling);

    wait_until(&mut view, |v| v.state == VpnState::Running && !v.polling).await;

    assert_eq!(api.actions(), vec![VpnAction::Start]);
    assert_eq!(api.status_calls(), 2);
    assert_eq!(store.load().unwrap().state, VpnState::Running);
    assert_eq!(engine.view().error_message, None);
}

#[tokio::test]
async fn toggle_without_message_still_polls() {
    let api = Arc::new(ScriptedApi::new(
        Reply::Empty,
        vec![Reply::Message("Instance i-2 is running")],
    ));
    let store = Arc::new(MemoryStatusStore::new());
    let engine = engine(&api, &store, FAST_POLL);
    let mut view = engine.subscribe();

    assert!(matches!(
        engine.toggle().await,
        ToggleOutcome::Sent(VpnAction::Start)
    ));
    assert_eq!(engine.view().status_message, DEFAULT_STATUS_MESSAGE);
    assert!(engine.view().polling);

    wait_until(&mut view, |v| v.state == VpnState::Running && !v.polling).await;
    assert_eq!(engine.view().instance_id.as_deref(), Some("i-2"));
}

#[tokio::test]
async fn stable_check_stops_active_poll_loop() {
    let api = Arc::new(ScriptedApi::new(
        Reply::Message("Instance i-1 is stopping"),
        vec![Reply::Message("Instance i-1 is stopped")],
    ));
    let store = seeded_store(VpnState::Running, "Instance i-1 is running");
    let engine = engine(&api, &store, SLOW_POLL);

    assert!(matches!(
        engine.toggle().await,
        ToggleOutcome::Sent(VpnAction::Stop)
    ));
    assert!(engine.view().polling);

    let outcome = engine.check_status().await;
    assert!(matches!(outcome, CheckOutcome::Updated(VpnState::Stopped)));
    assert!(!engine.view().polling);
}

// ────────────────────────────────────────────────────────────────────────────
// Toggle rule
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn toggle_sends_stop_from_running_and_transitional_states() {
    for seeded in [VpnState::Running, VpnState::Starting, VpnState::Stopping] {
        let api = Arc::new(ScriptedApi::new(Reply::Empty, Vec::new()));
        let store = seeded_store(seeded, "seed");
        let engine = engine(&api, &store, SLOW_POLL);

        assert!(matches!(engine.toggle().await, ToggleOutcome::Sent(_)));
        engine.shutdown();

        assert_eq!(api.actions(), vec![VpnAction::Stop], "from {seeded}");
    }
}

#[tokio::test]
async fn toggle_failure_records_error_only() {
    let api = Arc::new(ScriptedApi::new(Reply::Fail, Vec::new()));
    let store = seeded_store(VpnState::Running, "Instance i-1 is running");
    let stored_before = store.payload();
    let engine = engine(&api, &store, FAST_POLL);

    assert!(matches!(engine.toggle().await, ToggleOutcome::Failed(_)));

    let view = engine.view();
    assert_eq!(view.state, VpnState::Running);
    assert_eq!(view.status_message, "Instance i-1 is running");
    assert!(view.error_message.is_some_and(|e| !e.is_empty()));
    assert!(!view.polling);
    assert!(!view.is_loading);
    assert_eq!(store.payload(), stored_before);
}

// ────────────────────────────────────────────────────────────────────────────
// Failure
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_check_keeps_state_and_sets_generic_message() {
    let api = Arc::new(ScriptedApi::new(Reply::Empty, vec![Reply::Fail]));
    let store = seeded_store(VpnState::Running, "Instance i-1 is running");
    let stored_before = store.payload();
    let engine = engine(&api, &store, FAST_POLL);
    let mut events = engine.events();

    let outcome = engine.check_status().await;
    assert!(matches!(outcome, CheckOutcome::Failed(VpnError::Network(_))));

    let view = engine.view();
    assert_eq!(view.state, VpnState::Running);
    assert_eq!(view.instance_id.as_deref(), Some("i-1"));
    assert_eq!(view.status_message, STATUS_UNAVAILABLE_MESSAGE);
    assert!(view.error_message.is_some_and(|e| !e.is_empty()));
    assert_eq!(store.payload(), stored_before);

    assert!(matches!(
        events.try_recv(),
        Ok(EngineEvent::RequestFailed { .. })
    ));
}

#[tokio::test]
async fn next_request_clears_previous_error() {
    let api = Arc::new(ScriptedApi::new(
        Reply::Empty,
        vec![Reply::Fail, Reply::Message("Instance i-1 is running")],
    ));
    let store = Arc::new(MemoryStatusStore::new());
    let engine = engine(&api, &store, FAST_POLL);

    engine.check_status().await;
    assert!(engine.view().error_message.is_some());

    engine.check_status().await;
    assert_eq!(engine.view().error_message, None);
    assert_eq!(engine.view().state, VpnState::Running);
}

// ────────────────────────────────────────────────────────────────────────────
// In-flight guard
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn check_during_inflight_check_makes_no_network_call() {
    let gate = Arc::new(Notify::new());
    let api = Arc::new(
        ScriptedApi::new(Reply::Empty, vec![Reply::Message("Instance i-1 is running")])
            .gated(gate.clone()),
    );
    let store = Arc::new(MemoryStatusStore::new());
    let engine = Arc::new(engine(&api, &store, FAST_POLL));
    let mut view = engine.subscribe();

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.check_status().await })
    };
    wait_until(&mut view, |v| v.is_loading).await;

    assert!(matches!(engine.check_status().await, CheckOutcome::Skipped));
    assert!(matches!(engine.toggle().await, ToggleOutcome::Busy));
    assert_eq!(api.status_calls(), 1);
    assert!(api.actions().is_empty());

    gate.notify_one();
    let outcome = first.await.expect("task panicked");
    assert!(matches!(outcome, CheckOutcome::Updated(VpnState::Running)));
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test]
async fn toggle_during_inflight_toggle_is_busy() {
    let gate = Arc::new(Notify::new());
    let api = Arc::new(
        ScriptedApi::new(
            Reply::Message("Instance i-1 is starting"),
            vec![Reply::Message("Instance i-1 is running")],
        )
        .action_gated(gate.clone()),
    );
    let store = Arc::new(MemoryStatusStore::new());
    let engine = Arc::new(engine(&api, &store, SLOW_POLL));
    let mut view = engine.subscribe();

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.toggle().await })
    };
    wait_until(&mut view, |v| v.is_loading).await;

    assert!(matches!(engine.toggle().await, ToggleOutcome::Busy));
    assert!(matches!(engine.check_status().await, CheckOutcome::Skipped));
    assert_eq!(api.actions(), vec![VpnAction::Start]);
    assert_eq!(api.status_calls(), 0);

    gate.notify_one();
    let outcome = first.await.expect("task panicked");
    assert!(matches!(outcome, ToggleOutcome::Sent(VpnAction::Start)));
    assert_eq!(api.actions(), vec![VpnAction::Start]);
    engine.shutdown();
}

#[tokio::test]
async fn force_refresh_respects_inflight_guard() {
    let gate = Arc::new(Notify::new());
    let api = Arc::new(
        ScriptedApi::new(Reply::Empty, vec![Reply::Message("Instance i-1 is running")])
            .gated(gate.clone()),
    );
    let store = Arc::new(MemoryStatusStore::new());
    let engine = Arc::new(engine(&api, &store, FAST_POLL));
    let mut view = engine.subscribe();

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.check_status().await })
    };
    wait_until(&mut view, |v| v.is_loading).await;

    assert!(matches!(engine.force_refresh().await, CheckOutcome::Skipped));
    assert_eq!(api.status_calls(), 1);

    gate.notify_one();
    first.await.expect("task panicked");
}

// ────────────────────────────────────────────────────────────────────────────
// Poll loop exclusivity and cancellation
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn restarting_polling_never_runs_two_loops() {
    let api = Arc::new(ScriptedApi::new(
        Reply::Message("Instance i-1 is starting"),
        vec![Reply::Message("Instance i-1 is starting")],
    ));
    let store = Arc::new(MemoryStatusStore::new());
    let engine = engine(&api, &store, FAST_POLL);
    let mut events = engine.events();

    for _ in 0..3 {
        engine.check_status().await;
        engine.toggle().await;
    }
    tokio::time::sleep(FAST_POLL * 5).await;
    engine.shutdown();

    assert!(api.max_in_flight.load(Ordering::SeqCst) <= 1);

    let mut active: Vec<u64> = Vec::new();
    let mut started = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::PollStarted { generation } => {
                started += 1;
                active.push(generation);
                assert!(active.len() <= 1, "two poll loops active: {active:?}");
            }
            EngineEvent::PollStopped { generation } => {
                active.retain(|g| *g != generation);
            }
            _ => {}
        }
    }
    assert_eq!(started, 6);
    assert!(active.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checks_never_overlap_fetches() {
    let api = Arc::new(
        ScriptedApi::new(
            Reply::Message("Instance i-1 is starting"),
            vec![Reply::Message("Instance i-1 is starting")],
        )
        .slow(Duration::from_millis(5)),
    );
    let store = Arc::new(MemoryStatusStore::new());
    let engine = Arc::new(engine(&api, &store, FAST_POLL));

    let tasks: Vec<_> = (0..8)
        .map(|task| {
            let engine = engine.clone();
            tokio::spawn(async move {
                for round in 0..50 {
                    if (task + round) % 2 == 0 {
                        engine.check_status().await;
                    } else {
                        engine.force_refresh().await;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("task panicked");
    }
    engine.shutdown();

    let mut view = engine.subscribe();
    wait_until(&mut view, |v| !v.is_loading && !v.polling).await;

    assert!(api.status_calls() > 0);
    assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(engine.view().state, VpnState::Starting);
}

#[tokio::test]
async fn shutdown_stops_all_polling_calls() {
    let api = Arc::new(ScriptedApi::new(
        Reply::Message("Instance i-1 is starting"),
        vec![Reply::Message("Instance i-1 is starting")],
    ));
    let store = Arc::new(MemoryStatusStore::new());
    let engine = engine(&api, &store, FAST_POLL);

    engine.toggle().await;
    tokio::time::sleep(FAST_POLL * 5).await;
    engine.shutdown();

    tokio::time::sleep(FAST_POLL * 2).await;
    let calls = api.status_calls();
    tokio::time::sleep(FAST_POLL * 10).await;
    assert_eq!(api.status_calls(), calls);
    assert!(!engine.view().polling);
}

#[tokio::test]
async fn dropping_engine_stops_polling() {
    let api = Arc::new(ScriptedApi::new(
        Reply::Message("Instance i-1 is starting"),
        vec![Reply::Message("Instance i-1 is starting")],
    ));
    let store = Arc::new(MemoryStatusStore::new());

    {
        let engine = engine(&api, &store, FAST_POLL);
        engine.toggle().await;
    }

    tokio::time::sleep(FAST_POLL * 2).await;
    let calls = api.status_calls();
    tokio::time::sleep(FAST_POLL * 10).await;
    assert_eq!(api.status_calls(), calls);
}

#[tokio::test]
async fn cancelled_poll_result_is_discarded() {
    let gate = Arc::new(Notify::new());
    let api = Arc::new(
        ScriptedApi::new(
            Reply::Message("Instance i-1 is starting"),
            vec![Reply::Message("Instance i-1 is running")],
        )
        .gated(gate.clone()),
    );
    let store = Arc::new(MemoryStatusStore::new());
    let engine = engine(&api, &store, FAST_POLL);
    let mut view = engine.subscribe();

    engine.toggle().await;
    wait_until(&mut view, |v| v.is_loading).await;
    engine.shutdown();

    gate.notify_one();
    wait_until(&mut view, |v| !v.is_loading).await;

    let view = engine.view();
    assert_eq!(view.state, VpnState::Starting);
    assert_eq!(view.status_message, "Instance i-1 is starting");
    assert_eq!(store.load().unwrap().state, VpnState::Starting);
}

#[tokio::test]
async fn force_refresh_replaces_poll_loop_with_one_check() {
    let api = Arc::new(ScriptedApi::new(
        Reply::Empty,
        vec![
            Reply::Message("Instance i-1 is starting"),
            Reply::Message("Instance i-1 is running"),
        ],
    ));
    let store = Arc::new(MemoryStatusStore::new());
    let engine = engine(&api, &store, SLOW_POLL);

    assert!(matches!(
        engine.check_status().await,
        CheckOutcome::Updated(VpnState::Starting)
    ));
    assert!(engine.view().polling);

    let outcome = engine.force_refresh().await;
    assert!(matches!(outcome, CheckOutcome::Updated(VpnState::Running)));
    assert!(!engine.view().polling);
    assert_eq!(api.status_calls(), 2);
}

// ────────────────────────────────────────────────────────────────────────────
// Persistence
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_round_trips_into_fresh_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn StatusStore> = Arc::new(JsonFileStore::new(dir.path()));
    let api = Arc::new(ScriptedApi::new(
        Reply::Empty,
        vec![Reply::Message("Instance i-0123abc is now running")],
    ));

    let first = ReconcileEngine::initialize(api.clone(), store.clone(), SLOW_POLL);
    first.check_status().await;
    let saved = first.view();
    drop(first);

    let second = ReconcileEngine::initialize(api.clone(), store, SLOW_POLL);
    let restored = second.view();

    assert_eq!(restored.state, VpnState::Running);
    assert_eq!(restored.instance_id.as_deref(), Some("i-0123abc"));
    assert_eq!(restored.state, saved.state);
    assert_eq!(restored.instance_id, saved.instance_id);
    assert_eq!(restored.status_message, saved.status_message);
    assert_eq!(restored.last_updated, saved.last_updated);
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test]
async fn corrupt_snapshot_falls_back_to_defaults() {
    let api = Arc::new(ScriptedApi::new(Reply::Empty, Vec::new()));
    let store = Arc::new(MemoryStatusStore::with_payload("{\"state\": \"sideways\""));
    let engine = engine(&api, &store, SLOW_POLL);

    let view = engine.view();
    assert_eq!(view.state, VpnState::Stopped);
    assert_eq!(view.instance_id, None);
    assert_eq!(view.status_message, DEFAULT_STATUS_MESSAGE);
    assert_eq!(api.status_calls(), 0);
}

#[tokio::test]
async fn saved_timestamps_never_decrease() {
    let api = Arc::new(ScriptedApi::new(
        Reply::Empty,
        vec![
            Reply::Message("Instance i-1 is stopped"),
            Reply::Message("Instance i-1 is stopped"),
            Reply::Message("Instance i-1 is running"),
        ],
    ));
    let store = Arc::new(MemoryStatusStore::new());
    let engine = engine(&api, &store, SLOW_POLL);

    let mut previous = None;
    for _ in 0..3 {
        engine.check_status().await;
        let stamp = store.load().unwrap().last_updated;
        if let Some(prev) = previous {
            assert!(stamp >= prev);
        }
        previous = Some(stamp);
    }
}

#[tokio::test]
async fn restored_future_timestamp_does_not_pin_later_saves() {
    let future = chrono::Utc::now() + chrono::Duration::days(30);
    let store = Arc::new(MemoryStatusStore::new());
    store.save(&StatusSnapshot {
        state: VpnState::Stopped,
        instance_id: Some("i-1".to_owned()),
        last_updated: future,
        message: "Instance i-1 is stopped".to_owned(),
    });
    let api = Arc::new(ScriptedApi::new(
        Reply::Empty,
        vec![Reply::Message("Instance i-1 is running")],
    ));
    let engine = engine(&api, &store, SLOW_POLL);
    assert_eq!(engine.view().last_updated, Some(future));

    engine.check_status().await;

    let saved = store.load().unwrap();
    assert_eq!(saved.state, VpnState::Running);
    assert!(saved.last_updated < future);
    assert_eq!(engine.view().last_updated, Some(saved.last_updated));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_is_saved_before_event_fires() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JsonFileStore::new(dir.path()));
    let api = Arc::new(ScriptedApi::new(
        Reply::Message("Instance i-1 is starting"),
        vec![
            Reply::Message("Instance i-1 is starting"),
            Reply::Message("Instance i-1 is running"),
        ],
    ));
    let engine = ReconcileEngine::initialize(api.clone(), store.clone(), FAST_POLL);
    let mut events = engine.events();

    engine.toggle().await;

    let mut applied = 0;
    let settled = async {
        loop {
            let EngineEvent::SnapshotApplied(snapshot) =
                events.recv().await.expect("event stream closed")
            else {
                continue;
            };
            applied += 1;
            let saved = store.load().expect("snapshot on disk");
            assert!(saved.last_updated >= snapshot.last_updated);
            if snapshot.state == VpnState::Running {
                assert_eq!(saved, snapshot);
                break;
            }
        }
    };
    tokio::time::timeout(WAIT, settled)
        .await
        .expect("timed out waiting for running snapshot");

    assert_eq!(applied, 3);
    engine.shutdown();
}
