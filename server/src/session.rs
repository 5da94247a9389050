//! Session registry / connection manager (C6, spec §4.6).
//!
//! Grounded on the teacher's `lobby::AppState` (a `Mutex<HashMap<...>>`
//! guarding shared session state, cloned out from under the lock before any
//! I/O) generalized from per-room client lists to per-player session
//! records with room subscriptions and rest-countdown lifecycles.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use protocol::{PlayerId, RoomId};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::collaborators::RoomService;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session exists for this player")]
    SessionMissing,
    #[error("a rest countdown is already active for this player")]
    DuplicateRest,
}

/// A full-duplex message transport for one client connection. The
/// WebSocket implementation lives in `ws.rs`; tests use an in-memory one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &str) -> Result<(), TransportError>;
    fn is_closed(&self) -> bool;
    async fn close(&self);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transport send failed: {0}")]
pub struct TransportError(pub String);

/// Player position, mutated by movement/rest/combat handlers. `Resting` and
/// `Prone` are set by the combat collaborator, which this core does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Position {
    Standing,
    Sitting,
    Resting,
    Prone,
}

/// Handle to a running rest-countdown task (spec §4.6's per-player state
/// machine: `Idle -> Counting -> Completed|Cancelled`).
pub struct RestHandle {
    pub task: JoinHandle<()>,
}

impl RestHandle {
    pub async fn cancel(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Per-PlayerId value owned by C6 (spec §3).
pub struct SessionRecord {
    pub player_id: PlayerId,
    pub display_name: String,
    pub transports: Vec<Arc<dyn Transport>>,
    pub room_subscriptions: HashSet<RoomId>,
    pub position: Position,
    pub last_activity_at: DateTime<Utc>,
    pub is_intentional_disconnect: bool,
    pub rest_countdown: Option<RestHandle>,
    pub last_whisper_from: Option<PlayerId>,
}

impl SessionRecord {
    fn new(player_id: PlayerId, display_name: String) -> Self {
        Self {
            player_id,
            display_name,
            transports: Vec::new(),
            room_subscriptions: HashSet::new(),
            position: Position::Standing,
            last_activity_at: Utc::now(),
            is_intentional_disconnect: false,
            rest_countdown: None,
            last_whisper_from: None,
        }
    }

    fn is_online(&self) -> bool {
        !self.transports.is_empty() || self.rest_countdown.is_some()
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeliverySummary {
    pub success: usize,
    pub failures: usize,
}

struct Inner {
    sessions: HashMap<PlayerId, SessionRecord>,
    room_index: HashMap<RoomId, HashSet<PlayerId>>,
    grace_tasks: HashMap<PlayerId, JoinHandle<()>>,
}

/// Owns mutable per-player session state and the set of active transports
/// (spec §4.6). All operations are safe under concurrent access.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    disconnect_grace: Duration,
    pub(crate) room_service: Arc<dyn RoomService>,
}

impl SessionRegistry {
    pub fn new(disconnect_grace: Duration, room_service: Arc<dyn RoomService>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { sessions: HashMap::new(), room_index: HashMap::new(), grace_tasks: HashMap::new() }),
            disconnect_grace,
            room_service,
        })
    }

    /// Adds a transport, cancelling any pending disconnect grace timer.
    pub async fn attach(&self, player_id: PlayerId, display_name: &str, transport: Arc<dyn Transport>) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.grace_tasks.remove(&player_id) {
            task.abort();
        }
        let record = inner
            .sessions
            .entry(player_id)
            .or_insert_with(|| SessionRecord::new(player_id, display_name.to_string()));
        record.transports.push(transport);
        record.last_activity_at = Utc::now();
    }

    /// Removes a transport. If no transports remain and the disconnect was
    /// marked intentional, the session is removed immediately; otherwise a
    /// grace timer is started.
    pub async fn detach(self: &Arc<Self>, player_id: PlayerId) {
        let should_start_grace = {
            let mut inner = self.inner.lock().await;
            let Some(record) = inner.sessions.get_mut(&player_id) else {
                return;
            };
            record.transports.retain(|t| !t.is_closed());
            if !record.transports.is_empty() {
                return;
            }
            if record.rest_countdown.is_some() {
                return;
            }
            if record.is_intentional_disconnect {
                self.remove_session_locked(&mut inner, player_id);
                false
            } else {
                true
            }
        };

        if should_start_grace {
            self.start_grace_timer(player_id);
        }
    }

    fn start_grace_timer(self: &Arc<Self>, player_id: PlayerId) {
        let this = self.clone();
        let grace = self.disconnect_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut inner = this.inner.lock().await;
            let still_empty = inner
                .sessions
                .get(&player_id)
                .map(|r| r.transports.is_empty() && r.rest_countdown.is_none())
                .unwrap_or(false);
            if still_empty {
                this.remove_session_locked(&mut inner, player_id);
            }
        });
        // Replace any prior grace task (there should not normally be one).
        tokio::spawn({
            let this = self.clone();
            async move {
                let mut inner = this.inner.lock().await;
                if let Some(previous) = inner.grace_tasks.insert(player_id, handle) {
                    previous.abort();
                }
            }
        });
    }

    fn remove_session_locked(&self, inner: &mut Inner, player_id: PlayerId) {
        if let Some(record) = inner.sessions.remove(&player_id) {
            for room in record.room_subscriptions {
                if let Some(members) = inner.room_index.get_mut(&room) {
                    members.remove(&player_id);
                }
            }
        }
        if let Some(task) = inner.grace_tasks.remove(&player_id) {
            task.abort();
        }
    }

    pub async fn mark_intentional(&self, player_id: PlayerId) {
        if let Some(record) = self.inner.lock().await.sessions.get_mut(&player_id) {
            record.is_intentional_disconnect = true;
        }
    }

    /// Checks for an existing rest task and spawns `make_countdown` while
    /// still holding the lock, so the check-then-spawn is atomic: no other
    /// caller can observe a gap between "no countdown running" and "the
    /// new countdown task is recorded" (spec §3/§8 invariant 7, "at most
    /// one rest countdown per player"). A version that spawned first and
    /// checked second could leave an orphaned, undetached task running
    /// behind a rejected duplicate request.
    pub async fn begin_rest_task<F, Fut>(self: &Arc<Self>, player_id: PlayerId, make_countdown: F) -> Result<(), SessionError>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.sessions.get_mut(&player_id) else {
            return Err(SessionError::SessionMissing);
        };
        if record.rest_countdown.is_some() {
            return Err(SessionError::DuplicateRest);
        }
        let task = tokio::spawn(make_countdown(self.clone()));
        record.rest_countdown = Some(RestHandle { task });
        record.position = Position::Sitting;
        Ok(())
    }

    pub async fn is_resting(&self, player_id: PlayerId) -> bool {
        self.inner.lock().await.sessions.get(&player_id).is_some_and(|r| r.rest_countdown.is_some())
    }

    /// Cancels the countdown if present (combat start, movement,
    /// spellcasting, or explicit cancel; spec §4.6).
    pub async fn cancel_rest(&self, player_id: PlayerId) {
        let handle = {
            let mut inner = self.inner.lock().await;
            inner.sessions.get_mut(&player_id).and_then(|r| r.rest_countdown.take())
        };
        if let Some(handle) = handle {
            handle.cancel().await;
        }
    }

    /// Completes the countdown: force-disconnects all transports and
    /// removes the session with no grace period (spec §4.6).
    pub async fn complete_rest(&self, player_id: PlayerId) {
        let transports = {
            let mut inner = self.inner.lock().await;
            if let Some(record) = inner.sessions.get_mut(&player_id) {
                record.is_intentional_disconnect = true;
            }
            let transports = inner.sessions.get(&player_id).map(|r| r.transports.clone()).unwrap_or_default();
            self.remove_session_locked(&mut inner, player_id);
            transports
        };
        for transport in transports {
            transport.close().await;
        }
    }

    pub async fn subscribe_room(&self, player_id: PlayerId, room_id: RoomId) {
        let room_id = self.room_service.canonicalize(&room_id);
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.sessions.get_mut(&player_id) {
            record.room_subscriptions.insert(room_id.clone());
        }
        inner.room_index.entry(room_id).or_default().insert(player_id);
    }

    pub async fn unsubscribe_room(&self, player_id: PlayerId, room_id: &RoomId) {
        let room_id = self.room_service.canonicalize(room_id);
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.sessions.get_mut(&player_id) {
            record.room_subscriptions.remove(&room_id);
        }
        if let Some(members) = inner.room_index.get_mut(&room_id) {
            members.remove(&player_id);
        }
    }

    /// Snapshot of transports for one player, taken without holding the
    /// lock across the subsequent I/O (spec §5).
    async fn transports_for(&self, player_id: PlayerId) -> Vec<Arc<dyn Transport>> {
        self.inner.lock().await.sessions.get(&player_id).map(|r| r.transports.clone()).unwrap_or_default()
    }

    async fn transports_for_room(&self, room_id: &RoomId, exclude: Option<PlayerId>) -> Vec<Arc<dyn Transport>> {
        let room_id = self.room_service.canonicalize(room_id);
        let inner = self.inner.lock().await;
        let Some(members) = inner.room_index.get(&room_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|p| Some(**p) != exclude)
            .filter_map(|p| inner.sessions.get(p))
            .flat_map(|r| r.transports.clone())
            .collect()
    }

    async fn transports_global(&self) -> Vec<Arc<dyn Transport>> {
        self.inner.lock().await.sessions.values().flat_map(|r| r.transports.clone()).collect()
    }

    pub async fn send_to_player(&self, player_id: PlayerId, payload: &str) -> DeliverySummary {
        deliver(self.transports_for(player_id).await, payload).await
    }

    pub async fn broadcast_to_room(&self, room_id: &RoomId, payload: &str, exclude: Option<PlayerId>) -> DeliverySummary {
        deliver(self.transports_for_room(room_id, exclude).await, payload).await
    }

    pub async fn broadcast_global(&self, payload: &str) -> DeliverySummary {
        deliver(self.transports_global().await, payload).await
    }

    /// Snapshot of currently-online players (spec invariant 2).
    pub async fn online_players(&self) -> Vec<PlayerId> {
        self.inner.lock().await.sessions.values().filter(|r| r.is_online()).map(|r| r.player_id).collect()
    }

    pub async fn online_count(&self) -> usize {
        self.online_players().await.len()
    }

    pub async fn online_summaries(&self) -> Vec<(PlayerId, String)> {
        self.inner
            .lock()
            .await
            .sessions
            .values()
            .filter(|r| r.is_online())
            .map(|r| (r.player_id, r.display_name.clone()))
            .collect()
    }

    pub async fn record_whisper(&self, recipient: PlayerId, sender: PlayerId) {
        if let Some(record) = self.inner.lock().await.sessions.get_mut(&recipient) {
            record.last_whisper_from = Some(sender);
        }
    }

    pub async fn last_whisper_from(&self, player_id: PlayerId) -> Option<PlayerId> {
        self.inner.lock().await.sessions.get(&player_id).and_then(|r| r.last_whisper_from)
    }

    /// Total number of live transports across all sessions (spec invariant 1).
    pub async fn live_transport_count(&self) -> usize {
        self.inner.lock().await.sessions.values().map(|r| r.transports.len()).sum()
    }

    #[cfg(test)]
    async fn session_exists(&self, player_id: PlayerId) -> bool {
        self.inner.lock().await.sessions.contains_key(&player_id)
    }
}

async fn deliver(transports: Vec<Arc<dyn Transport>>, payload: &str) -> DeliverySummary {
    let mut summary = DeliverySummary::default();
    for transport in transports {
        match transport.send(payload).await {
            Ok(()) => summary.success += 1,
            Err(err) => {
                tracing::warn!(error = %err, "delivery failed");
                summary.failures += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    pub struct RecordingTransport {
        pub sent: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    impl RecordingTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self { sent: Mutex::new(Vec::new()), closed: AtomicBool::new(false) })
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, payload: &str) -> Result<(), TransportError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError("closed".into()));
            }
            self.sent.lock().await.push(payload.to_string());
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingTransport;
    use super::*;

    #[tokio::test]
    async fn attach_marks_player_online() {
        let registry = SessionRegistry::new(Duration::from_millis(50), Arc::new(crate::collaborators::NoopRoomService));
        let player = PlayerId::new();
        registry.attach(player, "alice", RecordingTransport::new()).await;
        assert!(registry.online_players().await.contains(&player));
    }

    #[tokio::test]
    async fn detach_without_intentional_flag_starts_grace_then_removes() {
        let registry = SessionRegistry::new(Duration::from_millis(20), Arc::new(crate::collaborators::NoopRoomService));
        let player = PlayerId::new();
        let transport = RecordingTransport::new();
        registry.attach(player, "alice", transport.clone()).await;
        transport.close().await;
        registry.detach(player).await;
        assert!(!registry.online_players().await.contains(&player));
        assert!(registry.session_exists(player).await, "session should survive the grace period");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!registry.session_exists(player).await, "session should be gone once the grace period elapses");
    }

    #[tokio::test]
    async fn intentional_detach_removes_immediately() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(crate::collaborators::NoopRoomService));
        let player = PlayerId::new();
        let transport = RecordingTransport::new();
        registry.attach(player, "alice", transport.clone()).await;
        registry.mark_intentional(player).await;
        transport.close().await;
        registry.detach(player).await;
        assert!(!registry.online_players().await.contains(&player));
    }

    #[tokio::test]
    async fn room_broadcast_excludes_requested_player() {
        let registry = SessionRegistry::new(Duration::from_secs(30), Arc::new(crate::collaborators::NoopRoomService));
        let room = RoomId::parse("arkham_room_library").unwrap();
        let sender = PlayerId::new();
        let other = PlayerId::new();
        let sender_transport = RecordingTransport::new();
        let other_transport = RecordingTransport::new();
        registry.attach(sender, "sender", sender_transport.clone()).await;
        registry.attach(other, "other", other_transport.clone()).await;
        registry.subscribe_room(sender, room.clone()).await;
        registry.subscribe_room(other, room.clone()).await;

        registry.broadcast_to_room(&room, "hello", Some(sender)).await;
        assert!(sender_transport.sent.lock().await.is_empty());
        assert_eq!(other_transport.sent.lock().await.len(), 1);
    }
}
