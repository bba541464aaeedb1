use crate::error::{Result, SupervisorError};
use crate::event_decl;
use gsv_protocol::management::instance::{
    GamePhase, InstanceState, InstanceStatus, PerformanceCounters, Player, StateSnapshot,
};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

/// Closed set of state attributes. Anything else is rejected rather than
/// silently created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Status,
    Uptime,
    NumClients,
    MatchStarted,
    GamePhase,
    CurrentMatchId,
    Players,
    GrandtotalSkippedFrames,
    TotalIngameSkippedFrames,
    NowIngameSkippedFrames,
}

impl StateKey {
    /// Keys whose changes are published to listeners.
    pub const MONITORED: &'static [StateKey] = &[StateKey::MatchStarted];

    pub fn name(&self) -> &'static str {
        match self {
            StateKey::Status => "status",
            StateKey::Uptime => "uptime",
            StateKey::NumClients => "num_clients",
            StateKey::MatchStarted => "match_started",
            StateKey::GamePhase => "game_phase",
            StateKey::CurrentMatchId => "current_match_id",
            StateKey::Players => "players",
            StateKey::GrandtotalSkippedFrames => "grandtotal_skipped_frames",
            StateKey::TotalIngameSkippedFrames => "total_ingame_skipped_frames",
            StateKey::NowIngameSkippedFrames => "now_ingame_skipped_frames",
        }
    }

    pub fn is_monitored(&self) -> bool {
        Self::MONITORED.contains(self)
    }

    pub fn is_performance(&self) -> bool {
        matches!(
            self,
            StateKey::GrandtotalSkippedFrames
                | StateKey::TotalIngameSkippedFrames
                | StateKey::NowIngameSkippedFrames
        )
    }
}

impl FromStr for StateKey {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self> {
        let key = match s {
            "status" => StateKey::Status,
            "uptime" => StateKey::Uptime,
            "num_clients" => StateKey::NumClients,
            "match_started" => StateKey::MatchStarted,
            "game_phase" | "game_state_phase" => StateKey::GamePhase,
            "current_match_id" => StateKey::CurrentMatchId,
            "players" => StateKey::Players,
            "grandtotal_skipped_frames" => StateKey::GrandtotalSkippedFrames,
            "total_ingame_skipped_frames" => StateKey::TotalIngameSkippedFrames,
            "now_ingame_skipped_frames" => StateKey::NowIngameSkippedFrames,
            other => return Err(SupervisorError::StateKey(other.to_owned())),
        };
        Ok(key)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Status(InstanceStatus),
    Phase(GamePhase),
    Int(u64),
    Text(String),
    Players(Vec<Player>),
}

impl StateValue {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            StateValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<u64> for StateValue {
    fn from(value: u64) -> Self {
        StateValue::Int(value)
    }
}

impl From<u32> for StateValue {
    fn from(value: u32) -> Self {
        StateValue::Int(value.into())
    }
}

impl From<u8> for StateValue {
    fn from(value: u8) -> Self {
        StateValue::Int(value.into())
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl From<InstanceStatus> for StateValue {
    fn from(value: InstanceStatus) -> Self {
        StateValue::Status(value)
    }
}

impl From<GamePhase> for StateValue {
    fn from(value: GamePhase) -> Self {
        StateValue::Phase(value)
    }
}

impl From<Vec<Player>> for StateValue {
    fn from(value: Vec<Player>) -> Self {
        StateValue::Players(value)
    }
}

event_decl!(StateChangedEvent, key: StateKey, value: StateValue);

/// In-memory state of one instance.
///
/// Writes to a monitored key publish `(key, value)` to every listener, in
/// registration order, before [`StateStore::set`] returns. The state lock is
/// released before listeners run, so listeners may read the store.
pub struct StateStore {
    state: Mutex<InstanceState>,
    changed: StateChangedEvent,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InstanceState::default()),
            changed: StateChangedEvent::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_listener<F>(&self, callback: F) -> u64
    where
        F: Fn(StateKey, StateValue) + Send + Sync + 'static,
    {
        self.changed.add_listener(callback)
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        self.changed.remove_listener(id)
    }

    pub fn set(&self, key: StateKey, value: StateValue) -> Result<()> {
        let changed = {
            let mut state = self.lock();
            let previous = read_field(&state, key);
            write_field(&mut state, key, value.clone())?;
            previous.as_ref() != Some(&value)
        };

        if key.is_monitored() && changed {
            self.changed.invoke(key, value);
        }
        Ok(())
    }

    /// Overwrites a known attribute without publishing anything.
    pub fn update(&self, name: &str, value: StateValue) -> Result<()> {
        let key = name.parse::<StateKey>()?;
        write_field(&mut self.lock(), key, value)
    }

    /// Flat attributes and performance counters share one namespace, so a
    /// single lookup covers both. Unknown or unset keys yield `default`.
    pub fn get(&self, name: &str, default: StateValue) -> StateValue {
        name.parse::<StateKey>()
            .ok()
            .and_then(|key| read_field(&self.lock(), key))
            .unwrap_or(default)
    }

    /// Applies a telemetry refresh field by field. Only monitored keys can
    /// publish, and only when their value actually changes.
    pub fn apply(&self, snapshot: StateSnapshot) -> Result<()> {
        let StateSnapshot {
            status,
            uptime,
            num_clients,
            match_started,
            game_phase,
            current_match_id,
            players,
        } = snapshot;

        let fields = [
            (StateKey::Status, status.map(StateValue::from)),
            (StateKey::Uptime, uptime.map(StateValue::from)),
            (StateKey::NumClients, num_clients.map(StateValue::from)),
            (StateKey::GamePhase, game_phase.map(StateValue::from)),
            (StateKey::CurrentMatchId, current_match_id.map(StateValue::from)),
            (StateKey::Players, players.map(StateValue::from)),
            (StateKey::MatchStarted, match_started.map(StateValue::from)),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                self.set(key, value)?;
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> InstanceState {
        self.lock().clone()
    }

    pub fn status(&self) -> InstanceStatus {
        self.lock().status
    }

    pub fn num_clients(&self) -> Option<u32> {
        self.lock().num_clients
    }

    pub fn match_started(&self) -> Option<u8> {
        self.lock().match_started
    }

    pub fn current_match_id(&self) -> Option<String> {
        self.lock().current_match_id.clone()
    }

    pub fn performance(&self) -> PerformanceCounters {
        self.lock().performance
    }

    pub fn update_performance<R>(&self, f: impl FnOnce(&mut PerformanceCounters) -> R) -> R {
        f(&mut self.lock().performance)
    }

    pub fn increment_skipped_frames(&self, frames: u64) {
        self.update_performance(|perf| {
            perf.grandtotal_skipped_frames += frames;
            perf.total_ingame_skipped_frames += frames;
            perf.now_ingame_skipped_frames += frames;
        });
    }

    pub fn reset_skipped_frames(&self) {
        self.update_performance(|perf| perf.now_ingame_skipped_frames = 0);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read_field(state: &InstanceState, key: StateKey) -> Option<StateValue> {
    match key {
        StateKey::Status => match state.status {
            InstanceStatus::Unknown => None,
            status => Some(StateValue::Status(status)),
        },
        StateKey::Uptime => state.uptime.map(StateValue::from),
        StateKey::NumClients => state.num_clients.map(StateValue::from),
        StateKey::MatchStarted => state.match_started.map(StateValue::from),
        StateKey::GamePhase => state.game_phase.map(StateValue::from),
        StateKey::CurrentMatchId => state.current_match_id.clone().map(StateValue::from),
        StateKey::Players => Some(StateValue::Players(state.players.clone())),
        StateKey::GrandtotalSkippedFrames => {
            Some(state.performance.grandtotal_skipped_frames.into())
        }
        StateKey::TotalIngameSkippedFrames => {
            Some(state.performance.total_ingame_skipped_frames.into())
        }
        StateKey::NowIngameSkippedFrames => Some(state.performance.now_ingame_skipped_frames.into()),
    }
}

fn write_field(state: &mut InstanceState, key: StateKey, value: StateValue) -> Result<()> {
    let mismatch = || SupervisorError::StateValue(key.name());

    match (key, value) {
        (StateKey::Status, StateValue::Status(status)) => state.status = status,
        (StateKey::Status, StateValue::Int(code)) => {
            state.status = InstanceStatus::from_code(code as i64)
        }
        (StateKey::Uptime, StateValue::Int(uptime)) => state.uptime = Some(uptime),
        (StateKey::NumClients, StateValue::Int(count)) => {
            state.num_clients = Some(u32::try_from(count).map_err(|_| mismatch())?)
        }
        (StateKey::MatchStarted, StateValue::Int(flag)) if flag <= 1 => {
            state.match_started = Some(flag as u8)
        }
        (StateKey::GamePhase, StateValue::Phase(phase)) => state.game_phase = Some(phase),
        (StateKey::GamePhase, StateValue::Int(code)) => {
            state.game_phase = Some(GamePhase::from_code(code as i64))
        }
        (StateKey::CurrentMatchId, StateValue::Text(match_id)) => {
            if state.current_match_id.as_deref() != Some(match_id.as_str()) {
                // a new match starts its own per-match counter
                state.performance.now_ingame_skipped_frames = 0;
            }
            state.current_match_id = Some(match_id);
        }
        (StateKey::CurrentMatchId, StateValue::Int(match_id)) => {
            return write_field(state, key, StateValue::Text(match_id.to_string()));
        }
        (StateKey::Players, StateValue::Players(players)) => state.players = players,
        (StateKey::GrandtotalSkippedFrames, StateValue::Int(frames)) => {
            state.performance.grandtotal_skipped_frames = frames
        }
        (StateKey::TotalIngameSkippedFrames, StateValue::Int(frames)) => {
            state.performance.total_ingame_skipped_frames = frames
        }
        (StateKey::NowIngameSkippedFrames, StateValue::Int(frames)) => {
            state.performance.now_ingame_skipped_frames = frames
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_store() -> (StateStore, Arc<AtomicUsize>) {
        let store = StateStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        store.add_listener(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        (store, calls)
    }

    #[test]
    fn unmonitored_keys_never_notify() {
        let (store, calls) = counting_store();
        store.set(StateKey::NumClients, 4u32.into()).unwrap();
        store.set(StateKey::NumClients, 5u32.into()).unwrap();
        store.set(StateKey::Status, InstanceStatus::Active.into()).unwrap();
        store.set(StateKey::CurrentMatchId, "12".into()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn match_started_notifies_on_change_only() {
        let (store, calls) = counting_store();
        store.set(StateKey::MatchStarted, 0u8.into()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        store.set(StateKey::MatchStarted, 0u8.into()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        store.set(StateKey::MatchStarted, 1u8.into()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listeners_see_committed_value() {
        let store = Arc::new(StateStore::new());
        let seen = Arc::new(AtomicUsize::new(99));
        let (store_clone, seen_clone) = (Arc::clone(&store), Arc::clone(&seen));
        store.add_listener(move |key, value| {
            assert_eq!(key, StateKey::MatchStarted);
            assert_eq!(value.as_int(), Some(1));
            let stored = store_clone.match_started().unwrap_or(7);
            seen_clone.store(stored as usize, Ordering::SeqCst);
        });
        store.set(StateKey::MatchStarted, 1u8.into()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_rejects_unknown_keys() {
        let store = StateStore::new();
        let err = store.update("match_startd", 1u8.into()).unwrap_err();
        assert!(matches!(err, SupervisorError::StateKey(name) if name == "match_startd"));
        assert!(store.update("num_clients", 3u32.into()).is_ok());
        assert_eq!(store.num_clients(), Some(3));
    }

    #[test]
    fn update_does_not_notify() {
        let (store, calls) = counting_store();
        store.update("match_started", 1u8.into()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.match_started(), Some(1));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let store = StateStore::new();
        assert!(matches!(
            store.set(StateKey::Players, 3u32.into()),
            Err(SupervisorError::StateValue("players"))
        ));
        assert!(store.set(StateKey::MatchStarted, 2u8.into()).is_err());
    }

    #[test]
    fn get_falls_back_to_default() {
        let store = StateStore::new();
        store.increment_skipped_frames(40);
        assert_eq!(
            store.get("grandtotal_skipped_frames", StateValue::Int(0)),
            StateValue::Int(40)
        );
        assert_eq!(store.get("uptime", StateValue::Int(7)), StateValue::Int(7));
        assert_eq!(store.get("nonsense", StateValue::Int(7)), StateValue::Int(7));
    }

    #[test]
    fn apply_publishes_only_monitored_changes() {
        let (store, calls) = counting_store();
        let snapshot = StateSnapshot {
            status: Some(InstanceStatus::Active),
            num_clients: Some(6),
            match_started: Some(1),
            current_match_id: Some("55".into()),
            ..Default::default()
        };
        store.apply(snapshot.clone()).unwrap();
        store.apply(snapshot).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.status(), InstanceStatus::Active);
        assert_eq!(store.current_match_id().as_deref(), Some("55"));
    }

    #[test]
    fn new_match_resets_current_counter() {
        let store = StateStore::new();
        store.set(StateKey::CurrentMatchId, "1".into()).unwrap();
        store.increment_skipped_frames(30);
        store.set(StateKey::CurrentMatchId, "1".into()).unwrap();
        assert_eq!(store.performance().now_ingame_skipped_frames, 30);

        store.set(StateKey::CurrentMatchId, 2u64.into()).unwrap();
        let perf = store.performance();
        assert_eq!(perf.now_ingame_skipped_frames, 0);
        assert_eq!(perf.total_ingame_skipped_frames, 30);
        assert!(perf.grandtotal_skipped_frames >= perf.total_ingame_skipped_frames);
    }
}
