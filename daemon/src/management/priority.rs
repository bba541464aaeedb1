use crate::error::{Result, SupervisorError};
use crate::management::comm::PriorityTier;
use crate::management::host::HostProcessControl;
use crate::management::state::{StateKey, StateStore, StateValue};
use crate::management::supervisor::ProcessSlot;
use log::{debug, info, warn};
use std::sync::Arc;

/// Priority tier a state transition asks for, if any.
pub fn transition_tier(key: StateKey, value: &StateValue) -> Option<PriorityTier> {
    match (key, value.as_int()) {
        (StateKey::MatchStarted, Some(0)) => Some(PriorityTier::Idle),
        (StateKey::MatchStarted, Some(1)) => Some(PriorityTier::High),
        _ => None,
    }
}

/// Moves the bound worker between scheduling tiers as matches start and end.
pub struct PriorityController {
    id: u16,
    host: Arc<dyn HostProcessControl>,
    slot: Arc<ProcessSlot>,
}

impl PriorityController {
    pub fn new(id: u16, host: Arc<dyn HostProcessControl>, slot: Arc<ProcessSlot>) -> Self {
        Self { id, host, slot }
    }

    /// Subscribes to `state`. Returns the listener id.
    pub fn register(self, state: &Arc<StateStore>) -> u64 {
        let state_ref = Arc::downgrade(state);
        state.add_listener(move |key, value| {
            let match_id = state_ref
                .upgrade()
                .and_then(|state| state.current_match_id());
            self.on_state_change(key, &value, match_id.as_deref());
        })
    }

    pub fn on_state_change(&self, key: StateKey, value: &StateValue, match_id: Option<&str>) {
        let Some(tier) = transition_tier(key, value) else {
            return;
        };
        if tier == PriorityTier::High {
            info!(
                "GameServer #{} - Game Started: {}",
                self.id,
                match_id.unwrap_or("unknown")
            );
        }
        if let Err(e) = self.apply(tier) {
            warn!("GameServer #{} - priority change to {:?} failed: {}", self.id, tier, e);
        }
    }

    fn apply(&self, tier: PriorityTier) -> Result<()> {
        let handle = self.slot.get().ok_or_else(|| {
            SupervisorError::State(format!("GameServer #{} has no bound process", self.id))
        })?;
        self.host.set_priority(handle.pid, tier)?;
        debug!(
            "GameServer #{} - pid {} moved to {:?} priority",
            self.id, handle.pid, tier
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::host::fake::FakeHost;
    use crate::management::host::ProcessHandle;
    use pretty_assertions::assert_eq;

    fn setup(bound: bool) -> (Arc<FakeHost>, Arc<StateStore>) {
        let host = Arc::new(FakeHost::new());
        let slot = Arc::new(ProcessSlot::default());
        if bound {
            slot.bind(ProcessHandle {
                pid: 77,
                owner: None,
            });
        }
        let state = Arc::new(StateStore::new());
        PriorityController::new(1, host.clone(), slot).register(&state);
        (host, state)
    }

    #[test]
    fn match_transitions_follow_state_order() {
        let (host, state) = setup(true);
        state.set(StateKey::MatchStarted, 0u8.into()).unwrap();
        state.set(StateKey::MatchStarted, 1u8.into()).unwrap();
        state.set(StateKey::MatchStarted, 1u8.into()).unwrap();
        state.set(StateKey::MatchStarted, 0u8.into()).unwrap();
        assert_eq!(
            host.with(|s| s.priorities.clone()),
            vec![
                (77, PriorityTier::Idle),
                (77, PriorityTier::High),
                (77, PriorityTier::Idle)
            ]
        );
    }

    #[test]
    fn unbound_slot_is_swallowed() {
        let (host, state) = setup(false);
        state.set(StateKey::MatchStarted, 1u8.into()).unwrap();
        assert!(host.with(|s| s.priorities.is_empty()));
    }

    #[test]
    fn other_keys_are_ignored() {
        assert_eq!(transition_tier(StateKey::NumClients, &0u32.into()), None);
        assert_eq!(transition_tier(StateKey::MatchStarted, &"1".into()), None);
        assert_eq!(
            transition_tier(StateKey::MatchStarted, &1u8.into()),
            Some(PriorityTier::High)
        );
    }
}
