use crate::error::Result;
use crate::management::supervisor::{ProcessSupervisor, StartOutcome, SupervisorContext};
use futures::future::join_all;
use gsv_protocol::management::instance::StatusView;
use log::{error, info};
use std::sync::Arc;

/// All supervisors of this host, keyed by instance id.
pub struct Fleet {
    context: Arc<SupervisorContext>,
    supervisors: scc::HashMap<u16, Arc<ProcessSupervisor>>,
}

impl Fleet {
    pub fn new(context: Arc<SupervisorContext>) -> Self {
        Fleet {
            context,
            supervisors: scc::HashMap::new(),
        }
    }

    /// One supervisor per slot the host can carry. Instance ids start at 1
    /// and ports follow the id.
    pub fn build(context: Arc<SupervisorContext>) -> Result<Self> {
        let config = &context.config;
        let slots = config.effective_slots(context.facts.cpu_count)?;
        if slots < config.slots {
            info!(
                "{} slots configured, host capacity allows {}",
                config.slots, slots
            );
        }

        let fleet = Self::new(context.clone());
        for id in 1..=slots {
            let port = context.config.port_for(id)?;
            fleet.insert(ProcessSupervisor::new(id, port, context.clone()));
        }
        Ok(fleet)
    }

    pub fn context(&self) -> &Arc<SupervisorContext> {
        &self.context
    }

    /// Returns false if the id is taken.
    pub fn insert(&self, supervisor: Arc<ProcessSupervisor>) -> bool {
        self.supervisors.insert(supervisor.id(), supervisor).is_ok()
    }

    pub fn get(&self, id: u16) -> Option<Arc<ProcessSupervisor>> {
        self.supervisors.read(&id, |_, v| Arc::clone(v))
    }

    pub fn remove(&self, id: u16) -> Option<Arc<ProcessSupervisor>> {
        self.supervisors.remove(&id).map(|entry| entry.1)
    }

    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }

    fn sorted(&self) -> Vec<Arc<ProcessSupervisor>> {
        let mut all = Vec::with_capacity(self.len());
        self.supervisors.scan(|_, v| all.push(Arc::clone(v)));
        all.sort_by_key(|supervisor| supervisor.id());
        all
    }

    /// Starts every worker, then its monitor. A failed start still gets a
    /// monitor so the slot can be managed later.
    pub async fn start_all(&self) -> Vec<(u16, Result<StartOutcome>)> {
        let supervisors = self.sorted();
        let outcomes = join_all(supervisors.iter().map(|supervisor| supervisor.start())).await;

        supervisors
            .iter()
            .zip(outcomes)
            .map(|(supervisor, outcome)| {
                match &outcome {
                    Ok(outcome) => info!("GameServer #{} - {:?}", supervisor.id(), outcome),
                    Err(e) => error!("GameServer #{} - could not start: {}", supervisor.id(), e),
                }
                supervisor.run();
                (supervisor.id(), outcome)
            })
            .collect()
    }

    pub fn status_views(&self) -> Vec<StatusView> {
        self.sorted()
            .iter()
            .map(|supervisor| supervisor.status_view())
            .collect()
    }

    pub async fn shutdown(&self) {
        join_all(self.sorted().iter().map(|supervisor| supervisor.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameServerConfig;
    use crate::management::host::fake::FakeHost;
    use pretty_assertions::assert_eq;

    fn context(slots: u16, dir: &tempfile::TempDir, host: Arc<FakeHost>) -> Arc<SupervisorContext> {
        let config = GameServerConfig {
            slots,
            starting_game_port: 11000,
            ..Default::default()
        };
        Arc::new(SupervisorContext::new(config, dir.path().to_path_buf(), host))
    }

    #[test]
    fn build_caps_slots_and_assigns_ports() {
        let dir = tempfile::tempdir().unwrap();
        // 8 cores at density 1 carry 6 servers
        let fleet = Fleet::build(context(10, &dir, Arc::new(FakeHost::new()))).unwrap();
        assert_eq!(fleet.len(), 6);
        assert_eq!(fleet.get(1).unwrap().port(), 11000);
        assert_eq!(fleet.get(6).unwrap().port(), 11005);
        assert!(fleet.get(7).is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(1, &dir, Arc::new(FakeHost::new()));
        let fleet = Fleet::new(ctx.clone());
        assert!(fleet.insert(ProcessSupervisor::new(1, 11000, ctx.clone())));
        assert!(!fleet.insert(ProcessSupervisor::new(1, 11001, ctx)));
        assert!(fleet.remove(1).is_some());
        assert!(fleet.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_all_launches_each_slot() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::new());
        let fleet = Fleet::build(context(3, &dir, host.clone())).unwrap();

        let outcomes = fleet.start_all().await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, Ok(StartOutcome::Launched))));
        assert_eq!(host.with(|state| state.launches.len()), 3);

        let ids: Vec<u16> = fleet.status_views().iter().map(|view| view.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        fleet.shutdown().await;
        // workers outlive the supervisors
        assert!(host.with(|state| state.terminated.is_empty()));
    }
}
