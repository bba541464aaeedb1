use crate::config::GameServerConfig;
use crate::error::{Result, SupervisorError};
use crate::management::affinity::AffinityPlan;
use crate::management::comm::{ControlConnection, PriorityTier, StopMessage};
use crate::management::config::InstanceConfig;
use crate::management::host::{HostProcessControl, ProcessHandle};
use crate::management::ledger::PerformanceLedger;
use crate::management::priority::PriorityController;
use crate::management::state::StateStore;
use gsv_protocol::management::instance::{InstanceStatus, StatusView};
use gsv_protocol::status::HostFacts;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const MONITOR_INTERVAL: Duration = Duration::from_secs(5);
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// A worker uses up to 1 GiB of memory.
pub const MIN_FREE_MEMORY: u64 = 1 << 30;

/// Everything a supervisor needs from its surroundings.
pub struct SupervisorContext {
    pub config: GameServerConfig,
    pub host: Arc<dyn HostProcessControl>,
    pub facts: HostFacts,
    pub data_dir: PathBuf,
}

impl SupervisorContext {
    pub fn new(
        config: GameServerConfig,
        data_dir: PathBuf,
        host: Arc<dyn HostProcessControl>,
    ) -> Self {
        let facts = host.facts();
        Self {
            config,
            host,
            facts,
            data_dir,
        }
    }
}

/// The worker bound to an instance. The pid lives inside the handle, so
/// both are set and cleared together.
#[derive(Default)]
pub struct ProcessSlot {
    handle: Mutex<Option<ProcessHandle>>,
}

impl ProcessSlot {
    pub fn get(&self) -> Option<ProcessHandle> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.get().map(|handle| handle.pid)
    }

    pub fn bind(&self, handle: ProcessHandle) {
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn clear(&self) -> Option<ProcessHandle> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Launched,
    Adopted,
}

/// Keeps one game-server worker alive on its port.
pub struct ProcessSupervisor {
    id: u16,
    port: u16,
    context: Arc<SupervisorContext>,
    instance: InstanceConfig,
    plan: Option<AffinityPlan>,
    state: Arc<StateStore>,
    slot: Arc<ProcessSlot>,
    ledger: PerformanceLedger,
    started: AtomicBool,
    monitoring: AtomicBool,
    starting: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessSupervisor {
    pub fn new(id: u16, port: u16, context: Arc<SupervisorContext>) -> Arc<Self> {
        let plan = match AffinityPlan::new(context.facts.cpu_count, context.config.density) {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!("GameServer #{} - no affinity plan: {}", id, e);
                None
            }
        };
        let instance = InstanceConfig::for_slot(id, port, &context.config, plan.as_ref());
        Self::with_instance(instance, plan, context)
    }

    pub fn with_instance(
        instance: InstanceConfig,
        plan: Option<AffinityPlan>,
        context: Arc<SupervisorContext>,
    ) -> Arc<Self> {
        let (id, port) = (instance.id, instance.port);
        let state = Arc::new(StateStore::new());
        let slot = Arc::new(ProcessSlot::default());

        let ledger = PerformanceLedger::new(&context.data_dir, id);
        if let Err(e) = ledger.load(&state, false) {
            warn!(
                "GameServer #{} - could not load {}, counters start at zero: {}",
                id,
                ledger.path().display(),
                e
            );
        }
        PriorityController::new(id, context.host.clone(), slot.clone()).register(&state);

        Arc::new(Self {
            id,
            port,
            context,
            instance,
            plan,
            state,
            slot,
            ledger,
            started: AtomicBool::new(false),
            monitoring: AtomicBool::new(false),
            starting: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn instance(&self) -> &InstanceConfig {
        &self.instance
    }

    pub fn pid(&self) -> Option<u32> {
        self.slot.pid()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn host(&self) -> &dyn HostProcessControl {
        self.context.host.as_ref()
    }

    /// Adopts a running worker or launches a new one.
    ///
    /// Calls are serialized. A live worker already bound to the slot counts as
    /// adopted.
    pub async fn start(&self) -> Result<StartOutcome> {
        let _starting = self.starting.lock().await;
        if let Some(handle) = self.slot.get() {
            if self.host().is_alive(handle.pid).await {
                return Ok(StartOutcome::Adopted);
            }
        }
        if self.get_running_server().await {
            return Ok(StartOutcome::Adopted);
        }

        let free = self.host().free_memory().await;
        if free < MIN_FREE_MEMORY {
            return Err(SupervisorError::ResourceExhausted {
                id: self.id,
                free,
                required: MIN_FREE_MEMORY,
            });
        }

        let info = self
            .instance
            .start_info(&self.context.config, self.context.facts.platform);
        debug!(
            "GameServer #{} - launching {} {}",
            self.id,
            info.target.display(),
            info.args.join(" ")
        );
        let handle = self.host().launch(info).await?;
        info!("GameServer #{} - started with pid {}", self.id, handle.pid);

        let pid = handle.pid;
        self.slot.bind(handle);
        self.started.store(true, Ordering::SeqCst);
        self.pin_affinity(pid).await;
        Ok(StartOutcome::Launched)
    }

    /// Looks for a worker already serving this instance and adopts it.
    ///
    /// An active instance trusts the first match. Otherwise only the process
    /// holding the instance port is kept and the other matches are
    /// terminated.
    pub async fn get_running_server(&self) -> bool {
        let candidates = self
            .host()
            .find_processes(&self.instance.binary_file_name, self.instance.slave_id())
            .await;
        if candidates.is_empty() {
            return false;
        }

        let chosen = if self.state.status() == InstanceStatus::Active {
            candidates.into_iter().next()
        } else {
            let mut chosen = None;
            for candidate in candidates {
                if self.host().binds_udp_port(candidate.pid, self.port).await {
                    if chosen.is_none() {
                        chosen = Some(candidate);
                    }
                    continue;
                }
                match self.host().terminate(candidate.pid).await {
                    Ok(()) => info!(
                        "GameServer #{} - terminated stray process {}",
                        self.id, candidate.pid
                    ),
                    Err(e) => warn!(
                        "GameServer #{} - could not terminate stray process {}: {}",
                        self.id, candidate.pid, e
                    ),
                }
            }
            chosen
        };

        let Some(handle) = chosen else {
            return false;
        };
        info!(
            "GameServer #{} - adopted running process {} (owner: {})",
            self.id,
            handle.pid,
            handle.owner.as_deref().unwrap_or("unknown")
        );
        let pid = handle.pid;
        self.slot.bind(handle);
        self.started.store(true, Ordering::SeqCst);
        self.pin_affinity(pid).await;
        true
    }

    async fn pin_affinity(&self, pid: u32) {
        if !self.context.config.override_affinity {
            return;
        }
        let cores = match &self.plan {
            Some(plan) => plan.core_set(self.id as usize),
            None => return,
        };
        let result = match cores {
            Ok(cores) => self.host().set_affinity(pid, cores).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("GameServer #{} - affinity not applied: {}", self.id, e);
        }
    }

    /// Spawns the liveness monitor. Only the first call has an effect.
    pub fn run(self: &Arc<Self>) {
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                this.check_liveness().await;
                select! {
                    _ = this.cancel.cancelled() => break,
                    _ = tokio::time::sleep(MONITOR_INTERVAL) => {}
                }
            }
            debug!("GameServer #{} - monitor stopped", this.id);
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Restarts the worker once if the bound process has died.
    pub async fn check_liveness(&self) {
        let Some(handle) = self.slot.get() else {
            return;
        };
        if self.host().is_alive(handle.pid).await {
            return;
        }

        self.slot.clear();
        self.started.store(false, Ordering::SeqCst);
        warn!(
            "GameServer #{} - process {} is gone, restarting",
            self.id, handle.pid
        );
        if let Err(e) = self.start().await {
            error!("GameServer #{} - restart failed: {}", self.id, e);
        }
    }

    /// Waits for the instance to empty, then sends `message`.
    ///
    /// Returns `Ok(false)` when the supervisor is shut down first.
    pub async fn schedule_shutdown<C>(&self, conn: &mut C, message: &StopMessage) -> Result<bool>
    where
        C: ControlConnection + ?Sized,
    {
        loop {
            if self.state.num_clients().unwrap_or(0) == 0 {
                // a stalled control socket must not outlive the supervisor
                return select! {
                    _ = self.cancel.cancelled() => Ok(false),
                    sent = self.stop(conn, message) => sent,
                };
            }
            select! {
                _ = self.cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {}
            }
        }
    }

    pub fn spawn_shutdown<C>(self: &Arc<Self>, mut conn: C, message: StopMessage)
    where
        C: ControlConnection + 'static,
    {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match this.schedule_shutdown(&mut conn, &message).await {
                Ok(true) => {}
                Ok(false) => debug!("GameServer #{} - drain abandoned", this.id),
                Err(e) => warn!("GameServer #{} - stop request failed: {}", this.id, e),
            }
        });
        self.track(handle);
    }

    /// Sends the stop request if nobody is connected. Returns whether it was
    /// sent.
    pub async fn stop<C>(&self, conn: &mut C, message: &StopMessage) -> Result<bool>
    where
        C: ControlConnection + ?Sized,
    {
        if self.state.num_clients().unwrap_or(0) != 0 {
            return Ok(false);
        }
        info!("GameServer #{} - Stopping", self.id);
        conn.write(&message.length);
        conn.write(&message.body);
        conn.drain().await?;
        Ok(true)
    }

    pub fn status_view(&self) -> StatusView {
        StatusView::new(self.id, self.port, &self.state.snapshot())
    }

    pub fn priority(&self) -> Result<PriorityTier> {
        let pid = self.slot.pid().ok_or_else(|| {
            SupervisorError::State(format!("GameServer #{} has no bound process", self.id))
        })?;
        self.host().priority(pid)
    }

    /// Adds the stored counters of the current match back after a restart.
    pub fn resume_match_counters(&self) -> Result<()> {
        self.ledger.load(&self.state, true)
    }

    pub fn save_ledger(&self) -> Result<()> {
        self.ledger.save(&self.state)
    }

    /// Stops the monitor and any pending drain. The worker keeps running.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("GameServer #{} - task ended abnormally: {}", self.id, e);
            }
        }
        if let Err(e) = self.save_ledger() {
            warn!("GameServer #{} - could not save counters: {}", self.id, e);
        }
        debug!("GameServer #{} - supervisor shut down", self.id);
    }
}
