use crate::error::Result;
use crate::management::comm::process_helper::PriorityTier;
use async_trait::async_trait;
use gsv_protocol::status::HostFacts;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

/// A worker process the supervisor is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub owner: Option<String>,
}

pub struct ProcessStartInfo {
    pub target: PathBuf,
    pub args: Vec<String>,
    pub envs: HashMap<OsString, OsString>,
    pub working_dir: Option<PathBuf>,
}

/// Every OS process operation the supervisor performs.
///
/// Blocking work is expected to be moved off the async runtime by the
/// implementation. `set_priority` and `priority` stay synchronous; they are
/// a single syscall each and are called from state listeners.
#[async_trait]
pub trait HostProcessControl: Send + Sync {
    fn facts(&self) -> HostFacts;

    async fn free_memory(&self) -> u64;

    /// Starts the worker detached from the supervisor.
    async fn launch(&self, info: ProcessStartInfo) -> Result<ProcessHandle>;

    /// Processes whose executable name is `binary_name`, narrowed to the ones
    /// launched with `svr_slave <slave_id>` when an id is given.
    async fn find_processes(&self, binary_name: &str, slave_id: Option<u16>)
        -> Vec<ProcessHandle>;

    async fn is_alive(&self, pid: u32) -> bool;

    async fn terminate(&self, pid: u32) -> Result<()>;

    async fn binds_udp_port(&self, pid: u32, port: u16) -> bool;

    async fn set_affinity(&self, pid: u32, cores: Vec<usize>) -> Result<()>;

    fn set_priority(&self, pid: u32, tier: PriorityTier) -> Result<()>;

    fn priority(&self, pid: u32) -> Result<PriorityTier>;
}

/// Reads `svr_slave` out of the `-execute` block of a worker command line.
pub fn slave_id_from_cmdline<S: AsRef<str>>(cmdline: &[S]) -> Option<u16> {
    let position = cmdline.iter().position(|arg| arg.as_ref() == "-execute")?;
    let params = cmdline.get(position + 1)?.as_ref();
    params
        .split(';')
        .find(|item| item.contains("svr_slave"))
        .and_then(|item| item.split(' ').next_back())
        .and_then(|value| value.trim_matches('"').parse().ok())
}
