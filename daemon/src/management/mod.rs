pub mod affinity;
pub mod comm;
pub mod config;
pub mod host;
pub mod ledger;
pub mod manager;
pub mod priority;
pub mod state;
pub mod supervisor;
pub mod version;

pub use host::{HostProcessControl, ProcessHandle};
pub use manager::Fleet;
pub use supervisor::{ProcessSupervisor, StartOutcome, SupervisorContext};
