mod performance;
mod report;
mod state;
mod status;

pub use performance::{MatchPerformance, PerformanceCounters, PerformanceRecord};
pub use report::{format_uptime, StatusView};
pub use state::{InstanceState, Player, StateSnapshot};
pub use status::{GamePhase, InstanceStatus};
