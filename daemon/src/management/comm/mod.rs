mod connection;
mod process;
pub mod process_helper;

pub use connection::{ControlConnection, StopMessage, StreamConnection};
pub use process::OsHostControl;
pub use process_helper::PriorityTier;
