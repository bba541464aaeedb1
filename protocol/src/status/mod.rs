mod system_info;

pub use system_info::{HostFacts, Platform};
