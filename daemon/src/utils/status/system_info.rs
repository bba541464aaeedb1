use gsv_protocol::status::{HostFacts, Platform};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

pub fn get_host_facts() -> HostFacts {
    let system = System::new_with_specifics(
        RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing())
            .with_memory(MemoryRefreshKind::nothing().with_ram()),
    );

    let cpu_count = match system.cpus().len() {
        0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        n => n,
    };

    HostFacts {
        cpu_count,
        total_memory: system.total_memory(),
        free_memory: system.available_memory(),
        platform: Platform::current(),
    }
}

/// Bytes of memory currently available to new processes.
pub fn get_free_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
    sys.available_memory()
}
