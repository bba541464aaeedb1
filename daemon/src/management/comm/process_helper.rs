use crate::error::{Result, SupervisorError};
#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use std::io;
#[cfg(windows)]
use winapi::shared::minwindef::{DWORD, FALSE};
#[cfg(windows)]
use winapi::um::handleapi::CloseHandle;
#[cfg(windows)]
use winapi::um::processthreadsapi::{
    GetPriorityClass, OpenProcess, SetPriorityClass, TerminateProcess,
};
#[cfg(windows)]
use winapi::um::winbase::{
    ABOVE_NORMAL_PRIORITY_CLASS, BELOW_NORMAL_PRIORITY_CLASS, HIGH_PRIORITY_CLASS,
    IDLE_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS, REALTIME_PRIORITY_CLASS, SetProcessAffinityMask,
};
#[cfg(windows)]
use winapi::um::winnt::{
    HANDLE, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SET_INFORMATION, PROCESS_TERMINATE,
};

/// OS scheduling tiers a worker can be moved between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityTier {
    Idle,
    Normal,
    High,
    Realtime,
}

impl PriorityTier {
    /// Unix nice value used for the tier.
    pub fn nice(&self) -> i32 {
        match self {
            PriorityTier::Idle => 19,
            PriorityTier::Normal => 0,
            PriorityTier::High => -10,
            PriorityTier::Realtime => -20,
        }
    }

    pub fn from_nice(nice: i32) -> Self {
        match nice {
            i32::MIN..=-20 => PriorityTier::Realtime,
            -19..=-5 => PriorityTier::High,
            -4..=9 => PriorityTier::Normal,
            _ => PriorityTier::Idle,
        }
    }
}

pub struct ProcessHelper;

impl ProcessHelper {
    /// Sends SIGTERM to the process with the given ID (Unix) or terminates it (Windows).
    pub fn stop(pid: u32) -> io::Result<()> {
        #[cfg(unix)]
        {
            let pid = Pid::from_raw(pid as i32);
            kill(pid, Signal::SIGTERM).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Ok(())
        }
        #[cfg(windows)]
        {
            let handle = open_process(pid, PROCESS_TERMINATE)?;
            let result = unsafe { TerminateProcess(handle, 1) };
            close_with_result(handle, result != 0)
        }
        #[cfg(not(any(unix, windows)))]
        {
            let _ = pid;
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "process termination is not supported on this platform",
            ))
        }
    }

    pub fn set_priority(pid: u32, tier: PriorityTier) -> Result<()> {
        #[cfg(unix)]
        {
            let result =
                unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, tier.nice()) };
            if result != 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(())
        }
        #[cfg(windows)]
        {
            let class = match tier {
                PriorityTier::Idle => IDLE_PRIORITY_CLASS,
                PriorityTier::Normal => NORMAL_PRIORITY_CLASS,
                PriorityTier::High => HIGH_PRIORITY_CLASS,
                PriorityTier::Realtime => REALTIME_PRIORITY_CLASS,
            };
            let handle = open_process(pid, PROCESS_SET_INFORMATION)?;
            let result = unsafe { SetPriorityClass(handle, class) };
            Ok(close_with_result(handle, result != 0)?)
        }
        #[cfg(not(any(unix, windows)))]
        {
            let _ = (pid, tier);
            Err(SupervisorError::unsupported("priority adjustment"))
        }
    }

    pub fn priority(pid: u32) -> Result<PriorityTier> {
        #[cfg(target_os = "linux")]
        {
            let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid))?;
            // the command name is parenthesised and may contain spaces
            let fields: Vec<&str> = stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.split_whitespace().collect())
                .unwrap_or_default();
            let nice = fields
                .get(16)
                .and_then(|nice| nice.parse::<i32>().ok())
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "malformed /proc stat line")
                })?;
            Ok(PriorityTier::from_nice(nice))
        }
        #[cfg(windows)]
        {
            let handle = open_process(pid, PROCESS_QUERY_LIMITED_INFORMATION)?;
            let class = unsafe { GetPriorityClass(handle) };
            close_with_result(handle, class != 0)?;
            Ok(match class {
                IDLE_PRIORITY_CLASS | BELOW_NORMAL_PRIORITY_CLASS => PriorityTier::Idle,
                HIGH_PRIORITY_CLASS => PriorityTier::High,
                REALTIME_PRIORITY_CLASS => PriorityTier::Realtime,
                ABOVE_NORMAL_PRIORITY_CLASS | NORMAL_PRIORITY_CLASS => PriorityTier::Normal,
                _ => PriorityTier::Normal,
            })
        }
        #[cfg(not(any(target_os = "linux", windows)))]
        {
            let _ = pid;
            Err(SupervisorError::unsupported("priority query"))
        }
    }

    pub fn set_affinity(pid: u32, cores: &[usize]) -> Result<()> {
        if cores.is_empty() {
            return Err(SupervisorError::ConfigValidation(
                "empty core set".to_owned(),
            ));
        }
        #[cfg(target_os = "linux")]
        {
            use nix::sched::{sched_setaffinity, CpuSet};

            let mut set = CpuSet::new();
            for core in cores {
                set.set(*core)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            }
            sched_setaffinity(Pid::from_raw(pid as i32), &set)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Ok(())
        }
        #[cfg(windows)]
        {
            let mask = cores
                .iter()
                .filter(|core| **core < usize::BITS as usize)
                .fold(0usize, |mask, core| mask | (1usize << core));
            let handle = open_process(pid, PROCESS_SET_INFORMATION)?;
            let result = unsafe { SetProcessAffinityMask(handle, mask) };
            Ok(close_with_result(handle, result != 0)?)
        }
        #[cfg(not(any(target_os = "linux", windows)))]
        {
            let _ = pid;
            Err(SupervisorError::unsupported("cpu affinity"))
        }
    }

    /// Whether `pid` holds a UDP socket on `port`.
    ///
    /// Only Linux exposes socket ownership cheaply; elsewhere this reports
    /// whether anyone holds the port.
    pub fn binds_udp_port(pid: u32, port: u16) -> bool {
        #[cfg(target_os = "linux")]
        {
            let inodes = udp_socket_inodes(port);
            if inodes.is_empty() {
                return false;
            }
            let Ok(entries) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
                // not ours to inspect, fall back to the port itself
                return true;
            };
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| std::fs::read_link(entry.path()).ok())
                .filter_map(|target| socket_inode(&target.to_string_lossy()))
                .any(|inode| inodes.contains(&inode))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = pid;
            Self::udp_port_in_use(port)
        }
    }

    pub fn udp_port_in_use(port: u16) -> bool {
        match std::net::UdpSocket::bind(("0.0.0.0", port)) {
            Ok(_) => false,
            Err(e) => e.kind() == io::ErrorKind::AddrInUse,
        }
    }
}

#[cfg(target_os = "linux")]
fn udp_socket_inodes(port: u16) -> std::collections::HashSet<u64> {
    ["/proc/net/udp", "/proc/net/udp6"]
        .iter()
        .filter_map(|table| std::fs::read_to_string(table).ok())
        .flat_map(|content| {
            content
                .lines()
                .skip(1)
                .filter_map(|line| parse_udp_line(line, port))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// `sl local_address rem_address st ... inode`, ports in hex.
#[cfg(any(target_os = "linux", test))]
fn parse_udp_line(line: &str, port: u16) -> Option<u64> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    let local_port = columns.get(1)?.rsplit_once(':')?.1;
    if u16::from_str_radix(local_port, 16).ok()? != port {
        return None;
    }
    columns.get(9)?.parse::<u64>().ok().filter(|inode| *inode != 0)
}

#[cfg(any(target_os = "linux", test))]
fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

#[cfg(windows)]
fn open_process(pid: u32, access: DWORD) -> io::Result<HANDLE> {
    let handle = unsafe { OpenProcess(access, FALSE, pid) };
    if handle.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(handle)
}

#[cfg(windows)]
fn close_with_result(handle: HANDLE, ok: bool) -> io::Result<()> {
    let error = (!ok).then(io::Error::last_os_error);
    unsafe { CloseHandle(handle) };
    match error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_tiers_round_trip() {
        for tier in [
            PriorityTier::Idle,
            PriorityTier::Normal,
            PriorityTier::High,
            PriorityTier::Realtime,
        ] {
            assert_eq!(PriorityTier::from_nice(tier.nice()), tier);
        }
        assert_eq!(PriorityTier::from_nice(5), PriorityTier::Normal);
    }

    #[test]
    fn udp_table_lines() {
        let line = "  412: 00000000:2711 00000000:0000 07 00000000:00000000 00:00000000 00000000  1000        0 88123 2 0000000000000000 0";
        assert_eq!(parse_udp_line(line, 10001), Some(88123));
        assert_eq!(parse_udp_line(line, 10002), None);
    }

    #[test]
    fn socket_links() {
        assert_eq!(socket_inode("socket:[88123]"), Some(88123));
        assert_eq!(socket_inode("pipe:[12]"), None);
        assert_eq!(socket_inode("/dev/null"), None);
    }

    #[test]
    fn bound_udp_port_is_in_use() {
        let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).unwrap();
        let port = socket.local_addr().unwrap().port();
        assert!(ProcessHelper::udp_port_in_use(port));
        #[cfg(target_os = "linux")]
        assert!(ProcessHelper::binds_udp_port(std::process::id(), port));
        drop(socket);
    }

    #[test]
    fn empty_core_set_is_rejected() {
        assert!(ProcessHelper::set_affinity(std::process::id(), &[]).is_err());
    }
}
