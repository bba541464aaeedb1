use crate::error::{Result, SupervisorError};
use crate::management::comm::process_helper::{PriorityTier, ProcessHelper};
use crate::management::host::{slave_id_from_cmdline, HostProcessControl, ProcessHandle, ProcessStartInfo};
use crate::utils::status::system_info::{get_free_memory, get_host_facts};
use async_trait::async_trait;
use gsv_protocol::status::HostFacts;
use log::{debug, warn};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind, Users};
use tokio::process::Command;

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;

/// [`HostProcessControl`] backed by the real operating system.
pub struct OsHostControl {
    facts: HostFacts,
}

impl OsHostControl {
    pub fn new() -> Self {
        Self {
            facts: get_host_facts(),
        }
    }
}

impl Default for OsHostControl {
    fn default() -> Self {
        Self::new()
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SupervisorError::State(format!("blocking host task failed: {}", e)))?
}

fn process_refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing()
        .with_cmd(UpdateKind::OnlyIfNotSet)
        .with_exe(UpdateKind::OnlyIfNotSet)
        .with_user(UpdateKind::OnlyIfNotSet)
}

/// Linux cuts `name()` to 15 bytes, so the executable path and argv[0] win over it.
fn matches_binary(exe: Option<&Path>, argv0: Option<&OsStr>, name: &OsStr, binary_name: &str) -> bool {
    let file_name = |path: &Path| path.file_name().map(|n| n.to_string_lossy().into_owned());
    let listed = exe
        .and_then(file_name)
        .or_else(|| argv0.and_then(|arg| file_name(Path::new(arg))))
        .unwrap_or_else(|| name.to_string_lossy().into_owned());
    listed == binary_name
}

fn owner_of(process: &sysinfo::Process, users: &Users) -> Option<String> {
    process
        .user_id()
        .and_then(|uid| users.get_user_by_id(uid))
        .map(|user| user.name().to_owned())
}

fn lookup_owner(pid: u32) -> Option<String> {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        process_refresh_kind(),
    );
    let users = Users::new_with_refreshed_list();
    system.process(pid).and_then(|process| owner_of(process, &users))
}

#[async_trait]
impl HostProcessControl for OsHostControl {
    fn facts(&self) -> HostFacts {
        self.facts.clone()
    }

    async fn free_memory(&self) -> u64 {
        blocking(|| Ok(get_free_memory())).await.unwrap_or(0)
    }

    async fn launch(&self, info: ProcessStartInfo) -> Result<ProcessHandle> {
        let mut std_cmd = std::process::Command::new(&info.target);
        std_cmd
            .args(&info.args)
            .envs(&info.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(working_dir) = &info.working_dir {
            std_cmd.current_dir(working_dir);
        }
        // detach from the supervisor's console and signals
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            std_cmd.creation_flags(DETACHED_PROCESS);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(false);

        // fork/exec stays off the scheduler threads
        let (pid, owner) = blocking(move || {
            let child = cmd.spawn()?;
            let pid = child.id().ok_or_else(|| {
                SupervisorError::State("launched process exited before reporting a pid".to_owned())
            })?;
            // the runtime reaps the child once it exits; the supervisor only tracks the pid
            drop(child);
            Ok((pid, lookup_owner(pid)))
        })
        .await?;
        debug!("launched {} as pid {}", info.target.display(), pid);
        Ok(ProcessHandle { pid, owner })
    }

    async fn find_processes(
        &self,
        binary_name: &str,
        slave_id: Option<u16>,
    ) -> Vec<ProcessHandle> {
        let binary_name = binary_name.to_owned();
        let found = blocking(move || {
            let mut system = System::new();
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                process_refresh_kind(),
            );
            let users = Users::new_with_refreshed_list();

            let mut handles: Vec<ProcessHandle> = system
                .processes()
                .values()
                .filter(|process| {
                    matches_binary(
                        process.exe(),
                        process.cmd().first().map(|arg| arg.as_os_str()),
                        process.name(),
                        &binary_name,
                    )
                })
                .filter(|process| {
                    slave_id.is_none() || {
                        let cmdline: Vec<String> = process
                            .cmd()
                            .iter()
                            .map(|arg| arg.to_string_lossy().into_owned())
                            .collect();
                        slave_id_from_cmdline(&cmdline) == slave_id
                    }
                })
                .map(|process| ProcessHandle {
                    pid: process.pid().as_u32(),
                    owner: owner_of(process, &users),
                })
                .collect();
            handles.sort_by_key(|handle| handle.pid);
            Ok(handles)
        })
        .await;

        found.unwrap_or_else(|e| {
            warn!("process enumeration failed: {}", e);
            Vec::new()
        })
    }

    async fn is_alive(&self, pid: u32) -> bool {
        blocking(move || {
            let mut system = System::new();
            let pid = Pid::from_u32(pid);
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing(),
            );
            Ok(system
                .process(pid)
                .is_some_and(|process| process.status() != ProcessStatus::Zombie))
        })
        .await
        .unwrap_or(false)
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        blocking(move || Ok(ProcessHelper::stop(pid)?)).await
    }

    async fn binds_udp_port(&self, pid: u32, port: u16) -> bool {
        blocking(move || Ok(ProcessHelper::binds_udp_port(pid, port)))
            .await
            .unwrap_or(false)
    }

    async fn set_affinity(&self, pid: u32, cores: Vec<usize>) -> Result<()> {
        blocking(move || ProcessHelper::set_affinity(pid, &cores)).await
    }

    fn set_priority(&self, pid: u32, tier: PriorityTier) -> Result<()> {
        ProcessHelper::set_priority(pid, tier)
    }

    fn priority(&self, pid: u32) -> Result<PriorityTier> {
        ProcessHelper::priority(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_process_is_alive() {
        let host = OsHostControl::new();
        assert!(host.is_alive(std::process::id()).await);
        assert!(host.facts().cpu_count > 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_and_terminate() {
        let host = OsHostControl::new();
        let handle = host
            .launch(ProcessStartInfo {
                target: "sleep".into(),
                args: vec!["30".to_owned()],
                envs: Default::default(),
                working_dir: None,
            })
            .await
            .unwrap();
        assert!(handle.pid > 0);
        assert!(host.is_alive(handle.pid).await);
        host.terminate(handle.pid).await.unwrap();
    }

    #[test]
    fn binary_match_prefers_full_names() {
        let exe = Path::new("/opt/hon/hon-x86_64-server");
        let truncated = OsStr::new("hon-x86_64-serv");
        assert!(matches_binary(Some(exe), None, truncated, "hon-x86_64-server"));
        assert!(matches_binary(
            None,
            Some(OsStr::new("./hon-x86_64-server")),
            truncated,
            "hon-x86_64-server"
        ));
        assert!(matches_binary(None, None, OsStr::new("honsrv"), "honsrv"));
        assert!(!matches_binary(None, None, truncated, "hon-x86_64-server"));
        assert!(!matches_binary(Some(exe), None, truncated, "hon-x86_64-serv"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn finds_worker_with_long_binary_name() {
        let source = ["/bin/sleep", "/usr/bin/sleep"]
            .into_iter()
            .map(Path::new)
            .find(|path| path.exists())
            .expect("sleep binary");
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hon-x86_64-server");
        std::fs::copy(source, &target).unwrap();

        let host = OsHostControl::new();
        let handle = host
            .launch(ProcessStartInfo {
                target: target.clone(),
                args: vec!["30".to_owned()],
                envs: Default::default(),
                working_dir: None,
            })
            .await
            .unwrap();

        let found = host.find_processes("hon-x86_64-server", None).await;
        host.terminate(handle.pid).await.unwrap();
        assert!(found.iter().any(|candidate| candidate.pid == handle.pid));
    }
}
