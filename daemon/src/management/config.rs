use crate::config::GameServerConfig;
use crate::management::affinity::AffinityPlan;
use crate::management::host::ProcessStartInfo;
use gsv_protocol::status::Platform;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::PathBuf;

/// Launch parameters of one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceConfig {
    pub id: u16,
    pub port: u16,
    pub binary_path: PathBuf,
    pub binary_file_name: String,
    pub params: BTreeMap<String, Value>,
    /// Coordinator role; adds `-cowmaster -servicecvars`.
    pub cowmaster: bool,
}

impl InstanceConfig {
    pub fn for_slot(
        id: u16,
        port: u16,
        game: &GameServerConfig,
        plan: Option<&AffinityPlan>,
    ) -> Self {
        let binary_file_name = game
            .binary_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let host_affinity = plan
            .and_then(|plan| plan.core_set(id as usize).ok())
            .map(|cores| {
                cores
                    .iter()
                    .map(|core| core.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_else(|| "-1".to_owned());

        let mut params = game.params.clone();
        params.insert("svr_slave".to_owned(), Value::from(id));
        params.insert("svr_port".to_owned(), Value::from(port));
        params.insert("host_affinity".to_owned(), Value::from(host_affinity));

        Self {
            id,
            port,
            binary_path: game.binary_path.clone(),
            binary_file_name,
            params,
            cowmaster: false,
        }
    }

    pub fn slave_id(&self) -> Option<u16> {
        self.params
            .get("svr_slave")
            .and_then(|value| match value {
                Value::String(s) => s.parse().ok(),
                other => other.as_u64().and_then(|id| u16::try_from(id).ok()),
            })
    }

    /// `Set <key> <value>` items joined by `;`.
    pub fn params_block(&self, skip: &[&str]) -> String {
        self.params
            .iter()
            .filter(|(key, _)| !skip.contains(&key.as_str()))
            .map(|(key, value)| format!("Set {} {}", key, param_text(value)))
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn command_line(&self, game: &GameServerConfig, platform: Platform) -> Vec<String> {
        let skip: &[&str] = if platform == Platform::Windows && game.override_affinity {
            &["host_affinity"]
        } else {
            &[]
        };
        let params = self.params_block(skip);

        let mut cmd = vec![
            self.binary_path.to_string_lossy().into_owned(),
            "-dedicated".to_owned(),
            "-noconfig".to_owned(),
            "-execute".to_owned(),
            match platform {
                Platform::Windows => params,
                _ => format!("\"{}\"", params),
            },
            "-masterserver".to_owned(),
            game.master_server.clone(),
            "-register".to_owned(),
            format!("127.0.0.1:{}", game.manager_port),
        ];

        match platform {
            Platform::Windows => {
                cmd.insert(2, "-mod".to_owned());
                cmd.insert(3, format!("game;{}", game.mod_name));
                if game.no_console {
                    cmd.insert(4, "-noconsole".to_owned());
                }
                if self.cowmaster {
                    cmd.insert(1, "-cowmaster".to_owned());
                    cmd.insert(2, "-servicecvars".to_owned());
                }
            }
            Platform::Linux => {
                cmd.insert(2, format!("-mod game;{}", game.mod_name));
                if self.cowmaster {
                    cmd.insert(1, "-cowmaster".to_owned());
                    cmd.insert(2, "-servicecvars".to_owned());
                    cmd.insert(3, "-noconsole".to_owned());
                }
            }
            Platform::Macos | Platform::Other => {}
        }
        cmd
    }

    /// Command line and environment for the worker. The home directory
    /// overrides are set on the child only.
    pub fn start_info(&self, game: &GameServerConfig, platform: Platform) -> ProcessStartInfo {
        let home = OsString::from(game.home_directory.as_os_str());
        let mut envs = HashMap::new();
        envs.insert(OsString::from("USERPROFILE"), home.clone());
        envs.insert(OsString::from("APPDATA"), home.clone());
        if cfg!(unix) {
            envs.insert(OsString::from("HOME"), home);
        }

        let mut args = self.command_line(game, platform);
        args.remove(0);
        ProcessStartInfo {
            target: self.binary_path.clone(),
            args,
            envs,
            working_dir: self.binary_path.parent().map(PathBuf::from).filter(|dir| !dir.as_os_str().is_empty()),
        }
    }
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn game() -> GameServerConfig {
        GameServerConfig {
            binary_path: PathBuf::from("hon_x64.exe"),
            master_server: "master.example".to_owned(),
            manager_port: 1135,
            no_console: true,
            ..Default::default()
        }
    }

    fn instance() -> InstanceConfig {
        let mut config = InstanceConfig::for_slot(2, 10002, &game(), None);
        config.params = BTreeMap::from([
            ("svr_port".to_owned(), Value::from(10002)),
            ("svr_slave".to_owned(), Value::from(2)),
        ]);
        config
    }

    #[test]
    fn slot_params() {
        let plan = AffinityPlan::new(8, 1.0).unwrap();
        let config = InstanceConfig::for_slot(2, 10002, &game(), Some(&plan));
        assert_eq!(config.binary_file_name, "hon_x64.exe");
        assert_eq!(config.slave_id(), Some(2));
        assert_eq!(config.params["svr_port"], Value::from(10002));
        assert_eq!(config.params["host_affinity"], Value::from("6"));

        let unplanned = InstanceConfig::for_slot(2, 10002, &game(), None);
        assert_eq!(unplanned.params["host_affinity"], Value::from("-1"));
    }

    #[test]
    fn windows_command_line() {
        assert_eq!(
            instance().command_line(&game(), Platform::Windows),
            vec![
                "hon_x64.exe",
                "-dedicated",
                "-mod",
                "game;KONGOR",
                "-noconsole",
                "-noconfig",
                "-execute",
                "Set svr_port 10002;Set svr_slave 2",
                "-masterserver",
                "master.example",
                "-register",
                "127.0.0.1:1135",
            ]
        );
    }

    #[test]
    fn windows_coordinator_command_line() {
        let mut config = instance();
        config.cowmaster = true;
        let cmd = config.command_line(&game(), Platform::Windows);
        assert_eq!(
            &cmd[..6],
            &["hon_x64.exe", "-cowmaster", "-servicecvars", "-dedicated", "-mod", "game;KONGOR"]
        );
    }

    #[test]
    fn linux_command_line() {
        let mut config = instance();
        config.cowmaster = true;
        assert_eq!(
            config.command_line(&game(), Platform::Linux),
            vec![
                "hon_x64.exe",
                "-cowmaster",
                "-servicecvars",
                "-noconsole",
                "-dedicated",
                "-mod game;KONGOR",
                "-noconfig",
                "-execute",
                "\"Set svr_port 10002;Set svr_slave 2\"",
                "-masterserver",
                "master.example",
                "-register",
                "127.0.0.1:1135",
            ]
        );
    }

    #[test]
    fn affinity_override_drops_host_affinity_on_windows() {
        let mut game = game();
        game.override_affinity = true;
        let config = InstanceConfig::for_slot(1, 10001, &game, None);
        let windows = config.command_line(&game, Platform::Windows);
        assert!(!windows.iter().any(|arg| arg.contains("host_affinity")));
        let linux = config.command_line(&game, Platform::Linux);
        assert!(linux.iter().any(|arg| arg.contains("Set host_affinity -1")));
    }

    #[test]
    fn child_environment() {
        let info = instance().start_info(&game(), Platform::Linux);
        assert_eq!(info.target, PathBuf::from("hon_x64.exe"));
        assert_eq!(info.args[0], "-dedicated");
        assert_eq!(
            info.envs.get(&OsString::from("APPDATA")),
            Some(&OsString::from("hon_home"))
        );
        assert!(info.working_dir.is_none());
        assert!(std::env::var_os("APPDATA").map_or(true, |v| v != "hon_home"));
    }
}
