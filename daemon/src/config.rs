use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::SupervisorError;
use crate::management::affinity::{total_allowed_servers, Density};
use crate::storage::file::{Config, FileIoWithBackup};

pub const CONFIG_PATH: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameServerConfig {
    /// `USERPROFILE`/`APPDATA` of the workers; they write their files there.
    pub home_directory: PathBuf,
    pub binary_path: PathBuf,
    pub master_server: String,
    pub manager_port: u16,
    pub starting_game_port: u16,
    pub mod_name: String,
    pub no_console: bool,
    /// Servers per core: 0.5, 1, 2 or 3.
    pub density: f64,
    pub override_affinity: bool,
    pub slots: u16,
    /// Extra `Set <key> <value>` parameters passed to every worker.
    pub params: BTreeMap<String, serde_json::Value>,
}

impl Default for GameServerConfig {
    fn default() -> Self {
        Self {
            home_directory: PathBuf::from("hon_home"),
            binary_path: PathBuf::from(if cfg!(windows) {
                "hon_x64.exe"
            } else {
                "hon-x86_64-server"
            }),
            master_server: "api.kongor.online".to_owned(),
            manager_port: 1135,
            starting_game_port: 10001,
            mod_name: "KONGOR".to_owned(),
            no_console: true,
            density: 1.0,
            override_affinity: false,
            slots: 2,
            params: BTreeMap::new(),
        }
    }
}

impl GameServerConfig {
    pub fn density(&self) -> Result<Density, SupervisorError> {
        Density::try_from(self.density)
    }

    /// Number of supervisors the host can carry with this configuration.
    pub fn effective_slots(&self, cpu_count: usize) -> Result<u16, SupervisorError> {
        let allowed = total_allowed_servers(cpu_count, self.density)?;
        Ok(self.slots.min(u16::try_from(allowed).unwrap_or(u16::MAX)))
    }

    pub fn port_for(&self, id: u16) -> Result<u16, SupervisorError> {
        id.checked_sub(1)
            .and_then(|offset| self.starting_game_port.checked_add(offset))
            .ok_or_else(|| {
                SupervisorError::ConfigValidation(format!("no game port for instance #{}", id))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Read once at startup and handed to every supervisor.
pub struct AppConfig {
    pub game_server: GameServerConfig,
    /// Where the per-instance performance ledgers live.
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            game_server: GameServerConfig::default(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl FileIoWithBackup for AppConfig {}

impl Config for AppConfig {
    type ConfigType = AppConfig;
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<AppConfig> {
        let config = Self::load_config_or_default(path, Self::default)?;
        config.game_server.density()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_PATH);
        let first = AppConfig::load(&path).unwrap();
        assert_eq!(first, AppConfig::default());
        assert_eq!(AppConfig::load(&path).unwrap(), first);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_PATH);
        std::fs::write(&path, r#"{"game_server": {"slots": 6, "density": 0.5}}"#).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.game_server.slots, 6);
        assert_eq!(config.game_server.manager_port, 1135);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn invalid_density_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_PATH);
        std::fs::write(&path, r#"{"game_server": {"density": 1.5}}"#).unwrap();
        assert!(AppConfig::load(&path).is_err());
    }

    #[test]
    fn slots_are_capped_by_capacity() {
        let config = GameServerConfig {
            slots: 20,
            ..Default::default()
        };
        // 8 cores at density 1 leave 6 after the reserved cores
        assert_eq!(config.effective_slots(8).unwrap(), 6);
        assert_eq!(config.effective_slots(2).unwrap(), 1);
        assert_eq!(config.port_for(1).unwrap(), 10001);
        assert_eq!(config.port_for(3).unwrap(), 10003);
        assert!(config.port_for(0).is_err());
    }
}
