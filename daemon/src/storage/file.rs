use std::path::Path;

use serde::{Deserialize, Serialize};

pub trait FileIoWithBackup {
    /// Writes the given content to a file and creates a backup of the file before writing.
    fn write_with_backup<P: AsRef<Path>>(path: P, content: &str) -> Result<(), std::io::Error> {
        let path = path.as_ref();

        if path.exists() {
            let backup_path = path.with_extension("bak");

            // Create a backup of the file
            std::fs::copy(path, backup_path)?;
        } else if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write the content to the file
        std::fs::write(path, content)?;

        Ok(())
    }
}

/// Trait for configuration handling.
pub trait Config: FileIoWithBackup {
    type ConfigType: Serialize + for<'de> Deserialize<'de>;

    fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Self::ConfigType> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self::ConfigType = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn save_config<P: AsRef<Path>>(path: P, config: &Self::ConfigType) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(config)?;
        Self::write_with_backup(path, &content)?;
        Ok(())
    }

    fn load_config_or_default<P: AsRef<Path>, F: FnOnce() -> Self::ConfigType>(
        path: P,
        default: F,
    ) -> anyhow::Result<Self::ConfigType> {
        match std::fs::metadata(path.as_ref()) {
            Ok(metadata) if metadata.is_file() => Self::load_config(path),
            _ => {
                let config = default();
                Self::save_config(path, &config)?;
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: u32,
    }

    struct SampleConfig;

    impl FileIoWithBackup for SampleConfig {}

    impl Config for SampleConfig {
        type ConfigType = Sample;
    }

    #[test]
    fn default_is_written_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let loaded = SampleConfig::load_config_or_default(&path, || Sample { value: 5 }).unwrap();
        assert_eq!(loaded, Sample { value: 5 });
        assert!(path.exists());

        let again = SampleConfig::load_config_or_default(&path, Sample::default).unwrap();
        assert_eq!(again, Sample { value: 5 });
    }

    #[test]
    fn overwrite_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        SampleConfig::write_with_backup(&path, "first").unwrap();
        SampleConfig::write_with_backup(&path, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(
            std::fs::read_to_string(path.with_extension("bak")).unwrap(),
            "first"
        );
    }
}
