use crate::error::Result;
use crate::management::state::StateStore;
use crate::storage::file::FileIoWithBackup;
use gsv_protocol::management::instance::PerformanceRecord;
use log::debug;
use std::path::{Path, PathBuf};

/// Durable skipped-frame counters for one instance, one JSON file each.
pub struct PerformanceLedger {
    path: PathBuf,
}

impl FileIoWithBackup for PerformanceLedger {}

impl PerformanceLedger {
    pub fn new<P: AsRef<Path>>(data_dir: P, instance_id: u16) -> Self {
        Self {
            path: data_dir
                .as_ref()
                .join(format!("GameServer-{}_state_data.json", instance_id)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Folds the stored counters into `state`.
    ///
    /// With `match_only` the cumulative counters are left alone and only the
    /// current match's entry is added, which resumes a match after a restart.
    /// A missing file is not an error.
    pub fn load(&self, state: &StateStore, match_only: bool) -> Result<()> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let record: PerformanceRecord = serde_json::from_str(&content)?;
        let match_id = state.current_match_id();

        state.update_performance(|perf| {
            if !match_only {
                perf.grandtotal_skipped_frames = record.grandtotal_skipped_frames;
                perf.total_ingame_skipped_frames = record.total_ingame_skipped_frames;
            }
            if let Some(entry) = match_id.and_then(|id| record.matches.get(&id)) {
                perf.now_ingame_skipped_frames += entry.now_ingame_skipped_frames;
            }
        });
        debug!("ledger loaded from {}", self.path.display());
        Ok(())
    }

    /// Replaces the file with the current counters. Only the current match
    /// keeps a per-match entry; earlier matches are dropped.
    pub fn save(&self, state: &StateStore) -> Result<()> {
        let record =
            PerformanceRecord::from_counters(&state.performance(), state.current_match_id().as_deref());
        let content = serde_json::to_string(&record)?;
        Self::write_with_backup(&self.path, &content)?;
        Ok(())
    }
}
