use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Skipped-frame counters kept per instance, in milliseconds of lag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub grandtotal_skipped_frames: u64,
    pub total_ingame_skipped_frames: u64,
    pub now_ingame_skipped_frames: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPerformance {
    pub now_ingame_skipped_frames: u64,
}

/// On-disk ledger layout:
/// `{"grandtotal_skipped_frames": n, "total_ingame_skipped_frames": n, "<match id>": {...}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    #[serde(default)]
    pub grandtotal_skipped_frames: u64,
    #[serde(default)]
    pub total_ingame_skipped_frames: u64,
    #[serde(flatten)]
    pub matches: BTreeMap<String, MatchPerformance>,
}

impl PerformanceRecord {
    pub fn from_counters(counters: &PerformanceCounters, match_id: Option<&str>) -> Self {
        let mut matches = BTreeMap::new();
        if let Some(match_id) = match_id {
            matches.insert(
                match_id.to_owned(),
                MatchPerformance {
                    now_ingame_skipped_frames: counters.now_ingame_skipped_frames,
                },
            );
        }
        Self {
            grandtotal_skipped_frames: counters.grandtotal_skipped_frames,
            total_ingame_skipped_frames: counters.total_ingame_skipped_frames,
            matches,
        }
    }
}
