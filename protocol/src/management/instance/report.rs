use crate::management::instance::state::InstanceState;
use serde::{Deserialize, Serialize};

/// Flattened, human-readable projection of one instance for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    #[serde(rename = "ID")]
    pub id: u16,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Game Phase")]
    pub game_phase: String,
    #[serde(rename = "Connections")]
    pub connections: u32,
    #[serde(rename = "Players")]
    pub players: String,
    #[serde(rename = "Uptime")]
    pub uptime: String,
    #[serde(rename = "Performance")]
    pub performance: String,
}

impl StatusView {
    pub fn new(id: u16, port: u16, state: &InstanceState) -> Self {
        let players = state
            .players
            .iter()
            .map(|player| player.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let perf = &state.performance;

        StatusView {
            id,
            port,
            status: state.status.label().to_owned(),
            game_phase: state
                .game_phase
                .map(|phase| phase.label())
                .unwrap_or("Unknown")
                .to_owned(),
            connections: state.num_clients.unwrap_or(0),
            players,
            uptime: state
                .uptime
                .map(format_uptime)
                .unwrap_or_else(|| "Unknown".to_owned()),
            performance: format!(
                "{} sec (grand total)\n{} sec (total while in game)\n{} sec (current game)",
                as_seconds(perf.grandtotal_skipped_frames),
                as_seconds(perf.total_ingame_skipped_frames),
                as_seconds(perf.now_ingame_skipped_frames),
            ),
        }
    }
}

fn as_seconds(millis: u64) -> f64 {
    millis as f64 / 1000.0
}

/// `90_061_000` ms -> `"1d 1h 1m 1s"`; zero parts are dropped.
pub fn format_uptime(millis: u64) -> String {
    let total = millis.div_ceil(1000);
    let (minutes, seconds) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    let (days, hours) = (hours / 24, hours % 24);

    [(days, "d"), (hours, "h"), (minutes, "m"), (seconds, "s")]
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{}{}", value, unit))
        .collect::<Vec<_>>()
        .join(" ")
}
