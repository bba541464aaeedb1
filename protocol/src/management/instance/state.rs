use crate::management::instance::performance::PerformanceCounters;
use crate::management::instance::status::{GamePhase, InstanceStatus};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
}

/// Everything known about one worker. Optional fields stay `None` until
/// the worker first reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub status: InstanceStatus,
    pub uptime: Option<u64>,
    pub num_clients: Option<u32>,
    pub match_started: Option<u8>,
    pub game_phase: Option<GamePhase>,
    pub current_match_id: Option<String>,
    pub players: Vec<Player>,
    pub performance: PerformanceCounters,
}

/// A full-state refresh decoded from telemetry. Fields the worker did not
/// send are left `None` and do not touch the stored state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSnapshot {
    #[serde(default)]
    pub status: Option<InstanceStatus>,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub num_clients: Option<u32>,
    #[serde(default)]
    pub match_started: Option<u8>,
    #[serde(default, rename = "game_state_phase", alias = "game_phase")]
    pub game_phase: Option<GamePhase>,
    #[serde(default, deserialize_with = "match_id_text_or_number")]
    pub current_match_id: Option<String>,
    #[serde(default)]
    pub players: Option<Vec<Player>>,
}

/// Workers report the match id either quoted or as a bare number.
#[derive(Deserialize)]
#[serde(untagged)]
enum MatchId {
    Text(String),
    Number(u64),
}

fn match_id_text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<MatchId>::deserialize(deserializer)?.map(|id| match id {
        MatchId::Text(text) => text,
        MatchId::Number(number) => number.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_rejects_unknown_fields() {
        let err = serde_json::from_str::<StateSnapshot>(r#"{"status": 1, "mystery": 4}"#);
        assert!(err.is_err());
    }

    #[test]
    fn snapshot_match_id_accepts_numbers() {
        let numeric: StateSnapshot =
            serde_json::from_str(r#"{"current_match_id": 4417}"#).unwrap();
        assert_eq!(numeric.current_match_id.as_deref(), Some("4417"));

        let quoted: StateSnapshot =
            serde_json::from_str(r#"{"current_match_id": "4417"}"#).unwrap();
        assert_eq!(quoted, numeric);

        let cleared: StateSnapshot = serde_json::from_str(r#"{"current_match_id": null}"#).unwrap();
        assert_eq!(cleared.current_match_id, None);
        let absent: StateSnapshot = serde_json::from_str(r#"{"status": 1}"#).unwrap();
        assert_eq!(absent.current_match_id, None);

        assert!(serde_json::from_str::<StateSnapshot>(r#"{"current_match_id": [1]}"#).is_err());
    }

    #[test]
    fn snapshot_partial() {
        let snapshot: StateSnapshot =
            serde_json::from_str(r#"{"match_started": 1, "game_state_phase": 6}"#).unwrap();
        assert_eq!(snapshot.match_started, Some(1));
        assert_eq!(snapshot.game_phase, Some(GamePhase::MatchStarted));
        assert_eq!(snapshot.status, None);
        assert!(snapshot.players.is_none());
    }
}
