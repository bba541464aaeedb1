use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Server status as reported by the worker's telemetry.
///
/// The wire encodes it as an integer code; codes without a meaning here
/// (including `2`) collapse to [`InstanceStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InstanceStatus {
    #[default]
    Unknown,
    Sleeping,
    Ready,
    Active,
}

impl InstanceStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => InstanceStatus::Sleeping,
            1 => InstanceStatus::Ready,
            3 => InstanceStatus::Active,
            _ => InstanceStatus::Unknown,
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            InstanceStatus::Unknown => None,
            InstanceStatus::Sleeping => Some(0),
            InstanceStatus::Ready => Some(1),
            InstanceStatus::Active => Some(3),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InstanceStatus::Unknown => "Unknown",
            InstanceStatus::Sleeping => "Sleeping",
            InstanceStatus::Ready => "Ready",
            InstanceStatus::Active => "Active",
        }
    }
}

impl Serialize for InstanceStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.code().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for InstanceStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = Option::<i64>::deserialize(deserializer)?;
        Ok(code.map(InstanceStatus::from_code).unwrap_or_default())
    }
}

/// Match phase of the worker. Phases 2 and 3 are both hero picking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamePhase {
    None,
    InLobby,
    Picking,
    Loading,
    Preparation,
    MatchStarted,
    Unknown(i64),
}

impl GamePhase {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => GamePhase::None,
            1 => GamePhase::InLobby,
            2 | 3 => GamePhase::Picking,
            4 => GamePhase::Loading,
            5 => GamePhase::Preparation,
            6 => GamePhase::MatchStarted,
            other => GamePhase::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            GamePhase::None => 0,
            GamePhase::InLobby => 1,
            GamePhase::Picking => 2,
            GamePhase::Loading => 4,
            GamePhase::Preparation => 5,
            GamePhase::MatchStarted => 6,
            GamePhase::Unknown(code) => *code,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GamePhase::None => "",
            GamePhase::InLobby => "In-Lobby",
            GamePhase::Picking => "Picking Phase",
            GamePhase::Loading => "Loading into match..",
            GamePhase::Preparation => "Preparation Phase",
            GamePhase::MatchStarted => "Match Started",
            GamePhase::Unknown(_) => "Unknown",
        }
    }
}

impl Serialize for GamePhase {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for GamePhase {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        i64::deserialize(deserializer).map(GamePhase::from_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(InstanceStatus::from_code(0), InstanceStatus::Sleeping);
        assert_eq!(InstanceStatus::from_code(1), InstanceStatus::Ready);
        assert_eq!(InstanceStatus::from_code(2), InstanceStatus::Unknown);
        assert_eq!(InstanceStatus::from_code(3), InstanceStatus::Active);
        assert_eq!(InstanceStatus::Unknown.code(), None);
    }

    #[test]
    fn status_null_is_unknown() {
        let status: InstanceStatus = serde_json::from_str("null").unwrap();
        assert_eq!(status, InstanceStatus::Unknown);
        let status: InstanceStatus = serde_json::from_str("3").unwrap();
        assert_eq!(status, InstanceStatus::Active);
    }

    #[test]
    fn picking_has_two_codes() {
        assert_eq!(GamePhase::from_code(2), GamePhase::Picking);
        assert_eq!(GamePhase::from_code(3), GamePhase::Picking);
        assert_eq!(GamePhase::from_code(9), GamePhase::Unknown(9));
        assert_eq!(GamePhase::from_code(9).label(), "Unknown");
    }
}
