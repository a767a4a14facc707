use serde::{Deserialize, Serialize};

/// Operations a front end can ask of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Begin (or restart) a session: fetch everything and start polling.
    StartSession,
    /// Re-fetch the recently-played list.
    Refresh,
    ToggleLike { track_id: String },
    PlayPause { track_id: String },
    /// End the session; polling stops.
    Logout,
}

/// Why a track was handed to the web player instead of being controlled
/// remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NoDevice,
    PauseRejected,
    PlayRejected,
    DevicesUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tagging() {
        let json = serde_json::to_value(Command::ToggleLike {
            track_id: "t1".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "cmd": "ToggleLike", "track_id": "t1" }));

        let cmd: Command = serde_json::from_str(r#"{"cmd":"Logout"}"#).unwrap();
        assert_eq!(cmd, Command::Logout);
    }

    #[test]
    fn test_fallback_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&FallbackReason::NoDevice).unwrap(),
            "\"no_device\""
        );
    }
}
