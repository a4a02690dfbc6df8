//! Door Lock Protocol
//!
//! The lock firmware accepts a single command: a compact JSON object written
//! to the command characteristic.
//!
//! ```text
//! {"action":"unlock","press_time":450,"release_time":300}
//! ```
//!
//! `press_time` is how long the actuator holds the latch, `release_time` how
//! long it waits before letting go, both in milliseconds. The firmware does no
//! schema negotiation, so the field names, the literal action and the byte
//! layout must not change.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// The only action the firmware understands.
pub const UNLOCK_ACTION: &str = "unlock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockCommand {
    pub press_time: u64,
    pub release_time: u64,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported action {0:?}")]
    UnsupportedAction(String),
}

impl UnlockCommand {
    pub fn new(press_time: u64, release_time: u64) -> Self {
        Self {
            press_time,
            release_time,
        }
    }

    /// Serialize to the wire payload.
    pub fn encode(&self) -> Vec<u8> {
        // serde_json::Value renders object keys in sorted order, which for
        // these three keys is also the order the firmware was written against.
        json!({
            "action": UNLOCK_ACTION,
            "press_time": self.press_time,
            "release_time": self.release_time,
        })
        .to_string()
        .into_bytes()
    }

    /// Parse a payload back. Durations may be integers or decimal strings.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireCommand = serde_json::from_slice(bytes)?;
        if wire.action != UNLOCK_ACTION {
            return Err(DecodeError::UnsupportedAction(wire.action));
        }
        Ok(Self {
            press_time: wire.press_time,
            release_time: wire.release_time,
        })
    }
}

/// Build the unlock payload for the given pulse timings.
pub fn encode(press_duration_ms: u64, release_duration_ms: u64) -> Vec<u8> {
    UnlockCommand::new(press_duration_ms, release_duration_ms).encode()
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireCommand {
    action: String,
    #[serde(deserialize_with = "duration_ms")]
    press_time: u64,
    #[serde(deserialize_with = "duration_ms")]
    release_time: u64,
}

fn duration_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Number(u64),
        Text(String),
    }

    match Millis::deserialize(deserializer)? {
        Millis::Number(n) => Ok(n),
        Millis::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid duration {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_matches_firmware_payload() {
        assert_eq!(
            encode(450, 300),
            br#"{"action":"unlock","press_time":450,"release_time":300}"#.to_vec()
        );
    }

    #[test]
    fn test_encode_is_deterministic() {
        assert_eq!(encode(0, u64::MAX), encode(0, u64::MAX));
    }

    #[test]
    fn test_encode_has_exactly_three_keys() {
        let value: serde_json::Value = serde_json::from_slice(&encode(12, 34)).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["action"], "unlock");
        assert_eq!(object["press_time"], 12);
        assert_eq!(object["release_time"], 34);
    }

    #[test]
    fn test_decode_recovers_durations() {
        for (press, release) in [(0, 0), (450, 300), (u64::MAX, 1)] {
            let command = UnlockCommand::decode(&encode(press, release)).unwrap();
            assert_eq!(command, UnlockCommand::new(press, release));
        }
    }

    #[test]
    fn test_decode_accepts_string_durations() {
        let payload = br#"{"press_time":"450","release_time":"300","action":"unlock"}"#;
        let command = UnlockCommand::decode(payload).unwrap();
        assert_eq!(command, UnlockCommand::new(450, 300));
    }

    #[test]
    fn test_decode_rejects_other_actions() {
        let payload = br#"{"action":"lock","press_time":1,"release_time":2}"#;
        assert!(matches!(
            UnlockCommand::decode(payload),
            Err(DecodeError::UnsupportedAction(a)) if a == "lock"
        ));
    }

    #[test]
    fn test_decode_rejects_extra_fields() {
        let payload = br#"{"action":"unlock","press_time":1,"release_time":2,"v":1}"#;
        assert!(UnlockCommand::decode(payload).is_err());
    }
}
