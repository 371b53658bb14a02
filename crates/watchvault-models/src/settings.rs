use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// History retention policy: `"off"` or a number of days on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    Off,
    Days(u32),
}

impl RetentionPolicy {
    pub fn days(&self) -> Option<u32> {
        match self {
            RetentionPolicy::Off => None,
            RetentionPolicy::Days(d) => Some(*d),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::Off
    }
}

impl Serialize for RetentionPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RetentionPolicy::Off => serializer.serialize_str("off"),
            RetentionPolicy::Days(d) => serializer.serialize_u32(*d),
        }
    }
}

impl<'de> Deserialize<'de> for RetentionPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Number(u32),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Text(s) if s.eq_ignore_ascii_case("off") => Ok(RetentionPolicy::Off),
            Wire::Text(s) => s
                .parse::<u32>()
                .map(RetentionPolicy::Days)
                .map_err(|_| de::Error::custom(format!("invalid retention policy: {:?}", s))),
            Wire::Number(0) => Ok(RetentionPolicy::Off),
            Wire::Number(d) => Ok(RetentionPolicy::Days(d)),
        }
    }
}

/// Persisted store settings, kept next to the data they govern.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    #[serde(default)]
    pub retention_policy: RetentionPolicy,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_cleanup_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_policy_wire_round_trip() {
        let off: RetentionPolicy = serde_json::from_str("\"off\"").unwrap();
        assert_eq!(off, RetentionPolicy::Off);
        let days: RetentionPolicy = serde_json::from_str("30").unwrap();
        assert_eq!(days, RetentionPolicy::Days(30));

        assert_eq!(serde_json::to_string(&RetentionPolicy::Off).unwrap(), "\"off\"");
        assert_eq!(serde_json::to_string(&RetentionPolicy::Days(7)).unwrap(), "7");
    }

    #[test]
    fn test_zero_days_means_off() {
        let policy: RetentionPolicy = serde_json::from_str("0").unwrap();
        assert_eq!(policy, RetentionPolicy::Off);
    }

    #[test]
    fn test_settings_default_has_no_cleanup_timestamp() {
        let settings: StoreSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.retention_policy, RetentionPolicy::Off);
        assert!(settings.last_cleanup_at.is_none());
        let json = serde_json::to_value(&settings).unwrap();
        assert!(json.get("lastCleanupAt").is_none());
    }
}
