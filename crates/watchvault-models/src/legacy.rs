use serde::{Deserialize, Serialize};
use crate::record::VideoRecord;

/// Record shape of the legacy single-partition `videos` map.
///
/// Identical to `VideoRecord` plus the soft-delete marker the old schema
/// used instead of actually removing history entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyVideoRecord {
    #[serde(flatten)]
    pub record: VideoRecord,
    #[serde(default, rename = "deletedFromHistory")]
    pub deleted_from_history: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_record_without_marker_is_live() {
        let json = serde_json::json!({
            "id": "youtube:abc12345678",
            "url": "https://www.youtube.com/watch?v=abc12345678",
            "title": "Old Video",
            "platform": "youtube",
            "watchedAt": 1_600_000_000_000_i64,
            "dedupeKey": "www.youtube.com/watch|old video"
        });
        let legacy: LegacyVideoRecord = serde_json::from_value(json).unwrap();
        assert!(!legacy.deleted_from_history);
        assert_eq!(legacy.record.id, "youtube:abc12345678");
    }

    #[test]
    fn test_legacy_soft_delete_marker_round_trips() {
        let json = serde_json::json!({
            "id": "x", "url": "https://a.example/v", "title": "t",
            "watchedAt": 0, "dedupeKey": "a.example/v|t",
            "deletedFromHistory": true
        });
        let legacy: LegacyVideoRecord = serde_json::from_value(json).unwrap();
        assert!(legacy.deleted_from_history);
    }
}
