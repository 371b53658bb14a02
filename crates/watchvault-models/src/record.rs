use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::platform::Platform;

pub const MAX_RATING: u8 = 5;

/// One detected/watched video.
///
/// Field names and the epoch-ms timestamp encoding match the legacy
/// extension schema so existing stores keep round-tripping. `id` and
/// `dedupe_key` are permanent once created; only `rating`, `title`,
/// `thumbnail` and `watched_at` mutate in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_video_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub watched_at: DateTime<Utc>,
    /// 0 = unrated, 1-5 = user rating.
    #[serde(default)]
    pub rating: u8,
    pub dedupe_key: String,
}

impl VideoRecord {
    pub fn is_rated(&self) -> bool {
        self.rating > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_wire_format_is_camel_case_epoch_ms() {
        let record = VideoRecord {
            id: "youtube:dQw4w9WgXcQ".to_string(),
            url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            title: "Some Video".to_string(),
            thumbnail: String::new(),
            platform: Platform::Youtube,
            platform_video_id: Some("dQw4w9WgXcQ".to_string()),
            watched_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            rating: 0,
            dedupe_key: "www.youtube.com/watch|some video".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["watchedAt"], 1_700_000_000_000_i64);
        assert_eq!(json["platformVideoId"], "dQw4w9WgXcQ");
        assert_eq!(json["dedupeKey"], "www.youtube.com/watch|some video");
        assert_eq!(json["platform"], "youtube");

        let back: VideoRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_unknown_platform_tag_falls_back_to_generic() {
        let json = serde_json::json!({
            "id": "x", "url": "https://a.example/v", "title": "t",
            "watchedAt": 0, "dedupeKey": "a.example/v|t",
            "platform": "newtube"
        });
        let record: VideoRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.platform, Platform::Generic);
    }
}
