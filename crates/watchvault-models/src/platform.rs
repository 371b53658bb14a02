use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform tag attached to every record.
///
/// Unknown tags from older snapshots deserialize as `Generic` so a schema
/// bump on the detection side never poisons an existing store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Platform {
    Youtube,
    Vimeo,
    Pornhub,
    Dailymotion,
    Twitch,
    Generic,
}

impl From<String> for Platform {
    fn from(s: String) -> Self {
        Platform::parse(&s)
    }
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Vimeo => "vimeo",
            Platform::Pornhub => "pornhub",
            Platform::Dailymotion => "dailymotion",
            Platform::Twitch => "twitch",
            Platform::Generic => "generic",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "youtube" => Platform::Youtube,
            "vimeo" => Platform::Vimeo,
            "pornhub" => Platform::Pornhub,
            "dailymotion" => Platform::Dailymotion,
            "twitch" => Platform::Twitch,
            _ => Platform::Generic,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::Generic
    }
}
