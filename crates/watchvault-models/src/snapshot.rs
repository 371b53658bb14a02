use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::playlist::PlaylistIndex;
use crate::record::VideoRecord;
use crate::settings::StoreSettings;

/// Full export/import snapshot of the persisted schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub history: BTreeMap<String, VideoRecord>,
    #[serde(default)]
    pub library: BTreeMap<String, VideoRecord>,
    #[serde(default)]
    pub playlists: PlaylistIndex,
    #[serde(default)]
    pub settings: StoreSettings,
}

impl StoreSnapshot {
    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.library.is_empty() && self.playlists.0.is_empty()
    }
}
