use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use watchvault_config::LibraryRemoval;
use watchvault_models::record::MAX_RATING;
use watchvault_models::{
    Detection, Platform, PlaylistIndex, RetentionPolicy, StoreSettings, StoreSnapshot, VideoRecord,
};

use crate::backend::{keys, BackendError, StorageBackend};
use crate::dedupe::{merge_detection, prefer_first, Admission, DedupeEngine};


#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("unknown record id: {0}")]
    UnknownRecord(String),
    #[error("unknown playlist: {0}")]
    UnknownPlaylist(String),
    #[error("playlist already exists: {0}")]
    PlaylistExists(String),
    #[error("invalid rating {0} (expected 0-5)")]
    InvalidRating(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    History,
    Library,
}

impl Partition {
    pub fn key(&self) -> &'static str {
        match self {
            Partition::History => keys::HISTORY,
            Partition::Library => keys::LIBRARY,
        }
    }
}

/// Import conflict policy, applied per colliding key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPolicy {
    KeepExisting,
    KeepIncoming,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Case-insensitive substring match on title or url.
    pub text: Option<String>,
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    RecentFirst,
    OldestFirst,
    TitleAsc,
    RatingDesc,
}

/// The two-partition record store plus the playlist index.
///
/// Every operation is read-modify-write against the flat key-value backend;
/// per-key writes are atomic, multi-key sequences are not. Mutations that
/// touch both partitions write history first and accept the brief divergence
/// window under concurrent external writers.
pub struct RecordStore {
    backend: Arc<dyn StorageBackend>,
    engine: DedupeEngine,
    library_removal: LibraryRemoval,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            engine: DedupeEngine::new(),
            library_removal: LibraryRemoval::Immediate,
        }
    }

    pub fn with_library_removal(mut self, policy: LibraryRemoval) -> Self {
        self.library_removal = policy;
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    // ---- partition plumbing -------------------------------------------------

    pub(crate) async fn read_partition(
        &self,
        partition: Partition,
    ) -> Result<BTreeMap<String, VideoRecord>, StoreError> {
        self.read_map(partition.key()).await
    }

    pub(crate) async fn write_partition(
        &self,
        partition: Partition,
        records: &BTreeMap<String, VideoRecord>,
    ) -> Result<(), StoreError> {
        self.write_value(partition.key(), records).await
    }

    async fn read_map<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<T, StoreError>
    where
        T: Default,
    {
        match self.backend.read(key).await? {
            None => Ok(T::default()),
            Some(value) => match serde_json::from_value(value) {
                Ok(parsed) => Ok(parsed),
                Err(e) => {
                    // Schema corruption: self-heal to empty instead of
                    // failing closed. The next write makes it durable.
                    warn!(
                        "Partition {:?} is corrupt ({}), reinitializing to empty",
                        key, e
                    );
                    Ok(T::default())
                }
            },
        }
    }

    async fn write_value<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_value(value).map_err(|source| BackendError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.backend.write(key, json).await?;
        Ok(())
    }

    pub(crate) async fn read_playlists(&self) -> Result<PlaylistIndex, StoreError> {
        self.read_map(keys::PLAYLISTS).await
    }

    async fn write_playlists(&self, playlists: &PlaylistIndex) -> Result<(), StoreError> {
        self.write_value(keys::PLAYLISTS, playlists).await
    }

    pub async fn settings(&self) -> Result<StoreSettings, StoreError> {
        self.read_map(keys::SETTINGS).await
    }

    pub(crate) async fn write_settings(&self, settings: &StoreSettings) -> Result<(), StoreError> {
        self.write_value(keys::SETTINGS, settings).await
    }

    pub(crate) async fn read_raw(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.backend.read(key).await?)
    }

    pub(crate) async fn remove_raw(&self, key: &str) -> Result<(), StoreError> {
        Ok(self.backend.remove(key).await?)
    }

    // ---- detection inlet ----------------------------------------------------

    /// Fire-and-forget admission of one raw detection. Rejections are
    /// dropped silently; returns the affected record id otherwise.
    pub async fn submit_detection(&self, detection: &Detection) -> Result<Option<String>, StoreError> {
        self.submit_detection_at(detection, Utc::now()).await
    }

    pub async fn submit_detection_at(
        &self,
        detection: &Detection,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let mut history = self.read_partition(Partition::History).await?;

        match self.engine.admit(detection, &history, now) {
            Admission::Reject => {
                debug!("Dropping detection without identity: {:?}", detection.title);
                Ok(None)
            }
            Admission::Create(record) => {
                let id = record.id.clone();
                debug!("New record {} from {:?}", id, detection.title);
                history.insert(id.clone(), record);
                self.write_partition(Partition::History, &history).await?;
                Ok(Some(id))
            }
            Admission::Update { id } => {
                let identity = match self.engine.resolver().resolve(detection) {
                    Some(identity) => identity,
                    None => return Ok(None),
                };
                if let Some(record) = history.get_mut(&id) {
                    merge_detection(record, detection, &identity, now);
                    self.write_partition(Partition::History, &history).await?;
                }
                // Mirror the same merge into the library copy so shared
                // fields never diverge while both partitions hold the id.
                let mut library = self.read_partition(Partition::Library).await?;
                if let Some(record) = library.get_mut(&id) {
                    merge_detection(record, detection, &identity, now);
                    self.write_partition(Partition::Library, &library).await?;
                }
                Ok(Some(id))
            }
        }
    }

    // ---- user edits ---------------------------------------------------------

    pub async fn set_rating(&self, id: &str, rating: u8) -> Result<(), StoreError> {
        if rating > MAX_RATING {
            return Err(StoreError::InvalidRating(rating));
        }
        self.edit_record(id, |record| record.rating = rating).await
    }

    pub async fn edit_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let title = title.trim().to_string();
        self.edit_record(id, move |record| record.title = title.clone())
            .await
    }

    /// Apply a user edit to every partition holding the record, history
    /// first. Divergence between the two writes is a documented race
    /// window, not a bug to engineer away.
    async fn edit_record<F>(&self, id: &str, apply: F) -> Result<(), StoreError>
    where
        F: Fn(&mut VideoRecord) + Clone,
    {
        let mut found = false;

        let mut history = self.read_partition(Partition::History).await?;
        if let Some(record) = history.get_mut(id) {
            apply.clone()(record);
            self.write_partition(Partition::History, &history).await?;
            found = true;
        }

        let mut library = self.read_partition(Partition::Library).await?;
        if let Some(record) = library.get_mut(id) {
            apply(record);
            self.write_partition(Partition::Library, &library).await?;
            found = true;
        }

        if found {
            Ok(())
        } else {
            Err(StoreError::UnknownRecord(id.to_string()))
        }
    }

    // ---- playlists ----------------------------------------------------------

    pub async fn create_playlist(&self, name: &str) -> Result<(), StoreError> {
        let mut playlists = self.read_playlists().await?;
        if !playlists.create(name) {
            return Err(StoreError::PlaylistExists(name.to_string()));
        }
        self.write_playlists(&playlists).await
    }

    pub async fn rename_playlist(&self, old: &str, new: &str) -> Result<(), StoreError> {
        let mut playlists = self.read_playlists().await?;
        if !playlists.contains(old) {
            return Err(StoreError::UnknownPlaylist(old.to_string()));
        }
        if !playlists.rename(old, new) {
            return Err(StoreError::PlaylistExists(new.to_string()));
        }
        self.write_playlists(&playlists).await
    }

    /// Promote the record into the library (structural copy) and reference
    /// it from the playlist. Library is written before the playlist so a
    /// reference never precedes its record.
    pub async fn add_to_playlist(&self, id: &str, playlist: &str) -> Result<(), StoreError> {
        let mut library = self.read_partition(Partition::Library).await?;
        if !library.contains_key(id) {
            let history = self.read_partition(Partition::History).await?;
            let record = history
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::UnknownRecord(id.to_string()))?;
            library.insert(id.to_string(), record);
            self.write_partition(Partition::Library, &library).await?;
        }

        let mut playlists = self.read_playlists().await?;
        if playlists.add_member(playlist, id) {
            self.write_playlists(&playlists).await?;
        }
        Ok(())
    }

    pub async fn remove_from_playlist(&self, id: &str, playlist: &str) -> Result<(), StoreError> {
        let mut playlists = self.read_playlists().await?;
        if !playlists.contains(playlist) {
            return Err(StoreError::UnknownPlaylist(playlist.to_string()));
        }
        if !playlists.remove_member(playlist, id) {
            return Ok(());
        }
        self.write_playlists(&playlists).await?;
        self.drop_unreferenced(&playlists, &[id.to_string()]).await
    }

    pub async fn delete_playlist(&self, name: &str) -> Result<(), StoreError> {
        let mut playlists = self.read_playlists().await?;
        let members = playlists
            .delete(name)
            .ok_or_else(|| StoreError::UnknownPlaylist(name.to_string()))?;
        self.write_playlists(&playlists).await?;
        self.drop_unreferenced(&playlists, &members).await
    }

    /// Remove the given ids from the library when no playlist references
    /// them any more. Under the deferred policy this is left to the next
    /// maintenance pass instead.
    async fn drop_unreferenced(
        &self,
        playlists: &PlaylistIndex,
        candidates: &[String],
    ) -> Result<(), StoreError> {
        if self.library_removal == LibraryRemoval::Deferred {
            return Ok(());
        }
        let mut library = self.read_partition(Partition::Library).await?;
        let mut changed = false;
        for id in candidates {
            if !playlists.is_referenced(id) && library.remove(id).is_some() {
                changed = true;
            }
        }
        if changed {
            self.write_partition(Partition::Library, &library).await?;
        }
        Ok(())
    }

    // ---- record removal -----------------------------------------------------

    /// Explicit user deletion from history. The library copy survives as
    /// long as any playlist still references the id.
    pub async fn delete_from_history(&self, id: &str) -> Result<(), StoreError> {
        let mut history = self.read_partition(Partition::History).await?;
        if history.remove(id).is_none() {
            return Err(StoreError::UnknownRecord(id.to_string()));
        }
        self.write_partition(Partition::History, &history).await?;

        let playlists = self.read_playlists().await?;
        if !playlists.is_referenced(id) {
            let mut library = self.read_partition(Partition::Library).await?;
            if library.remove(id).is_some() {
                self.write_partition(Partition::Library, &library).await?;
            }
        }
        Ok(())
    }

    // ---- queries ------------------------------------------------------------

    pub async fn list_history(
        &self,
        filter: &HistoryFilter,
        sort: SortOrder,
    ) -> Result<Vec<VideoRecord>, StoreError> {
        let history = self.read_partition(Partition::History).await?;
        let mut records: Vec<VideoRecord> = history
            .into_values()
            .filter(|record| matches_filter(record, filter))
            .collect();
        sort_records(&mut records, sort);
        Ok(records)
    }

    pub async fn list_library(&self, playlist: Option<&str>) -> Result<Vec<VideoRecord>, StoreError> {
        let library = self.read_partition(Partition::Library).await?;
        match playlist {
            None => {
                let mut records: Vec<VideoRecord> = library.into_values().collect();
                sort_records(&mut records, SortOrder::RecentFirst);
                Ok(records)
            }
            Some(name) => {
                let playlists = self.read_playlists().await?;
                let members = playlists
                    .members(name)
                    .ok_or_else(|| StoreError::UnknownPlaylist(name.to_string()))?;
                // Playlist order, skipping dangling references (repaired by
                // the next maintenance pass).
                Ok(members
                    .iter()
                    .filter_map(|id| library.get(id).cloned())
                    .collect())
            }
        }
    }

    pub async fn playlists(&self) -> Result<PlaylistIndex, StoreError> {
        self.read_playlists().await
    }

    // ---- settings -----------------------------------------------------------

    pub async fn set_retention_policy(&self, policy: RetentionPolicy) -> Result<(), StoreError> {
        let mut settings = self.settings().await?;
        settings.retention_policy = policy;
        self.write_settings(&settings).await
    }

    // ---- maintenance --------------------------------------------------------

    /// Collapse duplicate groups within one partition.
    ///
    /// Every record joins its platform-scoped dedupe-key group, and groups
    /// are unioned through shared native ids, so a native-keyed record and
    /// a digest-keyed record of the same page collapse together. One
    /// survivor per group, chosen by the retention preference; losers are
    /// deleted from the partition and purged from every playlist. Returns
    /// the number of removed records.
    pub async fn dedupe_sweep(&self, partition: Partition) -> Result<usize, StoreError> {
        let mut records = self.read_partition(partition).await?;

        let mut losers: Vec<String> = Vec::new();
        for ids in sweep_groups(&records) {
            if ids.len() < 2 {
                continue;
            }
            let mut survivor = ids[0].clone();
            for id in &ids[1..] {
                let keep_challenger = {
                    let challenger = &records[id];
                    let current = &records[&survivor];
                    prefer_first(challenger, current)
                };
                if keep_challenger {
                    losers.push(std::mem::replace(&mut survivor, id.clone()));
                } else {
                    losers.push(id.clone());
                }
            }
        }

        if losers.is_empty() {
            return Ok(0);
        }

        for id in &losers {
            records.remove(id);
        }
        self.write_partition(partition, &records).await?;

        let mut playlists = self.read_playlists().await?;
        let mut purged = false;
        for id in &losers {
            if playlists.is_referenced(id) {
                playlists.purge_id(id);
                purged = true;
            }
        }
        if purged {
            self.write_playlists(&playlists).await?;
        }

        info!(
            "Dedupe sweep removed {} duplicate record(s) from {:?}",
            losers.len(),
            partition.key()
        );
        Ok(losers.len())
    }

    /// Invariant repair: drop playlist references to missing library
    /// records, then library entries no playlist references. Cheapest safe
    /// action for either direction of the violation.
    pub async fn repair_references(&self) -> Result<usize, StoreError> {
        let mut library = self.read_partition(Partition::Library).await?;
        let mut playlists = self.read_playlists().await?;
        let mut repairs = 0usize;

        let mut dangling: Vec<String> = Vec::new();
        for name in playlists.names() {
            for id in playlists.members(name).unwrap_or_default() {
                if !library.contains_key(id) && !dangling.contains(id) {
                    dangling.push(id.clone());
                }
            }
        }
        for id in &dangling {
            warn!("Repairing dangling playlist reference to {}", id);
            playlists.purge_id(id);
            repairs += 1;
        }
        if !dangling.is_empty() {
            self.write_playlists(&playlists).await?;
        }

        let orphaned: Vec<String> = library
            .keys()
            .filter(|id| !playlists.is_referenced(id))
            .cloned()
            .collect();
        for id in &orphaned {
            warn!("Repairing orphaned library record {}", id);
            library.remove(id);
            repairs += 1;
        }
        if !orphaned.is_empty() {
            self.write_partition(Partition::Library, &library).await?;
        }

        Ok(repairs)
    }

    // ---- export / import ----------------------------------------------------

    pub async fn export(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(StoreSnapshot {
            history: self.read_partition(Partition::History).await?,
            library: self.read_partition(Partition::Library).await?,
            playlists: self.read_playlists().await?,
            settings: self.settings().await?,
        })
    }

    /// Merge a snapshot into the store, applying `policy` per colliding
    /// key. Callers are expected to run a dedupe sweep afterwards.
    pub async fn import(
        &self,
        snapshot: StoreSnapshot,
        policy: ImportPolicy,
    ) -> Result<(), StoreError> {
        let mut history = self.read_partition(Partition::History).await?;
        merge_records(&mut history, snapshot.history, policy);
        self.write_partition(Partition::History, &history).await?;

        let mut library = self.read_partition(Partition::Library).await?;
        merge_records(&mut library, snapshot.library, policy);
        self.write_partition(Partition::Library, &library).await?;

        let mut playlists = self.read_playlists().await?;
        for (name, members) in snapshot.playlists.0 {
            match playlists.0.get_mut(&name) {
                None => {
                    playlists.0.insert(name, members);
                }
                Some(existing) => {
                    if policy == ImportPolicy::KeepIncoming {
                        *existing = members;
                    } else {
                        for id in members {
                            if !existing.contains(&id) {
                                existing.push(id);
                            }
                        }
                    }
                }
            }
        }
        self.write_playlists(&playlists).await?;

        let existing = self.settings().await?;
        if existing == StoreSettings::default() || policy == ImportPolicy::KeepIncoming {
            self.write_settings(&snapshot.settings).await?;
        }
        Ok(())
    }
}

fn merge_records(
    existing: &mut BTreeMap<String, VideoRecord>,
    incoming: BTreeMap<String, VideoRecord>,
    policy: ImportPolicy,
) {
    for (id, record) in incoming {
        match policy {
            ImportPolicy::KeepIncoming => {
                existing.insert(id, record);
            }
            ImportPolicy::KeepExisting => {
                existing.entry(id).or_insert(record);
            }
        }
    }
}

/// Duplicate groups for one partition: union-find over record indices,
/// joined through the platform-scoped dedupe key and the native-id key.
fn sweep_groups(records: &BTreeMap<String, VideoRecord>) -> Vec<Vec<String>> {
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let ids: Vec<&String> = records.keys().collect();
    let mut parent: Vec<usize> = (0..ids.len()).collect();

    let mut by_key: HashMap<String, usize> = HashMap::new();
    for (idx, id) in ids.iter().enumerate() {
        let record = &records[*id];
        let mut keys = vec![format!("{}|{}", record.platform, record.dedupe_key)];
        if let Some(native) = &record.platform_video_id {
            keys.push(format!("{}:{}", record.platform, native));
        }
        for key in keys {
            match by_key.entry(key) {
                Entry::Occupied(slot) => {
                    let a = root(&mut parent, idx);
                    let b = root(&mut parent, *slot.get());
                    parent[a] = b;
                }
                Entry::Vacant(slot) => {
                    slot.insert(idx);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (idx, id) in ids.iter().enumerate() {
        let r = root(&mut parent, idx);
        groups.entry(r).or_default().push((*id).clone());
    }
    groups.into_values().collect()
}

fn matches_filter(record: &VideoRecord, filter: &HistoryFilter) -> bool {
    if let Some(platform) = filter.platform {
        if record.platform != platform {
            return false;
        }
    }
    if let Some(text) = &filter.text {
        let needle = text.to_lowercase();
        if !record.title.to_lowercase().contains(&needle)
            && !record.url.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    true
}

fn sort_records(records: &mut [VideoRecord], sort: SortOrder) {
    match sort {
        SortOrder::RecentFirst => records.sort_by(|a, b| b.watched_at.cmp(&a.watched_at)),
        SortOrder::OldestFirst => records.sort_by(|a, b| a.watched_at.cmp(&b.watched_at)),
        SortOrder::TitleAsc => {
            records.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        }
        SortOrder::RatingDesc => records.sort_by(|a, b| {
            b.rating
                .cmp(&a.rating)
                .then_with(|| b.watched_at.cmp(&a.watched_at))
        }),
    }
}
