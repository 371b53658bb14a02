use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Playlist name -> ordered member record ids.
///
/// Order is whatever the user built up; membership is what matters. A record
/// id appears at most once per playlist. Every referenced id must exist in
/// the library partition (the store enforces this, sweeps repair it).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PlaylistIndex(pub BTreeMap<String, Vec<String>>);

impl PlaylistIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn members(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn create(&mut self, name: &str) -> bool {
        if self.0.contains_key(name) {
            return false;
        }
        self.0.insert(name.to_string(), Vec::new());
        true
    }

    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        if !self.0.contains_key(old) || self.0.contains_key(new) {
            return false;
        }
        let members = self.0.remove(old).unwrap_or_default();
        self.0.insert(new.to_string(), members);
        true
    }

    pub fn delete(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(name)
    }

    /// Append `id` to `name`, creating the playlist if needed. Returns false
    /// when the id was already a member.
    pub fn add_member(&mut self, name: &str, id: &str) -> bool {
        let members = self.0.entry(name.to_string()).or_default();
        if members.iter().any(|m| m == id) {
            return false;
        }
        members.push(id.to_string());
        true
    }

    pub fn remove_member(&mut self, name: &str, id: &str) -> bool {
        match self.0.get_mut(name) {
            Some(members) => {
                let before = members.len();
                members.retain(|m| m != id);
                members.len() != before
            }
            None => false,
        }
    }

    /// Drop `id` from every playlist that references it.
    pub fn purge_id(&mut self, id: &str) {
        for members in self.0.values_mut() {
            members.retain(|m| m != id);
        }
    }

    pub fn is_referenced(&self, id: &str) -> bool {
        self.0.values().any(|members| members.iter().any(|m| m == id))
    }

    /// Union of all member ids across all playlists (the protected set).
    pub fn referenced_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for members in self.0.values() {
            for id in members {
                ids.insert(id.clone());
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_member_rejects_duplicates() {
        let mut playlists = PlaylistIndex::new();
        assert!(playlists.add_member("faves", "a"));
        assert!(!playlists.add_member("faves", "a"));
        assert_eq!(playlists.members("faves").unwrap(), &["a".to_string()]);
    }

    #[test]
    fn test_referenced_ids_unions_all_playlists() {
        let mut playlists = PlaylistIndex::new();
        playlists.add_member("a", "x");
        playlists.add_member("a", "y");
        playlists.add_member("b", "y");
        playlists.add_member("b", "z");

        let ids = playlists.referenced_ids();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("x") && ids.contains("y") && ids.contains("z"));
    }

    #[test]
    fn test_rename_refuses_to_clobber() {
        let mut playlists = PlaylistIndex::new();
        playlists.create("a");
        playlists.create("b");
        assert!(!playlists.rename("a", "b"));
        assert!(playlists.rename("a", "c"));
        assert!(playlists.contains("c") && !playlists.contains("a"));
    }

    #[test]
    fn test_purge_id_clears_every_reference() {
        let mut playlists = PlaylistIndex::new();
        playlists.add_member("a", "x");
        playlists.add_member("b", "x");
        playlists.add_member("b", "y");
        playlists.purge_id("x");
        assert!(!playlists.is_referenced("x"));
        assert!(playlists.is_referenced("y"));
    }
}
