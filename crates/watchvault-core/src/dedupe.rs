use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::trace;
use watchvault_models::{Detection, VideoRecord};

use crate::identity::{
    is_placeholder_title, normalize_title, strip_tracking_params, IdentityResolver,
    ResolvedIdentity,
};

/// Admission decision for one detection against the existing population.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Create(VideoRecord),
    Update { id: String },
    Reject,
}

/// Extensions that mark a direct media-file URL. Never stored as a page url.
const MEDIA_FILE_EXTENSIONS: &[&str] = &[
    ".mp4", ".webm", ".m3u8", ".mov", ".avi", ".mkv", ".flv", ".ogv", ".m4v",
];

/// Path/query markers of a canonical video page.
const VIDEO_PAGE_MARKERS: &[&str] = &["/watch", "?v=", "/embed/", "/video/", "/videos/", "viewkey="];

const PLATFORM_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "pornhub.com",
    "dailymotion.com",
    "dai.ly",
    "twitch.tv",
];

/// Decides create / update-in-place / discard for incoming detections.
pub struct DedupeEngine {
    resolver: IdentityResolver,
}

impl DedupeEngine {
    pub fn new() -> Self {
        Self {
            resolver: IdentityResolver::new(),
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Run the admission algorithm against the history partition.
    ///
    /// Order is fixed: resolver rejection, native-id match, then a
    /// same-platform page/title similarity scan, then create.
    pub fn admit(
        &self,
        detection: &Detection,
        history: &BTreeMap<String, VideoRecord>,
        now: DateTime<Utc>,
    ) -> Admission {
        let identity = match self.resolver.resolve(detection) {
            Some(identity) => identity,
            None => return Admission::Reject,
        };

        // Native ids key the map directly, so a record id hit is the
        // strongest possible match.
        if history.contains_key(&identity.record_id) {
            return Admission::Update {
                id: identity.record_id,
            };
        }

        if let Some(native) = &identity.platform_video_id {
            // A record created before native extraction learned this URL
            // shape may carry the native id in its field but not its key.
            if let Some(existing) = history
                .values()
                .find(|r| r.platform == identity.platform && r.platform_video_id.as_deref() == Some(native))
            {
                return Admission::Update {
                    id: existing.id.clone(),
                };
            }
        }

        if let Some(existing) = self.find_similar(&identity, history) {
            trace!(
                "Detection for {:?} merged into existing record {} by similarity",
                detection.title,
                existing
            );
            return Admission::Update { id: existing };
        }

        Admission::Create(new_record(detection, &identity, now))
    }

    /// Same platform, same normalized page, and one normalized title
    /// contains the other (or they are equal).
    fn find_similar(
        &self,
        identity: &ResolvedIdentity,
        history: &BTreeMap<String, VideoRecord>,
    ) -> Option<String> {
        let (page, title) = identity.dedupe_key.split_once('|')?;
        for record in history.values() {
            if record.platform != identity.platform {
                continue;
            }
            let Some((existing_page, existing_title)) = record.dedupe_key.split_once('|') else {
                continue;
            };
            if existing_page != page {
                continue;
            }
            if titles_similar(existing_title, title) {
                return Some(record.id.clone());
            }
        }
        None
    }
}

impl Default for DedupeEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn titles_similar(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a == b || a.contains(b) || b.contains(a))
}

fn new_record(detection: &Detection, identity: &ResolvedIdentity, now: DateTime<Utc>) -> VideoRecord {
    VideoRecord {
        id: identity.record_id.clone(),
        url: sanitize_url(&detection.url),
        title: detection.title.trim().to_string(),
        thumbnail: detection.thumbnail.clone(),
        platform: identity.platform,
        platform_video_id: identity.platform_video_id.clone(),
        watched_at: now,
        rating: 0,
        dedupe_key: identity.dedupe_key.clone(),
    }
}

fn sanitize_url(raw: &str) -> String {
    strip_tracking_params(raw)
}

/// Deterministic merge of a re-detection into an existing record.
///
/// `title` and `rating` are user-owned and never touched here.
pub fn merge_detection(
    existing: &mut VideoRecord,
    detection: &Detection,
    identity: &ResolvedIdentity,
    now: DateTime<Utc>,
) {
    // Refresh moves the record to the top of recency-sorted views; the
    // timestamp never goes backwards.
    if now > existing.watched_at {
        existing.watched_at = now;
    }

    let incoming_url = sanitize_url(&detection.url);
    if is_better_video_url(&incoming_url, &existing.url) {
        existing.url = incoming_url;
    }

    if existing.thumbnail.is_empty() && !detection.thumbnail.is_empty() {
        existing.thumbnail = detection.thumbnail.clone();
    }

    if existing.platform_video_id.is_none() {
        existing.platform_video_id = identity.platform_video_id.clone();
    }
}

/// Should `incoming` replace `stored` as the record's page URL?
pub fn is_better_video_url(incoming: &str, stored: &str) -> bool {
    if incoming.is_empty() || is_media_file_url(incoming) {
        return false;
    }
    if stored.is_empty() || is_media_file_url(stored) {
        return true;
    }
    let incoming_canonical = is_canonical_video_url(incoming);
    let stored_canonical = is_canonical_video_url(stored);
    if incoming_canonical && !stored_canonical {
        return true;
    }
    if incoming_canonical == stored_canonical {
        // More specific means a longer path on the same page family.
        return incoming_canonical && url_path_len(incoming) > url_path_len(stored);
    }
    false
}

pub fn is_media_file_url(url: &str) -> bool {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_lowercase();
    MEDIA_FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub fn is_canonical_video_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    if VIDEO_PAGE_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|host| {
            let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
            PLATFORM_DOMAINS
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
        })
        .unwrap_or(false)
}

fn url_path_len(url: &str) -> usize {
    url::Url::parse(url)
        .map(|u| u.path().len())
        .unwrap_or(0)
}

/// Pick the survivor between two records with the same identity.
///
/// Non-placeholder title beats placeholder, longer title beats shorter,
/// most recent watch breaks ties. Returns true when `a` wins.
pub fn prefer_first(a: &VideoRecord, b: &VideoRecord) -> bool {
    let a_placeholder = is_placeholder_title(&a.title);
    let b_placeholder = is_placeholder_title(&b.title);
    if a_placeholder != b_placeholder {
        return b_placeholder;
    }
    let a_len = normalize_title(&a.title).len();
    let b_len = normalize_title(&b.title).len();
    if a_len != b_len {
        return a_len > b_len;
    }
    a.watched_at >= b.watched_at
}
