use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::trace;
use url::Url;
use watchvault_models::{Detection, Platform};

/// Stable identity derived from one detection.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    /// `<platform>:<native-id>` when a native id was extracted, otherwise a
    /// deterministic digest of the normalized `(host+path, title)` pair.
    pub record_id: String,
    /// `<host+path>|<normalized title>`, the looser similarity key.
    pub dedupe_key: String,
    pub platform: Platform,
    pub platform_video_id: Option<String>,
}

/// Query parameters stripped before a URL contributes to identity.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "yclid", "ref", "ref_src", "source", "tracking", "igshid", "si", "spm",
];

/// Normalized titles that carry no identity at all.
const PLACEHOLDER_TITLES: &[&str] = &[
    "shorts",
    "loading",
    "undefined",
    "null",
    "player",
    "video",
    "watch",
    "home",
    "untitled",
    "youtube",
    "vimeo",
    "pornhub",
    "dailymotion",
    "twitch",
];

const MIN_TITLE_CHARS: usize = 3;

struct NativeIdExtractor {
    platform: Platform,
    host_suffixes: &'static [&'static str],
    pattern: Regex,
}

/// Derives a stable record id and a dedupe key from raw detection tuples.
///
/// Native-id extraction strategies are an ordered table tried first-match;
/// the first strategy whose host matches and whose pattern captures wins.
pub struct IdentityResolver {
    extractors: Vec<NativeIdExtractor>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        let extractors = vec![
            NativeIdExtractor {
                platform: Platform::Youtube,
                host_suffixes: &["youtube.com", "youtu.be", "youtube-nocookie.com"],
                pattern: Regex::new(
                    r"(?:[?&]v=|youtu\.be/|/embed/|/shorts/|/live/)([A-Za-z0-9_-]{11})",
                )
                .expect("youtube pattern"),
            },
            NativeIdExtractor {
                platform: Platform::Vimeo,
                host_suffixes: &["vimeo.com"],
                pattern: Regex::new(r"vimeo\.com/(?:video/)?(\d+)").expect("vimeo pattern"),
            },
            NativeIdExtractor {
                platform: Platform::Pornhub,
                host_suffixes: &["pornhub.com"],
                pattern: Regex::new(r"viewkey=([0-9a-zA-Z]+)").expect("pornhub pattern"),
            },
            NativeIdExtractor {
                platform: Platform::Dailymotion,
                host_suffixes: &["dailymotion.com", "dai.ly"],
                pattern: Regex::new(r"(?:dailymotion\.com/video/|dai\.ly/)([a-zA-Z0-9]+)")
                    .expect("dailymotion pattern"),
            },
            NativeIdExtractor {
                platform: Platform::Twitch,
                host_suffixes: &["twitch.tv"],
                pattern: Regex::new(r"twitch\.tv/videos/(\d+)").expect("twitch pattern"),
            },
        ];
        Self { extractors }
    }

    /// Resolve a detection to an identity, or None when the detection
    /// carries no usable identity and must be discarded.
    pub fn resolve(&self, detection: &Detection) -> Option<ResolvedIdentity> {
        let parsed = match Url::parse(detection.url.trim()) {
            Ok(url) => url,
            Err(e) => {
                trace!("Rejecting detection with unparsable url {:?}: {}", detection.url, e);
                return None;
            }
        };

        let normalized_title = normalize_title(&detection.title);
        if !is_usable_title(&normalized_title) {
            trace!("Rejecting detection with placeholder title {:?}", detection.title);
            return None;
        }

        let page_key = normalized_page_key(&parsed);
        let dedupe_key = format!("{}|{}", page_key, normalized_title);

        if let Some((platform, native_id)) = self.extract_native_id(&parsed) {
            return Some(ResolvedIdentity {
                record_id: format!("{}:{}", platform, native_id),
                dedupe_key,
                platform,
                platform_video_id: Some(native_id),
            });
        }

        let platform = detection
            .platform
            .filter(|p| *p != Platform::Generic)
            .unwrap_or_else(|| platform_for_host(parsed.host_str().unwrap_or_default()));

        Some(ResolvedIdentity {
            record_id: format!("{}:v1:{}", platform, digest(&page_key, &normalized_title)),
            dedupe_key,
            platform,
            platform_video_id: None,
        })
    }

    fn extract_native_id(&self, url: &Url) -> Option<(Platform, String)> {
        let host = url.host_str()?.to_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        for extractor in &self.extractors {
            if !extractor
                .host_suffixes
                .iter()
                .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
            {
                continue;
            }
            if let Some(caps) = extractor.pattern.captures(url.as_str()) {
                return Some((extractor.platform, caps[1].to_string()));
            }
        }
        None
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased host plus path, trailing slash trimmed, query dropped.
fn normalized_page_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let path = url.path().trim_end_matches('/');
    format!("{}{}", host, path)
}

/// Drop tracking query parameters from a URL, keeping everything else.
/// Used when storing a page URL, not for identity (identity drops the whole
/// query).
pub fn strip_tracking_params(raw: &str) -> String {
    let mut url = match Url::parse(raw.trim()) {
        Ok(url) => url,
        Err(_) => return raw.trim().to_string(),
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (name, value) in &kept {
            pairs.append_pair(name, value);
        }
        drop(pairs);
    }
    url.to_string()
}

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_space = false;
    for c in title.to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

fn is_usable_title(normalized: &str) -> bool {
    let meaningful = normalized.chars().filter(|c| !c.is_whitespace()).count();
    if meaningful < MIN_TITLE_CHARS {
        return false;
    }
    if PLACEHOLDER_TITLES.contains(&normalized) {
        return false;
    }
    // "comments" / "comments 12" style placeholders from comment widgets
    if let Some(rest) = normalized.strip_prefix("comments") {
        if rest.trim().chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }
    true
}

/// Is `normalized` a placeholder or near-empty title? Exposed for the
/// duplicate-retention rule, which prefers real titles over placeholders.
pub fn is_placeholder_title(title: &str) -> bool {
    !is_usable_title(&normalize_title(title))
}

fn platform_for_host(host: &str) -> Platform {
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    for (suffix, platform) in [
        ("youtube.com", Platform::Youtube),
        ("youtu.be", Platform::Youtube),
        ("vimeo.com", Platform::Vimeo),
        ("pornhub.com", Platform::Pornhub),
        ("dailymotion.com", Platform::Dailymotion),
        ("dai.ly", Platform::Dailymotion),
        ("twitch.tv", Platform::Twitch),
    ] {
        if host == suffix || host.ends_with(&format!(".{}", suffix)) {
            return platform;
        }
    }
    Platform::Generic
}

fn digest(page_key: &str, normalized_title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(page_key.as_bytes());
    hasher.update(b"|");
    hasher.update(normalized_title.as_bytes());
    let bytes = hasher.finalize();
    // 16 hex chars is plenty for a per-user store.
    bytes[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new()
    }

    #[test]
    fn test_youtube_native_id_is_stable_across_urls_and_titles() {
        let a = resolver()
            .resolve(&Detection::new(
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42",
                "Official Video",
            ))
            .unwrap();
        let b = resolver()
            .resolve(&Detection::new(
                "https://youtu.be/dQw4w9WgXcQ?si=tracking",
                "official video (full)",
            ))
            .unwrap();

        assert_eq!(a.record_id, "youtube:dQw4w9WgXcQ");
        assert_eq!(a.record_id, b.record_id);
        assert_eq!(a.platform, Platform::Youtube);
        assert_eq!(a.platform_video_id.as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn test_native_id_extraction_per_platform() {
        let cases = [
            ("https://vimeo.com/123456789", "vimeo:123456789"),
            ("https://vimeo.com/video/99", "vimeo:99"),
            (
                "https://www.pornhub.com/view_video.php?viewkey=ph5f1a2b3c4d5e6",
                "pornhub:ph5f1a2b3c4d5e6",
            ),
            (
                "https://www.dailymotion.com/video/x7tgad0",
                "dailymotion:x7tgad0",
            ),
            ("https://dai.ly/x7tgad0", "dailymotion:x7tgad0"),
            ("https://www.twitch.tv/videos/1234567890", "twitch:1234567890"),
            (
                "https://www.youtube.com/embed/abcdefghijk",
                "youtube:abcdefghijk",
            ),
            (
                "https://www.youtube.com/shorts/AAAAAAAAAAA",
                "youtube:AAAAAAAAAAA",
            ),
        ];
        for (url, expected) in cases {
            let identity = resolver()
                .resolve(&Detection::new(url, "A real title"))
                .unwrap();
            assert_eq!(identity.record_id, expected, "url: {}", url);
        }
    }

    #[test]
    fn test_derived_id_ignores_tracking_params_and_query() {
        let a = resolver()
            .resolve(&Detection::new(
                "https://example.com/clips/weekly?utm_source=feed&fbclid=xyz",
                "Weekly Roundup #4",
            ))
            .unwrap();
        let b = resolver()
            .resolve(&Detection::new(
                "https://example.com/clips/weekly/",
                "Weekly, Roundup  4!",
            ))
            .unwrap();

        assert_eq!(a.record_id, b.record_id);
        assert_eq!(a.dedupe_key, "example.com/clips/weekly|weekly roundup 4");
        assert!(a.record_id.starts_with("generic:v1:"));
        assert!(a.platform_video_id.is_none());
    }

    #[test]
    fn test_rejects_placeholder_and_short_titles() {
        let rejected = [
            "Shorts", "loading", "undefined", "player", "YouTube", "Comments 12", "comments", "ab",
            "  - ", "",
        ];
        for title in rejected {
            assert!(
                resolver()
                    .resolve(&Detection::new("https://example.com/v/1", title))
                    .is_none(),
                "title {:?} should be rejected",
                title
            );
        }
        assert!(resolver()
            .resolve(&Detection::new("https://example.com/v/1", "abc"))
            .is_some());
    }

    #[test]
    fn test_rejects_unparsable_url() {
        assert!(resolver()
            .resolve(&Detection::new("not a url", "A real title"))
            .is_none());
    }

    #[test]
    fn test_platform_hint_used_for_derived_ids() {
        let identity = resolver()
            .resolve(
                &Detection::new("https://cdn.example.net/pages/clip", "Great Clip")
                    .with_platform(Platform::Twitch),
            )
            .unwrap();
        assert_eq!(identity.platform, Platform::Twitch);
        assert!(identity.record_id.starts_with("twitch:v1:"));
    }

    #[test]
    fn test_strip_tracking_params_keeps_real_query() {
        let stripped = strip_tracking_params(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&utm_source=x&si=abc",
        );
        assert_eq!(stripped, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        let untouched = strip_tracking_params("https://example.com/v?page=2");
        assert_eq!(untouched, "https://example.com/v?page=2");
    }

    #[test]
    fn test_normalize_title_collapses_punctuation_and_whitespace() {
        assert_eq!(normalize_title("  Hello,   WORLD!! (remix) "), "hello world remix");
        assert_eq!(normalize_title("a/b: c"), "a b c");
    }
}
