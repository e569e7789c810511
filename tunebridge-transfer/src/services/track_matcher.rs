//! Track matching
//!
//! Finds the best candidate for a source track on a target provider and
//! scores it in [0, 1]. Two scoring paths:
//!
//! - **Structured**: the provider returns separate title and artist fields;
//!   the top search result is scored by name and artist similarity.
//! - **Unstructured**: the provider only exposes free-text video titles; up
//!   to five candidates are scored by keyword presence and the best one is
//!   decomposed into (artist, track).

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tunebridge_common::Track;

use crate::error::ProviderError;
use crate::providers::{MusicProvider, SearchCandidate, TitleMetadata};

/// Marketing suffixes stripped from video titles (case-sensitive, anywhere in the title)
const TITLE_SUFFIXES: &[&str] = &[
    "(Official Video)",
    "(Official Audio)",
    "[Official Video]",
    "[Official Audio]",
    "(Official Music Video)",
    "[Official Music Video]",
    "(Lyric Video)",
    "[Lyric Video]",
    "(Visualizer)",
    "[Visualizer]",
    "(Lyrics)",
    "[Lyrics]",
    "(Live)",
    "[Live]",
    "(Acoustic)",
    "[Acoustic]",
    "(Remix)",
    "[Remix]",
    "(Cover)",
    "[Cover]",
    "| Official Video",
    "| Official Audio",
    "| Official Music Video",
];

/// Version markers cut from already-normalized track names
const VERSION_SUFFIXES: &[&str] = &[
    " - remaster",
    " (remaster",
    " - live",
    " (live",
    " - acoustic",
    " (acoustic",
];

/// Unstructured results considered per search
pub const MAX_CANDIDATES: usize = 5;

/// "Artist - Track", "Artist: Track", "Artist | Track", tried in order
fn separator_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"^(.*?)\s*[-–—]\s*(.*)$", r"^(.*?)\s*:\s*(.*)$", r"^(.*?)\s*\|\s*(.*)$"]
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// A candidate chosen for a source track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub track: Track,
    pub confidence: f64,
}

impl MatchResult {
    /// Nothing found; callers record the source track as `not_found`
    pub fn none() -> Self {
        Self {
            track: Track::empty(),
            confidence: 0.0,
        }
    }

    pub fn is_found(&self) -> bool {
        !self.track.is_empty()
    }
}

/// Split a free-text video title into `(artist, track)`
///
/// Falls back to `("", cleaned_title)` when no separator yields two
/// non-empty parts.
pub fn parse_video_title(title: &str) -> (String, String) {
    let mut cleaned = title.trim().to_string();
    for suffix in TITLE_SUFFIXES {
        cleaned = cleaned.replace(suffix, "");
    }
    let cleaned = cleaned.trim();

    for pattern in separator_patterns() {
        if let Some(caps) = pattern.captures(cleaned) {
            let artist = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let track = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            if !artist.is_empty() && !track.is_empty() {
                return (artist.to_string(), track.to_string());
            }
        }
    }

    (String::new(), cleaned.to_string())
}

/// Trimmed, lower-cased
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Cut a normalized name at the first version marker
pub fn remove_common_suffixes(name: &str) -> String {
    let mut result = name;
    for suffix in VERSION_SUFFIXES {
        if let Some(idx) = result.find(suffix) {
            result = &result[..idx];
        }
    }
    result.trim().to_string()
}

/// Score a structured candidate against the source track
///
/// Name: 0.6 equal, 0.4 containment, 0.5 equal after removing version
/// markers. Artist: 0.4 equal, 0.2 containment. Sub-scores add.
pub fn structured_confidence(
    source_name: &str,
    source_artist: &str,
    target_name: &str,
    target_artist: &str,
) -> f64 {
    let source_name = normalize(source_name);
    let target_name = normalize(target_name);
    let source_artist = normalize(source_artist);
    let target_artist = normalize(target_artist);

    let name_score = if source_name == target_name {
        0.6
    } else if source_name.contains(&target_name) || target_name.contains(&source_name) {
        0.4
    } else if remove_common_suffixes(&source_name) == remove_common_suffixes(&target_name) {
        0.5
    } else {
        0.0
    };

    let artist_score = if source_artist == target_artist {
        0.4
    } else if source_artist.contains(&target_artist) || target_artist.contains(&source_artist) {
        0.2
    } else {
        0.0
    };

    f64::min(name_score + artist_score, 1.0)
}

/// Score a free-text candidate against the source track
///
/// +0.4 title contains the track name, +0.3 title contains the artist,
/// +0.2 title contains "official", +0.1 title or description mentions
/// "audio" or "music". An empty track name or artist never scores.
pub fn unstructured_confidence(source: &Track, title: &str, description: &str) -> f64 {
    let title = title.to_lowercase();
    let description = description.to_lowercase();
    let contains = |haystack: &str, needle: &str| {
        let needle = needle.trim().to_lowercase();
        !needle.is_empty() && haystack.contains(&needle)
    };

    let mut confidence = 0.0;
    if contains(&title, &source.title) {
        confidence += 0.4;
    }
    if contains(&title, &source.artist) {
        confidence += 0.3;
    }
    if title.contains("official") {
        confidence += 0.2;
    }
    if ["audio", "music"]
        .iter()
        .any(|word| title.contains(word) || description.contains(word))
    {
        confidence += 0.1;
    }

    f64::min(confidence, 1.0)
}

/// Pick the highest-scoring candidate; ties keep the earliest
pub fn best_unstructured(source: &Track, candidates: &[SearchCandidate]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, candidate) in candidates.iter().take(MAX_CANDIDATES).enumerate() {
        let score = unstructured_confidence(source, &candidate.title, &candidate.description);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((idx, score)),
        }
    }
    best
}

/// Score already-fetched candidates according to the provider's metadata style
pub fn select_match(
    metadata: TitleMetadata,
    source: &Track,
    candidates: &[SearchCandidate],
) -> MatchResult {
    match metadata {
        TitleMetadata::Structured => match candidates.first() {
            Some(top) => MatchResult {
                confidence: structured_confidence(&source.title, &source.artist, &top.title, &top.artist),
                track: Track::new(top.id.clone(), top.title.clone(), top.artist.clone()),
            },
            None => MatchResult::none(),
        },
        TitleMetadata::Unstructured => match best_unstructured(source, candidates) {
            Some((idx, confidence)) => {
                let candidate = &candidates[idx];
                let (artist, title) = parse_video_title(&candidate.title);
                MatchResult {
                    track: Track::new(candidate.id.clone(), title, artist),
                    confidence,
                }
            }
            None => MatchResult::none(),
        },
    }
}

/// Search `provider` for `source` and return the best candidate
///
/// An empty result set is `Ok(MatchResult::none())`, not an error.
pub async fn find_match(
    provider: &dyn MusicProvider,
    access_token: &str,
    source: &Track,
) -> Result<MatchResult, ProviderError> {
    let candidates = provider.search(access_token, source).await?;
    let result = select_match(provider.title_metadata(), source, &candidates);

    if result.is_found() {
        tracing::debug!(
            provider = %provider.provider(),
            source = %format!("{} - {}", source.artist, source.title),
            matched = %format!("{} - {}", result.track.artist, result.track.title),
            confidence = result.confidence,
            "Found track match"
        );
    } else {
        tracing::debug!(
            provider = %provider.provider(),
            "No candidates for {} - {}",
            source.artist,
            source.title
        );
    }

    Ok(result)
}
