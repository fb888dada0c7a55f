//! Track metadata: embedded tags and iTunes Search lookups.

use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

const ITUNES_BASE_URL: &str = "https://itunes.apple.com";
const ITUNES_TIMEOUT: Duration = Duration::from_secs(8);

/// Minimal track metadata plus an artwork URL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
}

impl TrackInfo {
    /// Free-form search term: `artist title` when tagged, else the bare title.
    pub fn search_term(&self) -> Option<String> {
        match (self.artist.as_deref(), self.title.as_deref()) {
            (Some(artist), Some(title)) => Some(format!("{artist} {title}")),
            (None, Some(title)) => Some(title.to_string()),
            _ => None,
        }
    }

    /// Fill missing fields from `other`.
    pub fn merge(&mut self, other: TrackInfo) {
        self.title = self.title.take().or(other.title);
        self.artist = self.artist.take().or(other.artist);
        self.album = self.album.take().or(other.album);
        self.artwork_url = self.artwork_url.take().or(other.artwork_url);
    }
}

/// Read title/artist/album tags from `path`.
///
/// Untagged or unreadable files fall back to the file stem as the title.
pub fn read_tags(path: &Path) -> TrackInfo {
    let mut info = probe_tags(path).unwrap_or_else(|err| {
        tracing::debug!(path = %path.display(), error = %err, "tag probe failed");
        TrackInfo::default()
    });
    if info.title.is_none() {
        info.title = path
            .file_stem()
            .and_then(OsStr::to_str)
            .map(str::to_string);
    }
    info
}

fn probe_tags(path: &Path) -> Result<TrackInfo> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(ext);
    }
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("probe container")?;

    let mut info = TrackInfo::default();
    // Tags can live in the probe-level metadata (ID3v2 ahead of MP3) or in the container.
    if let Some(metadata) = probed.metadata.get() {
        if let Some(rev) = metadata.current() {
            apply_tags(&mut info, rev);
        }
    }
    if let Some(rev) = probed.format.metadata().current() {
        apply_tags(&mut info, rev);
    }
    Ok(info)
}

fn apply_tags(info: &mut TrackInfo, rev: &MetadataRevision) {
    for tag in rev.tags() {
        let slot = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => &mut info.title,
            Some(StandardTagKey::Artist) => &mut info.artist,
            Some(StandardTagKey::Album) => &mut info.album,
            _ => continue,
        };
        if slot.is_none() {
            let value = tag.value.to_string();
            let value = value.trim();
            if !value.is_empty() {
                *slot = Some(value.to_string());
            }
        }
    }
}

/// Client for the public iTunes Search API (no key required).
pub struct ItunesClient {
    base_url: String,
    agent: ureq::Agent,
}

impl ItunesClient {
    pub fn new() -> Self {
        Self::with_base_url(ITUNES_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(ITUNES_TIMEOUT))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    /// Best song match for a free-form `term`.
    pub fn lookup(&self, term: &str) -> Result<TrackInfo> {
        let url = format!("{}/search", self.base_url);
        let resp = self
            .agent
            .get(&url)
            .query("term", term)
            .query("entity", "song")
            .query("limit", "1")
            .call()
            .with_context(|| format!("itunes request failed url={url}"))?;
        let body = resp
            .into_body()
            .with_config()
            .limit(1_000_000)
            .read_to_string()
            .context("itunes response read failed")?;
        let info = parse_search_response(&body)?;
        tracing::debug!(term, title = ?info.title, artist = ?info.artist, "itunes match");
        Ok(info)
    }
}

impl Default for ItunesClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    result_count: u32,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    track_name: Option<String>,
    artist_name: Option<String>,
    collection_name: Option<String>,
    artwork_url100: Option<String>,
}

/// Parse a search response, taking the first result.
pub fn parse_search_response(body: &str) -> Result<TrackInfo> {
    let parsed: SearchResponse =
        serde_json::from_str(body).context("itunes response parse failed")?;
    if parsed.result_count == 0 {
        bail!("no results");
    }
    let first = parsed
        .results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no results"))?;
    Ok(TrackInfo {
        title: first.track_name,
        artist: first.artist_name,
        album: first.collection_name,
        artwork_url: first.artwork_url100.map(|url| upgrade_artwork(&url)),
    })
}

/// Ask for the 600px rendition of a 100px artwork URL.
fn upgrade_artwork(url: &str) -> String {
    url.replacen("100x100bb.jpg", "600x600bb.jpg", 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_wav_i16;

    const RESPONSE: &str = r#"{
        "resultCount": 2,
        "results": [
            {
                "trackName": "Teardrop",
                "artistName": "Massive Attack",
                "collectionName": "Mezzanine",
                "artworkUrl100": "https://is1.mzstatic.com/image/thumb/x/100x100bb.jpg"
            },
            {
                "trackName": "Angel",
                "artistName": "Massive Attack"
            }
        ]
    }"#;

    #[test]
    fn parse_takes_first_result_and_upgrades_artwork() {
        let info = parse_search_response(RESPONSE).unwrap();
        assert_eq!(info.title.as_deref(), Some("Teardrop"));
        assert_eq!(info.artist.as_deref(), Some("Massive Attack"));
        assert_eq!(info.album.as_deref(), Some("Mezzanine"));
        assert_eq!(
            info.artwork_url.as_deref(),
            Some("https://is1.mzstatic.com/image/thumb/x/600x600bb.jpg")
        );
    }

    #[test]
    fn parse_rejects_empty_results() {
        let err = parse_search_response(r#"{"resultCount":0,"results":[]}"#).unwrap_err();
        assert_eq!(err.to_string(), "no results");
        assert!(parse_search_response(r#"{"resultCount":1,"results":[]}"#).is_err());
        assert!(parse_search_response("<html>").is_err());
    }

    #[test]
    fn artwork_without_size_marker_is_kept() {
        assert_eq!(upgrade_artwork("https://x/art.png"), "https://x/art.png");
    }

    #[test]
    fn search_term_prefers_artist_and_title() {
        let mut info = TrackInfo {
            title: Some("Song".into()),
            artist: Some("Band".into()),
            ..TrackInfo::default()
        };
        assert_eq!(info.search_term().as_deref(), Some("Band Song"));
        info.artist = None;
        assert_eq!(info.search_term().as_deref(), Some("Song"));
        info.title = None;
        assert_eq!(info.search_term(), None);
    }

    #[test]
    fn merge_keeps_existing_fields() {
        let mut local = TrackInfo {
            title: Some("Local".into()),
            ..TrackInfo::default()
        };
        local.merge(TrackInfo {
            title: Some("Remote".into()),
            album: Some("Album".into()),
            ..TrackInfo::default()
        });
        assert_eq!(local.title.as_deref(), Some("Local"));
        assert_eq!(local.album.as_deref(), Some("Album"));
    }

    #[test]
    fn untagged_file_falls_back_to_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Quiet Ramp.wav");
        write_wav_i16(&path, 8_000, 1, 800);
        let info = read_tags(&path);
        assert_eq!(info.title.as_deref(), Some("Quiet Ramp"));
        assert!(info.artist.is_none());
    }

    #[test]
    fn unreadable_file_still_has_title() {
        let info = read_tags(Path::new("/no/such/dir/Track 01.mp3"));
        assert_eq!(info.title.as_deref(), Some("Track 01"));
    }
}
