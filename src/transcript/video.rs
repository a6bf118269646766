//! Video metadata and ingestion manifests.

use crate::error::{LecternError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// The video that owns a set of chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub chapter: String,
    pub title: String,
    pub url: String,
    /// Duration in seconds, if known.
    #[serde(default)]
    pub duration: Option<u32>,
}

impl VideoMetadata {
    /// Create metadata, deriving the id from chapter and URL.
    pub fn new(chapter: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        let chapter = chapter.into();
        let url = url.into();
        Self {
            id: derive_video_id(&chapter, &url),
            chapter,
            title: title.into(),
            url,
            duration: None,
        }
    }

    /// Override the derived id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_duration(mut self, duration: Option<u32>) -> Self {
        self.duration = duration;
        self
    }

    /// Title with any course/part prefix before the first colon removed.
    pub fn clean_title(&self) -> String {
        clean_title(&self.title)
    }

    /// Chapter as shown to readers: `4` becomes `Chapter 4`, `Chapter 4` stays.
    pub fn chapter_label(&self) -> String {
        let trimmed = self.chapter.trim();
        let prefixed = trimmed
            .get(..7)
            .is_some_and(|head| head.eq_ignore_ascii_case("chapter"));
        if prefixed {
            trimmed.to_string()
        } else {
            format!("Chapter {}", trimmed)
        }
    }

    /// Link into the video at `seconds`, when the URL parses.
    pub fn link_at(&self, seconds: f64) -> Option<String> {
        let mut url = Url::parse(&self.url).ok()?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "t")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("t", &format!("{}s", seconds.max(0.0) as u64));
        }
        Some(url.to_string())
    }
}

/// `<chapter>_<video key>` where the key is the `v` query value for watch
/// URLs and the last path segment otherwise.
pub fn derive_video_id(chapter: &str, url: &str) -> String {
    let key = match Url::parse(url) {
        Ok(parsed) => parsed
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned())
            .or_else(|| {
                parsed
                    .path_segments()
                    .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
            })
            .unwrap_or_else(|| url.to_string()),
        Err(_) => url.rsplit('/').next().unwrap_or(url).to_string(),
    };
    format!("{}_{}", chapter, key)
}

/// Strip a prefix such as `[CS431 - Chapter 4] Part 1:` from a title.
pub fn clean_title(full_title: &str) -> String {
    if let Some((_, rest)) = full_title.split_once('：') {
        return rest.trim().to_string();
    }
    if let Some((_, rest)) = full_title.split_once(':') {
        return rest.trim().to_string();
    }
    full_title.to_string()
}

/// One video listed in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub chapter: String,
    pub title: String,
    pub url: String,
    /// Transcript JSON path, relative to the manifest file.
    pub transcript: PathBuf,
    #[serde(default)]
    pub duration: Option<u32>,
}

impl ManifestEntry {
    /// Video metadata for this entry.
    pub fn metadata(&self) -> VideoMetadata {
        let video = VideoMetadata::new(&self.chapter, &self.title, &self.url)
            .with_duration(self.duration);
        match &self.id {
            Some(id) => video.with_id(id),
            None => video,
        }
    }
}

/// A TOML list of videos to ingest in one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoManifest {
    #[serde(default)]
    pub videos: Vec<ManifestEntry>,
}

impl VideoManifest {
    /// Load a manifest, resolving transcript paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut manifest: VideoManifest = toml::from_str(&content)?;

        if manifest.videos.is_empty() {
            return Err(LecternError::InvalidInput(format!(
                "manifest {} lists no videos",
                path.display()
            )));
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for entry in &mut manifest.videos {
            if entry.transcript.is_relative() {
                entry.transcript = base.join(&entry.transcript);
            }
        }

        Ok(manifest)
    }
}
