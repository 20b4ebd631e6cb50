//! Media persistence.
//!
//! Frames may carry photos as inline base64, as raw binary
//! continuations, or as URLs to fetch. Everything lands under
//! `<media_root>/<protocol>_<port>/` with a count-based LRU retention
//! cap. Media failures are reported as sentinel path strings and a log
//! entry; they never suppress the acknowledgement for the frame that
//! carried the payload.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::message::MediaItem;

/// Files kept per media directory.
pub const DEFAULT_MAX_FILES: usize = 25;

/// Bound on URL fetches.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default extension for decoded photos.
const DEFAULT_EXT: &str = "jpg";

/// Media sink for one process.
#[derive(Debug, Clone)]
pub struct MediaSink {
    root: PathBuf,
    max_files: usize,
    http: reqwest::Client,
}

impl MediaSink {
    /// Sink rooted at `root` with the default retention cap.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_max_files(root, DEFAULT_MAX_FILES)
    }

    /// Sink with an explicit per-directory retention cap.
    pub fn with_max_files(root: impl Into<PathBuf>, max_files: usize) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            root: root.into(),
            max_files,
            http,
        }
    }

    /// Decode a base64 body and persist it.
    ///
    /// Returns the saved path, or a sentinel string when decoding or
    /// writing failed.
    pub async fn save_base64(
        &self,
        data: &str,
        protocol: &str,
        port: u16,
        sequence: Option<&str>,
    ) -> String {
        let result = self
            .save_base64_inner(data, protocol, port, sequence)
            .await;
        self.unwrap_or_sentinel(result)
    }

    /// Persist already-decoded binary media.
    pub async fn save_binary(
        &self,
        bytes: &[u8],
        protocol: &str,
        port: u16,
        sequence: Option<&str>,
    ) -> String {
        let result = self
            .write_media(bytes, protocol, port, sequence, DEFAULT_EXT)
            .await;
        self.unwrap_or_sentinel(result)
    }

    /// Fetch a URL (bounded by [`HTTP_TIMEOUT`]) and persist the body.
    /// The extension comes from the URL path.
    pub async fn save_url(
        &self,
        url: &str,
        protocol: &str,
        port: u16,
        sequence: Option<&str>,
    ) -> String {
        let result = self.save_url_inner(url, protocol, port, sequence).await;
        self.unwrap_or_sentinel(result)
    }

    async fn save_base64_inner(
        &self,
        data: &str,
        protocol: &str,
        port: u16,
        sequence: Option<&str>,
    ) -> Result<PathBuf> {
        // Panels wrap base64 bodies across lines; the decoder does not.
        let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| Error::Media(format!("base64 decode failed: {e}")))?;
        self.write_media(&bytes, protocol, port, sequence, DEFAULT_EXT)
            .await
    }

    async fn save_url_inner(
        &self,
        url: &str,
        protocol: &str,
        port: u16,
        sequence: Option<&str>,
    ) -> Result<PathBuf> {
        let ext = url_extension(url).unwrap_or_else(|| DEFAULT_EXT.to_string());
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Media(format!("fetch {url} failed: {e}")))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Media(format!("read {url} failed: {e}")))?;
        self.write_media(&body, protocol, port, sequence, &ext).await
    }

    async fn write_media(
        &self,
        bytes: &[u8],
        protocol: &str,
        port: u16,
        sequence: Option<&str>,
        ext: &str,
    ) -> Result<PathBuf> {
        let dir = self.root.join(format!("{protocol}_{port}"));
        tokio::fs::create_dir_all(&dir).await?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f");
        let seq = sequence
            .filter(|s| !s.is_empty())
            .map(|s| format!("{s}_"))
            .unwrap_or_default();
        let path = dir.join(format!("photo_{seq}{stamp}.{ext}"));

        tokio::fs::write(&path, bytes).await?;
        self.apply_retention(&dir).await;
        Ok(path)
    }

    /// Delete oldest files (by mtime) past the retention cap.
    async fn apply_retention(&self, dir: &Path) {
        let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    files.push((entry.path(), mtime));
                }
            }
        }
        if files.len() <= self.max_files {
            return;
        }
        files.sort_by_key(|(_, mtime)| *mtime);
        let excess = files.len() - self.max_files;
        for (path, _) in files.into_iter().take(excess) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("media retention could not remove {}: {e}", path.display());
            }
        }
    }

    fn unwrap_or_sentinel(&self, result: Result<PathBuf>) -> String {
        match result {
            Ok(path) => path.display().to_string(),
            Err(e) => {
                error!("media save failed: {e}");
                format!("[media error: {e}]")
            }
        }
    }
}

fn url_extension(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let ext = Path::new(parsed.path()).extension()?.to_str()?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Accumulator for multi-part base64 payloads (MASXML `<Payload>`).
///
/// Parts arrive keyed by payload id with a packet number; when the part
/// flagged as last has arrived and the sequence is gapless, the
/// concatenated base64 is handed back for a single decode.
#[derive(Debug, Default)]
pub struct PayloadStore {
    pending: HashMap<String, Pending>,
}

#[derive(Debug, Default)]
struct Pending {
    parts: BTreeMap<u32, String>,
    last_seen: Option<u32>,
}

impl PayloadStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one part. Returns the full concatenated base64 once the
    /// payload is complete; the payload's state is dropped afterwards.
    pub fn push(&mut self, item: &MediaItem) -> Option<String> {
        let MediaItem::PayloadPart {
            payload_id,
            packet_number,
            last,
            data,
        } = item
        else {
            return None;
        };

        let pending = self.pending.entry(payload_id.clone()).or_default();
        if pending.parts.insert(*packet_number, data.clone()).is_some() {
            warn!("payload {payload_id}: duplicate part {packet_number} replaced");
        }
        if *last {
            pending.last_seen = Some(*packet_number);
        }

        // Parts may be numbered from 0 or from 1; complete means a
        // gapless run ending at the part flagged last.
        let last_no = pending.last_seen?;
        let first = *pending.parts.keys().next()?;
        let complete = first <= 1
            && pending.parts.keys().next_back() == Some(&last_no)
            && pending.parts.len() as u32 == last_no - first + 1;
        if !complete {
            return None;
        }

        let pending = self.pending.remove(payload_id)?;
        Some(pending.parts.into_values().collect::<Vec<_>>().concat())
    }

    /// Number of payloads still waiting for parts.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
