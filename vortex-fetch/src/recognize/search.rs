//! Text search used to find a source for a recognized track

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::acquire::diagnostic_excerpt;
use crate::error::{FetchError, FetchResult};
use crate::process::{CommandSpec, NoProgress, ProcessRunner};

/// Title words that suggest an upload is the track itself
const PREFERRED_MARKERS: &[&str] = &["official", "audio", "topic"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCandidate {
    pub title: String,
    pub channel: String,
    pub locator: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> FetchResult<Vec<SearchCandidate>>;
}

/// First candidate whose title or channel carries a preferred marker,
/// otherwise the top result
pub fn pick_candidate(candidates: &[SearchCandidate]) -> Option<&SearchCandidate> {
    candidates
        .iter()
        .find(|c| {
            let haystack = format!("{} {}", c.title, c.channel).to_lowercase();
            PREFERRED_MARKERS.iter().any(|m| haystack.contains(m))
        })
        .or_else(|| candidates.first())
}

/// YouTube search through `yt-dlp --flat-playlist`
pub struct YtDlpSearch {
    runner: Arc<dyn ProcessRunner>,
    yt_dlp: PathBuf,
    max_results: u32,
}

impl YtDlpSearch {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        yt_dlp: impl Into<PathBuf>,
        max_results: u32,
    ) -> Self {
        Self {
            runner,
            yt_dlp: yt_dlp.into(),
            max_results: max_results.max(1),
        }
    }

    pub fn command(&self, query: &str) -> CommandSpec {
        CommandSpec::new(&self.yt_dlp)
            .args(["--flat-playlist", "--dump-json", "--no-warnings", "--skip-download"])
            .arg(format!("ytsearch{}:{}", self.max_results, query))
    }
}

#[async_trait]
impl SearchProvider for YtDlpSearch {
    async fn search(&self, query: &str) -> FetchResult<Vec<SearchCandidate>> {
        let outcome = self.runner.run(&self.command(query), &mut NoProgress).await?;
        if !outcome.success() {
            return Err(FetchError::SearchFailed(diagnostic_excerpt(
                &outcome.stderr,
                &outcome.stdout,
            )));
        }
        let candidates = parse_search_output(&outcome.stdout);
        debug!(query, results = candidates.len(), "Search finished");
        Ok(candidates)
    }
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
}

impl FlatEntry {
    fn locator(&self) -> Option<String> {
        let is_web = |u: &&String| u.starts_with("http://") || u.starts_with("https://");
        self.webpage_url
            .as_ref()
            .filter(is_web)
            .or_else(|| self.url.as_ref().filter(is_web))
            .cloned()
            .or_else(|| {
                self.id
                    .as_ref()
                    .map(|id| format!("https://www.youtube.com/watch?v={id}"))
            })
    }
}

/// One JSON object per line; malformed lines are skipped
pub fn parse_search_output(stdout: &str) -> Vec<SearchCandidate> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<FlatEntry>(l).ok())
        .filter_map(|entry| {
            let locator = entry.locator()?;
            Some(SearchCandidate {
                title: entry.title.clone().unwrap_or_default(),
                channel: entry
                    .channel
                    .clone()
                    .or_else(|| entry.uploader.clone())
                    .unwrap_or_default(),
                locator,
            })
        })
        .collect()
}
