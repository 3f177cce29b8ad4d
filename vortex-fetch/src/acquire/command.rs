//! Downloader command construction

use std::path::{Path, PathBuf};

use reqwest::Url;
use vortex_common::config::CredentialProfile;

use crate::error::{FetchError, FetchResult};
use crate::process::{CommandSpec, ProgressStream};

/// Video selector: MP4 capped at 720p, falling back to the best single file
pub const VIDEO_FORMAT: &str =
    "bestvideo[ext=mp4][height<=720]+bestaudio[ext=m4a]/best[ext=mp4][height<=720]/best";

/// What the downloader should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    AudioOnly,
}

/// Builds downloader invocations for one downloads directory
#[derive(Debug, Clone)]
pub struct DownloadCommands {
    yt_dlp: PathBuf,
    download_dir: PathBuf,
    max_filesize_mb: u64,
    credentials: Vec<CredentialProfile>,
}

impl DownloadCommands {
    pub fn new(
        yt_dlp: impl Into<PathBuf>,
        download_dir: impl Into<PathBuf>,
        max_filesize_mb: u64,
        credentials: Vec<CredentialProfile>,
    ) -> Self {
        Self {
            yt_dlp: yt_dlp.into(),
            download_dir: download_dir.into(),
            max_filesize_mb,
            credentials,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Output template placing every file under the request prefix
    pub fn output_template(&self, prefix: &str) -> String {
        self.download_dir
            .join(format!("{prefix}%(title).80s.%(ext)s"))
            .display()
            .to_string()
    }

    pub fn download_command(&self, url: &Url, prefix: &str, kind: MediaKind) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.yt_dlp)
            .args(["--newline", "--no-playlist", "--no-mtime"])
            .args(["--max-filesize".to_string(), format!("{}M", self.max_filesize_mb)])
            .args(["-o".to_string(), self.output_template(prefix)])
            .with_progress(ProgressStream::Stdout);

        cmd = match kind {
            MediaKind::Video => cmd
                .args(["-f", VIDEO_FORMAT])
                .args(["--merge-output-format", "mp4"]),
            MediaKind::AudioOnly => cmd
                .args(["-f", "bestaudio"])
                .args(["-x", "--audio-format", "mp3", "--audio-quality", "0"]),
        };

        if let Some(cookie_file) = self.cookie_file_for(url) {
            cmd = cmd.arg("--cookies").arg(cookie_file.display().to_string());
        }

        cmd.arg(url.as_str())
    }

    /// Cookie file of the first profile matching the URL host, if it exists
    pub fn cookie_file_for(&self, url: &Url) -> Option<&Path> {
        let host = url.host_str()?;
        let profile = self
            .credentials
            .iter()
            .find(|p| p.domains.iter().any(|d| host_matches(host, d)))?;
        profile
            .cookie_file
            .as_deref()
            .filter(|path| path.exists())
    }
}

/// Accept only absolute http(s) URLs
pub fn validate_source(source: &str) -> FetchResult<Url> {
    let url = Url::parse(source.trim())
        .map_err(|e| FetchError::InvalidSource(format!("{source}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(FetchError::InvalidSource(source.to_string())),
    }
}

/// Host equals `domain` or is a subdomain of it
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}
