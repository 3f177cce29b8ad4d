//! Configuration loading and folder resolution
//!
//! Bootstrap configuration comes from a single TOML file. Resolution order for
//! the file itself:
//! 1. Command-line argument (highest priority)
//! 2. `VORTEX_CONFIG` environment variable
//! 3. Per-user config file, then the system-wide one (Linux only)
//! 4. Built-in defaults (no file at all)
//!
//! Selected values can then be overridden from the environment (see
//! [`TomlConfig::apply_env_overrides`]).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "VORTEX_CONFIG";

const APP_DIR_NAME: &str = "vortex-fetch";

/// Bootstrap configuration loaded from TOML
///
/// Every section is optional; missing values fall back to built-in defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Root folder for runtime data (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Shared downloads directory (defaults to `{root_folder}/downloads`)
    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// External executables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_yt_dlp")]
    pub yt_dlp: PathBuf,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_fpcalc")]
    pub fpcalc: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: default_yt_dlp(),
            ffmpeg: default_ffmpeg(),
            fpcalc: default_fpcalc(),
        }
    }
}

/// Downloader settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Upper bound passed to the downloader and checked after download
    #[serde(default = "default_max_filesize_mb")]
    pub max_filesize_mb: u64,

    /// Cookie profiles, matched against the source host in order
    #[serde(default = "default_credentials")]
    pub credentials: Vec<CredentialProfile>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_filesize_mb: default_max_filesize_mb(),
            credentials: default_credentials(),
        }
    }
}

impl DownloadConfig {
    /// Maximum artifact size in bytes
    pub fn max_filesize_bytes(&self) -> u64 {
        self.max_filesize_mb * 1024 * 1024
    }
}

/// Site-specific cookie material for the downloader
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CredentialProfile {
    pub name: String,
    /// Hosts this profile applies to; subdomains match too
    pub domains: Vec<String>,
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
}

/// Which recognition service answers fingerprint lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionBackend {
    /// Endpoint answering with Shazam-shaped track JSON
    Shazam,
    /// Chromaprint (`fpcalc`) + AcoustID lookup
    AcoustId,
}

/// Recognition service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_backend")]
    pub backend: RecognitionBackend,

    /// Endpoint for the Shazam-compatible backend
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key for the selected backend
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_recognition_timeout_secs")]
    pub timeout_secs: u64,

    /// Length of the audio sample extracted for fingerprinting
    #[serde(default = "default_sample_seconds")]
    pub sample_seconds: u32,

    /// Minimum AcoustID score accepted as a match
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: None,
            api_key: None,
            timeout_secs: default_recognition_timeout_secs(),
            sample_seconds: default_sample_seconds(),
            min_score: default_min_score(),
        }
    }
}

/// Secondary text search settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

/// Upload retry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Progress surface throttling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_status_interval_ms(),
        }
    }
}

/// Speech-to-text service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscriptionConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_transcription_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    /// ISO 639-1 codes accepted; empty accepts every language
    #[serde(default)]
    pub allowed_languages: Vec<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_transcription_endpoint(),
            api_key: None,
            model: default_transcription_model(),
            allowed_languages: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_yt_dlp() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_fpcalc() -> PathBuf {
    PathBuf::from("fpcalc")
}

fn default_max_filesize_mb() -> u64 {
    49
}

fn default_credentials() -> Vec<CredentialProfile> {
    vec![
        CredentialProfile {
            name: "youtube".to_string(),
            domains: vec![
                "youtube.com".to_string(),
                "youtu.be".to_string(),
                "music.youtube.com".to_string(),
            ],
            cookie_file: None,
        },
        CredentialProfile {
            name: "instagram".to_string(),
            domains: vec!["instagram.com".to_string()],
            cookie_file: None,
        },
    ]
}

fn default_backend() -> RecognitionBackend {
    RecognitionBackend::Shazam
}

fn default_recognition_timeout_secs() -> u64 {
    30
}

fn default_sample_seconds() -> u32 {
    20
}

fn default_min_score() -> f64 {
    0.6
}

fn default_max_results() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_status_interval_ms() -> u64 {
    2000
}

fn default_transcription_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

impl TomlConfig {
    /// Apply environment variable overrides on top of file values
    ///
    /// Recognized variables:
    /// - `VORTEX_ROOT_FOLDER`, `VORTEX_DOWNLOAD_DIR`
    /// - `YOUTUBE_COOKIE_FILE`, `INSTAGRAM_COOKIE_FILE`
    /// - `VORTEX_RECOGNITION_API_KEY`, `VORTEX_ACOUSTID_API_KEY`
    /// - `VORTEX_TRANSCRIPTION_API_KEY`
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = env_path("VORTEX_ROOT_FOLDER") {
            self.root_folder = Some(path);
        }
        if let Some(path) = env_path("VORTEX_DOWNLOAD_DIR") {
            self.download_dir = Some(path);
        }
        if let Some(path) = env_path("YOUTUBE_COOKIE_FILE") {
            self.set_cookie_file("youtube", path);
        }
        if let Some(path) = env_path("INSTAGRAM_COOKIE_FILE") {
            self.set_cookie_file("instagram", path);
        }

        let key_var = match self.recognition.backend {
            RecognitionBackend::Shazam => "VORTEX_RECOGNITION_API_KEY",
            RecognitionBackend::AcoustId => "VORTEX_ACOUSTID_API_KEY",
        };
        if let Some(key) = env_value(key_var) {
            self.recognition.api_key = Some(key);
        }
        if let Some(key) = env_value("VORTEX_TRANSCRIPTION_API_KEY") {
            self.transcription.api_key = Some(key);
        }
    }

    fn set_cookie_file(&mut self, profile: &str, path: PathBuf) {
        match self
            .download
            .credentials
            .iter_mut()
            .find(|p| p.name == profile)
        {
            Some(existing) => existing.cookie_file = Some(path),
            None => warn!(
                profile,
                "Cookie file given in environment but no credential profile with that name"
            ),
        }
    }

    /// Effective root folder (configured or OS default)
    pub fn root_folder(&self) -> PathBuf {
        self.root_folder
            .clone()
            .unwrap_or_else(default_root_folder)
    }

    /// Effective shared downloads directory
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.root_folder().join("downloads"))
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_value(name).map(PathBuf::from)
}

/// Locate the config file following the documented priority order
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Some(path) = env_path(CONFIG_ENV_VAR) {
        return Some(path);
    }

    // Priority 3: Per-user, then system-wide config file
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR_NAME).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration: file (if any) + environment overrides
///
/// An explicitly requested file that does not exist is an error; when no file
/// is found by the implicit lookups, built-in defaults are used.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let mut config = match resolve_config_path(cli_arg) {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            info!("Loading configuration from {}", path.display());
            read_toml_config(&path)?
        }
        None => {
            info!("No config file found, using built-in defaults");
            TomlConfig::default()
        }
    };

    config.apply_env_overrides();
    validate(&config)?;
    Ok(config)
}

fn validate(config: &TomlConfig) -> Result<()> {
    if config.download.max_filesize_mb == 0 {
        return Err(Error::Config(
            "download.max_filesize_mb must be greater than zero".to_string(),
        ));
    }
    if config.delivery.max_attempts == 0 {
        return Err(Error::Config(
            "delivery.max_attempts must be at least 1".to_string(),
        ));
    }
    if config.recognition.timeout_secs == 0 {
        return Err(Error::Config(
            "recognition.timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Create runtime directories and report credential file problems
///
/// Returns the downloads directory.
pub fn prepare_environment(config: &TomlConfig) -> Result<PathBuf> {
    let download_dir = config.download_dir();
    std::fs::create_dir_all(&download_dir)?;
    info!("Download directory ensured to exist: {}", download_dir.display());

    for profile in &config.download.credentials {
        match &profile.cookie_file {
            Some(path) if !path.exists() => warn!(
                profile = %profile.name,
                path = %path.display(),
                "Cookie file configured but not found; restricted downloads may fail"
            ),
            Some(path) => info!(
                profile = %profile.name,
                path = %path.display(),
                "Cookie file found"
            ),
            None => warn!(
                profile = %profile.name,
                "No cookie file configured; restricted downloads may fail"
            ),
        }
    }

    Ok(download_dir)
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./vortex_data"))
}
