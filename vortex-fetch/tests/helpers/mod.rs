//! Test Helper Utilities
//!
//! Scripted stand-ins for the external tools, the chat transport and the
//! remote services, plus a harness that assembles a full pipeline over a
//! temporary download directory.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::Instant;

use vortex_fetch::acquire::{DownloadCommands, MediaAcquirer};
use vortex_fetch::deliver::{RetryPolicy, UploadDeliverer};
use vortex_fetch::jobs::DeferredJobRegistry;
use vortex_fetch::ledger::{Identity, LoggingLedger, UserLedger};
use vortex_fetch::pipeline::{Dispatcher, Inbound, Pipeline, PipelineParts};
use vortex_fetch::process::{CommandSpec, ProcessOutcome, ProcessRunner, ProgressSink};
use vortex_fetch::recognize::{
    AudioExtractor, FingerprintRecognizer, RecognitionService, SearchCandidate, SearchProvider,
    TrackMatch,
};
use vortex_fetch::transcribe::{Segment, Transcriber, Transcript};
use vortex_fetch::transport::{
    Attachment, ChatId, ChatTransport, StatusHandle, TransportError, UploadKind, UploadRef,
};
use vortex_fetch::{FetchError, FetchResult};

const TITLE_FIELD: &str = "%(title).80s";
const EXT_FIELD: &str = "%(ext)s";

// ============================================================================
// Scripted process runner
// ============================================================================

/// How the fake downloader behaves for one source URL
#[derive(Debug, Clone)]
pub struct DownloadScript {
    pub title: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Write the artifact named after `title`
    pub produce_artifact: bool,
    pub artifact_bytes: usize,
    /// Extra names (after the prefix) left behind, e.g. fragments
    pub leftovers: Vec<String>,
    pub progress: Vec<u8>,
    pub delay: Duration,
}

impl DownloadScript {
    pub fn success(title: &str) -> Self {
        Self {
            title: title.to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            produce_artifact: true,
            artifact_bytes: 1024,
            leftovers: Vec::new(),
            progress: vec![10, 55, 100],
            delay: Duration::ZERO,
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.to_string(),
            produce_artifact: false,
            ..Self::success("failed")
        }
    }

    pub fn with_leftovers(mut self, names: &[&str]) -> Self {
        self.leftovers = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Runner that imitates yt-dlp and ffmpeg by creating the files they would
#[derive(Default)]
pub struct FakeRunner {
    downloads: Mutex<HashMap<String, DownloadScript>>,
    search_output: Mutex<String>,
    ffmpeg_fails: Mutex<bool>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_download(&self, url: &str, script: DownloadScript) {
        self.downloads.lock().unwrap().insert(url.to_string(), script);
    }

    pub fn set_search_output(&self, output: &str) {
        *self.search_output.lock().unwrap() = output.to_string();
    }

    pub fn fail_ffmpeg(&self) {
        *self.ffmpeg_fails.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands whose executable file name is `program`
    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.program.file_name().and_then(|n| n.to_str()) == Some(program))
            .collect()
    }

    async fn run_download(
        &self,
        command: &CommandSpec,
        progress: &mut dyn ProgressSink,
    ) -> ProcessOutcome {
        let url = command.args.last().cloned().unwrap_or_default();
        let script = self
            .downloads
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| DownloadScript::success("Some Video"));

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        let template = command.flag_value("-o").unwrap_or_default().to_string();
        let ext = if command.args.iter().any(|a| a == "-x") { "mp3" } else { "mp4" };
        let base = template
            .strip_suffix(&format!("{TITLE_FIELD}.{EXT_FIELD}"))
            .unwrap_or(&template)
            .to_string();

        for name in &script.leftovers {
            std::fs::write(format!("{base}{name}"), b"partial").unwrap();
        }
        for pct in &script.progress {
            progress.on_progress(*pct).await;
        }
        if script.produce_artifact {
            let path = template.replace(TITLE_FIELD, &script.title).replace(EXT_FIELD, ext);
            std::fs::write(path, vec![0u8; script.artifact_bytes]).unwrap();
        }

        ProcessOutcome {
            exit_code: script.exit_code,
            stdout: script.stdout,
            stderr: script.stderr,
        }
    }

    fn run_ffmpeg(&self, command: &CommandSpec) -> ProcessOutcome {
        if *self.ffmpeg_fails.lock().unwrap() {
            return ProcessOutcome {
                exit_code: 1,
                stdout: String::new(),
                stderr: "Invalid data found when processing input".to_string(),
            };
        }
        if let Some(output) = command.args.last() {
            std::fs::write(output, b"RIFF....WAVEfmt ").unwrap();
        }
        ProcessOutcome::default()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<ProcessOutcome> {
        self.calls.lock().unwrap().push(command.clone());

        let program = command
            .program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        match program.as_str() {
            "ffmpeg" => Ok(self.run_ffmpeg(command)),
            "yt-dlp" if command.args.iter().any(|a| a == "--flat-playlist") => {
                let stdout = self.search_output.lock().unwrap().clone();
                Ok(ProcessOutcome {
                    exit_code: 0,
                    stdout,
                    stderr: String::new(),
                })
            }
            "yt-dlp" => Ok(self.run_download(command, progress).await),
            _ => Err(FetchError::SpawnFailed {
                program: program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not scripted"),
            }),
        }
    }
}

// ============================================================================
// Recording transport
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Status { message_id: i64, text: String },
    Edit { message_id: i64, text: String },
    Text(String),
    File {
        name: String,
        attachment: Attachment,
        /// Whether the file existed when the upload was attempted
        existed: bool,
    },
}

/// Transport that records everything and can be told to fail uploads or edits
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    next_message_id: AtomicI64,
    edits_fail: AtomicBool,
    upload_failures: Mutex<VecDeque<TransportError>>,
    upload_attempts: Mutex<Vec<Instant>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next uploads with these errors, in order
    pub fn fail_uploads(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.upload_failures.lock().unwrap().extend(errors);
    }

    /// Every later status edit times out and is not recorded
    pub fn fail_status_edits(&self) {
        self.edits_fail.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn upload_attempts(&self) -> Vec<Instant> {
        self.upload_attempts.lock().unwrap().clone()
    }

    /// Files whose upload succeeded
    pub fn files(&self) -> Vec<(String, Attachment)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File {
                    name, attachment, ..
                } => Some((name, attachment)),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Status texts in order, initial message included
    pub fn status_history(&self, message_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Status { message_id: id, text } | Sent::Edit { message_id: id, text }
                    if id == message_id =>
                {
                    Some(text)
                }
                _ => None,
            })
            .collect()
    }

    /// Ids of every status message opened so far
    pub fn status_ids(&self) -> Vec<i64> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Status { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    /// Text the most recent status message ended with
    pub fn final_status(&self) -> Option<String> {
        let id = *self.status_ids().last()?;
        self.status_history(id).pop()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_status(&self, chat: ChatId, text: &str) -> Result<StatusHandle, TransportError> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(Sent::Status {
            message_id,
            text: text.to_string(),
        });
        Ok(StatusHandle {
            chat_id: chat,
            message_id,
        })
    }

    async fn edit_status(&self, handle: &StatusHandle, text: &str) -> Result<(), TransportError> {
        if self.edits_fail.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout("edit timed out".to_string()));
        }
        self.sent.lock().unwrap().push(Sent::Edit {
            message_id: handle.message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_text(&self, _chat: ChatId, text: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_file(
        &self,
        _chat: ChatId,
        path: &Path,
        attachment: &Attachment,
    ) -> Result<(), TransportError> {
        self.upload_attempts.lock().unwrap().push(Instant::now());
        if let Some(err) = self.upload_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(Sent::File {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            attachment: attachment.clone(),
            existed: path.exists(),
        });
        Ok(())
    }

    async fn fetch_upload(&self, upload: &UploadRef, dest: &Path) -> Result<(), TransportError> {
        tokio::fs::copy(&upload.file_id, dest)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

// ============================================================================
// Remote service fakes
// ============================================================================

#[derive(Debug, Clone)]
pub enum RecognitionAnswer {
    Match(TrackMatch),
    NoMatch,
    Fail(String),
    /// Never answers
    Hang,
}

pub struct FakeRecognition {
    answer: RecognitionAnswer,
    calls: AtomicUsize,
    sample_seen: Mutex<Vec<(PathBuf, bool)>>,
}

impl FakeRecognition {
    pub fn new(answer: RecognitionAnswer) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
            sample_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn matching(title: &str, artist: &str, cross_references: &[&str]) -> Self {
        Self::new(RecognitionAnswer::Match(TrackMatch {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            cross_references: cross_references.iter().map(|r| r.to_string()).collect(),
        }))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sample paths passed in, and whether each existed at that moment
    pub fn samples(&self) -> Vec<(PathBuf, bool)> {
        self.sample_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecognitionService for FakeRecognition {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn identify(&self, audio: &Path) -> FetchResult<Option<TrackMatch>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sample_seen
            .lock()
            .unwrap()
            .push((audio.to_path_buf(), audio.exists()));

        match &self.answer {
            RecognitionAnswer::Match(track) => Ok(Some(track.clone())),
            RecognitionAnswer::NoMatch => Ok(None),
            RecognitionAnswer::Fail(reason) => Err(FetchError::RecognitionFailed(reason.clone())),
            RecognitionAnswer::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
pub struct FakeSearch {
    candidates: Vec<SearchCandidate>,
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn new(candidates: Vec<SearchCandidate>) -> Self {
        Self {
            candidates,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, query: &str) -> FetchResult<Vec<SearchCandidate>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.candidates.clone())
    }
}

pub fn candidate(title: &str, channel: &str, locator: &str) -> SearchCandidate {
    SearchCandidate {
        title: title.to_string(),
        channel: channel.to_string(),
        locator: locator.to_string(),
    }
}

pub enum TranscriberBehavior {
    Return(Transcript),
    Fail(String),
    Panic,
}

pub struct FakeTranscriber {
    behavior: TranscriberBehavior,
    seen: Mutex<Vec<PathBuf>>,
}

impl FakeTranscriber {
    pub fn new(behavior: TranscriberBehavior) -> Self {
        Self {
            behavior,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn returning(language: &str, segments: Vec<Segment>) -> Self {
        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self::new(TranscriberBehavior::Return(Transcript {
            language: language.to_string(),
            text,
            segments,
        }))
    }

    pub fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio: &Path) -> FetchResult<Transcript> {
        self.seen.lock().unwrap().push(audio.to_path_buf());
        match &self.behavior {
            TranscriberBehavior::Return(transcript) => Ok(transcript.clone()),
            TranscriberBehavior::Fail(reason) => {
                Err(FetchError::TranscriptionFailed(reason.clone()))
            }
            TranscriberBehavior::Panic => panic!("transcriber exploded"),
        }
    }
}

pub fn segment(start: f64, end: f64, text: &str) -> Segment {
    Segment {
        start,
        end,
        text: text.to_string(),
    }
}

// ============================================================================
// Pipeline harness
// ============================================================================

pub struct HarnessBuilder {
    recognition: Option<Arc<FakeRecognition>>,
    search: Arc<FakeSearch>,
    transcriber: Arc<FakeTranscriber>,
    policy: RetryPolicy,
    recognition_timeout: Duration,
    allowed_languages: Vec<String>,
    max_filesize_bytes: u64,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            recognition: None,
            search: Arc::new(FakeSearch::default()),
            transcriber: Arc::new(FakeTranscriber::returning("en", Vec::new())),
            policy: RetryPolicy::default(),
            recognition_timeout: Duration::from_secs(30),
            allowed_languages: Vec::new(),
            max_filesize_bytes: 50 * 1024 * 1024,
        }
    }
}

impl HarnessBuilder {
    pub fn recognition(mut self, service: FakeRecognition) -> Self {
        self.recognition = Some(Arc::new(service));
        self
    }

    pub fn search(mut self, search: FakeSearch) -> Self {
        self.search = Arc::new(search);
        self
    }

    pub fn transcriber(mut self, transcriber: FakeTranscriber) -> Self {
        self.transcriber = Arc::new(transcriber);
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn recognition_timeout(mut self, timeout: Duration) -> Self {
        self.recognition_timeout = timeout;
        self
    }

    pub fn allowed_languages(mut self, languages: &[&str]) -> Self {
        self.allowed_languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn max_filesize_bytes(mut self, limit: u64) -> Self {
        self.max_filesize_bytes = limit;
        self
    }

    pub fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let download_dir = dir.path().join("downloads");
        std::fs::create_dir_all(&download_dir).unwrap();

        let runner = Arc::new(FakeRunner::new());
        let transport = Arc::new(RecordingTransport::new());
        let registry = Arc::new(DeferredJobRegistry::new());
        let ledger = Arc::new(LoggingLedger::new());

        let extractor = AudioExtractor::new(runner.clone(), "ffmpeg");
        let acquirer = MediaAcquirer::new(
            runner.clone(),
            DownloadCommands::new("yt-dlp", &download_dir, 50, Vec::new()),
            self.max_filesize_bytes,
        );
        let recognizer = self.recognition.clone().map(|service| {
            FingerprintRecognizer::new(
                extractor.clone(),
                service,
                self.search.clone(),
                &download_dir,
                self.recognition_timeout,
                20,
            )
        });

        let pipeline = Arc::new(Pipeline::new(PipelineParts {
            transport: transport.clone(),
            acquirer,
            recognizer,
            extractor,
            registry: registry.clone(),
            deliverer: UploadDeliverer::new(transport.clone(), self.policy),
            transcriber: self.transcriber.clone(),
            status_interval: Duration::ZERO,
            allowed_languages: self.allowed_languages,
        }));
        let dispatcher = Arc::new(Dispatcher::new(
            pipeline.clone(),
            ledger.clone() as Arc<dyn UserLedger>,
            transport.clone(),
        ));

        Harness {
            dir,
            download_dir,
            runner,
            transport,
            registry,
            ledger,
            recognition: self.recognition,
            search: self.search,
            transcriber: self.transcriber,
            pipeline,
            dispatcher,
        }
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub download_dir: PathBuf,
    pub runner: Arc<FakeRunner>,
    pub transport: Arc<RecordingTransport>,
    pub registry: Arc<DeferredJobRegistry>,
    pub ledger: Arc<LoggingLedger>,
    pub recognition: Option<Arc<FakeRecognition>>,
    pub search: Arc<FakeSearch>,
    pub transcriber: Arc<FakeTranscriber>,
    pub pipeline: Arc<Pipeline>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Names still present in the download directory
    pub fn leftover_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.download_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Write a local file the user "uploads"
    pub fn upload_source(&self, name: &str, bytes: &[u8]) -> UploadRef {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        let kind = if name.ends_with(".mp4") {
            UploadKind::Video
        } else if name.ends_with(".ogg") {
            UploadKind::Voice
        } else {
            UploadKind::Audio
        };
        UploadRef {
            file_id: path.to_string_lossy().into_owned(),
            file_name: Some(name.to_string()),
            kind,
        }
    }
}

pub fn link(user_id: i64, url: &str, event_id: u64) -> Inbound {
    Inbound::Link {
        identity: Identity::new(user_id),
        chat: user_id,
        url: url.to_string(),
        event_id,
    }
}

pub fn callback(user_id: i64, data: &str) -> Inbound {
    Inbound::Callback {
        identity: Identity::new(user_id),
        chat: user_id,
        data: data.to_string(),
    }
}

pub fn upload(user_id: i64, upload: UploadRef, event_id: u64) -> Inbound {
    Inbound::Upload {
        identity: Identity::new(user_id),
        chat: user_id,
        upload,
        event_id,
    }
}
