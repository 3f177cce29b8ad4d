//! Child process runner with concurrent stream capture

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use super::progress::parse_progress;
use crate::error::{FetchError, FetchResult};

/// Which output stream carries progress lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStream {
    Stdout,
    Stderr,
    None,
}

/// Executable plus arguments, never passed through a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub progress_stream: ProgressStream,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            progress_stream: ProgressStream::None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_progress(mut self, stream: ProgressStream) -> Self {
        self.progress_stream = stream;
        self
    }

    /// Value following `flag`, if present
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Human-readable command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Exit status and full captured output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Receives parsed progress percentages while a process runs
#[async_trait]
pub trait ProgressSink: Send {
    async fn on_progress(&mut self, percent: u8);
}

/// Sink that ignores progress
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn on_progress(&mut self, _percent: u8) {}
}

/// Runs external commands to completion
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command`, forwarding parsed progress to `progress`
    ///
    /// Returns `SpawnFailed` only when the executable could not be started;
    /// a non-zero exit is reported through [`ProcessOutcome::exit_code`].
    async fn run(
        &self,
        command: &CommandSpec,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<ProcessOutcome>;
}

/// Runner backed by `tokio::process`
///
/// Both output pipes are drained by their own task for the entire life of the
/// child so neither can fill up and stall it. The child is killed if the run
/// future is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<ProcessOutcome> {
        debug!(command = %command.display(), "Spawning process");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FetchError::SpawnFailed {
                program: command.program.display().to_string(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let stdout_progress =
            (command.progress_stream == ProgressStream::Stdout).then(|| tx.clone());
        let stderr_progress =
            (command.progress_stream == ProgressStream::Stderr).then(|| tx.clone());
        drop(tx);

        let stdout_task = tokio::spawn(drain(child.stdout.take(), stdout_progress));
        let stderr_task = tokio::spawn(drain(child.stderr.take(), stderr_progress));

        // Ends once both readers have hit EOF and dropped their senders
        while let Some(pct) = rx.recv().await {
            progress.on_progress(pct).await;
        }

        let status = child.wait().await?;
        let stdout = join_reader(stdout_task).await?;
        let stderr = join_reader(stderr_task).await?;

        let exit_code = status.code().unwrap_or(-1);
        debug!(
            program = %command.program.display(),
            exit_code,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Process finished"
        );

        Ok(ProcessOutcome {
            exit_code,
            stdout,
            stderr,
        })
    }
}

async fn join_reader(
    task: tokio::task::JoinHandle<std::io::Result<String>>,
) -> FetchResult<String> {
    task.await
        .map_err(|e| FetchError::Unexpected(format!("output reader task failed: {e}")))?
        .map_err(FetchError::Io)
}

/// Read a pipe to EOF, optionally reporting progress lines as they arrive
///
/// Progress updates may be separated by `\r` as well as `\n`.
async fn drain<R>(
    pipe: Option<R>,
    progress: Option<mpsc::UnboundedSender<u8>>,
) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };

    let mut reader = BufReader::new(pipe);
    let mut captured = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            break;
        }

        if let Some(tx) = &progress {
            let text = String::from_utf8_lossy(&line);
            for piece in text.split('\r') {
                if let Some(pct) = parse_progress(piece) {
                    // Receiver gone means nobody is listening any more
                    let _ = tx.send(pct);
                }
            }
        }

        captured.extend_from_slice(&line);
    }

    Ok(String::from_utf8_lossy(&captured).into_owned())
}
