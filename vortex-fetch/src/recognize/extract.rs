//! Audio extraction with ffmpeg

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::acquire::{diagnostic_excerpt, TempArtifact};
use crate::error::{FetchError, FetchResult};
use crate::process::{CommandSpec, NoProgress, ProcessRunner};

/// Sample rate expected by fingerprinting and speech-to-text services
pub const SAMPLE_RATE: u32 = 16_000;

/// Converts media into mono 16 kHz PCM WAV
#[derive(Clone)]
pub struct AudioExtractor {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: PathBuf,
}

impl AudioExtractor {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn command(&self, input: &Path, output: &Path, max_seconds: Option<u32>) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "error"])
            .arg("-i")
            .arg(input.display().to_string())
            .args(["-vn", "-ac", "1", "-ar"])
            .arg(SAMPLE_RATE.to_string());
        if let Some(seconds) = max_seconds {
            cmd = cmd.arg("-t").arg(seconds.to_string());
        }
        cmd.args(["-c:a", "pcm_s16le"])
            .arg(output.display().to_string())
    }

    /// Extract the audio stream of `input` into `output`
    ///
    /// `output` is owned by the returned artifact; on failure any partial
    /// output is removed before returning.
    pub async fn extract(
        &self,
        input: &Path,
        output: PathBuf,
        max_seconds: Option<u32>,
    ) -> FetchResult<TempArtifact> {
        let artifact = TempArtifact::new(&output);
        let command = self.command(input, &output, max_seconds);

        let outcome = match self.runner.run(&command, &mut NoProgress).await {
            Ok(outcome) => outcome,
            Err(FetchError::SpawnFailed { program, source }) => {
                return Err(FetchError::ExtractionFailed(format!(
                    "failed to start {program}: {source}"
                )))
            }
            Err(e) => return Err(e),
        };

        if !outcome.success() {
            return Err(FetchError::ExtractionFailed(diagnostic_excerpt(
                &outcome.stderr,
                &outcome.stdout,
            )));
        }

        if !tokio::fs::try_exists(artifact.path()).await.unwrap_or(false) {
            return Err(FetchError::ExtractionFailed(
                "transcoder produced no output".to_string(),
            ));
        }

        debug!(input = %input.display(), output = %output.display(), "Extracted audio");
        Ok(artifact)
    }
}
