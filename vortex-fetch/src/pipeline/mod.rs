//! Per-event pipelines
//!
//! Each inbound event runs one sequential pipeline:
//! - **Link**: download video → identify music → park an offer → upload video
//! - **Callback**: consume offer token → download audio → retag → upload audio
//! - **Upload**: fetch file → (extract audio) → transcribe → reply
//!
//! Every pipeline owns one status message and finishes it with exactly one
//! final text, success or failure. Temporary files are released by guards.

mod dispatch;
pub mod messages;

pub use dispatch::Dispatcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::acquire::{
    caption_from_artifact, file_prefix, AcquisitionRequest, MediaAcquirer, PrefixSweep,
    TempArtifact,
};
use crate::deliver::UploadDeliverer;
use crate::error::{FetchError, FetchResult};
use crate::jobs::{
    callback_data, parse_callback, DeferredJobRegistry, JobDescriptor, PendingOffer,
};
use crate::ledger::Identity;
use crate::recognize::{AudioExtractor, FingerprintRecognizer, Recognition, RecognitionResult};
use crate::retag::retag_audio;
use crate::status::StatusChannel;
use crate::transcribe::{
    check_language, format_transcript, split_message, upload_path, Transcriber, MESSAGE_LIMIT,
};
use crate::transport::{Attachment, ChatId, ChatTransport, Offer, UploadKind, UploadRef};

/// Event delivered by the chat transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A message containing a media link
    Link {
        identity: Identity,
        chat: ChatId,
        url: String,
        /// Transport-assigned, unique per event
        event_id: u64,
    },
    /// A button press
    Callback {
        identity: Identity,
        chat: ChatId,
        data: String,
    },
    /// An uploaded audio, voice or video file
    Upload {
        identity: Identity,
        chat: ChatId,
        upload: UploadRef,
        event_id: u64,
    },
}

impl Inbound {
    pub fn identity(&self) -> &Identity {
        match self {
            Inbound::Link { identity, .. }
            | Inbound::Callback { identity, .. }
            | Inbound::Upload { identity, .. } => identity,
        }
    }

    pub fn chat(&self) -> ChatId {
        match self {
            Inbound::Link { chat, .. }
            | Inbound::Callback { chat, .. }
            | Inbound::Upload { chat, .. } => *chat,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Link { .. } => "link",
            Inbound::Callback { .. } => "callback",
            Inbound::Upload { .. } => "upload",
        }
    }
}

/// How a pipeline ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    MediaDelivered {
        recognized: Option<RecognitionResult>,
        /// Token of the parked audio download, when one was offered
        offer_token: Option<String>,
    },
    SongDelivered {
        title: String,
    },
    Transcribed {
        language: String,
        /// Extra messages beyond the final status text
        followups: usize,
    },
    /// Event that needs no reply
    Ignored,
}

/// Components a [`Pipeline`] is assembled from
pub struct PipelineParts {
    pub transport: Arc<dyn ChatTransport>,
    pub acquirer: MediaAcquirer,
    /// `None` disables music identification
    pub recognizer: Option<FingerprintRecognizer>,
    pub extractor: AudioExtractor,
    pub registry: Arc<DeferredJobRegistry>,
    pub deliverer: UploadDeliverer,
    pub transcriber: Arc<dyn Transcriber>,
    pub status_interval: Duration,
    /// Empty accepts every language
    pub allowed_languages: Vec<String>,
}

pub struct Pipeline {
    transport: Arc<dyn ChatTransport>,
    acquirer: MediaAcquirer,
    recognizer: Option<FingerprintRecognizer>,
    extractor: AudioExtractor,
    registry: Arc<DeferredJobRegistry>,
    deliverer: UploadDeliverer,
    transcriber: Arc<dyn Transcriber>,
    status_interval: Duration,
    allowed_languages: Vec<String>,
}

/// Successful end of a pipeline
struct Concluded {
    completion: Completion,
    message: String,
    followups: Vec<String>,
}

enum Identification {
    Found(RecognitionResult),
    NotFound,
    Failed,
    Disabled,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            transport: parts.transport,
            acquirer: parts.acquirer,
            recognizer: parts.recognizer,
            extractor: parts.extractor,
            registry: parts.registry,
            deliverer: parts.deliverer,
            transcriber: parts.transcriber,
            status_interval: parts.status_interval,
            allowed_languages: parts.allowed_languages,
        }
    }

    pub fn registry(&self) -> &Arc<DeferredJobRegistry> {
        &self.registry
    }

    /// Run the pipeline for one event to its end
    pub async fn handle(&self, inbound: Inbound) -> FetchResult<Completion> {
        match inbound {
            Inbound::Link {
                identity,
                chat,
                url,
                event_id,
            } => {
                let request = AcquisitionRequest::new(identity.user_id, url, event_id);
                let mut status = self.open_status(chat, messages::RECEIVED).await?;
                let result = self.link_flow(&request, chat, &mut status).await;
                self.conclude(chat, &mut status, result).await
            }
            Inbound::Callback {
                identity,
                chat,
                data,
            } => {
                let Some(token) = parse_callback(&data) else {
                    warn!(user = identity.user_id, %data, "Ignoring unknown callback");
                    return Ok(Completion::Ignored);
                };
                let mut status = self.open_status(chat, messages::RECEIVED).await?;
                let result = self.song_flow(&identity, chat, token, &mut status).await;
                self.conclude(chat, &mut status, result).await
            }
            Inbound::Upload {
                identity,
                upload,
                chat,
                event_id,
            } => {
                let mut status = self.open_status(chat, messages::UPLOAD_RECEIVED).await?;
                let prefix = file_prefix(identity.user_id, &event_id.to_string());
                let result = self.transcription_flow(&prefix, &upload, &mut status).await;
                self.conclude(chat, &mut status, result).await
            }
        }
    }

    async fn open_status(&self, chat: ChatId, text: &str) -> FetchResult<StatusChannel> {
        let opened =
            StatusChannel::open(Arc::clone(&self.transport), chat, text, self.status_interval)
                .await;
        match opened {
            Ok(status) => Ok(status),
            Err(err) => {
                // No status surface: the apology goes out as a plain message
                if let Err(e) = self.transport.send_text(chat, messages::GENERIC_APOLOGY).await {
                    warn!(chat, error = %e, "Failed to send apology");
                }
                Err(err)
            }
        }
    }

    async fn conclude(
        &self,
        chat: ChatId,
        status: &mut StatusChannel,
        result: FetchResult<Concluded>,
    ) -> FetchResult<Completion> {
        match result {
            Ok(done) => {
                status.finish(done.message).await;
                for chunk in &done.followups {
                    if let Err(e) = self.transport.send_text(chat, chunk).await {
                        warn!(chat, error = %e, "Failed to send follow-up message");
                    }
                }
                Ok(done.completion)
            }
            Err(err) => {
                status.finish(messages::for_error(&err)).await;
                Err(err)
            }
        }
    }

    async fn link_flow(
        &self,
        request: &AcquisitionRequest,
        chat: ChatId,
        status: &mut StatusChannel,
    ) -> FetchResult<Concluded> {
        status.begin_progress(messages::DOWNLOADING);
        status.set(format!("{} 0%", messages::DOWNLOADING)).await;

        let media = self.acquirer.acquire_media(request, status).await?;
        let prefix = request.prefix();
        let identification = self.identify(&media, &prefix, status).await;

        // Withdrawn again if the video never reaches the user
        let offer = match &identification {
            Identification::Found(result) => match &result.resolved_locator {
                Some(locator) => {
                    let descriptor = JobDescriptor {
                        title: result.title.clone(),
                        artist: result.artist.clone(),
                        locator: locator.clone(),
                        origin: prefix.clone(),
                    };
                    Some(PendingOffer::register(&self.registry, descriptor).await)
                }
                None => None,
            },
            _ => None,
        };

        let attachment = Attachment::Video {
            caption: caption_from_artifact(media.path(), &prefix),
            offer: offer.as_ref().map(|offer| Offer {
                label: messages::OFFER_LABEL.to_string(),
                callback_data: callback_data(offer.token()),
            }),
        };

        self.deliverer.deliver(chat, media.path(), &attachment).await?;
        let offer_token = offer.map(PendingOffer::confirm);
        release(media).await;

        let (message, recognized) = match identification {
            Identification::Found(result) => {
                let title = result.display_title();
                let message = if offer_token.is_some() {
                    messages::delivered_with_offer(&title)
                } else {
                    messages::delivered_without_source(&title)
                };
                (message, Some(result))
            }
            Identification::NotFound => (messages::DELIVERED_NOT_RECOGNIZED.to_string(), None),
            Identification::Failed => (messages::DELIVERED_RECOGNITION_FAILED.to_string(), None),
            Identification::Disabled => (messages::DELIVERED.to_string(), None),
        };

        Ok(Concluded {
            completion: Completion::MediaDelivered {
                recognized,
                offer_token,
            },
            message,
            followups: Vec::new(),
        })
    }

    /// Recognition never fails the pipeline; the video is delivered regardless
    async fn identify(
        &self,
        media: &TempArtifact,
        prefix: &str,
        status: &mut StatusChannel,
    ) -> Identification {
        let Some(recognizer) = &self.recognizer else {
            return Identification::Disabled;
        };

        status.set(messages::RECOGNIZING).await;
        match recognizer.recognize(media.path(), prefix).await {
            Ok(Recognition::Recognized(result)) => Identification::Found(result),
            Ok(Recognition::NotRecognized) => Identification::NotFound,
            Err(err) => {
                warn!(%prefix, error = %err, "Music identification failed");
                Identification::Failed
            }
        }
    }

    async fn song_flow(
        &self,
        identity: &Identity,
        chat: ChatId,
        token: &str,
        status: &mut StatusChannel,
    ) -> FetchResult<Concluded> {
        let job = self.registry.consume(token).await?;
        let title = job.display_title();
        info!(user = identity.user_id, %title, "Offer accepted");

        let label = messages::downloading_song(&title);
        status.begin_progress(label.clone());
        status.set(label).await;

        let request = AcquisitionRequest::new(identity.user_id, job.locator.clone(), token);
        let audio = self.acquirer.acquire_audio_only(&request, status).await?;

        if let Err(e) = retag_audio(audio.path(), &job.title, &job.artist).await {
            warn!(file = %audio.path().display(), error = %e, "Failed to rewrite audio tags");
        }

        let attachment = Attachment::Audio {
            title: job.title.clone(),
            performer: job.artist.clone(),
            caption: messages::SONG_CAPTION.to_string(),
        };
        self.deliverer.deliver(chat, audio.path(), &attachment).await?;
        release(audio).await;

        Ok(Concluded {
            message: messages::song_delivered(&title),
            completion: Completion::SongDelivered { title },
            followups: Vec::new(),
        })
    }

    async fn transcription_flow(
        &self,
        prefix: &str,
        upload: &UploadRef,
        status: &mut StatusChannel,
    ) -> FetchResult<Concluded> {
        let dir = self.acquirer.download_dir().to_path_buf();
        let sweep = PrefixSweep::new(&dir, prefix);
        let result = self.transcribe_upload(&dir, prefix, upload, status).await;
        sweep.finish().await;
        result
    }

    async fn transcribe_upload(
        &self,
        dir: &Path,
        prefix: &str,
        upload: &UploadRef,
        status: &mut StatusChannel,
    ) -> FetchResult<Concluded> {
        let original = TempArtifact::new(upload_path(dir, prefix, upload.file_name.as_deref()));
        self.transport.fetch_upload(upload, original.path()).await?;

        let extracted = if upload.kind == UploadKind::Video {
            status.set(messages::EXTRACTING_AUDIO).await;
            let output = extracted_path(original.path());
            Some(self.extractor.extract(original.path(), output, None).await?)
        } else {
            None
        };
        let audio_path = extracted
            .as_ref()
            .map(TempArtifact::path)
            .unwrap_or_else(|| original.path());

        status.set(messages::TRANSCRIBING).await;
        let transcript = self.transcriber.transcribe(audio_path).await?;
        check_language(&transcript.language, &self.allowed_languages)?;

        let body = if transcript.segments.is_empty() {
            transcript.text.clone()
        } else {
            format_transcript(&transcript.segments)
        };
        if body.trim().is_empty() {
            return Err(FetchError::TranscriptionFailed("no speech detected".to_string()));
        }

        let header = messages::transcript_header(&transcript.language);
        let fits = header.chars().count() + body.chars().count() <= MESSAGE_LIMIT;
        let (message, followups) = if fits {
            (format!("{header}{body}"), Vec::new())
        } else {
            (header.trim_end().to_string(), split_message(&body, MESSAGE_LIMIT))
        };

        Ok(Concluded {
            completion: Completion::Transcribed {
                language: transcript.language,
                followups: followups.len(),
            },
            message,
            followups,
        })
    }
}

fn extracted_path(original: &Path) -> PathBuf {
    let mut name = original.as_os_str().to_owned();
    name.push(".16k.wav");
    PathBuf::from(name)
}

async fn release(artifact: TempArtifact) {
    let path = artifact.path().to_path_buf();
    if let Err(e) = artifact.release().await {
        warn!(file = %path.display(), error = %e, "Failed to remove delivered file");
    }
}
