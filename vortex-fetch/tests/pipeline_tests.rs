//! End-to-end pipeline scenarios over scripted tools and a recording transport

mod helpers;

use std::time::Duration;

use helpers::{
    callback, candidate, link, DownloadScript, FakeRecognition, FakeSearch, Harness,
    RecognitionAnswer, Sent,
};
use vortex_fetch::acquire::FailureCategory;
use vortex_fetch::deliver::RetryPolicy;
use vortex_fetch::jobs::callback_data;
use vortex_fetch::pipeline::{messages, Completion};
use vortex_fetch::transport::{Attachment, TransportError};

const VIDEO_URL: &str = "https://www.youtube.com/watch?v=clip123";
const SONG_URL: &str = "https://www.youtube.com/watch?v=song456";

fn percentages(history: &[String]) -> Vec<u32> {
    history
        .iter()
        .filter_map(|t| t.strip_prefix(messages::DOWNLOADING))
        .filter_map(|rest| rest.trim().trim_end_matches('%').parse().ok())
        .collect()
}

// ============================================================================
// Recognized song: video first, then the song on request
// ============================================================================

#[tokio::test]
async fn test_link_with_recognized_song_then_song_download() {
    let harness = Harness::builder()
        .recognition(FakeRecognition::matching("Song", "Band", &[SONG_URL]))
        .build();
    harness.runner.script_download(
        VIDEO_URL,
        DownloadScript::success("Funny Clip").with_leftovers(&["Funny Clip.mp4.part"]),
    );
    harness
        .runner
        .script_download(SONG_URL, DownloadScript::success("Band - Song (Official Audio)"));

    let completion = harness.dispatcher.dispatch(link(7, VIDEO_URL, 100)).await;
    let Some(Completion::MediaDelivered {
        recognized: Some(result),
        offer_token: Some(token),
    }) = completion
    else {
        panic!("expected a delivered video with an offer");
    };
    assert_eq!(result.display_title(), "Band - Song");
    assert_eq!(result.resolved_locator.as_deref(), Some(SONG_URL));

    let files = harness.transport.files();
    assert_eq!(files.len(), 1);
    let (name, attachment) = &files[0];
    assert!(name.starts_with("7_100_"), "artifact name {name}");
    match attachment {
        Attachment::Video { caption, offer } => {
            assert_eq!(caption, "Funny Clip");
            let offer = offer.as_ref().expect("offer attached");
            assert_eq!(offer.label, messages::OFFER_LABEL);
            assert_eq!(offer.callback_data, callback_data(&token));
        }
        other => panic!("expected video attachment, got {other:?}"),
    }

    let status_id = harness.transport.status_ids()[0];
    let history = harness.transport.status_history(status_id);
    assert_eq!(history.first().map(String::as_str), Some(messages::RECEIVED));
    assert!(history.iter().any(|t| t == messages::RECOGNIZING));
    assert_eq!(
        history.last().cloned(),
        Some(messages::delivered_with_offer("Band - Song"))
    );
    let pcts = percentages(&history);
    assert!(pcts.windows(2).all(|w| w[0] < w[1]), "progress went backwards: {pcts:?}");

    assert_eq!(harness.registry.len().await, 1);
    assert!(harness.leftover_files().is_empty(), "{:?}", harness.leftover_files());

    // The user presses the button
    let completion = harness
        .dispatcher
        .dispatch(callback(7, &callback_data(&token)))
        .await;
    assert_eq!(
        completion,
        Some(Completion::SongDelivered {
            title: "Band - Song".to_string()
        })
    );

    let audio_downloads: Vec<_> = harness
        .runner
        .calls_to("yt-dlp")
        .into_iter()
        .filter(|c| c.args.iter().any(|a| a == "-x"))
        .collect();
    assert_eq!(audio_downloads.len(), 1);
    assert_eq!(audio_downloads[0].args.last().map(String::as_str), Some(SONG_URL));

    let files = harness.transport.files();
    assert_eq!(files.len(), 2);
    let (name, attachment) = &files[1];
    assert!(name.starts_with(&format!("7_{token}_")));
    assert!(name.ends_with(".mp3"));
    assert_eq!(
        attachment,
        &Attachment::Audio {
            title: "Song".to_string(),
            performer: "Band".to_string(),
            caption: messages::SONG_CAPTION.to_string(),
        }
    );
    assert_eq!(
        harness.transport.final_status(),
        Some(messages::song_delivered("Band - Song"))
    );
    assert!(harness.registry.is_empty().await);
    assert!(harness.leftover_files().is_empty());

    // A second press finds nothing
    let completion = harness
        .dispatcher
        .dispatch(callback(7, &callback_data(&token)))
        .await;
    assert_eq!(completion, None);
    assert_eq!(harness.transport.final_status().as_deref(), Some(messages::OFFER_EXPIRED));
    assert_eq!(harness.ledger.get(7).await.map(|r| r.events), Some(3));
}

#[tokio::test]
async fn test_match_resolved_through_search() {
    let harness = Harness::builder()
        .recognition(FakeRecognition::matching("Song", "Band", &[]))
        .search(FakeSearch::new(vec![
            candidate(
                "Band - Song (live)",
                "fan uploads",
                "https://www.youtube.com/watch?v=live",
            ),
            candidate(
                "Band - Song (Official Audio)",
                "Band",
                "https://www.youtube.com/watch?v=official",
            ),
        ]))
        .build();

    let completion = harness.dispatcher.dispatch(link(1, VIDEO_URL, 1)).await;
    let Some(Completion::MediaDelivered {
        recognized: Some(result),
        offer_token: Some(_),
    }) = completion
    else {
        panic!("expected an offer");
    };
    assert_eq!(
        result.resolved_locator.as_deref(),
        Some("https://www.youtube.com/watch?v=official")
    );
    assert_eq!(harness.search.queries(), vec!["Band - Song".to_string()]);
}

#[tokio::test]
async fn test_match_without_locator_has_no_offer() {
    let harness = Harness::builder()
        .recognition(FakeRecognition::matching("Song", "Band", &[]))
        .build();

    let completion = harness.dispatcher.dispatch(link(1, VIDEO_URL, 2)).await;
    let Some(Completion::MediaDelivered { offer_token, .. }) = completion else {
        panic!("expected delivery");
    };
    assert_eq!(offer_token, None);
    assert!(harness.registry.is_empty().await);
    assert!(matches!(
        &harness.transport.files()[0].1,
        Attachment::Video { offer: None, .. }
    ));
    assert_eq!(
        harness.transport.final_status(),
        Some(messages::delivered_without_source("Band - Song"))
    );
}

// ============================================================================
// Recognition without a result
// ============================================================================

#[tokio::test]
async fn test_link_without_recognized_music() {
    let harness = Harness::builder()
        .recognition(FakeRecognition::new(RecognitionAnswer::NoMatch))
        .build();
    harness
        .runner
        .script_download(VIDEO_URL, DownloadScript::success("Cat Video"));

    let completion = harness.dispatcher.dispatch(link(2, VIDEO_URL, 5)).await;
    assert_eq!(
        completion,
        Some(Completion::MediaDelivered {
            recognized: None,
            offer_token: None
        })
    );

    let files = harness.transport.files();
    assert_eq!(files.len(), 1);
    assert!(matches!(
        &files[0].1,
        Attachment::Video { offer: None, caption } if caption == "Cat Video"
    ));
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some(messages::DELIVERED_NOT_RECOGNIZED)
    );
    assert!(harness.registry.is_empty().await);

    // The sample existed while identifying and is gone afterwards
    let recognition = harness.recognition.as_ref().unwrap();
    let samples = recognition.samples();
    assert_eq!(samples.len(), 1);
    assert!(samples[0].1);
    assert!(!samples[0].0.exists());
    assert!(harness.leftover_files().is_empty());
}

#[tokio::test]
async fn test_recognition_failure_still_delivers_video() {
    let harness = Harness::builder()
        .recognition(FakeRecognition::new(RecognitionAnswer::Fail("quota".into())))
        .build();

    let completion = harness.dispatcher.dispatch(link(2, VIDEO_URL, 6)).await;
    assert!(matches!(
        completion,
        Some(Completion::MediaDelivered { recognized: None, .. })
    ));
    assert_eq!(harness.transport.files().len(), 1);
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some(messages::DELIVERED_RECOGNITION_FAILED)
    );
}

#[tokio::test]
async fn test_recognition_disabled() {
    let harness = Harness::builder().build();

    let completion = harness.dispatcher.dispatch(link(2, VIDEO_URL, 7)).await;
    assert!(matches!(
        completion,
        Some(Completion::MediaDelivered { recognized: None, .. })
    ));
    assert!(harness.runner.calls_to("ffmpeg").is_empty());
    assert_eq!(harness.transport.final_status().as_deref(), Some(messages::DELIVERED));
}

// ============================================================================
// Classified download failures
// ============================================================================

#[tokio::test]
async fn test_unsupported_url_is_reported() {
    let harness = Harness::builder().build();
    harness.runner.script_download(
        "https://example.com/page",
        DownloadScript::failure(1, "ERROR: Unsupported URL: https://example.com/page")
            .with_leftovers(&["page.mp4.part", "page.f137.mp4.ytdl"]),
    );

    let completion = harness
        .dispatcher
        .dispatch(link(3, "https://example.com/page", 9))
        .await;
    assert_eq!(completion, None);
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some(messages::download_failure(FailureCategory::UnsupportedSource))
    );
    assert!(harness.transport.files().is_empty());
    assert!(harness.leftover_files().is_empty(), "{:?}", harness.leftover_files());
}

#[tokio::test]
async fn test_size_cap_abort_with_clean_exit() {
    let harness = Harness::builder().build();
    let mut script = DownloadScript::success("Huge");
    script.produce_artifact = false;
    script.stdout = "[download] File is larger than max-filesize \
                     (90000000 bytes > 52428800 bytes). Aborting."
        .into();
    harness.runner.script_download(VIDEO_URL, script);

    let completion = harness.dispatcher.dispatch(link(3, VIDEO_URL, 10)).await;
    assert_eq!(completion, None);
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some(messages::download_failure(FailureCategory::TooLarge))
    );
}

#[tokio::test]
async fn test_oversized_artifact_is_rejected_and_removed() {
    let harness = Harness::builder().max_filesize_bytes(512).build();
    let mut script = DownloadScript::success("Big");
    script.artifact_bytes = 4096;
    harness.runner.script_download(VIDEO_URL, script);

    assert_eq!(harness.dispatcher.dispatch(link(3, VIDEO_URL, 11)).await, None);
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some(messages::download_failure(FailureCategory::TooLarge))
    );
    assert!(harness.leftover_files().is_empty());
}

#[tokio::test]
async fn test_clean_exit_without_artifact() {
    let harness = Harness::builder().build();
    let mut script = DownloadScript::success("Ghost");
    script.produce_artifact = false;
    harness.runner.script_download(VIDEO_URL, script);

    assert_eq!(harness.dispatcher.dispatch(link(3, VIDEO_URL, 12)).await, None);
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some("The download finished but no file was produced.")
    );
}

#[tokio::test]
async fn test_invalid_source_never_reaches_downloader() {
    let harness = Harness::builder().build();

    let completion = harness.dispatcher.dispatch(link(3, "ftp://host/file", 13)).await;
    assert_eq!(completion, None);
    assert!(harness.runner.calls().is_empty());
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some("Please send a valid video link.")
    );
}

// ============================================================================
// Upload timeouts and backoff
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_upload_retried_with_backoff() {
    let harness = Harness::builder().build();
    harness.transport.fail_uploads([
        TransportError::Timeout("write timeout".into()),
        TransportError::Timeout("write timeout".into()),
    ]);

    let completion = harness.dispatcher.dispatch(link(4, VIDEO_URL, 20)).await;
    assert!(matches!(completion, Some(Completion::MediaDelivered { .. })));

    let attempts = harness.transport.upload_attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts[1] - attempts[0] >= Duration::from_secs(2));
    assert!(attempts[2] - attempts[1] >= Duration::from_secs(4));
    assert_eq!(harness.transport.files().len(), 1);
    assert!(harness.leftover_files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_upload_attempts_exhausted() {
    let harness = Harness::builder()
        .recognition(FakeRecognition::matching("Song", "Band", &[SONG_URL]))
        .policy(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        })
        .build();
    harness.transport.fail_uploads([
        TransportError::Timeout("t1".into()),
        TransportError::Timeout("t2".into()),
    ]);

    assert_eq!(harness.dispatcher.dispatch(link(4, VIDEO_URL, 21)).await, None);
    assert_eq!(harness.transport.upload_attempts().len(), 2);
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some("Sending the file timed out repeatedly. Please try again later.")
    );
    // The offer was never seen, so it is withdrawn
    assert!(harness.registry.is_empty().await);
    assert!(harness.leftover_files().is_empty());
}

#[tokio::test]
async fn test_rejected_upload_is_not_retried() {
    let harness = Harness::builder().build();
    harness
        .transport
        .fail_uploads([TransportError::Rejected("file too big".into())]);

    assert_eq!(harness.dispatcher.dispatch(link(4, VIDEO_URL, 22)).await, None);
    assert_eq!(harness.transport.upload_attempts().len(), 1);
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some("The file could not be sent.")
    );
}

// ============================================================================
// Stale or foreign callbacks
// ============================================================================

#[tokio::test]
async fn test_unknown_token_reports_expiry() {
    let harness = Harness::builder().build();

    let completion = harness
        .dispatcher
        .dispatch(callback(5, &callback_data("0123456789abcdef")))
        .await;
    assert_eq!(completion, None);
    assert!(harness.runner.calls().is_empty());

    let status_id = harness.transport.status_ids()[0];
    assert_eq!(
        harness.transport.status_history(status_id),
        vec![messages::RECEIVED.to_string(), messages::OFFER_EXPIRED.to_string()]
    );
}

#[tokio::test]
async fn test_unrelated_callback_is_ignored() {
    let harness = Harness::builder().build();

    let completion = harness.dispatcher.dispatch(callback(5, "settings_open")).await;
    assert_eq!(completion, Some(Completion::Ignored));
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn test_every_request_ends_with_one_final_status() {
    let harness = Harness::builder().build();
    harness.runner.script_download(
        VIDEO_URL,
        DownloadScript::failure(1, "ERROR: [youtube] clip123: Video unavailable"),
    );

    harness.dispatcher.dispatch(link(6, VIDEO_URL, 30)).await;

    let sent = harness.transport.sent();
    let opened = sent.iter().filter(|s| matches!(s, Sent::Status { .. })).count();
    assert_eq!(opened, 1);
    assert!(harness.transport.texts().is_empty());
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some(messages::download_failure(FailureCategory::ContentUnavailable))
    );
}

#[tokio::test]
async fn test_failure_text_sent_as_message_when_status_cannot_be_edited() {
    let harness = Harness::builder().build();
    harness.runner.script_download(
        VIDEO_URL,
        DownloadScript::failure(1, "ERROR: [youtube] clip123: Video unavailable"),
    );
    harness.transport.fail_status_edits();

    assert_eq!(harness.dispatcher.dispatch(link(6, VIDEO_URL, 31)).await, None);
    assert_eq!(
        harness.transport.final_status().as_deref(),
        Some(messages::RECEIVED)
    );
    assert_eq!(
        harness.transport.texts(),
        vec![messages::download_failure(FailureCategory::ContentUnavailable).to_string()]
    );
}

#[tokio::test]
async fn test_success_text_sent_as_message_when_status_cannot_be_edited() {
    let harness = Harness::builder().build();
    harness.transport.fail_status_edits();

    let completion = harness.dispatcher.dispatch(link(6, VIDEO_URL, 32)).await;
    assert!(matches!(completion, Some(Completion::MediaDelivered { .. })));
    assert_eq!(harness.transport.files().len(), 1);
    assert_eq!(harness.transport.texts(), vec![messages::DELIVERED.to_string()]);
}
