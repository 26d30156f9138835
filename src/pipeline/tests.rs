// Stage caching and composition, with every external service mocked
// Run with: cargo test --lib pipeline::tests

use super::*;
use crate::classify::MockClassifier;
use crate::extractors::{ExtractedPost, MediaFile, MediaKind, MockPostExtractor};
use crate::store::{CardKind, PostMetadata};
use crate::transcribe::MockTranscriber;
use std::path::Path;
use tempfile::TempDir;

const URL: &str = "https://www.instagram.com/reel/C1a2b3c4d5/";
const SHORTCODE: &str = "C1a2b3c4d5";

const TACO_VERDICT: &str = r#"{
    "isFoodRelated": true,
    "cards": [
        {"type": "restaurant", "name": "Taco Spot", "description": "Family-run taqueria", "details": "Open late"},
        {"type": "food", "name": "Al pastor", "description": "Pork and pineapple", "details": "$3"}
    ]
}"#;

fn extracted(is_video: bool) -> ExtractedPost {
    ExtractedPost {
        shortcode: SHORTCODE.to_string(),
        metadata: PostMetadata {
            title: "Taco night".to_string(),
            description: "Best al pastor in the city".to_string(),
            account_name: "eatswithsam".to_string(),
            account_followers: 12_500,
            is_video,
            ..Default::default()
        },
    }
}

fn download_video(_url: &str, dest: &Path) -> anyhow::Result<DownloadedMedia> {
    let name = format!("{}_1.mp4", SHORTCODE);
    let path = dest.join(&name);
    fs_err::write(&path, b"not really a video")?;
    Ok(DownloadedMedia {
        dir: dest.to_path_buf(),
        files: vec![MediaFile {
            path,
            kind: MediaKind::Video,
            name,
        }],
    })
}

/// Extractor that reports one post and serves a fake video for it
fn extractor(is_video: bool, extractions: usize) -> MockPostExtractor {
    let mut extractor = MockPostExtractor::new();
    extractor.expect_platform_name().return_const("Instagram");
    extractor
        .expect_extract_metadata()
        .withf(|url| url == URL)
        .times(extractions)
        .returning(move |_| Ok(extracted(is_video)));
    extractor
}

fn pipeline(
    extractor: MockPostExtractor,
    transcriber: MockTranscriber,
    classifier: MockClassifier,
) -> (PostPipeline, TempDir) {
    let temp = TempDir::new().unwrap();
    let pipeline = PostPipeline::new(
        RecordStore::open_in_memory().unwrap(),
        Box::new(extractor),
        Box::new(transcriber),
        Box::new(classifier),
        temp.path().join("downloads"),
    );
    (pipeline, temp)
}

fn no_transcriber() -> MockTranscriber {
    let mut transcriber = MockTranscriber::new();
    transcriber.expect_transcribe().never();
    transcriber
}

fn no_classifier() -> MockClassifier {
    let mut classifier = MockClassifier::new();
    classifier.expect_complete().never();
    classifier
}

fn transcriber_returning(audio: AudioTrack) -> MockTranscriber {
    let mut transcriber = MockTranscriber::new();
    transcriber
        .expect_transcribe()
        .times(1)
        .returning(move |_| Ok(audio.clone()));
    transcriber
}

fn reason(err: &anyhow::Error) -> &ReelError {
    err.downcast_ref::<ReelError>().expect("error should carry a ReelError")
}

// =========================================================================
// Metadata stage
// =========================================================================

#[tokio::test]
async fn test_metadata_extracted_once() {
    let (pipeline, _temp) = pipeline(extractor(true, 1), no_transcriber(), no_classifier());

    let first = pipeline.ensure_metadata(URL, false).await.unwrap();
    let second = pipeline.ensure_metadata(URL, false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.shortcode, SHORTCODE);
    assert_eq!(first.metadata.title, "Taco night");
    assert!(first.metadata.is_video);
    assert_eq!(first.has_audio(), None);
}

#[tokio::test]
async fn test_metadata_force_refresh_extracts_again() {
    let (pipeline, _temp) = pipeline(extractor(true, 2), no_transcriber(), no_classifier());

    let first = pipeline.ensure_metadata(URL, false).await.unwrap();
    let refreshed = pipeline.ensure_metadata(URL, true).await.unwrap();

    assert_eq!(refreshed.created_at, first.created_at);
    assert!(refreshed.updated_at > first.updated_at);
}

#[tokio::test]
async fn test_metadata_failure_surfaces_and_stores_nothing() {
    let mut extractor = MockPostExtractor::new();
    extractor.expect_platform_name().return_const("Instagram");
    extractor
        .expect_extract_metadata()
        .times(1)
        .returning(|_| Err(anyhow::anyhow!("yt-dlp failed: login required")));
    let (pipeline, _temp) = pipeline(extractor, no_transcriber(), no_classifier());

    let err = pipeline.ensure_metadata(URL, false).await.unwrap_err();

    assert!(matches!(reason(&err), ReelError::ExtractionFailed(msg) if msg.contains("login required")));
    assert!(pipeline.record(URL).unwrap().is_none());
}

#[tokio::test]
async fn test_failed_refresh_keeps_existing_record() {
    let mut extractor = MockPostExtractor::new();
    extractor.expect_platform_name().return_const("Instagram");
    let mut calls = 0;
    extractor.expect_extract_metadata().times(2).returning(move |_| {
        calls += 1;
        if calls == 1 {
            Ok(extracted(true))
        } else {
            Err(anyhow::anyhow!("HTTP 429"))
        }
    });
    let (pipeline, _temp) = pipeline(extractor, no_transcriber(), no_classifier());

    let stored = pipeline.ensure_metadata(URL, false).await.unwrap();
    assert!(pipeline.ensure_metadata(URL, true).await.is_err());

    assert_eq!(pipeline.record(URL).unwrap().unwrap(), stored);
}

// =========================================================================
// Audio stage
// =========================================================================

#[tokio::test]
async fn test_non_video_skips_transcription() {
    let mut extractor = extractor(false, 1);
    extractor.expect_download_media().never();
    let (pipeline, _temp) = pipeline(extractor, no_transcriber(), no_classifier());

    let record = pipeline.ensure_transcription(URL, false).await.unwrap();

    assert!(!record.metadata.is_video);
    assert_eq!(record.audio, None);
    assert_eq!(record.has_audio(), None);
    assert_eq!(record.transcription(), None);
}

#[tokio::test]
async fn test_audio_outcomes_are_persisted() {
    let cases = [
        (AudioTrack::Transcribed("great taco spot".to_string()), Some(true), Some("great taco spot")),
        (AudioTrack::Untranscribed, Some(true), None),
        (AudioTrack::Missing, Some(false), None),
    ];

    for (outcome, has_audio, transcription) in cases {
        let mut extractor = extractor(true, 1);
        extractor.expect_download_media().times(1).returning(download_video);
        let (pipeline, _temp) = pipeline(extractor, transcriber_returning(outcome), no_classifier());

        let returned = pipeline.ensure_transcription(URL, false).await.unwrap();
        let stored = pipeline.record(URL).unwrap().unwrap();

        assert_eq!(returned, stored);
        assert_eq!(stored.has_audio(), has_audio);
        assert_eq!(stored.transcription(), transcription);
    }
}

#[tokio::test]
async fn test_transcriber_error_means_no_audio() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(1).returning(download_video);
    let mut transcriber = MockTranscriber::new();
    transcriber
        .expect_transcribe()
        .times(1)
        .returning(|_| Err(anyhow::anyhow!("ffmpeg exited with status 1")));
    let (pipeline, _temp) = pipeline(extractor, transcriber, no_classifier());

    let record = pipeline.ensure_transcription(URL, false).await.unwrap();

    assert_eq!(record.audio, Some(AudioTrack::Missing));
}

#[tokio::test]
async fn test_download_failure_means_no_audio() {
    let mut extractor = extractor(true, 1);
    extractor
        .expect_download_media()
        .times(1)
        .returning(|_, _| Err(anyhow::anyhow!("HTTP 403")));
    let (pipeline, _temp) = pipeline(extractor, no_transcriber(), no_classifier());

    let record = pipeline.ensure_transcription(URL, false).await.unwrap();

    assert_eq!(record.has_audio(), Some(false));
    assert_eq!(record.transcription(), None);
}

#[tokio::test]
async fn test_download_without_video_means_no_audio() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(1).returning(|_, dest| {
        let path = dest.join("cover.jpg");
        fs_err::write(&path, b"jpeg")?;
        Ok(DownloadedMedia {
            dir: dest.to_path_buf(),
            files: vec![MediaFile {
                path,
                kind: MediaKind::Image,
                name: "cover.jpg".to_string(),
            }],
        })
    });
    let (pipeline, _temp) = pipeline(extractor, no_transcriber(), no_classifier());

    let record = pipeline.ensure_transcription(URL, false).await.unwrap();

    assert_eq!(record.audio, Some(AudioTrack::Missing));
}

#[tokio::test]
async fn test_transcription_cached_after_success() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(1).returning(download_video);
    let (pipeline, _temp) = pipeline(
        extractor,
        transcriber_returning(AudioTrack::Transcribed("great taco spot".to_string())),
        no_classifier(),
    );

    let first = pipeline.ensure_transcription(URL, false).await.unwrap();
    let second = pipeline.ensure_transcription(URL, false).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_transcription_force_refresh_runs_again() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(2).returning(download_video);
    let mut transcriber = MockTranscriber::new();
    transcriber
        .expect_transcribe()
        .times(2)
        .returning(|_| Ok(AudioTrack::Transcribed("great taco spot".to_string())));
    let (pipeline, _temp) = pipeline(extractor, transcriber, no_classifier());

    let first = pipeline.ensure_transcription(URL, false).await.unwrap();
    let second = pipeline.ensure_transcription(URL, true).await.unwrap();

    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn test_untranscribed_audio_is_retried() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(2).returning(download_video);
    let mut transcriber = MockTranscriber::new();
    let mut attempts = 0;
    transcriber.expect_transcribe().times(2).returning(move |_| {
        attempts += 1;
        if attempts == 1 {
            Ok(AudioTrack::Untranscribed)
        } else {
            Ok(AudioTrack::Transcribed("second time lucky".to_string()))
        }
    });
    let (pipeline, _temp) = pipeline(extractor, transcriber, no_classifier());

    let first = pipeline.ensure_transcription(URL, false).await.unwrap();
    assert_eq!(first.audio, Some(AudioTrack::Untranscribed));

    let second = pipeline.ensure_transcription(URL, false).await.unwrap();
    assert_eq!(second.transcription(), Some("second time lucky"));
}

#[tokio::test]
async fn test_classification_reuses_audio_attempt_from_same_run() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(1).returning(download_video);

    let mut classifier = MockClassifier::new();
    classifier
        .expect_complete()
        .withf(|context| !context.contains("Audio Transcription"))
        .times(1)
        .returning(|_| Ok(TACO_VERDICT.to_string()));

    let (pipeline, _temp) = pipeline(extractor, transcriber_returning(AudioTrack::Untranscribed), classifier);

    let audio = pipeline.ensure_transcription(URL, false).await.unwrap();
    assert_eq!(audio.audio, Some(AudioTrack::Untranscribed));

    let classification = pipeline.ensure_classification(URL, false, true).await.unwrap();
    assert!(classification.is_some());
    assert_eq!(pipeline.record(URL).unwrap().unwrap().audio, Some(AudioTrack::Untranscribed));
}

#[tokio::test]
async fn test_stale_media_cleared_before_download() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(1).returning(|url, dest| {
        assert!(dest.ends_with(SHORTCODE));
        assert!(fs_err::read_dir(dest)?.next().is_none(), "stale files left behind");
        download_video(url, dest)
    });
    let (pipeline, _temp) = pipeline(
        extractor,
        transcriber_returning(AudioTrack::Transcribed("great taco spot".to_string())),
        no_classifier(),
    );

    let media_dir = pipeline.media_dir(SHORTCODE);
    fs_err::create_dir_all(&media_dir).unwrap();
    fs_err::write(media_dir.join("old_clip.mp4"), b"stale").unwrap();

    pipeline.ensure_transcription(URL, false).await.unwrap();

    assert!(!media_dir.join("old_clip.mp4").exists());
}

// =========================================================================
// Classification stage
// =========================================================================

#[tokio::test]
async fn test_unparseable_classification_is_not_stored() {
    let mut classifier = MockClassifier::new();
    classifier
        .expect_complete()
        .times(1)
        .returning(|_| Ok("Sorry, I can't determine that.".to_string()));
    let (pipeline, _temp) = pipeline(extractor(false, 1), no_transcriber(), classifier);

    let before = pipeline.ensure_metadata(URL, false).await.unwrap();
    let result = pipeline.ensure_classification(URL, false, true).await.unwrap();
    let after = pipeline.record(URL).unwrap().unwrap();

    assert!(result.is_none());
    assert!(after.classification.is_none());
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn test_incomplete_classification_is_not_a_cache_hit() {
    let mut classifier = MockClassifier::new();
    let mut calls = 0;
    classifier.expect_complete().times(2).returning(move |_| {
        calls += 1;
        if calls == 1 {
            Ok(r#"{"isFoodRelated": true}"#.to_string())
        } else {
            Ok(TACO_VERDICT.to_string())
        }
    });
    let (pipeline, _temp) = pipeline(extractor(false, 1), no_transcriber(), classifier);

    assert!(pipeline.ensure_classification(URL, false, false).await.unwrap().is_none());
    let second = pipeline.ensure_classification(URL, false, false).await.unwrap();

    assert_eq!(second.unwrap().cards.len(), 2);
}

#[tokio::test]
async fn test_classifier_service_error_surfaces() {
    let mut classifier = MockClassifier::new();
    classifier
        .expect_complete()
        .times(1)
        .returning(|_| Err(anyhow::anyhow!("HTTP 401: invalid api key")));
    let (pipeline, _temp) = pipeline(extractor(false, 1), no_transcriber(), classifier);

    let err = pipeline.ensure_classification(URL, false, true).await.unwrap_err();

    assert!(matches!(reason(&err), ReelError::ClassificationServiceError(msg) if msg.contains("401")));
    assert!(pipeline.record(URL).unwrap().unwrap().classification.is_none());
}

#[tokio::test]
async fn test_classification_cached() {
    let mut classifier = MockClassifier::new();
    classifier
        .expect_complete()
        .times(1)
        .returning(|_| Ok(TACO_VERDICT.to_string()));
    let (pipeline, _temp) = pipeline(extractor(false, 1), no_transcriber(), classifier);

    let first = pipeline.ensure_classification(URL, false, true).await.unwrap();
    let second = pipeline.ensure_classification(URL, false, true).await.unwrap();

    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_classification_force_refresh_calls_model_again() {
    let mut classifier = MockClassifier::new();
    classifier
        .expect_complete()
        .times(2)
        .returning(|_| Ok(TACO_VERDICT.to_string()));
    let (pipeline, _temp) = pipeline(extractor(false, 1), no_transcriber(), classifier);

    pipeline.ensure_classification(URL, false, false).await.unwrap();
    let refreshed = pipeline.ensure_classification(URL, true, false).await.unwrap();

    assert!(refreshed.unwrap().is_food_related);
}

#[tokio::test]
async fn test_classification_without_transcription_skips_audio() {
    let mut classifier = MockClassifier::new();
    classifier
        .expect_complete()
        .withf(|context| context.contains("Title: Taco night") && !context.contains("Audio Transcription"))
        .times(1)
        .returning(|_| Ok(TACO_VERDICT.to_string()));
    let (pipeline, _temp) = pipeline(extractor(true, 1), no_transcriber(), classifier);

    let classification = pipeline.ensure_classification(URL, false, false).await.unwrap();
    let stored = pipeline.record(URL).unwrap().unwrap();

    assert!(classification.is_some());
    assert_eq!(stored.audio, None);
}

#[tokio::test]
async fn test_classification_roundtrips_through_store() {
    let mut classifier = MockClassifier::new();
    classifier
        .expect_complete()
        .times(1)
        .returning(|_| Ok(format!("```json\n{}\n```", TACO_VERDICT)));
    let (pipeline, _temp) = pipeline(extractor(false, 1), no_transcriber(), classifier);

    let returned = pipeline.ensure_classification(URL, false, false).await.unwrap().unwrap();
    let stored = pipeline.record(URL).unwrap().unwrap().classification.unwrap();

    assert_eq!(returned, stored);
    assert!(stored.is_food_related);
    assert_eq!(stored.cards[0].kind, CardKind::Restaurant);
    assert_eq!(stored.cards[0].name, "Taco Spot");
    assert_eq!(stored.cards[0].description, "Family-run taqueria");
    assert_eq!(stored.cards[0].details, "Open late");
    assert_eq!(stored.cards[1].kind, CardKind::Food);
    assert_eq!(stored.cards[1].name, "Al pastor");
    assert_eq!(stored.cards[1].details, "$3");
}

// =========================================================================
// End to end
// =========================================================================

#[tokio::test]
async fn test_stages_compose_under_one_url() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(1).returning(download_video);

    let mut classifier = MockClassifier::new();
    classifier
        .expect_complete()
        .withf(|context| context.contains("Audio Transcription: great taco spot"))
        .times(1)
        .returning(|_| {
            Ok(r#"{"isFoodRelated": true, "cards": [
                {"type": "restaurant", "name": "Taco Spot", "description": "Tacos", "details": "Downtown"}
            ]}"#
            .to_string())
        });

    let (pipeline, _temp) = pipeline(
        extractor,
        transcriber_returning(AudioTrack::Transcribed("great taco spot".to_string())),
        classifier,
    );

    assert!(pipeline.record(URL).unwrap().is_none());

    let metadata = pipeline.ensure_metadata(URL, false).await.unwrap();
    assert!(metadata.metadata.is_video);

    let transcribed = pipeline.ensure_transcription(URL, false).await.unwrap();
    assert_eq!(transcribed.has_audio(), Some(true));
    assert_eq!(transcribed.transcription(), Some("great taco spot"));
    assert!(transcribed.updated_at > metadata.updated_at);

    let classification = pipeline
        .ensure_classification(URL, false, true)
        .await
        .unwrap()
        .unwrap();
    assert!(classification.is_food_related);
    assert_eq!(classification.cards[0].kind, CardKind::Restaurant);
    assert_eq!(classification.cards[0].name, "Taco Spot");

    let stored = pipeline.record(URL).unwrap().unwrap();
    assert_eq!(stored.metadata, metadata.metadata);
    assert_eq!(stored.transcription(), Some("great taco spot"));
    assert_eq!(stored.classification, Some(classification));
    assert_eq!(stored.created_at, metadata.created_at);
    assert!(stored.updated_at > transcribed.updated_at);
    assert_eq!(pipeline.store.recent(10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_classification_pulls_in_missing_stages() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(1).returning(download_video);

    let mut classifier = MockClassifier::new();
    classifier
        .expect_complete()
        .withf(|context| context.contains("Audio Transcription: great taco spot"))
        .times(1)
        .returning(|_| Ok(TACO_VERDICT.to_string()));

    let (pipeline, _temp) = pipeline(
        extractor,
        transcriber_returning(AudioTrack::Transcribed("great taco spot".to_string())),
        classifier,
    );

    let classification = pipeline.ensure_classification(URL, false, true).await.unwrap();
    assert!(classification.is_some());

    // every stage is now cached; none of the mocks may be called again
    pipeline.ensure_metadata(URL, false).await.unwrap();
    pipeline.ensure_transcription(URL, false).await.unwrap();
    pipeline.ensure_classification(URL, false, true).await.unwrap();
}

#[tokio::test]
async fn test_download_media_uses_cached_metadata() {
    let mut extractor = extractor(true, 1);
    extractor.expect_download_media().times(1).returning(download_video);
    let (pipeline, temp) = pipeline(extractor, no_transcriber(), no_classifier());

    pipeline.ensure_metadata(URL, false).await.unwrap();
    let media = pipeline.download_media(URL).await.unwrap();

    assert_eq!(media.dir, temp.path().join("downloads").join(SHORTCODE));
    assert_eq!(media.files.len(), 1);
    assert!(media.video_file().is_some());
}

#[test]
fn test_media_dir_is_sanitized() {
    let (pipeline, temp) = pipeline(MockPostExtractor::new(), MockTranscriber::new(), MockClassifier::new());
    let downloads = temp.path().join("downloads");

    assert_eq!(pipeline.media_dir("C1a2b3c4d5"), downloads.join("C1a2b3c4d5"));
    assert_eq!(pipeline.media_dir("a/b"), downloads.join("a_b"));
    assert_eq!(pipeline.media_dir(".."), downloads.join("post"));
}
