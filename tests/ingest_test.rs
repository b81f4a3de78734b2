//! Upload and requeue paths of the ingestion API.

mod helpers;

use helpers::*;
use vehicle_count::models::job::{source_key, GpsCoord};
use vehicle_count::models::video::VideoStatus;
use vehicle_count::services::consumer::Outcome;
use vehicle_count::services::ingest::{self, IngestError};

const GPS: &str = "[[12.9716, 77.5946], [12.9720, 77.5950]]";

#[tokio::test]
async fn test_submit_stores_video_record_and_job() {
    let harness = Harness::new(one_car_crossing());
    let state = harness.app_state();

    let submission = ingest::submit_video(&state, b"mp4 bytes", Some("junction.mp4"), GPS)
        .await
        .unwrap();

    assert_eq!(submission.status, VideoStatus::Uploaded);
    assert_eq!(submission.source, "CCTV");

    let video_id = submission.video_id;
    assert_eq!(
        harness.blobs.get(&source_key(video_id)).as_deref(),
        Some(&b"mp4 bytes"[..])
    );

    let record = harness.store.record(video_id).unwrap();
    assert_eq!(record.status, VideoStatus::Uploaded);
    assert_eq!(record.filename.as_deref(), Some("junction.mp4"));
    assert_eq!(record.source.as_deref(), Some("CCTV"));
    assert_eq!(record.gps_coords.len(), 2);

    let queued = harness.queue.undelivered();
    assert_eq!(queued.len(), 1);
    let job = queued[0].job.as_ref().unwrap();
    assert_eq!(job.video_id, video_id);
    assert_eq!(job.gps_coords[0], GpsCoord(12.9716, 77.5946));
}

#[tokio::test]
async fn test_submission_response_serializes_upper_case_status() {
    let harness = Harness::new(Vec::new());
    let submission = ingest::submit_video(&harness.app_state(), b"x", None, GPS)
        .await
        .unwrap();

    let json = serde_json::to_value(&submission).unwrap();
    assert_eq!(json["status"], "UPLOADED");
    assert_eq!(json["source"], "CCTV");
    assert_eq!(json["video_id"], submission.video_id.to_string());
}

#[tokio::test]
async fn test_empty_file_is_rejected_before_any_side_effect() {
    let harness = Harness::new(Vec::new());

    let err = ingest::submit_video(&harness.app_state(), b"", None, GPS)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::EmptyFile));
    assert!(harness.blobs.keys().is_empty());
    assert!(harness.queue.undelivered().is_empty());
}

#[tokio::test]
async fn test_invalid_gps_is_rejected() {
    let harness = Harness::new(Vec::new());
    let state = harness.app_state();

    for raw in ["", "not json", "[]", "[[91.0, 10.0]]", "[[10.0, -181.0]]", "[[1.0]]"] {
        let err = ingest::submit_video(&state, b"video", None, raw)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Gps(_)), "accepted {raw:?}");
    }
    assert!(harness.queue.undelivered().is_empty());
}

#[tokio::test]
async fn test_enqueue_is_retried() {
    let harness = Harness::new(Vec::new());
    harness.queue.fail_next_enqueues(2);

    let submission = ingest::submit_video(&harness.app_state(), b"video", None, GPS)
        .await
        .unwrap();

    assert_eq!(harness.queue.undelivered().len(), 1);
    assert_eq!(
        harness.store.status(submission.video_id),
        Some(VideoStatus::Uploaded)
    );
}

#[tokio::test]
async fn test_enqueue_gives_up_after_bounded_attempts() {
    let harness = Harness::new(Vec::new());
    harness.queue.fail_next_enqueues(10);

    let err = ingest::submit_video(&harness.app_state(), b"video", None, GPS)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Queue(_)));
}

#[tokio::test]
async fn test_submitted_video_is_processed_by_worker() {
    let harness = Harness::new(one_car_crossing());
    let submission = ingest::submit_video(&harness.app_state(), b"video", None, GPS)
        .await
        .unwrap();

    assert_eq!(
        harness.consumer().poll_once().await.unwrap(),
        Some(Outcome::Done)
    );
    let record = harness.store.record(submission.video_id).unwrap();
    assert_eq!(record.status, VideoStatus::Done);
    assert_eq!(record.vehicle_totals.unwrap().medium, 1);
}

#[tokio::test]
async fn test_requeue_appends_job_for_pending_video() {
    let harness = Harness::new(Vec::new());
    let video_id = uuid::Uuid::new_v4();
    harness.store.seed(video_id, VideoStatus::Processing);

    ingest::requeue(&harness.app_state(), video_id).await.unwrap();

    let queued = harness.queue.undelivered();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].job.as_ref().unwrap().video_id, video_id);
}

#[tokio::test]
async fn test_requeue_rejects_terminal_and_unknown_videos() {
    let harness = Harness::new(Vec::new());
    let state = harness.app_state();

    let done = uuid::Uuid::new_v4();
    harness.store.seed(done, VideoStatus::Done);
    assert!(matches!(
        ingest::requeue(&state, done).await,
        Err(IngestError::Terminal(VideoStatus::Done))
    ));

    assert!(matches!(
        ingest::requeue(&state, uuid::Uuid::new_v4()).await,
        Err(IngestError::NotFound(_))
    ));
    assert!(harness.queue.undelivered().is_empty());
}
