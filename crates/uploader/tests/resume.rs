mod common;

use chunkwise_protocol::{EventKind, UploadStatus};
use chunkwise_uploader::{BackendError, UploadError, UploadOptions};

use common::*;

#[tokio::test(start_paused = true)]
async fn resume_after_drop_skips_stored_chunks() {
    let backend = FaultyBackend::new();
    let client = client(&backend, config(1, 1));
    let id = client
        .initialize_upload("talk.mp3", source(), UploadOptions::new())
        .await
        .unwrap();
    let mut sub = client.subscribe(&id).unwrap();

    // Connection drops while sending chunk 7.
    backend.fail_chunk(7, vec![transient(), transient()]);
    let err = client.upload(&id).await.unwrap_err();
    assert!(matches!(
        err,
        UploadError::ChunkUploadExhausted {
            index: 7,
            attempts: 2,
            ..
        }
    ));

    let snap = client.snapshot(&id).unwrap();
    assert_eq!(snap.status, UploadStatus::Failed);
    assert_eq!(snap.acknowledged_chunks, 7);
    assert!(snap.last_error.is_some());

    let events = drain(&mut sub);
    assert_eq!(count_failures(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e.kind,
        EventKind::UploadFailed {
            can_resume: true,
            ..
        }
    )));

    backend.reset_attempts();
    let job_id = client.resume(&id).await.unwrap();
    assert!(!job_id.is_empty());

    // Chunks 0-6 are never retransmitted.
    assert_eq!(backend.attempts(), vec![7, 8, 9]);
    assert_eq!(backend.inner.assembled(&id).unwrap(), test_data());

    let snap = client.snapshot(&id).unwrap();
    assert_eq!(snap.status, UploadStatus::Completed);
    assert!(snap.last_error.is_none());

    let events = drain(&mut sub);
    assert!(matches!(
        events.first().map(|e| &e.kind),
        Some(EventKind::UploadResumed {
            resume_cursor: Some(7)
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn restored_session_resumes_from_server_state() {
    let backend = FaultyBackend::new();
    let first = client(&backend, config(1, 0));
    let id = first
        .initialize_upload("talk.mp3", source(), UploadOptions::new())
        .await
        .unwrap();

    backend.fail_chunk(7, vec![transient()]);
    assert!(first.upload(&id).await.is_err());
    drop(first);

    // A fresh client knows nothing about the session.
    let second = client(&backend, config(2, 3));
    second
        .restore_session(&id, "talk.mp3", source(), UploadOptions::new())
        .await
        .unwrap();
    let snap = second.snapshot(&id).unwrap();
    assert_eq!(snap.status, UploadStatus::Paused);
    assert_eq!(snap.acknowledged_chunks, 0);

    backend.reset_attempts();
    second.resume(&id).await.unwrap();

    let mut sent = backend.attempts();
    sent.sort_unstable();
    assert_eq!(sent, vec![7, 8, 9]);
    assert_eq!(backend.inner.assembled(&id).unwrap(), test_data());
}

#[tokio::test(start_paused = true)]
async fn refresh_is_idempotent() {
    let backend = FaultyBackend::new();
    let client = client(&backend, config(1, 0));
    let id = client
        .initialize_upload("talk.mp3", source(), UploadOptions::new())
        .await
        .unwrap();
    backend.fail_chunk(4, vec![transient()]);
    assert!(client.upload(&id).await.is_err());

    let first = client.refresh(&id).await.unwrap();
    let acked_first = client.snapshot(&id).unwrap().acknowledged_chunks;
    let second = client.refresh(&id).await.unwrap();
    let acked_second = client.snapshot(&id).unwrap().acknowledged_chunks;

    assert_eq!(first.resume_cursor, Some(4));
    assert_eq!(second.resume_cursor, first.resume_cursor);
    assert_eq!(second.acknowledged, first.acknowledged);
    assert_eq!(acked_first, acked_second);
    assert_eq!(second.newly_acknowledged, 0);
}

#[tokio::test(start_paused = true)]
async fn expired_session_fails_distinctly() {
    let backend = FaultyBackend::new();
    let client = client(&backend, config(1, 0));
    let id = client
        .initialize_upload("talk.mp3", source(), UploadOptions::new())
        .await
        .unwrap();
    backend.fail_chunk(5, vec![transient()]);
    assert!(client.upload(&id).await.is_err());

    let first_reason = client.snapshot(&id).unwrap().last_error.unwrap();
    assert!(first_reason.starts_with("chunk 5 failed"));

    let mut sub = client.subscribe(&id).unwrap();
    assert!(backend.inner.evict(&id));

    let err = client.resume(&id).await.unwrap_err();
    assert!(matches!(err, UploadError::SessionExpired(ref s) if s == &id));
    assert!(!err.can_resume());

    let snap = client.snapshot(&id).unwrap();
    assert_eq!(snap.status, UploadStatus::Failed);
    assert_eq!(snap.last_error, Some(err.to_string()));

    let events = drain(&mut sub);
    assert_eq!(count_failures(&events), 1);
    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(EventKind::UploadFailed {
            can_resume: false,
            ..
        })
    ));

    // A brand-new session starts over from chunk 0.
    backend.reset_attempts();
    let fresh = client
        .initialize_upload("talk.mp3", source(), UploadOptions::new())
        .await
        .unwrap();
    assert_ne!(fresh, id);
    client.upload(&fresh).await.unwrap();
    assert_eq!(backend.attempts(), (0..10).collect::<Vec<u32>>());
}

#[tokio::test(start_paused = true)]
async fn expired_during_transfer_is_not_resumable() {
    let backend = FaultyBackend::new();
    let client = client(&backend, config(1, 3));
    let id = client
        .initialize_upload("talk.mp3", source(), UploadOptions::new())
        .await
        .unwrap();

    backend.fail_chunk(2, vec![BackendError::SessionNotFound(id.clone())]);
    let err = client.upload(&id).await.unwrap_err();
    assert!(matches!(err, UploadError::SessionExpired(_)));
    assert_eq!(backend.attempts_for(2), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_status_query_fails_paused_session() {
    let backend = FaultyBackend::new();
    let client = client(&backend, config(1, 3));
    let id = client
        .initialize_upload("talk.mp3", source(), UploadOptions::new())
        .await
        .unwrap();
    client.pause(&id).unwrap();
    let mut sub = client.subscribe(&id).unwrap();

    backend.fail_status(vec![BackendError::Rejected {
        status: 403,
        message: "forbidden".into(),
    }]);
    let err = client.resume(&id).await.unwrap_err();
    assert!(!err.can_resume());

    let snap = client.snapshot(&id).unwrap();
    assert_eq!(snap.status, UploadStatus::Failed);
    assert_eq!(snap.last_error, Some(err.to_string()));
    assert!(backend.attempts().is_empty());

    let events = drain(&mut sub);
    assert_eq!(count_failures(&events), 1);
    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(EventKind::UploadFailed {
            can_resume: false,
            ..
        })
    ));

    // An explicit resume once the server accepts the query again.
    client.resume(&id).await.unwrap();
    assert_eq!(backend.inner.assembled(&id).unwrap(), test_data());
    assert!(client.snapshot(&id).unwrap().last_error.is_none());
}
