mod common;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::*;
use sorng_remotefs::{
    BandwidthThrottle, LineSeparator, PathType, Permission, RemoteErrorKind, SessionState,
    TransferEngine, TransferMode, TransferPreferences, TransferStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn engine() -> TransferEngine {
    TransferEngine::new(TransferPreferences::default()).unwrap()
}

#[tokio::test]
async fn download_completes_validates_and_keeps_timestamp() {
    let modified = Utc.with_ymd_and_hms(2022, 3, 4, 5, 6, 7).unwrap();
    let state = shared(|s| {
        s.file("/pub/data.bin", b"0123456789");
        s.mtimes.insert("/pub/data.bin".into(), modified);
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("data.bin");

    let mut remote = root.child("pub/data.bin", PathType::File);
    let outcome = remote.download(&local, &engine(), false).await.unwrap();

    assert_eq!(outcome.status, TransferStatus::Complete);
    assert_eq!(outcome.bytes, 10);
    assert_eq!(std::fs::read(&local).unwrap(), b"0123456789");
    assert_eq!(count(&state, "VALIDATE"), 1);
    assert_eq!(count(&state, "ABORT"), 0);
    assert_eq!(remote.status().status(), TransferStatus::Complete);

    let mtime = filetime::FileTime::from_last_modification_time(&std::fs::metadata(&local).unwrap());
    assert_eq!(mtime.unix_seconds(), modified.timestamp());
}

#[tokio::test]
async fn resumed_download_requests_only_the_missing_tail() {
    let state = shared(|s| {
        s.file("/big.iso", b"0123456789");
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("big.iso");
    std::fs::write(&local, b"ABCDE").unwrap();

    let mut remote = root.child("big.iso", PathType::File);
    let outcome = remote.download(&local, &engine(), true).await.unwrap();

    assert_eq!(outcome.offset, 5);
    assert_eq!(outcome.bytes, 5);
    assert_eq!(count(&state, "RETR /big.iso @5"), 1);
    // bytes [0, 5) are left alone
    assert_eq!(std::fs::read(&local).unwrap(), b"ABCDE56789");
}

#[tokio::test]
async fn resume_asks_server_for_size_and_restarts_when_local_is_larger() {
    let state = shared(|s| {
        s.file("/f.bin", b"012");
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("f.bin");
    std::fs::write(&local, b"ABCDE").unwrap();

    let mut remote = root.child("f.bin", PathType::File);
    assert_eq!(remote.attributes().size, None);
    let outcome = remote.download(&local, &engine(), true).await.unwrap();

    assert_eq!(count(&state, "SIZE /f.bin"), 1);
    assert_eq!(outcome.offset, 0);
    assert_eq!(outcome.bytes, 3);
    assert_eq!(count(&state, "RETR /f.bin @0"), 1);
    assert_eq!(std::fs::read(&local).unwrap(), b"012");
}

#[tokio::test]
async fn resume_with_unknown_remote_size_restarts() {
    let state = shared(|s| {
        s.file("/f.bin", b"0123456789");
        s.caps.size = false;
        s.list_sizes = false;
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("f.bin");
    std::fs::write(&local, b"ABCDE").unwrap();

    let outcome = root
        .child("f.bin", PathType::File)
        .download(&local, &engine(), true)
        .await
        .unwrap();

    assert_eq!(outcome.status, TransferStatus::Complete);
    assert_eq!(outcome.offset, 0);
    assert_eq!(count(&state, "RETR /f.bin @0"), 1);
    assert_eq!(std::fs::read(&local).unwrap(), b"0123456789");
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn resume_without_server_support_restarts() {
    let state = shared(|s| {
        s.file("/big.iso", b"0123456789");
        s.caps.resume = false;
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("big.iso");
    std::fs::write(&local, b"ABCDE").unwrap();

    let outcome = root
        .child("big.iso", PathType::File)
        .download(&local, &engine(), true)
        .await
        .unwrap();

    assert_eq!(outcome.offset, 0);
    assert_eq!(count(&state, "RETR /big.iso @0"), 1);
    assert_eq!(std::fs::read(&local).unwrap(), b"0123456789");
}

#[tokio::test]
async fn cancel_mid_transfer_aborts_exactly_once() {
    let state = shared(|s| {
        s.file("/movie.mkv", &[7u8; 40]);
        s.read_chunk = 4;
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("movie.mkv");

    let mut remote = root.child("movie.mkv", PathType::File);
    let status = remote.status().clone();
    with_state(&state, |s| {
        let status = status.clone();
        s.on_chunk = Some(Arc::new(move |n| {
            if n == 2 {
                status.cancel();
            }
        }));
    });

    let outcome = remote.download(&local, &engine(), false).await.unwrap();

    assert_eq!(outcome.status, TransferStatus::Canceled);
    assert_eq!(std::fs::read(&local).unwrap().len(), 8);
    assert_eq!(count(&state, "ABORT"), 1);
    assert_eq!(count(&state, "VALIDATE"), 0);
    assert!(!status.cancel(), "cancel after the transfer ended is a no-op");
    assert_eq!(status.status(), TransferStatus::Canceled);
    assert_eq!(count(&state, "ABORT"), 1);
}

#[tokio::test]
async fn text_mode_round_trip_restores_original_bytes() {
    let state = shared(|s| {
        s.dir("/notes");
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let original: &[u8] = b"first\nsecond\n\nlast";
    let source = dir.path().join("source.txt");
    std::fs::write(&source, original).unwrap();

    let upload_engine = TransferEngine::new(TransferPreferences {
        transfer_mode: TransferMode::Text,
        line_separator: LineSeparator::Mac,
        ..TransferPreferences::default()
    })
    .unwrap();
    let mut remote = root.child("notes/readme.txt", PathType::File);
    remote.upload(&source, &upload_engine, false).await.unwrap();
    assert_eq!(
        file(&state, "/notes/readme.txt").unwrap(),
        b"first\r\nsecond\r\n\r\nlast"
    );

    let download_engine = TransferEngine::new(TransferPreferences {
        transfer_mode: TransferMode::Text,
        line_separator: LineSeparator::Unix,
        ..TransferPreferences::default()
    })
    .unwrap();
    let copy = dir.path().join("copy.txt");
    remote.download(&copy, &download_engine, false).await.unwrap();

    assert_eq!(std::fs::read(&copy).unwrap(), original);
}

#[tokio::test]
async fn auto_mode_picks_text_by_filename() {
    let engine = TransferEngine::new(TransferPreferences {
        transfer_mode: TransferMode::Auto,
        ..TransferPreferences::default()
    })
    .unwrap();
    assert_eq!(
        engine.select_mode("index.html").unwrap(),
        sorng_remotefs::TransferType::Ascii
    );
    assert_eq!(
        engine.select_mode("photo.jpg").unwrap(),
        sorng_remotefs::TransferType::Binary
    );
    assert_eq!(
        engine.select_mode("main.c").unwrap(),
        sorng_remotefs::TransferType::Ascii
    );
    // the pattern must cover the whole name, not a prefix of the extension
    assert_eq!(
        engine.select_mode("movie.mpg").unwrap(),
        sorng_remotefs::TransferType::Binary
    );
    assert_eq!(
        engine.select_mode("x.class").unwrap(),
        sorng_remotefs::TransferType::Binary
    );
}

#[tokio::test]
async fn unresolvable_mode_fails_before_any_bytes_move() {
    let state = shared(|s| {
        s.file("/a.txt", b"abc");
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    clear_calls(&state);
    let engine = TransferEngine::new(TransferPreferences {
        transfer_mode: TransferMode::Auto,
        text_filetype_pattern: None,
        ..TransferPreferences::default()
    })
    .unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("a.txt");

    let err = root
        .child("a.txt", PathType::File)
        .download(&local, &engine, false)
        .await
        .unwrap_err();

    assert_eq!(err.kind, RemoteErrorKind::Configuration);
    assert!(calls(&state).is_empty());
    assert!(!local.exists());
}

#[tokio::test]
async fn data_channel_failure_interrupts_session_and_keeps_partial() {
    let state = shared(|s| {
        s.file("/log.bin", &[1u8; 20]);
        s.read_chunk = 4;
        s.fail_read_after = Some(2);
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("log.bin");

    let mut remote = root.child("log.bin", PathType::File);
    let err = remote.download(&local, &engine(), false).await.unwrap_err();

    assert_eq!(err.kind, RemoteErrorKind::Transfer);
    assert_eq!(remote.status().status(), TransferStatus::Failed);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(std::fs::read(&local).unwrap().len(), 8);
}

#[tokio::test]
async fn retry_resumes_after_data_channel_failure() {
    let state = shared(|s| {
        s.file("/log.bin", b"abcdefghijklmnop");
        s.read_chunk = 4;
        s.fail_read_after = Some(1);
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("log.bin");
    let engine = TransferEngine::new(TransferPreferences {
        retry_count: 1,
        retry_delay_sec: 0,
        ..TransferPreferences::default()
    })
    .unwrap();

    let mut remote = root.child("log.bin", PathType::File);
    let outcome = engine
        .download_with_retry(&mut remote, &local, false)
        .await
        .unwrap();

    assert_eq!(outcome.status, TransferStatus::Complete);
    assert_eq!(outcome.offset, 4);
    assert_eq!(count(&state, "RETR /log.bin @4"), 1);
    assert_eq!(std::fs::read(&local).unwrap(), b"abcdefghijklmnop");
    assert_eq!(count(&state, "OPEN"), 2);
}

#[tokio::test]
async fn rejected_completion_fails_the_transfer() {
    let state = shared(|s| {
        s.dir("/up");
        s.fail_validate = true;
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("x.bin");
    std::fs::write(&local, b"payload").unwrap();

    let mut remote = root.child("up/x.bin", PathType::File);
    let err = remote.upload(&local, &engine(), false).await.unwrap_err();

    assert_eq!(err.kind, RemoteErrorKind::Transfer);
    assert_eq!(remote.status().status(), TransferStatus::Failed);
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn resumed_upload_appends_from_remote_size() {
    let state = shared(|s| {
        s.file("/up/x.bin", b"0123");
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("x.bin");
    std::fs::write(&local, b"0123456789").unwrap();

    let mut remote = root.child("up/x.bin", PathType::File);
    let outcome = remote.upload(&local, &engine(), true).await.unwrap();

    assert_eq!(outcome.offset, 4);
    assert_eq!(outcome.bytes, 6);
    assert_eq!(count(&state, "APPE /up/x.bin"), 1);
    assert_eq!(file(&state, "/up/x.bin").unwrap(), b"0123456789");
}

#[tokio::test]
async fn upload_pushes_permission_and_timestamp() {
    let state = shared(|s| {
        s.dir("/up");
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let listing_before = root.child("up", PathType::Directory).children().await.unwrap();
    assert!(listing_before.is_empty());
    let dir = tempdir().unwrap();
    let local = dir.path().join("x.bin");
    std::fs::write(&local, b"payload").unwrap();
    let engine = TransferEngine::new(TransferPreferences {
        upload: sorng_remotefs::DirectionPreferences {
            use_default_permissions: true,
            ..Default::default()
        },
        ..TransferPreferences::default()
    })
    .unwrap();

    let mut remote = root.child("up/x.bin", PathType::File);
    remote.upload(&local, &engine, false).await.unwrap();

    assert_eq!(count(&state, "CHMOD 644 /up/x.bin"), 1);
    assert_eq!(count(&state, "MFMT /up/x.bin"), 1);
    assert_eq!(remote.attributes().permission, Some(Permission::new(0o644)));
    let names = root.child("up", PathType::Directory).children().await.unwrap().names();
    assert_eq!(names, vec!["x.bin"], "parent listing refreshed after upload");
}

#[tokio::test]
async fn upload_without_attribute_commands_still_succeeds() {
    let state = shared(|s| {
        s.dir("/up");
        s.caps.permissions = false;
        s.caps.timestamp_write = false;
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let local = dir.path().join("x.bin");
    std::fs::write(&local, b"payload").unwrap();

    let outcome = root
        .child("up/x.bin", PathType::File)
        .upload(&local, &engine(), false)
        .await
        .unwrap();

    assert_eq!(outcome.status, TransferStatus::Complete);
    assert_eq!(count(&state, "CHMOD"), 0);
    assert_eq!(count(&state, "MFMT"), 0);
}

#[tokio::test]
async fn directories_are_created_not_streamed() {
    let state = shared(|s| {
        s.dir("/remote/folder");
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();

    let local_dir = dir.path().join("folder");
    let outcome = root
        .child("remote/folder", PathType::Directory)
        .download(&local_dir, &engine(), false)
        .await
        .unwrap();
    assert_eq!(outcome.status, TransferStatus::Complete);
    assert!(local_dir.is_dir());

    let mut target = root.child("remote/copy", PathType::File);
    target.upload(&local_dir, &engine(), false).await.unwrap();
    assert_eq!(target.kind(), PathType::Directory);
    assert_eq!(count(&state, "MKD /remote/copy"), 1);
    assert_eq!(count(&state, "STOR"), 0);
}

struct CountingThrottle(AtomicUsize);

#[async_trait]
impl BandwidthThrottle for CountingThrottle {
    async fn acquire(&self, bytes: usize) {
        self.0.fetch_add(bytes, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn every_chunk_passes_through_the_throttle() {
    let state = shared(|s| {
        s.file("/a.bin", &[0u8; 18]);
        s.read_chunk = 4;
    });
    let session = session(&state);
    let root = session.mount().await.unwrap();
    let dir = tempdir().unwrap();
    let throttle = Arc::new(CountingThrottle(AtomicUsize::new(0)));
    let engine = engine().with_throttles(throttle.clone(), throttle.clone());

    root.child("a.bin", PathType::File)
        .download(&dir.path().join("a.bin"), &engine, false)
        .await
        .unwrap();

    assert_eq!(throttle.0.load(Ordering::SeqCst), 18);
}
