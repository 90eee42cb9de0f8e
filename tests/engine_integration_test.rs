use sharelink::config::EngineConfig;
use sharelink::core::progress::{
    FnSink, NoopSink, ProgressEvent, ProgressPublisher, ProgressSink, ProgressUpdate, ScaledSink, SharedSink,
};
use sharelink::engine::{isolated_lock, MemoryCredentialStore, SearchRequest, SearchType, TransferEngine};
use sharelink::protocols::smb::{ConnectionDescriptor, EntryKind, Fault, MemoryTransport, TransportCall};
use sharelink::{CancelCategory, ShareError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn engine(transport: &MemoryTransport) -> TransferEngine {
    let credentials =
        MemoryCredentialStore::single("nas", ConnectionDescriptor::new("nas.local", "photos"));
    TransferEngine::new(
        Arc::new(transport.clone()),
        Arc::new(credentials),
        EngineConfig::test_preset(),
    )
    .with_lock(isolated_lock())
}

fn noop() -> SharedSink {
    Arc::new(NoopSink)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

#[tokio::test]
async fn test_list_root_scenario() {
    let transport = MemoryTransport::new();
    transport.add_file("a.txt", b"hello");
    transport.add_dir("sub");

    let entries = engine(&transport).list("nas", "/").await.unwrap();

    let summary: Vec<_> = entries
        .iter()
        .map(|e| (e.name.as_str(), e.kind, e.path.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("a.txt", EntryKind::File, "a.txt"),
            ("sub", EntryKind::Directory, "sub"),
        ]
    );
    assert_eq!(entries[0].size, 5);
    assert!(entries[0].modified.is_some());
}

#[tokio::test]
async fn test_search_files_only_wildcard() {
    let transport = MemoryTransport::new();
    transport.add_file("pic.jpg", b"1");
    transport.add_file("pic.JPG", b"2");
    transport.add_file("notes.jpg.txt", b"3");
    transport.add_dir("folder.jpg");
    transport.add_file("folder.jpg/inner.jpg", b"4");

    let engine = engine(&transport);
    let flag = engine.begin(CancelCategory::Search);
    let request = SearchRequest::new("", "*.jpg").with_type(SearchType::FilesOnly);
    let mut names: Vec<_> = engine
        .search("nas", &request, &flag)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    names.sort();

    assert_eq!(names, vec!["folder.jpg/inner.jpg", "pic.JPG", "pic.jpg"]);
}

#[tokio::test]
async fn test_search_without_subfolders_and_contains_query() {
    let transport = MemoryTransport::new();
    transport.add_file("Holiday-2023.png", b"1");
    transport.add_file("trips/holiday-2024.png", b"2");

    let engine = engine(&transport);
    let flag = engine.begin(CancelCategory::Search);
    let request = SearchRequest::new("", "HOLIDAY").recursive(false);
    let found = engine.search("nas", &request, &flag).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Holiday-2023.png");
}

#[tokio::test]
async fn test_search_skips_unreadable_subfolder() {
    let transport = MemoryTransport::new();
    transport.add_file("broken/a.log", b"a");
    transport.add_file("fine/b.log", b"b");
    transport.fail_list_at("broken", Fault::AccessDenied);

    let engine = engine(&transport);
    let flag = engine.begin(CancelCategory::Search);
    let found = engine
        .search("nas", &SearchRequest::new("", "*.log"), &flag)
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].path, "fine/b.log");
}

#[tokio::test]
async fn test_search_cancelled_before_start() {
    let transport = MemoryTransport::new();
    transport.add_file("x.txt", b"x");
    let engine = engine(&transport);

    let flag = engine.begin(CancelCategory::Search);
    engine.cancel(CancelCategory::Search);
    let err = engine
        .search("nas", &SearchRequest::new("", "*"), &flag)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(err.to_string().contains("cancelled by user"));
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_search_partial_results_after_mid_walk_cancel() {
    let transport = MemoryTransport::new();
    for dir in ["a", "b", "c"] {
        transport.add_file(&format!("{}/hit.txt", dir), b"x");
    }
    let engine = engine(&transport);
    let flag = engine.begin(CancelCategory::Search);

    // Cancel once the first directory has been listed
    transport.set_latency(Duration::from_millis(40));
    let cancel = engine.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel(CancelCategory::Search);
    });

    let results = engine
        .search_partial("nas", &SearchRequest::new("", "*.txt"), &flag)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert!(results.cancelled);
    assert!(results.entries.len() < 3);
}

#[tokio::test]
async fn test_operations_are_mutually_exclusive() {
    let transport = MemoryTransport::new();
    transport.add_file("one.txt", b"1");
    transport.set_latency(Duration::from_millis(15));
    let engine = engine(&transport);

    let mut tasks = Vec::new();
    for i in 0..6 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine.list("nas", "").await.map(|_| ())
            } else {
                engine.exists("nas", "one.txt").await.map(|_| ())
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(transport.max_concurrent_connections(), 1);
    assert_eq!(transport.active_connections(), 0);
}

#[tokio::test]
async fn test_engines_sharing_lock_are_serialized() {
    let transport = MemoryTransport::new();
    transport.set_latency(Duration::from_millis(15));
    let first = engine(&transport);
    let second = engine(&transport).with_lock(first.lock_handle());

    let (a, b) = tokio::join!(first.list("nas", ""), second.list("nas", ""));
    a.unwrap();
    b.unwrap();
    assert_eq!(transport.max_concurrent_connections(), 1);
}

#[tokio::test]
async fn test_independently_built_engines_are_serialized() {
    let transport = MemoryTransport::new();
    transport.set_latency(Duration::from_millis(15));
    let build = || {
        let credentials =
            MemoryCredentialStore::single("nas", ConnectionDescriptor::new("nas.local", "photos"));
        TransferEngine::new(
            Arc::new(transport.clone()),
            Arc::new(credentials),
            EngineConfig::test_preset(),
        )
    };
    let first = build();
    let second = build();
    assert!(Arc::ptr_eq(&first.lock_handle(), &second.lock_handle()));

    let (a, b) = tokio::join!(first.list("nas", ""), second.list("nas", ""));
    a.unwrap();
    b.unwrap();
    assert_eq!(transport.max_concurrent_connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_search_lock_timeout() {
    let transport = MemoryTransport::new();
    let engine = engine(&transport);

    let lock = engine.lock_handle();
    let _held = lock.lock().await;

    let flag = engine.begin(CancelCategory::Search);
    let err = engine
        .search("nas", &SearchRequest::new("", "*"), &flag)
        .await
        .unwrap_err();

    assert!(matches!(err, ShareError::LockTimeout { .. }));
    assert!(err.to_string().contains("possible deadlock"));
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_transient_failures_exhaust_three_attempts() {
    let transport = MemoryTransport::new();
    transport.fail_next_n(TransportCall::Connect, 10, Fault::ConnectionReset);

    let err = engine(&transport).list("nas", "albums").await.unwrap_err();

    assert_eq!(transport.call_count(TransportCall::Connect), 3);
    match &err {
        ShareError::RetriesExhausted { path, attempts, .. } => {
            assert_eq!(path, "albums");
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert!(err.to_string().contains("3 attempts"));
}

#[tokio::test]
async fn test_permanent_failure_is_attempted_once() {
    let transport = MemoryTransport::new();
    transport.fail_next(TransportCall::List, Fault::InvalidArgument("bad info class".into()));

    let err = engine(&transport).list("nas", "").await.unwrap_err();

    assert!(matches!(err, ShareError::InvalidArgument(_)));
    assert_eq!(transport.call_count(TransportCall::Connect), 1);
    assert_eq!(transport.active_connections(), 0);
}

#[tokio::test]
async fn test_download_resumes_after_dropped_connection() {
    let transport = MemoryTransport::new();
    let data = payload(40_000);
    transport.add_file("raw/big.bin", &data);
    transport.fail_read_at("raw/big.bin", 16_384, Fault::ConnectionReset);

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("big.bin");
    let engine = engine(&transport);
    let flag = engine.begin(CancelCategory::Download);

    let bytes = engine
        .download("nas", "raw/big.bin", &local, &flag, &noop())
        .await
        .unwrap();

    assert_eq!(bytes, 40_000);
    assert_eq!(std::fs::read(&local).unwrap(), data);
    assert_eq!(transport.call_count(TransportCall::Connect), 2);
    assert_eq!(
        transport.read_offsets("raw/big.bin"),
        vec![0, 8192, 16_384, 16_384, 24_576, 32_768, 40_000]
    );
}

#[tokio::test]
async fn test_resume_download_keeps_existing_partial() {
    let transport = MemoryTransport::new();
    let data = payload(20_000);
    transport.add_file("clip.mov", &data);

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("clip.mov");
    std::fs::write(&local, &data[..9_000]).unwrap();

    let engine = engine(&transport);
    let flag = engine.begin(CancelCategory::Download);
    engine
        .resume_download("nas", "clip.mov", &local, &flag, &noop())
        .await
        .unwrap();

    assert_eq!(transport.read_offsets("clip.mov")[0], 9_000);
    assert_eq!(std::fs::read(&local).unwrap(), data);
}

#[tokio::test]
async fn test_download_cancelled_mid_transfer_removes_partial() {
    let transport = MemoryTransport::new();
    transport.add_file("movie.mkv", &payload(100_000));
    let engine = engine(&transport);
    let flag = engine.begin(CancelCategory::Download);

    let trigger = flag.clone();
    let sink: SharedSink = Arc::new(FnSink(move |update: sharelink::ProgressUpdate| {
        if let ProgressEvent::Bytes { current, .. } = update.event {
            if current >= 8192 {
                trigger.cancel();
            }
        }
    }));

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("movie.mkv");
    let err = engine
        .download("nas", "movie.mkv", &local, &flag, &sink)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!local.exists());
    assert!(transport.read_offsets("movie.mkv").len() < 4);
}

#[tokio::test]
async fn test_upload_cancel_cleans_remote_partial() {
    let transport = MemoryTransport::new();
    let engine = engine(&transport);
    let dir = TempDir::new().unwrap();
    let local = dir.path().join("upload.bin");
    std::fs::write(&local, payload(64_000)).unwrap();

    let flag = engine.begin(CancelCategory::Upload);
    let trigger = flag.clone();
    let sink: SharedSink = Arc::new(FnSink(move |update: sharelink::ProgressUpdate| {
        if let ProgressEvent::Bytes { current, .. } = update.event {
            if current > 0 {
                trigger.cancel();
            }
        }
    }));

    let err = engine
        .upload("nas", &local, "upload.bin", &flag, &sink)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!transport.exists("upload.bin"));
    assert_eq!(transport.call_count(TransportCall::Rm), 1);
}

#[tokio::test]
async fn test_download_progress_is_monotonic_and_completes() {
    let transport = MemoryTransport::new();
    transport.add_file("doc.pdf", &payload(200_000));
    let engine = engine(&transport);
    let (publisher, subscriber) = ProgressPublisher::unbounded();
    let sink: SharedSink = Arc::new(publisher);

    let dir = TempDir::new().unwrap();
    let flag = engine.begin(CancelCategory::Download);
    engine
        .download("nas", "doc.pdf", &dir.path().join("doc.pdf"), &flag, &sink)
        .await
        .unwrap();

    let percents: Vec<f64> = subscriber.drain().into_iter().filter_map(|u| u.percent).collect();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*percents.last().unwrap(), 100.0);
    assert!(percents.len() <= 400);
}

#[tokio::test]
async fn test_download_stays_inside_finalize_head() {
    let transport = MemoryTransport::new();
    transport.add_file("clip.mov", &payload(60_000));
    let engine = engine(&transport);
    let (head, tail) = engine.config().finalize_windows();
    let (publisher, subscriber) = ProgressPublisher::unbounded();
    let caller: SharedSink = Arc::new(publisher);

    let dir = TempDir::new().unwrap();
    let flag = engine.begin(CancelCategory::Download);
    let sink = ScaledSink::shared(caller.clone(), head);
    engine
        .download("nas", "clip.mov", &dir.path().join("clip.mov"), &flag, &sink)
        .await
        .unwrap();
    let transfer: Vec<f64> = subscriber.drain().into_iter().filter_map(|u| u.percent).collect();
    assert_eq!(transfer.last().copied(), Some(90.0));
    assert!(transfer.iter().all(|p| *p <= 90.0));

    // Copy to the final location
    ScaledSink::shared(caller, tail).emit(ProgressUpdate::new(ProgressEvent::Bytes { current: 1, total: 1 }));
    let finalize: Vec<f64> = subscriber.drain().into_iter().filter_map(|u| u.percent).collect();
    assert_eq!(finalize, vec![100.0]);
}

#[tokio::test]
async fn test_rename_onto_existing_target_is_refused() {
    let transport = MemoryTransport::new();
    transport.add_file("x/a.txt", b"a");
    transport.add_dir("x/b.txt");

    let err = engine(&transport)
        .rename("nas", "x/a.txt", "x/b.txt")
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(transport.exists("x/a.txt"));
    assert_eq!(transport.call_count(TransportCall::Rename), 0);
}

#[tokio::test]
async fn test_folder_round_trip() {
    let transport = MemoryTransport::new();
    transport.add_file("album/cover.jpg", &payload(9_000));
    transport.add_file("album/disc1/01.flac", &payload(30_000));
    transport.add_file("album/disc1/02.flac", &payload(12_000));
    transport.add_dir("album/empty");
    let engine = engine(&transport);

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("album");
    let (publisher, subscriber) = ProgressPublisher::unbounded();
    let sink: SharedSink = Arc::new(publisher);

    let flag = engine.begin(CancelCategory::Download);
    let down = engine
        .download_folder("nas", "album", &local, &flag, &sink)
        .await
        .unwrap();
    assert_eq!(down.files, 3);
    assert_eq!(down.directories, 2);
    assert_eq!(down.bytes, 51_000);
    assert!(local.join("empty").is_dir());
    assert_eq!(std::fs::read(local.join("disc1").join("02.flac")).unwrap(), payload(12_000));

    let percents: Vec<f64> = subscriber.drain().into_iter().filter_map(|u| u.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1] + 1e-9));
    assert_eq!(*percents.last().unwrap(), 100.0);

    let flag = engine.begin(CancelCategory::Upload);
    let up = engine
        .upload_folder("nas", &local, "backup/album", &flag, &noop())
        .await
        .unwrap();
    assert_eq!(up.files, 3);
    assert_eq!(transport.file_data("backup/album/disc1/01.flac").unwrap(), payload(30_000));
    assert!(transport.exists("backup/album/empty"));
}

#[tokio::test]
async fn test_folder_download_cancelled_before_descent() {
    let transport = MemoryTransport::new();
    transport.add_file("tree/a/b/c.txt", b"c");
    let engine = engine(&transport);

    let flag = engine.begin(CancelCategory::Download);
    flag.cancel();
    let dir = TempDir::new().unwrap();
    let err = engine
        .download_folder("nas", "tree", dir.path(), &flag, &noop())
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_share_name_stripped_from_paths() {
    let transport = MemoryTransport::new();
    transport.add_file("reports/q1.csv", b"1,2");
    let engine = engine(&transport);

    // "public" is a known share name, "public-reports" is not
    assert!(engine.exists("nas", "/public/reports/q1.csv").await.unwrap());
    assert_eq!(engine.resolve("public-reports/q1.csv"), "public-reports/q1.csv");
}
