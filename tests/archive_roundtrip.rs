use fileforge::archive::ArchiveCodec;
use fileforge::chunked::ChunkedReader;
use fileforge::compress::{ArchiveBuilder, BuildOptions};
use fileforge::extract::{ArchiveReader, ExtractOptions};
use fileforge::ledger::{ObjectUrlRegistry, ResourceLedger};
use fileforge::progress::ProgressAggregator;
use fileforge::session::ZipSession;
use fileforge::source::{normalize, ByteSource, MemorySource, SharedSource, SourceEntry, SourceInput};
use rand::{thread_rng, Rng};
use std::io;
use std::sync::{Arc, Mutex};

// ---------- helpers ----------
fn mem(name: &str, data: &[u8]) -> SharedSource {
    Arc::new(MemorySource::new(name, data.to_vec()))
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    thread_rng().fill(&mut buf[..]);
    buf
}

/// A source whose reads always fail.
struct Unreadable(&'static str);

#[async_trait::async_trait]
impl ByteSource for Unreadable {
    fn name(&self) -> &str {
        self.0
    }
    fn size(&self) -> u64 {
        64
    }
    async fn read_range(&self, _start: u64, _end: u64) -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"))
    }
}

fn recording_progress() -> (ProgressAggregator, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let progress = ProgressAggregator::with_callback(50, move |state| sink.lock().unwrap().push(state.percent));
    (progress, seen)
}

fn assert_monotonic_to_100(seen: &[u8]) {
    assert!(!seen.is_empty(), "no progress reported");
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {:?}", seen);
    assert_eq!(seen.last(), Some(&100));
}

#[tokio::test]
async fn build_then_extract_restores_tree_and_bytes() {
    let a = b"alpha contents".to_vec();
    let b = random_bytes(10_000);
    let entries = vec![
        SourceEntry::file("a.txt", mem("a.txt", &a)),
        SourceEntry::directory("dir", vec![SourceEntry::file("dir/b.txt", mem("b.txt", &b))]),
    ];
    let built = ArchiveBuilder::default()
        .build(&entries, &mut ProgressAggregator::disabled())
        .await
        .unwrap();

    let registry = ObjectUrlRegistry::new();
    let mut ledger = ResourceLedger::new(registry.clone());
    let result = ArchiveReader::default()
        .extract(&built.bytes, &mut ledger, &mut ProgressAggregator::disabled())
        .await
        .unwrap();

    let roots: Vec<_> = result.file_tree.roots().iter().map(|n| n.name.as_str()).collect();
    assert_eq!(roots, vec!["a.txt", "dir"]);
    let dir = result.file_tree.find("dir").unwrap();
    assert!(dir.is_directory());
    assert_eq!(dir.children().len(), 1);
    assert_eq!(dir.children()[0].name, "b.txt");

    assert_eq!(result.file("a.txt").unwrap().blob.bytes(), &a[..]);
    let b_file = result.file("dir/b.txt").unwrap();
    assert_eq!(registry.resolve(&b_file.handle).unwrap().bytes(), &b[..]);
    assert_eq!(result.count, 2);
}

#[tokio::test]
async fn every_codec_round_trips() {
    let payload = b"the same line over and over\n".repeat(500);
    for codec in [ArchiveCodec::Store, ArchiveCodec::Deflate, ArchiveCodec::Zstd] {
        let options = BuildOptions { codec, compression_level: 19, ..BuildOptions::default() };
        let builder = ArchiveBuilder::new(options, ChunkedReader::new(1024));
        let entries = vec![SourceEntry::file("log.txt", mem("log.txt", &payload))];
        let built = builder.build(&entries, &mut ProgressAggregator::disabled()).await.unwrap();
        if codec != ArchiveCodec::Store {
            assert!(built.ratio_percent > 50, "{:?} ratio {}", codec, built.ratio_percent);
        }

        let mut ledger = ResourceLedger::new(ObjectUrlRegistry::new());
        let result = ArchiveReader::default()
            .extract(&built.bytes, &mut ledger, &mut ProgressAggregator::disabled())
            .await
            .unwrap();
        assert_eq!(result.file("log.txt").unwrap().blob.bytes(), &payload[..], "{:?}", codec);
    }
}

#[tokio::test]
async fn bundle_scenario() {
    let report = b"0123456789".to_vec();
    let img = random_bytes(20);
    let mut session = ZipSession::default();
    session
        .add(SourceInput::Files(vec![mem("report.txt", &report), mem("img.png", &img)]))
        .await;
    session.set_archive_name("bundle");
    assert_eq!(session.download_name(), "bundle.zip");

    let built = session.compress(&mut ProgressAggregator::disabled()).await.unwrap();
    assert!(built.failed.is_empty());
    assert_eq!(built.original_size, 30);

    let mut ledger = ResourceLedger::new(ObjectUrlRegistry::new());
    let result = ArchiveReader::default()
        .extract(&built.bytes, &mut ledger, &mut ProgressAggregator::disabled())
        .await
        .unwrap();
    assert_eq!(result.file("report.txt").unwrap().blob.bytes(), &report[..]);
    assert_eq!(result.file("img.png").unwrap().blob.bytes(), &img[..]);
    assert_eq!(result.file("img.png").unwrap().mime_type, "image/png");
}

#[tokio::test]
async fn tolerant_build_skips_unreadable_entries() {
    let entries = vec![
        SourceEntry::file("good.txt", mem("good.txt", b"still here")),
        SourceEntry::file("locked.db", Arc::new(Unreadable("locked.db"))),
        SourceEntry::file("also-good.txt", mem("also-good.txt", b"me too")),
    ];
    let options = BuildOptions { continue_on_error: true, retries: 2, retry_delay_ms: 1, ..BuildOptions::default() };
    let (mut progress, seen) = recording_progress();
    let built = ArchiveBuilder::new(options, ChunkedReader::default())
        .build(&entries, &mut progress)
        .await
        .unwrap();

    assert!(!built.bytes.is_empty());
    assert_eq!(built.entry_count, 2);
    assert_eq!(built.failed.len(), 1);
    assert_eq!(built.failed[0].path, "locked.db");
    assert_monotonic_to_100(&seen.lock().unwrap());

    let mut ledger = ResourceLedger::new(ObjectUrlRegistry::new());
    let result = ArchiveReader::default()
        .extract(&built.bytes, &mut ledger, &mut ProgressAggregator::disabled())
        .await
        .unwrap();
    let mut names: Vec<_> = result.files.iter().map(|f| f.path.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["also-good.txt", "good.txt"]);
}

#[tokio::test]
async fn progress_is_monotonic_for_large_multi_chunk_builds() {
    let entries: Vec<_> = (0..4)
        .map(|i| {
            let name = format!("blob_{i}.bin");
            SourceEntry::file(&name, mem(&name, &random_bytes(300_000)))
        })
        .collect();
    let (mut progress, seen) = recording_progress();
    ArchiveBuilder::new(BuildOptions::default(), ChunkedReader::new(64 * 1024))
        .build(&entries, &mut progress)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_monotonic_to_100(&seen);
    // Both halves of the scale were visited.
    assert!(seen.iter().any(|&p| p > 0 && p < 50));
    assert!(seen.iter().any(|&p| p >= 50 && p < 100));
}

#[tokio::test]
async fn extraction_progress_and_strict_mode() {
    let input = SourceInput::Files(vec![mem("one.txt", b"1"), mem("two.txt", b"2")]);
    let normalized = normalize(input).await;
    let built = ArchiveBuilder::default()
        .build(&normalized.entries, &mut ProgressAggregator::disabled())
        .await
        .unwrap();

    let registry = ObjectUrlRegistry::new();
    let mut ledger = ResourceLedger::new(registry.clone());
    let (mut progress, seen) = recording_progress();
    let strict = ArchiveReader::new(ExtractOptions { continue_on_error: Some(false) });
    let result = strict.extract(&built.bytes, &mut ledger, &mut progress).await.unwrap();
    assert_eq!(result.count, 2);
    assert_monotonic_to_100(&seen.lock().unwrap());

    ledger.release_all();
    assert_eq!(registry.live_count(), 0);
}

#[tokio::test]
async fn truncated_archives_fail_as_a_whole() {
    let entries = vec![SourceEntry::file("a.txt", mem("a.txt", b"hello"))];
    let built = ArchiveBuilder::default()
        .build(&entries, &mut ProgressAggregator::disabled())
        .await
        .unwrap();
    let truncated = &built.bytes[..built.bytes.len() / 2];

    let registry = ObjectUrlRegistry::new();
    let mut ledger = ResourceLedger::new(registry.clone());
    let err = ArchiveReader::default()
        .extract(truncated, &mut ledger, &mut ProgressAggregator::disabled())
        .await
        .unwrap_err();
    assert!(matches!(err, fileforge::ForgeError::ArchiveParse(_)));
    assert_eq!(registry.live_count(), 0);
}
