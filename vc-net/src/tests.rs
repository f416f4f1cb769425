use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use vc_utils::{AssetKind, FromFetchMessage, ResourceSpec, ToFetchMessage};

use super::{AssetSource, AssetStream, FetchError, FetchSession, FetchWorker, FileAssetSource};

struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.data.len() - self.pos;
        let n = remaining.min(self.chunk).min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Clone)]
struct MemoryAsset {
    data: Vec<u8>,
    head_ok: bool,
    head_length: bool,
    get_ok: bool,
    get_length: bool,
}

impl MemoryAsset {
    fn sized(len: usize) -> Self {
        Self {
            data: (0..len).map(|i| (i % 251) as u8).collect(),
            head_ok: true,
            head_length: true,
            get_ok: true,
            get_length: true,
        }
    }
}

#[derive(Default)]
struct MemorySource {
    assets: HashMap<String, MemoryAsset>,
}

impl MemorySource {
    fn with(mut self, url: &str, asset: MemoryAsset) -> Self {
        self.assets.insert(url.to_string(), asset);
        self
    }

    fn not_found(url: &str) -> FetchError {
        FetchError::Status {
            url: url.to_string(),
            status: 404,
        }
    }
}

impl AssetSource for MemorySource {
    fn head(&self, url: &str) -> Result<Option<u64>, FetchError> {
        match self.assets.get(url) {
            Some(asset) if asset.head_ok => {
                Ok(asset.head_length.then_some(asset.data.len() as u64))
            }
            _ => Err(Self::not_found(url)),
        }
    }

    fn get(&self, url: &str) -> Result<AssetStream, FetchError> {
        match self.assets.get(url) {
            Some(asset) if asset.get_ok => Ok(AssetStream {
                content_length: asset.get_length.then_some(asset.data.len() as u64),
                reader: Box::new(ChunkedReader {
                    data: asset.data.clone(),
                    pos: 0,
                    chunk: 7,
                }),
            }),
            _ => Err(Self::not_found(url)),
        }
    }
}

fn resource(name: &str, url: &str) -> ResourceSpec {
    ResourceSpec {
        name: name.to_string(),
        url: url.to_string(),
        kind: AssetKind::Unknown,
    }
}

fn next_message(worker: &FetchWorker) -> Option<FromFetchMessage> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(msg) = worker.try_recv() {
            return Some(msg);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    None
}

fn run_to_end(worker: &FetchWorker) -> Vec<FromFetchMessage> {
    let mut messages = Vec::new();
    while let Some(msg) = next_message(worker) {
        let terminal = msg.is_terminal();
        messages.push(msg);
        if terminal {
            break;
        }
    }
    messages
}

fn start(source: MemorySource, resources: Vec<ResourceSpec>) -> (FetchWorker, u64) {
    let worker = FetchWorker::spawn(Arc::new(source)).unwrap();
    assert!(worker.send(ToFetchMessage::Init { resources }));
    let Some(FromFetchMessage::SizeReady { total_bytes }) = next_message(&worker) else {
        panic!("expected SizeReady first");
    };
    assert!(worker.send(ToFetchMessage::StartLoad));
    (worker, total_bytes)
}

fn percents(messages: &[FromFetchMessage]) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            FromFetchMessage::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

#[test]
fn session_interleaved_chunks_are_monotonic() {
    let mut session = FetchSession::new(vec![resource("a", "a"), resource("b", "b")]);
    session.set_known_size("a", Some(100));
    session.set_known_size("b", Some(300));
    assert_eq!(session.total_bytes(), 400);

    let mut reported = Vec::new();
    for step in 0..40 {
        let (name, len) = if step % 4 == 0 { ("a", 10) } else { ("b", 10) };
        if let Some(p) = session.on_chunk(name, len) {
            reported.push(p);
        }
    }
    assert!(reported.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(reported.iter().filter(|p| **p == 100).count(), 1);
    assert_eq!(*reported.last().unwrap(), 100);
}

#[test]
fn session_suppresses_sub_percent_updates() {
    let mut session = FetchSession::new(vec![resource("a", "a")]);
    session.set_known_size("a", Some(1000));
    assert_eq!(session.on_chunk("a", 5), None);
    assert_eq!(session.on_chunk("a", 4), None);
    assert_eq!(session.on_chunk("a", 1), Some(1));
    assert_eq!(session.on_chunk("a", 9), None);
}

#[test]
fn session_late_size_grows_total_and_reports() {
    let mut session = FetchSession::new(vec![resource("a", "a"), resource("b", "b")]);
    session.set_known_size("a", Some(100));
    session.set_known_size("b", None);
    assert_eq!(session.total_bytes(), 100);

    assert_eq!(session.on_chunk("a", 100), Some(100));
    let forced = session.on_response("b", Some(300));
    assert_eq!(forced, Some(25));
    assert_eq!(session.total_bytes(), 400);

    // Known sizes are never corrected again.
    assert_eq!(session.on_response("a", Some(999)), None);
}

#[test]
fn session_correction_keeps_the_high_water_mark() {
    let mut session = FetchSession::new(vec![resource("a", "a"), resource("b", "b")]);
    session.set_known_size("a", Some(100));
    session.set_known_size("b", None);
    assert_eq!(session.on_chunk("a", 60), Some(60));

    assert_eq!(session.on_response("b", Some(100)), Some(30));
    // Still at or below the 60 reported before the correction.
    assert_eq!(session.on_chunk("b", 10), None);
    assert_eq!(session.on_chunk("b", 50), None);
    assert_eq!(session.on_chunk("a", 40), Some(80));
    assert_eq!(session.on_chunk("b", 40), Some(100));
}

#[test]
fn session_zero_length_head_counts_as_unknown() {
    let mut session = FetchSession::new(vec![resource("a", "a")]);
    session.set_known_size("a", Some(0));
    assert_eq!(session.total_bytes(), 0);
    assert_eq!(session.on_response("a", Some(50)), Some(0));
    assert_eq!(session.total_bytes(), 50);
}

#[test]
fn start_before_init_is_rejected() {
    let worker = FetchWorker::spawn(Arc::new(MemorySource::default())).unwrap();
    assert!(worker.send(ToFetchMessage::StartLoad));
    match next_message(&worker) {
        Some(FromFetchMessage::Error { message, resource }) => {
            assert_eq!(message, "not initialized");
            assert_eq!(resource, None);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn loads_every_asset_and_completes() {
    let source = MemorySource::default()
        .with("mem://a", MemoryAsset::sized(100))
        .with("mem://b", MemoryAsset::sized(300));
    let (worker, total) = start(
        source,
        vec![resource("a", "mem://a"), resource("b", "mem://b")],
    );
    assert_eq!(total, 400);

    let messages = run_to_end(&worker);
    assert!(matches!(messages.last(), Some(FromFetchMessage::AllCompleted)));

    let mut loaded: HashMap<String, Vec<u8>> = HashMap::new();
    for msg in &messages {
        if let FromFetchMessage::ResourceLoaded { name, buffer } = msg {
            loaded.insert(name.clone(), buffer.clone());
        }
    }
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded["a"], MemoryAsset::sized(100).data);
    assert_eq!(loaded["b"], MemoryAsset::sized(300).data);

    let progress = percents(&messages);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[test]
fn failing_asset_fails_the_session_once() {
    let mut broken = MemoryAsset::sized(64);
    broken.head_ok = false;
    broken.get_ok = false;
    let source = MemorySource::default().with("mem://broken", broken);
    let (worker, total) = start(source, vec![resource("broken", "mem://broken")]);
    assert_eq!(total, 0);

    let messages = run_to_end(&worker);
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        FromFetchMessage::Error { resource, .. } => {
            assert_eq!(resource.as_deref(), Some("broken"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(next_message_quick(&worker).is_none());
}

fn next_message_quick(worker: &FetchWorker) -> Option<FromFetchMessage> {
    std::thread::sleep(Duration::from_millis(20));
    worker.try_recv()
}

#[test]
fn unknown_size_is_corrected_mid_stream() {
    let mut mystery = MemoryAsset::sized(300);
    mystery.head_length = false;
    let source = MemorySource::default().with("mem://mystery", mystery);
    let (worker, total) = start(source, vec![resource("mystery", "mem://mystery")]);
    assert_eq!(total, 0);

    let messages = run_to_end(&worker);
    // The correction itself reports 0% before any chunk arrived.
    assert_eq!(
        messages.first(),
        Some(&FromFetchMessage::Progress {
            percent: 0,
            loaded_bytes: 0,
            total_bytes: 300,
        })
    );
    assert_eq!(percents(&messages).last(), Some(&100));
    assert!(matches!(messages.last(), Some(FromFetchMessage::AllCompleted)));
}

#[test]
fn permanently_unknown_size_still_completes() {
    let mut opaque = MemoryAsset::sized(50);
    opaque.head_length = false;
    opaque.get_length = false;
    let source = MemorySource::default().with("mem://opaque", opaque);
    let (worker, _) = start(source, vec![resource("opaque", "mem://opaque")]);

    let messages = run_to_end(&worker);
    assert!(percents(&messages).is_empty());
    assert!(matches!(messages.last(), Some(FromFetchMessage::AllCompleted)));
}

#[test]
fn nothing_arrives_after_terminate() {
    let source = MemorySource::default().with("mem://a", MemoryAsset::sized(10_000));
    let (mut worker, _) = start(source, vec![resource("a", "mem://a")]);
    worker.terminate();
    assert!(worker.is_terminated());
    assert!(worker.try_recv().is_none());
    assert!(!worker.send(ToFetchMessage::StartLoad));
}

#[test]
fn file_source_reads_relative_paths() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("models")).unwrap();
    std::fs::write(dir.path().join("models/a.vrm"), [1u8, 2, 3, 4]).unwrap();

    let source = FileAssetSource::new(dir.path());
    assert_eq!(source.head("models/a.vrm").unwrap(), Some(4));
    let mut stream = source.get("models/a.vrm").unwrap();
    assert_eq!(stream.content_length, Some(4));
    let mut bytes = Vec::new();
    stream.reader.read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes, vec![1, 2, 3, 4]);
    assert!(source.get("models/missing.vrm").is_err());
}
