use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, select, unbounded};
use tracing::{debug, info, warn};
use vc_utils::{FromFetchMessage, ResourceSpec, ToFetchMessage};

mod session;
mod source;

pub use session::FetchSession;
pub use source::{
    AssetSource, AssetStream, DefaultAssetSource, FetchError, FileAssetSource, HttpAssetSource,
};

const CHUNK_SIZE: usize = 64 * 1024;
// Content-Length is only a hint; cap what gets reserved up front.
const MAX_PREALLOC: u64 = 256 * 1024 * 1024;

/// Main-thread handle on a fetch worker. One worker serves exactly one load
/// session; dropping the handle cancels it.
pub struct FetchWorker {
    to_worker: Sender<ToFetchMessage>,
    from_worker: Option<Receiver<FromFetchMessage>>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FetchWorker {
    pub fn spawn(source: Arc<dyn AssetSource>) -> std::io::Result<Self> {
        let (to_worker, from_main) = unbounded::<ToFetchMessage>();
        let (to_main, from_worker) = unbounded::<FromFetchMessage>();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("vc-fetch".into())
            .spawn(move || run_worker(source, from_main, to_main, worker_cancel))?;
        Ok(Self {
            to_worker,
            from_worker: Some(from_worker),
            cancel,
            handle: Some(handle),
        })
    }

    /// Returns false once the worker is gone.
    pub fn send(&self, msg: ToFetchMessage) -> bool {
        !self.is_terminated() && self.to_worker.send(msg).is_ok()
    }

    pub fn try_recv(&self) -> Option<FromFetchMessage> {
        self.from_worker.as_ref()?.try_recv().ok()
    }

    pub fn is_terminated(&self) -> bool {
        self.from_worker.is_none()
    }

    /// Abrupt cancellation: in-flight reads are abandoned and nothing the
    /// worker produced afterwards is observable through this handle.
    pub fn terminate(&mut self) {
        if self.from_worker.is_none() {
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
        let _ = self.to_worker.send(ToFetchMessage::Cancel);
        self.from_worker = None;
        // Detached on purpose: joining would block the render thread until
        // a pending read returns.
        self.handle.take();
        debug!("fetch worker terminated");
    }
}

impl Drop for FetchWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

enum BodyEvent {
    Response {
        name: String,
        content_length: Option<u64>,
    },
    Chunk {
        name: String,
        len: u64,
    },
    Finished {
        name: String,
        buffer: Vec<u8>,
    },
    Failed {
        name: String,
        error: FetchError,
    },
}

fn run_worker(
    source: Arc<dyn AssetSource>,
    from_main: Receiver<ToFetchMessage>,
    to_main: Sender<FromFetchMessage>,
    cancel: Arc<AtomicBool>,
) {
    let (event_tx, event_rx) = unbounded::<BodyEvent>();
    let mut session: Option<FetchSession> = None;
    let mut started = false;

    loop {
        select! {
            recv(from_main) -> msg => match msg {
                Ok(ToFetchMessage::Init { resources }) => {
                    if session.is_some() {
                        let _ = to_main.send(FromFetchMessage::Error {
                            message: "already initialized".into(),
                            resource: None,
                        });
                        continue;
                    }
                    let mut new_session = FetchSession::new(resources);
                    let sizes = probe_sizes(source.as_ref(), new_session.specs());
                    let names: Vec<String> =
                        new_session.specs().iter().map(|s| s.name.clone()).collect();
                    for (name, size) in names.iter().zip(sizes) {
                        new_session.set_known_size(name, size);
                    }
                    if cancel.load(Ordering::SeqCst) {
                        return;
                    }
                    info!(
                        "fetch session: {} assets, {} bytes known up front",
                        names.len(),
                        new_session.total_bytes()
                    );
                    let _ = to_main.send(FromFetchMessage::SizeReady {
                        total_bytes: new_session.total_bytes(),
                    });
                    session = Some(new_session);
                }
                Ok(ToFetchMessage::StartLoad) => {
                    let Some(active) = session.as_ref() else {
                        let _ = to_main.send(FromFetchMessage::Error {
                            message: "not initialized".into(),
                            resource: None,
                        });
                        continue;
                    };
                    if started {
                        let _ = to_main.send(FromFetchMessage::Error {
                            message: "load already started".into(),
                            resource: None,
                        });
                        continue;
                    }
                    started = true;
                    if active.is_empty() {
                        let _ = to_main.send(FromFetchMessage::AllCompleted);
                        return;
                    }
                    for spec in active.specs() {
                        let source = source.clone();
                        let spec = spec.clone();
                        let events = event_tx.clone();
                        let cancel = cancel.clone();
                        thread::spawn(move || stream_body(source.as_ref(), spec, events, &cancel));
                    }
                }
                Ok(ToFetchMessage::Cancel) | Err(_) => {
                    cancel.store(true, Ordering::SeqCst);
                    debug!("fetch worker cancelled");
                    return;
                }
            },
            recv(event_rx) -> event => {
                let (Ok(event), Some(active)) = (event, session.as_mut()) else {
                    continue;
                };
                if cancel.load(Ordering::SeqCst) {
                    return;
                }
                match event {
                    BodyEvent::Response { name, content_length } => {
                        if let Some(percent) = active.on_response(&name, content_length) {
                            debug!("size of {name} learned late, total now {}", active.total_bytes());
                            let _ = to_main.send(progress(active, percent));
                        }
                    }
                    BodyEvent::Chunk { name, len } => {
                        if let Some(percent) = active.on_chunk(&name, len) {
                            let _ = to_main.send(progress(active, percent));
                        }
                    }
                    BodyEvent::Finished { name, buffer } => {
                        let all_done = active.on_finished(&name);
                        let _ = to_main.send(FromFetchMessage::ResourceLoaded { name, buffer });
                        if all_done {
                            let _ = to_main.send(FromFetchMessage::AllCompleted);
                            return;
                        }
                    }
                    BodyEvent::Failed { name, error } => {
                        warn!("fetching {name} failed: {error}");
                        cancel.store(true, Ordering::SeqCst);
                        let _ = to_main.send(FromFetchMessage::Error {
                            message: error.to_string(),
                            resource: Some(name),
                        });
                        return;
                    }
                }
            }
        }
    }
}

fn progress(session: &FetchSession, percent: u8) -> FromFetchMessage {
    FromFetchMessage::Progress {
        percent,
        loaded_bytes: session.loaded_bytes(),
        total_bytes: session.total_bytes(),
    }
}

/// HEADs every asset concurrently. Any failure leaves that size unknown.
fn probe_sizes(source: &dyn AssetSource, specs: &[ResourceSpec]) -> Vec<Option<u64>> {
    thread::scope(|scope| {
        let handles: Vec<_> = specs
            .iter()
            .map(|spec| {
                scope.spawn(move || match source.head(&spec.url) {
                    Ok(size) => size,
                    Err(err) => {
                        warn!("size probe for {} failed, size unknown: {err}", spec.name);
                        None
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(None))
            .collect()
    })
}

fn stream_body(
    source: &dyn AssetSource,
    spec: ResourceSpec,
    events: Sender<BodyEvent>,
    cancel: &AtomicBool,
) {
    let name = spec.name;
    let mut stream = match source.get(&spec.url) {
        Ok(stream) => stream,
        Err(error) => {
            let _ = events.send(BodyEvent::Failed { name, error });
            return;
        }
    };
    if events
        .send(BodyEvent::Response {
            name: name.clone(),
            content_length: stream.content_length,
        })
        .is_err()
    {
        return;
    }

    let reserve = stream.content_length.unwrap_or(0).min(MAX_PREALLOC) as usize;
    let mut buffer = Vec::with_capacity(reserve);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        match stream.reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                let event = BodyEvent::Chunk {
                    name: name.clone(),
                    len: n as u64,
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                let _ = events.send(BodyEvent::Failed {
                    name,
                    error: FetchError::Io {
                        url: spec.url,
                        source,
                    },
                });
                return;
            }
        }
    }
    let _ = events.send(BodyEvent::Finished { name, buffer });
}

#[cfg(test)]
mod tests;
