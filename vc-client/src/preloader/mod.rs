//! Named asset loading over a single fetch worker.
//!
//! A load session walks `Pending -> Loading -> {Completed | Error | Cancelled}`
//! and never goes back. Bytes come from the worker; humanoid and animation
//! payloads then pass through a [`DecodeStage`] and the session only
//! completes once both the byte transfer and every decode have finished.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};
use vc_net::{AssetSource, FetchWorker};
use vc_utils::{AssetDescriptor, FromFetchMessage, ResourceSpec, ToFetchMessage};

use crate::decode::{DecodeStage, DecodeTicket, DecodedAsset};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Pending,
    Loading,
    Completed,
    Error,
    Cancelled,
}

impl LoadStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Loading => "loading",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreloadError {
    #[error("assets cannot change once loading started")]
    AlreadyStarted,
    #[error("asset `{0}` is already registered")]
    DuplicateName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The worker reported a network or I/O failure.
    Transport,
    Decode,
    /// The worker thread could not be started.
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LoadFailure {
    pub kind: FailureKind,
    pub message: String,
    pub resource: Option<String>,
}

#[derive(Debug)]
pub enum AssetPayload {
    /// Bytes have not arrived, or are still being decoded.
    Pending,
    Raw(Vec<u8>),
    Decoded(DecodedAsset),
    /// Handed to a consumer through [`Preloader::take_payload`].
    Claimed,
}

impl AssetPayload {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Raw(_) | Self::Decoded(_))
    }
}

#[derive(Debug)]
pub struct AssetRecord {
    pub descriptor: AssetDescriptor,
    /// Known once the body finished streaming. Session-wide counters are
    /// on [`Preloader::total_bytes_known`] and [`Preloader::total_bytes_loaded`].
    pub byte_size: Option<u64>,
    pub bytes_loaded: u64,
    pub payload: AssetPayload,
}

pub type ResourceTable = HashMap<String, AssetRecord>;

type ProgressListener = Box<dyn FnMut(u8) + Send + Sync>;
type CompletedListener = Box<dyn FnMut(&ResourceTable) + Send + Sync>;
type ErrorListener = Box<dyn FnMut(&LoadFailure) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    progress: Vec<ProgressListener>,
    completed: Vec<CompletedListener>,
    error: Vec<ErrorListener>,
}

pub struct Preloader {
    source: Arc<dyn AssetSource>,
    order: Vec<String>,
    records: ResourceTable,
    status: LoadStatus,
    session: u64,
    worker: Option<FetchWorker>,
    bytes_complete: bool,
    total_bytes_known: Option<u64>,
    total_bytes_loaded: u64,
    pending_decodes: HashSet<String>,
    decodes_released: bool,
    last_percent: Option<u8>,
    failure: Option<LoadFailure>,
    listeners: Listeners,
}

impl Preloader {
    pub fn new(source: Arc<dyn AssetSource>) -> Self {
        Self {
            source,
            order: Vec::new(),
            records: HashMap::new(),
            status: LoadStatus::Pending,
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            worker: None,
            bytes_complete: false,
            total_bytes_known: None,
            total_bytes_loaded: 0,
            pending_decodes: HashSet::new(),
            decodes_released: false,
            last_percent: None,
            failure: None,
            listeners: Listeners::default(),
        }
    }

    pub fn add(&mut self, descriptor: AssetDescriptor) -> Result<(), PreloadError> {
        if self.status != LoadStatus::Pending {
            return Err(PreloadError::AlreadyStarted);
        }
        if self.records.contains_key(&descriptor.name) {
            return Err(PreloadError::DuplicateName(descriptor.name));
        }
        debug!(asset = %descriptor.name, kind = %descriptor.kind, url = %descriptor.url, "asset registered");
        self.order.push(descriptor.name.clone());
        self.records.insert(
            descriptor.name.clone(),
            AssetRecord {
                descriptor,
                byte_size: None,
                bytes_loaded: 0,
                payload: AssetPayload::Pending,
            },
        );
        Ok(())
    }

    /// Starts the session. An empty session completes immediately.
    pub fn load(&mut self) -> Result<(), PreloadError> {
        if self.status != LoadStatus::Pending {
            return Err(PreloadError::AlreadyStarted);
        }
        self.status = LoadStatus::Loading;
        info!(session = self.session, assets = self.order.len(), "preload started");

        if self.records.is_empty() {
            self.total_bytes_known = Some(0);
            self.bytes_complete = true;
            self.check_completion();
            return Ok(());
        }

        let resources: Vec<ResourceSpec> = self
            .order
            .iter()
            .filter_map(|name| self.records.get(name))
            .map(|record| ResourceSpec::from(&record.descriptor))
            .collect();

        match FetchWorker::spawn(self.source.clone()) {
            Ok(worker) => {
                worker.send(ToFetchMessage::Init { resources });
                self.worker = Some(worker);
            }
            Err(err) => self.fail(LoadFailure {
                kind: FailureKind::Worker,
                message: format!("failed to start fetch worker: {err}"),
                resource: None,
            }),
        }
        Ok(())
    }

    /// Drains worker messages and finished decodes. Call once per frame.
    /// After a cancel or failure the next call releases the session's
    /// decode jobs.
    pub fn poll(&mut self, decoder: &mut dyn DecodeStage) {
        if self.status != LoadStatus::Loading {
            self.release_decodes(decoder);
            return;
        }

        while let Some(msg) = self.worker.as_ref().and_then(FetchWorker::try_recv) {
            match msg {
                FromFetchMessage::SizeReady { total_bytes } => {
                    debug!(session = self.session, total_bytes, "sizes probed");
                    self.total_bytes_known = Some(total_bytes);
                    if let Some(worker) = &self.worker {
                        worker.send(ToFetchMessage::StartLoad);
                    }
                }
                FromFetchMessage::Progress {
                    percent,
                    loaded_bytes,
                    total_bytes,
                } => {
                    self.record_bytes(loaded_bytes, total_bytes);
                    self.emit_progress(percent);
                }
                FromFetchMessage::ResourceLoaded { name, buffer } => {
                    self.on_resource_loaded(name, buffer, decoder);
                    let received = self.received_bytes();
                    self.record_bytes(received, 0);
                }
                FromFetchMessage::AllCompleted => {
                    debug!(session = self.session, "all bytes received");
                    // Sizes that never became known are settled by what arrived.
                    let received = self.received_bytes();
                    self.record_bytes(received, received);
                    self.bytes_complete = true;
                    self.worker = None;
                }
                FromFetchMessage::Error { message, resource } => {
                    self.fail(LoadFailure {
                        kind: FailureKind::Transport,
                        message,
                        resource,
                    });
                    self.release_decodes(decoder);
                    return;
                }
            }
        }

        for outcome in decoder.poll() {
            if outcome.ticket.session != self.session || self.status != LoadStatus::Loading {
                debug!(asset = %outcome.ticket.name, session = outcome.ticket.session, "discarding stale decode");
                continue;
            }
            let name = outcome.ticket.name;
            if !self.pending_decodes.remove(&name) {
                warn!(asset = %name, "decode finished for an asset that was not submitted");
                continue;
            }
            match outcome.result {
                Ok(asset) => {
                    if let Some(record) = self.records.get_mut(&name) {
                        record.payload = AssetPayload::Decoded(asset);
                    }
                    debug!(asset = %name, "asset decoded");
                }
                Err(err) => {
                    self.fail(LoadFailure {
                        kind: FailureKind::Decode,
                        message: err.to_string(),
                        resource: Some(name),
                    });
                    self.release_decodes(decoder);
                    return;
                }
            }
        }

        self.check_completion();
    }

    /// Stops the session. In-flight bytes and decodes are abandoned and no
    /// further events are emitted. Idempotent.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.worker = None;
        self.pending_decodes.clear();
        self.status = LoadStatus::Cancelled;
        info!(session = self.session, "preload cancelled");
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    pub fn session_id(&self) -> u64 {
        self.session
    }

    /// Highest percentage emitted so far.
    pub fn percent(&self) -> u8 {
        self.last_percent.unwrap_or(0)
    }

    /// Total size as far as it is known. `None` until the worker finished
    /// probing sizes; grows when a late size is learned.
    pub fn total_bytes_known(&self) -> Option<u64> {
        self.total_bytes_known
    }

    pub fn total_bytes_loaded(&self) -> u64 {
        self.total_bytes_loaded
    }

    pub fn failure(&self) -> Option<&LoadFailure> {
        self.failure.as_ref()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn pending_decode_count(&self) -> usize {
        self.pending_decodes.len()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&AssetRecord> {
        self.records.get(name)
    }

    /// Moves a finished payload out of the table, leaving `Claimed` behind.
    pub fn take_payload(&mut self, name: &str) -> Option<AssetPayload> {
        let record = self.records.get_mut(name)?;
        if !record.payload.is_ready() {
            return None;
        }
        Some(std::mem::replace(&mut record.payload, AssetPayload::Claimed))
    }

    pub fn on_progress(&mut self, listener: impl FnMut(u8) + Send + Sync + 'static) {
        self.listeners.progress.push(Box::new(listener));
    }

    pub fn on_completed(&mut self, listener: impl FnMut(&ResourceTable) + Send + Sync + 'static) {
        self.listeners.completed.push(Box::new(listener));
    }

    pub fn on_error(&mut self, listener: impl FnMut(&LoadFailure) + Send + Sync + 'static) {
        self.listeners.error.push(Box::new(listener));
    }

    fn on_resource_loaded(&mut self, name: String, buffer: Vec<u8>, decoder: &mut dyn DecodeStage) {
        let Some(record) = self.records.get_mut(&name) else {
            warn!(asset = %name, "worker delivered an unregistered asset");
            return;
        };
        record.bytes_loaded = buffer.len() as u64;
        record.byte_size = Some(record.bytes_loaded);
        debug!(asset = %name, bytes = buffer.len(), "asset bytes received");

        if record.descriptor.kind.needs_decode() {
            self.pending_decodes.insert(name.clone());
            let ticket = DecodeTicket {
                session: self.session,
                name,
            };
            decoder.submit(ticket, &record.descriptor, buffer);
        } else {
            record.payload = AssetPayload::Raw(buffer);
        }
    }

    fn record_bytes(&mut self, loaded: u64, total: u64) {
        self.total_bytes_loaded = self.total_bytes_loaded.max(loaded);
        let known = self.total_bytes_known.unwrap_or(0).max(total);
        self.total_bytes_known = Some(known.max(self.total_bytes_loaded));
    }

    fn received_bytes(&self) -> u64 {
        self.records
            .values()
            .filter(|record| record.byte_size.is_some())
            .map(|record| record.bytes_loaded)
            .sum()
    }

    fn release_decodes(&mut self, decoder: &mut dyn DecodeStage) {
        if self.decodes_released
            || !matches!(self.status, LoadStatus::Cancelled | LoadStatus::Error)
        {
            return;
        }
        self.decodes_released = true;
        decoder.discard_session(self.session);
    }

    fn emit_progress(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last_percent.is_some_and(|last| percent <= last) {
            return;
        }
        self.last_percent = Some(percent);
        for listener in &mut self.listeners.progress {
            listener(percent);
        }
    }

    fn check_completion(&mut self) {
        if self.status != LoadStatus::Loading
            || !self.bytes_complete
            || !self.pending_decodes.is_empty()
        {
            return;
        }
        self.emit_progress(100);
        self.status = LoadStatus::Completed;
        info!(session = self.session, assets = self.records.len(), "preload completed");
        for listener in &mut self.listeners.completed {
            listener(&self.records);
        }
    }

    fn fail(&mut self, failure: LoadFailure) {
        if self.status.is_terminal() {
            return;
        }
        warn!(
            session = self.session,
            resource = ?failure.resource,
            kind = ?failure.kind,
            "preload failed: {}",
            failure.message
        );
        self.worker = None;
        self.pending_decodes.clear();
        self.status = LoadStatus::Error;
        for listener in &mut self.listeners.error {
            listener(&failure);
        }
        self.failure = Some(failure);
    }
}
