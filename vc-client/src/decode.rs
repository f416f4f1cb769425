use std::path::{Path, PathBuf};

use bevy::asset::io::memory::{Dir, MemoryAssetReader};
use bevy::asset::io::AssetSourceBuilder;
use bevy::asset::{AssetApp, LoadState, RecursiveDependencyLoadState};
use bevy::gltf::Gltf;
use bevy::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};
use vc_avatar::rig::ClipInfo;
use vc_avatar::{HumanoidRig, RigParseError};
use vc_utils::{AssetDescriptor, AssetKind};

/// Asset source id under which fetched model bytes are handed to the glTF
/// loader.
pub const MEMORY_SOURCE: &str = "memory";

/// Identifies one decode request. `session` ties it to the preloader run
/// that submitted it so late results from a cancelled run can be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodeTicket {
    pub session: u64,
    pub name: String,
}

#[derive(Debug)]
pub enum DecodedAsset {
    Humanoid {
        rig: HumanoidRig,
        gltf: Handle<Gltf>,
    },
    Animation {
        clips: Vec<ClipInfo>,
        gltf: Handle<Gltf>,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {name}: {source}")]
    Rig {
        name: String,
        #[source]
        source: RigParseError,
    },
    #[error("{name} failed to load: {message}")]
    Loader { name: String, message: String },
    #[error("{0} assets have no decode stage")]
    Unsupported(AssetKind),
}

#[derive(Debug)]
pub struct DecodeOutcome {
    pub ticket: DecodeTicket,
    pub result: Result<DecodedAsset, DecodeError>,
}

/// Second load stage for formats that need parsing on the render thread.
/// `submit` hands bytes over; `poll` returns whatever finished since the
/// last call, in any order.
pub trait DecodeStage {
    fn submit(&mut self, ticket: DecodeTicket, descriptor: &AssetDescriptor, bytes: Vec<u8>);
    fn poll(&mut self) -> Vec<DecodeOutcome>;
    /// Drops every in-flight and finished-but-unpolled job of `session`.
    fn discard_session(&mut self, session: u64);
}

enum DecodeMeta {
    Humanoid(HumanoidRig),
    Animation(Vec<ClipInfo>),
}

struct InFlight {
    ticket: DecodeTicket,
    path: PathBuf,
    handle: Handle<Gltf>,
    meta: DecodeMeta,
}

/// Decodes humanoid and animation files with Bevy's glTF loader. Bytes are
/// written into an in-memory asset directory and loaded back through the
/// `memory://` source.
#[derive(Resource)]
pub struct GltfDecodeStage {
    dir: Dir,
    server: AssetServer,
    in_flight: Vec<InFlight>,
    ready: Vec<DecodeOutcome>,
}

impl GltfDecodeStage {
    pub fn new(dir: Dir, server: AssetServer) -> Self {
        Self {
            dir,
            server,
            in_flight: Vec::new(),
            ready: Vec::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl DecodeStage for GltfDecodeStage {
    fn submit(&mut self, ticket: DecodeTicket, descriptor: &AssetDescriptor, bytes: Vec<u8>) {
        let meta = match descriptor.kind {
            AssetKind::Humanoid => HumanoidRig::from_gltf_bytes(&bytes).map(DecodeMeta::Humanoid),
            AssetKind::Animation => {
                HumanoidRig::clips_from_gltf_bytes(&bytes).map(DecodeMeta::Animation)
            }
            other => {
                self.ready.push(DecodeOutcome {
                    ticket,
                    result: Err(DecodeError::Unsupported(other)),
                });
                return;
            }
        };
        let meta = match meta {
            Ok(meta) => meta,
            Err(source) => {
                let name = ticket.name.clone();
                self.ready.push(DecodeOutcome {
                    ticket,
                    result: Err(DecodeError::Rig { name, source }),
                });
                return;
            }
        };

        let ext = if bytes.starts_with(b"glTF") { "glb" } else { "gltf" };
        let relative = format!("{}/{}.{ext}", ticket.session, ticket.name);
        self.dir.insert_asset(Path::new(&relative), bytes);
        let handle = self
            .server
            .load::<Gltf>(format!("{MEMORY_SOURCE}://{relative}"));
        debug!(asset = %ticket.name, path = %relative, "glTF decode submitted");
        self.in_flight.push(InFlight {
            ticket,
            path: PathBuf::from(relative),
            handle,
            meta,
        });
    }

    fn poll(&mut self) -> Vec<DecodeOutcome> {
        let mut finished = std::mem::take(&mut self.ready);
        let mut pending = Vec::with_capacity(self.in_flight.len());

        for job in self.in_flight.drain(..) {
            let Some((load, _, recursive)) = self.server.get_load_states(&job.handle) else {
                pending.push(job);
                continue;
            };
            let failure = match (&load, &recursive) {
                (LoadState::Failed(err), _) => Some(err.to_string()),
                (_, RecursiveDependencyLoadState::Failed(err)) => Some(err.to_string()),
                _ => None,
            };
            if let Some(message) = failure {
                warn!(asset = %job.ticket.name, %message, "glTF decode failed");
                let name = job.ticket.name.clone();
                finished.push(DecodeOutcome {
                    ticket: job.ticket,
                    result: Err(DecodeError::Loader { name, message }),
                });
                continue;
            }
            if !matches!(
                (load, recursive),
                (LoadState::Loaded, RecursiveDependencyLoadState::Loaded)
            ) {
                pending.push(job);
                continue;
            }

            let asset = match job.meta {
                DecodeMeta::Humanoid(rig) => DecodedAsset::Humanoid {
                    rig,
                    gltf: job.handle,
                },
                DecodeMeta::Animation(clips) => DecodedAsset::Animation {
                    clips,
                    gltf: job.handle,
                },
            };
            debug!(asset = %job.ticket.name, "glTF decode finished");
            finished.push(DecodeOutcome {
                ticket: job.ticket,
                result: Ok(asset),
            });
        }

        self.in_flight = pending;
        finished
    }

    fn discard_session(&mut self, session: u64) {
        let before = self.in_flight.len() + self.ready.len();
        self.ready.retain(|outcome| outcome.ticket.session != session);
        let dir = &self.dir;
        self.in_flight.retain(|job| {
            if job.ticket.session != session {
                return true;
            }
            dir.remove_asset(&job.path);
            false
        });
        let dropped = before - self.in_flight.len() - self.ready.len();
        if dropped > 0 {
            debug!(session, dropped, "decode jobs discarded");
        }
    }
}

/// In-memory directory backing [`MEMORY_SOURCE`].
#[derive(Resource, Clone)]
pub struct MemoryAssetDir(pub Dir);

/// Registers the `memory://` asset source. Must be added before
/// `DefaultPlugins` so the asset server sees it.
#[derive(Default)]
pub struct MemoryAssetsPlugin {
    dir: Dir,
}

impl Plugin for MemoryAssetsPlugin {
    fn build(&self, app: &mut App) {
        let reader_dir = self.dir.clone();
        app.register_asset_source(
            MEMORY_SOURCE,
            AssetSourceBuilder::default().with_reader(move || {
                Box::new(MemoryAssetReader {
                    root: reader_dir.clone(),
                })
            }),
        )
        .insert_resource(MemoryAssetDir(self.dir.clone()));
    }
}

pub fn init_decode_stage(
    mut commands: Commands,
    dir: Res<MemoryAssetDir>,
    server: Res<AssetServer>,
) {
    commands.insert_resource(GltfDecodeStage::new(dir.0.clone(), server.clone()));
}
