//! Messages exchanged between the render thread and the asset fetch worker.
//!
//! Both directions are closed enums and every receiver matches them
//! exhaustively; there is no "unknown message" path.

use crate::asset::{AssetDescriptor, AssetKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: String,
    pub url: String,
    pub kind: AssetKind,
}

impl From<&AssetDescriptor> for ResourceSpec {
    fn from(desc: &AssetDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
            url: desc.url.clone(),
            kind: desc.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToFetchMessage {
    /// Registers the session's resources. The worker answers with
    /// [`FromFetchMessage::SizeReady`] once every HEAD request settled.
    Init { resources: Vec<ResourceSpec> },
    /// Starts streaming bodies. Only valid after `SizeReady` was received.
    StartLoad,
    Cancel,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FromFetchMessage {
    /// Sum of every size known after the HEAD phase; assets whose size is
    /// unknown contribute nothing until their GET reports a length.
    SizeReady { total_bytes: u64 },
    /// Byte counters are the session totals at the time of the report;
    /// `total_bytes` only grows when a late size becomes known.
    Progress {
        percent: u8,
        loaded_bytes: u64,
        total_bytes: u64,
    },
    /// The buffer is moved to the receiver; the worker keeps no copy.
    ResourceLoaded { name: String, buffer: Vec<u8> },
    AllCompleted,
    Error {
        message: String,
        resource: Option<String>,
    },
}

impl FromFetchMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AllCompleted | Self::Error { .. })
    }
}
