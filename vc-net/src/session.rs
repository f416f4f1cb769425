use std::collections::HashMap;

use vc_utils::ResourceSpec;

#[derive(Debug)]
struct AssetProgress {
    size: Option<u64>,
    loaded: u64,
    done: bool,
}

/// Byte accounting for one load session. Lives on the worker thread and
/// is dropped with it.
#[derive(Debug)]
pub struct FetchSession {
    specs: Vec<ResourceSpec>,
    assets: HashMap<String, AssetProgress>,
    total_bytes: u64,
    loaded_bytes: u64,
    last_percent: u8,
    finished: usize,
}

impl FetchSession {
    pub fn new(specs: Vec<ResourceSpec>) -> Self {
        let assets = specs
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    AssetProgress {
                        size: None,
                        loaded: 0,
                        done: false,
                    },
                )
            })
            .collect();
        Self {
            specs,
            assets,
            total_bytes: 0,
            loaded_bytes: 0,
            last_percent: 0,
            finished: 0,
        }
    }

    pub fn specs(&self) -> &[ResourceSpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn loaded_bytes(&self) -> u64 {
        self.loaded_bytes
    }

    /// Records the HEAD outcome. A zero length is treated as unknown.
    pub fn set_known_size(&mut self, name: &str, size: Option<u64>) {
        let Some(asset) = self.assets.get_mut(name) else {
            return;
        };
        let size = size.filter(|size| *size > 0);
        if let Some(old) = asset.size.take() {
            self.total_bytes -= old;
        }
        if let Some(size) = size {
            self.total_bytes += size;
        }
        asset.size = size;
    }

    /// Called when a body response arrives. If the asset's size was unknown
    /// and the response carries a length, the total grows and a progress
    /// value is returned that must be reported right away. The value may be
    /// below what was already reported; later chunks only report once they
    /// pass the highest value seen.
    pub fn on_response(&mut self, name: &str, content_length: Option<u64>) -> Option<u8> {
        let asset = self.assets.get_mut(name)?;
        if asset.size.is_some() {
            return None;
        }
        let length = content_length?;
        asset.size = Some(length);
        self.total_bytes += length;
        Some(self.percent())
    }

    /// Adds `len` freshly read bytes. Returns a percent only when it grew
    /// by at least one whole point since the last report.
    pub fn on_chunk(&mut self, name: &str, len: u64) -> Option<u8> {
        let asset = self.assets.get_mut(name)?;
        asset.loaded += len;
        self.loaded_bytes += len;
        let percent = self.percent();
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Marks an asset's body as fully read. Returns true once every asset
    /// of the session has finished.
    pub fn on_finished(&mut self, name: &str) -> bool {
        if let Some(asset) = self.assets.get_mut(name)
            && !asset.done
        {
            asset.done = true;
            self.finished += 1;
        }
        self.all_finished()
    }

    pub fn all_finished(&self) -> bool {
        self.finished == self.specs.len()
    }

    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let percent = self.loaded_bytes.saturating_mul(100) / self.total_bytes;
        percent.min(100) as u8
    }
}
