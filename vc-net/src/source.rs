use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_LENGTH;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed reading {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// A response body being streamed. `content_length` is whatever the
/// response headers claimed, if anything.
pub struct AssetStream {
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

/// Where asset bytes come from. Implementations are shared between the
/// worker thread and its per-asset body threads.
pub trait AssetSource: Send + Sync + 'static {
    /// Best-effort size probe. `Ok(None)` means the size is unknown.
    fn head(&self, url: &str) -> Result<Option<u64>, FetchError>;
    fn get(&self, url: &str) -> Result<AssetStream, FetchError>;
}

pub struct HttpAssetSource {
    client: Client,
}

impl HttpAssetSource {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .build()
            .map_err(|source| FetchError::Transport {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }
}

impl AssetSource for HttpAssetSource {
    fn head(&self, url: &str) -> Result<Option<u64>, FetchError> {
        let resp = self
            .client
            .head(url)
            .send()
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        // HEAD bodies are empty, so the header has to be read directly.
        Ok(resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok()))
    }

    fn get(&self, url: &str) -> Result<AssetStream, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(AssetStream {
            content_length: resp.content_length(),
            reader: Box::new(resp),
        })
    }
}

/// Serves `file://` URLs and plain paths relative to an assets root.
pub struct FileAssetSource {
    root: PathBuf,
}

impl FileAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        if let Some(stripped) = url.strip_prefix("file://") {
            return PathBuf::from(stripped);
        }
        let path = Path::new(url);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl AssetSource for FileAssetSource {
    fn head(&self, url: &str) -> Result<Option<u64>, FetchError> {
        let meta = std::fs::metadata(self.resolve(url)).map_err(|source| FetchError::Io {
            url: url.to_string(),
            source,
        })?;
        Ok(Some(meta.len()))
    }

    fn get(&self, url: &str) -> Result<AssetStream, FetchError> {
        let file = File::open(self.resolve(url)).map_err(|source| FetchError::Io {
            url: url.to_string(),
            source,
        })?;
        let content_length = file.metadata().ok().map(|meta| meta.len());
        Ok(AssetStream {
            content_length,
            reader: Box::new(file),
        })
    }
}

/// Sends `http(s)://` URLs over the network and everything else to disk.
pub struct DefaultAssetSource {
    http: HttpAssetSource,
    files: FileAssetSource,
}

impl DefaultAssetSource {
    pub fn new(assets_root: impl Into<PathBuf>) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpAssetSource::new()?,
            files: FileAssetSource::new(assets_root),
        })
    }

    pub fn shared(assets_root: impl Into<PathBuf>) -> Result<Arc<dyn AssetSource>, FetchError> {
        Ok(Arc::new(Self::new(assets_root)?))
    }

    fn is_remote(url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }
}

impl AssetSource for DefaultAssetSource {
    fn head(&self, url: &str) -> Result<Option<u64>, FetchError> {
        if Self::is_remote(url) {
            self.http.head(url)
        } else {
            self.files.head(url)
        }
    }

    fn get(&self, url: &str) -> Result<AssetStream, FetchError> {
        if Self::is_remote(url) {
            self.http.get(url)
        } else {
            self.files.get(url)
        }
    }
}
