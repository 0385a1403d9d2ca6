use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use super::{AzureBlobStore, BlobCredential, ConfigurationError, FilesystemStore, SnapshotStore};

const FILE_SCHEME: &str = "file://";
const AZBLOB_SCHEME: &str = "azblob://";

/// The kind of backend a [`CacheSpec`] selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// A local file.
    File,
    /// A blob in an Azure Storage container.
    AzureBlob,
}

impl AsRef<str> for BackendKind {
    fn as_ref(&self) -> &str {
        match self {
            Self::File => "file",
            Self::AzureBlob => "azblob",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Where a snapshot is persisted, with all backend specific parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheLocation {
    /// A local file.
    File {
        /// Path of the snapshot file.
        path: PathBuf,
    },
    /// A blob in an Azure Storage container.
    AzureBlob {
        /// The blob service endpoint of the storage account.
        endpoint: Url,
        /// Name of the container.
        container: String,
        /// Name of the blob, which may contain further `/`.
        blob: String,
    },
}

/// Parameters needed to open a store that are not part of the location string.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Credential for object store backends.
    pub credential: BlobCredential,
    /// Timeout for establishing connections to object store backends.
    pub connect_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            credential: BlobCredential::Anonymous,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A parsed cache location together with the invalidation tag.
///
/// The location string is interpreted as follows:
///
/// - `azblob://<account host>/<container>/<blob>` selects a blob in a storage container,
/// - `file://<path>` selects a local file,
/// - anything else is taken as a local file path as a whole.
///
/// When a tag is given, only snapshots written with exactly this tag are ever restored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSpec {
    raw: String,
    location: CacheLocation,
    tag: Option<String>,
}

impl CacheSpec {
    /// Parses a location string.
    ///
    /// This does not touch the filesystem or the network, a malformed location is rejected
    /// before any snapshot is read or written.
    pub fn parse(raw: &str, tag: Option<String>) -> Result<Self, ConfigurationError> {
        if raw.trim().is_empty() {
            return Err(ConfigurationError::EmptyLocation);
        }

        let location = if let Some(path) = raw.strip_prefix(FILE_SCHEME) {
            parse_file_location(raw, path)?
        } else if raw.starts_with(AZBLOB_SCHEME) {
            parse_azblob_location(raw)?
        } else {
            parse_file_location(raw, raw)?
        };

        Ok(Self {
            raw: raw.to_owned(),
            location,
            tag,
        })
    }

    /// The location as it was configured.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed location.
    pub fn location(&self) -> &CacheLocation {
        &self.location
    }

    /// The kind of backend selected by the location.
    pub fn kind(&self) -> BackendKind {
        match self.location {
            CacheLocation::File { .. } => BackendKind::File,
            CacheLocation::AzureBlob { .. } => BackendKind::AzureBlob,
        }
    }

    /// The invalidation tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Creates the store for this location.
    pub fn open(&self, options: &StoreOptions) -> Result<SnapshotStore, ConfigurationError> {
        let store = match self.location {
            CacheLocation::File { ref path } => FilesystemStore::new(path).into(),
            CacheLocation::AzureBlob {
                ref endpoint,
                ref container,
                ref blob,
            } => AzureBlobStore::new(
                endpoint,
                container,
                blob,
                options.credential.clone(),
                options.connect_timeout,
            )?
            .into(),
        };
        Ok(store)
    }
}

impl fmt::Display for CacheSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses `raw` into a [`CacheSpec`] and opens its store in one go.
pub fn resolve(
    raw: &str,
    tag: Option<String>,
    options: &StoreOptions,
) -> Result<(CacheSpec, SnapshotStore), ConfigurationError> {
    let spec = CacheSpec::parse(raw, tag)?;
    let store = spec.open(options)?;
    tracing::debug!(location = %spec, backend = %spec.kind(), "Resolved snapshot cache");
    Ok((spec, store))
}

fn parse_file_location(raw: &str, path: &str) -> Result<CacheLocation, ConfigurationError> {
    if path.is_empty() {
        return Err(ConfigurationError::malformed(raw, "missing file path"));
    }
    // `Path::file_name` ignores a trailing separator, so `state/` would pass as a file.
    let names_dir = path.ends_with('/') || path.ends_with(std::path::MAIN_SEPARATOR);
    if names_dir || Path::new(path).file_name().is_none() {
        return Err(ConfigurationError::malformed(raw, "path does not name a file"));
    }
    Ok(CacheLocation::File {
        path: PathBuf::from(path),
    })
}

fn parse_azblob_location(raw: &str) -> Result<CacheLocation, ConfigurationError> {
    const EXPECTED: &str = "expected azblob://<storage account host>/<container>/<blob>";

    let url = Url::parse(raw).map_err(|_| ConfigurationError::malformed(raw, EXPECTED))?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ConfigurationError::malformed(raw, "missing storage account host"))?;

    let (container, blob) = url
        .path()
        .trim_start_matches('/')
        .split_once('/')
        .ok_or_else(|| ConfigurationError::malformed(raw, EXPECTED))?;
    if container.is_empty() || blob.is_empty() || blob.ends_with('/') {
        return Err(ConfigurationError::malformed(raw, EXPECTED));
    }

    let endpoint = match url.port() {
        Some(port) => format!("https://{host}:{port}/"),
        None => format!("https://{host}/"),
    };
    let endpoint = Url::parse(&endpoint)
        .map_err(|_| ConfigurationError::malformed(raw, "invalid storage account host"))?;

    Ok(CacheLocation::AzureBlob {
        endpoint,
        container: container.to_owned(),
        blob: blob.to_owned(),
    })
}
