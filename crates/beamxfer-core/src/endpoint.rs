//! Storage endpoint value types.
//!
//! # Design
//! - Endpoints are immutable values resolved once from configuration.
//! - Relative paths are always endpoint-relative: one leading `/` is dropped before joining.
//! - `..` segments are passed through untouched; callers own path hygiene.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EndpointError, EndpointResult};

/// Join an endpoint root with an endpoint-relative path.
///
/// A single leading separator on `relative` is removed so `/a/b` and `a/b` resolve to the
/// same location.
#[must_use]
pub fn join_endpoint_path(root_path: &str, relative: &str) -> String {
    let relative = relative.strip_prefix('/').unwrap_or(relative);
    let root = root_path.trim_end_matches('/');
    format!("{root}/{relative}")
}

/// Capability shared by every endpoint variant.
pub trait StorageLocation {
    /// Human-readable endpoint name.
    fn name(&self) -> &str;

    /// Absolute path prefix on the storage system.
    fn root_path(&self) -> &str;

    /// Absolute path for an endpoint-relative path.
    fn full_path(&self, relative: &str) -> String {
        join_endpoint_path(self.root_path(), relative)
    }
}

/// Local or mounted filesystem location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemEndpoint {
    /// Endpoint name.
    pub name: String,
    /// Absolute root path on the local host.
    pub root_path: String,
}

impl FileSystemEndpoint {
    /// Construct a filesystem endpoint.
    #[must_use]
    pub fn new(name: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_path: root_path.into(),
        }
    }
}

/// Collection reachable through the managed transfer service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedTransferEndpoint {
    /// Endpoint name.
    pub name: String,
    /// Absolute root path inside the collection.
    pub root_path: String,
    /// Stable collection identifier.
    pub uuid: String,
    /// Host URI of the collection.
    pub uri: String,
}

impl ManagedTransferEndpoint {
    /// Construct a managed collection endpoint.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        root_path: impl Into<String>,
        uuid: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            root_path: root_path.into(),
            uuid: uuid.into(),
            uri: uri.into(),
        }
    }
}

/// Tape-backed archive location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEndpoint {
    /// Endpoint name.
    pub name: String,
    /// Absolute root path inside the archive namespace.
    pub root_path: String,
}

impl ArchiveEndpoint {
    /// Construct an archive endpoint.
    #[must_use]
    pub fn new(name: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_path: root_path.into(),
        }
    }
}

macro_rules! storage_location {
    ($($ty:ty),+) => {
        $(impl StorageLocation for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn root_path(&self) -> &str {
                &self.root_path
            }
        })+
    };
}

storage_location!(FileSystemEndpoint, ManagedTransferEndpoint, ArchiveEndpoint);

/// Discriminant for [`Endpoint`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Local filesystem.
    FileSystem,
    /// Managed transfer collection.
    ManagedTransfer,
    /// Tape archive.
    Archive,
}

impl EndpointKind {
    /// Stable identifier used in serialized endpoint maps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileSystem => "file_system",
            Self::ManagedTransfer => "managed_transfer",
            Self::Archive => "archive",
        }
    }
}

/// Any storage endpoint known to the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Local filesystem endpoint.
    FileSystem(FileSystemEndpoint),
    /// Managed transfer collection.
    ManagedTransfer(ManagedTransferEndpoint),
    /// Tape archive endpoint.
    Archive(ArchiveEndpoint),
}

impl Endpoint {
    /// Variant discriminant.
    #[must_use]
    pub const fn kind(&self) -> EndpointKind {
        match self {
            Self::FileSystem(_) => EndpointKind::FileSystem,
            Self::ManagedTransfer(_) => EndpointKind::ManagedTransfer,
            Self::Archive(_) => EndpointKind::Archive,
        }
    }

    /// Stable collection identifier, present only for managed collections.
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        match self {
            Self::ManagedTransfer(endpoint) => Some(&endpoint.uuid),
            Self::FileSystem(_) | Self::Archive(_) => None,
        }
    }

    /// Collection URI, present only for managed collections.
    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::ManagedTransfer(endpoint) => Some(&endpoint.uri),
            Self::FileSystem(_) | Self::Archive(_) => None,
        }
    }

    /// Serialize into a plain JSON mapping suitable for task parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_map(&self) -> EndpointResult<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(EndpointError::NotAMapping),
            Err(source) => Err(EndpointError::Encode { source }),
        }
    }

    /// Rebuild an endpoint from a mapping produced by [`Endpoint::to_map`].
    ///
    /// # Errors
    ///
    /// Returns an error when the mapping is missing fields or names an unknown kind.
    pub fn from_map(map: Map<String, Value>) -> EndpointResult<Self> {
        serde_json::from_value(Value::Object(map)).map_err(|source| EndpointError::Decode { source })
    }

    fn location(&self) -> &dyn StorageLocation {
        match self {
            Self::FileSystem(endpoint) => endpoint,
            Self::ManagedTransfer(endpoint) => endpoint,
            Self::Archive(endpoint) => endpoint,
        }
    }
}

impl StorageLocation for Endpoint {
    fn name(&self) -> &str {
        self.location().name()
    }

    fn root_path(&self) -> &str {
        self.location().root_path()
    }
}

impl From<FileSystemEndpoint> for Endpoint {
    fn from(endpoint: FileSystemEndpoint) -> Self {
        Self::FileSystem(endpoint)
    }
}

impl From<ManagedTransferEndpoint> for Endpoint {
    fn from(endpoint: ManagedTransferEndpoint) -> Self {
        Self::ManagedTransfer(endpoint)
    }
}

impl From<ArchiveEndpoint> for Endpoint {
    fn from(endpoint: ArchiveEndpoint) -> Self {
        Self::Archive(endpoint)
    }
}
