//! Controller selectors used by the transfer and prune factories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// How a file moves between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    /// Recursive copy between mounted paths.
    LocalCopy,
    /// Managed transfer service task.
    ManagedTransfer,
    /// Restore from tape archive to a filesystem.
    #[serde(rename = "archive_to_filesystem")]
    ArchiveToFileSystem,
    /// Store from a filesystem into the tape archive.
    #[serde(rename = "filesystem_to_archive")]
    FileSystemToArchive,
}

impl TransferMethod {
    /// Every method, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::LocalCopy,
        Self::ManagedTransfer,
        Self::ArchiveToFileSystem,
        Self::FileSystemToArchive,
    ];

    /// Stable identifier used in configuration and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalCopy => "local_copy",
            Self::ManagedTransfer => "managed_transfer",
            Self::ArchiveToFileSystem => "archive_to_filesystem",
            Self::FileSystemToArchive => "filesystem_to_archive",
        }
    }
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferMethod {
    type Err = ControllerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                ControllerError::invalid_configuration(
                    "transfer_method",
                    "unrecognized transfer method",
                    Some(value.to_string()),
                )
            })
    }
}

/// Which backend deletes a pruned path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneMethod {
    /// Delete from a mounted filesystem.
    #[serde(rename = "filesystem")]
    FileSystem,
    /// Delete through the managed transfer service.
    ManagedTransfer,
    /// Delete from the tape archive via a batch job.
    Archive,
}

impl PruneMethod {
    /// Every method, in declaration order.
    pub const ALL: [Self; 3] = [Self::FileSystem, Self::ManagedTransfer, Self::Archive];

    /// Stable identifier used in configuration, deployments and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileSystem => "filesystem",
            Self::ManagedTransfer => "managed_transfer",
            Self::Archive => "archive",
        }
    }

    /// Deployment name of the deferred prune flow for this method.
    #[must_use]
    pub fn deployment_name(self) -> String {
        format!("prune_{0}/prune_{0}", self.as_str())
    }
}

impl fmt::Display for PruneMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PruneMethod {
    type Err = ControllerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                ControllerError::invalid_configuration(
                    "prune_method",
                    "unrecognized prune method",
                    Some(value.to_string()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_methods_parse_from_their_identifiers() -> anyhow::Result<()> {
        for method in TransferMethod::ALL {
            assert_eq!(method.as_str().parse::<TransferMethod>()?, method);
        }
        assert_eq!(
            " LOCAL_COPY ".parse::<TransferMethod>()?,
            TransferMethod::LocalCopy
        );
        Ok(())
    }

    #[test]
    fn unknown_methods_are_invalid_configuration() {
        assert!(matches!(
            "rsync".parse::<TransferMethod>(),
            Err(ControllerError::InvalidConfiguration {
                field: "transfer_method",
                ..
            })
        ));
        assert!(matches!(
            "shred".parse::<PruneMethod>(),
            Err(ControllerError::InvalidConfiguration {
                field: "prune_method",
                ..
            })
        ));
    }

    #[test]
    fn prune_deployment_names_follow_method() {
        assert_eq!(
            PruneMethod::ManagedTransfer.deployment_name(),
            "prune_managed_transfer/prune_managed_transfer"
        );
        assert_eq!(PruneMethod::Archive.to_string(), "archive");
    }
}
