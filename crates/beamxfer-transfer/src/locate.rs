//! Presence and age lookups used by safe prunes.

use std::io;

use beamxfer_core::{
    ControllerError, ControllerResult, Endpoint, StorageLocation, TransferBackend,
};
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::warn;

use crate::remote::find_remote_entry;

/// What a lookup found at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Located {
    pub(crate) is_dir: bool,
    pub(crate) modified: Option<DateTime<Utc>>,
}

/// Result of looking for a path on an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lookup {
    Found(Located),
    Missing,
    /// The lookup itself failed; presence is unknown.
    Failed,
}

/// Look for `file_path` on `endpoint`.
///
/// # Errors
///
/// [`ControllerError::InvalidConfiguration`] when the endpoint cannot be inspected from
/// here: archives, or managed collections without a transfer backend.
pub(crate) async fn locate(
    endpoint: &Endpoint,
    file_path: &str,
    transfer: Option<&dyn TransferBackend>,
) -> ControllerResult<Lookup> {
    let path = endpoint.full_path(file_path);
    match endpoint {
        Endpoint::FileSystem(_) => Ok(match fs::symlink_metadata(&path).await {
            Ok(metadata) => Lookup::Found(Located {
                is_dir: metadata.is_dir(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Lookup::Missing,
            Err(err) => {
                warn!(
                    endpoint = endpoint.name(),
                    path = %path,
                    error = %err,
                    "metadata lookup failed"
                );
                Lookup::Failed
            }
        }),
        Endpoint::ManagedTransfer(collection) => {
            let backend = transfer.ok_or_else(|| {
                ControllerError::invalid_configuration(
                    "transfer",
                    "managed transfer backend required to inspect a collection",
                    Some(collection.name.clone()),
                )
            })?;
            Ok(match find_remote_entry(backend, &collection.uuid, &path).await {
                Ok(Some(entry)) => Lookup::Found(Located {
                    is_dir: entry.is_dir(),
                    modified: entry.last_modified,
                }),
                Ok(None) => Lookup::Missing,
                Err(err) => {
                    warn!(
                        endpoint = endpoint.name(),
                        path = %path,
                        error = %err,
                        "remote lookup failed"
                    );
                    Lookup::Failed
                }
            })
        }
        Endpoint::Archive(archive) => Err(ControllerError::invalid_configuration(
            "check_endpoint",
            "archive contents are only inspected by archive jobs",
            Some(archive.name.clone()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamxfer_test_support::{FakeTransferBackend, fixtures};

    #[tokio::test]
    async fn filesystem_lookups_report_kind_and_age() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::create_dir_all(root.path().join("42"))?;
        std::fs::write(root.path().join("42/mice.jpg"), b"x")?;
        let endpoint = fixtures::filesystem_endpoint("local", &root.path().to_string_lossy());

        match locate(&endpoint, "42", None).await? {
            Lookup::Found(found) => {
                assert!(found.is_dir);
                assert!(found.modified.is_some());
            }
            other => panic!("unexpected lookup: {other:?}"),
        }
        assert!(matches!(
            locate(&endpoint, "/42/mice.jpg", None).await?,
            Lookup::Found(Located { is_dir: false, .. })
        ));
        assert_eq!(locate(&endpoint, "42/rats.jpg", None).await?, Lookup::Missing);
        Ok(())
    }

    #[tokio::test]
    async fn managed_lookups_need_a_backend() -> anyhow::Result<()> {
        let endpoint = fixtures::managed_endpoint("spot832", "/data", "ep-1");
        assert!(matches!(
            locate(&endpoint, "42/mice.jpg", None).await,
            Err(ControllerError::InvalidConfiguration { field: "transfer", .. })
        ));

        let backend = FakeTransferBackend::new();
        backend.add_file("ep-1", "/data/42/mice.jpg", 3);
        assert!(matches!(
            locate(&endpoint, "42/mice.jpg", Some(&backend)).await?,
            Lookup::Found(Located { is_dir: false, .. })
        ));
        let missing = locate(&endpoint, "43/mice.jpg", Some(&backend)).await?;
        assert_eq!(missing, Lookup::Missing);
        backend.fail_listings();
        let failed = locate(&endpoint, "42/mice.jpg", Some(&backend)).await?;
        assert_eq!(failed, Lookup::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn archives_are_not_inspected_locally() {
        let endpoint = fixtures::archive_endpoint("hpss_als", "/home/a/alsdev");
        assert!(locate(&endpoint, "x", None).await.is_err());
    }
}
