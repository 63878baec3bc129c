/*!
Defines the commit seam between the snapshot producer and the catalog.

The producer never swaps the table pointer itself; it hands the updated
metadata to a [TableOperations] implementation, which either performs the
swap atomically or fails with [Error::CommitFailed](crate::Error::CommitFailed)
when the pointer has moved, triggering a retry against the fresh base.
*/

use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::metadata::TableMetadata;
use crate::util::strip_prefix;

/// Operations a table needs from its catalog: reading the current metadata
/// and atomically replacing it.
#[async_trait]
pub trait TableOperations: Send + Sync {
    /// Loads the current table metadata.
    async fn refresh(&self) -> Result<TableMetadata>;

    /// Atomically replaces `base` with `updated`. Fails with
    /// [Error::CommitFailed](crate::Error::CommitFailed) when the current
    /// metadata is no longer `base`.
    async fn commit(&self, base: &TableMetadata, updated: &TableMetadata) -> Result<()>;
}

/// A catalog-less table whose current metadata pointer lives in the object
/// store itself: versioned metadata files plus a version hint, committed
/// with a copy-if-not-exists of a staged temporary file.
pub struct FilesystemCatalog {
    object_store: Arc<dyn ObjectStore>,
    location: String,
}

impl FilesystemCatalog {
    /// Creates a catalog for the table at `location`.
    pub fn new(object_store: Arc<dyn ObjectStore>, location: impl Into<String>) -> Self {
        FilesystemCatalog {
            object_store,
            location: location.into(),
        }
    }

    fn version_hint_path(&self) -> Path {
        format!("{}/metadata/version-hint.text", strip_prefix(&self.location)).into()
    }

    fn metadata_path(&self, version: i64) -> Path {
        format!("{}/metadata/v{}.metadata.json", strip_prefix(&self.location), version).into()
    }

    /// Writes the very first metadata version of a table.
    pub async fn initialize(&self, metadata: &TableMetadata) -> Result<()> {
        self.write_version(metadata).await
    }

    async fn write_version(&self, metadata: &TableMetadata) -> Result<()> {
        let version = metadata.last_sequence_number;
        let metadata_json = serde_json::to_string(metadata)?;
        let temp_path: Path = format!(
            "{}/metadata/{}.metadata.json",
            strip_prefix(&self.location),
            Uuid::new_v4()
        )
        .into();
        let final_path = self.metadata_path(version);
        self.object_store
            .put(&temp_path, metadata_json.into_bytes().into())
            .await?;
        let result = self
            .object_store
            .copy_if_not_exists(&temp_path, &final_path)
            .await;
        self.object_store.delete(&temp_path).await?;
        match result {
            Ok(()) => {
                self.object_store
                    .put(&self.version_hint_path(), version.to_string().into_bytes().into())
                    .await?;
                debug!(version, "committed table metadata");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => Err(Error::CommitFailed),
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait]
impl TableOperations for FilesystemCatalog {
    async fn refresh(&self) -> Result<TableMetadata> {
        let hint: Vec<u8> = self
            .object_store
            .get(&self.version_hint_path())
            .await?
            .bytes()
            .await?
            .into();
        let version: i64 = String::from_utf8(hint)
            .ok()
            .and_then(|hint| hint.trim().parse().ok())
            .ok_or_else(|| Error::NotFound("version hint".to_owned(), self.location.clone()))?;
        let bytes: Vec<u8> = self
            .object_store
            .get(&self.metadata_path(version))
            .await?
            .bytes()
            .await?
            .into();
        serde_json::from_slice(&bytes).map_err(Into::into)
    }

    async fn commit(&self, base: &TableMetadata, updated: &TableMetadata) -> Result<()> {
        // The new version file is claimed with copy-if-not-exists, so a
        // concurrent committer of the same version loses the race cleanly.
        if updated.last_sequence_number != base.last_sequence_number + 1 {
            return Err(Error::CommitFailed);
        }
        self.write_version(updated).await
    }
}
