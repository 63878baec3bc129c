/*!
Defines the [Table] struct that represents a table.
*/

use std::sync::Arc;

use object_store::ObjectStore;

use crate::catalog::TableOperations;
use crate::error::Result;
use crate::model::metadata::TableMetadata;
use crate::transaction::Transaction;

pub mod manifest;

/// A handle to a table: its current metadata, the object store holding its
/// files, and the catalog operations used to commit new snapshots.
pub struct Table {
    metadata: TableMetadata,
    object_store: Arc<dyn ObjectStore>,
    operations: Arc<dyn TableOperations>,
}

impl Table {
    /// Creates a table handle from already-loaded metadata.
    pub fn new(
        metadata: TableMetadata,
        object_store: Arc<dyn ObjectStore>,
        operations: Arc<dyn TableOperations>,
    ) -> Self {
        Table {
            metadata,
            object_store,
            operations,
        }
    }

    /// Loads the current table state through the catalog.
    pub async fn load(
        object_store: Arc<dyn ObjectStore>,
        operations: Arc<dyn TableOperations>,
    ) -> Result<Self> {
        let metadata = operations.refresh().await?;
        Ok(Table::new(metadata, object_store, operations))
    }

    /// The current table metadata.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// The object store holding the table's data and metadata files.
    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.object_store.clone()
    }

    pub(crate) fn operations(&self) -> Arc<dyn TableOperations> {
        self.operations.clone()
    }

    pub(crate) fn set_metadata(&mut self, metadata: TableMetadata) {
        self.metadata = metadata;
    }

    /// Reloads the table metadata from the catalog.
    pub async fn refresh(&mut self) -> Result<()> {
        self.metadata = self.operations.refresh().await?;
        Ok(())
    }

    /// Starts a snapshot update against the current table state.
    pub fn new_transaction(&mut self) -> Transaction {
        Transaction::new(self)
    }
}
