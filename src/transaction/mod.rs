/*!
 * Defines the [Transaction] type that turns staged changes into a
 * committed snapshot with bounded optimistic retries.
*/

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::expr::Predicate;
use crate::model::manifest::DataFile;
use crate::model::manifest_list::ManifestFile;
use crate::model::metadata::{TableMetadata, COMMIT_NUM_RETRIES, COMMIT_NUM_RETRIES_DEFAULT};
use crate::model::snapshot::{
    Operation, Snapshot, Summary, SUMMARY_ADDED_DATA_FILES, SUMMARY_ADDED_RECORDS,
    SUMMARY_DELETED_DATA_FILES,
};
use crate::model::values::StructValue;
use crate::table::Table;

mod filter;
pub mod merge;
mod pack;

use merge::MergingSnapshotProducer;

/// A pending snapshot update on a [Table]. Changes are staged with the
/// builder-style methods, then [commit](Transaction::commit) applies them
/// and swaps the table pointer, retrying against a refreshed base when
/// another committer wins the race.
pub struct Transaction<'table> {
    table: &'table mut Table,
    producer: MergingSnapshotProducer,
}

impl<'table> Transaction<'table> {
    /// Create a transaction for the given table.
    pub(crate) fn new(table: &'table mut Table) -> Self {
        let producer = MergingSnapshotProducer::new(
            table.object_store(),
            table.metadata().location.clone(),
        );
        Transaction { table, producer }
    }

    /// Stages a new data file for the snapshot.
    pub fn append_file(mut self, file: DataFile) -> Self {
        self.producer.add_file(file);
        self
    }

    /// Force-deletes a file by path.
    pub fn delete_file(mut self, path: impl Into<String>) -> Self {
        self.producer.delete_file(path);
        self
    }

    /// Deletes files whose rows match `expression`, extending any
    /// previously staged filter by OR.
    pub fn delete_by_filter(mut self, expression: Predicate) -> Self {
        self.producer.delete_by_filter(expression);
        self
    }

    /// Deletes every file in the given partition.
    pub fn drop_partition(mut self, partition: StructValue) -> Self {
        self.producer.drop_partition(partition);
        self
    }

    /// Makes the commit fail if any file would be deleted.
    pub fn fail_any_delete(mut self) -> Self {
        self.producer.fail_any_delete();
        self
    }

    /// Makes the commit fail unless every explicitly deleted path matches
    /// a file in the base snapshot.
    pub fn fail_missing_delete_paths(mut self) -> Self {
        self.producer.fail_missing_delete_paths();
        self
    }

    /// Applies the staged changes and commits the resulting snapshot,
    /// retrying up to `commit.retry.num-retries` times on conflicts. On
    /// every terminal outcome, files that did not become part of the
    /// committed snapshot are removed.
    pub async fn commit(mut self) -> Result<()> {
        let retries = self
            .table
            .metadata()
            .property_as_i64(COMMIT_NUM_RETRIES, COMMIT_NUM_RETRIES_DEFAULT)
            .max(0) as u32;
        let attempts = retries + 1;
        let operations = self.table.operations();

        for attempt in 0..attempts {
            if attempt > 0 {
                if let Err(error) = self.table.refresh().await {
                    self.abandon().await;
                    return Err(error);
                }
            }
            let base = self.table.metadata().clone();

            let manifests = match self.producer.apply(&base).await {
                Ok(manifests) => manifests,
                Err(error) => {
                    self.abandon().await;
                    return Err(error);
                }
            };

            let snapshot = self.build_snapshot(&base, manifests);
            let committed: HashSet<ManifestFile> = snapshot.manifests.iter().cloned().collect();
            let mut updated = base.clone();
            updated.last_sequence_number += 1;
            let timestamp_ms = snapshot.timestamp_ms;
            updated.append_snapshot(snapshot, timestamp_ms);

            match operations.commit(&base, &updated).await {
                Ok(()) => {
                    if let Err(error) = self.producer.clean_uncommitted(&committed).await {
                        warn!(%error, "failed to clean up after successful commit");
                    }
                    self.table.set_metadata(updated);
                    return Ok(());
                }
                Err(Error::CommitFailed) => {
                    debug!(attempt, "commit conflicted, retrying against new base");
                }
                Err(error) => {
                    self.abandon().await;
                    return Err(error);
                }
            }
        }

        self.abandon().await;
        Err(Error::RetriesExhausted(attempts))
    }

    async fn abandon(&mut self) {
        if let Err(error) = self.producer.clean_uncommitted(&HashSet::new()).await {
            warn!(%error, "failed to clean up abandoned snapshot update");
        }
    }

    fn build_snapshot(&self, base: &TableMetadata, manifests: Vec<ManifestFile>) -> Snapshot {
        let added = self.producer.added_files_count();
        let deleted = self.producer.deleted_files().len();
        let operation = if deleted == 0 {
            Operation::Append
        } else if added == 0 {
            Operation::Delete
        } else {
            Operation::Overwrite
        };
        Snapshot {
            snapshot_id: self.producer.snapshot_id(),
            parent_snapshot_id: base.current_snapshot_id,
            timestamp_ms: Utc::now().timestamp_millis(),
            manifests,
            summary: Summary {
                operation: Some(operation),
                other: HashMap::from([
                    (SUMMARY_ADDED_DATA_FILES.to_owned(), added.to_string()),
                    (SUMMARY_DELETED_DATA_FILES.to_owned(), deleted.to_string()),
                    (
                        SUMMARY_ADDED_RECORDS.to_owned(),
                        self.producer.added_records().to_string(),
                    ),
                ]),
            },
            schema_id: Some(base.current_schema_id),
        }
    }
}
