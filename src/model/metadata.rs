/*!
Defines the table metadata.
The main struct here is [TableMetadata] which defines the data for a table.
*/
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    partition::PartitionSpec,
    schema::Schema,
    snapshot::Snapshot,
};

/// Table property controlling the target size of merged manifests, the
/// bin-packing target of the merge planner.
pub const MANIFEST_TARGET_SIZE_BYTES: &str = "commit.manifest.target-size-bytes";
/// Default manifest target size, 8 MiB.
pub const MANIFEST_TARGET_SIZE_BYTES_DEFAULT: i64 = 8 * 1024 * 1024;

/// Table property for the minimum number of manifests that must accumulate
/// before a bin holding the snapshot's new files is merged.
pub const MANIFEST_MIN_MERGE_COUNT: &str = "commit.manifest.min-count-to-merge";
/// Default minimum number of manifests to merge.
pub const MANIFEST_MIN_MERGE_COUNT_DEFAULT: i64 = 100;

/// Table property for the number of commit retries before giving up.
pub const COMMIT_NUM_RETRIES: &str = "commit.retry.num-retries";
/// Default number of commit retries.
pub const COMMIT_NUM_RETRIES_DEFAULT: i64 = 4;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// Metadata for a table, as stored in the catalog-pointed metadata file.
pub struct TableMetadata {
    /// A UUID that identifies the table
    pub table_uuid: Uuid,
    /// Location tables base location
    pub location: String,
    /// The table's highest sequence number, incremented on every commit.
    pub last_sequence_number: i64,
    /// Timestamp in milliseconds from the unix epoch when the table was last updated.
    pub last_updated_ms: i64,
    /// An integer; the highest assigned column ID for the table.
    pub last_column_id: i32,
    /// A list of schemas, stored as objects with schema-id.
    pub schemas: Vec<Schema>,
    /// ID of the table's current schema.
    pub current_schema_id: i32,
    /// A list of partition specs, stored as full partition spec objects.
    pub partition_specs: Vec<PartitionSpec>,
    /// ID of the "current" spec that writers should use by default.
    pub default_spec_id: i32,
    /// An integer; the highest assigned partition field ID across all partition specs for the table.
    pub last_partition_id: i32,
    /// A string to string map of table properties. This is used to control
    /// settings that affect reading and writing and is not intended to be
    /// used for arbitrary metadata. For example,
    /// commit.retry.num-retries is used to control the number of commit
    /// retries.
    pub properties: Option<HashMap<String, String>>,
    /// long ID of the current table snapshot.
    pub current_snapshot_id: Option<i64>,
    /// A list of valid snapshots. Valid snapshots are snapshots for which
    /// all data files exist in the file system. A data file must not be
    /// deleted from the file system until the last snapshot in which it was
    /// listed is garbage collected.
    pub snapshots: Option<Vec<Snapshot>>,
}

impl TableMetadata {
    /// The current schema of the table.
    pub fn current_schema(&self) -> Result<&Schema> {
        self.schemas
            .iter()
            .find(|schema| schema.schema_id == self.current_schema_id)
            .ok_or_else(|| {
                Error::NotFound("schema".to_owned(), self.current_schema_id.to_string())
            })
    }

    /// Looks a partition spec up by id.
    pub fn spec(&self, spec_id: i32) -> Option<&PartitionSpec> {
        self.partition_specs
            .iter()
            .find(|spec| spec.spec_id == spec_id)
    }

    /// The default partition spec new files are written with.
    pub fn default_spec(&self) -> Result<&PartitionSpec> {
        self.spec(self.default_spec_id).ok_or_else(|| {
            Error::NotFound("partition spec".to_owned(), self.default_spec_id.to_string())
        })
    }

    /// The current snapshot, if the table has one.
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        let current_id = self.current_snapshot_id?;
        self.snapshots
            .as_ref()?
            .iter()
            .find(|snapshot| snapshot.snapshot_id == current_id)
    }

    /// Reads a table property as an integer, falling back to `default` when
    /// the property is absent or malformed.
    pub fn property_as_i64(&self, name: &str, default: i64) -> i64 {
        self.properties
            .as_ref()
            .and_then(|properties| properties.get(name))
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    /// Reads a non-negative table property as a usize, falling back to
    /// `default` when absent, malformed, or negative.
    pub fn property_as_usize(&self, name: &str, default: i64) -> usize {
        usize::try_from(self.property_as_i64(name, default)).unwrap_or(default as usize)
    }

    /// Appends a committed snapshot and makes it current.
    pub fn append_snapshot(&mut self, snapshot: Snapshot, timestamp_ms: i64) {
        self.current_snapshot_id = Some(snapshot.snapshot_id);
        self.last_updated_ms = timestamp_ms;
        self.snapshots.get_or_insert_with(Vec::new).push(snapshot);
    }
}
