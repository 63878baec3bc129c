/*!
Details of snapshots of a table.

A [Snapshot] carries the ordered list of [ManifestFile]s that defines the
complete set of live data files at one point in time, together with
supporting data for inspection and garbage collection.
*/
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::manifest_list::ManifestFile;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
/// The type of operations included in the snapshot, this allows
/// certain snapshots to be skipped during operation.
pub enum Operation {
    /// Only data files were added and no files were removed.
    Append,
    /// Data files were added and removed without changing table data;
    /// i.e., compaction or relocating data files.
    Replace,
    /// Data files were added and removed in a logical overwrite operation.
    Overwrite,
    /// Data files were removed and their contents logically deleted.
    Delete,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
/// Summarises the changes in the snapshot.
pub struct Summary {
    /// The type of operation in the snapshot
    pub operation: Option<Operation>,
    /// Other summary data.
    #[serde(flatten)]
    pub other: HashMap<String, String>,
}

/// Summary key for the number of files added by a snapshot.
pub const SUMMARY_ADDED_DATA_FILES: &str = "added-data-files";
/// Summary key for the number of files deleted by a snapshot.
pub const SUMMARY_DELETED_DATA_FILES: &str = "deleted-data-files";
/// Summary key for the number of records added by a snapshot.
pub const SUMMARY_ADDED_RECORDS: &str = "added-records";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// A point-in-time state of the table.
pub struct Snapshot {
    /// A unique long ID
    pub snapshot_id: i64,
    /// The snapshot ID of the snapshot's parent.
    /// Omitted for any snapshot with no parent
    pub parent_snapshot_id: Option<i64>,
    /// A timestamp when the snapshot was created, used for garbage
    /// collection and table inspection
    pub timestamp_ms: i64,
    /// The manifests that make up the snapshot. The order is significant
    /// and preserved across manifest merges: manifests of higher partition
    /// spec ids precede lower ones, and within a spec the manifest carrying
    /// the snapshot's new files precedes the filtered originals.
    pub manifests: Vec<ManifestFile>,
    /// A string map that summarizes the snapshot changes, including operation.
    pub summary: Summary,
    /// ID of the table's current schema when the snapshot was created.
    pub schema_id: Option<i32>,
}

/// Generates a pseudo random snapshot id.
pub fn generate_snapshot_id() -> i64 {
    let mut bytes = [0u8; 8];
    // The os entropy source doesn't fail on supported platforms.
    getrandom::getrandom(&mut bytes).unwrap_or_default();
    i64::from_le_bytes(bytes) & i64::MAX
}
