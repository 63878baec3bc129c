/*!
 * Manifest file handles
*/

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
/// Metadata handle for an on-disk manifest. Summary counters can be used to
/// avoid opening the manifest when planning.
pub struct ManifestFile {
    /// Location of the manifest file
    pub manifest_path: String,
    /// Length of the manifest file in bytes
    pub manifest_length: i64,
    /// ID of the partition spec used to write the manifest; must be listed
    /// in the table metadata partition-specs
    pub partition_spec_id: i32,
    /// ID of the snapshot where the manifest file was added
    pub added_snapshot_id: i64,
    /// Number of entries in the manifest that have status ADDED
    pub added_files_count: Option<i32>,
    /// Number of entries in the manifest that have status EXISTING
    pub existing_files_count: Option<i32>,
    /// Number of entries in the manifest that have status DELETED
    pub deleted_files_count: Option<i32>,
}

/// Manifests are immutable once written, so two handles name the same
/// manifest iff path, length, and spec id agree. Retry-safe caches key on
/// this identity.
impl PartialEq for ManifestFile {
    fn eq(&self, other: &Self) -> bool {
        self.manifest_path == other.manifest_path
            && self.manifest_length == other.manifest_length
            && self.partition_spec_id == other.partition_spec_id
    }
}

impl Eq for ManifestFile {}

impl Hash for ManifestFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.manifest_path.hash(state);
        self.manifest_length.hash(state);
        self.partition_spec_id.hash(state);
    }
}
