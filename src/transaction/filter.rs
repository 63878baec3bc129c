/*!
 * Rewrites manifests to drop files matching the delete criteria.
*/
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use object_store::ObjectStore;
use tracing::warn;

use crate::error::{Error, Result};
use crate::expr::metrics::StrictMetricsEvaluator;
use crate::expr::project::PartitionProjection;
use crate::expr::Predicate;
use crate::model::manifest::{DataFile, Status};
use crate::model::manifest_list::ManifestFile;
use crate::model::metadata::TableMetadata;
use crate::model::values::StructValue;
use crate::table::manifest::{ManifestReader, ManifestWriter};
use crate::transaction::merge::OutputPaths;

/// Applies the delete criteria of one in-flight snapshot update to base
/// manifests. A manifest without matching entries is passed through
/// untouched; otherwise a rewritten copy is produced with matched entries
/// marked [Status::Deleted].
///
/// Instances borrow the update's shared caches and may filter many
/// manifests concurrently: cache values are immutable once inserted, so
/// last-writer-wins races between equivalent results are harmless.
pub(crate) struct ManifestFilter<'update> {
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) metadata: &'update TableMetadata,
    pub(crate) paths: &'update OutputPaths,
    pub(crate) delete_paths: &'update HashSet<String>,
    pub(crate) drop_partitions: &'update HashSet<StructValue>,
    pub(crate) delete_expression: &'update Predicate,
    pub(crate) fail_any_delete: bool,
    pub(crate) evaluator: &'update StrictMetricsEvaluator<'update>,
    pub(crate) projections: &'update Mutex<HashMap<i32, Arc<PartitionProjection>>>,
    pub(crate) filtered_manifests: &'update Mutex<HashMap<ManifestFile, ManifestFile>>,
    pub(crate) filtered_to_deleted: &'update Mutex<HashMap<ManifestFile, HashSet<String>>>,
}

impl ManifestFilter<'_> {
    fn has_delete_criteria(&self) -> bool {
        *self.delete_expression != Predicate::AlwaysFalse
            || !self.delete_paths.is_empty()
            || !self.drop_partitions.is_empty()
    }

    fn projection(&self, spec_id: i32) -> Result<Arc<PartitionProjection>> {
        let mut cache = self.projections.lock().unwrap();
        if let Some(projection) = cache.get(&spec_id) {
            return Ok(projection.clone());
        }
        let spec = self
            .metadata
            .spec(spec_id)
            .ok_or_else(|| Error::NotFound("partition spec".to_owned(), spec_id.to_string()))?;
        let projection = Arc::new(PartitionProjection::new(
            self.delete_expression,
            spec,
            self.metadata.current_schema()?,
        ));
        cache.insert(spec_id, projection.clone());
        Ok(projection)
    }

    /// Whether the file is deleted by path or partition tuple, independent
    /// of the delete expression.
    fn file_delete(&self, file: &DataFile) -> bool {
        self.delete_paths.contains(&file.file_path)
            || self.drop_partitions.contains(&file.partition)
    }

    /// A file may only be dropped whole: by explicit path or partition, by
    /// the strict projection, or when its metrics prove a full-row match.
    fn validate_delete(
        &self,
        file: &DataFile,
        file_delete: bool,
        projection: &PartitionProjection,
    ) -> Result<()> {
        if !(file_delete
            || projection.matches_strict(&file.partition)
            || self.evaluator.eval(file))
        {
            return Err(Error::CannotDeletePartial {
                path: file.file_path.clone(),
                expression: self.delete_expression.to_string(),
            });
        }
        if self.fail_any_delete {
            return Err(Error::DeleteForbidden(file.partition.to_string()));
        }
        Ok(())
    }

    /// Filters one manifest, returning either the input (no matches) or a
    /// rewritten copy. Results are cached by manifest identity so retries
    /// against an unchanged base perform no additional I/O.
    pub(crate) async fn filter_manifest(&self, manifest: &ManifestFile) -> Result<ManifestFile> {
        if let Some(cached) = self.filtered_manifests.lock().unwrap().get(manifest) {
            return Ok(cached.clone());
        }
        if !self.has_delete_criteria() {
            self.filtered_manifests
                .lock()
                .unwrap()
                .insert(manifest.clone(), manifest.clone());
            return Ok(manifest.clone());
        }

        let reader =
            ManifestReader::read(self.object_store.clone(), manifest, self.metadata).await?;
        let projection = self.projection(manifest.partition_spec_id)?;

        // Detect pass: scan until the first entry that has to be rewritten.
        // The rewrite pass re-validates every matched entry, so an error
        // past the break point still surfaces.
        let mut any_deleted = false;
        for entry in reader
            .entries()
            .iter()
            .filter(|entry| entry.status != Status::Deleted)
        {
            let file_delete = self.file_delete(&entry.data_file);
            if file_delete || projection.matches_inclusive(&entry.data_file.partition) {
                self.validate_delete(&entry.data_file, file_delete, &projection)?;
                any_deleted = true;
                break;
            }
        }
        if !any_deleted {
            self.filtered_manifests
                .lock()
                .unwrap()
                .insert(manifest.clone(), manifest.clone());
            return Ok(manifest.clone());
        }

        // Rewrite pass: deletes from prior snapshots are dropped, matched
        // entries become deletes of this snapshot, everything else is
        // carried over as existing.
        let spec = self.metadata.spec(manifest.partition_spec_id).ok_or_else(|| {
            Error::NotFound(
                "partition spec".to_owned(),
                manifest.partition_spec_id.to_string(),
            )
        })?;
        let mut writer = ManifestWriter::new(
            self.paths.next_manifest(),
            self.paths.snapshot_id(),
            spec,
            self.metadata.current_schema()?,
        )?;
        let mut deleted_paths = HashSet::new();
        for entry in reader {
            if entry.status == Status::Deleted {
                continue;
            }
            let file_delete = self.file_delete(&entry.data_file);
            if file_delete || projection.matches_inclusive(&entry.data_file.partition) {
                self.validate_delete(&entry.data_file, file_delete, &projection)?;
                if !deleted_paths.insert(entry.data_file.file_path.clone()) {
                    warn!(
                        path = %entry.data_file.file_path,
                        manifest = %manifest.manifest_path,
                        "duplicate delete of file in manifest"
                    );
                }
                writer.delete(entry.data_file);
            } else {
                writer.add_existing(entry.data_file, entry.snapshot_id);
            }
        }

        let filtered = writer.finish(self.object_store.clone()).await?;
        self.filtered_to_deleted
            .lock()
            .unwrap()
            .insert(filtered.clone(), deleted_paths);
        self.filtered_manifests
            .lock()
            .unwrap()
            .insert(manifest.clone(), filtered.clone());
        Ok(filtered)
    }
}
