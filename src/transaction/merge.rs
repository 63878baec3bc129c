/*!
Produces the manifest list of a new snapshot by merging staged files and
delete criteria with the manifests of a base snapshot.

[MergingSnapshotProducer] is the update object of an in-flight snapshot:
it accumulates new files and delete criteria, and [apply](MergingSnapshotProducer::apply)
turns them plus a base into the ordered manifest list for the snapshot.
Applying is functional in the base except for cache reuse and the files it
writes, so the same update can be re-applied against a moved base after a
commit conflict without redoing filter or merge I/O, and
[clean_uncommitted](MergingSnapshotProducer::clean_uncommitted) removes
every output that did not make it into the committed snapshot.
*/
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{stream, StreamExt};
use itertools::Itertools;
use object_store::ObjectStore;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::expr::metrics::StrictMetricsEvaluator;
use crate::expr::project::PartitionProjection;
use crate::expr::Predicate;
use crate::model::manifest::{DataFile, Status};
use crate::model::manifest_list::ManifestFile;
use crate::model::metadata::{
    TableMetadata, MANIFEST_MIN_MERGE_COUNT, MANIFEST_MIN_MERGE_COUNT_DEFAULT,
    MANIFEST_TARGET_SIZE_BYTES, MANIFEST_TARGET_SIZE_BYTES_DEFAULT,
};
use crate::model::snapshot::generate_snapshot_id;
use crate::model::values::StructValue;
use crate::table::manifest::{ManifestReader, ManifestWriter};
use crate::transaction::filter::ManifestFilter;
use crate::transaction::pack::pack_end;
use crate::util::strip_prefix;

/// Default number of manifests filtered or merged concurrently when no
/// worker pool width is injected.
const DEFAULT_CONCURRENCY: usize = 8;

/// Allocates unique output manifest locations for one snapshot update.
pub(crate) struct OutputPaths {
    location: String,
    snapshot_id: i64,
    counter: AtomicUsize,
}

impl OutputPaths {
    fn new(location: String, snapshot_id: i64) -> Self {
        OutputPaths {
            location,
            snapshot_id,
            counter: AtomicUsize::new(0),
        }
    }

    pub(crate) fn snapshot_id(&self) -> i64 {
        self.snapshot_id
    }

    /// The next output location, derived from the snapshot id and an
    /// atomically incremented counter.
    pub(crate) fn next_manifest(&self) -> String {
        format!(
            "{}/metadata/{}-m{}.avro",
            self.location,
            self.snapshot_id,
            self.counter.fetch_add(1, Ordering::SeqCst)
        )
    }
}

/// An in-flight snapshot update combining staged new files with deletes by
/// path, partition tuple, or row predicate.
pub struct MergingSnapshotProducer {
    object_store: Arc<dyn ObjectStore>,
    paths: OutputPaths,
    concurrency: usize,
    new_files: Vec<DataFile>,
    delete_paths: HashSet<String>,
    drop_partitions: HashSet<StructValue>,
    delete_expression: Predicate,
    fail_any_delete: bool,
    fail_missing_delete_paths: bool,
    filter_updated: bool,
    has_new_files: bool,
    new_manifest: Option<ManifestFile>,
    deleted_files: HashSet<String>,
    projections: Mutex<HashMap<i32, Arc<PartitionProjection>>>,
    filtered_manifests: Mutex<HashMap<ManifestFile, ManifestFile>>,
    filtered_to_deleted: Mutex<HashMap<ManifestFile, HashSet<String>>>,
    merge_manifests: Mutex<HashMap<Vec<ManifestFile>, ManifestFile>>,
}

impl MergingSnapshotProducer {
    /// Creates an update for the table at `location` with the default
    /// worker pool width.
    pub fn new(object_store: Arc<dyn ObjectStore>, location: impl Into<String>) -> Self {
        Self::with_concurrency(object_store, location, DEFAULT_CONCURRENCY)
    }

    /// Creates an update that runs at most `concurrency` filter or merge
    /// tasks at a time.
    pub fn with_concurrency(
        object_store: Arc<dyn ObjectStore>,
        location: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        MergingSnapshotProducer {
            object_store,
            paths: OutputPaths::new(location.into(), generate_snapshot_id()),
            concurrency: concurrency.max(1),
            new_files: Vec::new(),
            delete_paths: HashSet::new(),
            drop_partitions: HashSet::new(),
            delete_expression: Predicate::AlwaysFalse,
            fail_any_delete: false,
            fail_missing_delete_paths: false,
            filter_updated: false,
            has_new_files: false,
            new_manifest: None,
            deleted_files: HashSet::new(),
            projections: Mutex::new(HashMap::new()),
            filtered_manifests: Mutex::new(HashMap::new()),
            filtered_to_deleted: Mutex::new(HashMap::new()),
            merge_manifests: Mutex::new(HashMap::new()),
        }
    }

    /// The id of the snapshot this update will produce.
    pub fn snapshot_id(&self) -> i64 {
        self.paths.snapshot_id()
    }

    /// Stages a new data file.
    pub fn add_file(&mut self, file: DataFile) {
        self.new_files.push(file);
        self.has_new_files = true;
    }

    /// Force-deletes a file by path.
    pub fn delete_file(&mut self, path: impl Into<String>) {
        self.delete_paths.insert(path.into());
        self.filter_updated = true;
    }

    /// Deletes every file whose partition tuple equals `partition`.
    pub fn drop_partition(&mut self, partition: StructValue) {
        self.drop_partitions.insert(partition);
        self.filter_updated = true;
    }

    /// Deletes files whose rows match `expression`, extending any
    /// previously given filter by OR.
    pub fn delete_by_filter(&mut self, expression: Predicate) {
        let current = std::mem::replace(&mut self.delete_expression, Predicate::AlwaysFalse);
        self.delete_expression = current.or(expression);
        self.filter_updated = true;
    }

    /// Makes the update fail if any file would be deleted.
    pub fn fail_any_delete(&mut self) {
        self.fail_any_delete = true;
    }

    /// Makes the update fail unless every path given to
    /// [delete_file](Self::delete_file) matches a file that is actually
    /// deleted.
    pub fn fail_missing_delete_paths(&mut self) {
        self.fail_missing_delete_paths = true;
    }

    /// Number of files staged by this update.
    pub fn added_files_count(&self) -> usize {
        self.new_files.len()
    }

    /// Total records across the staged files.
    pub fn added_records(&self) -> i64 {
        self.new_files.iter().map(|file| file.record_count).sum()
    }

    /// Paths deleted by the most recent [apply](Self::apply).
    pub fn deleted_files(&self) -> &HashSet<String> {
        &self.deleted_files
    }

    /// Produces the ordered manifest list of the new snapshot against
    /// `base`. May be called once per commit attempt; unchanged inputs hit
    /// the filter and merge caches and perform no I/O.
    pub async fn apply(&mut self, base: &TableMetadata) -> Result<Vec<ManifestFile>> {
        // Delete criteria changed since the last apply: every cached filter
        // result is stale.
        if self.filter_updated {
            self.clean_uncommitted_filters(&HashSet::new()).await?;
            self.projections.lock().unwrap().clear();
            self.filter_updated = false;
        }

        // Materialize the manifest holding the staged files, replacing a
        // stale one if files were added since it was written.
        if self.has_new_files {
            if let Some(stale) = self.new_manifest.take() {
                debug!(path = %stale.manifest_path, "replacing stale new-files manifest");
                self.delete_quietly(&stale.manifest_path).await;
            }
        }
        if self.new_manifest.is_none() && !self.new_files.is_empty() {
            let mut writer = ManifestWriter::new(
                self.paths.next_manifest(),
                self.snapshot_id(),
                base.default_spec()?,
                base.current_schema()?,
            )?;
            writer.add_all(self.new_files.iter().cloned());
            self.new_manifest = Some(writer.finish(self.object_store.clone()).await?);
        }
        self.has_new_files = false;

        let mut groups: BTreeMap<i32, Vec<ManifestFile>> = BTreeMap::new();
        if let Some(new_manifest) = &self.new_manifest {
            groups
                .entry(new_manifest.partition_spec_id)
                .or_default()
                .push(new_manifest.clone());
        }

        let base_manifests = base
            .current_snapshot()
            .map(|snapshot| snapshot.manifests.clone())
            .unwrap_or_default();
        let filtered = self.filter_manifests(base, &base_manifests).await?;

        self.deleted_files.clear();
        {
            let cache = self.filtered_to_deleted.lock().unwrap();
            for manifest in &filtered {
                if let Some(deleted) = cache.get(manifest) {
                    self.deleted_files.extend(deleted.iter().cloned());
                }
            }
        }

        for manifest in filtered {
            groups
                .entry(manifest.partition_spec_id)
                .or_default()
                .push(manifest);
        }

        let mut manifests = Vec::new();
        for (&spec_id, group) in groups.iter().rev() {
            manifests.extend(self.merge_group(base, spec_id, group).await?);
        }

        if self.fail_missing_delete_paths {
            let missing: Vec<String> = self
                .delete_paths
                .difference(&self.deleted_files)
                .cloned()
                .sorted()
                .collect();
            if !missing.is_empty() {
                return Err(Error::MissingDeletePaths(missing));
            }
        }

        Ok(manifests)
    }

    /// Filters the base manifests in parallel, preserving input order. The
    /// first failure stops further scheduling; in-flight tasks drain before
    /// it is re-raised.
    async fn filter_manifests(
        &self,
        base: &TableMetadata,
        manifests: &[ManifestFile],
    ) -> Result<Vec<ManifestFile>> {
        let evaluator = StrictMetricsEvaluator::new(&self.delete_expression, base.current_schema()?);
        let filter = ManifestFilter {
            object_store: self.object_store.clone(),
            metadata: base,
            paths: &self.paths,
            delete_paths: &self.delete_paths,
            drop_partitions: &self.drop_partitions,
            delete_expression: &self.delete_expression,
            fail_any_delete: self.fail_any_delete,
            evaluator: &evaluator,
            projections: &self.projections,
            filtered_manifests: &self.filtered_manifests,
            filtered_to_deleted: &self.filtered_to_deleted,
        };

        let aborted = AtomicBool::new(false);
        let mut slots: Vec<Option<ManifestFile>> = manifests.iter().map(|_| None).collect();
        let mut first_error = None;
        let mut tasks = stream::iter(manifests.iter().enumerate())
            .map(|(index, manifest)| {
                let filter = &filter;
                let aborted = &aborted;
                async move {
                    if aborted.load(Ordering::Acquire) {
                        return (index, None);
                    }
                    (index, Some(filter.filter_manifest(manifest).await))
                }
            })
            .buffer_unordered(self.concurrency);
        while let Some((index, result)) = tasks.next().await {
            match result {
                Some(Ok(manifest)) => slots[index] = Some(manifest),
                Some(Err(error)) => {
                    aborted.store(true, Ordering::Release);
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                None => {}
            }
        }
        drop(tasks);
        match first_error {
            Some(error) => Err(error),
            None => Ok(slots.into_iter().flatten().collect()),
        }
    }

    /// Plans and executes manifest merging for one partition spec group.
    /// Bins are processed in parallel and reassembled in bin order.
    async fn merge_group(
        &self,
        base: &TableMetadata,
        spec_id: i32,
        manifests: &[ManifestFile],
    ) -> Result<Vec<ManifestFile>> {
        let target_size = base
            .property_as_i64(MANIFEST_TARGET_SIZE_BYTES, MANIFEST_TARGET_SIZE_BYTES_DEFAULT)
            .max(1) as u64;
        let min_merge_count =
            base.property_as_usize(MANIFEST_MIN_MERGE_COUNT, MANIFEST_MIN_MERGE_COUNT_DEFAULT);
        let bins = pack_end(
            manifests.to_vec(),
            |manifest| manifest.manifest_length.max(0) as u64,
            target_size,
        );

        let aborted = AtomicBool::new(false);
        let mut slots: Vec<Option<Vec<ManifestFile>>> = bins.iter().map(|_| None).collect();
        let mut first_error = None;
        let mut tasks = stream::iter(bins.iter().enumerate())
            .map(|(index, bin)| {
                let aborted = &aborted;
                async move {
                    if aborted.load(Ordering::Acquire) {
                        return (index, None);
                    }
                    (
                        index,
                        Some(self.merge_bin(base, spec_id, bin, min_merge_count).await),
                    )
                }
            })
            .buffer_unordered(self.concurrency);
        while let Some((index, result)) = tasks.next().await {
            match result {
                Some(Ok(manifests)) => slots[index] = Some(manifests),
                Some(Err(error)) => {
                    aborted.store(true, Ordering::Release);
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                None => {}
            }
        }
        drop(tasks);
        match first_error {
            Some(error) => Err(error),
            None => Ok(slots.into_iter().flatten().flatten().collect()),
        }
    }

    /// Decides whether one bin is rewritten into a single merged manifest
    /// or passed through.
    async fn merge_bin(
        &self,
        base: &TableMetadata,
        spec_id: i32,
        bin: &[ManifestFile],
        min_merge_count: usize,
    ) -> Result<Vec<ManifestFile>> {
        if bin.len() == 1 {
            return Ok(bin.to_vec());
        }
        let contains_new_files = self
            .new_manifest
            .as_ref()
            .map_or(false, |manifest| bin.contains(manifest));
        if contains_new_files && bin.len() < min_merge_count {
            // merging waits until enough manifests accumulate
            debug!(
                bin_size = bin.len(),
                min_merge_count, "deferring manifest merge below minimum count"
            );
            return Ok(bin.to_vec());
        }
        Ok(vec![self.create_manifest(base, spec_id, bin).await?])
    }

    /// Streams the entries of every manifest in the bin into one merged
    /// manifest. Deletes from prior snapshots are suppressed, adds from
    /// this snapshot stay added, and everything else is downgraded to
    /// existing. Results are cached by bin contents.
    async fn create_manifest(
        &self,
        base: &TableMetadata,
        spec_id: i32,
        bin: &[ManifestFile],
    ) -> Result<ManifestFile> {
        if let Some(cached) = self.merge_manifests.lock().unwrap().get(bin) {
            return Ok(cached.clone());
        }
        let spec = base
            .spec(spec_id)
            .ok_or_else(|| Error::NotFound("partition spec".to_owned(), spec_id.to_string()))?;
        let mut writer = ManifestWriter::new(
            self.paths.next_manifest(),
            self.snapshot_id(),
            spec,
            base.current_schema()?,
        )?;
        for manifest in bin {
            let reader = ManifestReader::read(self.object_store.clone(), manifest, base).await?;
            for entry in reader {
                match entry.status {
                    Status::Deleted if entry.snapshot_id == Some(self.snapshot_id()) => {
                        writer.delete(entry.data_file)
                    }
                    Status::Deleted => {}
                    Status::Added if entry.snapshot_id == Some(self.snapshot_id()) => {
                        writer.add(entry.data_file)
                    }
                    _ => writer.add_existing(entry.data_file, entry.snapshot_id),
                }
            }
        }
        let merged = writer.finish(self.object_store.clone()).await?;
        debug!(
            merged_manifests = bin.len(),
            path = %merged.manifest_path,
            "merged manifest bin"
        );
        self.merge_manifests
            .lock()
            .unwrap()
            .insert(bin.to_vec(), merged.clone());
        Ok(merged)
    }

    /// Deletes every file this update wrote that is not in `committed`.
    /// Files in `committed` are never deleted. Deletion failures are
    /// reported after every candidate has been attempted.
    pub async fn clean_uncommitted(&mut self, committed: &HashSet<ManifestFile>) -> Result<()> {
        let mut first_error: Option<Error> = None;

        let drop_new = self
            .new_manifest
            .as_ref()
            .map_or(false, |manifest| !committed.contains(manifest));
        if drop_new {
            if let Some(stale) = self.new_manifest.take() {
                self.delete_uncommitted_file(&stale.manifest_path, &mut first_error)
                    .await;
            }
        }

        let stale_merged: Vec<String> = {
            let mut cache = self.merge_manifests.lock().unwrap();
            let mut stale = Vec::new();
            cache.retain(|_, merged| {
                if committed.contains(merged) {
                    return true;
                }
                stale.push(merged.manifest_path.clone());
                false
            });
            stale
        };
        for path in stale_merged {
            self.delete_uncommitted_file(&path, &mut first_error).await;
        }

        if let Err(error) = self.clean_uncommitted_filters(committed).await {
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Drops cached filter results whose output is not committed, deleting
    /// the rewritten files (pass-through results point at base manifests,
    /// which are never deleted).
    async fn clean_uncommitted_filters(&self, committed: &HashSet<ManifestFile>) -> Result<()> {
        let stale: Vec<String> = {
            let mut cache = self.filtered_manifests.lock().unwrap();
            let mut deleted_cache = self.filtered_to_deleted.lock().unwrap();
            let mut stale = Vec::new();
            cache.retain(|input, output| {
                if committed.contains(output) {
                    return true;
                }
                if output != input {
                    stale.push(output.manifest_path.clone());
                }
                deleted_cache.remove(output);
                false
            });
            stale
        };
        let mut first_error = None;
        for path in stale {
            self.delete_uncommitted_file(&path, &mut first_error).await;
        }
        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    async fn delete_uncommitted_file(&self, path: &str, first_error: &mut Option<Error>) {
        debug!(path, "deleting uncommitted file");
        match self
            .object_store
            .delete(&strip_prefix(path).as_str().into())
            .await
        {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(error) => {
                warn!(path, %error, "failed to delete uncommitted file");
                if first_error.is_none() {
                    *first_error = Some(error.into());
                }
            }
        }
    }

    async fn delete_quietly(&self, path: &str) {
        let mut ignored = None;
        self.delete_uncommitted_file(path, &mut ignored).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::TryStreamExt;
    use object_store::memory::InMemory;
    use uuid::Uuid;

    use super::*;
    use crate::model::partition::{PartitionField, PartitionSpec, Transform};
    use crate::model::schema::{PrimitiveType, Schema, StructField};
    use crate::model::snapshot::{Operation, Snapshot, Summary};
    use crate::model::values::Value;

    fn test_metadata(
        properties: HashMap<String, String>,
        snapshot: Option<Snapshot>,
    ) -> TableMetadata {
        TableMetadata {
            table_uuid: Uuid::new_v4(),
            location: "test/table".to_string(),
            last_sequence_number: snapshot.is_some() as i64,
            last_updated_ms: 0,
            last_column_id: 2,
            schemas: vec![Schema {
                schema_id: 0,
                fields: vec![
                    StructField {
                        id: 1,
                        name: "x".to_string(),
                        required: false,
                        field_type: PrimitiveType::Long,
                    },
                    StructField {
                        id: 2,
                        name: "p".to_string(),
                        required: false,
                        field_type: PrimitiveType::Int,
                    },
                ],
            }],
            current_schema_id: 0,
            partition_specs: vec![
                PartitionSpec {
                    spec_id: 0,
                    fields: vec![PartitionField {
                        source_id: 2,
                        field_id: 1000,
                        name: "p".to_string(),
                        transform: Transform::Identity,
                    }],
                },
                PartitionSpec {
                    spec_id: 1,
                    fields: vec![PartitionField {
                        source_id: 2,
                        field_id: 1001,
                        name: "p_id".to_string(),
                        transform: Transform::Identity,
                    }],
                },
            ],
            default_spec_id: 0,
            last_partition_id: 1001,
            properties: Some(properties),
            current_snapshot_id: snapshot.as_ref().map(|snapshot| snapshot.snapshot_id),
            snapshots: snapshot.map(|snapshot| vec![snapshot]),
        }
    }

    const BASE_SNAPSHOT_ID: i64 = 7;

    fn base_snapshot(manifests: Vec<ManifestFile>) -> Snapshot {
        Snapshot {
            snapshot_id: BASE_SNAPSHOT_ID,
            parent_snapshot_id: None,
            timestamp_ms: 0,
            manifests,
            summary: Summary {
                operation: Some(Operation::Append),
                other: HashMap::new(),
            },
            schema_id: Some(0),
        }
    }

    fn data_file(path: &str, partition: i32, upper_x: i64) -> DataFile {
        DataFile {
            file_path: path.to_string(),
            partition: StructValue::new(vec![("p".to_string(), Some(Value::Int(partition)))]),
            record_count: 10,
            file_size_in_bytes: 100,
            value_counts: Some(HashMap::from([(1, 10), (2, 10)])),
            null_value_counts: Some(HashMap::from([(1, 0), (2, 0)])),
            lower_bounds: Some(HashMap::from([(1, Value::Long(0))])),
            upper_bounds: Some(HashMap::from([(1, Value::Long(upper_x))])),
        }
    }

    fn partition(value: i32) -> StructValue {
        StructValue::new(vec![("p".to_string(), Some(Value::Int(value)))])
    }

    async fn write_base_manifest(
        object_store: Arc<dyn ObjectStore>,
        metadata: &TableMetadata,
        name: &str,
        files: Vec<DataFile>,
    ) -> ManifestFile {
        let mut writer = ManifestWriter::new(
            format!("test/table/metadata/{name}.avro"),
            BASE_SNAPSHOT_ID,
            metadata.default_spec().unwrap(),
            metadata.current_schema().unwrap(),
        )
        .unwrap();
        writer.add_all(files);
        writer.finish(object_store).await.unwrap()
    }

    async fn read_entries(
        object_store: Arc<dyn ObjectStore>,
        manifest: &ManifestFile,
        metadata: &TableMetadata,
    ) -> Vec<crate::model::manifest::ManifestEntry> {
        ManifestReader::read(object_store, manifest, metadata)
            .await
            .unwrap()
            .into_iter()
            .collect()
    }

    async fn stored_paths(object_store: &Arc<dyn ObjectStore>) -> Vec<String> {
        let mut paths: Vec<String> = object_store
            .list(None)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_pure_append() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let base = test_metadata(HashMap::new(), None);

        let mut producer = MergingSnapshotProducer::new(object_store.clone(), "test/table");
        producer.add_file(data_file("data/f1.parquet", 1, 5));
        producer.add_file(data_file("data/f2.parquet", 1, 5));
        producer.add_file(data_file("data/f3.parquet", 2, 5));

        let manifests = producer.apply(&base).await.unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].partition_spec_id, 0);
        assert_eq!(manifests[0].added_files_count, Some(3));

        let entries = read_entries(object_store, &manifests[0], &base).await;
        assert_eq!(entries.len(), 3);
        for entry in &entries {
            assert_eq!(entry.status, Status::Added);
            assert_eq!(entry.snapshot_id, Some(producer.snapshot_id()));
        }
        let paths: Vec<_> = entries
            .iter()
            .map(|entry| entry.data_file.file_path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec!["data/f1.parquet", "data/f2.parquet", "data/f3.parquet"]
        );
    }

    #[tokio::test]
    async fn test_append_and_drop_partition() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let empty = test_metadata(HashMap::new(), None);
        let m1 = write_base_manifest(
            object_store.clone(),
            &empty,
            "base-0",
            vec![
                data_file("data/f1.parquet", 1, 5),
                data_file("data/f2.parquet", 1, 5),
            ],
        )
        .await;
        let m2 = write_base_manifest(
            object_store.clone(),
            &empty,
            "base-1",
            vec![data_file("data/f3.parquet", 2, 5)],
        )
        .await;
        let base = test_metadata(
            HashMap::new(),
            Some(base_snapshot(vec![m1.clone(), m2.clone()])),
        );

        let mut producer = MergingSnapshotProducer::new(object_store.clone(), "test/table");
        producer.add_file(data_file("data/f4.parquet", 3, 5));
        producer.drop_partition(partition(1));

        let manifests = producer.apply(&base).await.unwrap();
        assert_eq!(manifests.len(), 3);

        // the new-files manifest leads its spec group
        assert_eq!(manifests[0].added_files_count, Some(1));
        let new_entries = read_entries(object_store.clone(), &manifests[0], &base).await;
        assert_eq!(new_entries[0].data_file.file_path, "data/f4.parquet");

        // the p=1 manifest was rewritten with both files deleted
        assert_ne!(manifests[1], m1);
        assert_eq!(manifests[1].deleted_files_count, Some(2));
        let filtered_entries = read_entries(object_store.clone(), &manifests[1], &base).await;
        for entry in &filtered_entries {
            assert_eq!(entry.status, Status::Deleted);
            assert_eq!(entry.snapshot_id, Some(producer.snapshot_id()));
        }

        // the p=2 manifest passed through untouched
        assert_eq!(manifests[2], m2);
        assert_eq!(manifests[2].manifest_path, m2.manifest_path);

        let mut deleted: Vec<_> = producer.deleted_files().iter().cloned().collect();
        deleted.sort();
        assert_eq!(deleted, vec!["data/f1.parquet", "data/f2.parquet"]);
    }

    #[tokio::test]
    async fn test_partial_delete_fails_and_cleans_up() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let empty = test_metadata(HashMap::new(), None);
        // x ranges up to 20, so `x < 10` cannot be proven for every row
        let m1 = write_base_manifest(
            object_store.clone(),
            &empty,
            "base-0",
            vec![data_file("data/f1.parquet", 1, 20)],
        )
        .await;
        let base = test_metadata(HashMap::new(), Some(base_snapshot(vec![m1])));

        let mut producer = MergingSnapshotProducer::new(object_store.clone(), "test/table");
        producer.add_file(data_file("data/f2.parquet", 2, 5));
        producer.delete_by_filter(Predicate::less_than("x", Value::Long(10)));

        let result = producer.apply(&base).await;
        assert!(matches!(result, Err(Error::CannotDeletePartial { .. })));

        producer.clean_uncommitted(&HashSet::new()).await.unwrap();
        assert_eq!(
            stored_paths(&object_store).await,
            vec!["test/table/metadata/base-0.avro".to_string()]
        );
    }

    async fn five_manifest_base(
        object_store: &Arc<dyn ObjectStore>,
        properties: HashMap<String, String>,
    ) -> TableMetadata {
        let empty = test_metadata(HashMap::new(), None);
        let mut manifests = Vec::new();
        for i in 0..5 {
            manifests.push(
                write_base_manifest(
                    object_store.clone(),
                    &empty,
                    &format!("base-{i}"),
                    vec![data_file(&format!("data/f{i}.parquet"), i, 5)],
                )
                .await,
            );
        }
        test_metadata(properties, Some(base_snapshot(manifests)))
    }

    #[tokio::test]
    async fn test_small_bins_below_min_count_pass_through() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let base = five_manifest_base(&object_store, HashMap::new()).await;

        let mut producer = MergingSnapshotProducer::new(object_store.clone(), "test/table");
        producer.add_file(data_file("data/f5.parquet", 5, 5));

        let manifests = producer.apply(&base).await.unwrap();
        assert_eq!(manifests.len(), 6);
        assert_eq!(manifests[0].added_files_count, Some(1));
        let base_manifests = &base.current_snapshot().unwrap().manifests;
        assert_eq!(&manifests[1..], &base_manifests[..]);
    }

    #[tokio::test]
    async fn test_merge_collapses_bin_when_threshold_met() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let base = five_manifest_base(
            &object_store,
            HashMap::from([(MANIFEST_MIN_MERGE_COUNT.to_string(), "2".to_string())]),
        )
        .await;

        let mut producer = MergingSnapshotProducer::new(object_store.clone(), "test/table");
        producer.add_file(data_file("data/f5.parquet", 5, 5));

        let manifests = producer.apply(&base).await.unwrap();
        assert_eq!(manifests.len(), 1);
        let merged = &manifests[0];
        assert_eq!(merged.added_files_count, Some(1));
        assert_eq!(merged.existing_files_count, Some(5));
        assert_eq!(merged.deleted_files_count, Some(0));

        let entries = read_entries(object_store, merged, &base).await;
        assert_eq!(entries.len(), 6);
        // the new file stays added, prior-snapshot adds are downgraded
        assert_eq!(entries[0].status, Status::Added);
        assert_eq!(entries[0].snapshot_id, Some(producer.snapshot_id()));
        assert_eq!(entries[0].data_file.file_path, "data/f5.parquet");
        for entry in &entries[1..] {
            assert_eq!(entry.status, Status::Existing);
            assert_eq!(entry.snapshot_id, Some(BASE_SNAPSHOT_ID));
        }
    }

    #[tokio::test]
    async fn test_missing_delete_paths_fail() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let empty = test_metadata(HashMap::new(), None);
        let m1 = write_base_manifest(
            object_store.clone(),
            &empty,
            "base-0",
            vec![data_file("data/f1.parquet", 1, 5)],
        )
        .await;
        let base = test_metadata(HashMap::new(), Some(base_snapshot(vec![m1])));

        let mut producer = MergingSnapshotProducer::new(object_store.clone(), "test/table");
        producer.delete_file("data/nonexistent.parquet");
        producer.fail_missing_delete_paths();

        match producer.apply(&base).await {
            Err(Error::MissingDeletePaths(missing)) => {
                assert_eq!(missing, vec!["data/nonexistent.parquet".to_string()]);
            }
            other => panic!("expected MissingDeletePaths, got {other:?}"),
        }
        producer.clean_uncommitted(&HashSet::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent_and_cached() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let empty = test_metadata(HashMap::new(), None);
        let m1 = write_base_manifest(
            object_store.clone(),
            &empty,
            "base-0",
            vec![data_file("data/f1.parquet", 1, 5)],
        )
        .await;
        let base = test_metadata(
            HashMap::from([(MANIFEST_MIN_MERGE_COUNT.to_string(), "2".to_string())]),
            Some(base_snapshot(vec![m1])),
        );

        let mut producer = MergingSnapshotProducer::new(object_store.clone(), "test/table");
        producer.add_file(data_file("data/f2.parquet", 2, 5));
        producer.drop_partition(partition(1));

        let first = producer.apply(&base).await.unwrap();
        let written = stored_paths(&object_store).await;

        let second = producer.apply(&base).await.unwrap();
        assert_eq!(first, second);
        let first_paths: Vec<_> = first.iter().map(|m| &m.manifest_path).collect();
        let second_paths: Vec<_> = second.iter().map(|m| &m.manifest_path).collect();
        assert_eq!(first_paths, second_paths);
        // the second application performed no additional writes
        assert_eq!(stored_paths(&object_store).await, written);
    }

    #[tokio::test]
    async fn test_higher_spec_groups_come_first() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let empty = test_metadata(HashMap::new(), None);
        // base manifest written under the older spec 0
        let m1 = write_base_manifest(
            object_store.clone(),
            &empty,
            "base-0",
            vec![data_file("data/f1.parquet", 1, 5)],
        )
        .await;
        let mut base = test_metadata(HashMap::new(), Some(base_snapshot(vec![m1.clone()])));
        // new files are written under spec 1
        base.default_spec_id = 1;

        let mut producer = MergingSnapshotProducer::new(object_store.clone(), "test/table");
        producer.add_file(DataFile {
            partition: StructValue::new(vec![("p_id".to_string(), Some(Value::Int(9)))]),
            ..data_file("data/f2.parquet", 9, 5)
        });

        let manifests = producer.apply(&base).await.unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].partition_spec_id, 1);
        assert_eq!(manifests[1].partition_spec_id, 0);
        assert_eq!(manifests[1], m1);
    }
}
