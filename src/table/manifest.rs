/*!
 * Helpers for reading and writing manifest files.
*/
use std::sync::Arc;

use apache_avro::schema::Schema as AvroSchema;
use apache_avro::types::Value as AvroValue;
use object_store::ObjectStore;

use crate::error::{Error, Result};
use crate::model::manifest::{manifest_entry_schema, DataFile, ManifestEntry, Status};
use crate::model::manifest_list::ManifestFile;
use crate::model::metadata::TableMetadata;
use crate::model::partition::PartitionSpec;
use crate::model::schema::Schema;
use crate::util::strip_prefix;

/// Reads the ordered entry stream of an on-disk manifest.
pub struct ManifestReader {
    spec_id: i32,
    entries: Vec<ManifestEntry>,
}

impl ManifestReader {
    /// Fetches and decodes a manifest. The partition tuples are typed by
    /// the spec the manifest was written with, looked up in `metadata`.
    pub async fn read(
        object_store: Arc<dyn ObjectStore>,
        manifest: &ManifestFile,
        metadata: &TableMetadata,
    ) -> Result<Self> {
        let spec = metadata.spec(manifest.partition_spec_id).ok_or_else(|| {
            Error::NotFound(
                "partition spec".to_owned(),
                manifest.partition_spec_id.to_string(),
            )
        })?;
        let schema = metadata.current_schema()?;
        let partition_type = spec.partition_type(schema)?;

        let bytes: Vec<u8> = object_store
            .get(&strip_prefix(&manifest.manifest_path).as_str().into())
            .await?
            .bytes()
            .await?
            .into();
        let reader = apache_avro::Reader::new(&bytes[..])?;
        let entries = reader
            .map(|value| ManifestEntry::try_from_avro(value?, &partition_type, schema))
            .collect::<Result<Vec<_>>>()?;
        Ok(ManifestReader {
            spec_id: spec.spec_id,
            entries,
        })
    }

    /// The id of the partition spec the manifest was written with.
    pub fn spec_id(&self) -> i32 {
        self.spec_id
    }

    /// The decoded entries, in on-disk order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }
}

impl IntoIterator for ManifestReader {
    type Item = ManifestEntry;
    type IntoIter = std::vec::IntoIter<ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Streams manifest entries into a new manifest file at a pre-chosen
/// location. Entries are buffered in insertion order and uploaded on
/// [ManifestWriter::finish], which reports the materialized handle with its
/// byte length and per-status counters.
pub struct ManifestWriter {
    location: String,
    snapshot_id: i64,
    spec_id: i32,
    avro_schema: AvroSchema,
    entries: Vec<AvroValue>,
    added_files: i32,
    existing_files: i32,
    deleted_files: i32,
}

impl ManifestWriter {
    /// Creates a writer for a manifest of the given spec.
    pub fn new(
        location: impl Into<String>,
        snapshot_id: i64,
        spec: &PartitionSpec,
        schema: &Schema,
    ) -> Result<Self> {
        let partition_type = spec.partition_type(schema)?;
        Ok(ManifestWriter {
            location: location.into(),
            snapshot_id,
            spec_id: spec.spec_id,
            avro_schema: manifest_entry_schema(&partition_type)?,
            entries: Vec::new(),
            added_files: 0,
            existing_files: 0,
            deleted_files: 0,
        })
    }

    fn append(&mut self, entry: ManifestEntry) {
        match entry.status {
            Status::Added => self.added_files += 1,
            Status::Existing => self.existing_files += 1,
            Status::Deleted => self.deleted_files += 1,
        }
        self.entries.push(entry.to_avro());
    }

    /// Records a file added by the current snapshot.
    pub fn add(&mut self, file: DataFile) {
        self.append(ManifestEntry {
            status: Status::Added,
            snapshot_id: Some(self.snapshot_id),
            data_file: file,
        });
    }

    /// Records every file of `files` as added by the current snapshot.
    pub fn add_all(&mut self, files: impl IntoIterator<Item = DataFile>) {
        for file in files {
            self.add(file);
        }
    }

    /// Records a live file carried over from an earlier snapshot.
    /// `snapshot_id` is the snapshot that originally added the file.
    pub fn add_existing(&mut self, file: DataFile, snapshot_id: Option<i64>) {
        self.append(ManifestEntry {
            status: Status::Existing,
            snapshot_id,
            data_file: file,
        });
    }

    /// Records a file deleted by the current snapshot.
    pub fn delete(&mut self, file: DataFile) {
        self.append(ManifestEntry {
            status: Status::Deleted,
            snapshot_id: Some(self.snapshot_id),
            data_file: file,
        });
    }

    /// Number of entries written so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry has been written yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the buffered entries, uploads the manifest, and returns its
    /// handle.
    pub async fn finish(self, object_store: Arc<dyn ObjectStore>) -> Result<ManifestFile> {
        let mut writer = apache_avro::Writer::new(&self.avro_schema, Vec::new());
        for entry in self.entries {
            writer.append(entry)?;
        }
        let bytes = writer.into_inner()?;
        let manifest_length = bytes.len() as i64;
        object_store
            .put(
                &strip_prefix(&self.location).as_str().into(),
                bytes.into(),
            )
            .await?;
        Ok(ManifestFile {
            manifest_path: self.location,
            manifest_length,
            partition_spec_id: self.spec_id,
            added_snapshot_id: self.snapshot_id,
            added_files_count: Some(self.added_files),
            existing_files_count: Some(self.existing_files),
            deleted_files_count: Some(self.deleted_files),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use object_store::memory::InMemory;
    use uuid::Uuid;

    use super::*;
    use crate::model::partition::{PartitionField, Transform};
    use crate::model::schema::{PrimitiveType, StructField};
    use crate::model::values::{StructValue, Value};

    fn test_metadata() -> TableMetadata {
        TableMetadata {
            table_uuid: Uuid::new_v4(),
            location: "test/table".to_string(),
            last_sequence_number: 0,
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
                        name: "part".to_string(),
                        required: false,
                        field_type: PrimitiveType::Int,
                    },
                ],
            }],
            current_schema_id: 0,
            partition_specs: vec![PartitionSpec {
                spec_id: 0,
                fields: vec![PartitionField {
                    source_id: 2,
                    field_id: 1000,
                    name: "part".to_string(),
                    transform: Transform::Identity,
                }],
            }],
            default_spec_id: 0,
            last_partition_id: 1000,
            properties: None,
            current_snapshot_id: None,
            snapshots: None,
        }
    }

    fn data_file(path: &str, partition: i32) -> DataFile {
        DataFile {
            file_path: path.to_string(),
            partition: StructValue::new(vec![(
                "part".to_string(),
                Some(Value::Int(partition)),
            )]),
            record_count: 10,
            file_size_in_bytes: 100,
            value_counts: Some(HashMap::from([(1, 10)])),
            null_value_counts: Some(HashMap::from([(1, 0)])),
            lower_bounds: Some(HashMap::from([(1, Value::Long(0))])),
            upper_bounds: Some(HashMap::from([(1, Value::Long(9))])),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let metadata = test_metadata();
        let schema = metadata.current_schema().unwrap();
        let spec = metadata.default_spec().unwrap();

        let mut writer =
            ManifestWriter::new("test/table/metadata/1-m0.avro", 1, spec, schema).unwrap();
        writer.add(data_file("data/f1.parquet", 1));
        writer.add_existing(data_file("data/f2.parquet", 2), Some(7));
        writer.delete(data_file("data/f3.parquet", 3));
        assert_eq!(writer.len(), 3);

        let manifest = writer.finish(object_store.clone()).await.unwrap();
        assert_eq!(manifest.added_files_count, Some(1));
        assert_eq!(manifest.existing_files_count, Some(1));
        assert_eq!(manifest.deleted_files_count, Some(1));
        assert!(manifest.manifest_length > 0);

        let reader = ManifestReader::read(object_store, &manifest, &metadata)
            .await
            .unwrap();
        assert_eq!(reader.spec_id(), 0);
        let entries = reader.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].status, Status::Added);
        assert_eq!(entries[0].snapshot_id, Some(1));
        assert_eq!(entries[1].status, Status::Existing);
        assert_eq!(entries[1].snapshot_id, Some(7));
        assert_eq!(entries[2].status, Status::Deleted);
        assert_eq!(entries[2].data_file.file_path, "data/f3.parquet");
    }
}
