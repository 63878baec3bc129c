/*!
Manifest files

A manifest lists data files, along with each file's partition tuple, column
statistics, and tracking information. Entries are stored as Avro records;
the record schema depends on the partition spec the manifest was written
with, so it is generated per spec by [manifest_entry_schema].
*/
use std::collections::HashMap;

use apache_avro::{from_value, schema::Schema as AvroSchema, types::Value as AvroValue};
use itertools::Itertools;
use serde_json::json;

use crate::error::{Error, Result};
use crate::model::schema::{PrimitiveType, Schema};
use crate::model::values::{StructValue, Value};

/// The `(name, type)` shape of partition tuples under one partition spec.
pub type PartitionType = Vec<(String, PrimitiveType)>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
/// Used to track additions and deletions
pub enum Status {
    /// The file was added by an earlier snapshot and is still live.
    Existing = 0,
    /// The file was added by the snapshot that wrote the entry.
    Added = 1,
    /// The file was deleted by the snapshot that wrote the entry.
    Deleted = 2,
}

impl TryFrom<i32> for Status {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Status::Existing),
            1 => Ok(Status::Added),
            2 => Ok(Status::Deleted),
            _ => Err(Error::Type(value.to_string(), "status".to_owned())),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// Immutable record describing one on-disk data file.
pub struct DataFile {
    /// Full URI for the file with a FS scheme.
    pub file_path: String,
    /// The partition tuple of the file, conforming to the partition spec of
    /// the manifest that carries it.
    pub partition: StructValue,
    /// Number of records in this file
    pub record_count: i64,
    /// Total file size in bytes
    pub file_size_in_bytes: i64,
    /// Map from column id to number of values (including nulls)
    pub value_counts: Option<HashMap<i32, i64>>,
    /// Map from column id to number of null values
    pub null_value_counts: Option<HashMap<i32, i64>>,
    /// Map from column id to lower bound of the column
    pub lower_bounds: Option<HashMap<i32, Value>>,
    /// Map from column id to upper bound of the column
    pub upper_bounds: Option<HashMap<i32, Value>>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// Entry in a manifest.
pub struct ManifestEntry {
    /// Used to track additions and deletions
    pub status: Status,
    /// Snapshot id where the file was added, or deleted if status is
    /// [Status::Deleted]. For [Status::Existing] entries this is the
    /// snapshot that originally added the file.
    pub snapshot_id: Option<i64>,
    /// The file this entry tracks.
    pub data_file: DataFile,
}

fn avro_primitive_type(datatype: &PrimitiveType) -> &'static str {
    match datatype {
        PrimitiveType::Boolean => "boolean",
        PrimitiveType::Int | PrimitiveType::Date => "int",
        PrimitiveType::Long | PrimitiveType::Timestamp => "long",
        PrimitiveType::Float => "float",
        PrimitiveType::Double => "double",
        PrimitiveType::String => "string",
    }
}

/// Generates the Avro schema for manifest entries whose partition tuples
/// have the given shape. Dates and timestamps are stored as their underlying
/// int and long representations.
pub fn manifest_entry_schema(partition_type: &PartitionType) -> Result<AvroSchema> {
    let partition_fields = partition_type
        .iter()
        .map(|(name, datatype)| {
            json!({
                "name": name,
                "type": ["null", avro_primitive_type(datatype)],
                "default": null
            })
        })
        .collect::<Vec<_>>();
    let count_map = |record_name: &str| {
        json!(["null", {
            "type": "array",
            "items": {
                "type": "record",
                "name": record_name,
                "fields": [
                    {"name": "key", "type": "int"},
                    {"name": "value", "type": "long"}
                ]
            }
        }])
    };
    let bound_map = |record_name: &str| {
        json!(["null", {
            "type": "array",
            "items": {
                "type": "record",
                "name": record_name,
                "fields": [
                    {"name": "key", "type": "int"},
                    {"name": "value", "type": "bytes"}
                ]
            }
        }])
    };
    let schema = json!({
        "type": "record",
        "name": "manifest_entry",
        "fields": [
            {"name": "status", "type": "int"},
            {"name": "snapshot_id", "type": ["null", "long"], "default": null},
            {"name": "data_file", "type": {
                "type": "record",
                "name": "r2",
                "fields": [
                    {"name": "file_path", "type": "string"},
                    {"name": "partition", "type": {
                        "type": "record",
                        "name": "r102",
                        "fields": partition_fields
                    }},
                    {"name": "record_count", "type": "long"},
                    {"name": "file_size_in_bytes", "type": "long"},
                    {"name": "value_counts", "type": count_map("k119_v120"), "default": null},
                    {"name": "null_value_counts", "type": count_map("k121_v122"), "default": null},
                    {"name": "lower_bounds", "type": bound_map("k126_v127"), "default": null},
                    {"name": "upper_bounds", "type": bound_map("k129_v130"), "default": null}
                ]
            }}
        ]
    });
    AvroSchema::parse_str(&schema.to_string()).map_err(Into::into)
}

fn nullable(value: Option<AvroValue>) -> AvroValue {
    match value {
        None => AvroValue::Union(0, Box::new(AvroValue::Null)),
        Some(value) => AvroValue::Union(1, Box::new(value)),
    }
}

fn primitive_to_avro(value: &Value) -> AvroValue {
    match value {
        Value::Boolean(b) => AvroValue::Boolean(*b),
        Value::Int(i) | Value::Date(i) => AvroValue::Int(*i),
        Value::Long(l) | Value::Timestamp(l) => AvroValue::Long(*l),
        Value::Float(f) => AvroValue::Float(*f),
        Value::Double(d) => AvroValue::Double(*d),
        Value::String(s) => AvroValue::String(s.clone()),
    }
}

fn primitive_from_avro(value: AvroValue, datatype: &PrimitiveType) -> Result<Value> {
    match (datatype, value) {
        (PrimitiveType::Boolean, AvroValue::Boolean(b)) => Ok(Value::Boolean(b)),
        (PrimitiveType::Int, AvroValue::Int(i)) => Ok(Value::Int(i)),
        (PrimitiveType::Date, AvroValue::Int(i)) => Ok(Value::Date(i)),
        (PrimitiveType::Long, AvroValue::Long(l)) => Ok(Value::Long(l)),
        (PrimitiveType::Timestamp, AvroValue::Long(l)) => Ok(Value::Timestamp(l)),
        (PrimitiveType::Float, AvroValue::Float(f)) => Ok(Value::Float(f)),
        (PrimitiveType::Double, AvroValue::Double(d)) => Ok(Value::Double(d)),
        (PrimitiveType::String, AvroValue::String(s)) => Ok(Value::String(s)),
        (datatype, value) => Err(Error::Type(format!("{value:?}"), datatype.to_string())),
    }
}

fn counts_to_avro(counts: &Option<HashMap<i32, i64>>) -> AvroValue {
    nullable(counts.as_ref().map(|counts| {
        AvroValue::Array(
            counts
                .iter()
                .sorted_by_key(|(key, _)| **key)
                .map(|(key, count)| {
                    AvroValue::Record(vec![
                        ("key".to_owned(), AvroValue::Int(*key)),
                        ("value".to_owned(), AvroValue::Long(*count)),
                    ])
                })
                .collect(),
        )
    }))
}

fn bounds_to_avro(bounds: &Option<HashMap<i32, Value>>) -> AvroValue {
    nullable(bounds.as_ref().map(|bounds| {
        AvroValue::Array(
            bounds
                .iter()
                .sorted_by_key(|(key, _)| **key)
                .map(|(key, bound)| {
                    AvroValue::Record(vec![
                        ("key".to_owned(), AvroValue::Int(*key)),
                        ("value".to_owned(), AvroValue::Bytes(bound.to_bytes())),
                    ])
                })
                .collect(),
        )
    }))
}

impl ManifestEntry {
    pub(crate) fn to_avro(&self) -> AvroValue {
        let partition = AvroValue::Record(
            self.data_file
                .partition
                .fields()
                .iter()
                .map(|(name, value)| {
                    (
                        name.clone(),
                        nullable(value.as_ref().map(primitive_to_avro)),
                    )
                })
                .collect(),
        );
        let data_file = AvroValue::Record(vec![
            (
                "file_path".to_owned(),
                AvroValue::String(self.data_file.file_path.clone()),
            ),
            ("partition".to_owned(), partition),
            (
                "record_count".to_owned(),
                AvroValue::Long(self.data_file.record_count),
            ),
            (
                "file_size_in_bytes".to_owned(),
                AvroValue::Long(self.data_file.file_size_in_bytes),
            ),
            (
                "value_counts".to_owned(),
                counts_to_avro(&self.data_file.value_counts),
            ),
            (
                "null_value_counts".to_owned(),
                counts_to_avro(&self.data_file.null_value_counts),
            ),
            (
                "lower_bounds".to_owned(),
                bounds_to_avro(&self.data_file.lower_bounds),
            ),
            (
                "upper_bounds".to_owned(),
                bounds_to_avro(&self.data_file.upper_bounds),
            ),
        ]);
        AvroValue::Record(vec![
            ("status".to_owned(), AvroValue::Int(self.status as i32)),
            (
                "snapshot_id".to_owned(),
                nullable(self.snapshot_id.map(AvroValue::Long)),
            ),
            ("data_file".to_owned(), data_file),
        ])
    }

    /// Decodes a manifest entry from an Avro value. The partition tuple is
    /// typed by `partition_type` and column bounds by `schema`.
    pub(crate) fn try_from_avro(
        value: AvroValue,
        partition_type: &PartitionType,
        schema: &Schema,
    ) -> Result<Self> {
        let mut entry = fields_map(value, "manifest entry")?;
        let status = Status::try_from(from_value::<i32>(
            &entry
                .remove("status")
                .ok_or_else(|| Error::InvalidManifest("status not found".to_owned()))?,
        )?)?;
        let snapshot_id = entry
            .remove("snapshot_id")
            .and_then(unwrap_union)
            .map(|value| from_value::<i64>(&value))
            .transpose()?;
        let data_file = entry
            .remove("data_file")
            .ok_or_else(|| Error::InvalidManifest("data_file not found".to_owned()))?;
        Ok(ManifestEntry {
            status,
            snapshot_id,
            data_file: DataFile::try_from_avro(data_file, partition_type, schema)?,
        })
    }
}

impl DataFile {
    fn try_from_avro(
        value: AvroValue,
        partition_type: &PartitionType,
        schema: &Schema,
    ) -> Result<Self> {
        let mut file = fields_map(value, "data file")?;
        let file_path = from_value::<String>(
            &file
                .remove("file_path")
                .ok_or_else(|| Error::InvalidManifest("file_path not found".to_owned()))?,
        )?;
        let mut partition_fields = fields_map(
            file.remove("partition")
                .ok_or_else(|| Error::InvalidManifest("partition not found".to_owned()))?,
            "partition tuple",
        )?;
        let partition = partition_type
            .iter()
            .map(|(name, datatype)| {
                let value = partition_fields
                    .remove(name)
                    .and_then(unwrap_union)
                    .map(|value| primitive_from_avro(value, datatype))
                    .transpose()?;
                Ok((name.clone(), value))
            })
            .collect::<Result<StructValue>>()?;
        let record_count = from_value::<i64>(
            &file
                .remove("record_count")
                .ok_or_else(|| Error::InvalidManifest("record_count not found".to_owned()))?,
        )?;
        let file_size_in_bytes = from_value::<i64>(
            &file
                .remove("file_size_in_bytes")
                .ok_or_else(|| Error::InvalidManifest("file_size_in_bytes not found".to_owned()))?,
        )?;
        Ok(DataFile {
            file_path,
            partition,
            record_count,
            file_size_in_bytes,
            value_counts: counts_from_avro(file.remove("value_counts"))?,
            null_value_counts: counts_from_avro(file.remove("null_value_counts"))?,
            lower_bounds: bounds_from_avro(file.remove("lower_bounds"), schema)?,
            upper_bounds: bounds_from_avro(file.remove("upper_bounds"), schema)?,
        })
    }
}

fn fields_map(value: AvroValue, what: &str) -> Result<HashMap<String, AvroValue>> {
    if let AvroValue::Record(fields) = value {
        Ok(fields.into_iter().collect())
    } else {
        Err(Error::InvalidManifest(format!(
            "expected {what} to be an avro record"
        )))
    }
}

fn unwrap_union(value: AvroValue) -> Option<AvroValue> {
    match value {
        AvroValue::Union(_, inner) => match *inner {
            AvroValue::Null => None,
            inner => Some(inner),
        },
        AvroValue::Null => None,
        value => Some(value),
    }
}

fn kv_entries(value: Option<AvroValue>, what: &str) -> Result<Option<Vec<(i32, AvroValue)>>> {
    let Some(array) = value.and_then(unwrap_union) else {
        return Ok(None);
    };
    let AvroValue::Array(items) = array else {
        return Err(Error::InvalidManifest(format!(
            "expected {what} to be an avro array"
        )));
    };
    items
        .into_iter()
        .map(|item| {
            let mut entry = fields_map(item, what)?;
            let key = from_value::<i32>(
                &entry
                    .remove("key")
                    .ok_or_else(|| Error::InvalidManifest(format!("{what} key not found")))?,
            )?;
            let value = entry
                .remove("value")
                .ok_or_else(|| Error::InvalidManifest(format!("{what} value not found")))?;
            Ok((key, value))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn counts_from_avro(value: Option<AvroValue>) -> Result<Option<HashMap<i32, i64>>> {
    kv_entries(value, "count map")?
        .map(|entries| {
            entries
                .into_iter()
                .map(|(key, value)| Ok((key, from_value::<i64>(&value)?)))
                .collect()
        })
        .transpose()
}

fn bounds_from_avro(
    value: Option<AvroValue>,
    schema: &Schema,
) -> Result<Option<HashMap<i32, Value>>> {
    kv_entries(value, "bound map")?
        .map(|entries| {
            entries
                .into_iter()
                // Bounds for columns dropped from the schema are unreadable
                // and skipped.
                .filter_map(|(key, value)| {
                    schema.field(key).map(|field| {
                        let AvroValue::Bytes(bytes) = value else {
                            return Err(Error::InvalidManifest(
                                "expected bound to be avro bytes".to_owned(),
                            ));
                        };
                        Ok((key, Value::try_from_bytes(&bytes, &field.field_type)?))
                    })
                })
                .collect()
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::StructField;

    fn test_schema() -> Schema {
        Schema {
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
        }
    }

    fn test_entries() -> Vec<ManifestEntry> {
        vec![
            ManifestEntry {
                status: Status::Added,
                snapshot_id: Some(42),
                data_file: DataFile {
                    file_path: "data/file1.parquet".to_string(),
                    partition: StructValue::new(vec![(
                        "part".to_string(),
                        Some(Value::Int(7)),
                    )]),
                    record_count: 100,
                    file_size_in_bytes: 1200,
                    value_counts: Some(HashMap::from([(1, 100), (2, 100)])),
                    null_value_counts: Some(HashMap::from([(1, 0), (2, 0)])),
                    lower_bounds: Some(HashMap::from([(1, Value::Long(-3))])),
                    upper_bounds: Some(HashMap::from([(1, Value::Long(999))])),
                },
            },
            ManifestEntry {
                status: Status::Deleted,
                snapshot_id: None,
                data_file: DataFile {
                    file_path: "data/file2.parquet".to_string(),
                    partition: StructValue::new(vec![("part".to_string(), None)]),
                    record_count: 0,
                    file_size_in_bytes: 0,
                    value_counts: None,
                    null_value_counts: None,
                    lower_bounds: None,
                    upper_bounds: None,
                },
            },
        ]
    }

    #[test]
    fn test_entry_avro_round_trip() {
        let schema = test_schema();
        let partition_type = vec![("part".to_string(), PrimitiveType::Int)];
        let avro_schema = manifest_entry_schema(&partition_type).unwrap();

        let mut writer = apache_avro::Writer::new(&avro_schema, Vec::new());
        let entries = test_entries();
        for entry in &entries {
            writer.append(entry.to_avro()).unwrap();
        }
        let encoded = writer.into_inner().unwrap();

        let reader = apache_avro::Reader::new(&encoded[..]).unwrap();
        let decoded = reader
            .map(|value| {
                ManifestEntry::try_from_avro(value.unwrap(), &partition_type, &schema).unwrap()
            })
            .collect::<Vec<_>>();
        assert_eq!(entries, decoded);
    }

    #[test]
    fn test_status_from_int() {
        assert_eq!(Status::try_from(1).unwrap(), Status::Added);
        assert!(Status::try_from(3).is_err());
    }
}
