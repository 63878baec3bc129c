/*!
Typed primitive values.

[Value] carries a single partition or statistics value. [StructValue] is an
ordered partition tuple. Both implement `Eq` and `Hash` (bit-exact for the
floating point variants) so they can key the caches and criteria sets used
while producing a snapshot.
*/
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDate};

use crate::error::{Error, Result};
use crate::model::schema::PrimitiveType;

/// Days between the common era and the unix epoch, used to render date values.
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

/// A single typed value.
#[derive(Debug, Clone)]
pub enum Value {
    /// True or false
    Boolean(bool),
    /// A 32 bit signed integer
    Int(i32),
    /// A 64 bit signed integer
    Long(i64),
    /// A 32 bit float
    Float(f32),
    /// A 64 bit float
    Double(f64),
    /// Days since the unix epoch
    Date(i32),
    /// Milliseconds since the unix epoch
    Timestamp(i64),
    /// A UTF-8 string
    String(String),
}

impl Value {
    /// The primitive type of this value.
    pub fn datatype(&self) -> PrimitiveType {
        match self {
            Value::Boolean(_) => PrimitiveType::Boolean,
            Value::Int(_) => PrimitiveType::Int,
            Value::Long(_) => PrimitiveType::Long,
            Value::Float(_) => PrimitiveType::Float,
            Value::Double(_) => PrimitiveType::Double,
            Value::Date(_) => PrimitiveType::Date,
            Value::Timestamp(_) => PrimitiveType::Timestamp,
            Value::String(_) => PrimitiveType::String,
        }
    }

    /// Serializes the value with the single-value binary encoding used for
    /// column bounds: little endian for the fixed width types, UTF-8 bytes
    /// for strings.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Boolean(b) => vec![u8::from(*b)],
            Value::Int(i) | Value::Date(i) => i.to_le_bytes().to_vec(),
            Value::Long(l) | Value::Timestamp(l) => l.to_le_bytes().to_vec(),
            Value::Float(f) => f.to_le_bytes().to_vec(),
            Value::Double(d) => d.to_le_bytes().to_vec(),
            Value::String(s) => s.as_bytes().to_vec(),
        }
    }

    /// Deserializes a single-value binary encoding, typed by `datatype`.
    pub fn try_from_bytes(bytes: &[u8], datatype: &PrimitiveType) -> Result<Self> {
        let wrong_size = || Error::Type(format!("{bytes:?}"), datatype.to_string());
        match datatype {
            PrimitiveType::Boolean => match bytes {
                [0] => Ok(Value::Boolean(false)),
                [_] => Ok(Value::Boolean(true)),
                _ => Err(wrong_size()),
            },
            PrimitiveType::Int => Ok(Value::Int(i32::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_size())?,
            ))),
            PrimitiveType::Date => Ok(Value::Date(i32::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_size())?,
            ))),
            PrimitiveType::Long => Ok(Value::Long(i64::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_size())?,
            ))),
            PrimitiveType::Timestamp => Ok(Value::Timestamp(i64::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_size())?,
            ))),
            PrimitiveType::Float => Ok(Value::Float(f32::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_size())?,
            ))),
            PrimitiveType::Double => Ok(Value::Double(f64::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_size())?,
            ))),
            PrimitiveType::String => Ok(Value::String(
                std::str::from_utf8(bytes)
                    .map_err(|_| wrong_size())?
                    .to_owned(),
            )),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Boolean(b) => b.hash(state),
            Value::Int(i) | Value::Date(i) => i.hash(state),
            Value::Long(l) | Value::Timestamp(l) => l.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Long(a), Value::Long(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Long(l) => write!(f, "{l}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Date(days) => {
                match days
                    .checked_add(UNIX_EPOCH_FROM_CE)
                    .and_then(NaiveDate::from_num_days_from_ce_opt)
                {
                    Some(date) => write!(f, "{date}"),
                    None => write!(f, "{days}"),
                }
            }
            Value::Timestamp(ms) => match DateTime::from_timestamp_millis(*ms) {
                Some(ts) => write!(f, "{}", ts.naive_utc()),
                None => write!(f, "{ms}"),
            },
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

/// An ordered tuple of named values, conforming to some partition spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StructValue {
    fields: Vec<(String, Option<Value>)>,
}

impl StructValue {
    /// Creates a tuple from `(name, value)` pairs in partition field order.
    pub fn new(fields: Vec<(String, Option<Value>)>) -> Self {
        StructValue { fields }
    }

    /// Looks a field up by name.
    pub fn get(&self, name: &str) -> Option<&Option<Value>> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// The fields of the tuple, in partition field order.
    pub fn fields(&self) -> &[(String, Option<Value>)] {
        &self.fields
    }

    /// Number of fields in the tuple.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the tuple has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Option<Value>)> for StructValue {
    fn from_iter<I: IntoIterator<Item = (String, Option<Value>)>>(iter: I) -> Self {
        StructValue {
            fields: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for StructValue {
    /// Renders the tuple as a partition path, `field=value/field=value`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match value {
                Some(value) => write!(f, "{name}={value}")?,
                None => write!(f, "{name}=null")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Boolean),
            any::<i32>().prop_map(Value::Int),
            any::<i64>().prop_map(Value::Long),
            any::<f32>().prop_map(Value::Float),
            any::<f64>().prop_map(Value::Double),
            any::<i32>().prop_map(Value::Date),
            any::<i64>().prop_map(Value::Timestamp),
            ".*".prop_map(Value::String),
        ]
    }

    proptest! {
        #[test]
        fn test_bytes_round_trip(value in value_strategy()) {
            let bytes = value.to_bytes();
            let decoded = Value::try_from_bytes(&bytes, &value.datatype()).unwrap();
            prop_assert_eq!(value, decoded);
        }
    }

    #[test]
    fn test_partition_path() {
        let partition = StructValue::new(vec![
            ("ts_day".to_string(), Some(Value::Date(19_000))),
            ("region".to_string(), Some(Value::String("eu".to_string()))),
            ("bucket".to_string(), None),
        ]);
        assert_eq!(partition.to_string(), "ts_day=2022-01-08/region=eu/bucket=null");
    }

    #[test]
    fn test_cross_type_comparison_is_undefined() {
        assert_eq!(Value::Int(1).partial_cmp(&Value::Long(1)), None);
        assert_ne!(Value::Int(1), Value::Long(1));
    }
}
