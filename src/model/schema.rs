/*!
A table's schema is a list of named, typed columns, represented by [Schema].

The snapshot maintenance layer only needs column identity and primitive
types (to type partition tuples and column bounds), so nested types are not
modeled here.
*/

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Primitive types within a schema.
pub enum PrimitiveType {
    /// True or False
    Boolean,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// 32-bit IEEE 754 floating point.
    Float,
    /// 64-bit IEEE 754 floating point.
    Double,
    /// Calendar date without timezone or time.
    Date,
    /// Timestamp without timezone, millisecond precision.
    Timestamp,
    /// Arbitrary-length character sequences.
    String,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::Boolean => write!(f, "boolean"),
            PrimitiveType::Int => write!(f, "int"),
            PrimitiveType::Long => write!(f, "long"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Date => write!(f, "date"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::String => write!(f, "string"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
/// A column in a schema.
pub struct StructField {
    /// Unique id of the column within the table.
    pub id: i32,
    /// The column name.
    pub name: String,
    /// Whether the column may hold null values.
    pub required: bool,
    /// The column type.
    pub field_type: PrimitiveType,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// The ordered columns of a table.
pub struct Schema {
    /// Identifier of the schema, unique within the table.
    pub schema_id: i32,
    /// The columns of the schema.
    pub fields: Vec<StructField>,
}

impl Schema {
    /// Looks a column up by id.
    pub fn field(&self, id: i32) -> Option<&StructField> {
        self.fields.iter().find(|field| field.id == id)
    }

    /// Looks a column up by name.
    pub fn field_by_name(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_round_trip() {
        let data = r#"
            {
                "schema-id": 1,
                "fields": [
                    {"id": 1, "name": "id", "required": true, "field_type": "long"},
                    {"id": 2, "name": "ts", "required": false, "field_type": "timestamp"},
                    {"id": 3, "name": "data", "required": false, "field_type": "string"}
                ]
            }
        "#;
        let schema: Schema = serde_json::from_str(data).unwrap();
        assert_eq!(schema.schema_id, 1);
        assert_eq!(schema.field(2).unwrap().name, "ts");
        assert_eq!(
            schema.field_by_name("data").unwrap().field_type,
            PrimitiveType::String
        );

        let round_trip: Schema =
            serde_json::from_str(&serde_json::to_string(&schema).unwrap()).unwrap();
        assert_eq!(schema, round_trip);
    }
}
